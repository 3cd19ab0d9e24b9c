use serde::{Deserialize, Serialize};

/// A participant in a call, as reported by the SFU
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantData {
    pub user_id: String,
    pub session_id: String,
    pub name: Option<String>,
}

/// Kind of media track a participant publishes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Audio,
    Video,
    ScreenShare,
}

/// Coarse connection quality as measured by the SFU
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Poor,
    Good,
    Excellent,
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ConnectionQuality, ParticipantData, TrackType};

/// Messages sent from client to SFU over the signaling socket
///
/// Exactly one variant is populated per frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Authenticate this session with the SFU; must be the first frame sent
    JoinRequest {
        token: String,
        session_id: String,
        publisher_sdp: Option<String>,
        subscriber_sdp: Option<String>,
    },

    /// Keepalive probe; the server answers with a `HealthCheckResponse`
    HealthCheckRequest,
}

/// Messages sent from SFU to client over the signaling socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Join accepted; always the first frame on a successful connection
    JoinResponse {
        own_session_id: String,
        participants: Vec<ParticipantData>,
    },

    /// Error from the server; as a first frame this rejects the join
    Error { message: String },

    /// Acknowledgment of a `HealthCheckRequest`
    HealthCheckResponse,

    /// Another participant joined the call
    ParticipantJoined { participant: ParticipantData },

    /// A participant left the call
    ParticipantLeft { participant: ParticipantData },

    /// A participant published a media track
    TrackPublished {
        user_id: String,
        session_id: String,
        track_type: TrackType,
    },

    /// A participant unpublished a media track
    TrackUnpublished {
        user_id: String,
        session_id: String,
        track_type: TrackType,
    },

    /// The loudest speaker changed
    DominantSpeakerChanged { user_id: String, session_id: String },

    /// A participant's measured connection quality changed
    ConnectionQualityChanged {
        user_id: String,
        session_id: String,
        quality: ConnectionQuality,
    },
}

/// Closed set of inbound message kinds, used for listener registration and
/// dispatch routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    JoinResponse,
    Error,
    HealthCheckResponse,
    ParticipantJoined,
    ParticipantLeft,
    TrackPublished,
    TrackUnpublished,
    DominantSpeakerChanged,
    ConnectionQualityChanged,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::JoinResponse => "join_response",
            EventKind::Error => "error",
            EventKind::HealthCheckResponse => "health_check_response",
            EventKind::ParticipantJoined => "participant_joined",
            EventKind::ParticipantLeft => "participant_left",
            EventKind::TrackPublished => "track_published",
            EventKind::TrackUnpublished => "track_unpublished",
            EventKind::DominantSpeakerChanged => "dominant_speaker_changed",
            EventKind::ConnectionQualityChanged => "connection_quality_changed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

impl ClientEnvelope {
    /// Serialize into the payload of a binary WebSocket frame
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}

impl ServerEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }

    /// The kind of this envelope's populated variant
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEnvelope::JoinResponse { .. } => EventKind::JoinResponse,
            ServerEnvelope::Error { .. } => EventKind::Error,
            ServerEnvelope::HealthCheckResponse => EventKind::HealthCheckResponse,
            ServerEnvelope::ParticipantJoined { .. } => EventKind::ParticipantJoined,
            ServerEnvelope::ParticipantLeft { .. } => EventKind::ParticipantLeft,
            ServerEnvelope::TrackPublished { .. } => EventKind::TrackPublished,
            ServerEnvelope::TrackUnpublished { .. } => EventKind::TrackUnpublished,
            ServerEnvelope::DominantSpeakerChanged { .. } => EventKind::DominantSpeakerChanged,
            ServerEnvelope::ConnectionQualityChanged { .. } => {
                EventKind::ConnectionQualityChanged
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_envelope_uses_snake_case_tag() {
        let envelope = ClientEnvelope::JoinRequest {
            token: "tok".to_string(),
            session_id: "sess".to_string(),
            publisher_sdp: None,
            subscriber_sdp: None,
        };
        let json = String::from_utf8(envelope.encode().unwrap()).unwrap();
        assert!(json.contains("\"type\":\"join_request\""));

        let json = String::from_utf8(ClientEnvelope::HealthCheckRequest.encode().unwrap()).unwrap();
        assert!(json.contains("\"type\":\"health_check_request\""));
    }

    #[test]
    fn server_envelope_decodes_and_routes_by_kind() {
        let bytes = br#"{"type":"error","message":"Unauthorized"}"#;
        let envelope = ServerEnvelope::decode(bytes).unwrap();
        assert_eq!(envelope.kind(), EventKind::Error);
        match envelope {
            ServerEnvelope::Error { message } => assert_eq!(message, "Unauthorized"),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_is_a_decode_error() {
        let bytes = br#"{"type":"made_up_event"}"#;
        assert!(ServerEnvelope::decode(bytes).is_err());
    }
}

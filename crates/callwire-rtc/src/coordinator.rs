//! Coordinator join API.
//!
//! The coordinator is the control-plane service that admits a user into a
//! call and hands back credentials for the SFU assigned to it. This crate
//! only consumes the join operation; [`Coordinator`] is a trait so tests and
//! embedders can substitute their own implementation.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Optional parameters for a join request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinOptions {
    /// Locally generated publisher offer, sent for early negotiation
    pub publisher_sdp: Option<String>,
    /// Locally generated subscriber offer
    pub subscriber_sdp: Option<String>,
    /// Ring the other members when creating the call
    pub ring: bool,
    /// Send a push notification to the other members
    pub notify: bool,
    /// Whether the caller intends to publish video
    pub video: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinCallRequest {
    pub call_type: String,
    pub call_id: String,
    pub user_id: String,
    pub create: bool,
    /// Discovered edge region code
    pub location: String,
    pub options: JoinOptions,
}

/// SFU assignment inside the join credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SfuServer {
    /// Base HTTP URL of the SFU
    pub url: String,
    /// WebSocket endpoint for the signaling connection
    pub ws_endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Everything needed to connect to the assigned SFU. Obtained once per
/// session and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinCredentials {
    pub token: String,
    pub server: SfuServer,
    pub ice_servers: Vec<IceServer>,
}

#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Admits the user into the call and returns SFU credentials. Any error
    /// is fatal to the join attempt.
    async fn join_call(&self, request: JoinCallRequest) -> Result<JoinCredentials>;
}

/// Coordinator backed by the REST API.
pub struct HttpCoordinator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpCoordinator {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Coordinator for HttpCoordinator {
    async fn join_call(&self, request: JoinCallRequest) -> Result<JoinCredentials> {
        let url = format!(
            "{}/call/{}/{}/join",
            self.base_url, request.call_type, request.call_id
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Join call failed with status {}: {}", status, text);
        }

        let credentials: JoinCredentials = response.json().await?;
        Ok(credentials)
    }
}

use callwire_protocol::EventKind;
use thiserror::Error;

/// Errors from the signaling socket handshake and transport
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The SFU answered the join with an error envelope
    #[error("connection rejected by server: {0}")]
    Rejected(String),

    /// The first inbound envelope was neither a join response nor an error
    #[error("unexpected first message from server: {0}")]
    ProtocolViolation(EventKind),

    /// The transport failed before any message arrived
    #[error("transport failed: {0}")]
    Transport(String),

    /// The client was closed and cannot be reconnected
    #[error("signaling client is closed")]
    Closed,
}

/// Errors raised by the connection manager while establishing a session
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to join call: {0}")]
    Join(String),

    #[error("sfu connection failed: {0}")]
    Signaling(String),

    #[error("connection already established")]
    AlreadyConnected,

    #[error("connection already terminated")]
    Terminated,
}

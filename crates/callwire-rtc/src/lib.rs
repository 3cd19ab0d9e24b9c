//! Callwire RTC session layer
//!
//! This crate manages the client side of an SFU-routed call: it discovers the
//! nearest edge region, obtains join credentials from the coordinator,
//! maintains the persistent signaling socket with its keepalive, and
//! normalizes locally generated SDP before negotiation.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod location;
pub mod manager;
pub mod sdp;
pub mod signaling;

pub use config::RtcConfig;
pub use coordinator::{
    Coordinator, HttpCoordinator, IceServer, JoinCallRequest, JoinCredentials, JoinOptions,
    SfuServer,
};
pub use error::{ConnectionError, SignalingError};
pub use location::LocationDiscovery;
pub use manager::{CallTarget, ConnectionManager, ConnectionState, LifecycleTick};
pub use signaling::{EventFilter, SignalingClient};

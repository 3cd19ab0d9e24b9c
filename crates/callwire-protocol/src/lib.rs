//! Wire-protocol definitions shared between the Callwire client and the SFU.
//!
//! Every frame on the signaling socket is one [`ClientEnvelope`] or
//! [`ServerEnvelope`], serialized as a tagged JSON document inside a binary
//! WebSocket frame. Framing and transport security come from the socket
//! itself.

pub mod envelope;
pub mod types;

pub use envelope::{ClientEnvelope, CodecError, EventKind, ServerEnvelope};
pub use types::{ConnectionQuality, ParticipantData, TrackType};

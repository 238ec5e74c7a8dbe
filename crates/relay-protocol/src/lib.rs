//! # relay-protocol
//!
//! Wire formats for the relay messaging layer.
//!
//! Two layers are stacked on every WebSocket:
//!
//! - **Engine packets** ([`engine`]): handshake, ping/pong liveness, and the
//!   `Message` envelope. One text frame carries one engine packet.
//! - **Messaging packets** ([`packet`]): namespace connect/disconnect,
//!   events, and acknowledgements, carried inside engine `Message` packets.
//!
//! Binary payloads travel as separate binary frames after the packet that
//! references them through placeholders ([`binary`]).

#![deny(unsafe_code)]

pub mod binary;
pub mod engine;
pub mod errors;
pub mod packet;

pub use binary::{AttachmentAssembler, AttachmentBuilder, Message};
pub use engine::{EnginePacket, EngineVersion, Frame, OpenPayload};
pub use errors::{ProtocolError, Result};
pub use packet::{Packet, PacketKind};

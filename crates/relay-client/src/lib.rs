//! # relay-client
//!
//! A small client for driving a relay server from tests and the `relay`
//! CLI. Speaks engine revision 4 over a single WebSocket, joins one
//! namespace per client, and answers the server's acknowledgement requests
//! through a configurable responder. A dropped transport can be re-dialed
//! automatically ([`ReconnectPolicy`]).

#![deny(unsafe_code)]

pub mod ack;
pub mod client;
pub mod errors;
pub mod reconnect;

pub use ack::{AckResponse, AckStats, AckTracker, AckWaitError};
pub use client::{
    AckResponder, ClientOptions, IncomingEvent, RECONNECT_EVENT, RelayClient, engine_url,
};
pub use errors::{ClientError, Result};
pub use reconnect::ReconnectPolicy;

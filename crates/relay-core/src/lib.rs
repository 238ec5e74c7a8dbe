//! # relay-core
//!
//! Shared vocabulary for the relay crates:
//!
//! - **Ids**: `EngineId`, `SocketId` newtypes so a transport id is never
//!   passed where a namespace socket id is expected
//! - **Time**: ISO-8601 timestamps in the format every event payload carries
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod time;

pub use ids::{EngineId, SocketId};
pub use time::now_iso;

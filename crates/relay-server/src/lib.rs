//! # relay-server
//!
//! Axum HTTP + `WebSocket` server speaking the relay messaging protocol.
//!
//! - HTTP endpoints: `/health`, `/metrics`, and the `/socket.io/` upgrade
//! - Engine sessions: handshake, ping/pong liveness, binary reassembly
//! - Namespaces: admission, membership, broadcast fan-out
//! - Events: handler registry with acknowledgements
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod events;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod namespace;
pub mod server;
pub mod shutdown;
pub mod socket;

pub use config::ServerConfig;
pub use errors::{Result, ServerError};
pub use server::RelayServer;

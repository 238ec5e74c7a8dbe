//! Engine connections and the namespace sockets multiplexed over them.

pub mod ack;
pub mod connection;
pub mod heartbeat;
pub mod reason;
pub mod session;
#[allow(clippy::module_inception)]
pub mod socket;

pub use ack::{AckError, AckManager, AckReceiver, AckResponse, AckResult, AckStats};
pub use connection::{EngineConnection, SessionCommand};
pub use heartbeat::{HeartbeatResult, run_heartbeat, run_heartbeat_emitter};
pub use reason::DisconnectReason;
pub use session::{SessionContext, run_ws_session};
pub use socket::Socket;

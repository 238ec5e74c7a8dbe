//! Event handling: registry, per-event context, lifecycle broadcasts, and
//! the built-in handlers.

pub mod context;
pub mod handlers;
pub mod lifecycle;
pub mod registry;

pub use context::{AckResponder, EventContext};
pub use registry::{EventHandler, EventRegistry};

//! Namespace membership and event fan-out.

pub mod broadcast;
pub mod registry;

pub use broadcast::BroadcastManager;
pub use registry::NamespaceRegistry;

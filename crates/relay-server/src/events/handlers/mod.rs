//! Built-in event handlers.

pub mod binary;
pub mod chat;
pub mod custom;
pub mod heartbeat;
pub mod test_event;

use super::registry::EventRegistry;

/// Namespace whose sockets also get `testEvent`.
pub const TEST_NAMESPACE: &str = "/test";

/// Register every built-in handler.
pub fn register_all(registry: &mut EventRegistry) {
    registry.register("chatMessage", chat::ChatMessageHandler);
    registry.register("customEvent", custom::CustomEventHandler);
    registry.register("binaryEvent", binary::BinaryEventHandler);
    registry.register("binaryAckTest", binary_ack_test::BinaryAckTestHandler);
    registry.register("heartbeat", heartbeat::HeartbeatHandler);
    registry.register_for(TEST_NAMESPACE, "testEvent", test_event::TestEventHandler);
}

/// A registry holding every built-in handler.
pub fn default_registry() -> EventRegistry {
    let mut registry = EventRegistry::new();
    register_all(&mut registry);
    registry
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::sync::Arc;

    use bytes::Bytes;
    use serde_json::Value;

    use crate::events::context::{AckResponder, EventContext};
    use crate::namespace::{BroadcastManager, NamespaceRegistry};
    use crate::socket::Socket;
    use crate::socket::test_support::{TestPeer, test_socket};

    /// Ack id used by contexts built with `with_ack`.
    pub(crate) const TEST_ACK_ID: u64 = 7;

    pub(crate) fn manager() -> Arc<BroadcastManager> {
        let registry = NamespaceRegistry::new(
            vec!["/".into(), "/chat".into(), "/game".into(), "/test".into()],
            false,
        );
        Arc::new(BroadcastManager::new(Arc::new(registry)))
    }

    /// A socket that joined `namespace` and is registered with `bm`.
    pub(crate) async fn member(bm: &Arc<BroadcastManager>, namespace: &str) -> (Socket, TestPeer) {
        let (socket, peer) = test_socket(namespace);
        bm.add(Arc::clone(socket.engine())).await;
        bm.namespaces().add(socket.clone()).await;
        (socket, peer)
    }

    /// Context for `socket` receiving `event`.
    pub(crate) fn context_for(
        bm: &Arc<BroadcastManager>,
        socket: &Socket,
        event: &str,
        args: Vec<Value>,
        attachments: Vec<Bytes>,
        with_ack: bool,
    ) -> EventContext {
        EventContext {
            socket: socket.clone(),
            event: event.to_owned(),
            args,
            attachments,
            ack: with_ack.then(|| AckResponder::new(socket.clone(), TEST_ACK_ID)),
            broadcast: Arc::clone(bm),
        }
    }

    /// Context for a fresh member of `namespace`.
    pub(crate) async fn make_context(
        namespace: &str,
        event: &str,
        args: Vec<Value>,
        attachments: Vec<Bytes>,
        with_ack: bool,
    ) -> (EventContext, TestPeer) {
        let bm = manager();
        let (socket, peer) = member(&bm, namespace).await;
        (context_for(&bm, &socket, event, args, attachments, with_ack), peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_every_event() {
        let reg = default_registry();
        for event in ["chatMessage", "customEvent", "binaryEvent", "binaryAckTest", "heartbeat"] {
            assert!(reg.has_event("/", event), "{event} missing");
            assert!(reg.has_event("/game", event), "{event} missing");
        }
        assert!(reg.has_event("/test", "testEvent"));
        assert!(!reg.has_event("/", "testEvent"));
        assert!(!reg.has_event("/chat", "testEvent"));
    }
}

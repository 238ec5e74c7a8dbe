//! `heartbeat`: answer the sender directly.

use async_trait::async_trait;
use relay_core::now_iso;
use serde_json::json;
use tracing::{debug, instrument};

use crate::events::context::EventContext;
use crate::events::registry::EventHandler;

/// Replies to client heartbeats on the same socket.
pub struct HeartbeatHandler;

#[async_trait]
impl EventHandler for HeartbeatHandler {
    #[instrument(skip_all, fields(event = "heartbeat", socket_id = %ctx.socket.id()))]
    async fn handle(&self, ctx: EventContext) {
        debug!(namespace = ctx.namespace(), data = %ctx.data(), "heartbeat");
        let _ = ctx.socket.emit(
            "heartbeat",
            vec![json!({
                "received": true,
                "timestamp": now_iso(),
                "namespace": ctx.namespace(),
            })],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::handlers::test_helpers::{context_for, manager, member};
    use crate::socket::test_support::drain_packets;

    #[tokio::test]
    async fn replies_to_sender_only() {
        let bm = manager();
        let (sender, mut ps) = member(&bm, "/game").await;
        let (_other, mut po) = member(&bm, "/game").await;

        let ctx = context_for(&bm, &sender, "heartbeat", vec![json!({"t": 1})], vec![], false);
        HeartbeatHandler.handle(ctx).await;

        let packets = drain_packets(&mut ps);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].event_name(), Some("heartbeat"));
        let body = &packets[0].event_args()[0];
        assert_eq!(body["received"], true);
        assert_eq!(body["namespace"], "/game");
        assert!(drain_packets(&mut po).is_empty());
    }
}

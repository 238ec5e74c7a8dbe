//! `chatMessage`: acknowledge, then echo to the whole namespace.

use async_trait::async_trait;
use relay_core::now_iso;
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::events::context::EventContext;
use crate::events::registry::EventHandler;

/// Echoes chat messages to every member of the sender's namespace.
pub struct ChatMessageHandler;

#[async_trait]
impl EventHandler for ChatMessageHandler {
    #[instrument(skip_all, fields(event = "chatMessage", socket_id = %ctx.socket.id()))]
    async fn handle(&self, mut ctx: EventContext) {
        info!(namespace = ctx.namespace(), data = %ctx.data(), "chat message");

        if let Some(ack) = ctx.take_ack() {
            let _ = ack.respond(vec![json!({
                "status": "received",
                "timestamp": now_iso(),
            })]);
        }

        let message = ctx.data().get("message").cloned().unwrap_or(Value::Null);
        let payload = json!({
            "sender": ctx.socket.id(),
            "message": message,
            "timestamp": now_iso(),
            "namespace": ctx.namespace(),
        });
        let _ = ctx
            .broadcast
            .broadcast(ctx.namespace(), "chatMessage", vec![payload], &[])
            .await;
    }
}

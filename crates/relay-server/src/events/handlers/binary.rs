//! `binaryEvent`: acknowledge with the received size, then relay the
//! payload to the rest of the namespace.

use async_trait::async_trait;
use relay_core::now_iso;
use relay_protocol::binary::binary_len;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::events::context::EventContext;
use crate::events::registry::EventHandler;

/// Relays binary payloads to every namespace member except the sender.
pub struct BinaryEventHandler;

#[async_trait]
impl EventHandler for BinaryEventHandler {
    #[instrument(skip_all, fields(event = "binaryEvent", socket_id = %ctx.socket.id()))]
    async fn handle(&self, mut ctx: EventContext) {
        // Payload bytes are not logged
        info!(
            namespace = ctx.namespace(),
            attachments = ctx.attachments.len(),
            "binary event received"
        );

        if let Some(ack) = ctx.take_ack() {
            let received_size = ctx
                .data()
                .get("binaryData")
                .map_or(0, |value| binary_len(value, &ctx.attachments));
            let sent = ack.respond(vec![json!({
                "success": true,
                "timestamp": now_iso(),
                "message": "Binary data received successfully",
                "receivedSize": received_size,
                "sender": ctx.socket.id(),
                "namespace": ctx.namespace(),
            })]);
            debug!(sent, received_size, "binary event ack");
        }

        let EventContext {
            socket,
            args,
            attachments,
            broadcast,
            ..
        } = ctx;
        let _ = broadcast
            .broadcast_except(socket.namespace(), socket.id(), "binaryEvent", args, &attachments)
            .await;
    }
}

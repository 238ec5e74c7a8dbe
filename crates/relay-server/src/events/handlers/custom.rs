//! `customEvent`: acknowledge with the compact JSON of the payload.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, instrument};

use crate::events::context::EventContext;
use crate::events::registry::EventHandler;

/// Answers `customEvent` acks with `"Processed: <json>"`.
pub struct CustomEventHandler;

#[async_trait]
impl EventHandler for CustomEventHandler {
    #[instrument(skip_all, fields(event = "customEvent", socket_id = %ctx.socket.id()))]
    async fn handle(&self, mut ctx: EventContext) {
        info!(namespace = ctx.namespace(), data = %ctx.data(), "custom event");

        let Some(ack) = ctx.take_ack() else {
            info!(namespace = ctx.namespace(), "no callback provided for customEvent");
            return;
        };
        let response = format!("Processed: {}", ctx.data());
        let _ = ack.respond(vec![json!({
            "success": true,
            "response": response,
            "namespace": ctx.namespace(),
        })]);
    }
}

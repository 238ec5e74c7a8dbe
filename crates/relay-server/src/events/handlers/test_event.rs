//! `testEvent`, registered for the `/test` namespace only.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, instrument};

use crate::events::context::EventContext;
use crate::events::registry::EventHandler;

/// Echoes the payload back inside a fixed test verdict.
pub struct TestEventHandler;

#[async_trait]
impl EventHandler for TestEventHandler {
    #[instrument(skip_all, fields(event = "testEvent", socket_id = %ctx.socket.id()))]
    async fn handle(&self, mut ctx: EventContext) {
        info!(data = %ctx.data(), "special test event received");
        if let Some(ack) = ctx.take_ack() {
            let _ = ack.respond(vec![json!({
                "testResult": "passed",
                "message": "This is a special response for /test namespace",
                "data": ctx.data(),
            })]);
        }
    }
}

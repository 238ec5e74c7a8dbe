//! Namespace admission checks run before a socket joins.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::EngineId;
use relay_protocol::EngineVersion;
use serde_json::Value;
use tracing::{debug, info};

/// What a middleware sees about a namespace connect.
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest<'a> {
    /// Engine connection asking to join.
    pub engine_id: &'a EngineId,
    /// Requested namespace.
    pub namespace: &'a str,
    /// Auth payload of the `CONNECT` packet, if any.
    pub auth: Option<&'a Value>,
    /// Negotiated engine revision.
    pub version: EngineVersion,
}

/// A check that may refuse a namespace connect.
#[async_trait]
pub trait ConnectMiddleware: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Admit the request, or refuse it with the message sent back in the
    /// `CONNECT_ERROR` packet.
    async fn check(&self, request: &ConnectRequest<'_>) -> Result<(), String>;
}

/// Logs every connect attempt and admits it.
pub struct LoggingMiddleware;

#[async_trait]
impl ConnectMiddleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn check(&self, request: &ConnectRequest<'_>) -> Result<(), String> {
        info!(
            engine_id = %request.engine_id,
            namespace = request.namespace,
            eio = request.version.as_u8(),
            has_auth = request.auth.is_some(),
            "connection attempt"
        );
        Ok(())
    }
}

/// Ordered middleware list. The first refusal wins.
#[derive(Default)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn ConnectMiddleware>>,
}

impl MiddlewareChain {
    /// Empty chain (admits everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain holding only [`LoggingMiddleware`].
    pub fn default_chain() -> Self {
        let mut chain = Self::new();
        chain.add(LoggingMiddleware);
        chain
    }

    /// Append a middleware.
    pub fn add(&mut self, middleware: impl ConnectMiddleware + 'static) {
        self.layers.push(Arc::new(middleware));
    }

    /// Number of middlewares.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Run every middleware in order.
    pub async fn run(&self, request: &ConnectRequest<'_>) -> Result<(), String> {
        for layer in &self.layers {
            if let Err(message) = layer.check(request).await {
                debug!(
                    middleware = layer.name(),
                    namespace = request.namespace,
                    message,
                    "connect refused"
                );
                return Err(message);
            }
        }
        Ok(())
    }
}

//! Which namespaces exist and which sockets joined them.

use std::collections::HashMap;

use relay_core::SocketId;
use tokio::sync::RwLock;
use tracing::debug;

use crate::socket::Socket;

/// Namespace admission rules and per-namespace socket membership.
pub struct NamespaceRegistry {
    configured: Vec<String>,
    allow_dynamic: bool,
    members: RwLock<HashMap<String, HashMap<SocketId, Socket>>>,
}

impl NamespaceRegistry {
    /// Registry accepting `configured` namespaces, plus any namespace when
    /// `allow_dynamic` is set.
    pub fn new(configured: Vec<String>, allow_dynamic: bool) -> Self {
        Self {
            configured,
            allow_dynamic,
            members: RwLock::new(HashMap::new()),
        }
    }

    /// Whether a connect to `namespace` may proceed.
    pub fn accepts(&self, namespace: &str) -> bool {
        namespace.starts_with('/')
            && (self.allow_dynamic || self.configured.iter().any(|n| n == namespace))
    }

    /// Namespaces accepted regardless of the dynamic setting.
    pub fn configured(&self) -> &[String] {
        &self.configured
    }

    /// Add a socket to its namespace.
    pub async fn add(&self, socket: Socket) {
        let mut members = self.members.write().await;
        let namespace = members.entry(socket.namespace().to_owned()).or_default();
        debug!(
            namespace = socket.namespace(),
            socket_id = %socket.id(),
            size = namespace.len() + 1,
            "socket joined namespace"
        );
        let _ = namespace.insert(socket.id().clone(), socket);
    }

    /// Remove a socket. Empty namespaces are dropped.
    pub async fn remove(&self, namespace: &str, socket_id: &SocketId) -> Option<Socket> {
        let mut members = self.members.write().await;
        let sockets = members.get_mut(namespace)?;
        let removed = sockets.remove(socket_id);
        if sockets.is_empty() {
            let _ = members.remove(namespace);
        }
        removed
    }

    /// Socket `socket_id` in `namespace`.
    pub async fn get(&self, namespace: &str, socket_id: &SocketId) -> Option<Socket> {
        self.members
            .read()
            .await
            .get(namespace)
            .and_then(|sockets| sockets.get(socket_id))
            .cloned()
    }

    /// Socket `socket_id` in whichever namespace holds it.
    pub async fn find(&self, socket_id: &SocketId) -> Option<Socket> {
        self.members
            .read()
            .await
            .values()
            .find_map(|sockets| sockets.get(socket_id))
            .cloned()
    }

    /// Every socket in `namespace`.
    pub async fn members(&self, namespace: &str) -> Vec<Socket> {
        self.members
            .read()
            .await
            .get(namespace)
            .map(|sockets| sockets.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of sockets in `namespace`.
    pub async fn namespace_size(&self, namespace: &str) -> usize {
        self.members
            .read()
            .await
            .get(namespace)
            .map_or(0, HashMap::len)
    }

    /// Number of sockets across every namespace.
    pub async fn socket_count(&self) -> usize {
        self.members.read().await.values().map(HashMap::len).sum()
    }

    /// Namespaces with at least one member, sorted.
    pub async fn active_namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.members.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

use std::{collections::HashMap, sync::Arc, time::Instant};

use {
    tokio::sync::{RwLock, mpsc},
    tokio_util::sync::CancellationToken,
};

use coldwire_exec::Executor;

// ── Connected client ─────────────────────────────────────────────────────────

/// A WebSocket client currently connected to the gateway.
#[derive(Debug)]
pub struct ConnectedClient {
    pub conn_id: String,
    /// Channel for sending serialized frames to this client's write loop.
    pub sender: mpsc::UnboundedSender<String>,
    pub connected_at: Instant,
}

impl ConnectedClient {
    /// Send a serialized JSON frame to this client. Returns false once
    /// the write loop is gone; the frame is dropped in that case.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// All connected WebSocket clients, keyed by conn_id.
    pub clients: RwLock<HashMap<String, ConnectedClient>>,
    /// Spawns classified commands; read-only after startup.
    pub executor: Executor,
    /// Server version string.
    pub version: String,
    /// Cancelled when the gateway starts draining; every write loop
    /// flushes its queue and closes its socket in response.
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(executor: Executor) -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            executor,
            version: env!("CARGO_PKG_VERSION").to_string(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Register a new client connection.
    pub async fn register_client(&self, client: ConnectedClient) {
        let conn_id = client.conn_id.clone();
        self.clients.write().await.insert(conn_id, client);
    }

    /// Remove a client by conn_id. Returns the removed client if found.
    pub async fn remove_client(&self, conn_id: &str) -> Option<ConnectedClient> {
        self.clients.write().await.remove(conn_id)
    }

    /// Number of connected clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Send a serialized frame to every connected client.
    pub async fn broadcast(&self, frame: &str) {
        for client in self.clients.read().await.values() {
            client.send(frame);
        }
    }
}

//! RealtimeHub - Detection Event Fan-out
//!
//! ## Responsibilities
//!
//! - Bearer-token gate for new subscriber connections
//! - Live connection set (the only shared mutable state in the service)
//! - Broadcast each detection event to every open connection
//! - Prune closed or stalled connections without affecting the others
//!
//! Each event is serialized once and written as one record per connection.
//! `publish` holds the write lock for the whole fan-out, so all subscribers
//! observe events in the same order and nothing is written to a connection
//! after it has left the set.

mod connection;

pub use connection::{ConnectionState, Handshake, Rejected, Subscription};

use crate::models::DetectionEvent;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Default per-connection queue depth
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 32;

/// Client connection
struct ClientConnection {
    id: Uuid,
    peer: Option<String>,
    opened_at: DateTime<Utc>,
    tx: mpsc::Sender<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    secret: String,
    buffer: usize,
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
}

impl RealtimeHub {
    /// Create new RealtimeHub guarded by `secret`
    pub fn new(secret: impl Into<String>) -> Self {
        Self::with_buffer(secret, DEFAULT_SUBSCRIBER_BUFFER)
    }

    pub fn with_buffer(secret: impl Into<String>, buffer: usize) -> Self {
        Self {
            secret: secret.into(),
            buffer: buffer.max(1),
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Authenticate and register a new client.
    ///
    /// A rejected handshake never touches the live set.
    pub async fn subscribe(self: &Arc<Self>, handshake: Handshake) -> Result<Subscription, Rejected> {
        if let Err(rejected) = handshake.authenticate(&self.secret) {
            tracing::warn!(peer = ?handshake.peer, reason = %rejected, "Subscriber rejected");
            return Err(rejected);
        }

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        let conn = ClientConnection {
            id,
            peer: handshake.peer,
            opened_at: Utc::now(),
            tx,
        };

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, conn);
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Client connected");

        Ok(Subscription::new(id, rx, Arc::downgrade(self)))
    }

    /// Unregister a client. Unknown or already removed ids are ignored.
    pub async fn unsubscribe(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if let Some(conn) = connections.remove(id) {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(
                connection_id = %id,
                peer = ?conn.peer,
                open_sec = (Utc::now() - conn.opened_at).num_seconds(),
                "Client disconnected"
            );
        }
    }

    /// Broadcast an event to all clients.
    ///
    /// Returns the number of connections written to. Write failures only
    /// remove the failing connection.
    pub async fn publish(&self, event: &DetectionEvent) -> usize {
        let json = match event.to_json() {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize event");
                return 0;
            }
        };

        let mut connections = self.connections.write().await;
        let client_count = connections.len();
        tracing::debug!(client_count = %client_count, failed = event.is_failed(), "Sending to connected clients");

        let mut delivered = 0;
        let mut dead = Vec::new();
        for conn in connections.values() {
            match conn.tx.try_send(json.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection_id = %conn.id, "Client not draining events, dropping connection");
                    dead.push(conn.id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(connection_id = %conn.id, "Client stream already closed");
                    dead.push(conn.id);
                }
            }
        }

        for id in dead {
            if connections.remove(&id).is_some() {
                self.connection_count.fetch_sub(1, Ordering::Relaxed);
                tracing::info!(connection_id = %id, "Client removed after failed write");
            }
        }

        delivered
    }

    /// Close every connection (service shutdown)
    pub async fn close_all(&self) {
        let mut connections = self.connections.write().await;
        let closed = connections.len();
        connections.clear();
        self.connection_count.store(0, Ordering::Relaxed);
        tracing::info!(closed = closed, "Closed all client connections");
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }

    pub async fn is_connected(&self, id: &Uuid) -> bool {
        self.connections.read().await.contains_key(id)
    }
}

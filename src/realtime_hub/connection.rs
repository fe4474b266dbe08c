//! Subscriber connection lifecycle.
//!
//! A `Handshake` is a connection still being admitted; the hub turns an
//! accepted one into an `Open` `Subscription`, which ends `Closed`.

use super::RealtimeHub;
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use uuid::Uuid;

/// State of an admitted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Open,
    Closed,
}

/// Handshake rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    #[error("missing bearer credential")]
    MissingCredential,

    #[error("invalid bearer credential")]
    InvalidCredential,
}

impl From<Rejected> for crate::Error {
    fn from(e: Rejected) -> Self {
        crate::Error::Unauthorized(e.to_string())
    }
}

/// What a client presents when opening a stream
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub credential: Option<String>,
    /// Remote address, for logging only
    pub peer: Option<String>,
}

impl Handshake {
    /// Build from an `Authorization` header value (`Bearer <token>`)
    pub fn from_authorization(header: Option<&str>) -> Self {
        let credential = header.and_then(|value| {
            let (scheme, token) = value.trim().split_once(' ')?;
            scheme
                .eq_ignore_ascii_case("bearer")
                .then(|| token.trim().to_string())
        });
        Self {
            credential,
            peer: None,
        }
    }

    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    /// Check the presented credential against the shared secret
    pub(crate) fn authenticate(&self, secret: &str) -> Result<(), Rejected> {
        let presented = match self.credential.as_deref() {
            Some(c) if !c.is_empty() => c,
            _ => return Err(Rejected::MissingCredential),
        };
        if secret.is_empty() || !constant_time_eq(presented.as_bytes(), secret.as_bytes()) {
            return Err(Rejected::InvalidCredential);
        }
        Ok(())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Open stream handle.
///
/// Yields serialized event records until the hub drops the connection.
/// Dropping the handle removes it from the hub.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<String>,
    hub: Weak<RealtimeHub>,
    state: ConnectionState,
}

impl Subscription {
    pub(crate) fn new(id: Uuid, rx: mpsc::Receiver<String>, hub: Weak<RealtimeHub>) -> Self {
        Self {
            id,
            rx,
            hub,
            state: ConnectionState::Open,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Stop accepting records; the hub prunes the connection on its next write
    pub fn close(&mut self) {
        self.rx.close();
        self.state = ConnectionState::Closed;
    }

    /// Next record, `None` once closed
    pub async fn recv(&mut self) -> Option<String> {
        let next = self.rx.recv().await;
        if next.is_none() {
            self.state = ConnectionState::Closed;
        }
        next
    }
}

impl Stream for Subscription {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        let this = self.get_mut();
        let next = this.rx.poll_recv(cx);
        if let Poll::Ready(None) = next {
            this.state = ConnectionState::Closed;
        }
        next
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.state = ConnectionState::Closed;
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    hub.unsubscribe(&id).await;
                });
            }
            // No runtime left; the next publish prunes the closed channel
            Err(_) => tracing::debug!(connection_id = %id, "Subscription dropped outside runtime"),
        }
    }
}

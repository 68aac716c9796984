pub mod broadcast;
pub mod registry;
#[cfg(test)]
pub(crate) mod testing;

pub use broadcast::Broadcaster;
pub use registry::{ClientId, ClientRegistry, Subscription, Visit};

// Real-time push: the client registry tracks live connections of both
// transports, and the broadcaster fans each new update out to all of them.
// Transports plug in through `PushSink`; the registry and broadcaster never
// see which one they are talking to.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

use crate::error::OtaResult;
use crate::store::UpdateRecord;
use crate::version::Version;

/// Which push transport a subscription uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Long-lived `text/event-stream` response
    Sse,
    /// Persistent WebSocket on the dedicated port
    WebSocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Sse => f.write_str("sse"),
            TransportKind::WebSocket => f.write_str("websocket"),
        }
    }
}

/// Why the server ended a push connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Shutdown,
    /// A write failed or timed out during a broadcast
    Evicted,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Shutdown => "server shutting down",
            CloseReason::Evicted => "client too slow",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record serialized once per broadcast round and shared by every sink.
#[derive(Debug, Clone)]
pub struct PushPayload {
    pub version: Version,
    pub json: Arc<str>,
}

impl PushPayload {
    pub fn from_record(record: &UpdateRecord) -> OtaResult<Self> {
        Ok(Self {
            version: record.version,
            json: serde_json::to_string(record)?.into(),
        })
    }
}

/// Write side of one push connection.
#[async_trait]
pub trait PushSink: Send + Sync {
    /// Frame `payload` for this transport and queue it. May wait while the
    /// connection's buffer is full; callers bound the wait.
    async fn send(&self, payload: &PushPayload) -> OtaResult<()>;

    /// Ask the connection to shut down. Never blocks.
    fn close(&self, reason: CloseReason);
}

/// Sending half of a connection's bounded frame queue.
pub struct Outbox<T> {
    tx: mpsc::Sender<T>,
    closed: Arc<Notify>,
    reason: Arc<Mutex<Option<CloseReason>>>,
}

/// Receiving half, owned by the task that drives the connection.
pub struct Inbox<T> {
    pub rx: mpsc::Receiver<T>,
    pub closed: Arc<Notify>,
    reason: Arc<Mutex<Option<CloseReason>>>,
}

pub fn outbox<T>(capacity: usize) -> (Outbox<T>, Inbox<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let closed = Arc::new(Notify::new());
    let reason = Arc::new(Mutex::new(None));
    (
        Outbox {
            tx,
            closed: closed.clone(),
            reason: reason.clone(),
        },
        Inbox { rx, closed, reason },
    )
}

impl<T> Outbox<T> {
    /// Queue a frame; fails once the connection task has gone away.
    pub async fn push(&self, frame: T) -> Result<(), &'static str> {
        self.tx.send(frame).await.map_err(|_| "connection closed")
    }

    /// The first reason given wins.
    pub fn close(&self, reason: CloseReason) {
        self.reason.lock().get_or_insert(reason);
        self.closed.notify_one();
    }
}

impl<T> Inbox<T> {
    /// Reason passed to [`Outbox::close`]; only meaningful once `closed` fired.
    pub fn close_reason(&self) -> CloseReason {
        self.reason.lock().unwrap_or(CloseReason::Shutdown)
    }
}

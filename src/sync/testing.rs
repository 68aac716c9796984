//! In-memory sinks for exercising the registry and broadcaster without sockets.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::{CloseReason, PushPayload, PushSink};
use crate::error::{OtaError, OtaResult};
use crate::version::Version;

/// Records every payload it receives.
#[derive(Default)]
pub struct RecordingSink {
    received: Mutex<Vec<Version>>,
    closed: Mutex<Option<CloseReason>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn received(&self) -> Vec<Version> {
        self.received.lock().clone()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.closed.lock()
    }
}

#[async_trait]
impl PushSink for RecordingSink {
    async fn send(&self, payload: &PushPayload) -> OtaResult<()> {
        self.received.lock().push(payload.version);
        Ok(())
    }

    fn close(&self, reason: CloseReason) {
        *self.closed.lock() = Some(reason);
    }
}

/// Fails every write, like a half-closed connection.
#[derive(Default)]
pub struct FailingSink {
    closed: Mutex<Option<CloseReason>>,
}

impl FailingSink {
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.closed.lock()
    }
}

#[async_trait]
impl PushSink for FailingSink {
    async fn send(&self, _payload: &PushPayload) -> OtaResult<()> {
        Err(OtaError::TransportWrite {
            client_id: "failing".into(),
            reason: "broken pipe".into(),
        })
    }

    fn close(&self, reason: CloseReason) {
        *self.closed.lock() = Some(reason);
    }
}

/// Never finishes a write within any reasonable timeout.
pub struct StallingSink(pub Duration);

#[async_trait]
impl PushSink for StallingSink {
    async fn send(&self, _payload: &PushPayload) -> OtaResult<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }

    fn close(&self, _reason: CloseReason) {}
}

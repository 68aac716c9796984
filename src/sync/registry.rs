use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{CloseReason, PushSink, TransportKind};
use crate::auth::ApiKeyPolicy;
use crate::error::OtaResult;

pub type ClientId = String;

/// One live push connection
#[derive(Clone)]
pub struct Subscription {
    pub client_id: ClientId,
    pub transport: TransportKind,
    /// Key presented at connect time, kept for diagnostics only
    pub api_key: String,
    pub connected_at: DateTime<Utc>,
    pub sink: Arc<dyn PushSink>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("client_id", &self.client_id)
            .field("transport", &self.transport)
            .field("connected_at", &self.connected_at)
            .field("sink", &"<dyn PushSink>")
            .finish()
    }
}

/// Returned by the [`ClientRegistry::for_each`] visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Keep,
    Evict,
}

/// Live push subscribers of both transports.
///
/// All access goes through a single lock so that a snapshot taken for a
/// broadcast round is a true point-in-time view. The lock is never held while
/// writing to a connection.
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, Subscription>>,
    auth: ApiKeyPolicy,
}

impl ClientRegistry {
    pub fn new(auth: ApiKeyPolicy) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            auth,
        }
    }

    pub fn next_client_id() -> ClientId {
        Uuid::new_v4().to_string()
    }

    /// Register a connection. Transports check the key before accepting the
    /// connection, so the check here only guards direct callers.
    pub fn add(
        &self,
        client_id: ClientId,
        transport: TransportKind,
        api_key: &str,
        sink: Arc<dyn PushSink>,
    ) -> OtaResult<()> {
        self.auth.check(Some(api_key))?;

        let subscription = Subscription {
            client_id: client_id.clone(),
            transport,
            api_key: api_key.to_string(),
            connected_at: Utc::now(),
            sink,
        };
        self.clients.write().insert(client_id.clone(), subscription);

        tracing::info!(%client_id, %transport, "push client connected");
        Ok(())
    }

    pub fn remove(&self, client_id: &str) -> Option<Subscription> {
        let removed = self.clients.write().remove(client_id);
        if let Some(sub) = &removed {
            tracing::info!(client_id, transport = %sub.transport, "push client removed");
        }
        removed
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.read().contains_key(client_id)
    }

    /// Point-in-time copy of every subscription
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.clients.read().values().cloned().collect()
    }

    /// Visit a snapshot; entries the visitor marks [`Visit::Evict`] are removed.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&Subscription) -> Visit,
    {
        for sub in self.snapshot() {
            if visit(&sub) == Visit::Evict {
                self.remove(&sub.client_id);
            }
        }
    }

    pub fn size(&self) -> usize {
        self.clients.read().len()
    }

    /// Remove every subscription and ask its connection to close.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Subscription> = self.clients.write().drain().map(|(_, sub)| sub).collect();
        for sub in &drained {
            sub.sink.close(CloseReason::Shutdown);
        }
        drained.len()
    }
}

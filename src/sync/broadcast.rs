use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::registry::{ClientRegistry, Subscription};
use super::{CloseReason, PushPayload};
use crate::store::UpdateRecord;

/// Fans an update out to every registered push client.
///
/// Delivery is at-most-once and best-effort: a client that is not connected
/// when `publish` runs never sees that record and has to pull it. A failed or
/// timed-out write evicts only that client.
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
    write_timeout: Duration,
}

impl Broadcaster {
    pub fn new(registry: Arc<ClientRegistry>, write_timeout: Duration) -> Self {
        Self {
            registry,
            write_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub async fn publish(&self, record: &UpdateRecord) {
        let payload = match PushPayload::from_record(record) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(version = %record.version, error = %e, "failed to serialize update");
                return;
            }
        };

        // targetDevices is deliberately not applied here; targeted devices
        // gate themselves on their next pull.
        let targets = self.registry.snapshot();
        if targets.is_empty() {
            tracing::debug!(version = %record.version, "no push clients connected");
            return;
        }

        let outcomes = join_all(targets.iter().map(|sub| self.deliver(sub, &payload))).await;
        let evicted = outcomes.iter().filter(|delivered| !**delivered).count();

        tracing::info!(
            version = %record.version,
            clients = targets.len(),
            evicted,
            "broadcast update"
        );
    }

    async fn deliver(&self, sub: &Subscription, payload: &PushPayload) -> bool {
        let reason = match timeout(self.write_timeout, sub.sink.send(payload)).await {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("write timed out after {:?}", self.write_timeout),
        };

        self.registry.remove(&sub.client_id);
        sub.sink.close(CloseReason::Evicted);
        tracing::warn!(
            client_id = %sub.client_id,
            transport = %sub.transport,
            %reason,
            "evicted push client"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ApiKeyPolicy;
    use crate::store::{Origin, UpdateConfig};
    use crate::sync::testing::{FailingSink, RecordingSink, StallingSink};
    use crate::sync::TransportKind;
    use crate::version::Version;

    fn record(patch: u64) -> UpdateRecord {
        UpdateRecord::new(Version::new(1, 0, patch), UpdateConfig::default(), Origin::Manual)
    }

    fn broadcaster() -> Broadcaster {
        let registry = Arc::new(ClientRegistry::new(ApiKeyPolicy::default()));
        Broadcaster::new(registry, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn delivers_exactly_once_until_removed() {
        let broadcaster = broadcaster();
        let sink = RecordingSink::new();
        broadcaster
            .registry()
            .add("a".into(), TransportKind::Sse, "nxs_k", sink.clone())
            .unwrap();

        broadcaster.publish(&record(3)).await;
        assert_eq!(sink.received(), vec![Version::new(1, 0, 3)]);

        broadcaster.registry().remove("a");
        broadcaster.publish(&record(4)).await;
        assert_eq!(sink.received(), vec![Version::new(1, 0, 3)]);
        assert_eq!(sink.close_reason(), None);
    }

    #[tokio::test]
    async fn failing_client_is_evicted_without_affecting_others() {
        let broadcaster = broadcaster();
        let healthy: Vec<_> = (0..4).map(|_| RecordingSink::new()).collect();
        for (i, sink) in healthy.iter().enumerate() {
            let transport = if i % 2 == 0 {
                TransportKind::Sse
            } else {
                TransportKind::WebSocket
            };
            broadcaster
                .registry()
                .add(format!("ok-{i}"), transport, "nxs_k", sink.clone())
                .unwrap();
        }
        let broken = Arc::new(FailingSink::default());
        broadcaster
            .registry()
            .add("broken".into(), TransportKind::WebSocket, "nxs_k", broken.clone())
            .unwrap();

        broadcaster.publish(&record(3)).await;

        assert_eq!(broadcaster.registry().size(), 4);
        assert!(!broadcaster.registry().contains("broken"));
        assert_eq!(broken.close_reason(), Some(CloseReason::Evicted));
        for sink in &healthy {
            assert_eq!(sink.received(), vec![Version::new(1, 0, 3)]);
            assert_eq!(sink.close_reason(), None);
        }
    }

    #[tokio::test]
    async fn stalled_write_times_out_and_evicts() {
        let broadcaster = broadcaster();
        let healthy = RecordingSink::new();
        broadcaster
            .registry()
            .add("ok".into(), TransportKind::Sse, "nxs_k", healthy.clone())
            .unwrap();
        broadcaster
            .registry()
            .add(
                "stalled".into(),
                TransportKind::Sse,
                "nxs_k",
                Arc::new(StallingSink(Duration::from_secs(30))),
            )
            .unwrap();

        let started = std::time::Instant::now();
        broadcaster.publish(&record(3)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!broadcaster.registry().contains("stalled"));
        assert!(broadcaster.registry().contains("ok"));
        assert_eq!(healthy.received().len(), 1);
    }

    #[tokio::test]
    async fn publish_with_no_clients_is_a_no_op() {
        let broadcaster = broadcaster();
        broadcaster.publish(&record(3)).await;
        assert_eq!(broadcaster.registry().size(), 0);
    }
}

use notify::{Event, RecommendedWatcher, Watcher};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::{is_content_change, WatchSet};
use crate::error::{OtaError, OtaResult};
use crate::store::UpdateRecord;
use crate::sync::Broadcaster;
use crate::synth::{Synthesizer, Trigger};

/// Synthesizes and broadcasts an update for every modified source file.
#[derive(Clone)]
pub struct ChangeTrigger {
    synthesizer: Arc<Synthesizer>,
    broadcaster: Arc<Broadcaster>,
}

/// Running watcher. Dropping it also ends the event loop, but only
/// [`TriggerHandle::stop`] waits for an in-flight change to finish.
pub struct TriggerHandle {
    watcher: RecommendedWatcher,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TriggerHandle {
    /// Stop the watcher. Changes observed after this returns produce nothing.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        drop(self.watcher);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "change trigger task ended abnormally");
        }
        tracing::info!("change trigger stopped");
    }
}

impl ChangeTrigger {
    pub fn new(synthesizer: Arc<Synthesizer>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            synthesizer,
            broadcaster,
        }
    }

    /// Synthesize, register and broadcast one change. Failures are logged and
    /// the change is dropped; nothing is broadcast for it.
    pub async fn handle_change(&self, path: &Path) -> Option<Arc<UpdateRecord>> {
        match self
            .synthesizer
            .synthesize(Trigger::FileChange(path.to_path_buf()))
            .await
        {
            Ok(record) => {
                tracing::info!(
                    version = %record.version,
                    file = %path.display(),
                    "synthesized update from file change"
                );
                self.broadcaster.publish(&record).await;
                Some(record)
            }
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "dropped file change");
                None
            }
        }
    }

    /// Register `set` with the platform watcher and process events on a
    /// background task.
    pub fn start(self, set: WatchSet) -> OtaResult<TriggerHandle> {
        let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = event_tx.send(event);
            }
            Err(e) => tracing::warn!(error = %e, "file watcher error"),
        })
        .map_err(|e| OtaError::WatchSetup {
            path: "<watcher>".into(),
            reason: e.to_string(),
        })?;

        for (root, mode) in set.roots() {
            watcher.watch(root, mode).map_err(|e| OtaError::WatchSetup {
                path: root.display().to_string(),
                reason: e.to_string(),
            })?;
            tracing::info!(root = %root.display(), ?mode, "watching for source changes");
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(set, event_rx, stop_rx));

        Ok(TriggerHandle {
            watcher,
            stop_tx,
            task,
        })
    }

    async fn run(
        self,
        set: WatchSet,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if !is_content_change(&event.kind) {
                        continue;
                    }
                    for path in &event.paths {
                        if *stop.borrow() {
                            return;
                        }
                        if set.matches(path) {
                            self.handle_change(path).await;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ApiKeyPolicy;
    use crate::config::WatchConfig;
    use crate::store::{Origin, UpdateConfig, VersionStore};
    use crate::sync::testing::RecordingSink;
    use crate::sync::{ClientRegistry, TransportKind};
    use crate::synth::BaselineTemplate;
    use crate::version::Version;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        trigger: ChangeTrigger,
        store: Arc<VersionStore>,
        sse: Arc<RecordingSink>,
        ws: Arc<RecordingSink>,
    }

    fn fixture(max_payload_bytes: usize) -> Fixture {
        let store = Arc::new(VersionStore::new(max_payload_bytes));
        for patch in [1, 2] {
            let _ = store.register(UpdateRecord::new(
                Version::new(1, 0, patch),
                UpdateConfig::default(),
                Origin::Manual,
            ));
        }

        let registry = Arc::new(ClientRegistry::new(ApiKeyPolicy::default()));
        let sse = RecordingSink::new();
        let ws = RecordingSink::new();
        registry
            .add("sse".into(), TransportKind::Sse, "nxs_a", sse.clone())
            .unwrap();
        registry
            .add("ws".into(), TransportKind::WebSocket, "nxs_b", ws.clone())
            .unwrap();

        let broadcaster = Arc::new(Broadcaster::new(registry, Duration::from_millis(200)));
        let synthesizer = Arc::new(
            Synthesizer::new(store.clone(), BaselineTemplate::default(), &WatchConfig::default())
                .unwrap(),
        );

        Fixture {
            trigger: ChangeTrigger::new(synthesizer, broadcaster),
            store,
            sse,
            ws,
        }
    }

    #[tokio::test]
    async fn change_reaches_both_transports() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("foo.ts");
        tokio::fs::write(&file, "console.log('hi');").await.unwrap();

        let fx = fixture(256 * 1024);
        let record = fx.trigger.handle_change(&file).await.unwrap();

        assert_eq!(record.version, Version::new(1, 0, 3));
        assert_eq!(record.changed_file(), Some("foo.ts"));
        assert_eq!(fx.sse.received(), vec![Version::new(1, 0, 3)]);
        assert_eq!(fx.ws.received(), vec![Version::new(1, 0, 3)]);
        assert!(fx.store.get(&Version::new(1, 0, 3)).is_some());
    }

    #[tokio::test]
    async fn failed_synthesis_broadcasts_nothing() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("foo.ts");
        tokio::fs::write(&file, "console.log('hi');").await.unwrap();

        // Seeded configs are empty; a synthesized one will not fit.
        let fx = fixture(200);
        assert!(fx.trigger.handle_change(&file).await.is_none());
        assert!(fx.sse.received().is_empty());
        assert!(fx.ws.received().is_empty());
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        condition()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn watcher_turns_writes_into_updates() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        let file = src.join("app.js");
        std::fs::write(&file, "export {}").unwrap();

        let fx = fixture(256 * 1024);
        let set = WatchSet::resolve(&[format!("{}/**/*.js", src.display())], &[]).unwrap();
        let handle = fx.trigger.clone().start(set).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        std::fs::write(&file, "console.log('edited');").unwrap();
        let sse = fx.sse.clone();
        assert!(wait_for(|| !sse.received().is_empty()).await);
        assert!(fx.store.latest_version().unwrap() >= Version::new(1, 0, 3));

        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stopped_trigger_ignores_changes() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.ts");
        std::fs::write(&file, "").unwrap();

        let fx = fixture(256 * 1024);
        let set = WatchSet::resolve(&[format!("{}/*.ts", dir.path().display())], &[]).unwrap();
        let handle = fx.trigger.clone().start(set).unwrap();
        handle.stop().await;

        std::fs::write(&file, "console.log('late');").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(fx.store.len(), 2);
        assert!(fx.sse.received().is_empty());
    }

    #[tokio::test]
    async fn dropped_handle_ends_the_loop() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.ts");
        std::fs::write(&file, "").unwrap();

        let fx = fixture(256 * 1024);
        let set = WatchSet::resolve(&[format!("{}/*.ts", dir.path().display())], &[]).unwrap();
        let handle = fx.trigger.clone().start(set).unwrap();
        drop(handle);
        tokio::time::sleep(Duration::from_millis(50)).await;

        std::fs::write(&file, "console.log('orphan');").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(fx.store.len(), 2);
        assert!(fx.sse.received().is_empty());
    }
}

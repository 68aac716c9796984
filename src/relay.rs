//! Relay bootstrap
//!
//! Wires the version store, both listeners and the change trigger together.
//! A trigger that cannot be set up is logged and skipped; the relay then
//! serves pulls and manual updates only.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::error::OtaResult;
use crate::server::{AppState, Server};
use crate::store::VersionStore;
use crate::watcher::{ChangeTrigger, TriggerHandle, WatchSet};

pub struct Relay {
    state: AppState,
    server: Server,
    trigger: Option<TriggerHandle>,
}

impl Relay {
    pub async fn start(config: &Config) -> OtaResult<Self> {
        let store = Arc::new(VersionStore::new(config.store.max_payload_bytes));
        if let Some(seed) = &config.store.seed_file {
            store.seed_from_file(seed)?;
        }

        let state = AppState::new(config, store)?;
        let server = Server::bind(&config.server, state.clone()).await?;
        let trigger = if config.watch.enabled {
            start_trigger(config, &state)
        } else {
            tracing::info!("file watching disabled");
            None
        };

        Ok(Self {
            state,
            server,
            trigger,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn http_addr(&self) -> OtaResult<SocketAddr> {
        self.server.http_addr()
    }

    pub fn ws_addr(&self) -> OtaResult<SocketAddr> {
        self.server.ws_addr()
    }

    pub fn is_watching(&self) -> bool {
        self.trigger.is_some()
    }

    /// Serve until `shutdown` resolves. The trigger stops first, then every
    /// push connection is closed.
    pub async fn run<F>(self, shutdown: F) -> OtaResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let trigger = self.trigger;
        self.server
            .run(async move {
                shutdown.await;
                if let Some(trigger) = trigger {
                    trigger.stop().await;
                }
            })
            .await
    }
}

fn start_trigger(config: &Config, state: &AppState) -> Option<TriggerHandle> {
    let trigger = ChangeTrigger::new(state.synthesizer.clone(), state.broadcaster.clone());
    let started = WatchSet::resolve(&config.watch.paths, &config.watch.exclude)
        .and_then(|set| trigger.start(set));

    match started {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "change trigger unavailable, serving pulls only");
            None
        }
    }
}

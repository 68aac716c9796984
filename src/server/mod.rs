//! HTTP and WebSocket front ends
//!
//! The HTTP listener serves the pull endpoint, manual update creation, the SSE
//! stream and diagnostics; the WebSocket transport has a listener of its own.

pub mod api;
pub mod sse;
pub mod ws;

use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::ApiKeyPolicy;
use crate::config::{Config, PushConfig, ServerConfig};
use crate::error::OtaResult;
use crate::pull::PullResolver;
use crate::store::VersionStore;
use crate::sync::{Broadcaster, ClientId, ClientRegistry};
use crate::synth::Synthesizer;

/// Shared handles for every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<VersionStore>,
    pub registry: Arc<ClientRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub synthesizer: Arc<Synthesizer>,
    pub pull: PullResolver,
    pub auth: ApiKeyPolicy,
    pub push: PushConfig,
}

impl AppState {
    pub fn new(config: &Config, store: Arc<VersionStore>) -> OtaResult<Self> {
        let auth = ApiKeyPolicy::new(config.auth.key_prefix.clone());
        let registry = Arc::new(ClientRegistry::new(auth.clone()));
        let broadcaster = Arc::new(Broadcaster::new(registry.clone(), config.push.write_timeout()));
        let synthesizer = Arc::new(Synthesizer::new(
            store.clone(),
            config.baseline.clone(),
            &config.watch,
        )?);

        Ok(Self {
            pull: PullResolver::new(store.clone(), auth.clone()),
            store,
            registry,
            broadcaster,
            synthesizer,
            auth,
            push: config.push.clone(),
        })
    }
}

/// `?apiKey=` on the push endpoints and manual creation
#[derive(Debug, Default, Deserialize)]
pub struct KeyQuery {
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
}

/// Removes a push client from the registry when its connection task ends.
pub(crate) struct ConnectionGuard {
    registry: Arc<ClientRegistry>,
    client_id: ClientId,
}

impl ConnectionGuard {
    pub(crate) fn new(registry: Arc<ClientRegistry>, client_id: ClientId) -> Self {
        Self {
            registry,
            client_id,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.client_id);
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/api/ota", get(api::pull).post(api::create_update))
        .route("/api/ota/stream", get(sse::stream))
        .route("/api/ota/status", get(api::status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn ws_router(state: AppState) -> Router {
    Router::new().route("/", get(ws::upgrade)).with_state(state)
}

/// Both listeners, bound and ready to serve
pub struct Server {
    state: AppState,
    http: TcpListener,
    ws: TcpListener,
}

impl Server {
    pub async fn bind(config: &ServerConfig, state: AppState) -> OtaResult<Self> {
        let http = TcpListener::bind(config.http_addr()?).await?;
        let ws = TcpListener::bind(config.ws_addr()?).await?;
        Ok(Self { state, http, ws })
    }

    pub fn http_addr(&self) -> OtaResult<SocketAddr> {
        Ok(self.http.local_addr()?)
    }

    pub fn ws_addr(&self) -> OtaResult<SocketAddr> {
        Ok(self.ws.local_addr()?)
    }

    /// Serve until `shutdown` resolves, then close every push connection and
    /// let in-flight requests finish.
    pub async fn run<F>(self, shutdown: F) -> OtaResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let registry = self.state.registry.clone();
        tokio::spawn(async move {
            shutdown.await;
            let closed = registry.close_all();
            tracing::info!(closed, "closed push connections");
            let _ = stop_tx.send(true);
        });

        let http = axum::serve(self.http, router(self.state.clone()))
            .with_graceful_shutdown(stopped(stop_rx.clone()));
        let ws = axum::serve(self.ws, ws_router(self.state))
            .with_graceful_shutdown(stopped(stop_rx));

        tokio::try_join!(
            async { http.await },
            async { ws.await },
        )?;
        Ok(())
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

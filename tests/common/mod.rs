#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use ota_relay::{Config, Relay};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub const KEY: &str = "nxs_test_demo";

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".into();
    config.server.http_port = 0;
    config.server.ws_port = 0;
    config.store.seed_file = Some(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("seed/updates.json"));
    config.watch.enabled = false;
    config
}

pub struct Running {
    pub http: SocketAddr,
    pub ws: SocketAddr,
    pub watching: bool,
    stop: oneshot::Sender<()>,
    task: JoinHandle<ota_relay::OtaResult<()>>,
}

impl Running {
    pub async fn start(config: Config) -> Self {
        let relay = Relay::start(&config).await.unwrap();
        let http = relay.http_addr().unwrap();
        let ws = relay.ws_addr().unwrap();
        let watching = relay.is_watching();

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(relay.run(async move {
            let _ = stopped.await;
        }));

        Self {
            http,
            ws,
            watching,
            stop,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.http, path)
    }

    pub async fn connect_ws(&self, key: &str) -> WsClient {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/?apiKey={key}", self.ws))
            .await
            .expect("ws connect");
        ws
    }

    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        timeout(Duration::from_secs(5), self.task)
            .await
            .expect("relay did not stop")
            .expect("relay task panicked")
            .expect("relay failed");
    }
}

/// Next JSON text frame, skipping pings; `None` on close or timeout.
pub async fn next_json(ws: &mut WsClient) -> Option<Value> {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next()).await.ok()??.ok()?;
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
            Message::Ping(_) | Message::Pong(_) => continue,
            _ => return None,
        }
    }
}

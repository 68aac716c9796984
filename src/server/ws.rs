use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{interval_at, Instant};

use super::{AppState, ConnectionGuard, KeyQuery};
use crate::error::{OtaError, OtaResult};
use crate::sync::{outbox, ClientId, ClientRegistry, CloseReason, Outbox, PushPayload, PushSink, TransportKind};

pub struct WsSink {
    client_id: ClientId,
    outbox: Outbox<Message>,
}

#[async_trait]
impl PushSink for WsSink {
    async fn send(&self, payload: &PushPayload) -> OtaResult<()> {
        self.outbox
            .push(Message::Text(payload.json.to_string().into()))
            .await
            .map_err(|reason| OtaError::TransportWrite {
                client_id: self.client_id.clone(),
                reason: reason.to_string(),
            })
    }

    fn close(&self, reason: CloseReason) {
        self.outbox.close(reason);
    }
}

/// `ws://host:ws_port/?apiKey=…`
pub async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    match state.auth.check(query.api_key.as_deref()) {
        Ok(key) => {
            let key = key.to_string();
            ws.on_upgrade(move |socket| handle_socket(state, socket, key))
        }
        Err(_) => ws.on_upgrade(reject),
    }
}

async fn reject(mut socket: WebSocket) {
    tracing::warn!("rejected websocket connection with invalid API key");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: "Invalid API key".into(),
        })))
        .await;
}

async fn handle_socket(state: AppState, socket: WebSocket, api_key: String) {
    let client_id = ClientRegistry::next_client_id();
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut inbox) = outbox(state.push.client_buffer);
    let sink = WsSink {
        client_id: client_id.clone(),
        outbox: tx,
    };
    if let Err(e) = state
        .registry
        .add(client_id.clone(), TransportKind::WebSocket, &api_key, Arc::new(sink))
    {
        tracing::warn!(%client_id, error = %e, "websocket registration failed");
        return;
    }
    let _guard = ConnectionGuard::new(state.registry.clone(), client_id.clone());

    // Registered first so nothing published after the hello is missed.
    let hello = json!({ "type": "connected", "clientId": client_id }).to_string();
    if sender.send(Message::Text(hello.into())).await.is_err() {
        return;
    }

    let period = state.push.heartbeat();
    let mut heartbeat = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            frame = inbox.rx.recv() => {
                let Some(frame) = frame else { break };
                if sender.send(frame).await.is_err() {
                    break;
                }
            }
            _ = inbox.closed.notified() => {
                let frame = close_frame(inbox.close_reason());
                let _ = sender.send(Message::Close(Some(frame))).await;
                break;
            }
            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!(%client_id, "websocket connection ended");
}

fn close_frame(reason: CloseReason) -> CloseFrame {
    let code = match reason {
        CloseReason::Shutdown => close_code::AWAY,
        CloseReason::Evicted => close_code::AGAIN,
    };
    CloseFrame {
        code,
        reason: reason.as_str().into(),
    }
}

//! Server-Sent Events transport
//!
//! Each subscriber holds a long-lived `text/event-stream` response. The first
//! event announces the client id, then every broadcast record follows as one
//! `data:` event, interleaved with `ping` heartbeats.

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::time::{interval_at, Instant, Interval};

use super::{AppState, ConnectionGuard, KeyQuery};
use crate::error::{OtaError, OtaResult};
use crate::sync::{outbox, ClientId, ClientRegistry, CloseReason, Inbox, Outbox, PushPayload, PushSink, TransportKind};

pub struct SseSink {
    client_id: ClientId,
    outbox: Outbox<Event>,
}

#[async_trait]
impl PushSink for SseSink {
    async fn send(&self, payload: &PushPayload) -> OtaResult<()> {
        self.outbox
            .push(Event::default().data(&*payload.json))
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

/// `GET /api/ota/stream`
pub async fn stream(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Result<impl IntoResponse, OtaError> {
    let api_key = state.auth.check(query.api_key.as_deref())?;

    let client_id = ClientRegistry::next_client_id();
    let (tx, inbox) = outbox(state.push.client_buffer);
    let sink = SseSink {
        client_id: client_id.clone(),
        outbox: tx,
    };
    state
        .registry
        .add(client_id.clone(), TransportKind::Sse, api_key, Arc::new(sink))?;

    let connection = Connection {
        inbox,
        heartbeat: heartbeat(state.push.heartbeat()),
        _guard: ConnectionGuard::new(state.registry.clone(), client_id.clone()),
    };
    Ok(Sse::new(events(client_id, connection)))
}

struct Connection {
    inbox: Inbox<Event>,
    heartbeat: Interval,
    _guard: ConnectionGuard,
}

fn heartbeat(period: std::time::Duration) -> Interval {
    interval_at(Instant::now() + period, period)
}

fn events(client_id: ClientId, connection: Connection) -> impl Stream<Item = Result<Event, Infallible>> {
    let connected = Event::default().data(json!({ "type": "connected", "clientId": client_id }).to_string());

    let updates = stream::unfold(connection, |mut conn| async move {
        tokio::select! {
            frame = conn.inbox.rx.recv() => frame.map(|event| (Ok(event), conn)),
            _ = conn.inbox.closed.notified() => {
                tracing::debug!(reason = %conn.inbox.close_reason(), "ending event stream");
                None
            }
            _ = conn.heartbeat.tick() => {
                let ping = json!({ "type": "ping", "timestamp": Utc::now().timestamp_millis() });
                Some((Ok(Event::default().data(ping.to_string())), conn))
            }
        }
    });

    stream::once(async move { Ok(connected) }).chain(updates)
}

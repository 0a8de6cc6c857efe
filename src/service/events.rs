use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::models::{PipelineStage, RunStatus};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Capacity of the event channel. Slow subscribers skip ahead on overflow.
pub const EVENT_CAPACITY: usize = 256;

pub type EventSender = broadcast::Sender<PipelineEvent>;

// ── Pipeline events ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PipelineEvent {
    TaskAccepted {
        task_id: String,
        round: u32,
        repo_name: String,
    },
    StageEntered {
        repo_name: String,
        stage: PipelineStage,
    },
    StageDegraded {
        repo_name: String,
        stage: PipelineStage,
        reason: String,
    },
    CallbackAttempted {
        repo_name: String,
        delivered: bool,
        error: Option<String>,
    },
    RunFinished {
        repo_name: String,
        status: RunStatus,
        error: Option<String>,
    },
}

pub fn channel() -> EventSender {
    broadcast::channel(EVENT_CAPACITY).0
}

/// Publish to every subscriber. No subscribers is not an error.
pub fn publish(tx: &EventSender, event: PipelineEvent) {
    let _ = tx.send(event);
}

// ── WebSocket stream ────────────────────────────────────────────────

impl PipelineEvent {
    pub fn repo_name(&self) -> &str {
        match self {
            Self::TaskAccepted { repo_name, .. }
            | Self::StageEntered { repo_name, .. }
            | Self::StageDegraded { repo_name, .. }
            | Self::CallbackAttempted { repo_name, .. }
            | Self::RunFinished { repo_name, .. } => repo_name,
        }
    }
}

/// `/ws?repo=<name>` narrows the stream to one repository.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub repo: Option<String>,
}

impl EventFilter {
    fn admits(&self, event: &PipelineEvent) -> bool {
        self.repo.as_deref().is_none_or(|repo| repo == event.repo_name())
    }
}

/// Why an event stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    ClientClosed,
    SendFailed,
    PongTimeout,
    ChannelClosed,
}

pub async fn ws_handler(ws: WebSocketUpgrade, filter: EventFilter, tx: EventSender) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, filter, tx))
}

async fn handle_socket(socket: WebSocket, filter: EventFilter, tx: EventSender) {
    let mut rx = tx.subscribe();
    let (mut sink, mut client) = socket.split();
    debug!(repo = ?filter.repo, "event stream client connected");
    let reason = stream_events(&mut sink, &mut client, &mut rx, &filter).await;
    debug!(?reason, "event stream client disconnected");
}

fn encode(event: &PipelineEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!(error = %e, "failed to serialize pipeline event");
            None
        }
    }
}

/// Pump matching events to `sink` until the client leaves or stops
/// answering pings. A ping left unanswered for [`PONG_TIMEOUT`] ends the
/// stream; lagging clients skip ahead.
pub async fn stream_events<S, R>(
    sink: &mut S,
    client: &mut R,
    rx: &mut broadcast::Receiver<PipelineEvent>,
    filter: &EventFilter,
) -> Disconnect
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut pings = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    let mut pong_due: Option<Instant> = None;

    let reason = loop {
        tokio::select! {
            now = pings.tick() => {
                if pong_due.is_some_and(|due| now >= due) {
                    break Disconnect::PongTimeout;
                }
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break Disconnect::SendFailed;
                }
                pong_due.get_or_insert(now + PONG_TIMEOUT);
            }

            received = rx.recv() => match received {
                Ok(event) if filter.admits(&event) => {
                    let Some(frame) = encode(&event) else { continue };
                    if sink.send(frame).await.is_err() {
                        break Disconnect::SendFailed;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event stream client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break Disconnect::ChannelClosed,
            },

            incoming = client.next() => match incoming {
                Some(Ok(Message::Pong(_))) => pong_due = None,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break Disconnect::ClientClosed,
                Some(Ok(_)) => {}
            },
        }
    };

    if reason != Disconnect::SendFailed {
        let _ = sink.send(Message::Close(None)).await;
    }
    reason
}

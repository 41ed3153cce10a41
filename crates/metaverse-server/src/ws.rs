use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::extract::FromRequest;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use metaverse_core::net::protocol::decode_client_message;

use crate::error::SessionError;
use crate::session::Session;
use crate::state::{AppState, ConnectionGuard, IpConnectionGuard};

pub async fn ws_handler(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> Result<axum::response::Response, StatusCode> {
    let limits = &state.config.limits;
    let Some(slot) = ConnectionGuard::try_acquire(
        Arc::clone(&state.ws_connection_count),
        limits.max_ws_connections,
    ) else {
        tracing::warn!(max = limits.max_ws_connections, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |ci| ci.0.ip());
    let Some(ip_slot) =
        IpConnectionGuard::try_acquire(ip, Arc::clone(&state.ws_per_ip), limits.max_ws_per_ip)
    else {
        tracing::warn!(%ip, max_per_ip = limits.max_ws_per_ip, "Per-IP WS connection limit reached");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    };

    // Both slots are held from here; a failed upgrade releases them on drop.
    let ws = WebSocketUpgrade::from_request(request, &state)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, slot, ip_slot))
        .into_response())
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    _slot: ConnectionGuard,
    _ip_slot: IpConnectionGuard,
) {
    let (ws_sender, mut ws_receiver) = socket.split();

    let (tx, rx) = mpsc::channel::<Utf8Bytes>(state.config.limits.member_message_buffer);
    let writer = spawn_writer(ws_sender, rx);

    let mut session = Session::new(state.clone(), tx);
    let connection_id = session.connection_id();
    tracing::info!(%connection_id, "Connection opened");

    read_loop(&mut ws_receiver, &mut session, &state).await;

    session.close().await;
    // The writer flushes queued events and sends Close once every sender is gone.
    drop(session);
    if let Err(e) = writer.await {
        tracing::debug!(%connection_id, error = %e, "Writer task ended abnormally");
    }

    tracing::info!(%connection_id, "Connection closed");
}

fn spawn_writer(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Utf8Bytes>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    })
}

/// Per-connection allowance of inbound frames: a bucket of `rate` frames that
/// refills at `rate` frames per second.
///
/// Over-budget frames are still decoded and answered; see
/// [`Session::handle_throttled`].
struct InboundBudget {
    available: f64,
    capacity: f64,
    last_refill: Instant,
}

impl InboundBudget {
    fn per_second(rate: f64, now: Instant) -> Self {
        Self {
            available: rate,
            capacity: rate,
            last_refill: now,
        }
    }

    /// Spend one frame of budget at `now`. False when the bucket is dry.
    fn spend(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.available = (self.available + elapsed * self.capacity).min(self.capacity);
        self.last_refill = now;

        if self.available < 1.0 {
            return false;
        }
        self.available -= 1.0;
        true
    }
}

async fn read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    session: &mut Session,
    state: &AppState,
) {
    let connection_id = session.connection_id();
    let limits = &state.config.limits;
    let mut budget = InboundBudget::per_second(limits.ws_rate_limit_per_sec, Instant::now());
    let join_deadline = limits.join_timeout().map(|timeout| Instant::now() + timeout);

    loop {
        let next = match join_deadline {
            Some(deadline) if session.is_connecting() => {
                match tokio::time::timeout_at(deadline, ws_receiver.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::info!(%connection_id, "Join timeout elapsed");
                        break;
                    },
                }
            },
            _ => ws_receiver.next().await,
        };

        let text = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(%connection_id, error = %e, "WebSocket read failed");
                break;
            },
        };

        let within_budget = budget.spend(Instant::now());

        let msg = match decode_client_message(text.as_str()) {
            Ok(msg) => msg,
            Err(e) if !e.is_fatal() => {
                tracing::debug!(%connection_id, error = %e, "Ignoring message");
                continue;
            },
            Err(e) => {
                let err = SessionError::from(e);
                tracing::warn!(%connection_id, error = %err, "Closing connection");
                break;
            },
        };

        let kind = msg.type_name();
        let outcome = if within_budget {
            session.handle(msg).await
        } else {
            tracing::debug!(%connection_id, kind, "Inbound rate exceeded");
            session.handle_throttled(msg).await
        };
        if let Err(err) = outcome {
            tracing::warn!(%connection_id, kind, error = %err, "Closing connection");
            break;
        }
    }
}

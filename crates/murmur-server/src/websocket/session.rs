//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::broadcast::BroadcastManager;
use super::connection::ClientConnection;
use crate::dispatcher::Dispatcher;
use crate::metrics::{
    RELAY_MALFORMED_FRAMES_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::protocol::{ConnectionId, InboundEvent, decode_inbound};

/// How long the writer gets to drain queued frames and send Close after the reader stops.
const OUTBOUND_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-connection transport parameters.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Outbound frames buffered before new ones are dropped.
    pub send_queue_capacity: usize,
    /// Interval between server-initiated Ping frames.
    pub ping_interval: Duration,
    /// Silence after which the client is considered dead.
    pub pong_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the client with the broadcast manager
/// 2. Decodes incoming frames and hands them to the dispatcher
/// 3. Forwards queued outbound frames and sends periodic Pings
/// 4. On close, timeout, or shutdown: unregisters, then dispatches `Disconnect`
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    dispatcher: Arc<Dispatcher>,
    broadcast: Arc<BroadcastManager>,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(config.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), send_tx));
    // Cancelled by server shutdown or by the writer giving up on the client.
    let closing = shutdown.child_token();

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    broadcast.add(Arc::clone(&connection));

    let outbound_conn = Arc::clone(&connection);
    let outbound_closing = closing.clone();
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(config.ping_interval);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(frame) = msg else { break };
                    if ws_tx.send(Message::Text(frame.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if outbound_conn.heartbeat_expired(config.pong_timeout) {
                        warn!(timeout = ?config.pong_timeout, "client unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = outbound_closing.cancelled() => {
                    // Frames already queued go out ahead of the Close.
                    while let Ok(frame) = send_rx.try_recv() {
                        if ws_tx.send(Message::Text(frame.as_str().into())).await.is_err() {
                            break;
                        }
                    }
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        outbound_closing.cancel();
    });

    loop {
        let next = tokio::select! {
            next = ws_rx.next() => next,
            () = closing.cancelled() => break,
        };
        let Some(Ok(msg)) = next else { break };
        connection.record_activity();

        // Binary frames are accepted when they carry UTF-8 JSON
        let text = match msg {
            Message::Text(ref t) => Some(t.to_string()),
            Message::Binary(ref data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    Some(s.to_string())
                } else {
                    warn!(len = data.len(), "received non-UTF8 binary frame");
                    None
                }
            }
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => None,
        };

        let Some(text) = text else { continue };

        match decode_inbound(&text) {
            Ok(event) => dispatcher.dispatch(&conn_id, event),
            Err(e) => {
                counter!(RELAY_MALFORMED_FRAMES_TOTAL).increment(1);
                warn!(error = %e, len = text.len(), "ignoring malformed frame");
            }
        }
    }

    // Unregister first so the departure notice only reaches the others.
    let _ = broadcast.remove(&conn_id);
    dispatcher.dispatch(&conn_id, InboundEvent::Disconnect);

    info!(dropped = connection.dropped(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());

    closing.cancel();
    if tokio::time::timeout(OUTBOUND_FLUSH_TIMEOUT, &mut outbound)
        .await
        .is_err()
    {
        debug!("writer did not finish in time, aborting");
        outbound.abort();
    }
}

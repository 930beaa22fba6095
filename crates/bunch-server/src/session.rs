//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.
//!
//! Token verification happens before the connection enters the registry;
//! a connection that never authenticates is closed without ever being
//! visible to the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bunch_core::ids::ConnectionId;
use bunch_proto::{ClientFrame, CloseCode, ServerFrame};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::auth::AuthError;
use crate::connection::{ConnectionHandle, ConnectionState};
use crate::handler::handle_frame;
use crate::heartbeat::{HeartbeatMonitor, HeartbeatVerdict};
use crate::server::AppState;

/// Run a WebSocket session for a connected client.
///
/// 1. Verifies the handshake token; failures close with a 4001–4003 code
/// 2. Registers the connection, superseding any transport with the same ID
/// 3. Sends `connection_established`, then serves frames until disconnect
/// 4. Pings on the heartbeat interval and evicts unresponsive clients
/// 5. Cleans up the registry and subscription table on the way out
#[instrument(skip_all, fields(connection_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    token: Option<String>,
    connection_id: Option<ConnectionId>,
    state: Arc<AppState>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let Some(token) = token else {
        counter!("auth_failures_total").increment(1);
        close_with(&mut ws_tx, CloseCode::AuthMissingToken).await;
        return;
    };
    let identity = match state.verifier.verify(&token).await {
        Ok(identity) => identity,
        Err(err) => {
            counter!("auth_failures_total").increment(1);
            warn!(error = %err, "handshake rejected");
            close_with(&mut ws_tx, err.close_code()).await;
            return;
        }
    };

    // Reconnecting clients present the connection ID they persisted;
    // first-time clients get a fresh one.
    let conn_id = connection_id.unwrap_or_default();
    tracing::Span::current().record("connection_id", conn_id.as_str());

    let (send_tx, mut send_rx) =
        mpsc::channel::<Arc<String>>(state.config.outbound_queue_capacity);
    let connection = Arc::new(ConnectionHandle::new(conn_id, identity, send_tx));
    connection.set_state(ConnectionState::Authenticated);

    let connection_start = std::time::Instant::now();
    info!(user = %connection.identity.username, "client connected");
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);

    let _ = state.registry.register(connection.clone()).await;

    let established = ServerFrame::ConnectionEstablished {
        connection_id: connection.id.clone(),
        server_time: ServerFrame::now_ms(),
    };
    if let Ok(json) = serde_json::to_string(&established) {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }

    // Outbound forwarder: drains the send queue, runs the heartbeat cycle,
    // and flushes the close frame when closure is requested.
    let outbound_conn = connection.clone();
    let ping_interval = state.config.ping_interval();
    let monitor = HeartbeatMonitor::new(connection.clone(), state.config.pong_timeout());
    let mut outbound = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        // Skip the immediate first tick
        let _ = ticker.tick().await;
        let closed = outbound_conn.closed();

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    match monitor.on_tick() {
                        HeartbeatVerdict::SendPing => {
                            if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                                break;
                            }
                        }
                        HeartbeatVerdict::Dead => {
                            warn!("heartbeat timeout, disconnecting");
                            counter!("heartbeat_evictions_total").increment(1);
                            outbound_conn.begin_close(CloseCode::HeartbeatTimeout);
                        }
                    }
                }
                () = closed.cancelled() => {
                    let code = outbound_conn.close_code().unwrap_or(CloseCode::Normal);
                    close_with(&mut ws_tx, code).await;
                    break;
                }
            }
        }
    });

    // Inbound loop. Leaves as soon as closure is requested, even when the
    // peer never sends another frame, so eviction cleanup is not held
    // hostage by a dead socket.
    let inbound_closed = connection.closed();
    loop {
        let next = tokio::select! {
            next = ws_rx.next() => next,
            () = inbound_closed.cancelled() => break,
        };
        let Some(Ok(msg)) = next else { break };
        // Any inbound frame counts as a sign of life
        connection.mark_alive();

        let text = match msg {
            Message::Text(ref t) => Some(t.to_string()),
            Message::Binary(ref data) => match std::str::from_utf8(data) {
                Ok(s) => Some(s.to_string()),
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    None
                }
            },
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => None,
        };
        let Some(text) = text else { continue };

        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => handle_frame(frame, &connection, &state).await,
            Err(err) => {
                counter!("protocol_errors_total").increment(1);
                debug!(error = %err, "unparseable frame");
                connection.send_frame(&ServerFrame::error("Invalid message format"));
            }
        }
    }

    // Clean up
    info!("client disconnected");
    counter!("ws_disconnections_total").increment(1);
    gauge!("ws_connections_active").decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(connection_start.elapsed().as_secs_f64());

    // Wake the outbound task if it is still in its select loop and give it
    // a moment to flush the close frame. First requested code wins, so an
    // eviction code set earlier is preserved.
    connection.begin_close(CloseCode::Normal);
    if tokio::time::timeout(Duration::from_secs(1), &mut outbound)
        .await
        .is_err()
    {
        outbound.abort();
    }
    connection.set_state(ConnectionState::Closed);
    let _ = state.registry.remove(&connection).await;
}

/// Send a close frame carrying `code` and its canonical reason.
async fn close_with(ws_tx: &mut SplitSink<WebSocket, Message>, code: CloseCode) {
    let frame = CloseFrame {
        code: code.code(),
        reason: code.reason().into(),
    };
    let _ = ws_tx.send(Message::Close(Some(frame))).await;
}

#[cfg(test)]
mod tests {
    // The session loop needs a real WebSocket and is exercised end to end
    // in tests/integration.rs. Unit tests here cover the handshake frame.

    use bunch_core::ids::ConnectionId;
    use bunch_proto::ServerFrame;

    #[test]
    fn established_frame_carries_the_presented_id() {
        let frame = ServerFrame::ConnectionEstablished {
            connection_id: ConnectionId::from("conn_persisted"),
            server_time: ServerFrame::now_ms(),
        };
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["type"], "connection_established");
        assert_eq!(v["connection_id"], "conn_persisted");
    }

    #[test]
    fn fresh_connection_ids_differ() {
        assert_ne!(
            ConnectionId::default().as_str(),
            ConnectionId::default().as_str()
        );
    }
}

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration};

use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::{ConnectionHandle, ConnectionId, ConnectionSender, OUTBOUND_QUEUE_CAPACITY};

/// Close code sent when a ping goes unanswered.
const CLOSE_GOING_AWAY: u16 = 1001;

/// How long the writer may keep flushing queued frames after the reader stops.
const WRITER_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Run the actor-per-connection pattern for an accepted WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: feeds each text frame to the router, in arrival order
///
/// The hub holds a clone of the mpsc sender, which is how broadcasts and
/// relayed frames reach this client. The reader loop also ends when the
/// keepalive gives up on the peer, when the writer dies, or when the hub has
/// already dropped this connection. Whatever ends it, the connection is
/// removed from the hub before returning.
pub async fn run_connection(socket: WebSocket, state: AppState, remote_addr: SocketAddr) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_CAPACITY);

    let handle = ConnectionHandle::new(tx.clone());
    let conn_id = handle.id;

    if state.sync_on_connect {
        state.hub.connect_with_snapshot(handle).await;
    } else {
        state.hub.connect(handle).await;
    }

    let connections = state.hub.connection_count().await;
    tracing::info!(
        conn_id,
        remote_addr = %remote_addr,
        connections,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception; one pending signal is enough
    let (pong_tx, pong_rx) = mpsc::channel::<()>(1);
    let mut ping_handle = spawn_keepalive(
        conn_id,
        tx.clone(),
        pong_rx,
        state.ping_interval,
        state.pong_timeout,
    );

    // Reader loop: process incoming WebSocket messages
    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = keepalive_finished(&mut ping_handle) => {
                tracing::info!(conn_id, "Keepalive ended, dropping connection");
                break;
            }
            _ = tx.closed() => {
                tracing::info!(conn_id, "Writer task gone, dropping connection");
                break;
            }
        };

        match frame {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    if !state.hub.is_connected(conn_id).await {
                        tracing::info!(conn_id, "Connection already removed by hub, stopping reader");
                        break;
                    }
                    protocol::handle_text_message(text.as_str(), conn_id, &state).await;
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        conn_id,
                        len = data.len(),
                        "Received binary message (expected JSON text), ignoring"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.try_send(());
                }
                Message::Ping(data) => {
                    let _ = tx.try_send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(conn_id, reason = ?frame, "Client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(conn_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::info!(conn_id, "WebSocket stream ended");
                break;
            }
        }
    }

    if let Some(ping_handle) = ping_handle {
        ping_handle.abort();
    }

    state.hub.disconnect(conn_id).await;

    // With every sender dropped the writer flushes what is queued (a pending
    // Close included) and exits; a peer that will not take it is cut off.
    drop(tx);
    if timeout(WRITER_DRAIN_GRACE, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    let connections = state.hub.connection_count().await;
    tracing::info!(conn_id, connections, "WebSocket actor stopped");
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
/// Exits on the first failed write, which closes the channel and marks the
/// connection dead for the hub.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
}

/// Resolves once the keepalive task has given up on the peer. Never resolves
/// when keepalive is disabled.
async fn keepalive_finished(handle: &mut Option<JoinHandle<()>>) {
    match handle {
        Some(handle) => {
            let _ = handle.await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Sends periodic pings and queues a Close when a pong is late. The task
/// returning is the signal for the reader loop to tear the connection down.
/// A zero interval disables keepalive.
fn spawn_keepalive(
    conn_id: ConnectionId,
    ping_tx: ConnectionSender,
    mut pong_rx: mpsc::Receiver<()>,
    ping_interval: Duration,
    pong_timeout: Duration,
) -> Option<JoinHandle<()>> {
    if ping_interval.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ping_timer = interval(ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.try_send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer gone or hopelessly behind
                tracing::info!(conn_id, "Ping could not be queued");
                break;
            }

            match timeout(pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(conn_id, "Pong timeout, closing connection");
                    let _ = ping_tx.try_send(Message::Close(Some(CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    }))
}

//! The single upstream WebSocket session.
//!
//! Exactly one session task exists while any subscriber does. The task
//! owns the socket, answers keepalive pings immediately, authenticates on
//! open, and re-requests the full interest set after every successful
//! authentication. An unexpected close schedules one reconnect after a
//! fixed delay, and only while subscribers remain; an authentication
//! failure ends the session without retrying, since a bad credential will
//! not heal on reconnect.

use crate::hub::HubShared;
use crate::protocol::{auth_succeeded, InboundFrame, OutboundAction, OutboundControl};
use core_types::ConnectionState;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub(crate) enum ConnectionCommand {
    /// Forward a subscribe/unsubscribe frame to the socket.
    Send(OutboundAction),
    /// The last subscriber left; close the socket and stop.
    Shutdown,
}

/// The hub's handle to the running session task.
pub(crate) struct ConnectionHandle {
    cmd_tx: mpsc::Sender<ConnectionCommand>,
    task: tokio::task::JoinHandle<()>,
}

impl ConnectionHandle {
    /// Best-effort send. Failures mean the session is closing or gone;
    /// the resubscribe-on-auth path makes the current interest set
    /// authoritative, so nothing is lost.
    pub fn send(&self, action: OutboundAction) {
        let _ = self.cmd_tx.try_send(ConnectionCommand::Send(action));
    }

    pub fn shutdown(self) {
        if self.cmd_tx.try_send(ConnectionCommand::Shutdown).is_err() {
            // Channel full or task already gone; make shutdown unconditional.
            self.task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub(crate) fn spawn(shared: Arc<HubShared>) -> ConnectionHandle {
    let capacity = shared.settings.command_queue_capacity.max(1);
    let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
    let task = tokio::spawn(run_session(shared, cmd_rx));
    ConnectionHandle { cmd_tx, task }
}

enum SessionEnd {
    /// Orderly shutdown requested by the hub.
    Shutdown,
    /// The server rejected our credential.
    AuthFailed,
    /// Unexpected close or transport error.
    Closed,
}

async fn run_session(shared: Arc<HubShared>, mut cmd_rx: mpsc::Receiver<ConnectionCommand>) {
    let url = shared.settings.ws_url.clone();
    let delay = Duration::from_secs(shared.settings.reconnect_delay_secs);
    let mut reconnecting = false;

    loop {
        if reconnecting {
            shared.set_state(ConnectionState::Reconnecting);
            tracing::warn!(
                delay_secs = delay.as_secs(),
                "Connection lost. Scheduling one reconnect attempt."
            );
            tokio::time::sleep(delay).await;
        }
        reconnecting = true;

        if !shared.has_subscribers() {
            shared.set_state(ConnectionState::Disconnected);
            return;
        }

        shared.set_state(ConnectionState::Connecting);
        let ws = match connect_async(url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                tracing::error!(error = %e, "WebSocket connection failed.");
                continue;
            }
        };
        tracing::info!("WebSocket connection established.");
        let (mut sink, mut stream) = ws.split();

        shared.set_state(ConnectionState::Authenticating);
        let auth = OutboundAction::Authenticate {
            api_key: shared.settings.api_key.clone(),
        };
        if send_json(&mut sink, &auth).await.is_err() {
            continue;
        }

        match read_loop(&shared, &mut cmd_rx, &mut sink, &mut stream).await {
            SessionEnd::Shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                shared.set_state(ConnectionState::Disconnected);
                return;
            }
            SessionEnd::AuthFailed => {
                shared.set_state(ConnectionState::Disconnected);
                return;
            }
            SessionEnd::Closed => {
                if !shared.has_subscribers() {
                    shared.set_state(ConnectionState::Disconnected);
                    return;
                }
            }
        }
    }
}

async fn read_loop(
    shared: &Arc<HubShared>,
    cmd_rx: &mut mpsc::Receiver<ConnectionCommand>,
    sink: &mut WsSink,
    stream: &mut WsStream,
) -> SessionEnd {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(ConnectionCommand::Send(action)) => {
                    // Failures here are teardown races with a closing
                    // socket and are swallowed.
                    if let Err(e) = send_json(sink, &action).await {
                        tracing::debug!(error = %e, "Outbound frame not sent; socket is closing.");
                    }
                }
                Some(ConnectionCommand::Shutdown) | None => return SessionEnd::Shutdown,
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<InboundFrame>(&text) {
                        Ok(frame) => {
                            if let Some(end) = handle_frame(shared, sink, frame).await {
                                return end;
                            }
                        }
                        // Parse errors drop the frame, never the connection.
                        Err(e) => tracing::warn!(error = %e, "Dropping unparseable frame."),
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::warn!(?frame, "Server closed the connection.");
                    return SessionEnd::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(error = %e, "WebSocket transport error.");
                    return SessionEnd::Closed;
                }
                None => return SessionEnd::Closed,
            }
        }
    }
}

async fn handle_frame(
    shared: &Arc<HubShared>,
    sink: &mut WsSink,
    frame: InboundFrame,
) -> Option<SessionEnd> {
    match frame {
        InboundFrame::Ping => {
            // The server treats a missed pong as a dead session; answer
            // before anything else.
            if send_json(sink, &OutboundControl::Pong).await.is_err() {
                return Some(SessionEnd::Closed);
            }
            None
        }
        InboundFrame::Auth { status } => {
            if auth_succeeded(&status) {
                shared.set_state(ConnectionState::Connected);
                let snapshot = shared.interest_snapshot();
                tracing::info!(
                    symbols = snapshot.len(),
                    "Authenticated. Re-requesting the current interest set."
                );
                for (key, mode) in snapshot {
                    let request = OutboundAction::Subscribe {
                        symbol: key.symbol,
                        exchange: key.exchange,
                        mode,
                    };
                    if send_json(sink, &request).await.is_err() {
                        return Some(SessionEnd::Closed);
                    }
                }
                None
            } else {
                tracing::error!(%status, "Authentication failed; not retrying with the same credential.");
                Some(SessionEnd::AuthFailed)
            }
        }
        InboundFrame::MarketData {
            symbol,
            exchange,
            data,
        } => {
            let tick = data.into_tick(symbol, exchange);
            shared.router.dispatch(&tick);
            None
        }
    }
}

async fn send_json<T: Serialize>(
    sink: &mut WsSink,
    value: &T,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let text = serde_json::to_string(value).expect("wire frame serialization cannot fail");
    sink.send(Message::Text(text)).await
}

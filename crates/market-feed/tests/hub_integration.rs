//! End-to-end tests for the feed hub against an in-process WebSocket
//! server speaking the upstream JSON protocol.

use core_types::{ConnectionState, StreamMode, SymbolKey, Tick};
use futures_util::{SinkExt, StreamExt};
use market_feed::{FeedHub, TickCallback};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

type ServerWs = WebSocketStream<TcpStream>;

async fn recv_json(ws: &mut ServerWs) -> Option<Value> {
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(text)) => return serde_json::from_str(&text).ok(),
            Ok(Message::Close(_)) | Err(_) => return None,
            _ => {}
        }
    }
    None
}

async fn send_json(ws: &mut ServerWs, value: Value) {
    let _ = ws.send(Message::Text(value.to_string())).await;
}

/// Reads the authenticate frame and replies with the given status.
async fn handshake(ws: &mut ServerWs, status: &str) -> Option<Value> {
    let auth = recv_json(ws).await?;
    assert_eq!(auth["action"], "authenticate");
    send_json(ws, json!({ "type": "authenticated", "status": status })).await;
    Some(auth)
}

struct ServerState {
    accepted: AtomicUsize,
    /// Every subscribe/unsubscribe/pong frame any connection received.
    frames: Mutex<Vec<Value>>,
}

impl ServerState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            accepted: AtomicUsize::new(0),
            frames: Mutex::new(Vec::new()),
        })
    }

    async fn frames_snapshot(&self) -> Vec<Value> {
        self.frames.lock().await.clone()
    }

    /// Polls until a frame matching the predicate shows up.
    async fn wait_for_frame<F: Fn(&Value) -> bool>(&self, pred: F) -> Value {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(frame) = self.frames.lock().await.iter().find(|f| pred(f)) {
                    return frame.clone();
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("expected frame never arrived")
    }
}

fn hub_for(addr: SocketAddr, reconnect_delay_secs: u64) -> FeedHub {
    FeedHub::new(configuration::FeedSettings {
        ws_url: format!("ws://{addr}"),
        api_key: "test-key".to_string(),
        reconnect_delay_secs,
        command_queue_capacity: 64,
    })
    .unwrap()
}

fn channel_callback() -> (TickCallback, mpsc::UnboundedReceiver<Tick>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cb: TickCallback = Arc::new(move |tick: &Tick| {
        let _ = tx.send(tick.clone());
    });
    (cb, rx)
}

fn keys(raw: &[&str]) -> Vec<SymbolKey> {
    raw.iter().map(|k| k.parse().unwrap()).collect()
}

async fn next_tick(rx: &mut mpsc::UnboundedReceiver<Tick>) -> Tick {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for tick")
        .expect("tick channel closed")
}

#[tokio::test]
async fn subscribe_delivers_ticks_and_answers_keepalives() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = ServerState::new();

    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        server_state.accepted.fetch_add(1, Ordering::SeqCst);
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        handshake(&mut ws, "success").await.unwrap();
        let subscribe = recv_json(&mut ws).await.unwrap();
        assert_eq!(subscribe["action"], "subscribe");
        server_state.frames.lock().await.push(subscribe);

        // Keepalive must be answered before anything else works.
        send_json(&mut ws, json!({ "type": "ping" })).await;
        let pong = recv_json(&mut ws).await.unwrap();
        server_state.frames.lock().await.push(pong);

        send_json(
            &mut ws,
            json!({
                "type": "market_data",
                "symbol": "SBIN",
                "exchange": "NSE",
                "data": { "ltp": "512.5", "volume": "1000", "timestamp": 1_700_000_000_000i64 }
            }),
        )
        .await;

        // Hold the connection open until the client walks away.
        while recv_json(&mut ws).await.is_some() {}
    });

    let hub = hub_for(addr, 1);
    let (cb, mut ticks) = channel_callback();
    let sub = hub
        .subscribe(&keys(&["SBIN:NSE"]), StreamMode::Quote, cb)
        .unwrap();

    let tick = next_tick(&mut ticks).await;
    assert_eq!(tick.symbol, "SBIN");
    assert_eq!(tick.exchange, "NSE");
    assert_eq!(tick.last_price.to_string(), "512.5");

    let frames = state.frames_snapshot().await;
    assert_eq!(frames[0]["symbol"], "SBIN");
    assert_eq!(frames[0]["mode"], "quote");
    assert_eq!(frames[1], json!({ "type": "pong" }));

    sub.close();
}

#[tokio::test]
async fn symbols_are_unsubscribed_upstream_only_when_the_last_owner_leaves() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = ServerState::new();

    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        server_state.accepted.fetch_add(1, Ordering::SeqCst);
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        handshake(&mut ws, "success").await.unwrap();
        while let Some(frame) = recv_json(&mut ws).await {
            server_state.frames.lock().await.push(frame);
        }
    });

    let hub = hub_for(addr, 1);
    let (cb_a, _rx_a) = channel_callback();
    let (cb_b, _rx_b) = channel_callback();
    let a = hub
        .subscribe(&keys(&["SBIN:NSE", "TCS:NSE"]), StreamMode::Ltp, cb_a)
        .unwrap();
    let b = hub.subscribe(&keys(&["SBIN:NSE"]), StreamMode::Ltp, cb_b).unwrap();

    // Both symbols requested after authentication.
    state
        .wait_for_frame(|f| f["action"] == "subscribe" && f["symbol"] == "SBIN")
        .await;
    state
        .wait_for_frame(|f| f["action"] == "subscribe" && f["symbol"] == "TCS")
        .await;

    // Closing the first owner releases only its exclusive symbol.
    a.close();
    state
        .wait_for_frame(|f| f["action"] == "unsubscribe" && f["symbol"] == "TCS")
        .await;
    let frames = state.frames_snapshot().await;
    assert!(
        !frames
            .iter()
            .any(|f| f["action"] == "unsubscribe" && f["symbol"] == "SBIN"),
        "SBIN still has a live subscriber and must not be unsubscribed"
    );

    b.close();
    state
        .wait_for_frame(|f| f["action"] == "unsubscribe" && f["symbol"] == "SBIN")
        .await;
}

#[tokio::test]
async fn reconnects_once_after_unexpected_close_and_resubscribes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = ServerState::new();

    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let n = server_state.accepted.fetch_add(1, Ordering::SeqCst);
            let per_conn = Arc::clone(&server_state);
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                if handshake(&mut ws, "success").await.is_none() {
                    return;
                }
                if n == 0 {
                    // Drop the first session abruptly after auth.
                    let _ = ws.close(None).await;
                    return;
                }
                while let Some(frame) = recv_json(&mut ws).await {
                    per_conn.frames.lock().await.push(frame);
                }
            });
        }
    });

    let hub = hub_for(addr, 1);
    let (cb, _ticks) = channel_callback();
    let sub = hub.subscribe(&keys(&["SBIN:NSE"]), StreamMode::Ltp, cb).unwrap();

    // The second session re-requests the materialized interest set.
    state
        .wait_for_frame(|f| f["action"] == "subscribe" && f["symbol"] == "SBIN")
        .await;
    assert_eq!(state.accepted.load(Ordering::SeqCst), 2);

    // Once the last subscriber leaves there are no further attempts.
    sub.close();
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(state.accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn auth_failure_is_terminal_for_the_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = ServerState::new();

    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            server_state.accepted.fetch_add(1, Ordering::SeqCst);
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            handshake(&mut ws, "failed").await;
            while recv_json(&mut ws).await.is_some() {}
        }
    });

    let hub = hub_for(addr, 1);
    let mut status = hub.connection_state();
    let (cb, _ticks) = channel_callback();
    let _sub = hub.subscribe(&keys(&["SBIN:NSE"]), StreamMode::Ltp, cb).unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *status.borrow() == ConnectionState::Disconnected
                && state.accepted.load(Ordering::SeqCst) == 1
            {
                break;
            }
            status.changed().await.unwrap();
        }
    })
    .await
    .expect("session never settled into Disconnected");

    // A bad credential is not retried on a timer.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(state.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(*hub.connection_state().borrow(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn unparseable_frames_are_dropped_without_closing_the_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        handshake(&mut ws, "success").await.unwrap();
        // Garbage first, then a valid tick on the same connection.
        let _ = ws.send(Message::Text("{not json".to_string())).await;
        let _ = ws
            .send(Message::Text(json!({ "type": "mystery" }).to_string()))
            .await;
        send_json(
            &mut ws,
            json!({
                "type": "market_data",
                "symbol": "SBIN",
                "exchange": "NSE",
                "data": { "last_price": 99.5 }
            }),
        )
        .await;
        while recv_json(&mut ws).await.is_some() {}
    });

    let hub = hub_for(addr, 1);
    let (cb, mut ticks) = channel_callback();
    let _sub = hub.subscribe(&keys(&["SBIN:NSE"]), StreamMode::Ltp, cb).unwrap();

    let tick = next_tick(&mut ticks).await;
    assert_eq!(tick.last_price.to_string(), "99.5");
}

//! Integration tests for the update channel against an in-process
//! WebSocket server.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use casewire_core::{Category, ChannelConfig, ConnectionState, LogSink, UpdateChannel};

fn test_config(addr: SocketAddr) -> ChannelConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = ChannelConfig::new(format!("ws://{}", addr));
    config.user_id = Some("user-1".to_string());
    config.auth_token = Some("tok".to_string());
    config.reconnect_delay_secs = 0;
    config
}

/// Poll `condition` until it holds, panicking after five seconds.
async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Receive the next frame the server recorded, with a timeout.
async fn next_frame(frames_rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), frames_rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("server task ended early")
}

fn parse_subscribe(frame: &str, expected_type: &str) -> (String, String) {
    let value: serde_json::Value = serde_json::from_str(frame).expect("frame is JSON");
    assert_eq!(value["type"], expected_type, "frame: {}", frame);
    (
        value["data"]["subscription_type"]
            .as_str()
            .expect("subscription_type")
            .to_string(),
        value["data"]["resource_id"]
            .as_str()
            .expect("resource_id")
            .to_string(),
    )
}

#[tokio::test]
async fn subscriptions_are_replayed_after_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();

    // Accept two connections; on each, record two text frames then close,
    // which forces the client through a full reconnect cycle.
    tokio::spawn(async move {
        for _round in 0..2 {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = accept_async(stream).await else {
                return;
            };
            let mut seen = 0;
            while seen < 2 {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let _ = frames_tx.send(text.as_str().to_string());
                        seen += 1;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => return,
                }
            }
            let _ = ws.close(None).await;
            while let Some(Ok(_)) = ws.next().await {}
        }
    });

    let channel = UpdateChannel::new(test_config(addr), Arc::new(LogSink));
    channel.subscribe(Category::Workflow, Some("W1"));
    channel.subscribe(Category::Document, Some("D2"));
    channel.connect();

    let mut frames = Vec::new();
    for _ in 0..4 {
        frames.push(next_frame(&mut frames_rx).await);
    }
    channel.disconnect();

    let expected: HashSet<(String, String)> = [
        ("workflow".to_string(), "W1".to_string()),
        ("document".to_string(), "D2".to_string()),
    ]
    .into_iter()
    .collect();

    let first: HashSet<_> = frames[..2]
        .iter()
        .map(|f| parse_subscribe(f, "subscribe"))
        .collect();
    let second: HashSet<_> = frames[2..]
        .iter()
        .map(|f| parse_subscribe(f, "subscribe"))
        .collect();

    assert_eq!(first, expected, "initial connect replays the durable set");
    assert_eq!(second, expected, "reconnect replays exactly the same set");
}

#[tokio::test]
async fn malformed_frames_do_not_tear_down_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        // Garbage, unknown tag, then a valid update
        ws.send(Message::Text("definitely not json".into()))
            .await
            .unwrap();
        ws.send(Message::Text(r#"{"type":"mystery_update","data":{}}"#.into()))
            .await
            .unwrap();
        ws.send(Message::Text(
            r#"{"type":"workflow_update","data":{"resource_id":"wf-1","status":"running"}}"#.into(),
        ))
        .await
        .unwrap();
        // Keep the connection open until the client goes away
        while let Some(Ok(_)) = ws.next().await {}
    });

    let channel = UpdateChannel::new(test_config(addr), Arc::new(LogSink));
    channel.connect();

    let index = channel.index();
    wait_until("the valid update to land", || {
        index.get(Category::Workflow, "wf-1").is_some()
    })
    .await;

    // The bad frames cost only themselves
    assert_eq!(channel.state(), ConnectionState::Open);
    assert_eq!(index.len(Category::Workflow), 1);

    channel.disconnect();
}

#[tokio::test]
async fn retry_exhaustion_goes_dormant_until_explicit_connect() {
    // Bind to grab a free port, then drop so every attempt is refused
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = test_config(addr);
    config.max_reconnect_attempts = 2;
    let channel = UpdateChannel::new(config, Arc::new(LogSink));
    channel.connect();

    wait_until("the retry budget to be spent", || {
        channel.state() == ConnectionState::GivenUp
    })
    .await;
    assert!(!channel.is_running());

    // Only an explicit connect() re-arms the channel
    channel.connect();
    assert!(channel.is_running());
    channel.disconnect();
}

#[tokio::test]
async fn transport_errors_reach_the_diagnostic_callback() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = test_config(addr);
    config.max_reconnect_attempts = 0;
    let channel = UpdateChannel::new(config, Arc::new(LogSink));

    let reported = Arc::new(AtomicBool::new(false));
    let reported_clone = Arc::clone(&reported);
    channel.on_transport_error(Arc::new(move |_detail| {
        reported_clone.store(true, Ordering::SeqCst);
    }));

    channel.connect();
    wait_until("the callback to fire", || reported.load(Ordering::SeqCst)).await;
    wait_until("dormancy", || channel.state() == ConnectionState::GivenUp).await;
}

#[tokio::test]
async fn heartbeat_pings_flow_while_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let _ = frames_tx.send(text.as_str().to_string());
            }
        }
    });

    let mut config = test_config(addr);
    config.heartbeat_secs = 1;
    let channel = UpdateChannel::new(config, Arc::new(LogSink));
    channel.connect();

    let frame = next_frame(&mut frames_rx).await;
    assert_eq!(frame, r#"{"type":"ping"}"#);

    channel.disconnect();
}

#[tokio::test]
async fn subscribing_while_open_notifies_the_server_immediately() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let _ = frames_tx.send(text.as_str().to_string());
            }
        }
    });

    let channel = UpdateChannel::new(test_config(addr), Arc::new(LogSink));
    channel.connect();
    wait_until("the connection to open", || {
        channel.state() == ConnectionState::Open
    })
    .await;

    channel.subscribe(Category::Case, Some("c-77"));
    let frame = next_frame(&mut frames_rx).await;
    assert_eq!(
        parse_subscribe(&frame, "subscribe"),
        ("case".to_string(), "c-77".to_string())
    );

    channel.unsubscribe(Category::Case, Some("c-77"));
    let frame = next_frame(&mut frames_rx).await;
    assert_eq!(
        parse_subscribe(&frame, "unsubscribe"),
        ("case".to_string(), "c-77".to_string())
    );
    assert!(channel.subscriptions().is_empty());

    channel.disconnect();
}

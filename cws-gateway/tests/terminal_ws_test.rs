#![cfg(unix)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use cws_gateway::{create_app, protocol::ServerEvent, AppState};
use cws_terminal::{process::is_running, SessionConfig, SessionManager};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;
use tower_http::cors::CorsLayer;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn sessions(shell: &str) -> SessionManager {
    SessionManager::new(SessionConfig {
        shell: shell.to_string(),
        ..Default::default()
    })
}

async fn start_server(sessions: SessionManager) -> String {
    let app = create_app(AppState::new(sessions), CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/terminal")
}

async fn connect(url: &str) -> Client {
    let (stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("failed to connect to terminal websocket");
    stream
}

async fn send(client: &mut Client, frame: Value) {
    client
        .send(Message::Text(frame.to_string().into()))
        .await
        .expect("failed to send frame");
}

/// Next server event, skipping control frames.
async fn next_event(client: &mut Client) -> Option<ServerEvent> {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), client.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).expect("server sent bad JSON"))
            }
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

async fn output_containing(client: &mut Client, id: &str, needle: &str) -> String {
    let mut seen = String::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !seen.contains(needle) && Instant::now() < deadline {
        match next_event(client).await {
            Some(ServerEvent::Output { id: from, data }) if from == id => seen.push_str(&data),
            Some(_) => {}
            None => break,
        }
    }
    seen
}

async fn wait_for_exit(pid: u32) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if !is_running(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_echo_and_close_cleans_up() {
    let manager = sessions("/bin/sh");
    let url = start_server(manager.clone()).await;
    let mut client = connect(&url).await;

    send(
        &mut client,
        json!({"event": "terminal-connect", "data": {"terminalId": "t1"}}),
    )
    .await;
    assert_eq!(
        next_event(&mut client).await,
        Some(ServerEvent::TerminalReady { id: "t1".into() })
    );
    let pid = manager.process_id("t1").await.expect("shell should be running");

    send(
        &mut client,
        json!({"event": "resize", "data": {"terminalId": "t1", "cols": 120, "rows": 40}}),
    )
    .await;
    send(
        &mut client,
        json!({"event": "input", "data": {"terminalId": "t1", "data": "echo hi\n"}}),
    )
    .await;
    assert!(output_containing(&mut client, "t1", "hi").await.contains("hi"));

    client.close(None).await.unwrap();
    assert!(wait_for_exit(pid).await, "shell survived the connection");
    assert_eq!(manager.process_id("t1").await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnecting_connection_takes_over_the_session() {
    let manager = sessions("/bin/sh");
    let url = start_server(manager.clone()).await;
    let connect_t1 = json!({"event": "terminal-connect", "data": {"terminalId": "t1"}});

    let mut first = connect(&url).await;
    send(&mut first, connect_t1.clone()).await;
    assert_eq!(
        next_event(&mut first).await,
        Some(ServerEvent::TerminalReady { id: "t1".into() })
    );
    let pid = manager.process_id("t1").await.unwrap();

    let mut second = connect(&url).await;
    send(&mut second, connect_t1).await;
    assert_eq!(
        next_event(&mut second).await,
        Some(ServerEvent::TerminalReady { id: "t1".into() })
    );

    // The first connection no longer owns t1, so closing it leaves the shell alone.
    first.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(manager.process_id("t1").await, Some(pid));

    send(
        &mut second,
        json!({"event": "terminal-disconnect", "data": {"terminalId": "t1"}}),
    )
    .await;
    assert!(wait_for_exit(pid).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_frames_get_error_events() {
    let url = start_server(sessions("/bin/sh")).await;
    let mut client = connect(&url).await;

    for frame in [
        json!({"event": "bogus", "data": {}}),
        json!({"event": "terminal-connect", "data": {"terminalId": ""}}),
        json!({"event": "resize", "data": {"terminalId": "t1", "cols": 0, "rows": 24}}),
    ] {
        send(&mut client, frame).await;
        match next_event(&mut client).await {
            Some(ServerEvent::Error { id: None, message }) => assert!(!message.is_empty()),
            other => panic!("expected error event, got {other:?}"),
        }
    }

    // Input for a terminal nobody opened is silently ignored.
    send(
        &mut client,
        json!({"event": "input", "data": {"terminalId": "ghost", "data": "ls\n"}}),
    )
    .await;
    send(&mut client, json!({"event": "bogus", "data": {}})).await;
    assert!(matches!(
        next_event(&mut client).await,
        Some(ServerEvent::Error { id: None, .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn spawn_failure_reports_error_without_ready() {
    let manager = sessions("/nonexistent/shell");
    let url = start_server(manager.clone()).await;
    let mut client = connect(&url).await;

    send(
        &mut client,
        json!({"event": "terminal-connect", "data": {"terminalId": "t1"}}),
    )
    .await;

    assert_eq!(
        next_event(&mut client).await,
        Some(ServerEvent::Error {
            id: Some("t1".into()),
            message: "failed to start terminal".into(),
        })
    );
    assert_eq!(manager.session_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn shell_exit_is_announced() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(SessionConfig {
        shell: "/bin/sh".to_string(),
        cwd: Some(dir.path().to_path_buf()),
        ..Default::default()
    });
    let url = start_server(manager.clone()).await;
    let mut client = connect(&url).await;

    send(
        &mut client,
        json!({"event": "terminal-connect", "data": {"terminalId": "t1"}}),
    )
    .await;
    send(
        &mut client,
        json!({"event": "input", "data": {"terminalId": "t1", "data": "exit\n"}}),
    )
    .await;

    let mut exited = false;
    while let Some(event) = next_event(&mut client).await {
        if event == (ServerEvent::TerminalExit { id: "t1".into() }) {
            exited = true;
            break;
        }
    }
    assert!(exited, "no terminal-exit event");
    assert_eq!(manager.process_id("t1").await, None);
}

#[tokio::test]
async fn health_reports_session_count() {
    let app = create_app(AppState::new(sessions("/bin/sh")), CorsLayer::permissive());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["sessions"], 0);
}

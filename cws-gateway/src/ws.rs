//! `GET /terminal`: one WebSocket connection multiplexing many sessions.

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use cws_terminal::{ConnectionId, SessionEvent};
use futures_util::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::protocol::{self, ClientEvent, ServerEvent};
use crate::state::AppState;

/// Ping period, so half-open TCP connections are noticed.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Close the connection after this long without any client frame (pongs count).
const IDLE_TIMEOUT: Duration = Duration::from_secs(75);

const EVENT_QUEUE: usize = 1024;

pub async fn terminal_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Everything sent to this client goes through here.
#[derive(Clone)]
struct Outbox {
    notices: flume::Sender<ServerEvent>,
}

impl Outbox {
    async fn error(&self, id: Option<&str>, message: impl Into<String>) {
        let _ = self
            .notices
            .send_async(ServerEvent::error(id, message))
            .await;
    }
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let connection = ConnectionId::new();
    info!(%connection, "terminal connection opened");

    let (sender, mut receiver) = socket.split();
    let (events_tx, events_rx) = flume::bounded::<SessionEvent>(EVENT_QUEUE);
    let (notices_tx, notices_rx) = flume::bounded::<ServerEvent>(EVENT_QUEUE);
    let outbox = Outbox {
        notices: notices_tx,
    };

    let writer = tokio::spawn(write_loop(sender, events_rx, notices_rx, connection));

    loop {
        let frame = match tokio::time::timeout(IDLE_TIMEOUT, receiver.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!(%connection, error = %e, "websocket receive failed");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(%connection, "client went silent, closing connection");
                break;
            }
        };

        match frame {
            Message::Text(text) => {
                dispatch(&state, connection, &events_tx, &outbox, text.as_str()).await;
            }
            Message::Binary(_) => {
                outbox.error(None, "binary frames are not supported").await;
            }
            Message::Close(_) => break,
            // Pings are answered by axum; both only refresh the idle timer.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    writer.abort();
    state.sessions.detach_all(connection).await;
    info!(%connection, "terminal connection closed");
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    events: flume::Receiver<SessionEvent>,
    notices: flume::Receiver<ServerEvent>,
    connection: ConnectionId,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        let event = tokio::select! {
            Ok(event) = events.recv_async() => ServerEvent::from(event),
            Ok(event) = notices.recv_async() => event,
            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                error!(%connection, error = %e, "failed to encode server event");
                continue;
            }
        };
        if sender.send(Message::Text(text.into())).await.is_err() {
            debug!(%connection, "websocket send failed, stopping writer");
            break;
        }
    }
}

async fn dispatch(
    state: &AppState,
    connection: ConnectionId,
    events: &flume::Sender<SessionEvent>,
    outbox: &Outbox,
    text: &str,
) {
    let event = match protocol::parse(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(%connection, error = %e, "rejected client frame");
            outbox.error(None, e.to_string()).await;
            return;
        }
    };

    let sessions = &state.sessions;
    match event {
        ClientEvent::TerminalConnect { terminal_id } => {
            match sessions
                .attach(&terminal_id, connection, events.clone())
                .await
            {
                Ok(outcome) => {
                    debug!(%connection, terminal = %terminal_id, ?outcome, "terminal attached")
                }
                Err(e) => {
                    error!(%connection, terminal = %terminal_id, error = %e, "terminal attach failed");
                    outbox
                        .error(Some(&terminal_id), "failed to start terminal")
                        .await;
                }
            }
        }
        ClientEvent::Input { terminal_id, data } => {
            if let Err(e) = sessions.write(&terminal_id, data.into_bytes()).await {
                warn!(terminal = %terminal_id, error = %e, "terminal input failed");
                outbox.error(Some(&terminal_id), "terminal is not accepting input").await;
            }
        }
        ClientEvent::Resize {
            terminal_id,
            cols,
            rows,
        } => {
            if let Err(e) = sessions.resize(&terminal_id, cols, rows).await {
                warn!(terminal = %terminal_id, error = %e, "terminal resize failed");
                outbox.error(Some(&terminal_id), "terminal resize failed").await;
            }
        }
        ClientEvent::TerminalDisconnect { terminal_id } => {
            sessions.detach(&terminal_id).await;
        }
    }
}

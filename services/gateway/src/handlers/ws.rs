//! Live leaderboard WebSocket endpoint.
//!
//! One task per connection owns both directions: inbound control
//! frames are mapped onto registry calls, and the connection's bounded
//! outbound queue is pumped into the socket. The registry and
//! broadcaster never touch the socket; everything they deliver goes
//! through the queue, which keeps fan-out non-blocking and per-
//! connection FIFO.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use leaderboard::events::{parse_client_message, ClientMessage, OutboundFrame};
use types::ids::{CategoryId, ConnectionId, MemberId};
use types::scope::{Scope, GLOBAL_CHANNEL};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// `GET /api/v1/leaderboard/ws/live?token=…`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Result<Response, AppError> {
    // Token resolution is the account service's job; unresolved tokens
    // never reach the ranking core.
    let member = state
        .token_resolver
        .resolve(&params.token)
        .ok_or_else(|| AppError::Unauthorized("invalid or expired token".to_string()))?;

    state.rate_limiter.check_ws_connection(member)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, member)))
}

async fn handle_socket(socket: WebSocket, state: AppState, member: MemberId) {
    let connection_id = ConnectionId::new();
    let (tx, mut rx) = mpsc::channel(state.config.outbound_queue_capacity);
    state
        .registry
        .connect(connection_id, member, tx, Some(GLOBAL_CHANNEL));
    debug!(%connection_id, %member, "websocket connected");

    let (mut sink, mut stream) = socket.split();

    // Initial global window, mirroring what subscribers see live.
    let initial = initial_window(&state, Scope::Global).await;
    if send_frame(&mut sink, &initial).await.is_err() {
        state.registry.disconnect(connection_id);
        return;
    }

    loop {
        tokio::select! {
            queued = rx.recv() => {
                match queued {
                    // Closed queue means the registry dropped us
                    // (disconnect or lagging policy).
                    None => break,
                    Some(payload) => {
                        if sink.send(Message::Text(payload.to_string())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) =
                            handle_client_message(&state, connection_id, &text).await
                        {
                            if send_frame(&mut sink, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary: ignored
                    Some(Err(err)) => {
                        warn!(%connection_id, %err, "websocket transport error");
                        break;
                    }
                }
            }
        }
    }

    state.registry.disconnect(connection_id);
    debug!(%connection_id, %member, "websocket disconnected");
}

/// Map one inbound control frame onto registry calls; the returned
/// frame, if any, is sent straight back on this connection.
async fn handle_client_message(
    state: &AppState,
    connection_id: ConnectionId,
    text: &str,
) -> Option<OutboundFrame> {
    let Some(message) = parse_client_message(text) else {
        return Some(OutboundFrame::Error {
            message: "Invalid message format".to_string(),
        });
    };

    match message {
        ClientMessage::LeaderboardSubscribe => {
            if let Err(err) = state.registry.subscribe(connection_id, GLOBAL_CHANNEL) {
                return Some(error_frame(err.to_string()));
            }
            Some(initial_window(state, Scope::Global).await)
        }
        ClientMessage::SubscribeCategory { category } => {
            let Some(category) = CategoryId::try_new(category) else {
                return Some(error_frame("invalid category name"));
            };
            let scope = Scope::Category(category.clone());
            if !state.ranking.has_scope(&scope) {
                return Some(error_frame(format!("unknown category: {}", category)));
            }
            if let Err(err) = state
                .registry
                .subscribe(connection_id, &scope.channel_name())
            {
                return Some(error_frame(err.to_string()));
            }
            Some(category_window(state, category).await)
        }
        ClientMessage::UnsubscribeCategory { category } => {
            let Some(category) = CategoryId::try_new(category) else {
                return Some(error_frame("invalid category name"));
            };
            let channel = Scope::Category(category).channel_name();
            if let Err(err) = state.registry.unsubscribe(connection_id, &channel) {
                return Some(error_frame(err.to_string()));
            }
            None
        }
    }
}

async fn initial_window(state: &AppState, scope: Scope) -> OutboundFrame {
    match state
        .reader
        .top_n(scope, 0, state.config.initial_window)
        .await
    {
        Ok(view) => OutboundFrame::InitialData {
            data: view.as_ref().clone(),
        },
        Err(err) => error_frame(format!("leaderboard temporarily unavailable: {}", err)),
    }
}

async fn category_window(state: &AppState, category: CategoryId) -> OutboundFrame {
    match state
        .reader
        .top_n(
            Scope::Category(category.clone()),
            0,
            state.config.initial_window,
        )
        .await
    {
        Ok(view) => OutboundFrame::CategoryData {
            category,
            data: view.as_ref().clone(),
        },
        Err(err) => error_frame(format!("leaderboard temporarily unavailable: {}", err)),
    }
}

fn error_frame(message: impl Into<String>) -> OutboundFrame {
    OutboundFrame::Error {
        message: message.into(),
    }
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &OutboundFrame,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).unwrap_or_else(|_| {
        r#"{"type":"error","message":"serialization failure"}"#.to_string()
    });
    sink.send(Message::Text(json)).await
}

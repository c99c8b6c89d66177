//! # Review API
//!
//! Run submission endpoints: a non-streaming POST and the WebSocket that
//! streams run deltas as they happen.
//!
//! WebSocket protocol, per client message:
//! - `{"type": "token", "content": "...", "sender": "<node>", "event": n}`
//! - `{"type": "complete", "message": "...", "events": n}`
//! - `{"type": "error", "error": "...", "details": "..."}`

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use futures::StreamExt;
use serde_json::json;

use conductor_core::engine::RunEvent;

use crate::SharedState;

pub fn review_routes() -> Router<SharedState> {
    Router::new()
        .route("/review", post(create_review))
        .route("/ws", get(ws_upgrade))
}

#[derive(Debug, Deserialize)]
struct ReviewRequest {
    message: String,
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReviewResponse {
    status: String,
    session_id: Option<String>,
    iterations: u32,
    tool_calls: usize,
    reflection: String,
}

/// Submit a run and wait for completion.
///
/// For real-time streaming use the WebSocket endpoint instead.
async fn create_review(
    State(state): State<SharedState>,
    Json(req): Json<ReviewRequest>,
) -> impl IntoResponse {
    tracing::info!(
        "review request: {}...",
        req.message.chars().take(100).collect::<String>()
    );

    let mut events = state.engine.run(&req.message, req.session_id);

    while let Some(event) = events.next().await {
        match event {
            RunEvent::Completed(summary) => {
                return Json(ReviewResponse {
                    status: "complete".to_string(),
                    session_id: summary.session_id,
                    iterations: summary.iterations,
                    tool_calls: summary.tool_calls,
                    reflection: summary.reflection,
                })
                .into_response();
            }
            RunEvent::Failed { error } => {
                tracing::error!("review failed: {error}");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": error})),
                )
                    .into_response();
            }
            RunEvent::Node(_) => {}
        }
    }

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "run ended without a completion marker"})),
    )
        .into_response()
}

/// WebSocket endpoint for streaming runs
async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_session(socket, state))
}

async fn ws_session(mut socket: WebSocket, state: SharedState) {
    tracing::info!("websocket connected");

    while let Some(incoming) = socket.recv().await {
        let text = match incoming {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        tracing::info!(
            "ws received: {}...",
            text.chars().take(100).collect::<String>()
        );

        let mut events = state.engine.run(text, None);
        let mut event_count = 0u32;

        while let Some(event) = events.next().await {
            let frames = match event {
                RunEvent::Node(delta) => {
                    event_count += 1;
                    delta
                        .messages
                        .iter()
                        .map(|msg| {
                            json!({
                                "type": "token",
                                "content": msg.content,
                                "sender": delta.node,
                                "event": event_count,
                            })
                        })
                        .collect::<Vec<_>>()
                }
                RunEvent::Completed(summary) => {
                    vec![json!({
                        "type": "complete",
                        "message": "Processing complete",
                        "events": event_count,
                        "iterations": summary.iterations,
                    })]
                }
                RunEvent::Failed { error } => {
                    vec![json!({
                        "type": "error",
                        "error": "Processing failed",
                        "details": error,
                    })]
                }
            };

            for frame in frames {
                let payload = frame.to_string();
                if socket.send(Message::Text(payload)).await.is_err() {
                    tracing::info!("websocket closed mid-run");
                    return;
                }
            }
        }

        tracing::info!("ws run completed: {event_count} node events");
    }

    tracing::info!("websocket disconnected");
}

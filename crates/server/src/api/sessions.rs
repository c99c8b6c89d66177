//! # Session API
//!
//! Listing, metadata, full history, and deletion for persisted sessions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::SharedState;

pub fn session_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_sessions))
        .route("/:id", get(get_session).delete(delete_session))
        .route("/:id/history", get(get_session_history))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

async fn list_sessions(
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(50);

    match state.store.list(limit).await {
        Ok(sessions) => {
            let count = sessions.len();
            Json(json!({"sessions": sessions, "count": count})).into_response()
        }
        Err(e) => {
            tracing::error!("error listing sessions: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

/// Session metadata, without the message bodies
async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.load(&id).await {
        Ok(Some(conversation)) => Json(json!({
            "session_id": conversation.session_id,
            "created_at": conversation.created_at,
            "updated_at": conversation.updated_at,
            "message_count": conversation.message_count,
            "metadata": conversation.metadata,
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Session not found"})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("error getting session {id}: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

/// Full conversation history
async fn get_session_history(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.load(&id).await {
        Ok(Some(conversation)) => Json(conversation).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Session not found"})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("error getting history for {id}: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

async fn delete_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete(&id).await {
        Ok(true) => Json(json!({"status": "deleted", "session_id": id})).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Session not found"})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("error deleting session {id}: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

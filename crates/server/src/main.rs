//! Conductor Server
//!
//! Axum boundary for the orchestration engine: run submission (HTTP and
//! WebSocket), session management, health, and breaker status. The process
//! owns one explicitly-constructed application context (engine, store,
//! breaker registry, rate limiter) whose lifetime matches the server's.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use clap::Parser;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use conductor_core::config::Settings;
use conductor_core::engine::{Engine, EngineConfig};
use conductor_core::limiter::{RateLimiter, RateLimiterConfig};
use conductor_core::model::GeminiModel;
use conductor_core::resilience::BreakerRegistry;
use conductor_core::session::SessionStore;
use conductor_core::tools::ToolGateway;

mod api;

/// Paths exempt from rate limiting
const RATE_LIMIT_EXCLUDED: &[&str] = &["/health", "/"];

/// Application context, built once at startup
pub struct AppState {
    pub engine: Arc<Engine>,
    pub store: Arc<SessionStore>,
    pub breakers: Arc<BreakerRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub settings: Settings,
}

pub type SharedState = Arc<AppState>;

#[derive(Parser, Debug)]
#[command(name = "conductor", about = "Agentic code review orchestration server")]
struct Args {
    /// Bind host (overrides APP_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides APP_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Session database path (overrides DB_PATH)
    #[arg(long)]
    db: Option<String>,
}

// === Handlers ===

/// Service card
async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "Conductor",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Agentic code review orchestration service",
        "endpoints": {
            "websocket": "/api/v1/ws",
            "review": "/api/v1/review",
            "sessions": "/api/v1/sessions",
            "breakers": "/api/v1/breakers",
            "health": "/health",
        },
        "agents": ["supervisor", "planner", "researcher", "coder", "reviewer"],
    }))
}

/// Component health: session store, model configuration, breaker states
async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let store_ok = state.store.ping().await;
    let model_configured = !state.settings.google_api_key.trim().is_empty();
    let breakers = state.breakers.statuses().await;

    let healthy = store_ok && model_configured;
    let status = if healthy { "healthy" } else { "degraded" };
    let code = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "service": "conductor",
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "session_store": store_ok,
                "model_configured": model_configured,
                "circuit_breakers": breakers,
            },
        })),
    )
}

/// Circuit-breaker status snapshot
async fn breakers(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(json!({"breakers": state.breakers.statuses().await}))
}

// === Rate limiting middleware ===

/// Client identity: first X-Forwarded-For entry, else the peer address
fn client_id(headers: &HeaderMap, addr: &SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

async fn rate_limit(
    State(state): State<SharedState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if RATE_LIMIT_EXCLUDED.contains(&path) {
        return next.run(request).await;
    }

    let client = client_id(request.headers(), &addr);
    let admission = state.limiter.check(&client).await;

    if !admission.allowed {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "Rate limit exceeded. Please try again later."})),
        )
            .into_response();
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("retry-after", HeaderValue::from_static("60"));
        return response;
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if let Ok(remaining) = HeaderValue::from_str(&admission.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", remaining);
    }
    if let Ok(limit) = HeaderValue::from_str(&state.limiter.requests_per_minute().to_string()) {
        headers.insert("x-ratelimit-limit", limit);
    }
    response
}

// === Startup ===

fn build_state(settings: Settings) -> anyhow::Result<SharedState> {
    let store = Arc::new(SessionStore::open_at(
        &settings.db_path,
        settings.session_ttl_days,
    )?);

    let breakers = Arc::new(BreakerRegistry::default());

    let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
        requests_per_minute: settings.requests_per_minute,
        burst_size: settings.burst_size,
        ..RateLimiterConfig::default()
    }));

    let model = Arc::new(GeminiModel::new(
        settings.google_api_key.clone(),
        settings.gemini_model.clone(),
        settings.gemini_temperature,
    ));

    let engine_config = EngineConfig {
        max_iterations: settings.max_iterations,
        model_breaker: conductor_core::resilience::CircuitConfig {
            call_timeout: std::time::Duration::from_secs(settings.model_timeout_secs),
            ..Default::default()
        },
        ..EngineConfig::default()
    };

    let engine = Arc::new(
        Engine::new(
            model,
            ToolGateway::new(settings.tool_policy()),
            breakers.clone(),
            engine_config,
        )
        .with_store(store.clone()),
    );

    Ok(Arc::new(AppState {
        engine,
        store,
        breakers,
        limiter,
        settings,
    }))
}

async fn run_server() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::from_env()?;
    if let Some(host) = args.host {
        settings.app_host = host;
    }
    if let Some(port) = args.port {
        settings.app_port = port;
    }
    if let Some(db) = args.db {
        settings.db_path = db;
    }

    tracing::info!("environment loaded: model={}", settings.gemini_model);

    let state = build_state(settings.clone())?;

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/v1/breakers", get(breakers))
        .nest("/api/v1", api::review::review_routes())
        .nest("/api/v1/sessions", api::sessions::session_routes())
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", settings.app_host, settings.app_port).parse()?;
    tracing::info!("Conductor server running at http://{addr}");
    tracing::info!("  Review:   POST /api/v1/review, WS /api/v1/ws");
    tracing::info!("  Sessions: /api/v1/sessions");
    tracing::info!("  Health:   /health");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    run_server().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        assert_eq!(client_id(&headers, &addr), "203.0.113.9");
    }

    #[test]
    fn test_client_id_falls_back_to_peer() {
        let headers = HeaderMap::new();
        let addr: SocketAddr = "192.0.2.7:5123".parse().unwrap();

        assert_eq!(client_id(&headers, &addr), "192.0.2.7");
    }
}

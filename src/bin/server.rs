use std::convert::Infallible;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Json, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::Stream;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plz_sync::{
    FormConfig, FormEvent, FormHandle, FormSession, FormState, LocalityLookup, OpenPlzClient,
    OpenPlzConfig, StaticLookup,
};

/// Server configuration
struct ServerConfig {
    port: u16,
    /// Serve the built-in sample localities instead of calling openplzapi.org
    offline: bool,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            offline: env::var("PLZ_OFFLINE").is_ok_and(|v| v == "1" || v == "true"),
        }
    }
}

/// Application state shared across all requests
#[derive(Clone)]
struct AppState {
    form: FormHandle,
    metrics: Arc<Metrics>,
}

/// Server metrics
struct Metrics {
    events_received: AtomicU64,
    start_time: Instant,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server=info,plz_sync=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Read configuration from environment
    let config = ServerConfig::from_env();

    let lookup: Arc<dyn LocalityLookup> = if config.offline {
        tracing::info!("Using built-in sample localities");
        Arc::new(StaticLookup::sample())
    } else {
        let lookup_config = OpenPlzConfig::from_env();
        tracing::info!("Using lookup service at {}", lookup_config.base_url);
        Arc::new(OpenPlzClient::with_config(lookup_config).context("Failed to build lookup client")?)
    };

    // One form shared by every client
    let session = FormSession::spawn(lookup, FormConfig::from_env());
    let app = build_app(session.handle());

    // Bind server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    session.close().await?;
    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Build the Axum application with routes and middleware
fn build_app(form: FormHandle) -> Router {
    let metrics = Arc::new(Metrics {
        events_received: AtomicU64::new(0),
        start_time: Instant::now(),
    });

    let state = AppState { form, metrics };

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Form routes
        .route("/api/form", get(get_form))
        .route("/api/form/events", post(post_event))
        .route("/api/form/stream", get(stream_form))
        .route("/api/metrics", get(get_metrics))
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Current form snapshot
async fn get_form(State(state): State<AppState>) -> Json<FormState> {
    Json(state.form.snapshot())
}

/// Forward a renderer event and answer with the form right after it
async fn post_event(
    State(state): State<AppState>,
    Json(event): Json<FormEvent>,
) -> Result<Json<FormState>, ApiError> {
    state.metrics.events_received.fetch_add(1, Ordering::Relaxed);
    tracing::info!("Form event: {:?}", event);

    let snapshot = state.form.dispatch(event).await.map_err(|e| {
        tracing::error!("Dispatch error: {}", e);
        ApiError::Unavailable(e.to_string())
    })?;

    Ok(Json(snapshot))
}

/// Server-sent events: the current form, then one snapshot per change
async fn stream_form(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let updates = state.form.subscribe();
    let stream = futures::stream::unfold((updates, true), |(mut updates, first)| async move {
        if !first && updates.changed().await.is_err() {
            return None;
        }
        let snapshot = updates.borrow_and_update().clone();
        let event = Event::default()
            .event("form")
            .json_data(&snapshot)
            .unwrap_or_else(|e| Event::default().comment(e.to_string()));
        Some((Ok(event), (updates, false)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Get server metrics
async fn get_metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        events_received: state.metrics.events_received.load(Ordering::Relaxed),
        uptime_seconds: state.metrics.start_time.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
struct MetricsResponse {
    events_received: u64,
    uptime_seconds: u64,
}

/// API error types
enum ApiError {
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(serde_json::json!({
            "success": false,
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

use axum::routing::{delete, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::handlers::{create_session, delete_session, refresh_session};
use crate::state::AppState;

/// Per-request method/path/status/latency logging at `info` (§10.2).
fn trace_layer() -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO).latency_unit(tower_http::LatencyUnit::Millis))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/license-sessions", post(create_session))
        .route("/license-sessions/:csid", patch(refresh_session))
        .route("/license-sessions/:csid", delete(delete_session))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(trace_layer())
        .with_state(state)
}

use crate::api::handlers::{events, health, readings};
use crate::api::AppState;
use axum::{
    extract::Request,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::Level;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/v1/readings", post(readings::ingest))
        .route("/api/v1/readings/latest", get(readings::get_latest))
        .route("/api/v1/tiers/{tier}", get(readings::get_tier))
        .route("/api/v1/live", get(readings::get_live))
        .route("/api/v1/events", get(events::stream_events))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    tracing::span!(
                        Level::INFO,
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_request(|_request: &Request, _span: &tracing::Span| {
                    tracing::event!(Level::DEBUG, "received request");
                })
                .on_response(|_response: &axum::response::Response, latency: std::time::Duration, _span: &tracing::Span| {
                    tracing::event!(Level::DEBUG, latency = ?latency, "request completed");
                })
                .on_failure(|_error: tower_http::classify::ServerErrorsFailureClass, _latency: std::time::Duration, _span: &tracing::Span| {
                    tracing::event!(Level::ERROR, "request failed");
                }),
        )
}

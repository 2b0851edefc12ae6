// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Route table and middleware.

use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use printflow_core::AgentConfig;

use crate::handlers;
use crate::state::ApiState;

/// Build the router.
///
/// CORS origins and the body limit are read from `config` once; both apply
/// from the next start when changed.
pub fn build_router(state: ApiState, config: &AgentConfig) -> Router {
    Router::new()
        .merge(printer_routes())
        .merge(job_routes())
        .merge(health_routes())
        .merge(legacy_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer(&config.cors_origins))
                .layer(DefaultBodyLimit::max(config.max_payload_bytes)),
        )
        .with_state(state)
}

fn printer_routes() -> Router<ApiState> {
    Router::new()
        .route("/printers", get(handlers::list_printers))
        .route("/printers/refresh", post(handlers::refresh_printers))
}

fn job_routes() -> Router<ApiState> {
    Router::new()
        .route("/jobs", post(handlers::submit_job).get(handlers::list_jobs))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/cancel", post(handlers::cancel_job))
}

fn health_routes() -> Router<ApiState> {
    Router::new().route("/health", get(handlers::health))
}

/// Shapes used by business applications written against earlier agents.
fn legacy_routes() -> Router<ApiState> {
    Router::new()
        .route("/status", get(handlers::legacy_status))
        .route("/print_raw", post(handlers::print_raw))
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600))
}

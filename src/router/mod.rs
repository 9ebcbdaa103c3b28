//! HTTP front end (§10.1 of the design).
//!
//! A single operation, `POST /compile`, maps directly onto
//! `execution::process_submission`; `GET /healthz` exposes pool counters for
//! liveness checks. Grounded on the teacher's `router/mod.rs` for the
//! `AppState` + `build_router` shape, narrowed to the two routes this
//! service needs.

mod handlers;

pub use handlers::CompileRequest;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ContainerConfiguration;
use crate::execution::{ScratchProvider, WorkerPool};

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<WorkerPool>,
    pub scratch: Arc<ScratchProvider>,
    pub container: Arc<ContainerConfiguration>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/compile", post(handlers::compile))
        .route("/healthz", get(handlers::healthz))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

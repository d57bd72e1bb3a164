use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    response::{IntoResponse, Response},
    routing, Router,
};
use tower::limit::ConcurrencyLimitLayer;

use super::slot;
use crate::app_context::AppContext;

pub fn app(context: Arc<AppContext>) -> Router {
    let max_body_size = context.max_body_size;
    let concurrency_limit = context.concurrency_limit;

    Router::new()
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(liveness))
        .route("/api/slot", routing::get(slot::allocate_slot))
        .route(
            "/api/slot/upsert",
            routing::post(slot::upsert_lease)
                .layer::<_, Infallible>(ConcurrencyLimitLayer::new(concurrency_limit))
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/api/stride", routing::get(slot::list_leases))
        .route("/api/stride/:job_id", routing::get(slot::get_lease))
        .with_state(context)
}

pub async fn index() -> &'static str {
    "slot-api"
}

async fn liveness(State(context): State<Arc<AppContext>>) -> Response {
    context.health.get_status().into_response()
}

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use slot_common::wire::{AllocateQuery, UpsertLeaseRequest};
use slot_common::{LeaseUpserted, SlotAssignment, SlotError, SlotLease};

use crate::app_context::AppContext;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn allocate_slot(
    State(context): State<Arc<AppContext>>,
    query: Result<Query<AllocateQuery>, QueryRejection>,
) -> Result<Json<SlotAssignment>, ApiError> {
    let Query(query) = query.map_err(|rejection| bad_request(&rejection.body_text()))?;
    let request = query
        .into_request(context.default_total_slots)
        .map_err(slot_error)?;

    let assignment = context
        .coordinator
        .allocate(request)
        .await
        .map_err(slot_error)?;

    Ok(Json(assignment))
}

pub async fn upsert_lease(
    State(context): State<Arc<AppContext>>,
    payload: Result<Json<UpsertLeaseRequest>, JsonRejection>,
) -> Result<Json<LeaseUpserted>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| bad_request(&rejection.body_text()))?;
    debug!("received lease update: {:?}", payload);

    let (slot_id, patch) = payload.into_parts().map_err(slot_error)?;
    let upserted = context
        .coordinator
        .upsert(slot_id, patch)
        .await
        .map_err(slot_error)?;

    Ok(Json(upserted))
}

pub async fn list_leases(
    State(context): State<Arc<AppContext>>,
) -> Result<Json<Vec<SlotLease>>, ApiError> {
    let leases = context.coordinator.list().await.map_err(slot_error)?;

    Ok(Json(leases))
}

pub async fn get_lease(
    State(context): State<Arc<AppContext>>,
    job_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<SlotLease>, ApiError> {
    let Path(job_id) = job_id.map_err(|rejection| bad_request(&rejection.body_text()))?;

    match context.coordinator.get(job_id).await.map_err(slot_error)? {
        Some(lease) => Ok(Json(lease)),
        None => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("no lease for job_id {job_id}"),
        )),
    }
}

fn error_response(status: StatusCode, error: String) -> ApiError {
    (status, Json(ErrorResponse { ok: false, error }))
}

fn bad_request(msg: &str) -> ApiError {
    debug!("rejected request: {}", msg);
    error_response(StatusCode::BAD_REQUEST, msg.to_owned())
}

fn slot_error(err: SlotError) -> ApiError {
    match err {
        SlotError::Validation(msg) => bad_request(&msg),
        SlotError::StoreUnavailable(_) => {
            error!("{}", err);
            error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        SlotError::EmptyLeaseTable => error_response(StatusCode::CONFLICT, err.to_string()),
    }
}

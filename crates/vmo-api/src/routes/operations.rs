use axum::Json;
use axum::extract::{Path, State};

use vmo_infra::{OperationId, OperationRecord};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn list_operations(State(state): State<AppState>) -> Json<Vec<OperationRecord>> {
    Json(state.orchestrator.leases().snapshot())
}

pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OperationRecord>, ApiError> {
    let id: OperationId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid operation id: {id}")))?;
    state
        .orchestrator
        .leases()
        .status(id)
        .map(Json)
        .ok_or(ApiError::NotFound)
}

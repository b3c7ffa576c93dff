use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;

use vmo_infra::types::{Instance, InstanceId};

use crate::dto::{
    AlterInstanceRequest, LaunchInstanceRequest, OperationAccepted, StopQuery, parse_product,
};
use crate::error::ApiError;
use crate::state::AppState;

pub async fn launch_instance(
    State(state): State<AppState>,
    Json(body): Json<LaunchInstanceRequest>,
) -> Result<(StatusCode, Json<Instance>), ApiError> {
    let request = body.into_launch()?;
    let instance = state.orchestrator.launch(request).await?;
    let status = if instance.operation.is_some() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(instance)))
}

pub async fn list_instances(State(state): State<AppState>) -> Result<Json<Vec<Instance>>, ApiError> {
    Ok(Json(state.orchestrator.list().await?))
}

pub async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    let instance = state
        .orchestrator
        .get(&InstanceId(id))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(instance))
}

pub async fn alter_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AlterInstanceRequest>,
) -> Result<(StatusCode, Json<Instance>), ApiError> {
    let target = parse_product(&body.product)?;
    let instance = state.orchestrator.alter(&InstanceId(id), target).await?;
    let status = if instance.operation.is_some() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(instance)))
}

pub async fn terminate_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<OperationAccepted>) {
    let operation_id = state.orchestrator.terminate_in_background(&InstanceId(id));
    (StatusCode::ACCEPTED, Json(OperationAccepted { operation_id }))
}

pub async fn start_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.start(&InstanceId(id)).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn stop_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StopQuery>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.stop(&InstanceId(id), query.hard).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn reboot_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.reboot(&InstanceId(id)).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn list_firewalls(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.orchestrator.list_firewalls(&InstanceId(id)).await?))
}

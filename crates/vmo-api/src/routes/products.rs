use axum::Json;
use axum::extract::{Path, Query, State};

use vmo_infra::types::{Architecture, ProductDescriptor};

use crate::dto::ProductsQuery;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductsQuery>,
) -> Result<Json<Vec<ProductDescriptor>>, ApiError> {
    let architecture = query.architecture.unwrap_or(Architecture::I64);
    Ok(Json(state.orchestrator.list_products(architecture).await?))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<ProductDescriptor>, ApiError> {
    state
        .orchestrator
        .get_product(&product_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

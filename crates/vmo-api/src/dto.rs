use serde::{Deserialize, Serialize};
use vmo_infra::launch::LaunchRequest;
use vmo_infra::types::Architecture;
use vmo_infra::{InstanceSpec, OperationId};

use crate::error::ApiError;

// ── Requests ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LaunchInstanceRequest {
    /// `"cpu:ram"` or `"cpu:ram:[disks]"`.
    pub product: String,
    pub image_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub vlan_id: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl LaunchInstanceRequest {
    pub fn into_launch(self) -> Result<LaunchRequest, ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::BadRequest("name must not be empty".into()));
        }
        Ok(LaunchRequest {
            product: parse_product(&self.product)?,
            image_id: self.image_id,
            name: self.name,
            description: self.description,
            vlan_id: self.vlan_id,
            region_id: self.region_id,
            password: self.password,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AlterInstanceRequest {
    pub product: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct StopQuery {
    /// Power off instead of shutting down.
    #[serde(default)]
    pub hard: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductsQuery {
    #[serde(default)]
    pub architecture: Option<Architecture>,
}

pub fn parse_product(raw: &str) -> Result<InstanceSpec, ApiError> {
    Ok(raw.trim().parse::<InstanceSpec>()?)
}

// ── Responses ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct OperationAccepted {
    pub operation_id: OperationId,
}

//! Collaborators the orchestrator consumes but does not implement.

use async_trait::async_trait;

use crate::types::{Architecture, ComputeLimits, ImageDescriptor, Region};
use crate::{Error, Result};

#[async_trait]
pub trait ImageCatalog: Send + Sync + 'static {
    /// Look up an image by id.
    async fn resolve(&self, image_id: &str) -> Result<Option<ImageDescriptor>>;

    /// Find a pre-built variant of a platform/architecture with the given
    /// native CPU and memory.
    async fn find_variant(
        &self,
        platform: &str,
        architecture: Architecture,
        cpu_count: u32,
        memory_mb: u32,
    ) -> Result<Option<ImageDescriptor>>;
}

#[async_trait]
pub trait NetworkResolver: Send + Sync + 'static {
    /// Resource path of a VLAN in a region, as the deploy command expects it.
    async fn resolve_vlan_path(&self, vlan_id: &str, region_id: &str) -> Result<String>;
}

#[async_trait]
pub trait AddressManager: Send + Sync + 'static {
    /// Release a public address from whatever server it is bound to.
    async fn release(&self, address_id: &str) -> Result<()>;
}

#[async_trait]
pub trait RegionCatalog: Send + Sync + 'static {
    async fn list_regions(&self) -> Result<Vec<Region>>;

    async fn compute_limits(&self, region_id: &str) -> Result<ComputeLimits>;
}

/// The preferred region if one is set, otherwise the first one listed.
pub async fn pick_region(regions: &dyn RegionCatalog, preferred: Option<&str>) -> Result<String> {
    if let Some(region) = preferred {
        return Ok(region.to_string());
    }
    regions
        .list_regions()
        .await?
        .into_iter()
        .next()
        .map(|r| r.id)
        .ok_or_else(|| Error::InvalidConfig("the control plane lists no regions".into()))
}

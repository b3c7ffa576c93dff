use async_trait::async_trait;
use tracing::debug;

use crate::catalog::{AddressManager, ImageCatalog, NetworkResolver, RegionCatalog};
use crate::observe::platform_family;
use crate::plane::{Command, CommandBody, CommandOutcome, ControlPlane, ResourceRef};
use crate::types::{Architecture, ComputeLimits, ImageDescriptor, Region};
use crate::{Error, Result};

/// Control plane REST adapter.
///
/// Delegates to `plane_api::PlaneClient` for all HTTP calls and implements
/// every collaborator trait the orchestrator needs.
#[derive(Clone)]
pub struct HttpControlPlane {
    client: plane_api::PlaneClient,
}

impl HttpControlPlane {
    pub fn new(client: plane_api::PlaneClient) -> Self {
        Self { client }
    }

    fn resource_path(resource: &ResourceRef) -> String {
        match resource {
            ResourceRef::Servers => "/server".into(),
            ResourceRef::Server(id) => format!("/server/{id}"),
        }
    }

    fn describe(image: plane_api::Image) -> ImageDescriptor {
        let os = image.os_display_name.as_deref().unwrap_or_default();
        ImageDescriptor {
            platform: platform_family(os).unwrap_or_else(|| "unknown".into()),
            architecture: Architecture::guess(os).unwrap_or(Architecture::I64),
            id: image.id,
            name: image.name,
            cpu_count: image.cpu_count,
            memory_mb: image.memory_mb,
        }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn invoke(
        &self,
        command: Command,
        resource: &ResourceRef,
        body: Option<&CommandBody>,
    ) -> Result<CommandOutcome> {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| Error::Decode(format!("encoding {command} request: {e}")))?;

        let resp = self
            .client
            .invoke(&Self::resource_path(resource), Some(command.as_str()), body.as_ref())
            .await?;
        debug!(%command, %resource, result = %resp.result, code = ?resp.result_code, "command answered");

        Ok(CommandOutcome {
            success: resp.is_success(),
            code: resp.result_code,
            detail: resp.result_detail,
            payload: resp.payload,
        })
    }
}

#[async_trait]
impl ImageCatalog for HttpControlPlane {
    async fn resolve(&self, image_id: &str) -> Result<Option<ImageDescriptor>> {
        Ok(self.client.get_image(image_id).await?.map(Self::describe))
    }

    async fn find_variant(
        &self,
        platform: &str,
        architecture: Architecture,
        cpu_count: u32,
        memory_mb: u32,
    ) -> Result<Option<ImageDescriptor>> {
        let images = self
            .client
            .search_images(&plane_api::ImageQuery {
                platform: platform.to_string(),
                architecture: architecture.as_str().to_string(),
                cpu_count,
                memory_mb,
            })
            .await?;

        Ok(images
            .into_iter()
            .map(Self::describe)
            .find(|image| image.matches(cpu_count, memory_mb)))
    }
}

#[async_trait]
impl NetworkResolver for HttpControlPlane {
    async fn resolve_vlan_path(&self, vlan_id: &str, region_id: &str) -> Result<String> {
        Ok(self.client.get_network(vlan_id, region_id).await?.resource_path)
    }
}

#[async_trait]
impl AddressManager for HttpControlPlane {
    async fn release(&self, address_id: &str) -> Result<()> {
        Ok(self.client.release_address(address_id).await?)
    }
}

#[async_trait]
impl RegionCatalog for HttpControlPlane {
    async fn list_regions(&self) -> Result<Vec<Region>> {
        Ok(self
            .client
            .list_locations()
            .await?
            .into_iter()
            .map(|l| Region {
                id: l.location,
                name: l.display_name,
            })
            .collect())
    }

    async fn compute_limits(&self, region_id: &str) -> Result<ComputeLimits> {
        self.client
            .list_locations()
            .await?
            .into_iter()
            .find(|l| l.location == region_id)
            .map(|l| ComputeLimits {
                max_cpu: l.max_cpu,
                max_ram_mb: l.max_ram_mb,
            })
            .ok_or_else(|| Error::InvalidConfig(format!("unknown region: {region_id}")))
    }
}

//! The operations offered to callers, wired over the collaborators.

use std::sync::Arc;

use tracing::info;

use crate::cache::ProductCache;
use crate::catalog::{AddressManager, ImageCatalog, NetworkResolver, RegionCatalog, pick_region};
use crate::config::OrchestratorConfig;
use crate::enumerate::{InstanceEnumerator, ServerQuery};
use crate::launch::{LaunchOrchestrator, LaunchRequest, Placement};
use crate::lease::{LeaseRegistry, OperationId, OperationKind};
use crate::plane::{Command, ControlPlane, ResourceRef};
use crate::products::product_catalog;
use crate::reconfigure::ReconfigureEngine;
use crate::spec::{InstanceSpec, diff};
use crate::terminate::TerminationOrchestrator;
use crate::types::{
    Architecture, Instance, InstanceId, InstanceObservation, InstanceStatus, ProductDescriptor,
};
use crate::{Error, Result};

/// Everything the orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub plane: Arc<dyn ControlPlane>,
    pub images: Arc<dyn ImageCatalog>,
    pub networks: Arc<dyn NetworkResolver>,
    pub addresses: Arc<dyn AddressManager>,
    pub regions: Arc<dyn RegionCatalog>,
}

#[derive(Clone)]
pub struct VmOrchestrator {
    plane: Arc<dyn ControlPlane>,
    regions: Arc<dyn RegionCatalog>,
    enumerator: InstanceEnumerator,
    engine: ReconfigureEngine,
    launcher: LaunchOrchestrator,
    terminator: TerminationOrchestrator,
    leases: LeaseRegistry,
    products: ProductCache,
    placement: Placement,
}

impl VmOrchestrator {
    pub fn new(c: Collaborators, config: OrchestratorConfig, leases: LeaseRegistry) -> Self {
        let enumerator = InstanceEnumerator::new(c.plane.clone());
        let engine = ReconfigureEngine::new(c.plane.clone(), enumerator.clone(), &config);
        let launcher = LaunchOrchestrator::new(
            c.plane.clone(),
            c.images,
            c.networks,
            c.regions.clone(),
            enumerator.clone(),
            engine.clone(),
            leases.clone(),
            &config,
        );
        let terminator =
            TerminationOrchestrator::new(c.plane.clone(), c.addresses, enumerator.clone(), &config);

        Self {
            plane: c.plane,
            regions: c.regions,
            enumerator,
            engine,
            launcher,
            terminator,
            leases,
            products: ProductCache::new(config.product_cache_ttl),
            placement: Placement::default(),
        }
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.launcher = self.launcher.with_placement(placement.clone());
        self.placement = placement;
        self
    }

    pub fn leases(&self) -> &LeaseRegistry {
        &self.leases
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub async fn launch(&self, req: LaunchRequest) -> Result<Instance> {
        self.launcher.launch(req).await
    }

    /// Reconfigure `id` to `target` on a background task.
    ///
    /// Input errors (bad ranges, unsupported disk changes) are reported
    /// right away. Returns the current observation, with the background
    /// operation id when there is anything to change.
    pub async fn alter(&self, id: &InstanceId, target: InstanceSpec) -> Result<Instance> {
        let observation = self.require(id, "alter").await?;
        let current = observation.spec.clone().ok_or_else(|| {
            Error::InvalidConfig(format!("server {id} does not report its hardware yet"))
        })?;

        if diff(&current, &target)?.is_empty() {
            return Ok(observation.into());
        }

        info!(instance_id = %id, from = %current, to = %target, "altering server");
        let engine = self.engine.clone();
        let instance_id = id.clone();
        let operation = self.leases.spawn(OperationKind::Alter, id.clone(), async move {
            engine.apply(&instance_id, &current, &target).await.map(|_| ())
        });

        let mut instance = Instance::from(observation);
        instance.operation = Some(operation);
        Ok(instance)
    }

    /// Terminate and wait for it.
    pub async fn terminate(&self, id: &InstanceId) -> Result<()> {
        self.terminator.terminate(id).await
    }

    /// Terminate on a background task under a lease.
    pub fn terminate_in_background(&self, id: &InstanceId) -> OperationId {
        let terminator = self.terminator.clone();
        let instance_id = id.clone();
        self.leases.spawn(OperationKind::Terminate, id.clone(), async move {
            terminator.terminate(&instance_id).await
        })
    }

    pub async fn start(&self, id: &InstanceId) -> Result<()> {
        self.power(id, Command::Start).await
    }

    /// Graceful shutdown, or a hard power off when `hard` is set.
    pub async fn stop(&self, id: &InstanceId, hard: bool) -> Result<()> {
        let command = if hard { Command::PowerOff } else { Command::Shutdown };
        self.power(id, command).await
    }

    pub async fn reboot(&self, id: &InstanceId) -> Result<()> {
        self.power(id, Command::Reboot).await
    }

    async fn power(&self, id: &InstanceId, command: Command) -> Result<()> {
        self.require(id, command.as_str()).await?;
        let resource = ResourceRef::Server(id.clone());
        self.plane
            .invoke(command, &resource, None)
            .await?
            .into_result(command, &resource)?;
        info!(instance_id = %id, %command, "power command accepted");
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn get(&self, id: &InstanceId) -> Result<Option<Instance>> {
        Ok(self.enumerator.find(id).await?.map(Instance::from))
    }

    pub async fn find_by_name_and_vlan(&self, name: &str, vlan_id: &str) -> Result<Option<Instance>> {
        Ok(self
            .enumerator
            .find_by_name_and_vlan(name, vlan_id)
            .await?
            .map(Instance::from))
    }

    pub async fn list(&self) -> Result<Vec<Instance>> {
        Ok(self
            .enumerator
            .enumerate(ServerQuery::all())
            .await?
            .map(Instance::from)
            .collect())
    }

    pub async fn list_status(&self) -> Result<Vec<InstanceStatus>> {
        Ok(self
            .enumerator
            .enumerate(ServerQuery::all())
            .await?
            .map(|obs| InstanceStatus {
                id: obs.id,
                phase: obs.phase,
            })
            .collect())
    }

    /// Firewalls protecting `id`; each VLAN doubles as its own firewall.
    pub async fn list_firewalls(&self, id: &InstanceId) -> Result<Vec<String>> {
        let observation = self.require(id, "listing firewalls").await?;
        Ok(observation.vlan_id.into_iter().collect())
    }

    pub fn supported_architectures(&self) -> &'static [Architecture] {
        &Architecture::ALL
    }

    pub async fn list_products(&self, architecture: Architecture) -> Result<Vec<ProductDescriptor>> {
        let region = pick_region(self.regions.as_ref(), self.placement.region.as_deref()).await?;
        let regions = &self.regions;
        let region_id = region.as_str();
        let products = self
            .products
            .get_or_load(region_id, architecture, || async move {
                let limits = regions.compute_limits(region_id).await?;
                Ok(product_catalog(limits, architecture))
            })
            .await?;
        Ok(products.as_ref().clone())
    }

    /// Look a `"cpu:ram"` product up across every supported architecture.
    pub async fn get_product(&self, product_id: &str) -> Result<Option<ProductDescriptor>> {
        for &architecture in self.supported_architectures() {
            let products = self.list_products(architecture).await?;
            if let Some(product) = products.into_iter().find(|p| p.id == product_id) {
                return Ok(Some(product));
            }
        }
        Ok(None)
    }

    async fn require(&self, id: &InstanceId, during: &'static str) -> Result<InstanceObservation> {
        self.enumerator
            .find(id)
            .await?
            .ok_or_else(|| Error::ResourceVanished {
                instance: id.clone(),
                during,
            })
    }
}

//! Launch a server, taking the fastest path the image catalog allows.
//!
//! 1. The image already has the requested CPU/RAM: deploy it started.
//! 2. A pre-built variant with that CPU/RAM exists: deploy the variant
//!    started.
//! 3. Otherwise deploy the original image stopped, then resize and boot it
//!    on a background task under an operation lease.
//!
//! The caller gets the instance back as soon as the deployment can be
//! located by name and VLAN; background failures are only recorded.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::{ImageCatalog, NetworkResolver, RegionCatalog, pick_region};
use crate::config::OrchestratorConfig;
use crate::enumerate::InstanceEnumerator;
use crate::lease::{LeaseRegistry, OperationKind};
use crate::password::bootstrap_password;
use crate::plane::{Command, CommandBody, ControlPlane, DeployRequest, ResourceRef};
use crate::reconfigure::ReconfigureEngine;
use crate::spec::InstanceSpec;
use crate::types::{ImageDescriptor, Instance, InstanceId, InstanceObservation, LifecyclePhase};
use crate::waiter::{PollPolicy, Tick, poll, wait_until};
use crate::{Error, Result};

/// CPU/RAM combinations every platform ships a pre-built image for.
pub const NEAR_MATCH_VARIANTS: [(u32, u32); 3] = [(1, 2048), (2, 4096), (4, 6144)];

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub product: InstanceSpec,
    pub image_id: String,
    pub name: String,
    /// Defaults to the name.
    pub description: Option<String>,
    pub vlan_id: Option<String>,
    pub region_id: Option<String>,
    /// Kept when at least eight characters long, otherwise generated.
    pub password: Option<String>,
}

/// Where launches go when the request does not say.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    pub region: Option<String>,
    pub default_vlan: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchPath {
    Exact,
    NearMatch(ImageDescriptor),
    MultiStep,
}

impl LaunchPath {
    fn label(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::NearMatch(_) => "near-match",
            Self::MultiStep => "multi-step",
        }
    }
}

#[derive(Clone)]
pub struct LaunchOrchestrator {
    plane: Arc<dyn ControlPlane>,
    images: Arc<dyn ImageCatalog>,
    networks: Arc<dyn NetworkResolver>,
    regions: Arc<dyn RegionCatalog>,
    enumerator: InstanceEnumerator,
    engine: ReconfigureEngine,
    leases: LeaseRegistry,
    boot: PollPolicy,
    resolve: PollPolicy,
    placement: Placement,
}

impl LaunchOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plane: Arc<dyn ControlPlane>,
        images: Arc<dyn ImageCatalog>,
        networks: Arc<dyn NetworkResolver>,
        regions: Arc<dyn RegionCatalog>,
        enumerator: InstanceEnumerator,
        engine: ReconfigureEngine,
        leases: LeaseRegistry,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            plane,
            images,
            networks,
            regions,
            enumerator,
            engine,
            leases,
            boot: config.boot,
            resolve: config.resolve,
            placement: Placement::default(),
        }
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub async fn launch(&self, req: LaunchRequest) -> Result<Instance> {
        req.product.validate()?;

        let image = self
            .images
            .resolve(&req.image_id)
            .await?
            .ok_or_else(|| Error::ImageNotFound(req.image_id.clone()))?;

        let preferred = req.region_id.as_deref().or(self.placement.region.as_deref());
        let region = pick_region(self.regions.as_ref(), preferred).await?;
        let vlan = req
            .vlan_id
            .clone()
            .or_else(|| self.placement.default_vlan.clone())
            .ok_or_else(|| {
                Error::InvalidConfig("no VLAN requested and no default VLAN configured".into())
            })?;
        let vlan_path = self.networks.resolve_vlan_path(&vlan, &region).await?;

        let password = bootstrap_password(req.password.as_deref(), &mut rand::rng());
        let path = self.choose_path(&image, &req.product).await?;
        let (deploy_image, start) = match &path {
            LaunchPath::Exact => (&image, true),
            LaunchPath::NearMatch(variant) => (variant, true),
            LaunchPath::MultiStep => (&image, false),
        };

        info!(
            name = %req.name,
            image_id = %deploy_image.id,
            region = %region,
            vlan_id = %vlan,
            product = %req.product,
            path = path.label(),
            "deploying server"
        );

        let resource = ResourceRef::Servers;
        let body = CommandBody::Deploy(DeployRequest {
            name: req.name.clone(),
            description: req.description.clone().unwrap_or_else(|| req.name.clone()),
            vlan_resource_path: vlan_path,
            image_id: deploy_image.id.clone(),
            location: region,
            administrator_password: password.clone(),
            is_started: start,
        });
        self.plane
            .invoke(Command::Deploy, &resource, Some(&body))
            .await?
            .into_result(Command::Deploy, &resource)?;

        let observation = self.locate(&req.name, &vlan).await?;
        info!(instance_id = %observation.id, name = %req.name, "deployment located");

        let id = observation.id.clone();
        let mut instance = Instance::from(observation);
        instance.root_password = Some(password);

        // Fast paths only need background work when extra disks were asked for.
        let boot = path == LaunchPath::MultiStep;
        if boot || !req.product.disks_gb.is_empty() {
            let configure = self.clone().configure(id.clone(), req.product, boot);
            instance.operation = Some(self.leases.spawn(OperationKind::Launch, id, configure));
        }

        Ok(instance)
    }

    /// Pick the launch path for `product` on `image`.
    pub async fn choose_path(
        &self,
        image: &ImageDescriptor,
        product: &InstanceSpec,
    ) -> Result<LaunchPath> {
        let wanted = (product.cpu_count, product.ram_mb);
        if image.matches(wanted.0, wanted.1) {
            return Ok(LaunchPath::Exact);
        }
        if NEAR_MATCH_VARIANTS.contains(&wanted) {
            let variant = self
                .images
                .find_variant(&image.platform, image.architecture, wanted.0, wanted.1)
                .await?;
            if let Some(variant) = variant {
                return Ok(LaunchPath::NearMatch(variant));
            }
            info!(
                platform = %image.platform,
                architecture = %image.architecture,
                cpu_count = wanted.0,
                ram_mb = wanted.1,
                "no pre-built variant, falling back to multi-step launch"
            );
        }
        Ok(LaunchPath::MultiStep)
    }

    /// Find the new server; deploy does not hand back its id.
    async fn locate(&self, name: &str, vlan_id: &str) -> Result<InstanceObservation> {
        let enumerator = &self.enumerator;
        let operation = format!("locating deployed server {name} on VLAN {vlan_id}");
        poll(&operation, self.resolve, || async move {
            Ok(match enumerator.find_by_name_and_vlan(name, vlan_id).await? {
                Some(obs) => Tick::Done(obs),
                None => Tick::Continue,
            })
        })
        .await
    }

    /// Background part of a launch: wait for the deployment to finish,
    /// reconfigure to the requested product and, if asked, boot.
    async fn configure(self, id: InstanceId, product: InstanceSpec, boot: bool) -> Result<()> {
        let enumerator = &self.enumerator;
        let deployed = wait_until(
            &id,
            "waiting for deployment",
            self.boot,
            || enumerator.find(&id),
            |obs| obs.is_some_and(|o| o.phase != LifecyclePhase::Pending && o.spec.is_some()),
        )
        .await?;
        let current = deployed
            .and_then(|obs| obs.spec)
            .ok_or_else(|| Error::ResourceVanished {
                instance: id.clone(),
                during: "waiting for deployment",
            })?;

        let reconfigured = match self.engine.apply(&id, &current, &product).await {
            Ok(_) => Ok(()),
            Err(e @ Error::ResourceVanished { .. }) => return Err(e),
            Err(e) if boot => {
                warn!(instance_id = %id, error = %e, "reconfigure failed, booting anyway");
                Err(e)
            }
            Err(e) => return Err(e),
        };

        if boot {
            self.boot(&id).await?;
        }
        reconfigured
    }

    /// Wait for RUNNING, (re)sending start whenever the server is seen
    /// STOPPED. Rejected starts are retried until the boot timeout.
    async fn boot(&self, id: &InstanceId) -> Result<()> {
        let enumerator = &self.enumerator;
        let plane = &self.plane;
        let resource = ResourceRef::Server(id.clone());
        let resource = &resource;

        poll("booting server", self.boot, || async move {
            let obs = enumerator
                .find(id)
                .await?
                .ok_or_else(|| Error::ResourceVanished {
                    instance: id.clone(),
                    during: "booting server",
                })?;
            match obs.phase {
                LifecyclePhase::Running => Ok(Tick::Done(())),
                LifecyclePhase::Stopped => {
                    info!(instance_id = %id, "starting server");
                    plane
                        .invoke(Command::Start, resource, None)
                        .await?
                        .into_result(Command::Start, resource)?;
                    Ok(Tick::Continue)
                }
                phase => {
                    debug!(instance_id = %id, %phase, "waiting for the server to settle");
                    Ok(Tick::Continue)
                }
            }
        })
        .await?;

        info!(instance_id = %id, "server running");
        Ok(())
    }
}

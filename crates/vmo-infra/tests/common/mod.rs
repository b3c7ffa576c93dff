#![allow(dead_code)]

//! In-memory control plane for driving the orchestrators in tests.
//!
//! Commands take effect immediately except deployment, which stays
//! PENDING for a configurable number of listings.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::json;

use vmo_infra::catalog::{AddressManager, ImageCatalog, NetworkResolver, RegionCatalog};
use vmo_infra::config::OrchestratorConfig;
use vmo_infra::plane::{Command, CommandBody, CommandOutcome, ControlPlane, ResourceRef};
use vmo_infra::types::{Architecture, ComputeLimits, ImageDescriptor, InstanceId, Region};
use vmo_infra::{Collaborators, Error, LeaseRegistry, Result, VmOrchestrator};

pub const VLAN: &str = "vlan-1";
pub const REGION: &str = "NA1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Command {
        command: Command,
        server: Option<String>,
    },
    Release(String),
}

impl Call {
    pub fn is(&self, wanted: Command) -> bool {
        matches!(self, Call::Command { command, .. } if *command == wanted)
    }
}

#[derive(Debug, Clone)]
pub struct FakeServer {
    pub id: String,
    pub name: String,
    pub vlan: String,
    pub image_id: String,
    pub cpu: u32,
    pub ram: u32,
    pub disks: Vec<u32>,
    pub started: bool,
    pub public_ip: Option<String>,
    /// Listings left before deployment finishes.
    pub pending_listings: u32,
}

impl FakeServer {
    pub fn running(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            vlan: VLAN.to_string(),
            image_id: "img-base".to_string(),
            cpu: 2,
            ram: 4096,
            disks: vec![10],
            started: true,
            public_ip: None,
            pending_listings: 0,
        }
    }

    fn record(&self) -> serde_json::Value {
        let deploying = self.pending_listings > 0;
        let disks: Vec<_> = self
            .disks
            .iter()
            .enumerate()
            .map(|(scsi, size)| json!({ "scsiId": scsi, "sizeGb": size }))
            .collect();
        json!({
            "shape": "withState",
            "id": self.id,
            "location": REGION,
            "name": self.name,
            "networkId": self.vlan,
            "operatingSystem": { "displayName": "UBUNTU10/64" },
            "cpuCount": self.cpu,
            "memoryMb": self.ram,
            "disk": disks,
            "sourceImageId": self.image_id,
            "publicIp": self.public_ip,
            "isDeployed": !deploying,
            "isStarted": !deploying && self.started,
            "state": if deploying { "PENDING_ADD" } else { "NORMAL" },
        })
    }
}

#[derive(Default)]
struct World {
    servers: Vec<FakeServer>,
    images: Vec<ImageDescriptor>,
    calls: Vec<Call>,
    next_id: u32,
    deploy_pending_listings: u32,
    /// Outcomes handed out by the next destroy requests, in order.
    destroy_script: VecDeque<CommandOutcome>,
    /// Number of upcoming storage requests to reject.
    storage_rejections: u32,
    /// Number of upcoming modify requests to reject.
    modify_rejections: u32,
    /// Number of upcoming start requests to reject.
    start_rejections: u32,
    /// Number of upcoming destroy requests that fail before reaching the
    /// control plane.
    destroy_failures: u32,
    /// Number of upcoming address releases that fail.
    release_failures: u32,
    reject_deploy: bool,
}

#[derive(Default)]
pub struct FakePlane {
    world: Mutex<World>,
}

impl FakePlane {
    pub fn new() -> Arc<Self> {
        let fake = Self::default();
        fake.world().deploy_pending_listings = 1;
        Arc::new(fake)
    }

    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap()
    }

    pub fn add_image(&self, id: &str, cpu: u32, ram: u32) {
        self.world().images.push(ImageDescriptor {
            id: id.to_string(),
            name: format!("ubuntu {cpu}x{ram}"),
            cpu_count: Some(cpu),
            memory_mb: Some(ram),
            platform: "ubuntu".to_string(),
            architecture: Architecture::I64,
        });
    }

    pub fn add_server(&self, server: FakeServer) {
        self.world().servers.push(server);
    }

    pub fn server(&self, id: &str) -> Option<FakeServer> {
        self.world().servers.iter().find(|s| s.id == id).cloned()
    }

    pub fn servers(&self) -> Vec<FakeServer> {
        self.world().servers.clone()
    }

    pub fn script_destroy(&self, code: &str) {
        self.world().destroy_script.push_back(CommandOutcome {
            success: false,
            code: Some(code.to_string()),
            detail: Some("scripted failure".to_string()),
            payload: None,
        });
    }

    pub fn reject_storage(&self, times: u32) {
        self.world().storage_rejections = times;
    }

    pub fn reject_modify(&self, times: u32) {
        self.world().modify_rejections = times;
    }

    pub fn reject_start(&self, times: u32) {
        self.world().start_rejections = times;
    }

    pub fn fail_destroy_requests(&self, times: u32) {
        self.world().destroy_failures = times;
    }

    pub fn fail_release(&self, times: u32) {
        self.world().release_failures = times;
    }

    pub fn reject_deploy(&self) {
        self.world().reject_deploy = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.world().calls.clone()
    }

    /// Every recorded call except listings.
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !c.is(Command::ListWithState))
            .collect()
    }

    pub fn count(&self, command: Command) -> usize {
        self.calls().iter().filter(|c| c.is(command)).count()
    }

    pub fn position(&self, wanted: &Call) -> Option<usize> {
        self.calls().iter().position(|c| c == wanted)
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            plane: self.clone(),
            images: self.clone(),
            networks: self.clone(),
            addresses: self.clone(),
            regions: self.clone(),
        }
    }

    pub fn orchestrator(self: &Arc<Self>) -> VmOrchestrator {
        VmOrchestrator::new(
            self.collaborators(),
            OrchestratorConfig::default(),
            LeaseRegistry::new(),
        )
        .with_placement(vmo_infra::launch::Placement {
            region: None,
            default_vlan: Some(VLAN.to_string()),
        })
    }
}

fn accepted() -> CommandOutcome {
    CommandOutcome {
        success: true,
        code: Some("REASON_0".into()),
        ..Default::default()
    }
}

fn rejected(code: &str) -> CommandOutcome {
    CommandOutcome {
        success: false,
        code: Some(code.into()),
        detail: Some("rejected by fake".into()),
        payload: None,
    }
}

#[async_trait]
impl ControlPlane for FakePlane {
    async fn invoke(
        &self,
        command: Command,
        resource: &ResourceRef,
        body: Option<&CommandBody>,
    ) -> Result<CommandOutcome> {
        let mut world = self.world();
        let server = match resource {
            ResourceRef::Servers => None,
            ResourceRef::Server(id) => Some(id.as_str().to_string()),
        };
        world.calls.push(Call::Command {
            command,
            server: server.clone(),
        });

        if command == Command::Destroy && world.destroy_failures > 0 {
            world.destroy_failures -= 1;
            return Err(Error::RemoteCallFailed {
                command,
                resource: resource.to_string(),
                code: None,
                detail: "connection reset by peer".into(),
            });
        }

        let index = server
            .as_ref()
            .and_then(|id| world.servers.iter().position(|s| &s.id == id));

        let outcome = match (command, body, index) {
            (Command::ListWithState, Some(CommandBody::Page(page)), _) => {
                let matching: Vec<usize> = (0..world.servers.len())
                    .filter(|&i| page.id.as_ref().is_none_or(|id| world.servers[i].id == id.as_str()))
                    .collect();
                let mut ordered = matching;
                if page.newest_first {
                    ordered.reverse();
                }
                let start = (page.page_number - 1) * page.page_size;
                let chosen: Vec<usize> = ordered.into_iter().skip(start).take(page.page_size).collect();
                let records: Vec<_> = chosen.iter().map(|&i| world.servers[i].record()).collect();
                for &i in &chosen {
                    let s = &mut world.servers[i];
                    s.pending_listings = s.pending_listings.saturating_sub(1);
                }
                CommandOutcome {
                    success: true,
                    payload: Some(json!({ "pageCount": records.len(), "servers": records })),
                    ..Default::default()
                }
            }
            (Command::Deploy, Some(CommandBody::Deploy(req)), _) => {
                if world.reject_deploy {
                    rejected("REASON_320")
                } else {
                    let image = world.images.iter().find(|i| i.id == req.image_id).cloned();
                    let (cpu, ram) = image
                        .map(|i| (i.cpu_count.unwrap_or(1), i.memory_mb.unwrap_or(1024)))
                        .unwrap_or((1, 1024));
                    world.next_id += 1;
                    let server = FakeServer {
                        id: format!("srv-{}", world.next_id),
                        name: req.name.clone(),
                        vlan: req
                            .vlan_resource_path
                            .trim_start_matches("/network/")
                            .to_string(),
                        image_id: req.image_id.clone(),
                        cpu,
                        ram,
                        disks: vec![10],
                        started: req.is_started,
                        public_ip: None,
                        pending_listings: world.deploy_pending_listings,
                    };
                    world.servers.push(server);
                    accepted()
                }
            }
            (Command::Modify, _, Some(_)) if world.modify_rejections > 0 => {
                world.modify_rejections -= 1;
                rejected("REASON_10")
            }
            (Command::Modify, Some(CommandBody::Modify { cpu_count, memory_mb }), Some(i)) => {
                let s = &mut world.servers[i];
                if let Some(cpu) = cpu_count {
                    s.cpu = *cpu;
                }
                if let Some(ram) = memory_mb {
                    s.ram = *ram;
                }
                accepted()
            }
            (Command::AddLocalStorage, Some(CommandBody::AddStorage { amount_gb }), Some(i)) => {
                if world.storage_rejections > 0 {
                    world.storage_rejections -= 1;
                    rejected("REASON_10")
                } else {
                    world.servers[i].disks.push(*amount_gb);
                    accepted()
                }
            }
            (Command::Start, _, Some(_)) if world.start_rejections > 0 => {
                world.start_rejections -= 1;
                rejected("REASON_10")
            }
            (Command::Start, _, Some(i)) => {
                world.servers[i].started = true;
                accepted()
            }
            (Command::Shutdown | Command::PowerOff, _, Some(i)) => {
                world.servers[i].started = false;
                accepted()
            }
            (Command::Reboot | Command::Clean, _, Some(_)) => accepted(),
            (Command::Destroy, _, Some(i)) => match world.destroy_script.pop_front() {
                Some(outcome) => outcome,
                None => {
                    world.servers.remove(i);
                    accepted()
                }
            },
            (Command::Destroy, _, None) => rejected("REASON_395"),
            _ => rejected("REASON_999"),
        };
        Ok(outcome)
    }
}

#[async_trait]
impl ImageCatalog for FakePlane {
    async fn resolve(&self, image_id: &str) -> Result<Option<ImageDescriptor>> {
        Ok(self.world().images.iter().find(|i| i.id == image_id).cloned())
    }

    async fn find_variant(
        &self,
        platform: &str,
        architecture: Architecture,
        cpu_count: u32,
        memory_mb: u32,
    ) -> Result<Option<ImageDescriptor>> {
        Ok(self
            .world()
            .images
            .iter()
            .find(|i| {
                i.platform == platform
                    && i.architecture == architecture
                    && i.matches(cpu_count, memory_mb)
            })
            .cloned())
    }
}

#[async_trait]
impl NetworkResolver for FakePlane {
    async fn resolve_vlan_path(&self, vlan_id: &str, _region_id: &str) -> Result<String> {
        Ok(format!("/network/{vlan_id}"))
    }
}

#[async_trait]
impl AddressManager for FakePlane {
    async fn release(&self, address_id: &str) -> Result<()> {
        let mut world = self.world();
        world.calls.push(Call::Release(address_id.to_string()));
        if world.release_failures > 0 {
            world.release_failures -= 1;
            return Err(Error::Decode("truncated address release response".into()));
        }
        for server in world.servers.iter_mut() {
            if server.public_ip.as_deref() == Some(address_id) {
                server.public_ip = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RegionCatalog for FakePlane {
    async fn list_regions(&self) -> Result<Vec<Region>> {
        Ok(vec![Region {
            id: REGION.to_string(),
            name: "North America 1".to_string(),
        }])
    }

    async fn compute_limits(&self, _region_id: &str) -> Result<ComputeLimits> {
        Ok(ComputeLimits {
            max_cpu: 8,
            max_ram_mb: 16384,
        })
    }
}

pub fn id(s: &str) -> InstanceId {
    InstanceId::from(s)
}

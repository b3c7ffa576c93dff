//! Decode server records returned by the control plane into the canonical
//! [`InstanceObservation`].
//!
//! The control plane reports servers in three shapes depending on which
//! query produced them and how far along deployment is. Each shape is a
//! variant of [`ServerRecord`]; all of them converge into one type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::spec::InstanceSpec;
use crate::types::{Architecture, InstanceId, InstanceObservation, InstanceTags, LifecyclePhase};
use crate::{Error, Result};

/// One page of a server query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPage {
    /// Number of records the control plane reports for this page.
    pub page_count: usize,
    #[serde(default)]
    pub servers: Vec<ServerRecord>,
}

impl ServerPage {
    pub fn from_payload(payload: Option<serde_json::Value>) -> Result<Self> {
        match payload {
            Some(value) => serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string())),
            None => Ok(Self {
                page_count: 0,
                servers: Vec::new(),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "shape", rename_all = "camelCase")]
pub enum ServerRecord {
    /// Still being deployed; carries the requested machine specification.
    PendingDeploy(PendingServer),
    /// Deployment finished; carries the machine specification and power state.
    Deployed(DeployedServer),
    /// Full record with deployment state and any in-flight action.
    WithState(ServerWithState),
}

impl ServerRecord {
    pub fn into_observation(self) -> InstanceObservation {
        match self {
            Self::PendingDeploy(s) => s.into_observation(),
            Self::Deployed(s) => s.into_observation(),
            Self::WithState(s) => s.into_observation(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatingSystem {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpecification {
    #[serde(default)]
    pub operating_system: Option<OperatingSystem>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub cpu_count: Option<u32>,
    #[serde(default, alias = "memory", deserialize_with = "lenient_u32")]
    pub memory_mb: Option<u32>,
    #[serde(default, alias = "osStorage", deserialize_with = "lenient_u32")]
    pub os_storage_gb: Option<u32>,
    #[serde(default, alias = "additionalLocalStorage", deserialize_with = "lenient_u32")]
    pub additional_local_storage_gb: Option<u32>,
}

impl MachineSpecification {
    fn disks(&self) -> Vec<u32> {
        self.os_storage_gb
            .into_iter()
            .chain(self.additional_local_storage_gb.filter(|&gb| gb > 0))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingStatus {
    #[serde(default)]
    pub step: Option<serde_json::Value>,
    #[serde(default)]
    pub request_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingServer {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub network_id: Option<String>,
    #[serde(default)]
    pub source_image_id: Option<String>,
    #[serde(default)]
    pub machine_specification: MachineSpecification,
    #[serde(default)]
    pub private_ip_address: Option<String>,
    #[serde(default)]
    pub status: Option<PendingStatus>,
}

impl PendingServer {
    fn into_observation(self) -> InstanceObservation {
        let created_at = self
            .status
            .as_ref()
            .and_then(|s| s.request_time.as_deref())
            .and_then(parse_timestamp);
        let disks = self.machine_specification.disks();

        build(Parts {
            id: self.id,
            name: self.name,
            description: self.description,
            region_id: self.location,
            vlan_id: self.network_id,
            image_id: self.source_image_id,
            phase: LifecyclePhase::Pending,
            cpu_count: self.machine_specification.cpu_count,
            memory_mb: self.machine_specification.memory_mb,
            disks_gb: disks,
            os_display_name: os_name(self.machine_specification.operating_system),
            public_address: None,
            private_address: self.private_ip_address,
            created_at,
            server_state: None,
            failure_reason: None,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedServer {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub network_id: Option<String>,
    #[serde(default)]
    pub source_image_id: Option<String>,
    #[serde(default)]
    pub machine_specification: MachineSpecification,
    #[serde(default)]
    pub private_ip_address: Option<String>,
    #[serde(default)]
    pub public_ip_address: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_started: Option<bool>,
    #[serde(default)]
    pub created: Option<String>,
}

impl DeployedServer {
    fn into_observation(self) -> InstanceObservation {
        let phase = match self.is_started {
            Some(false) => LifecyclePhase::Stopped,
            _ => LifecyclePhase::Running,
        };
        let disks = self.machine_specification.disks();

        build(Parts {
            id: self.id,
            name: self.name,
            description: self.description,
            region_id: self.location,
            vlan_id: self.network_id,
            image_id: self.source_image_id,
            phase,
            cpu_count: self.machine_specification.cpu_count,
            memory_mb: self.machine_specification.memory_mb,
            disks_gb: disks,
            os_display_name: os_name(self.machine_specification.operating_system),
            public_address: self.public_ip_address,
            private_address: self.private_ip_address,
            created_at: self.created.as_deref().and_then(parse_timestamp),
            server_state: None,
            failure_reason: None,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    #[serde(deserialize_with = "strict_u32")]
    pub scsi_id: u32,
    #[serde(deserialize_with = "strict_u32")]
    pub size_gb: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// In-flight action, e.g. `START_SERVER`.
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerWithState {
    pub id: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub network_id: Option<String>,
    #[serde(default)]
    pub operating_system: Option<OperatingSystem>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub cpu_count: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub memory_mb: Option<u32>,
    #[serde(default)]
    pub disk: Vec<Disk>,
    #[serde(default)]
    pub source_image_id: Option<String>,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_deployed: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_started: Option<bool>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub status: Option<ServerStatus>,
}

/// States that are part of normal operation; anything else with a status
/// block attached is an error reported by the control plane.
const HEALTHY_STATES: [&str; 4] = ["NORMAL", "PENDING_ADD", "PENDING_CHANGE", "PENDING_DELETE"];

impl ServerWithState {
    fn phase(&self) -> (LifecyclePhase, Option<String>) {
        let deployed = self.is_deployed.unwrap_or(false);
        let powered = match self.is_started {
            Some(true) => LifecyclePhase::Running,
            Some(false) => LifecyclePhase::Stopped,
            None => LifecyclePhase::Pending,
        };

        match self.state.as_deref() {
            Some("PENDING_ADD") if !deployed => (LifecyclePhase::Pending, None),
            Some("PENDING_CHANGE") if deployed => {
                let action = self.status.as_ref().and_then(|s| s.action.as_deref());
                let phase = match action {
                    Some(a) if a.eq_ignore_ascii_case("START_SERVER") => LifecyclePhase::Running,
                    Some(a)
                        if a.eq_ignore_ascii_case("POWER_OFF_SERVER")
                            || a.eq_ignore_ascii_case("SHUTDOWN_SERVER") =>
                    {
                        LifecyclePhase::Stopping
                    }
                    Some(a) if a.eq_ignore_ascii_case("RESET_SERVER") => LifecyclePhase::Rebooting,
                    Some(_) => LifecyclePhase::Pending,
                    None => powered,
                };
                (phase, None)
            }
            Some(state) if !HEALTHY_STATES.contains(&state) && self.status.is_some() => {
                let reason = self
                    .status
                    .as_ref()
                    .and_then(|s| s.failure_reason.clone())
                    .filter(|r| !r.trim().is_empty());
                (LifecyclePhase::Suspended, reason)
            }
            _ => (powered, None),
        }
    }

    fn into_observation(self) -> InstanceObservation {
        let (phase, failure_reason) = self.phase();
        let server_state = (phase == LifecyclePhase::Suspended)
            .then(|| self.state.clone())
            .flatten();

        let mut disks = self.disk;
        disks.sort_by_key(|d| d.scsi_id);

        build(Parts {
            id: self.id,
            name: self.name,
            description: self.description,
            region_id: self.location,
            vlan_id: self.network_id,
            image_id: self.source_image_id,
            phase,
            cpu_count: self.cpu_count,
            memory_mb: self.memory_mb,
            disks_gb: disks.into_iter().map(|d| d.size_gb).collect(),
            os_display_name: os_name(self.operating_system),
            public_address: self.public_ip,
            private_address: self.private_ip,
            created_at: self.created.as_deref().and_then(parse_timestamp),
            server_state,
            failure_reason,
        })
    }
}

struct Parts {
    id: String,
    name: Option<String>,
    description: Option<String>,
    region_id: Option<String>,
    vlan_id: Option<String>,
    image_id: Option<String>,
    phase: LifecyclePhase,
    cpu_count: Option<u32>,
    memory_mb: Option<u32>,
    disks_gb: Vec<u32>,
    os_display_name: Option<String>,
    public_address: Option<String>,
    private_address: Option<String>,
    created_at: Option<DateTime<Utc>>,
    server_state: Option<String>,
    failure_reason: Option<String>,
}

fn build(p: Parts) -> InstanceObservation {
    let id = p.id.trim().to_string();
    let name = p.name.unwrap_or_else(|| id.clone());
    let description = p.description.unwrap_or_else(|| name.clone());

    let spec = match (p.cpu_count, p.memory_mb) {
        (Some(cpu), Some(ram)) => Some(InstanceSpec::new(cpu, ram).with_disks(p.disks_gb.clone())),
        _ => None,
    };

    let (platform, architecture) = match p.os_display_name.as_deref() {
        Some(os) => (platform_family(os), Architecture::guess(os)),
        None => (None, None),
    };

    InstanceObservation {
        id: InstanceId(id),
        name,
        description,
        region_id: p.region_id,
        vlan_id: p.vlan_id,
        image_id: p.image_id,
        phase: p.phase,
        tags: InstanceTags {
            cpu_count: p.cpu_count,
            memory_mb: p.memory_mb,
            disks_gb: p.disks_gb,
            server_state: p.server_state,
            failure_reason: p.failure_reason,
        },
        spec,
        platform,
        architecture,
        public_addresses: p.public_address.into_iter().collect(),
        private_addresses: p.private_address.into_iter().collect(),
        created_at: p.created_at,
    }
}

fn os_name(os: Option<OperatingSystem>) -> Option<String> {
    os.and_then(|o| o.display_name)
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}

/// Platform family from an operating system display name, e.g.
/// `"UBUNTU10/64"` → `"ubuntu"`, `"WIN2008S/64"` → `"windows"`.
pub fn platform_family(os_display_name: &str) -> Option<String> {
    if os_display_name.to_ascii_uppercase().contains("WIN") {
        return Some("windows".into());
    }
    let family: String = os_display_name
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase();
    (!family.is_empty()).then_some(family)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            warn!(value = raw, error = %e, "invalid creation timestamp");
            None
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
    Number(u64),
    Bool(bool),
    Text(String),
}

fn lenient_u32<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Option<u32>, D::Error> {
    use serde::de::Error as _;
    match Option::<Lenient>::deserialize(de)? {
        None => Ok(None),
        Some(Lenient::Number(n)) => u32::try_from(n).map(Some).map_err(D::Error::custom),
        Some(Lenient::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Lenient::Text(s)) => s.trim().parse().map(Some).map_err(D::Error::custom),
        Some(Lenient::Bool(_)) => Err(D::Error::custom("expected a number")),
    }
}

fn strict_u32<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<u32, D::Error> {
    use serde::de::Error as _;
    lenient_u32(de)?.ok_or_else(|| D::Error::custom("missing number"))
}

fn lenient_bool<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Option<bool>, D::Error> {
    use serde::de::Error as _;
    match Option::<Lenient>::deserialize(de)? {
        None => Ok(None),
        Some(Lenient::Bool(b)) => Ok(Some(b)),
        Some(Lenient::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(D::Error::custom(format!("expected a boolean, got {other:?}"))),
        },
        Some(Lenient::Number(_)) => Err(D::Error::custom("expected a boolean")),
    }
}

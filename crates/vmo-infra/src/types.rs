use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lease::OperationId;
use crate::spec::InstanceSpec;
use crate::{Error, Result};

/// Opaque control-plane server identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle phase as reported by the control plane.
///
/// Only ever derived from a fresh observation, never inferred from the
/// return value of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecyclePhase {
    Pending,
    Running,
    Stopping,
    Stopped,
    Rebooting,
    Terminated,
    /// Externally reported error state; the reason is in the tag set.
    Suspended,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Rebooting => "REBOOTING",
            Self::Terminated => "TERMINATED",
            Self::Suspended => "SUSPENDED",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture of an image or instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    I32,
    I64,
}

impl Architecture {
    pub const ALL: [Architecture; 2] = [Architecture::I64, Architecture::I32];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
        }
    }

    /// Guess from an operating system display name such as `"UBUNTU10/64"`.
    pub fn guess(os_display_name: &str) -> Option<Self> {
        if os_display_name.contains("64") {
            Some(Self::I64)
        } else if os_display_name.contains("32") {
            Some(Self::I32)
        } else {
            None
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "i32" => Ok(Self::I32),
            "i64" => Ok(Self::I64),
            other => Err(Error::InvalidConfig(format!("unknown architecture: {other}"))),
        }
    }
}

/// Hardware and status facts the control plane reports about a server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstanceTags {
    pub cpu_count: Option<u32>,
    pub memory_mb: Option<u32>,
    /// Disk sizes in GB ordered by SCSI id; index 0 is the OS disk.
    pub disks_gb: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// One read of a server's state. Produced fresh by every query and
/// replaced, never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceObservation {
    pub id: InstanceId,
    pub name: String,
    pub description: String,
    pub region_id: Option<String>,
    pub vlan_id: Option<String>,
    pub image_id: Option<String>,
    pub phase: LifecyclePhase,
    pub tags: InstanceTags,
    pub spec: Option<InstanceSpec>,
    pub platform: Option<String>,
    pub architecture: Option<Architecture>,
    pub public_addresses: Vec<String>,
    pub private_addresses: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// An observation handed back to a caller, plus whatever the operation
/// that produced it attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instance {
    #[serde(flatten)]
    pub observation: InstanceObservation,
    /// Bootstrap credential; only set on the result of a launch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_password: Option<String>,
    /// Background operation still converging this instance, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationId>,
}

impl Instance {
    pub fn id(&self) -> &InstanceId {
        &self.observation.id
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.observation.phase
    }
}

impl From<InstanceObservation> for Instance {
    fn from(observation: InstanceObservation) -> Self {
        Self {
            observation,
            root_password: None,
            operation: None,
        }
    }
}

/// Machine image as resolved through the image catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub id: String,
    pub name: String,
    /// Native CPU count the image deploys with, when declared.
    pub cpu_count: Option<u32>,
    /// Native memory the image deploys with, when declared.
    pub memory_mb: Option<u32>,
    pub platform: String,
    pub architecture: Architecture,
}

impl ImageDescriptor {
    pub fn matches(&self, cpu_count: u32, memory_mb: u32) -> bool {
        self.cpu_count == Some(cpu_count) && self.memory_mb == Some(memory_mb)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Region {
    pub id: String,
    pub name: String,
}

/// Per-region ceiling on what a single server may be sized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComputeLimits {
    pub max_cpu: u32,
    pub max_ram_mb: u32,
}

/// A purchasable CPU/RAM configuration, identified by `"cpu:ram"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub cpu_count: u32,
    pub ram_mb: u32,
    pub root_volume_gb: u32,
    pub architecture: Architecture,
}

/// Lightweight status row returned by [`crate::VmOrchestrator::list_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceStatus {
    pub id: InstanceId,
    pub phase: LifecyclePhase,
}

/// Classification of the destroy command's result code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationResultCode {
    Success,
    NotFound,
    Unauthorized,
    /// The server is referenced by another resource (e.g. a load balancer
    /// real-server) and must be detached by the caller first.
    AttachedToDependent,
    Unknown(Option<String>),
}

impl TerminationResultCode {
    pub fn classify(code: Option<&str>) -> Self {
        match code {
            Some("REASON_0") => Self::Success,
            Some("REASON_395") => Self::NotFound,
            Some("REASON_100") => Self::Unauthorized,
            Some("REASON_393") => Self::AttachedToDependent,
            other => Self::Unknown(other.map(str::to_string)),
        }
    }

    /// Fatal codes end termination immediately without retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::Unauthorized | Self::AttachedToDependent
        )
    }
}

impl fmt::Display for TerminationResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("REASON_0 (success)"),
            Self::NotFound => f.write_str("REASON_395 (server not found)"),
            Self::Unauthorized => f.write_str("REASON_100 (illegal access)"),
            Self::AttachedToDependent => {
                f.write_str("REASON_393 (associated with a load balancer real-server)")
            }
            Self::Unknown(Some(code)) => write!(f, "{code} (unclassified)"),
            Self::Unknown(None) => f.write_str("no result code"),
        }
    }
}

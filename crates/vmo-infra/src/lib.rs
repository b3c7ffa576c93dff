//! Lifecycle orchestration for virtual machines hosted by a slow,
//! eventually consistent control plane.
//!
//! The control plane only offers synchronous request/response commands; a
//! successful response means "accepted", never "done". Everything here turns
//! that into reliable multi-step operations by re-observing state until it
//! converges, with every wait bounded by a wall-clock deadline.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod enumerate;
pub mod http;
pub mod launch;
pub mod lease;
pub mod observe;
pub mod orchestrator;
pub mod password;
pub mod plane;
pub mod products;
pub mod reconfigure;
pub mod spec;
pub mod terminate;
pub mod types;
pub mod waiter;

use std::sync::Arc;
use std::time::Duration;

pub use lease::{LeaseRegistry, OperationId, OperationKind, OperationOutcome, OperationRecord};
pub use orchestrator::{Collaborators, VmOrchestrator};
pub use spec::InstanceSpec;

use plane::Command;
use types::{InstanceId, TerminationResultCode};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed product descriptor {input:?}: {reason}")]
    MalformedSpec { input: String, reason: &'static str },

    #[error("{field} {value} is outside the accepted range {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("unsupported disk change {current:?} -> {target:?}: {reason}")]
    UnsupportedDiskDelta {
        current: Vec<u32>,
        target: Vec<u32>,
        reason: &'static str,
    },

    #[error("{command} on {resource} was rejected ({}): {detail}", .code.as_deref().unwrap_or("no result code"))]
    RemoteCallFailed {
        command: Command,
        resource: String,
        code: Option<String>,
        detail: String,
    },

    #[error("instance {instance} is no longer resolvable ({during})")]
    ResourceVanished {
        instance: InstanceId,
        during: &'static str,
    },

    #[error("terminating {instance} failed: {code}")]
    FatalTermination {
        instance: InstanceId,
        code: TerminationResultCode,
    },

    #[error("timed out after {waited:?} {operation}{}", last_error_suffix(.last_error))]
    TimedOut {
        operation: String,
        waited: Duration,
        last_error: Option<Box<Error>>,
    },

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("control plane error: {0}")]
    Plane(#[from] plane_api::Error),

    #[error("missing env var: {0}")]
    MissingEnv(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("undecodable control plane payload: {0}")]
    Decode(String),
}

fn last_error_suffix(last_error: &Option<Box<Error>>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {e})"),
        None => String::new(),
    }
}

impl Error {
    /// Whether a poll loop should keep going after this error.
    ///
    /// Transport and protocol failures are transient; input errors, fatal
    /// result codes and vanished resources end the loop.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteCallFailed { .. } | Self::Plane(_) | Self::Decode(_)
        )
    }

    /// Caller input that was rejected before any remote call was made.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::MalformedSpec { .. } | Self::OutOfRange { .. } | Self::UnsupportedDiskDelta { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Build an orchestrator talking to the control plane configured in the
/// environment.
///
/// Reads `PLANE_*` for the control plane and `VMO_*` for timing; see
/// [`config`].
pub fn build_orchestrator(leases: LeaseRegistry) -> Result<VmOrchestrator> {
    dotenvy::dotenv().ok();

    let plane_config = config::PlaneConfig::from_env()?;
    let timing = config::OrchestratorConfig::from_env()?;

    let adapter = Arc::new(http::HttpControlPlane::new(plane_api::PlaneClient::new(
        &plane_config.api_url,
        &plane_config.org_id,
        &plane_config.api_token,
    )));
    tracing::info!(
        org_id = %plane_config.org_id,
        region = ?plane_config.region,
        "control plane client ready"
    );

    let collaborators = Collaborators {
        plane: adapter.clone(),
        images: adapter.clone(),
        networks: adapter.clone(),
        addresses: adapter.clone(),
        regions: adapter,
    };

    Ok(
        VmOrchestrator::new(collaborators, timing, leases).with_placement(launch::Placement {
            region: plane_config.region,
            default_vlan: plane_config.default_vlan,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_retryable_errors() {
        let remote = Error::RemoteCallFailed {
            command: Command::Start,
            resource: "server s-1".into(),
            code: None,
            detail: "busy".into(),
        };
        assert!(remote.is_retryable());
        assert!(Error::Decode("bad page".into()).is_retryable());

        let vanished = Error::ResourceVanished {
            instance: "s-1".into(),
            during: "boot",
        };
        assert!(!vanished.is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(
            Error::MalformedSpec {
                input: "x".into(),
                reason: "bad"
            }
            .is_invalid_input()
        );
    }

    #[test]
    fn timed_out_carries_last_error() {
        let err = Error::TimedOut {
            operation: "waiting for s-1 to boot".into(),
            waited: Duration::from_secs(900),
            last_error: Some(Box::new(Error::Decode("truncated".into()))),
        };
        let msg = err.to_string();
        assert!(msg.contains("900s"), "{msg}");
        assert!(msg.contains("truncated"), "{msg}");
    }
}

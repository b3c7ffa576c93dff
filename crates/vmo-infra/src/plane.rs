//! The single remote command primitive everything else is built on.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::types::InstanceId;
use crate::{Error, Result};

/// Server commands understood by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Deploy,
    Start,
    /// Graceful shutdown.
    Shutdown,
    /// Hard power off.
    PowerOff,
    Reboot,
    Modify,
    AddLocalStorage,
    Destroy,
    /// Clean up a failed deployment so it can be destroyed.
    Clean,
    /// Query servers together with their state.
    ListWithState,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Start => "start",
            Self::Shutdown => "shutdown",
            Self::PowerOff => "poweroff",
            Self::Reboot => "reboot",
            Self::Modify => "modify",
            Self::AddLocalStorage => "addLocalStorage",
            Self::Destroy => "delete",
            Self::Clean => "clean",
            Self::ListWithState => "serverWithState",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a command targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRef {
    /// The server collection (deploy, queries).
    Servers,
    Server(InstanceId),
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Servers => f.write_str("servers"),
            Self::Server(id) => write!(f, "server {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub name: String,
    pub description: String,
    pub vlan_resource_path: String,
    pub image_id: String,
    pub location: String,
    pub administrator_password: String,
    pub is_started: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page_size: usize,
    pub page_number: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Restrict to a single server id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<InstanceId>,
    /// Newest first, pending/normal/changing servers only.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub newest_first: bool,
}

/// Typed request bodies; serialized as JSON by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CommandBody {
    Deploy(DeployRequest),
    Modify {
        #[serde(rename = "cpuCount", skip_serializing_if = "Option::is_none")]
        cpu_count: Option<u32>,
        #[serde(rename = "memory", skip_serializing_if = "Option::is_none")]
        memory_mb: Option<u32>,
    },
    AddStorage {
        #[serde(rename = "amount")]
        amount_gb: u32,
    },
    Page(PageRequest),
}

/// Structured result of one command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutcome {
    pub success: bool,
    /// Machine-readable reason code, e.g. `REASON_0`.
    pub code: Option<String>,
    pub detail: Option<String>,
    pub payload: Option<serde_json::Value>,
}

impl CommandOutcome {
    /// Turn an unsuccessful outcome into [`Error::RemoteCallFailed`].
    pub fn into_result(self, command: Command, resource: &ResourceRef) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(Error::RemoteCallFailed {
                command,
                resource: resource.to_string(),
                code: self.code,
                detail: self
                    .detail
                    .unwrap_or_else(|| "rejected without explanation".into()),
            })
        }
    }
}

/// Synchronous request/response command API of the control plane.
///
/// A successful return means the command was accepted, not that its effect
/// is observable yet.
#[async_trait]
pub trait ControlPlane: Send + Sync + 'static {
    async fn invoke(
        &self,
        command: Command,
        resource: &ResourceRef,
        body: Option<&CommandBody>,
    ) -> Result<CommandOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modify_body_omits_unchanged_fields() {
        let body = CommandBody::Modify {
            cpu_count: None,
            memory_mb: Some(8192),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({ "memory": 8192 })
        );
    }

    #[test]
    fn rejected_outcome_becomes_remote_call_failed() {
        let outcome = CommandOutcome {
            success: false,
            code: Some("REASON_10".into()),
            ..Default::default()
        };
        let err = outcome
            .into_result(Command::Start, &ResourceRef::Server("s-1".into()))
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("REASON_10"));
    }
}

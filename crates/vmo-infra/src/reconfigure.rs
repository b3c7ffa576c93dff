//! Apply CPU/RAM/disk changes to an existing server.
//!
//! The control plane takes one structural change per request, so a compound
//! target is split up: one combined CPU/RAM modify (only the changed
//! fields), wait for it to land, then at most one storage grow.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::enumerate::InstanceEnumerator;
use crate::plane::{Command, CommandBody, ControlPlane, ResourceRef};
use crate::spec::{InstanceSpec, SpecDelta, diff};
use crate::types::{InstanceId, InstanceObservation};
use crate::waiter::{PollPolicy, Tick, poll, poll_until, wait_until_deadline};
use crate::{Error, Result};

#[derive(Clone)]
pub struct ReconfigureEngine {
    plane: Arc<dyn ControlPlane>,
    enumerator: InstanceEnumerator,
    resize: PollPolicy,
    storage: PollPolicy,
}

impl ReconfigureEngine {
    pub fn new(
        plane: Arc<dyn ControlPlane>,
        enumerator: InstanceEnumerator,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            plane,
            enumerator,
            resize: config.resize,
            storage: config.storage,
        }
    }

    /// Move `id` from `current` to `target` and return a fresh observation.
    ///
    /// Input errors surface before anything is sent. Rejected resize
    /// requests are retried until the resize timeout. A storage grow that
    /// keeps failing until its timeout is logged and skipped; CPU/RAM
    /// changes already made stay in place.
    pub async fn apply(
        &self,
        id: &InstanceId,
        current: &InstanceSpec,
        target: &InstanceSpec,
    ) -> Result<InstanceObservation> {
        let delta = diff(current, target)?;
        if delta.is_empty() {
            info!(instance_id = %id, spec = %current, "spec already matches");
        }

        if delta.needs_resize() {
            self.resize(id, &delta).await?;
        }

        if let Some(size_gb) = delta.disk_append_gb {
            if !self.grow_storage(id, size_gb).await? {
                warn!(instance_id = %id, size_gb, "storage grow did not go through, continuing without it");
            }
        }

        self.enumerator
            .find(id)
            .await?
            .ok_or_else(|| Error::ResourceVanished {
                instance: id.clone(),
                during: "reconfigure",
            })
    }

    async fn resize(&self, id: &InstanceId, delta: &SpecDelta) -> Result<()> {
        info!(
            instance_id = %id,
            cpu_count = ?delta.cpu_count,
            ram_mb = ?delta.ram_mb,
            "resizing server"
        );

        // Request and confirmation share the resize budget.
        let deadline = self.resize.deadline();
        let resource = ResourceRef::Server(id.clone());
        let body = CommandBody::Modify {
            cpu_count: delta.cpu_count,
            memory_mb: delta.ram_mb,
        };
        let plane = &self.plane;

        poll_until("requesting resize", deadline, self.resize.interval, || {
            let resource = &resource;
            let body = &body;
            async move {
                plane
                    .invoke(Command::Modify, resource, Some(body))
                    .await?
                    .into_result(Command::Modify, resource)?;
                Ok(Tick::Done(()))
            }
        })
        .await?;

        let enumerator = &self.enumerator;
        wait_until_deadline(
            id,
            "waiting for resize",
            deadline,
            self.resize.interval,
            || enumerator.find(id),
            |obs| {
                obs.is_some_and(|o| {
                    delta.cpu_count.is_none_or(|cpu| o.tags.cpu_count == Some(cpu))
                        && delta.ram_mb.is_none_or(|ram| o.tags.memory_mb == Some(ram))
                })
            },
        )
        .await?;

        info!(instance_id = %id, "resize applied");
        Ok(())
    }

    /// Attach one more disk, retrying rejected requests until the storage
    /// timeout. Returns `false` if the timeout ran out.
    pub async fn grow_storage(&self, id: &InstanceId, size_gb: u32) -> Result<bool> {
        info!(instance_id = %id, size_gb, "adding local storage");

        let resource = ResourceRef::Server(id.clone());
        let body = CommandBody::AddStorage { amount_gb: size_gb };
        let plane = &self.plane;

        let attempt = poll("adding local storage", self.storage, || {
            let resource = &resource;
            let body = &body;
            async move {
                plane
                    .invoke(Command::AddLocalStorage, resource, Some(body))
                    .await?
                    .into_result(Command::AddLocalStorage, resource)?;
                Ok(Tick::Done(()))
            }
        })
        .await;

        match attempt {
            Ok(()) => Ok(true),
            Err(Error::TimedOut { last_error, .. }) => {
                warn!(
                    instance_id = %id,
                    size_gb,
                    last_error = ?last_error.map(|e| e.to_string()),
                    "gave up adding local storage"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

//! Ordered teardown of a server.
//!
//! Phases run strictly in order, each under its own deadline:
//! release public addresses, stop, wait for STOPPED, destroy (with cleanup
//! and retry on unclassified failures), then wait for the server to go away.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::catalog::AddressManager;
use crate::config::OrchestratorConfig;
use crate::enumerate::InstanceEnumerator;
use crate::plane::{Command, ControlPlane, ResourceRef};
use crate::types::{InstanceId, LifecyclePhase, TerminationResultCode};
use crate::waiter::{PollPolicy, Tick, poll, wait_until};
use crate::{Error, Result};

#[derive(Clone)]
pub struct TerminationOrchestrator {
    plane: Arc<dyn ControlPlane>,
    addresses: Arc<dyn AddressManager>,
    enumerator: InstanceEnumerator,
    release: PollPolicy,
    stop: PollPolicy,
    stopped_wait: PollPolicy,
    destroy: PollPolicy,
    destroyed_wait: PollPolicy,
}

impl TerminationOrchestrator {
    pub fn new(
        plane: Arc<dyn ControlPlane>,
        addresses: Arc<dyn AddressManager>,
        enumerator: InstanceEnumerator,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            plane,
            addresses,
            enumerator,
            release: config.release,
            stop: config.stop,
            stopped_wait: config.stopped_wait,
            destroy: config.destroy,
            destroyed_wait: config.destroyed_wait,
        }
    }

    /// Tear `id` down. A server that is already gone counts as terminated.
    ///
    /// Fails fast on a fatal destroy result code. Not seeing the server
    /// disappear after a successful destroy is only logged.
    pub async fn terminate(&self, id: &InstanceId) -> Result<()> {
        let Some(observation) = self.enumerator.find(id).await? else {
            info!(instance_id = %id, "server already gone");
            return Ok(());
        };
        info!(instance_id = %id, phase = %observation.phase, "terminating server");

        for address in &observation.public_addresses {
            self.release_address(id, address).await?;
        }

        if self.stop_server(id).await? == Progress::Finished {
            return Ok(());
        }
        if self.wait_stopped(id).await? == Progress::Finished {
            return Ok(());
        }

        self.destroy(id).await?;
        self.wait_destroyed(id).await
    }

    async fn release_address(&self, id: &InstanceId, address: &str) -> Result<()> {
        let addresses = &self.addresses;
        poll("releasing public address", self.release, || async move {
            addresses.release(address).await?;
            Ok(Tick::Done(()))
        })
        .await?;
        info!(instance_id = %id, address, "released public address");
        Ok(())
    }

    /// Issue a graceful stop once the server is RUNNING.
    async fn stop_server(&self, id: &InstanceId) -> Result<Progress> {
        let enumerator = &self.enumerator;
        let plane = &self.plane;
        let resource = ResourceRef::Server(id.clone());
        let resource = &resource;

        let outcome = poll("stopping server", self.stop, || async move {
            let Some(obs) = enumerator.find(id).await? else {
                return Ok(Tick::Done(Progress::Finished));
            };
            match obs.phase {
                LifecyclePhase::Stopped => Ok(Tick::Done(Progress::Continue)),
                LifecyclePhase::Terminated => Ok(Tick::Done(Progress::Finished)),
                LifecyclePhase::Running => {
                    info!(instance_id = %id, "requesting graceful shutdown");
                    plane
                        .invoke(Command::Shutdown, resource, None)
                        .await?
                        .into_result(Command::Shutdown, resource)?;
                    Ok(Tick::Done(Progress::Continue))
                }
                phase => {
                    info!(instance_id = %id, %phase, "waiting to be able to stop");
                    Ok(Tick::Continue)
                }
            }
        })
        .await;

        match outcome {
            Ok(progress) => Ok(progress),
            Err(Error::TimedOut { .. }) => {
                warn!(instance_id = %id, "server never became stoppable, destroying anyway");
                Ok(Progress::Continue)
            }
            Err(e) => Err(e),
        }
    }

    async fn wait_stopped(&self, id: &InstanceId) -> Result<Progress> {
        let enumerator = &self.enumerator;
        let outcome = wait_until(
            id,
            "waiting for stop",
            self.stopped_wait,
            || enumerator.find(id),
            |obs| {
                obs.is_none_or(|o| {
                    matches!(o.phase, LifecyclePhase::Stopped | LifecyclePhase::Terminated)
                })
            },
        )
        .await;

        match outcome {
            Ok(Some(obs)) if obs.phase == LifecyclePhase::Stopped => Ok(Progress::Continue),
            Ok(_) => {
                info!(instance_id = %id, "server terminated while stopping");
                Ok(Progress::Finished)
            }
            Err(Error::TimedOut { .. }) => {
                warn!(instance_id = %id, "server did not report STOPPED, destroying anyway");
                Ok(Progress::Continue)
            }
            Err(e) => Err(e),
        }
    }

    /// Destroy until accepted. Unclassified failures get a cleanup of the
    /// failed deployment after the backoff, then another attempt.
    async fn destroy(&self, id: &InstanceId) -> Result<()> {
        let plane = &self.plane;
        let resource = ResourceRef::Server(id.clone());
        let resource = &resource;
        let needs_cleanup = AtomicBool::new(false);
        let needs_cleanup = &needs_cleanup;

        poll("destroying server", self.destroy, || async move {
            if needs_cleanup.swap(false, Ordering::SeqCst) {
                clean(plane.as_ref(), id, resource).await;
            }

            let outcome = match plane.invoke(Command::Destroy, resource, None).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(instance_id = %id, error = %e, "destroy request failed, will clean up and retry");
                    needs_cleanup.store(true, Ordering::SeqCst);
                    return Err(e);
                }
            };

            let code = if outcome.success {
                TerminationResultCode::Success
            } else {
                TerminationResultCode::classify(outcome.code.as_deref())
            };

            match code {
                TerminationResultCode::Success => {
                    info!(instance_id = %id, "destroy accepted");
                    Ok(Tick::Done(()))
                }
                code if code.is_fatal() => Err(Error::FatalTermination {
                    instance: id.clone(),
                    code,
                }),
                code => {
                    warn!(
                        instance_id = %id,
                        %code,
                        detail = ?outcome.detail,
                        "destroy rejected, will clean up and retry"
                    );
                    needs_cleanup.store(true, Ordering::SeqCst);
                    Ok(Tick::Continue)
                }
            }
        })
        .await
    }

    async fn wait_destroyed(&self, id: &InstanceId) -> Result<()> {
        let enumerator = &self.enumerator;
        let outcome = wait_until(
            id,
            "waiting for destroy",
            self.destroyed_wait,
            || enumerator.find(id),
            |obs| obs.is_none_or(|o| o.phase == LifecyclePhase::Terminated),
        )
        .await;

        match outcome {
            Ok(_) => {
                info!(instance_id = %id, "server terminated");
                Ok(())
            }
            Err(Error::TimedOut { .. }) => {
                warn!(instance_id = %id, "destroy accepted but the server is still listed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    /// Go on to the next phase.
    Continue,
    /// The server is already gone.
    Finished,
}

/// Best-effort cleanup of a failed deployment.
async fn clean(plane: &dyn ControlPlane, id: &InstanceId, resource: &ResourceRef) {
    let result = match plane.invoke(Command::Clean, resource, None).await {
        Ok(outcome) => outcome.into_result(Command::Clean, resource).map(|_| ()),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => info!(instance_id = %id, "cleaned failed deployment"),
        Err(e) => warn!(instance_id = %id, error = %e, "cleanup failed"),
    }
}

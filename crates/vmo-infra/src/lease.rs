//! Supervision of background operations.
//!
//! Long launch/alter/terminate sequences run on their own tokio task while
//! holding an [`OperationLease`]. The [`LeaseRegistry`] tracks which leases
//! are live so a supervising process can wait for in-flight work before it
//! exits, and keeps a short history of finished operations so callers can
//! tell a converged operation from one that failed in the background.
//!
//! A lease grants no exclusive access to anything.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::types::InstanceId;
use crate::{Error, Result};

/// Finished operations kept for status queries.
const HISTORY_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for OperationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidConfig(format!("invalid operation id {s:?}: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Launch,
    Alter,
    Terminate,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Launch => "launch",
            Self::Alter => "alter",
            Self::Terminate => "terminate",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OperationOutcome {
    Running,
    Converged,
    Failed { reason: String },
    Cancelled,
}

impl OperationOutcome {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationRecord {
    pub id: OperationId,
    pub kind: OperationKind,
    pub instance: InstanceId,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: OperationOutcome,
}

#[derive(Default)]
struct Ledger {
    live: HashMap<OperationId, OperationRecord>,
    history: VecDeque<OperationRecord>,
}

struct Shared {
    ledger: Mutex<Ledger>,
    live_count: watch::Sender<usize>,
    cancel: watch::Sender<bool>,
}

impl Shared {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, id: OperationId, outcome: OperationOutcome) {
        {
            let mut ledger = self.ledger();
            if let Some(mut record) = ledger.live.remove(&id) {
                record.finished_at = Some(Utc::now());
                record.outcome = outcome;
                ledger.history.push_back(record);
                while ledger.history.len() > HISTORY_LIMIT {
                    ledger.history.pop_front();
                }
            }
        }
        self.live_count.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Cloneable handle over the set of live background operations.
#[derive(Clone)]
pub struct LeaseRegistry {
    shared: Arc<Shared>,
}

impl Default for LeaseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                ledger: Mutex::new(Ledger::default()),
                live_count: watch::Sender::new(0),
                cancel: watch::Sender::new(false),
            }),
        }
    }

    /// Take a lease for an operation about to start.
    pub fn acquire(&self, kind: OperationKind, instance: InstanceId) -> OperationLease {
        let id = OperationId::new();
        let record = OperationRecord {
            id,
            kind,
            instance,
            started_at: Utc::now(),
            finished_at: None,
            outcome: OperationOutcome::Running,
        };
        self.shared.ledger().live.insert(id, record);
        self.shared.live_count.send_modify(|n| *n += 1);

        OperationLease {
            id,
            shared: self.shared.clone(),
            settled: false,
        }
    }

    /// Run `work` on its own task under a fresh lease.
    ///
    /// The outcome is recorded when the task ends; failures are logged and
    /// kept in the registry but not returned anywhere else. Once
    /// [`shutdown`](Self::shutdown) gives up waiting, the task is dropped at
    /// its next suspension point and recorded as cancelled.
    pub fn spawn<F>(&self, kind: OperationKind, instance: InstanceId, work: F) -> OperationId
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let lease = self.acquire(kind, instance.clone());
        let id = lease.id();
        let mut cancel = self.shared.cancel.subscribe();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = work => match result {
                    Ok(()) => {
                        info!(operation_id = %id, %kind, instance_id = %instance, "background operation converged");
                        OperationOutcome::Converged
                    }
                    Err(e) => {
                        error!(operation_id = %id, %kind, instance_id = %instance, error = %e, "background operation failed");
                        OperationOutcome::Failed { reason: e.to_string() }
                    }
                },
                _ = cancel.wait_for(|cancelled| *cancelled) => {
                    warn!(operation_id = %id, %kind, instance_id = %instance, "background operation cancelled");
                    OperationOutcome::Cancelled
                }
            };
            lease.finish(outcome);
        });

        id
    }

    pub fn live_count(&self) -> usize {
        *self.shared.live_count.borrow()
    }

    /// Live operations first (oldest first), then finished ones (newest first).
    pub fn snapshot(&self) -> Vec<OperationRecord> {
        let ledger = self.shared.ledger();
        let mut live: Vec<OperationRecord> = ledger.live.values().cloned().collect();
        live.sort_by_key(|r| r.started_at);
        live.extend(ledger.history.iter().rev().cloned());
        live
    }

    pub fn status(&self, id: OperationId) -> Option<OperationRecord> {
        let ledger = self.shared.ledger();
        ledger
            .live
            .get(&id)
            .or_else(|| ledger.history.iter().rev().find(|r| r.id == id))
            .cloned()
    }

    /// Resolves once no lease is outstanding.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.live_count.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Wait up to `grace` for outstanding work, then cancel what is left and
    /// wait for those leases to be released.
    pub async fn shutdown(&self, grace: Duration) {
        let live = self.live_count();
        if live == 0 {
            return;
        }

        info!(live, grace_secs = grace.as_secs(), "waiting for background operations");
        if tokio::time::timeout(grace, self.wait_idle()).await.is_ok() {
            info!("background operations drained");
            return;
        }

        warn!(remaining = self.live_count(), "grace period elapsed, cancelling background operations");
        self.shared.cancel.send_replace(true);
        self.wait_idle().await;
    }
}

/// Guard held for the whole of one background operation.
///
/// Dropping it releases the lease on every exit path. A lease dropped
/// without [`finish`](Self::finish), e.g. because its task panicked, is
/// recorded as failed.
pub struct OperationLease {
    id: OperationId,
    shared: Arc<Shared>,
    settled: bool,
}

impl OperationLease {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn finish(mut self, outcome: OperationOutcome) {
        self.settled = true;
        self.shared.release(self.id, outcome);
    }
}

impl Drop for OperationLease {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.release(
                self.id,
                OperationOutcome::Failed {
                    reason: "operation ended without reporting an outcome".into(),
                },
            );
        }
    }
}

//! Bounded-time polling, shared by every multi-step operation.
//!
//! Deadlines are computed once at loop entry on the monotonic clock, so a
//! slow refresh call eats into the budget instead of extending it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::types::{InstanceId, InstanceObservation};
use crate::{Error, Result};

/// How long to keep polling and how long to sleep between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollPolicy {
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub fn deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }
}

/// Result of one poll attempt.
#[derive(Debug)]
pub enum Tick<T> {
    Done(T),
    Continue,
}

/// Run `tick` until it reports [`Tick::Done`] or `policy.timeout` elapses.
///
/// Retryable errors are logged and remembered; the last one is attached to
/// the [`Error::TimedOut`] returned when the deadline passes. Any other
/// error ends the loop immediately.
pub async fn poll<T, F, Fut>(operation: &str, policy: PollPolicy, tick: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Tick<T>>>,
{
    poll_until(operation, policy.deadline(), policy.interval, tick).await
}

/// Like [`poll`], but against a deadline shared with other phases.
pub async fn poll_until<T, F, Fut>(
    operation: &str,
    deadline: Instant,
    interval: Duration,
    mut tick: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Tick<T>>>,
{
    let started = Instant::now();
    let mut last_error: Option<Error> = None;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match tick().await {
            Ok(Tick::Done(value)) => {
                debug!(operation, attempt, "converged");
                return Ok(value);
            }
            Ok(Tick::Continue) => {}
            Err(e) if e.is_retryable() => {
                warn!(operation, attempt, error = %e, "poll attempt failed, retrying");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::TimedOut {
                operation: operation.to_string(),
                waited: now - started,
                last_error: last_error.map(Box::new),
            });
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Re-observe an instance until `predicate` accepts the observation.
///
/// `refresh` returning `None` means the instance is gone. That ends the
/// wait with [`Error::ResourceVanished`] unless `predicate(None)` accepts
/// absence, in which case `Ok(None)` is returned.
pub async fn wait_until<F, Fut, P>(
    instance: &InstanceId,
    operation: &'static str,
    policy: PollPolicy,
    refresh: F,
    predicate: P,
) -> Result<Option<InstanceObservation>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<InstanceObservation>>>,
    P: Fn(Option<&InstanceObservation>) -> bool,
{
    wait_until_deadline(
        instance,
        operation,
        policy.deadline(),
        policy.interval,
        refresh,
        predicate,
    )
    .await
}

pub async fn wait_until_deadline<F, Fut, P>(
    instance: &InstanceId,
    operation: &'static str,
    deadline: Instant,
    interval: Duration,
    mut refresh: F,
    predicate: P,
) -> Result<Option<InstanceObservation>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<InstanceObservation>>>,
    P: Fn(Option<&InstanceObservation>) -> bool,
{
    let predicate = &predicate;
    let label = format!("{operation} for {instance}");

    poll_until(&label, deadline, interval, || {
        let observed = refresh();
        async move {
            let observed = observed.await?;
            if predicate(observed.as_ref()) {
                return Ok(Tick::Done(observed));
            }
            match observed {
                Some(obs) => {
                    debug!(instance_id = %instance, phase = %obs.phase, "{operation}: not yet");
                    Ok(Tick::Continue)
                }
                None => Err(Error::ResourceVanished {
                    instance: instance.clone(),
                    during: operation,
                }),
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::plane::Command;
    use crate::types::{InstanceTags, LifecyclePhase};

    const POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(60), Duration::from_secs(10));

    fn observation(phase: LifecyclePhase) -> InstanceObservation {
        InstanceObservation {
            id: "s-1".into(),
            name: "web".into(),
            description: "web".into(),
            region_id: None,
            vlan_id: None,
            image_id: None,
            phase,
            tags: InstanceTags::default(),
            spec: None,
            platform: None,
            architecture: None,
            public_addresses: Vec::new(),
            private_addresses: Vec::new(),
            created_at: None,
        }
    }

    fn transient() -> Error {
        Error::RemoteCallFailed {
            command: Command::ListWithState,
            resource: "servers".into(),
            code: Some("REASON_500".into()),
            detail: "busy".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_after_exactly_n_polls() {
        let calls = AtomicU32::new(0);
        let value = poll("counting", POLICY, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(if n == 3 { Tick::Done(n) } else { Tick::Continue }) }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_the_deadline_never_earlier() {
        let start = Instant::now();
        let err = poll::<(), _, _>("never", POLICY, || async { Ok(Tick::Continue) })
            .await
            .unwrap_err();

        assert!(Instant::now() - start >= POLICY.timeout);
        match err {
            Error::TimedOut {
                waited, last_error, ..
            } => {
                assert!(waited >= POLICY.timeout);
                assert!(last_error.is_none());
            }
            other => panic!("expected TimedOut, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_and_reported_on_timeout() {
        let calls = AtomicU32::new(0);
        let value = poll("flaky", POLICY, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient())
                } else {
                    Ok(Tick::Done("ok"))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, "ok");

        let err = poll::<(), _, _>("always failing", POLICY, || async { Err(transient()) })
            .await
            .unwrap_err();
        match err {
            Error::TimedOut { last_error, .. } => {
                assert!(matches!(
                    last_error.as_deref(),
                    Some(Error::RemoteCallFailed { .. })
                ));
            }
            other => panic!("expected TimedOut, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_end_the_loop_immediately() {
        let calls = AtomicU32::new(0);
        let err = poll::<(), _, _>("fatal", POLICY, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Cancelled) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_instance_is_terminal_unless_accepted() {
        let id = InstanceId::from("s-1");
        let seen = Arc::new(AtomicU32::new(0));

        let refresh = || {
            let seen = seen.clone();
            async move {
                Ok(match seen.fetch_add(1, Ordering::SeqCst) {
                    0 => Some(observation(LifecyclePhase::Stopping)),
                    _ => None,
                })
            }
        };
        let err = wait_until(&id, "waiting for stop", POLICY, refresh, |obs| {
            obs.is_some_and(|o| o.phase == LifecyclePhase::Stopped)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ResourceVanished { during: "waiting for stop", .. }));

        seen.store(0, Ordering::SeqCst);
        let gone = wait_until(&id, "waiting for destroy", POLICY, refresh, |obs| {
            obs.is_none_or(|o| o.phase == LifecyclePhase::Terminated)
        })
        .await
        .unwrap();
        assert!(gone.is_none());
    }
}

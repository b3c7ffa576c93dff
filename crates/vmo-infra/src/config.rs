//! Environment configuration.
//!
//! `PlaneConfig` covers where the control plane lives; `OrchestratorConfig`
//! covers how long each phase may take. Every timing knob is in seconds.

use std::env;
use std::time::Duration;

use crate::waiter::PollPolicy;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct PlaneConfig {
    pub api_url: String,
    pub api_token: String,
    pub org_id: String,
    /// Region launches go to when none is given; first listed when unset.
    pub region: Option<String>,
    /// VLAN launches go to when none is given.
    pub default_vlan: Option<String>,
}

impl PlaneConfig {
    /// Read `PLANE_API_URL`, `PLANE_API_TOKEN`, `PLANE_ORG_ID` (required),
    /// `PLANE_REGION` and `PLANE_DEFAULT_VLAN` (optional).
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_url: required("PLANE_API_URL")?,
            api_token: required("PLANE_API_TOKEN")?,
            org_id: required("PLANE_ORG_ID")?,
            region: optional("PLANE_REGION"),
            default_vlan: optional("PLANE_DEFAULT_VLAN"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Waiting for a launched server to reach RUNNING.
    pub boot: PollPolicy,
    /// Waiting for a CPU/RAM change to show up.
    pub resize: PollPolicy,
    /// Retrying a storage grow request.
    pub storage: PollPolicy,
    /// Locating a freshly deployed server by name and VLAN.
    pub resolve: PollPolicy,
    /// Releasing public addresses before teardown.
    pub release: PollPolicy,
    /// Termination phase that stops a running server.
    pub stop: PollPolicy,
    /// Termination phase that waits for STOPPED.
    pub stopped_wait: PollPolicy,
    /// Destroy loop; the interval is the backoff before cleanup and retry.
    pub destroy: PollPolicy,
    /// Waiting for a destroyed server to disappear.
    pub destroyed_wait: PollPolicy,
    pub product_cache_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let poll = secs(30);
        Self {
            boot: PollPolicy::new(secs(15 * 60), secs(15)),
            resize: PollPolicy::new(secs(90 * 60), poll),
            storage: PollPolicy::new(secs(20 * 60), poll),
            resolve: PollPolicy::new(secs(2 * 60), secs(15)),
            release: PollPolicy::new(secs(2 * 60), poll),
            stop: PollPolicy::new(secs(20 * 60), poll),
            stopped_wait: PollPolicy::new(secs(10 * 60), poll),
            destroy: PollPolicy::new(secs(10 * 60), poll),
            destroyed_wait: PollPolicy::new(secs(10 * 60), poll),
            product_cache_ttl: secs(24 * 60 * 60),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by `VMO_*_SECS` variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let get = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| Error::InvalidConfig(format!("{key} must be a whole number of seconds, got {raw:?}"))),
                None => Ok(default),
            }
        };

        let poll = get("VMO_POLL_INTERVAL_SECS", d.stop.interval)?;
        let destroy_timeout = get("VMO_DESTROY_TIMEOUT_SECS", d.destroy.timeout)?;
        let config = Self {
            boot: PollPolicy::new(
                get("VMO_BOOT_TIMEOUT_SECS", d.boot.timeout)?,
                get("VMO_BOOT_INTERVAL_SECS", d.boot.interval)?,
            ),
            resize: PollPolicy::new(get("VMO_RESIZE_TIMEOUT_SECS", d.resize.timeout)?, poll),
            storage: PollPolicy::new(get("VMO_STORAGE_TIMEOUT_SECS", d.storage.timeout)?, poll),
            resolve: PollPolicy::new(
                get("VMO_RESOLVE_TIMEOUT_SECS", d.resolve.timeout)?,
                get("VMO_BOOT_INTERVAL_SECS", d.resolve.interval)?,
            ),
            release: PollPolicy::new(get("VMO_RELEASE_TIMEOUT_SECS", d.release.timeout)?, poll),
            stop: PollPolicy::new(get("VMO_STOP_TIMEOUT_SECS", d.stop.timeout)?, poll),
            stopped_wait: PollPolicy::new(get("VMO_STOPPED_WAIT_SECS", d.stopped_wait.timeout)?, poll),
            destroy: PollPolicy::new(
                destroy_timeout,
                get("VMO_DESTROY_BACKOFF_SECS", d.destroy.interval)?,
            ),
            destroyed_wait: PollPolicy::new(destroy_timeout, poll),
            product_cache_ttl: get("VMO_PRODUCT_CACHE_SECS", d.product_cache_ttl)?,
        };

        if config.boot.interval.is_zero() || poll.is_zero() || config.destroy.interval.is_zero() {
            return Err(Error::InvalidConfig("poll intervals must be at least one second".into()));
        }
        Ok(config)
    }
}

const fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn required(key: &str) -> Result<String> {
    optional(key).ok_or_else(|| Error::MissingEnv(key.into()))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_phase_budgets() {
        let config = OrchestratorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.boot.timeout, Duration::from_secs(900));
        assert_eq!(config.resize.timeout, Duration::from_secs(5400));
        assert_eq!(config.storage.timeout, Duration::from_secs(1200));
        assert_eq!(config.release.timeout, Duration::from_secs(120));
        assert_eq!(config.destroy.interval, Duration::from_secs(30));
    }

    #[test]
    fn overrides_and_rejects_garbage() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("VMO_POLL_INTERVAL_SECS", "5"),
            ("VMO_DESTROY_TIMEOUT_SECS", "120"),
        ]))
        .unwrap();
        assert_eq!(config.stop.interval, Duration::from_secs(5));
        assert_eq!(config.destroyed_wait.timeout, Duration::from_secs(120));

        let err = OrchestratorConfig::from_lookup(lookup(&[("VMO_BOOT_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = OrchestratorConfig::from_lookup(lookup(&[("VMO_POLL_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}

//! Compact product descriptor codec: `"cpu:ram"` or `"cpu:ram:[d1,d2,...]"`.
//!
//! Also computes the delta between an observed and a requested spec. The
//! control plane applies one structural change per request and can only
//! grow storage by attaching a new disk, so [`diff`] refuses anything that
//! is not a CPU/RAM change plus at most one disk appended at the tail.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const CPU_RANGE: RangeInclusive<u32> = 1..=8;
pub const RAM_RANGE_MB: RangeInclusive<u32> = 1..=65536;

/// CPU, memory and attached disks of a server.
///
/// An empty disk list means "disks unspecified": it serializes as the
/// two-segment form and leaves storage untouched when used as a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceSpec {
    pub cpu_count: u32,
    pub ram_mb: u32,
    pub disks_gb: Vec<u32>,
}

impl InstanceSpec {
    pub fn new(cpu_count: u32, ram_mb: u32) -> Self {
        Self {
            cpu_count,
            ram_mb,
            disks_gb: Vec::new(),
        }
    }

    pub fn with_disks(mut self, disks_gb: impl Into<Vec<u32>>) -> Self {
        self.disks_gb = disks_gb.into();
        self
    }

    /// The `"cpu:ram"` product identifier, without disks.
    pub fn product_id(&self) -> String {
        format!("{}:{}", self.cpu_count, self.ram_mb)
    }

    /// Check CPU, RAM and disk sizes against what the control plane accepts.
    pub fn validate(&self) -> Result<()> {
        check_range("cpu", self.cpu_count, &CPU_RANGE)?;
        check_range("ram_mb", self.ram_mb, &RAM_RANGE_MB)?;
        for &disk in &self.disks_gb {
            if disk == 0 {
                return Err(Error::OutOfRange {
                    field: "disk_gb",
                    value: disk,
                    min: 1,
                    max: u32::MAX,
                });
            }
        }
        Ok(())
    }
}

fn check_range(field: &'static str, value: u32, range: &RangeInclusive<u32>) -> Result<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(Error::OutOfRange {
            field,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

fn malformed(input: &str, reason: &'static str) -> Error {
    Error::MalformedSpec {
        input: input.to_string(),
        reason,
    }
}

/// Digits only, no sign, no whitespace, no leading zeros.
fn parse_number(input: &str, raw: &str) -> Result<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(input, "expected a decimal number"));
    }
    if raw.len() > 1 && raw.starts_with('0') {
        return Err(malformed(input, "numbers must not have leading zeros"));
    }
    raw.parse::<u32>()
        .map_err(|_| malformed(input, "number does not fit in 32 bits"))
}

impl FromStr for InstanceSpec {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let parts: Vec<&str> = input.split(':').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(malformed(input, "expected cpu:ram or cpu:ram:[disks]"));
        }

        let cpu_count = parse_number(input, parts[0])?;
        let ram_mb = parse_number(input, parts[1])?;

        let mut disks_gb = Vec::new();
        if let Some(disks) = parts.get(2) {
            let inner = disks
                .strip_prefix('[')
                .and_then(|d| d.strip_suffix(']'))
                .ok_or_else(|| malformed(input, "disk list must be enclosed in brackets"))?;
            if inner.is_empty() {
                return Err(malformed(input, "disk list must not be empty"));
            }
            for raw in inner.split(',') {
                disks_gb.push(parse_number(input, raw)?);
            }
        }

        Ok(Self {
            cpu_count,
            ram_mb,
            disks_gb,
        })
    }
}

impl fmt::Display for InstanceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.cpu_count, self.ram_mb)?;
        if !self.disks_gb.is_empty() {
            let disks: Vec<String> = self.disks_gb.iter().map(u32::to_string).collect();
            write!(f, ":[{}]", disks.join(","))?;
        }
        Ok(())
    }
}

impl TryFrom<String> for InstanceSpec {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<InstanceSpec> for String {
    fn from(spec: InstanceSpec) -> Self {
        spec.to_string()
    }
}

/// What has to change to move a server from one spec to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecDelta {
    /// New CPU count, when it differs.
    pub cpu_count: Option<u32>,
    /// New memory size, when it differs.
    pub ram_mb: Option<u32>,
    /// Size of the single disk to attach, when storage grows.
    pub disk_append_gb: Option<u32>,
}

impl SpecDelta {
    pub fn cpu_changed(&self) -> bool {
        self.cpu_count.is_some()
    }

    pub fn ram_changed(&self) -> bool {
        self.ram_mb.is_some()
    }

    pub fn needs_resize(&self) -> bool {
        self.cpu_changed() || self.ram_changed()
    }

    pub fn is_empty(&self) -> bool {
        !self.needs_resize() && self.disk_append_gb.is_none()
    }
}

/// Compute the delta from `current` to `target`.
///
/// Changed CPU/RAM values are range-checked; unchanged ones are not, so
/// `diff(x, x)` is always empty.
pub fn diff(current: &InstanceSpec, target: &InstanceSpec) -> Result<SpecDelta> {
    let mut delta = SpecDelta::default();

    if target.cpu_count != current.cpu_count {
        check_range("cpu", target.cpu_count, &CPU_RANGE)?;
        delta.cpu_count = Some(target.cpu_count);
    }
    if target.ram_mb != current.ram_mb {
        check_range("ram_mb", target.ram_mb, &RAM_RANGE_MB)?;
        delta.ram_mb = Some(target.ram_mb);
    }

    delta.disk_append_gb = disk_delta(&current.disks_gb, &target.disks_gb)?;
    Ok(delta)
}

fn disk_delta(current: &[u32], target: &[u32]) -> Result<Option<u32>> {
    if target.is_empty() || target == current {
        return Ok(None);
    }

    let unsupported = |reason: &'static str| Error::UnsupportedDiskDelta {
        current: current.to_vec(),
        target: target.to_vec(),
        reason,
    };

    if !target.starts_with(current) {
        return Err(if target.len() < current.len() {
            unsupported("disks can only be added, never removed")
        } else {
            unsupported("attached disks cannot be resized or reordered")
        });
    }
    if target.len() > current.len() + 1 {
        return Err(unsupported("only one disk can be added per operation"));
    }

    let added = target[current.len()];
    if added == 0 {
        return Err(unsupported("a new disk must be at least 1 GB"));
    }
    Ok(Some(added))
}

//! Purchasable CPU/RAM configurations.

use crate::spec::{CPU_RANGE, InstanceSpec};
use crate::types::{Architecture, ComputeLimits, ProductDescriptor};

/// OS disk every product ships with.
pub const ROOT_VOLUME_GB: u32 = 10;

const GB_MB: u32 = 1024;

/// Every product a region with these limits can host.
///
/// For each CPU count, RAM starts at 1 GB (up to two CPUs) or 1 GB per CPU,
/// and grows up to 4 GB per CPU: in 1 GB steps for small servers, doubling
/// for larger ones.
pub fn product_catalog(limits: ComputeLimits, architecture: Architecture) -> Vec<ProductDescriptor> {
    let max_cpu = limits.max_cpu.min(*CPU_RANGE.end());
    let mut products = Vec::new();

    for cpu in 1..=max_cpu {
        let small = cpu <= 2;
        let mut ram_mb = if small { GB_MB } else { GB_MB * cpu };
        while ram_mb / GB_MB <= 4 * cpu && ram_mb <= limits.max_ram_mb {
            products.push(describe(cpu, ram_mb, architecture));
            ram_mb = if small { ram_mb + GB_MB } else { ram_mb * 2 };
        }
    }
    products
}

fn describe(cpu_count: u32, ram_mb: u32, architecture: Architecture) -> ProductDescriptor {
    let name = format!(
        "{cpu_count} CPU/{}GB RAM/{ROOT_VOLUME_GB}GB HD",
        ram_mb / GB_MB
    );
    ProductDescriptor {
        id: InstanceSpec::new(cpu_count, ram_mb).product_id(),
        description: format!("{name} ({architecture})"),
        name,
        cpu_count,
        ram_mb,
        root_volume_gb: ROOT_VOLUME_GB,
        architecture,
    }
}

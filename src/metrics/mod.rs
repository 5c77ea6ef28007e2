//! Node resource gauges
//!
//! The metrics loop asks a [`MetricsSampler`] for fresh CPU, memory and disk
//! readings for every registered node. Two samplers are provided:
//!
//! - [`RandomSampler`] produces simulated gauges in `[0, 100)`
//! - [`SystemSampler`] reads the control-plane host with `sysinfo`, for
//!   the node(s) registered as that host

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sysinfo::{Disks, System};

use crate::cluster::node::{Node, ResourceUsage};

/// Source of node resource gauges
pub trait MetricsSampler: Send {
    /// Called once per refresh pass, before any node is sampled and
    /// outside the registry lock
    fn refresh(&mut self) {}

    /// Gauges for `node`
    fn sample(&mut self, node: &Node) -> ResourceUsage;

    fn name(&self) -> &'static str;
}

/// Simulated gauges, uniformly random in `[0, 100)`
pub struct RandomSampler {
    rng: StdRng,
}

impl RandomSampler {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sequence, for reproducible runs
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSampler for RandomSampler {
    fn sample(&mut self, _node: &Node) -> ResourceUsage {
        ResourceUsage::new(
            self.rng.gen_range(0.0..100.0),
            self.rng.gen_range(0.0..100.0),
            self.rng.gen_range(0.0..100.0),
        )
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Real gauges of the machine the control plane runs on
///
/// Only nodes whose name or address matches one of `local_names` receive
/// host readings; every other node keeps its previous gauges.
pub struct SystemSampler {
    system: System,
    disks: Disks,
    local_names: Vec<String>,
    latest: ResourceUsage,
}

impl SystemSampler {
    pub fn new(local_names: Vec<String>) -> Self {
        Self {
            system: System::new_all(),
            disks: Disks::new_with_refreshed_list(),
            local_names,
            latest: ResourceUsage::default(),
        }
    }

    /// Names that identify this host: its hostname and loopback addresses
    pub fn for_local_host() -> Self {
        let mut names = vec![
            "localhost".to_string(),
            "127.0.0.1".to_string(),
            "::1".to_string(),
        ];
        if let Ok(host) = hostname::get() {
            names.push(host.to_string_lossy().into_owned());
        }
        Self::new(names)
    }

    fn is_local(&self, node: &Node) -> bool {
        self.local_names
            .iter()
            .any(|n| n == &node.name || n == &node.address)
    }

    /// Read the host's current gauges
    pub fn collect(&mut self) -> ResourceUsage {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();
        self.disks.refresh(true);

        let cpu_usage = self.system.global_cpu_usage() as f64;

        let total_mem = self.system.total_memory();
        let used_mem = self.system.used_memory();
        let memory_usage = if total_mem > 0 {
            (used_mem as f64 / total_mem as f64) * 100.0
        } else {
            0.0
        };

        let (total_disk, used_disk) = self
            .disks
            .iter()
            .map(|d| (d.total_space(), d.total_space().saturating_sub(d.available_space())))
            .fold((0u64, 0u64), |(t, u), (dt, du)| (t + dt, u + du));
        let disk_usage = if total_disk > 0 {
            (used_disk as f64 / total_disk as f64) * 100.0
        } else {
            0.0
        };

        ResourceUsage::new(cpu_usage, memory_usage, disk_usage)
    }
}

impl MetricsSampler for SystemSampler {
    fn refresh(&mut self) {
        self.latest = self.collect();
    }

    fn sample(&mut self, node: &Node) -> ResourceUsage {
        if self.is_local(node) {
            self.latest
        } else {
            node.usage
        }
    }

    fn name(&self) -> &'static str {
        "system"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::NodeSpec;

    fn node(name: &str, address: &str) -> Node {
        Node::from_spec(NodeSpec::new(name, address))
    }

    #[test]
    fn test_random_gauges_in_range() {
        let mut sampler = RandomSampler::new();
        let n = node("node-01", "192.168.1.100");

        for _ in 0..500 {
            let usage = sampler.sample(&n);
            for gauge in [usage.cpu_usage, usage.memory_usage, usage.disk_usage] {
                assert!((0.0..100.0).contains(&gauge), "gauge out of range: {}", gauge);
            }
        }
    }

    #[test]
    fn test_seeded_sampler_is_reproducible() {
        let n = node("node-01", "192.168.1.100");
        let mut a = RandomSampler::with_seed(9);
        let mut b = RandomSampler::with_seed(9);
        assert_eq!(a.sample(&n), b.sample(&n));
    }

    #[test]
    fn test_system_sampler_collects() {
        let mut sampler = SystemSampler::new(vec!["localhost".to_string()]);
        let usage = sampler.collect();

        assert!(usage.cpu_usage >= 0.0);
        assert!(usage.memory_usage >= 0.0);
        assert!(usage.disk_usage >= 0.0);
    }

    #[test]
    fn test_system_sampler_leaves_remote_nodes() {
        let mut sampler = SystemSampler::new(vec!["localhost".to_string()]);
        sampler.refresh();

        let mut remote = node("node-02", "10.0.0.2");
        remote.usage = ResourceUsage::new(1.0, 2.0, 3.0);
        assert_eq!(sampler.sample(&remote), ResourceUsage::new(1.0, 2.0, 3.0));

        let local = node("control-plane", "localhost");
        assert_eq!(sampler.sample(&local), sampler.latest);
    }
}

//! Scheduler - picks the node a new container is placed on
//!
//! Placement is a pure function of the node set handed in: only `Active`
//! nodes are considered, ordered by identity so that ties resolve the same
//! way on every call.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use super::node::Node;
use super::scoring::utilization_score;
use super::service::Service;

/// Errors that can occur while placing a container
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("No active nodes available for scheduling")]
    NoActiveNodes,
}

/// Placement strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStrategy {
    /// Uniform random choice among active nodes
    Random,
    /// Active node hosting the fewest containers
    Spread,
    /// Active node with the highest utilization score
    #[default]
    BinPacking,
}

/// Node selection for new containers
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    strategy: SchedulingStrategy,
}

impl Scheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Select a node for a new container of `service`
    pub fn select_node<'a>(
        &self,
        nodes: &'a [Node],
        service: &Service,
    ) -> Result<&'a Node, SchedulerError> {
        self.select_node_with_rng(nodes, service, &mut rand::thread_rng())
    }

    /// Select a node using the given source of randomness
    pub fn select_node_with_rng<'a, R: Rng + ?Sized>(
        &self,
        nodes: &'a [Node],
        service: &Service,
        rng: &mut R,
    ) -> Result<&'a Node, SchedulerError> {
        let mut candidates: Vec<&Node> = nodes.iter().filter(|n| n.is_active()).collect();
        if candidates.is_empty() {
            return Err(SchedulerError::NoActiveNodes);
        }
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        let chosen = match self.strategy {
            SchedulingStrategy::Random => candidates[rng.gen_range(0..candidates.len())],
            SchedulingStrategy::Spread => least_loaded(&candidates),
            SchedulingStrategy::BinPacking => most_utilized(&candidates),
        };

        trace!(
            service = %service.name,
            node_id = %chosen.id,
            strategy = %self.strategy,
            "Node selected"
        );
        Ok(chosen)
    }
}

/// First node (lowest id) with the minimum container count
fn least_loaded<'a>(candidates: &[&'a Node]) -> &'a Node {
    let mut best = candidates[0];
    for &node in &candidates[1..] {
        if node.container_count() < best.container_count() {
            best = node;
        }
    }
    best
}

/// First node (lowest id) with the maximum utilization score
fn most_utilized<'a>(candidates: &[&'a Node]) -> &'a Node {
    let mut best = candidates[0];
    let mut best_score = utilization_score(&best.usage);
    for &node in &candidates[1..] {
        let score = utilization_score(&node.usage);
        if score > best_score {
            best = node;
            best_score = score;
        }
    }
    best
}

impl fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulingStrategy::Random => "random",
            SchedulingStrategy::Spread => "spread",
            SchedulingStrategy::BinPacking => "bin_packing",
        };
        f.write_str(s)
    }
}

impl FromStr for SchedulingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "random" => Ok(SchedulingStrategy::Random),
            "spread" => Ok(SchedulingStrategy::Spread),
            "bin_packing" | "binpacking" => Ok(SchedulingStrategy::BinPacking),
            other => Err(format!("unknown scheduling strategy '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::{NodeSpec, NodeStatus, ResourceUsage};
    use crate::cluster::service::ServiceSpec;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn service() -> Service {
        Service::from_spec(ServiceSpec::new("web", "nginx:latest", 80))
    }

    fn node(id: &str, cpu: f64, memory: f64, containers: usize) -> Node {
        let mut node = Node::from_spec(NodeSpec::new(id, "localhost"));
        node.id = id.to_string();
        node.usage = ResourceUsage::new(cpu, memory, 0.0);
        node.containers = (0..containers).map(|i| format!("{}-c{}", id, i)).collect();
        node
    }

    #[test]
    fn test_no_nodes() {
        let scheduler = Scheduler::new(SchedulingStrategy::Random);
        assert_eq!(
            scheduler.select_node(&[], &service()).unwrap_err(),
            SchedulerError::NoActiveNodes
        );
    }

    #[test]
    fn test_only_inactive_nodes() {
        let mut a = node("a", 0.0, 0.0, 0);
        a.status = NodeStatus::Inactive;
        let mut b = node("b", 0.0, 0.0, 0);
        b.status = NodeStatus::Draining;

        for strategy in [
            SchedulingStrategy::Random,
            SchedulingStrategy::Spread,
            SchedulingStrategy::BinPacking,
        ] {
            let scheduler = Scheduler::new(strategy);
            assert!(scheduler.select_node(&[a.clone(), b.clone()], &service()).is_err());
        }
    }

    #[test]
    fn test_random_never_picks_inactive() {
        let mut nodes = vec![node("a", 0.0, 0.0, 0), node("b", 0.0, 0.0, 0), node("c", 0.0, 0.0, 0)];
        nodes[1].status = NodeStatus::Error;
        let scheduler = Scheduler::new(SchedulingStrategy::Random);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let chosen = scheduler
                .select_node_with_rng(&nodes, &service(), &mut rng)
                .unwrap();
            assert_ne!(chosen.id, "b");
        }
    }

    #[test]
    fn test_random_reaches_every_active_node() {
        let nodes = vec![node("a", 0.0, 0.0, 0), node("b", 0.0, 0.0, 0)];
        let scheduler = Scheduler::new(SchedulingStrategy::Random);
        let mut rng = StdRng::seed_from_u64(42);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            seen.insert(
                scheduler
                    .select_node_with_rng(&nodes, &service(), &mut rng)
                    .unwrap()
                    .id
                    .clone(),
            );
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_spread_picks_fewest_containers() {
        let nodes = vec![node("a", 0.0, 0.0, 3), node("b", 0.0, 0.0, 1), node("c", 0.0, 0.0, 2)];
        let scheduler = Scheduler::new(SchedulingStrategy::Spread);
        assert_eq!(scheduler.select_node(&nodes, &service()).unwrap().id, "b");
    }

    #[test]
    fn test_spread_tie_goes_to_lowest_id() {
        let nodes = vec![node("c", 0.0, 0.0, 1), node("a", 0.0, 0.0, 1), node("b", 0.0, 0.0, 1)];
        let scheduler = Scheduler::new(SchedulingStrategy::Spread);
        assert_eq!(scheduler.select_node(&nodes, &service()).unwrap().id, "a");
    }

    #[test]
    fn test_bin_packing_prefers_busiest() {
        let nodes = vec![
            node("a", 10.0, 10.0, 0),
            node("b", 90.0, 70.0, 0),
            node("c", 50.0, 50.0, 0),
        ];
        let scheduler = Scheduler::new(SchedulingStrategy::BinPacking);
        assert_eq!(scheduler.select_node(&nodes, &service()).unwrap().id, "b");
    }

    #[test]
    fn test_bin_packing_tie_goes_to_lowest_id() {
        let nodes = vec![node("z", 40.0, 60.0, 0), node("m", 60.0, 40.0, 0)];
        let scheduler = Scheduler::new(SchedulingStrategy::BinPacking);
        assert_eq!(scheduler.select_node(&nodes, &service()).unwrap().id, "m");
    }

    #[test]
    fn test_bin_packing_skips_inactive_busy_node() {
        let mut busy = node("a", 99.0, 99.0, 0);
        busy.status = NodeStatus::Inactive;
        let nodes = vec![busy, node("b", 1.0, 1.0, 0)];
        let scheduler = Scheduler::new(SchedulingStrategy::BinPacking);
        assert_eq!(scheduler.select_node(&nodes, &service()).unwrap().id, "b");
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "bin-packing".parse::<SchedulingStrategy>().unwrap(),
            SchedulingStrategy::BinPacking
        );
        assert_eq!(SchedulingStrategy::Spread.to_string(), "spread");
        assert!("best_fit".parse::<SchedulingStrategy>().is_err());
        assert_eq!(SchedulingStrategy::default(), SchedulingStrategy::BinPacking);
    }
}

//! Node utilization scoring for bin-packing placement
//!
//! The utilization score is the mean of a node's CPU and memory gauges.
//! Bin-packing prefers the node with the HIGHEST score, filling busy nodes
//! before touching idle ones. Disk usage is reported in the breakdown but
//! does not contribute.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::{Node, ResourceUsage};

/// Score of a node, with the gauges it was computed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeScore {
    pub node_id: String,

    /// Utilization score (0.0 - 100.0)
    pub score: f64,

    pub breakdown: ScoreBreakdown,

    pub calculated_at: DateTime<Utc>,
}

/// Gauges that went into a score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
}

/// `(cpu + memory) / 2`
pub fn utilization_score(usage: &ResourceUsage) -> f64 {
    (usage.cpu_usage + usage.memory_usage) / 2.0
}

/// Score a node from its current gauges
pub fn calculate_node_score(node: &Node) -> NodeScore {
    NodeScore {
        node_id: node.id.clone(),
        score: utilization_score(&node.usage),
        breakdown: ScoreBreakdown {
            cpu_usage: node.usage.cpu_usage,
            memory_usage: node.usage.memory_usage,
            disk_usage: node.usage.disk_usage,
        },
        calculated_at: Utc::now(),
    }
}

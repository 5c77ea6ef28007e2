//! Node resource - a worker machine that can host container instances
//!
//! A Node:
//! - Is registered by an operator (or at bootstrap) and receives an identity
//! - Carries a status gate; only `Active` nodes are eligible for placement
//! - Reports simulated or sampled resource gauges, refreshed by the metrics loop
//! - Keeps a weak back-reference (ids only) to the containers it hosts

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A worker node known to the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique identity, assigned on registration
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Network address where the node (and its containers) can be reached
    pub address: String,

    /// Scheduling gate
    pub status: NodeStatus,

    /// Resource gauges, as percentages
    #[serde(flatten)]
    pub usage: ResourceUsage,

    /// Labels for organizing nodes
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Last time the node's gauges were refreshed
    pub last_seen: DateTime<Utc>,

    /// Ids of the containers currently placed on this node.
    /// The owning service controls their lifecycle.
    #[serde(default)]
    pub containers: Vec<String>,
}

/// Operator-supplied description of a node to register
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Human-readable name
    pub name: String,

    /// Address where this node can be reached (e.g., "192.168.1.100")
    pub address: String,

    /// Labels for organizing nodes
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Scheduling status of a node
///
/// The core never moves a node between these on its own; an operator or
/// an external controller drives every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Node accepts new containers
    #[default]
    Active,
    /// Node is known but not accepting work
    Inactive,
    /// Node is being emptied
    Draining,
    /// Node is in a failed state
    Error,
}

/// Resource usage gauges of a node (0.0 - 100.0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceUsage {
    /// CPU utilization percentage
    #[serde(default)]
    pub cpu_usage: f64,

    /// Memory utilization percentage
    #[serde(default)]
    pub memory_usage: f64,

    /// Disk utilization percentage
    #[serde(default)]
    pub disk_usage: f64,
}

impl ResourceUsage {
    pub fn new(cpu_usage: f64, memory_usage: f64, disk_usage: f64) -> Self {
        Self {
            cpu_usage,
            memory_usage,
            disk_usage,
        }
    }
}

impl NodeSpec {
    /// Create a spec with a name and address
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            labels: HashMap::new(),
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Check the spec is usable, returning a description of the first problem
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("node name must not be empty".to_string());
        }
        if self.address.trim().is_empty() {
            return Err("node address must not be empty".to_string());
        }
        Ok(())
    }
}

impl Node {
    /// Register a node from its spec: fresh identity, `Active`, no containers
    pub fn from_spec(spec: NodeSpec) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: spec.name,
            address: spec.address,
            status: NodeStatus::Active,
            usage: ResourceUsage::default(),
            labels: spec.labels,
            last_seen: Utc::now(),
            containers: Vec::new(),
        }
    }

    /// Check if node is eligible for placement
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// Number of containers currently hosted
    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// Check whether this node hosts the given container
    pub fn hosts(&self, container_id: &str) -> bool {
        self.containers.iter().any(|c| c == container_id)
    }

    /// Record a container placed on this node (idempotent)
    pub fn attach(&mut self, container_id: &str) {
        if !self.hosts(container_id) {
            self.containers.push(container_id.to_string());
        }
    }

    /// Forget a container hosted on this node
    pub fn detach(&mut self, container_id: &str) {
        self.containers.retain(|c| c != container_id);
    }

    /// Bump last-seen, never moving it backwards
    pub fn touch(&mut self) {
        self.last_seen = self.last_seen.max(Utc::now());
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Active => "active",
            NodeStatus::Inactive => "inactive",
            NodeStatus::Draining => "draining",
            NodeStatus::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(NodeStatus::Active),
            "inactive" => Ok(NodeStatus::Inactive),
            "draining" => Ok(NodeStatus::Draining),
            "error" => Ok(NodeStatus::Error),
            other => Err(format!("unknown node status '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_from_spec() {
        let spec = NodeSpec::new("node-01", "192.168.1.100").with_label("zone", "us-west-1");
        let node = Node::from_spec(spec);

        assert_eq!(node.name, "node-01");
        assert_eq!(node.address, "192.168.1.100");
        assert_eq!(node.status, NodeStatus::Active);
        assert!(node.containers.is_empty());
        assert_eq!(node.labels.get("zone"), Some(&"us-west-1".to_string()));
    }

    #[test]
    fn test_identities_are_unique() {
        let a = Node::from_spec(NodeSpec::new("a", "10.0.0.1"));
        let b = Node::from_spec(NodeSpec::new("a", "10.0.0.1"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_attach_is_idempotent() {
        let mut node = Node::from_spec(NodeSpec::new("n", "localhost"));
        node.attach("c1");
        node.attach("c1");
        node.attach("c2");
        assert_eq!(node.container_count(), 2);

        node.detach("c1");
        assert!(!node.hosts("c1"));
        assert!(node.hosts("c2"));
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut node = Node::from_spec(NodeSpec::new("n", "localhost"));
        let future = Utc::now() + chrono::Duration::seconds(3600);
        node.last_seen = future;
        node.touch();
        assert_eq!(node.last_seen, future);
    }

    #[test]
    fn test_validate_spec() {
        assert!(NodeSpec::new("n", "10.0.0.1").validate().is_ok());
        assert!(NodeSpec::new("", "10.0.0.1").validate().is_err());
        assert!(NodeSpec::new("n", " ").validate().is_err());
    }

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!("Draining".parse::<NodeStatus>().unwrap(), NodeStatus::Draining);
        assert_eq!(NodeStatus::Inactive.to_string(), "inactive");
        assert!("gone".parse::<NodeStatus>().is_err());
    }

    #[test]
    fn test_usage_flattened_in_json() {
        let mut node = Node::from_spec(NodeSpec::new("n", "localhost"));
        node.usage = ResourceUsage::new(12.5, 40.0, 3.0);
        let json = serde_json::to_value(&node).unwrap();

        assert_eq!(json["cpu_usage"], 12.5);
        assert_eq!(json["memory_usage"], 40.0);
        assert_eq!(json["status"], "active");
    }
}

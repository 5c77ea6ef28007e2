//! Registry - the authoritative store of services and nodes
//!
//! All cluster state lives behind one `tokio::sync::RwLock`. Readers get
//! consistent snapshots; every mutation below is one critical section.
//! The registry never talks to the container runtime: callers compute a
//! plan under the lock, release it, do their I/O, then commit the result
//! with another short write.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use super::container::{Container, ContainerHealth, ContainerStatus};
use super::health_checker::ProbeResult;
use super::node::{Node, NodeStatus, ResourceUsage};
use super::service::{Service, ServiceSpec};

/// Errors returned by registry lookups
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),

    #[error("Node '{0}' not found")]
    NodeNotFound(String),
}

/// Everything the registry holds. Keyed by identity so iteration order is stable.
#[derive(Debug, Default)]
pub struct ClusterState {
    services: BTreeMap<String, Service>,
    nodes: BTreeMap<String, Node>,
}

impl ClusterState {
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services.get(id)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    fn detach_from_node(&mut self, container: &Container) {
        if let Some(node) = self.nodes.get_mut(&container.node_id) {
            node.detach(&container.id);
        }
    }
}

/// How a redeploy changes the desired state before containers are replaced
#[derive(Debug, Clone)]
pub enum DeployUpdate {
    /// Redeploy with the current desired state
    Unchanged,
    /// Replace the desired state
    Spec(ServiceSpec),
    /// Change only the replica count
    Replicas(u32),
}

/// Snapshot handed back by [`Registry::begin_deploy`]
#[derive(Debug, Clone)]
pub struct DeployPlan {
    /// Desired state to realise (containers already detached)
    pub service: Service,
    /// Generation that commits must match
    pub generation: u64,
    /// Containers detached from the service, to be stopped and removed
    pub retired: Vec<Container>,
}

/// Result of committing a freshly created container
#[derive(Debug)]
pub enum CommitOutcome {
    Committed,
    /// The placement no longer applies; the caller owns the orphan
    Discarded {
        container: Container,
        reason: DiscardReason,
    },
}

/// Why a commit was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    ServiceDeleted,
    /// A newer deploy of the service started
    Superseded,
    NodeUnavailable,
}

impl DiscardReason {
    /// Whether further placements for the same deploy are pointless
    pub fn ends_deploy(&self) -> bool {
        !matches!(self, DiscardReason::NodeUnavailable)
    }
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiscardReason::ServiceDeleted => "service deleted",
            DiscardReason::Superseded => "service redeployed",
            DiscardReason::NodeUnavailable => "node no longer active",
        };
        f.write_str(s)
    }
}

/// Counts over the whole cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub total_nodes: usize,
    pub active_nodes: usize,
    pub total_services: usize,
    pub total_containers: usize,
    pub running_containers: usize,
}

/// The registry of services and nodes
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<ClusterState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a read-only closure against a consistent snapshot
    pub async fn read<R>(&self, f: impl FnOnce(&ClusterState) -> R) -> R {
        let state = self.state.read().await;
        f(&state)
    }

    // =========================================================================
    // Services
    // =========================================================================

    /// Store a new service
    pub async fn insert_service(&self, service: Service) -> Service {
        let mut state = self.state.write().await;
        state.services.insert(service.id.clone(), service.clone());
        service
    }

    pub async fn get_service(&self, id: &str) -> Result<Service, RegistryError> {
        self.read(|state| state.services.get(id).cloned())
            .await
            .ok_or_else(|| RegistryError::ServiceNotFound(id.to_string()))
    }

    pub async fn list_services(&self) -> Vec<Service> {
        self.read(|state| state.services.values().cloned().collect())
            .await
    }

    /// Start a redeploy: apply the update, bump the generation and detach
    /// every current container from the service and from its node.
    pub async fn begin_deploy(
        &self,
        id: &str,
        update: DeployUpdate,
    ) -> Result<DeployPlan, RegistryError> {
        let mut state = self.state.write().await;
        let service = state
            .services
            .get_mut(id)
            .ok_or_else(|| RegistryError::ServiceNotFound(id.to_string()))?;

        match update {
            DeployUpdate::Unchanged => {}
            DeployUpdate::Spec(spec) => service.apply_spec(spec),
            DeployUpdate::Replicas(replicas) => service.replicas = replicas,
        }
        service.generation += 1;
        service.touch();

        let retired = std::mem::take(&mut service.containers);
        let plan = DeployPlan {
            service: service.clone(),
            generation: service.generation,
            retired,
        };

        for container in &plan.retired {
            state.detach_from_node(container);
        }

        debug!(
            service_id = %id,
            generation = plan.generation,
            retired = plan.retired.len(),
            "Deploy planned"
        );
        Ok(plan)
    }

    /// Attach a created container to its service and node, provided the
    /// service still exists at `generation` and the node is still active.
    pub async fn commit_container(&self, generation: u64, container: Container) -> CommitOutcome {
        let mut state = self.state.write().await;

        let node_ok = state
            .nodes
            .get(&container.node_id)
            .map(Node::is_active)
            .unwrap_or(false);

        let Some(service) = state.services.get_mut(&container.service_id) else {
            return CommitOutcome::Discarded {
                container,
                reason: DiscardReason::ServiceDeleted,
            };
        };
        if service.generation != generation {
            return CommitOutcome::Discarded {
                container,
                reason: DiscardReason::Superseded,
            };
        }
        if !node_ok {
            return CommitOutcome::Discarded {
                container,
                reason: DiscardReason::NodeUnavailable,
            };
        }

        let container_id = container.id.clone();
        let node_id = container.node_id.clone();
        service.containers.push(container);
        service.touch();
        if let Some(node) = state.nodes.get_mut(&node_id) {
            node.attach(&container_id);
        }
        CommitOutcome::Committed
    }

    /// Remove a service, detaching its containers from their nodes.
    /// The removed service (with its containers) is returned for teardown.
    pub async fn remove_service(&self, id: &str) -> Result<Service, RegistryError> {
        let mut state = self.state.write().await;
        let service = state
            .services
            .remove(id)
            .ok_or_else(|| RegistryError::ServiceNotFound(id.to_string()))?;
        for container in &service.containers {
            state.detach_from_node(container);
        }
        Ok(service)
    }

    /// Replace `old_id` within its service by `replacement`, or drop the
    /// reference when there is none. Returns false if the old container is
    /// no longer referenced (or the replacement's node went away), in which
    /// case nothing changes.
    pub async fn replace_container(
        &self,
        service_id: &str,
        old_id: &str,
        replacement: Option<Container>,
    ) -> bool {
        let mut state = self.state.write().await;

        if let Some(new) = &replacement {
            let node_ok = state
                .nodes
                .get(&new.node_id)
                .map(Node::is_active)
                .unwrap_or(false);
            if !node_ok {
                return false;
            }
        }

        let Some(service) = state.services.get_mut(service_id) else {
            return false;
        };
        let Some(pos) = service.containers.iter().position(|c| c.id == old_id) else {
            return false;
        };

        let old = match replacement {
            Some(new) => {
                let attach = (new.node_id.clone(), new.id.clone());
                let old = std::mem::replace(&mut service.containers[pos], new);
                service.touch();
                if let Some(node) = state.nodes.get_mut(&attach.0) {
                    node.attach(&attach.1);
                }
                old
            }
            None => {
                let old = service.containers.remove(pos);
                service.touch();
                old
            }
        };
        state.detach_from_node(&old);
        true
    }

    /// Mirror a runtime-reported status onto a container.
    /// Returns false when the container is no longer referenced.
    pub async fn record_container_status(
        &self,
        service_id: &str,
        container_id: &str,
        status: ContainerStatus,
    ) -> bool {
        let mut state = self.state.write().await;
        let Some(container) = state
            .services
            .get_mut(service_id)
            .and_then(|s| s.containers.iter_mut().find(|c| c.id == container_id))
        else {
            return false;
        };
        container.status = status;
        true
    }

    /// Fold a probe result into a container's health counters
    pub async fn record_probe(
        &self,
        service_id: &str,
        container_id: &str,
        result: ProbeResult,
        retries: u32,
    ) -> Option<ContainerHealth> {
        let mut state = self.state.write().await;
        let container = state
            .services
            .get_mut(service_id)
            .and_then(|s| s.containers.iter_mut().find(|c| c.id == container_id))?;

        let health = container.health.get_or_insert_with(ContainerHealth::default);
        health.record(result, retries);
        Some(health.clone())
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Store a new node
    pub async fn insert_node(&self, node: Node) -> Node {
        let mut state = self.state.write().await;
        state.nodes.insert(node.id.clone(), node.clone());
        node
    }

    pub async fn get_node(&self, id: &str) -> Result<Node, RegistryError> {
        self.read(|state| state.nodes.get(id).cloned())
            .await
            .ok_or_else(|| RegistryError::NodeNotFound(id.to_string()))
    }

    pub async fn list_nodes(&self) -> Vec<Node> {
        self.read(|state| state.nodes.values().cloned().collect())
            .await
    }

    pub async fn set_node_status(
        &self,
        id: &str,
        status: NodeStatus,
    ) -> Result<Node, RegistryError> {
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| RegistryError::NodeNotFound(id.to_string()))?;
        node.status = status;
        Ok(node.clone())
    }

    /// Mark a node `Draining` and return the containers it currently hosts
    pub async fn begin_node_removal(&self, id: &str) -> Result<Vec<Container>, RegistryError> {
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| RegistryError::NodeNotFound(id.to_string()))?;
        node.status = NodeStatus::Draining;

        let hosted = state
            .services
            .values()
            .flat_map(|s| s.containers.iter())
            .filter(|c| c.node_id == id)
            .cloned()
            .collect();
        Ok(hosted)
    }

    pub async fn remove_node(&self, id: &str) -> Result<Node, RegistryError> {
        let mut state = self.state.write().await;
        state
            .nodes
            .remove(id)
            .ok_or_else(|| RegistryError::NodeNotFound(id.to_string()))
    }

    /// Overwrite every node's gauges with `sample(node)` and bump last-seen.
    /// Returns the number of nodes refreshed.
    pub async fn update_node_usage(
        &self,
        mut sample: impl FnMut(&Node) -> ResourceUsage,
    ) -> usize {
        let mut state = self.state.write().await;
        for node in state.nodes.values_mut() {
            node.usage = sample(node);
            node.touch();
        }
        state.nodes.len()
    }

    // =========================================================================
    // Stats
    // =========================================================================

    pub async fn stats(&self) -> ClusterStats {
        self.read(|state| {
            let containers = state.services.values().flat_map(|s| s.containers.iter());
            let (total_containers, running_containers) =
                containers.fold((0, 0), |(total, running), c| {
                    (total + 1, running + usize::from(c.is_running()))
                });
            ClusterStats {
                total_nodes: state.nodes.len(),
                active_nodes: state.nodes.values().filter(|n| n.is_active()).count(),
                total_services: state.services.len(),
                total_containers,
                running_containers,
            }
        })
        .await
    }
}

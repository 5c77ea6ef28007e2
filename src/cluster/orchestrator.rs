//! Orchestrator - the control plane facade
//!
//! Owns the registry, scheduler, load balancer and runtime handle, and
//! exposes the service, node and selection operations used by the API.
//!
//! Mutations never hold the registry lock across runtime calls. A deploy
//! detaches the old containers and bumps the service generation under one
//! short write, tears the old containers down and creates replacements with
//! the lock released, then commits each replacement under another short
//! write. A commit against a stale generation is discarded and its
//! container torn down.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::container::Container;
use super::health_checker::{health_summary, spawn_health_loop, HealthProbe, HealthSummary};
use super::load_balancer::{LoadBalanceStrategy, LoadBalancer, LoadBalancerError, Selection};
use super::node::{Node, NodeSpec, NodeStatus};
use super::reconcile::{spawn_metrics_loop, spawn_status_sync_loop, LoopHandles};
use super::registry::{ClusterStats, CommitOutcome, DeployUpdate, Registry, RegistryError};
use super::scheduler::{Scheduler, SchedulerError, SchedulingStrategy};
use super::scoring::{calculate_node_score, NodeScore};
use super::service::{validate_port_range, Service, ServiceSpec};
use crate::metrics::MetricsSampler;
use crate::runtime::{ContainerRuntime, CreateRequest, PortBinding, RuntimeError};

/// Errors surfaced by orchestrator operations
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    NotFound(#[from] RegistryError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Scheduling(#[from] SchedulerError),

    #[error(transparent)]
    Selection(#[from] LoadBalancerError),

    #[error("Runtime {operation} failed for '{container_id}': {source}")]
    Runtime {
        operation: &'static str,
        container_id: String,
        #[source]
        source: RuntimeError,
    },
}

impl OrchestratorError {
    fn runtime(operation: &'static str, container_id: &str, source: RuntimeError) -> Self {
        Self::Runtime {
            operation,
            container_id: container_id.to_string(),
            source,
        }
    }

    /// HTTP status this error maps to
    pub fn status_code(&self) -> StatusCode {
        match self {
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::Scheduling(_) | OrchestratorError::Selection(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            OrchestratorError::Runtime { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub scheduling_strategy: SchedulingStrategy,
    pub load_balance_strategy: LoadBalanceStrategy,
    /// Grace period for stop and restart calls
    pub stop_timeout: Duration,
    /// Restart policy handed to the runtime on create
    pub restart_policy: String,
    pub metrics_interval: Duration,
    pub status_sync_interval: Duration,
    pub health_check_interval: Duration,
    /// Probe timeout for health checks that declare none
    pub default_probe_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scheduling_strategy: SchedulingStrategy::BinPacking,
            load_balance_strategy: LoadBalanceStrategy::RoundRobin,
            stop_timeout: Duration::from_secs(30),
            restart_policy: "unless-stopped".to_string(),
            metrics_interval: Duration::from_secs(30),
            status_sync_interval: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(30),
            default_probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of removing a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRemoval {
    pub node_id: String,
    /// Hosted containers, each given one recreation attempt
    pub attempted: usize,
    pub migrated: usize,
    pub failed: usize,
}

/// Cluster-wide status report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    #[serde(flatten)]
    pub stats: ClusterStats,
    pub scheduling_strategy: SchedulingStrategy,
    pub load_balance_strategy: LoadBalanceStrategy,
    pub runtime: String,
}

/// The control plane facade
pub struct Orchestrator {
    registry: Arc<Registry>,
    scheduler: Scheduler,
    load_balancer: LoadBalancer,
    runtime: Arc<dyn ContainerRuntime>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: OrchestratorConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            scheduler: Scheduler::new(config.scheduling_strategy),
            load_balancer: LoadBalancer::new(config.load_balance_strategy),
            runtime,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // =========================================================================
    // Services
    // =========================================================================

    /// Register a service and deploy its replicas
    pub async fn create_service(&self, spec: ServiceSpec) -> Result<Service, OrchestratorError> {
        spec.validate().map_err(OrchestratorError::InvalidArgument)?;

        let service = self.registry.insert_service(Service::from_spec(spec)).await;
        info!(
            service_id = %service.id,
            name = %service.name,
            replicas = service.replicas,
            "Service created"
        );

        self.deploy(&service.id, DeployUpdate::Unchanged).await
    }

    /// Replace a service's desired state and redeploy it
    pub async fn update_service(
        &self,
        id: &str,
        spec: ServiceSpec,
    ) -> Result<Service, OrchestratorError> {
        self.registry.get_service(id).await?;
        spec.validate().map_err(OrchestratorError::InvalidArgument)?;
        info!(service_id = %id, "Updating service");
        self.deploy(id, DeployUpdate::Spec(spec)).await
    }

    /// Change the replica count and redeploy
    pub async fn scale_service(&self, id: &str, replicas: i64) -> Result<Service, OrchestratorError> {
        if replicas < 0 {
            return Err(OrchestratorError::InvalidArgument(format!(
                "replica count must not be negative, got {}",
                replicas
            )));
        }
        let replicas = u32::try_from(replicas).map_err(|_| {
            OrchestratorError::InvalidArgument(format!("replica count {} is too large", replicas))
        })?;

        let current = self.registry.get_service(id).await?;
        validate_port_range(current.port, replicas).map_err(OrchestratorError::InvalidArgument)?;

        info!(service_id = %id, from = current.replicas, to = replicas, "Scaling service");
        self.deploy(id, DeployUpdate::Replicas(replicas)).await
    }

    /// Remove a service and tear down its containers
    pub async fn delete_service(&self, id: &str) -> Result<Service, OrchestratorError> {
        let removed = self.registry.remove_service(id).await?;
        for container in &removed.containers {
            self.teardown(container).await;
        }
        info!(
            service_id = %id,
            containers = removed.containers.len(),
            "Service deleted"
        );
        Ok(removed)
    }

    pub async fn get_service(&self, id: &str) -> Result<Service, OrchestratorError> {
        Ok(self.registry.get_service(id).await?)
    }

    pub async fn list_services(&self) -> Vec<Service> {
        self.registry.list_services().await
    }

    /// Replace every container of a service according to `update`.
    /// Individual replica failures are logged and skipped.
    async fn deploy(&self, id: &str, update: DeployUpdate) -> Result<Service, OrchestratorError> {
        let plan = self.registry.begin_deploy(id, update).await?;

        for old in &plan.retired {
            self.teardown(old).await;
        }

        let mut placed = 0;
        for index in 0..plan.service.replicas {
            let container = match self.launch_replica(&plan.service, index).await {
                Ok(container) => container,
                Err(e) => {
                    warn!(service_id = %id, replica = index, "Failed to create replica: {}", e);
                    continue;
                }
            };

            match self.registry.commit_container(plan.generation, container).await {
                CommitOutcome::Committed => placed += 1,
                CommitOutcome::Discarded { container, reason } => {
                    warn!(
                        service_id = %id,
                        container_id = %container.id,
                        "Discarding replica: {}",
                        reason
                    );
                    self.teardown(&container).await;
                    if reason.ends_deploy() {
                        break;
                    }
                }
            }
        }

        info!(
            service_id = %id,
            generation = plan.generation,
            placed,
            desired = plan.service.replicas,
            "Service deployed"
        );

        Ok(self.registry.get_service(id).await?)
    }

    /// Place, create, start and inspect one replica. Nothing is committed.
    async fn launch_replica(
        &self,
        service: &Service,
        index: u32,
    ) -> Result<Container, OrchestratorError> {
        let nodes = self.registry.list_nodes().await;
        let node = self.scheduler.select_node(&nodes, service)?;

        let host_port = service.replica_port(index).ok_or_else(|| {
            OrchestratorError::InvalidArgument(format!(
                "replica {} of '{}' has no port left",
                index, service.name
            ))
        })?;
        let request = CreateRequest {
            name: service.replica_name(index),
            image: service.image.clone(),
            env: service.env_vars(),
            labels: service.container_labels(),
            port: PortBinding {
                container_port: service.port,
                host_port,
            },
            restart_policy: self.config.restart_policy.clone(),
        };

        let id = self
            .runtime
            .create(&request)
            .await
            .map_err(|e| OrchestratorError::runtime("create", &request.name, e))?;

        if let Err(e) = self.runtime.start(&id).await {
            self.discard(&id).await;
            return Err(OrchestratorError::runtime("start", &id, e));
        }

        let info = match self.runtime.inspect(&id).await {
            Ok(info) => info,
            Err(e) => {
                self.discard(&id).await;
                return Err(OrchestratorError::runtime("inspect", &id, e));
            }
        };

        debug!(
            service_id = %service.id,
            container_id = %id,
            node_id = %node.id,
            port = host_port,
            "Replica created"
        );

        Ok(Container {
            id,
            service_id: service.id.clone(),
            node_id: node.id.clone(),
            name: request.name,
            image: request.image,
            status: info.status,
            port: host_port,
            ip: info.ip,
            labels: request.labels,
            created_at: Utc::now(),
            health: None,
        })
    }

    /// Stop then force-remove a container, logging failures
    async fn teardown(&self, container: &Container) {
        if let Err(e) = self.runtime.stop(&container.id, self.config.stop_timeout).await {
            warn!(container_id = %container.id, "Failed to stop container: {}", e);
        }
        self.discard(&container.id).await;
    }

    /// Force-remove a container, logging failures
    async fn discard(&self, id: &str) {
        if let Err(e) = self.runtime.remove(id, true).await {
            warn!(container_id = %id, "Failed to remove container: {}", e);
        }
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Register a node; it starts `Active`
    pub async fn add_node(&self, spec: NodeSpec) -> Result<Node, OrchestratorError> {
        spec.validate().map_err(OrchestratorError::InvalidArgument)?;
        let node = self.registry.insert_node(Node::from_spec(spec)).await;
        info!(node_id = %node.id, name = %node.name, address = %node.address, "Node added");
        Ok(node)
    }

    /// Drain and remove a node
    ///
    /// The node is marked `Draining`, then every container it hosts gets
    /// exactly one recreation attempt elsewhere. A successful replacement
    /// takes the old container's place in its service; a failed one leaves
    /// the service under-replicated. Old containers are torn down either
    /// way, and the node is removed at the end.
    pub async fn remove_node(&self, id: &str) -> Result<NodeRemoval, OrchestratorError> {
        let hosted = self.registry.begin_node_removal(id).await?;
        info!(node_id = %id, containers = hosted.len(), "Draining node");

        let mut report = NodeRemoval {
            node_id: id.to_string(),
            ..Default::default()
        };

        for old in hosted {
            report.attempted += 1;
            match self.migrate(&old).await {
                Ok(true) => report.migrated += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        node_id = %id,
                        container_id = %old.id,
                        "Failed to recreate container: {}",
                        e
                    );
                    self.registry
                        .replace_container(&old.service_id, &old.id, None)
                        .await;
                }
            }
            self.teardown(&old).await;
        }

        if let Err(e) = self.registry.remove_node(id).await {
            debug!(node_id = %id, "Node already gone: {}", e);
        }
        info!(
            node_id = %id,
            migrated = report.migrated,
            failed = report.failed,
            "Node removed"
        );
        Ok(report)
    }

    /// Recreate `old` on another node and swap it in.
    /// Ok(false) means the old container was no longer referenced.
    async fn migrate(&self, old: &Container) -> Result<bool, OrchestratorError> {
        let service = self.registry.get_service(&old.service_id).await?;
        let index = service
            .containers
            .iter()
            .position(|c| c.id == old.id)
            .unwrap_or(service.containers.len()) as u32;

        let replacement = self.launch_replica(&service, index).await?;
        let swapped = self
            .registry
            .replace_container(&old.service_id, &old.id, Some(replacement.clone()))
            .await;
        if !swapped {
            debug!(container_id = %old.id, "Container no longer referenced, discarding replacement");
            self.teardown(&replacement).await;
        }
        Ok(swapped)
    }

    /// Operator-driven status change
    pub async fn set_node_status(
        &self,
        id: &str,
        status: NodeStatus,
    ) -> Result<Node, OrchestratorError> {
        let node = self.registry.set_node_status(id, status).await?;
        info!(node_id = %id, status = %status, "Node status changed");
        Ok(node)
    }

    pub async fn get_node(&self, id: &str) -> Result<Node, OrchestratorError> {
        Ok(self.registry.get_node(id).await?)
    }

    pub async fn list_nodes(&self) -> Vec<Node> {
        self.registry.list_nodes().await
    }

    /// Bin-packing utilization score of a node
    pub async fn node_score(&self, id: &str) -> Result<NodeScore, OrchestratorError> {
        let node = self.registry.get_node(id).await?;
        Ok(calculate_node_score(&node))
    }

    // =========================================================================
    // Selection and status
    // =========================================================================

    /// Pick a running container of a service
    pub async fn select_container(&self, service_id: &str) -> Result<Selection, OrchestratorError> {
        let service = self.registry.get_service(service_id).await?;
        Ok(self.load_balancer.select_container(&service)?)
    }

    pub async fn status(&self) -> ClusterStatus {
        ClusterStatus {
            stats: self.registry.stats().await,
            scheduling_strategy: self.scheduler.strategy(),
            load_balance_strategy: self.load_balancer.strategy(),
            runtime: self.runtime.name().to_string(),
        }
    }

    pub async fn health(&self) -> HealthSummary {
        health_summary(&self.registry.list_services().await)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the metrics, status-sync and health loops
    pub fn start(
        &self,
        sampler: Box<dyn MetricsSampler>,
        probe: Arc<dyn HealthProbe>,
    ) -> LoopHandles {
        let mut loops = LoopHandles::new();
        loops.push(spawn_metrics_loop(
            self.registry.clone(),
            sampler,
            self.config.metrics_interval,
            loops.subscribe(),
        ));
        loops.push(spawn_status_sync_loop(
            self.registry.clone(),
            self.runtime.clone(),
            self.config.status_sync_interval,
            self.config.stop_timeout,
            loops.subscribe(),
        ));
        loops.push(spawn_health_loop(
            self.registry.clone(),
            probe,
            self.config.health_check_interval,
            self.config.default_probe_timeout,
            loops.subscribe(),
        ));
        info!("Reconciliation loops started");
        loops
    }

    /// Stop all loops, then stop and remove every container of every service
    pub async fn shutdown(&self, loops: LoopHandles) {
        loops.shutdown().await;

        let services = self.registry.list_services().await;
        for container in services.iter().flat_map(|s| s.containers.iter()) {
            self.teardown(container).await;
        }
        info!(services = services.len(), "Orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::container::ContainerStatus;
    use crate::cluster::service::HealthCheck;
    use crate::runtime::{RuntimeCall, SimulatedRuntime};

    async fn setup(nodes: usize) -> (Orchestrator, Arc<SimulatedRuntime>) {
        let runtime = Arc::new(SimulatedRuntime::new());
        let orchestrator = Orchestrator::new(runtime.clone(), OrchestratorConfig::default());
        for i in 0..nodes {
            orchestrator
                .add_node(NodeSpec::new(format!("node-{:02}", i), format!("10.0.0.{}", i + 1)))
                .await
                .unwrap();
        }
        (orchestrator, runtime)
    }

    fn web(replicas: u32) -> ServiceSpec {
        ServiceSpec::new("web-server", "nginx:latest", 80)
            .with_replicas(replicas)
            .with_health_check(HealthCheck::new("/health"))
    }

    #[tokio::test]
    async fn test_create_service_places_replicas() {
        let (orchestrator, runtime) = setup(2).await;
        let service = orchestrator.create_service(web(3)).await.unwrap();

        assert_eq!(service.containers.len(), 3);
        let ports: Vec<u16> = service.containers.iter().map(|c| c.port).collect();
        assert_eq!(ports, vec![80, 81, 82]);
        assert!(service.containers.iter().all(|c| c.is_running()));
        assert_eq!(runtime.container_ids().await.len(), 3);
    }

    #[tokio::test]
    async fn test_create_without_nodes_is_tolerated() {
        let (orchestrator, runtime) = setup(0).await;
        let service = orchestrator.create_service(web(2)).await.unwrap();

        assert!(service.containers.is_empty());
        assert!(runtime.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_malformed_spec() {
        let (orchestrator, _) = setup(1).await;
        let err = orchestrator
            .create_service(ServiceSpec::new("", "nginx", 80))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidArgument(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(orchestrator.list_services().await.is_empty());
    }

    #[tokio::test]
    async fn test_replica_failure_is_skipped() {
        let (orchestrator, runtime) = setup(1).await;
        runtime.fail_next_creates(1).await;

        let service = orchestrator.create_service(web(3)).await.unwrap();
        assert_eq!(service.containers.len(), 2);
    }

    #[tokio::test]
    async fn test_replica_mirrors_runtime_status() {
        let (orchestrator, runtime) = setup(1).await;
        let service = orchestrator.create_service(web(0)).await.unwrap();

        runtime.set_start_status(ContainerStatus::Exited).await;
        let scaled = orchestrator.scale_service(&service.id, 1).await.unwrap();
        assert_eq!(scaled.containers.len(), 1);
        assert_eq!(scaled.containers[0].status, ContainerStatus::Exited);
    }

    #[tokio::test]
    async fn test_scale_negative_is_invalid() {
        let (orchestrator, _) = setup(1).await;
        let service = orchestrator.create_service(web(1)).await.unwrap();

        let err = orchestrator.scale_service(&service.id, -1).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidArgument(_)));

        let unchanged = orchestrator.get_service(&service.id).await.unwrap();
        assert_eq!(unchanged.replicas, 1);
        let ids = |s: &Service| s.containers.iter().map(|c| c.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&unchanged), ids(&service));
    }

    #[tokio::test]
    async fn test_scale_unknown_service() {
        let (orchestrator, _) = setup(1).await;
        let err = orchestrator.scale_service("nope", 2).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_unknown_service_with_bad_spec_is_not_found() {
        let (orchestrator, _) = setup(1).await;
        let err = orchestrator
            .update_service("nope", ServiceSpec::new("", "nginx", 80))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_service_tears_down() {
        let (orchestrator, runtime) = setup(1).await;
        let service = orchestrator.create_service(web(2)).await.unwrap();

        orchestrator.delete_service(&service.id).await.unwrap();
        assert!(runtime.container_ids().await.is_empty());
        assert!(orchestrator.get_service(&service.id).await.is_err());
        for node in orchestrator.list_nodes().await {
            assert_eq!(node.container_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_select_container_errors() {
        let (orchestrator, _) = setup(0).await;
        let service = orchestrator.create_service(web(1)).await.unwrap();

        let err = orchestrator.select_container(&service.id).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Selection(LoadBalancerError::NoContainers(_))
        ));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_remove_node_migrates() {
        let (orchestrator, runtime) = setup(2).await;
        let service = orchestrator.create_service(web(2)).await.unwrap();
        let victim = service.containers[0].node_id.clone();
        let hosted = service
            .containers
            .iter()
            .filter(|c| c.node_id == victim)
            .count();

        let creates_before = runtime
            .count_calls(|c| matches!(c, RuntimeCall::Create(_)))
            .await;
        let report = orchestrator.remove_node(&victim).await.unwrap();
        let creates_after = runtime
            .count_calls(|c| matches!(c, RuntimeCall::Create(_)))
            .await;

        assert_eq!(report.attempted, hosted);
        assert_eq!(creates_after - creates_before, hosted);
        assert!(orchestrator.get_node(&victim).await.is_err());

        let service = orchestrator.get_service(&service.id).await.unwrap();
        assert_eq!(service.containers.len(), 2);
        assert!(service.containers.iter().all(|c| c.node_id != victim));
    }

    #[tokio::test]
    async fn test_status_report() {
        let (orchestrator, _) = setup(2).await;
        orchestrator.create_service(web(2)).await.unwrap();

        let status = orchestrator.status().await;
        assert_eq!(status.stats.total_nodes, 2);
        assert_eq!(status.stats.total_containers, 2);
        assert_eq!(status.scheduling_strategy, SchedulingStrategy::BinPacking);
        assert_eq!(status.runtime, "simulated");
    }
}

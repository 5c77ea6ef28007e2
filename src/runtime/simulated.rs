//! In-memory container runtime
//!
//! Used by `serve --runtime simulated` and by the test suites. Containers
//! move through the same states a real runtime would report, every call is
//! recorded, and failures can be injected per operation.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ContainerInspection, ContainerRuntime, CreateRequest, RuntimeError};
use crate::cluster::container::ContainerStatus;

/// A call made against the simulated runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Create(String),
    Start(String),
    Stop(String),
    Remove(String),
    Restart(String),
    Inspect(String),
}

#[derive(Debug, Clone)]
struct SimContainer {
    request: CreateRequest,
    status: ContainerStatus,
    ip: String,
}

#[derive(Debug, Default)]
struct SimState {
    containers: HashMap<String, SimContainer>,
    calls: Vec<RuntimeCall>,
    next_host: u32,
    /// Remaining create calls that fail
    failing_creates: usize,
    failing_starts: HashSet<String>,
    failing_inspects: HashSet<String>,
    failing_restarts: HashSet<String>,
    /// Status a started container reports, instead of Running
    start_status: Option<ContainerStatus>,
}

/// Runtime that keeps containers in memory
#[derive(Debug, Default)]
pub struct SimulatedRuntime {
    state: Mutex<SimState>,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    /// Make the next `count` create calls fail
    pub async fn fail_next_creates(&self, count: usize) {
        self.state.lock().await.failing_creates = count;
    }

    /// Make every start of `id` fail
    pub async fn fail_start(&self, id: &str) {
        self.state.lock().await.failing_starts.insert(id.to_string());
    }

    /// Make every inspect of `id` fail
    pub async fn fail_inspect(&self, id: &str) {
        self.state
            .lock()
            .await
            .failing_inspects
            .insert(id.to_string());
    }

    /// Make every restart of `id` fail
    pub async fn fail_restart(&self, id: &str) {
        self.state
            .lock()
            .await
            .failing_restarts
            .insert(id.to_string());
    }

    /// Started containers report `status` instead of `Running`
    pub async fn set_start_status(&self, status: ContainerStatus) {
        self.state.lock().await.start_status = Some(status);
    }

    /// Force the reported status of an existing container
    pub async fn set_status(&self, id: &str, status: ContainerStatus) -> bool {
        match self.state.lock().await.containers.get_mut(id) {
            Some(container) => {
                container.status = status;
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Every call made so far, in order
    pub async fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().await.calls.clone()
    }

    /// Number of recorded calls matching `predicate`
    pub async fn count_calls(&self, predicate: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| predicate(c))
            .count()
    }

    /// Identities of containers that currently exist
    pub async fn container_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().await.containers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.state.lock().await.containers.contains_key(id)
    }

    pub async fn status_of(&self, id: &str) -> Option<ContainerStatus> {
        self.state.lock().await.containers.get(id).map(|c| c.status)
    }

    /// The request a container was created from
    pub async fn request_of(&self, id: &str) -> Option<CreateRequest> {
        self.state
            .lock()
            .await
            .containers
            .get(id)
            .map(|c| c.request.clone())
    }
}

#[async_trait]
impl ContainerRuntime for SimulatedRuntime {
    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall::Create(request.name.clone()));

        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(RuntimeError::Injected(format!("create {}", request.name)));
        }

        let id = Uuid::new_v4().simple().to_string();
        state.next_host += 1;
        let ip = Ipv4Addr::from(u32::from(Ipv4Addr::new(172, 17, 0, 1)) + state.next_host);
        state.containers.insert(
            id.clone(),
            SimContainer {
                request: request.clone(),
                status: ContainerStatus::Created,
                ip: ip.to_string(),
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall::Start(id.to_string()));

        if state.failing_starts.contains(id) {
            return Err(RuntimeError::Injected(format!("start {}", id)));
        }
        let status = state.start_status.unwrap_or(ContainerStatus::Running);
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.status = status;
        Ok(())
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall::Stop(id.to_string()));

        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.status = ContainerStatus::Exited;
        Ok(())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall::Remove(id.to_string()));

        let running = match state.containers.get(id) {
            Some(c) => c.status == ContainerStatus::Running,
            None => return Err(RuntimeError::NotFound(id.to_string())),
        };
        if running && !force {
            return Err(RuntimeError::CommandFailed {
                command: "rm".to_string(),
                stderr: format!("container {} is running", id),
            });
        }
        state.containers.remove(id);
        Ok(())
    }

    async fn restart(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall::Restart(id.to_string()));

        if state.failing_restarts.contains(id) {
            return Err(RuntimeError::Injected(format!("restart {}", id)));
        }
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.status = ContainerStatus::Running;
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInspection, RuntimeError> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall::Inspect(id.to_string()));

        if state.failing_inspects.contains(id) {
            return Err(RuntimeError::Injected(format!("inspect {}", id)));
        }
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        Ok(ContainerInspection {
            status: container.status,
            ip: container.ip.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

//! Container runtime collaborator
//!
//! The control plane never manages processes itself; it asks a runtime to
//! create, start, stop, remove, restart and inspect containers. Two
//! implementations ship with the crate:
//!
//! - [`DockerRuntime`] drives the `docker` CLI
//! - [`SimulatedRuntime`] keeps containers in memory, with failure injection

pub mod docker;
pub mod simulated;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::container::ContainerStatus;

pub use docker::DockerRuntime;
pub use simulated::{RuntimeCall, SimulatedRuntime};

/// Errors reported by a container runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Runtime command '{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Failed to launch runtime: {0}")]
    Spawn(String),

    #[error("Unparseable runtime output: {0}")]
    Parse(String),

    #[error("Container '{0}' not found")]
    NotFound(String),

    #[error("Injected failure: {0}")]
    Injected(String),
}

/// Host-to-container port mapping (TCP)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
}

/// Everything a runtime needs to create one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub name: String,
    pub image: String,
    /// `KEY=VALUE` pairs
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub port: PortBinding,
    pub restart_policy: String,
}

/// State reported by [`ContainerRuntime::inspect`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInspection {
    pub status: ContainerStatus,
    /// May be empty when the container has no address on the default network
    pub ip: String,
}

/// Operations the control plane needs from a container runtime.
/// Every call may block on I/O and may fail.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) a container, returning its identity
    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    async fn restart(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn inspect(&self, id: &str) -> Result<ContainerInspection, RuntimeError>;

    /// Short name for logs and status output
    fn name(&self) -> &'static str;
}

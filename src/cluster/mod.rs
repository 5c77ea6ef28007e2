//! # Harbormaster Cluster Management
//!
//! A single-process control plane that keeps three collections consistent:
//!
//! - **Service**: desired workload (image, replica count, port, health check)
//! - **Node**: a worker machine that can host containers
//! - **Container**: a concrete instance of a service placed on a node
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Harbormaster Control Plane                   │
//! │                   (harbormaster serve)                       │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ API Server   │─▶│ Orchestrator │─▶│ Registry         │  │
//! │  │ :8080        │  │              │  │ (one RwLock)     │  │
//! │  └──────────────┘  └──────┬───────┘  └────────▲─────────┘  │
//! │          Scheduler / LoadBalancer │           │            │
//! │                           ▼       reconciliation loops     │
//! │                   ContainerRuntime   (metrics, status,     │
//! │                                       health)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The registry is the only shared mutable state. Runtime calls and health
//! probes always happen with the lock released.

pub mod api;
pub mod container;
pub mod health_checker;
pub mod load_balancer;
pub mod node;
pub mod orchestrator;
pub mod reconcile;
pub mod registry;
pub mod resources;
pub mod scheduler;
pub mod scoring;
pub mod service;

pub use api::{create_control_plane_router, ControlPlaneState, RouteResponse};
pub use container::{Container, ContainerHealth, ContainerStatus};
pub use health_checker::{
    HealthProbe, HealthState, HealthSummary, HttpProbe, ProbeReport, ProbeResult,
};
pub use load_balancer::{LoadBalanceStrategy, LoadBalancer, LoadBalancerError, Selection};
pub use node::{Node, NodeSpec, NodeStatus, ResourceUsage};
pub use orchestrator::{
    ClusterStatus, NodeRemoval, Orchestrator, OrchestratorConfig, OrchestratorError,
};
pub use reconcile::{LoopHandles, SyncReport};
pub use registry::{ClusterStats, Registry, RegistryError};
pub use resources::*;
pub use scheduler::{Scheduler, SchedulerError, SchedulingStrategy};
pub use scoring::{calculate_node_score, NodeScore, ScoreBreakdown};
pub use service::{HealthCheck, Service, ServiceSpec};

/// Default control plane API port
pub const CONTROL_PLANE_PORT: u16 = 8080;

//! Service resource - a named, replicated workload
//!
//! A Service is the desired state (image, replica count, port, environment,
//! labels and an optional health check) together with the containers that
//! currently realise it. Every redeploy bumps `generation`; placements made
//! against an older generation are discarded when they are committed.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::container::{Container, SERVICE_ID_LABEL, SERVICE_NAME_LABEL};

/// A named, replicated workload with its current containers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Unique identity, assigned on creation
    pub id: String,

    /// Service name, used as the container name prefix
    pub name: String,

    /// Container image reference
    pub image: String,

    /// Desired number of containers
    pub replicas: u32,

    /// Base port; replica `i` publishes `port + i`
    pub port: u16,

    /// Environment variables passed to every container
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Labels applied to every container
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Optional HTTP health check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,

    /// Containers currently realising this service, in creation order
    #[serde(default)]
    pub containers: Vec<Container>,

    /// Redeploy counter
    #[serde(default)]
    pub generation: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Desired state of a service, as submitted by an operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,

    pub image: String,

    #[serde(default = "default_replicas")]
    pub replicas: u32,

    pub port: u16,

    #[serde(default)]
    pub environment: HashMap<String, String>,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

fn default_replicas() -> u32 {
    1
}

/// HTTP health check performed against each running container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Request path, e.g. "/health"
    pub path: String,

    /// Desired probe interval in seconds (informational; the loop interval drives probing)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Per-probe timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Consecutive failures before a container is flagged unhealthy
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_retries() -> u32 {
    3
}

impl HealthCheck {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
        }
    }

    /// Probe timeout, falling back when the check carries none
    pub fn timeout_or(&self, fallback: Duration) -> Duration {
        if self.timeout_secs == 0 {
            fallback
        } else {
            Duration::from_secs(self.timeout_secs)
        }
    }
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            replicas: default_replicas(),
            port,
            environment: HashMap::new(),
            labels: HashMap::new(),
            health_check: None,
        }
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_health_check(mut self, check: HealthCheck) -> Self {
        self.health_check = Some(check);
        self
    }

    /// Check the spec is usable, returning a description of the first problem
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("service name must not be empty".to_string());
        }
        if self.image.trim().is_empty() {
            return Err("service image must not be empty".to_string());
        }
        validate_port_range(self.port, self.replicas)?;
        if let Some(check) = &self.health_check {
            if !check.path.starts_with('/') {
                return Err(format!(
                    "health check path '{}' must start with '/'",
                    check.path
                ));
            }
        }
        Ok(())
    }
}

/// Every replica publishes `port + index`, so the last one must still be a valid port
pub fn validate_port_range(port: u16, replicas: u32) -> Result<(), String> {
    let last = u32::from(port) + replicas.saturating_sub(1);
    if last > u32::from(u16::MAX) {
        return Err(format!(
            "{} replicas starting at port {} exceed the port range",
            replicas, port
        ));
    }
    Ok(())
}

impl Service {
    /// Create a service from its spec with a fresh identity and no containers
    pub fn from_spec(spec: ServiceSpec) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: spec.name,
            image: spec.image,
            replicas: spec.replicas,
            port: spec.port,
            environment: spec.environment,
            labels: spec.labels,
            health_check: spec.health_check,
            containers: Vec::new(),
            generation: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the desired state, keeping identity and containers
    pub fn apply_spec(&mut self, spec: ServiceSpec) {
        self.name = spec.name;
        self.image = spec.image;
        self.replicas = spec.replicas;
        self.port = spec.port;
        self.environment = spec.environment;
        self.labels = spec.labels;
        self.health_check = spec.health_check;
    }

    /// Bump updated-at, never moving it backwards
    pub fn touch(&mut self) {
        self.updated_at = self.updated_at.max(Utc::now());
    }

    /// Number of containers the runtime last reported as running
    pub fn running_count(&self) -> usize {
        self.containers.iter().filter(|c| c.is_running()).count()
    }

    /// Name for the replica at `index`: `{service}-{index}-{8 hex chars}`
    pub fn replica_name(&self, index: u32) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", self.name, index, &suffix[..8])
    }

    /// Port published by the replica at `index`
    pub fn replica_port(&self, index: u32) -> Option<u16> {
        u16::try_from(u32::from(self.port) + index).ok()
    }

    /// Service labels plus the ownership labels
    pub fn container_labels(&self) -> HashMap<String, String> {
        let mut labels = self.labels.clone();
        labels.insert(SERVICE_ID_LABEL.to_string(), self.id.clone());
        labels.insert(SERVICE_NAME_LABEL.to_string(), self.name.clone());
        labels
    }

    /// Environment rendered as `KEY=VALUE`, sorted for stable output
    pub fn env_vars(&self) -> Vec<String> {
        let mut vars: Vec<String> = self
            .environment
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        vars.sort();
        vars
    }
}

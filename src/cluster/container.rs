//! Container resource - one running instance of a service, placed on a node
//!
//! The runtime reports the lifecycle state; the control plane only mirrors
//! it. Transitions observed by the status-sync loop:
//!
//! ```text
//! Created -> Running -> Exited -> (restart) -> Running
//!               |
//!               +-> Paused / Restarting / Removing / Dead
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::health_checker::ProbeResult;

/// Label key carrying the owning service's identity
pub const SERVICE_ID_LABEL: &str = "harbormaster.service_id";

/// Label key carrying the owning service's name
pub const SERVICE_NAME_LABEL: &str = "harbormaster.service_name";

/// A running instance of a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// Runtime-assigned identity
    pub id: String,

    /// Owning service
    pub service_id: String,

    /// Hosting node
    pub node_id: String,

    /// Container name as given to the runtime
    pub name: String,

    /// Image the container runs
    pub image: String,

    /// Last observed lifecycle state
    pub status: ContainerStatus,

    /// Published port (base port + replica index)
    pub port: u16,

    /// IP address reported by the runtime, may be empty
    #[serde(default)]
    pub ip: String,

    /// Labels applied at creation
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Probe bookkeeping, present once the container has been probed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<ContainerHealth>,
}

/// Lifecycle states reported by the container runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

/// Health bookkeeping for a single container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerHealth {
    /// Consecutive failed probes
    pub consecutive_failures: u32,

    /// Consecutive successful probes
    pub consecutive_successes: u32,

    /// True once failures reach the service's retry threshold
    pub unhealthy: bool,

    /// Most recent probe outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe: Option<ProbeResult>,
}

impl Container {
    /// Check whether the runtime last reported this container as running
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }

    /// Address used to reach this container: its own IP, or the node's
    /// address when the runtime reported none
    pub fn reachable_host<'a>(&'a self, node_address: &'a str) -> &'a str {
        if self.ip.is_empty() {
            node_address
        } else {
            &self.ip
        }
    }
}

impl ContainerHealth {
    /// Fold one probe result into the counters.
    /// `retries` is the failure count at which the container is flagged.
    pub fn record(&mut self, result: ProbeResult, retries: u32) {
        if result.success {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
            self.unhealthy = false;
        } else {
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
            if self.consecutive_failures >= retries.max(1) {
                self.unhealthy = true;
            }
        }
        self.last_probe = Some(result);
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
        };
        f.write_str(s)
    }
}

impl FromStr for ContainerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(ContainerStatus::Created),
            "running" => Ok(ContainerStatus::Running),
            "paused" => Ok(ContainerStatus::Paused),
            "restarting" => Ok(ContainerStatus::Restarting),
            "removing" => Ok(ContainerStatus::Removing),
            "exited" => Ok(ContainerStatus::Exited),
            "dead" => Ok(ContainerStatus::Dead),
            other => Err(format!("unknown container state '{}'", other)),
        }
    }
}

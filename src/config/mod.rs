//! Control plane configuration
//!
//! A YAML or JSON file with every field defaulted, so an empty file (or no
//! file at all) yields a working control plane. CLI flags override the file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::{
    LoadBalanceStrategy, NodeSpec, OrchestratorConfig, SchedulingStrategy, ServiceSpec,
    CONTROL_PLANE_PORT,
};

/// Default config file location: ~/.harbormaster/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".harbormaster")
        .join("config.yaml")
}

/// Errors for loading and validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Which container runtime backs the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Drive the local `docker` CLI
    #[default]
    Docker,
    /// In-memory runtime, nothing is actually started
    Simulated,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeKind::Docker => write!(f, "docker"),
            RuntimeKind::Simulated => write!(f, "simulated"),
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "docker" => Ok(RuntimeKind::Docker),
            "simulated" | "sim" => Ok(RuntimeKind::Simulated),
            other => Err(format!("unknown runtime '{}'", other)),
        }
    }
}

/// Source of node resource gauges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    /// Uniform random gauges
    #[default]
    Random,
    /// Real host readings for the local node
    System,
}

/// Nodes and services registered when the control plane starts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,

    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

/// The complete configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub scheduling_strategy: SchedulingStrategy,

    #[serde(default)]
    pub load_balance_strategy: LoadBalanceStrategy,

    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    #[serde(default = "default_status_sync_interval")]
    pub status_sync_interval_secs: u64,

    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    /// Probe timeout for health checks that declare none
    #[serde(default = "default_probe_timeout")]
    pub default_probe_timeout_secs: u64,

    /// Grace period for stop and restart
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    #[serde(default = "default_restart_policy")]
    pub restart_policy: String,

    #[serde(default)]
    pub runtime: RuntimeKind,

    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    #[serde(default)]
    pub sampler: SamplerKind,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    CONTROL_PLANE_PORT
}

fn default_metrics_interval() -> u64 {
    30
}

fn default_status_sync_interval() -> u64 {
    10
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_stop_timeout() -> u64 {
    30
}

fn default_restart_policy() -> String {
    "unless-stopped".to_string()
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            scheduling_strategy: SchedulingStrategy::default(),
            load_balance_strategy: LoadBalanceStrategy::default(),
            metrics_interval_secs: default_metrics_interval(),
            status_sync_interval_secs: default_status_sync_interval(),
            health_check_interval_secs: default_health_check_interval(),
            default_probe_timeout_secs: default_probe_timeout(),
            stop_timeout_secs: default_stop_timeout(),
            restart_policy: default_restart_policy(),
            runtime: RuntimeKind::default(),
            docker_binary: default_docker_binary(),
            sampler: SamplerKind::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl ControlPlaneConfig {
    /// Reject settings the loops or the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("metrics_interval_secs", self.metrics_interval_secs),
            ("status_sync_interval_secs", self.status_sync_interval_secs),
            ("health_check_interval_secs", self.health_check_interval_secs),
            ("default_probe_timeout_secs", self.default_probe_timeout_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Invalid(format!("{} must be greater than 0", name)));
        }
        if self.runtime == RuntimeKind::Docker && self.docker_binary.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "docker_binary must not be empty".to_string(),
            ));
        }
        for spec in &self.bootstrap.nodes {
            spec.validate()
                .map_err(|e| ConfigError::Invalid(format!("bootstrap node: {}", e)))?;
        }
        for spec in &self.bootstrap.services {
            spec.validate()
                .map_err(|e| ConfigError::Invalid(format!("bootstrap service: {}", e)))?;
        }
        Ok(())
    }

    /// Settings handed to the orchestrator
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            scheduling_strategy: self.scheduling_strategy,
            load_balance_strategy: self.load_balance_strategy,
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            restart_policy: self.restart_policy.clone(),
            metrics_interval: Duration::from_secs(self.metrics_interval_secs),
            status_sync_interval: Duration::from_secs(self.status_sync_interval_secs),
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            default_probe_timeout: Duration::from_secs(self.default_probe_timeout_secs),
        }
    }
}

// ============================================================================
// Pure parsing
// ============================================================================

/// Parse config from YAML (JSON is valid YAML too)
pub fn parse_config(content: &str) -> Result<ControlPlaneConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(ControlPlaneConfig::default());
    }
    serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Parse config from JSON
pub fn parse_config_json(content: &str) -> Result<ControlPlaneConfig, ConfigError> {
    serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

// ============================================================================
// I/O boundary
// ============================================================================

/// Load a config file, choosing the parser from the extension
pub fn load_config_file(path: &Path) -> Result<ControlPlaneConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_config_json(&content)?,
        _ => parse_config(&content)?,
    };
    config.validate()?;
    Ok(config)
}

/// Load from an explicit path, or from the default location if it exists
pub fn load_config(path: Option<&Path>) -> Result<ControlPlaneConfig, ConfigError> {
    match path {
        Some(path) => load_config_file(path),
        None => {
            let default = default_config_path();
            if default.exists() {
                load_config_file(&default)
            } else {
                Ok(ControlPlaneConfig::default())
            }
        }
    }
}

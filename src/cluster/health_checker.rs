//! Active health checker for service containers
//!
//! On every tick the checker probes `http://{host}:{port}{path}` for each
//! running container of every service that declares a health check. A probe
//! succeeds only on HTTP 200. Results are folded into the container's
//! `ContainerHealth`; a container is flagged unhealthy once its consecutive
//! failures reach the check's `retries`. Flagging is observational only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::reconcile::ticker;
use super::registry::{ClusterState, Registry};
use super::service::Service;

/// Result of a single health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Whether the probe succeeded
    pub success: bool,
    /// HTTP status code (if request completed)
    pub status_code: Option<u16>,
    /// Response time in milliseconds
    pub latency_ms: u64,
    /// Timestamp of the probe
    pub timestamp: DateTime<Utc>,
    /// Error message if probe failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn failure(error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            success: false,
            status_code: None,
            latency_ms,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// Something that can probe a URL
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeResult;
}

/// HTTP GET probe
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().build()?,
        })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &str, timeout_duration: Duration) -> ProbeResult {
        let start = Instant::now();
        let result = timeout(timeout_duration, self.client.get(url).send()).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(response)) => {
                let status = response.status();
                let success = status == StatusCode::OK;
                ProbeResult {
                    success,
                    status_code: Some(status.as_u16()),
                    latency_ms,
                    timestamp: Utc::now(),
                    error: if success {
                        None
                    } else {
                        Some(format!("HTTP {}", status.as_u16()))
                    },
                }
            }
            Ok(Err(e)) => ProbeResult::failure(e.to_string(), latency_ms),
            Err(_) => ProbeResult::failure("Timeout", timeout_duration.as_millis() as u64),
        }
    }
}

/// One container to probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeTarget {
    pub service_id: String,
    pub container_id: String,
    pub url: String,
    pub timeout: Duration,
    pub retries: u32,
    /// Whether the container was already flagged when the pass started
    pub was_unhealthy: bool,
}

/// Outcome of one probing pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub probed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub newly_unhealthy: usize,
}

/// Running containers of services with a health check
pub fn collect_targets(state: &ClusterState, default_timeout: Duration) -> Vec<ProbeTarget> {
    let mut targets = Vec::new();
    for service in state.services() {
        let Some(check) = &service.health_check else {
            continue;
        };
        for container in service.containers.iter().filter(|c| c.is_running()) {
            let node_address = state
                .node(&container.node_id)
                .map(|n| n.address.as_str())
                .unwrap_or_default();
            let host = container.reachable_host(node_address);
            if host.is_empty() {
                trace!(container_id = %container.id, "No address to probe");
                continue;
            }
            targets.push(ProbeTarget {
                service_id: service.id.clone(),
                container_id: container.id.clone(),
                url: format!("http://{}:{}{}", host, container.port, check.path),
                timeout: check.timeout_or(default_timeout),
                retries: check.retries,
                was_unhealthy: container.health.as_ref().is_some_and(|h| h.unhealthy),
            });
        }
    }
    targets
}

/// Probe every target once, concurrently, and record the results
pub async fn probe_all(
    registry: &Registry,
    probe: &dyn HealthProbe,
    default_timeout: Duration,
) -> ProbeReport {
    let targets = registry
        .read(|state| collect_targets(state, default_timeout))
        .await;

    if targets.is_empty() {
        trace!("No containers to probe");
        return ProbeReport::default();
    }

    debug!("Probing {} containers", targets.len());

    let probes = targets.iter().map(|target| async move {
        let result = probe.probe(&target.url, target.timeout).await;
        (target, result)
    });
    let results = futures::future::join_all(probes).await;

    let mut report = ProbeReport {
        probed: results.len(),
        ..Default::default()
    };

    for (target, result) in results {
        if result.success {
            report.succeeded += 1;
        } else {
            report.failed += 1;
            debug!(
                container_id = %target.container_id,
                url = %target.url,
                error = ?result.error,
                "Health probe failed"
            );
        }

        let Some(health) = registry
            .record_probe(&target.service_id, &target.container_id, result, target.retries)
            .await
        else {
            continue;
        };

        if health.unhealthy && !target.was_unhealthy {
            report.newly_unhealthy += 1;
            warn!(
                service_id = %target.service_id,
                container_id = %target.container_id,
                failures = health.consecutive_failures,
                "Container is unhealthy"
            );
        }
    }

    report
}

/// Spawn the probing loop
pub fn spawn_health_loop(
    registry: Arc<Registry>,
    probe: Arc<dyn HealthProbe>,
    interval: Duration,
    default_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(interval);
        info!("Health checker started, probing every {:?}", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    let report = probe_all(&registry, probe.as_ref(), default_timeout).await;
                    trace!(?report, "Health pass complete");
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Health checker stopped");
    })
}

// ============================================================================
// Summary
// ============================================================================

/// Health of one container, as reported by the summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerHealthEntry {
    pub service_id: String,
    pub service_name: String,
    pub container_id: String,
    pub container_name: String,
    pub state: HealthState,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_probe: Option<ProbeResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    /// Not probed yet, or failing below the retry threshold
    Unknown,
}

/// Summary of container health across all services with a health check
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    pub containers: Vec<ContainerHealthEntry>,
}

impl HealthSummary {
    /// Overall status
    pub fn status(&self) -> &'static str {
        if self.total == 0 {
            "Empty"
        } else if self.unhealthy > 0 {
            "Degraded"
        } else if self.unknown > 0 {
            "Unknown"
        } else {
            "Healthy"
        }
    }
}

/// Summarise container health
pub fn health_summary(services: &[Service]) -> HealthSummary {
    let mut summary = HealthSummary::default();

    for service in services.iter().filter(|s| s.health_check.is_some()) {
        for container in &service.containers {
            let state = match &container.health {
                Some(h) if h.unhealthy => HealthState::Unhealthy,
                Some(h) if h.consecutive_successes > 0 => HealthState::Healthy,
                _ => HealthState::Unknown,
            };
            match state {
                HealthState::Healthy => summary.healthy += 1,
                HealthState::Unhealthy => summary.unhealthy += 1,
                HealthState::Unknown => summary.unknown += 1,
            }
            summary.total += 1;
            summary.containers.push(ContainerHealthEntry {
                service_id: service.id.clone(),
                service_name: service.name.clone(),
                container_id: container.id.clone(),
                container_name: container.name.clone(),
                state,
                consecutive_failures: container
                    .health
                    .as_ref()
                    .map(|h| h.consecutive_failures)
                    .unwrap_or(0),
                last_probe: container.health.as_ref().and_then(|h| h.last_probe.clone()),
            });
        }
    }

    summary
}

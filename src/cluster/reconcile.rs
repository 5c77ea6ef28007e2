//! Reconciliation loops
//!
//! Background tasks that keep the registry in step with the world:
//!
//! - metrics refresh: overwrite every node's gauges from a [`MetricsSampler`]
//! - status sync: mirror runtime-reported container states and restart
//!   containers that have exited
//!
//! The health-probe loop lives in `health_checker`. All loops share one
//! shutdown signal held by [`LoopHandles`]; each loop checks it before every
//! pass and exits promptly once it fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::container::ContainerStatus;
use super::registry::Registry;
use crate::metrics::MetricsSampler;
use crate::runtime::ContainerRuntime;

/// Interval whose first tick fires one period from now. Slow passes delay
/// the next tick instead of causing a burst.
pub fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

// ============================================================================
// Metrics refresh
// ============================================================================

/// One metrics pass: refresh the sampler, then overwrite every node's gauges
/// under a single write lock. Returns the number of nodes refreshed.
pub async fn refresh_node_metrics(registry: &Registry, sampler: &mut dyn MetricsSampler) -> usize {
    sampler.refresh();
    let refreshed = registry.update_node_usage(|node| sampler.sample(node)).await;
    trace!(refreshed, sampler = sampler.name(), "Node metrics refreshed");
    refreshed
}

/// Spawn the metrics loop
pub fn spawn_metrics_loop(
    registry: Arc<Registry>,
    mut sampler: Box<dyn MetricsSampler>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(interval);
        info!(
            "Metrics loop started, sampling ({}) every {:?}",
            sampler.name(),
            interval
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    refresh_node_metrics(&registry, sampler.as_mut()).await;
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Metrics loop stopped");
    })
}

// ============================================================================
// Status sync
// ============================================================================

/// Outcome of one status-sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub inspected: usize,
    pub inspect_failures: usize,
    pub restarts_issued: usize,
    pub restart_failures: usize,
}

/// One status-sync pass
///
/// Inspects every container without holding the lock, records each status
/// with a short write, then restarts the containers that reported `Exited`.
/// Restart outcomes are not recorded; the next pass observes them.
pub async fn sync_service_status(
    registry: &Registry,
    runtime: &dyn ContainerRuntime,
    restart_timeout: Duration,
) -> SyncReport {
    let refs: Vec<(String, String)> = registry
        .read(|state| {
            state
                .services()
                .flat_map(|s| s.containers.iter())
                .map(|c| (c.service_id.clone(), c.id.clone()))
                .collect()
        })
        .await;

    let mut report = SyncReport::default();
    let mut exited = Vec::new();

    for (service_id, container_id) in refs {
        let info = match runtime.inspect(&container_id).await {
            Ok(info) => info,
            Err(e) => {
                report.inspect_failures += 1;
                warn!(
                    service_id = %service_id,
                    container_id = %container_id,
                    "Failed to inspect container: {}",
                    e
                );
                continue;
            }
        };
        report.inspected += 1;

        let still_referenced = registry
            .record_container_status(&service_id, &container_id, info.status)
            .await;
        if still_referenced && info.status == ContainerStatus::Exited {
            exited.push((service_id, container_id));
        }
    }

    for (service_id, container_id) in exited {
        info!(
            service_id = %service_id,
            container_id = %container_id,
            "Restarting exited container"
        );
        report.restarts_issued += 1;
        if let Err(e) = runtime.restart(&container_id, restart_timeout).await {
            report.restart_failures += 1;
            warn!(
                service_id = %service_id,
                container_id = %container_id,
                "Failed to restart container: {}",
                e
            );
        }
    }

    debug!(?report, "Status sync complete");
    report
}

/// Spawn the status-sync loop
pub fn spawn_status_sync_loop(
    registry: Arc<Registry>,
    runtime: Arc<dyn ContainerRuntime>,
    interval: Duration,
    restart_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(interval);
        info!("Status sync started, checking every {:?}", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    sync_service_status(&registry, runtime.as_ref(), restart_timeout).await;
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Status sync stopped");
    })
}

// ============================================================================
// Handles
// ============================================================================

/// Running background loops and their shared shutdown signal
pub struct LoopHandles {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl LoopHandles {
    /// Create an empty set with a fresh shutdown signal
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    /// A receiver for a new loop
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every loop to stop and wait for all of them to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Background loop ended abnormally: {}", e);
            }
        }
    }
}

impl Default for LoopHandles {
    fn default() -> Self {
        Self::new()
    }
}

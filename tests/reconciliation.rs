//! Background reconciliation: metrics refresh, status sync and health probing

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{routing::get, Router};

use harbormaster::cluster::health_checker::{probe_all, ProbeResult};
use harbormaster::cluster::reconcile::{refresh_node_metrics, sync_service_status};
use harbormaster::cluster::{
    ContainerStatus, HealthCheck, HealthProbe, HealthState, HttpProbe, Node, NodeSpec,
    Orchestrator, OrchestratorConfig, ResourceUsage, ServiceSpec,
};
use harbormaster::metrics::MetricsSampler;
use harbormaster::runtime::{RuntimeCall, SimulatedRuntime};

const RESTART_TIMEOUT: Duration = Duration::from_secs(1);
const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Sampler returning the same gauges for every node
struct FixedSampler {
    usage: ResourceUsage,
    refreshes: Arc<AtomicUsize>,
}

impl MetricsSampler for FixedSampler {
    fn refresh(&mut self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }

    fn sample(&mut self, _node: &Node) -> ResourceUsage {
        self.usage
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Probe whose answers are scripted by host
#[derive(Default)]
struct ScriptedProbe {
    failing_hosts: Mutex<HashSet<String>>,
    /// Hosts that never answer; the probe gives up at its timeout
    hanging_hosts: Mutex<HashSet<String>>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    fn fail(&self, host: &str) {
        self.failing_hosts.lock().unwrap().insert(host.to_string());
    }

    fn recover(&self, host: &str) {
        self.failing_hosts.lock().unwrap().remove(host);
    }

    fn hang(&self, host: &str) {
        self.hanging_hosts.lock().unwrap().insert(host.to_string());
    }

    /// URLs requested so far, sorted
    fn requested(&self) -> Vec<String> {
        let mut urls = self.urls.lock().unwrap().clone();
        urls.sort();
        urls
    }

    fn requests_to(&self, host: &str) -> usize {
        self.urls
            .lock()
            .unwrap()
            .iter()
            .filter(|url| Self::host_of(url) == host)
            .count()
    }

    fn host_of(url: &str) -> String {
        url.trim_start_matches("http://")
            .split(':')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        let host = Self::host_of(url);

        if self.hanging_hosts.lock().unwrap().contains(&host) {
            let never = tokio::time::sleep(Duration::from_secs(3600));
            if tokio::time::timeout(timeout, never).await.is_err() {
                return ProbeResult::failure("Timeout", timeout.as_millis() as u64);
            }
        }
        if self.failing_hosts.lock().unwrap().contains(&host) {
            return ProbeResult::failure("HTTP 503", 1);
        }
        ProbeResult {
            success: true,
            status_code: Some(200),
            latency_ms: 1,
            timestamp: chrono::Utc::now(),
            error: None,
        }
    }
}

async fn cluster(nodes: usize) -> (Arc<Orchestrator>, Arc<SimulatedRuntime>) {
    let runtime = Arc::new(SimulatedRuntime::new());
    let config = OrchestratorConfig {
        metrics_interval: Duration::from_millis(20),
        status_sync_interval: Duration::from_millis(20),
        health_check_interval: Duration::from_millis(20),
        default_probe_timeout: PROBE_TIMEOUT,
        ..Default::default()
    };
    let orchestrator = Arc::new(Orchestrator::new(runtime.clone(), config));
    for i in 0..nodes {
        orchestrator
            .add_node(NodeSpec::new(format!("worker-{}", i), format!("10.0.0.{}", i + 1)))
            .await
            .unwrap();
    }
    (orchestrator, runtime)
}

fn checked(name: &str, replicas: u32, retries: u32) -> ServiceSpec {
    let mut check = HealthCheck::new("/health");
    check.retries = retries;
    ServiceSpec::new(name, "nginx:latest", 8000)
        .with_replicas(replicas)
        .with_health_check(check)
}

// ============================================================================
// Metrics refresh
// ============================================================================

#[tokio::test]
async fn test_metrics_refresh_overwrites_every_node() {
    let (orchestrator, _) = cluster(3).await;
    let mut sampler = FixedSampler {
        usage: ResourceUsage::new(55.0, 45.0, 10.0),
        refreshes: Arc::new(AtomicUsize::new(0)),
    };

    let refreshed = refresh_node_metrics(orchestrator.registry(), &mut sampler).await;
    assert_eq!(refreshed, 3);
    assert_eq!(sampler.refreshes.load(Ordering::SeqCst), 1);
    for node in orchestrator.list_nodes().await {
        assert_eq!(node.usage, ResourceUsage::new(55.0, 45.0, 10.0));
    }

    let score = orchestrator
        .node_score(&orchestrator.list_nodes().await[0].id)
        .await
        .unwrap();
    assert!((score.score - 50.0).abs() < f64::EPSILON);
}

// ============================================================================
// Status sync
// ============================================================================

#[tokio::test]
async fn test_status_sync_restarts_exited_containers() {
    let (orchestrator, runtime) = cluster(1).await;
    let service = orchestrator
        .create_service(ServiceSpec::new("web", "nginx:latest", 8000).with_replicas(3))
        .await
        .unwrap();
    let crashed = service.containers[1].id.clone();
    runtime.set_status(&crashed, ContainerStatus::Exited).await;

    let report =
        sync_service_status(orchestrator.registry(), runtime.as_ref(), RESTART_TIMEOUT).await;
    assert_eq!(report.inspected, 3);
    assert_eq!(report.restarts_issued, 1);
    assert_eq!(report.restart_failures, 0);
    assert_eq!(
        runtime
            .count_calls(|c| *c == RuntimeCall::Restart(crashed.clone()))
            .await,
        1
    );

    // The exit is recorded this pass, the recovery the next
    let mirrored = orchestrator.get_service(&service.id).await.unwrap();
    let container = mirrored.containers.iter().find(|c| c.id == crashed).unwrap();
    assert_eq!(container.status, ContainerStatus::Exited);

    let report =
        sync_service_status(orchestrator.registry(), runtime.as_ref(), RESTART_TIMEOUT).await;
    assert_eq!(report.restarts_issued, 0);
    let mirrored = orchestrator.get_service(&service.id).await.unwrap();
    assert!(mirrored.containers.iter().all(|c| c.is_running()));
}

#[tokio::test]
async fn test_status_sync_only_restarts_exited() {
    let (orchestrator, runtime) = cluster(1).await;
    let service = orchestrator
        .create_service(ServiceSpec::new("web", "nginx:latest", 8000).with_replicas(2))
        .await
        .unwrap();
    runtime
        .set_status(&service.containers[0].id, ContainerStatus::Paused)
        .await;
    runtime
        .set_status(&service.containers[1].id, ContainerStatus::Dead)
        .await;

    let report =
        sync_service_status(orchestrator.registry(), runtime.as_ref(), RESTART_TIMEOUT).await;
    assert_eq!(report.restarts_issued, 0);

    let mirrored = orchestrator.get_service(&service.id).await.unwrap();
    assert_eq!(mirrored.containers[0].status, ContainerStatus::Paused);
    assert_eq!(mirrored.containers[1].status, ContainerStatus::Dead);
}

#[tokio::test]
async fn test_one_bad_container_does_not_stall_the_pass() {
    let (orchestrator, runtime) = cluster(2).await;
    let service = orchestrator
        .create_service(ServiceSpec::new("web", "nginx:latest", 8000).with_replicas(4))
        .await
        .unwrap();
    let ids: Vec<String> = service.containers.iter().map(|c| c.id.clone()).collect();

    runtime.fail_inspect(&ids[0]).await;
    runtime.set_status(&ids[1], ContainerStatus::Exited).await;
    runtime.fail_restart(&ids[1]).await;
    runtime.set_status(&ids[2], ContainerStatus::Exited).await;

    let report =
        sync_service_status(orchestrator.registry(), runtime.as_ref(), RESTART_TIMEOUT).await;
    assert_eq!(report.inspect_failures, 1);
    assert_eq!(report.inspected, 3);
    assert_eq!(report.restarts_issued, 2);
    assert_eq!(report.restart_failures, 1);
    assert_eq!(runtime.status_of(&ids[2]).await, Some(ContainerStatus::Running));
    assert_eq!(runtime.status_of(&ids[1]).await, Some(ContainerStatus::Exited));
}

// ============================================================================
// Health probing
// ============================================================================

#[tokio::test]
async fn test_failures_reaching_retries_flag_unhealthy() {
    let (orchestrator, _) = cluster(1).await;
    let service = orchestrator.create_service(checked("web", 2, 3)).await.unwrap();
    let sick = service.containers[0].clone();
    let probe = ScriptedProbe::default();
    probe.fail(&sick.ip);

    for pass in 1..=3 {
        let report = probe_all(orchestrator.registry(), &probe, PROBE_TIMEOUT).await;
        assert_eq!(report.probed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.newly_unhealthy, usize::from(pass == 3));
    }

    let summary = orchestrator.health().await;
    assert_eq!(summary.total, 2);
    assert_eq!(summary.unhealthy, 1);
    assert_eq!(summary.healthy, 1);
    assert_eq!(summary.status(), "Degraded");
    let entry = summary
        .containers
        .iter()
        .find(|e| e.container_id == sick.id)
        .unwrap();
    assert_eq!(entry.state, HealthState::Unhealthy);
    assert_eq!(entry.consecutive_failures, 3);

    // A flagged container is not reported again
    let report = probe_all(orchestrator.registry(), &probe, PROBE_TIMEOUT).await;
    assert_eq!(report.newly_unhealthy, 0);

    // Flagging is informational only: nothing was restarted or replaced
    let current = orchestrator.get_service(&service.id).await.unwrap();
    assert!(current.containers.iter().any(|c| c.id == sick.id));

    probe.recover(&sick.ip);
    probe_all(orchestrator.registry(), &probe, PROBE_TIMEOUT).await;
    assert_eq!(orchestrator.health().await.status(), "Healthy");
}

#[tokio::test]
async fn test_services_without_health_check_are_not_probed() {
    let (orchestrator, _) = cluster(1).await;
    orchestrator
        .create_service(ServiceSpec::new("plain", "nginx:latest", 8000).with_replicas(2))
        .await
        .unwrap();
    let probe = ScriptedProbe::default();

    let report = probe_all(orchestrator.registry(), &probe, PROBE_TIMEOUT).await;
    assert_eq!(report.probed, 0);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    assert_eq!(orchestrator.health().await.status(), "Empty");
}

#[tokio::test]
async fn test_each_replica_is_checked_on_its_own_port() {
    let (orchestrator, _) = cluster(1).await;
    let service = orchestrator.create_service(checked("web", 3, 1)).await.unwrap();
    let probe = ScriptedProbe::default();

    probe_all(orchestrator.registry(), &probe, PROBE_TIMEOUT).await;

    let mut ports: Vec<u16> = service.containers.iter().map(|c| c.port).collect();
    ports.sort();
    assert_eq!(ports, vec![8000, 8001, 8002]);

    let mut expected: Vec<String> = service
        .containers
        .iter()
        .map(|c| {
            assert!(!c.ip.is_empty());
            format!("http://{}:{}/health", c.ip, c.port)
        })
        .collect();
    expected.sort();
    assert_eq!(probe.requested(), expected);
}

#[tokio::test]
async fn test_hanging_probes_do_not_stall_the_pass() {
    let (orchestrator, _) = cluster(1).await;
    let service = orchestrator.create_service(checked("web", 5, 3)).await.unwrap();
    let other = orchestrator.create_service(checked("api", 2, 3)).await.unwrap();
    let probe = ScriptedProbe::default();
    for container in &service.containers[..4] {
        probe.hang(&container.ip);
    }

    for pass in 1..=3 {
        let started = Instant::now();
        let report = probe_all(orchestrator.registry(), &probe, PROBE_TIMEOUT).await;

        // Probes run concurrently, so a pass takes about one timeout
        assert!(started.elapsed() < PROBE_TIMEOUT * 3);
        assert_eq!(report.probed, 7);
        assert_eq!(report.failed, 4);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.newly_unhealthy, if pass == 3 { 4 } else { 0 });

        for container in &other.containers {
            assert_eq!(probe.requests_to(&container.ip), pass);
        }
        assert_eq!(probe.requests_to(&service.containers[4].ip), pass);
    }

    let health = orchestrator.health().await;
    assert_eq!(health.unhealthy, 4);
    assert_eq!(health.healthy, 3);
}

#[tokio::test]
async fn test_http_probe_times_out_on_slow_server() {
    let app = Router::new().route(
        "/health",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            "late"
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let probe = HttpProbe::new().unwrap();
    let started = Instant::now();
    let result = probe
        .probe(&format!("http://{}/health", addr), PROBE_TIMEOUT)
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Timeout"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

// ============================================================================
// Loop lifecycle
// ============================================================================

#[tokio::test]
async fn test_started_loops_reconcile_then_stop_on_shutdown() {
    let (orchestrator, runtime) = cluster(2).await;
    let service = orchestrator.create_service(checked("web", 2, 1)).await.unwrap();
    let crashed = service.containers[0].id.clone();
    runtime.set_status(&crashed, ContainerStatus::Exited).await;

    let refreshes = Arc::new(AtomicUsize::new(0));
    let sampler = FixedSampler {
        usage: ResourceUsage::new(10.0, 20.0, 30.0),
        refreshes: refreshes.clone(),
    };
    let probe = Arc::new(ScriptedProbe::default());
    let loops = orchestrator.start(Box::new(sampler), probe.clone());
    assert_eq!(loops.len(), 3);

    // Wait for every loop to have made at least one pass
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let restarted = runtime
            .count_calls(|c| *c == RuntimeCall::Restart(crashed.clone()))
            .await
            > 0;
        if restarted
            && refreshes.load(Ordering::SeqCst) > 0
            && probe.calls.load(Ordering::SeqCst) > 0
        {
            break;
        }
        assert!(Instant::now() < deadline, "loops made no progress");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    for node in orchestrator.list_nodes().await {
        assert_eq!(node.usage, ResourceUsage::new(10.0, 20.0, 30.0));
    }

    tokio::time::timeout(Duration::from_secs(5), orchestrator.shutdown(loops))
        .await
        .expect("shutdown did not complete");

    // No loop keeps running after shutdown
    let refreshes_after = refreshes.load(Ordering::SeqCst);
    let probes_after = probe.calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(refreshes.load(Ordering::SeqCst), refreshes_after);
    assert_eq!(probe.calls.load(Ordering::SeqCst), probes_after);

    assert!(runtime.container_ids().await.is_empty());
}

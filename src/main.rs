use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use harbormaster::cli::{run_client_command, Cli, Commands, ControlPlaneClient, ServeArgs};
use harbormaster::cluster::{
    create_control_plane_router, ControlPlaneState, HealthProbe, HttpProbe, NodeSpec,
    Orchestrator,
};
use harbormaster::config::{load_config, ControlPlaneConfig, RuntimeKind, SamplerKind};
use harbormaster::metrics::{MetricsSampler, RandomSampler, SystemSampler};
use harbormaster::runtime::{ContainerRuntime, DockerRuntime, SimulatedRuntime};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match &cli.command {
        Commands::Serve(args) => {
            if let Err(e) = serve(args).await {
                error!("Control plane failed: {:#}", e);
                process::exit(1);
            }
        }
        command => {
            let client = ControlPlaneClient::new(&cli.server);
            match run_client_command(&client, command).await {
                Ok(output) => print!("{}", output),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            }
        }
    }
}

/// Resolve config: file (or defaults), then CLI overrides
fn resolve_config(args: &ServeArgs) -> anyhow::Result<ControlPlaneConfig> {
    let mut config = load_config(args.config.as_deref()).context("Failed to load config")?;

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(ref bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr.clone();
    }
    if let Some(runtime) = args.runtime {
        config.runtime = runtime;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn build_runtime(config: &ControlPlaneConfig) -> Arc<dyn ContainerRuntime> {
    match config.runtime {
        RuntimeKind::Docker => {
            let docker = DockerRuntime::new(config.docker_binary.clone());
            match docker.check_available().await {
                Ok(version) => info!("Using docker runtime (server {})", version),
                Err(e) => warn!("Docker does not look available, deploys will fail: {}", e),
            }
            Arc::new(docker)
        }
        RuntimeKind::Simulated => {
            info!("Using simulated runtime, no containers will actually run");
            Arc::new(SimulatedRuntime::new())
        }
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

async fn serve(args: &ServeArgs) -> anyhow::Result<()> {
    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        dotenvy::from_path(env_file)
            .with_context(|| format!("Failed to load env file {}", env_file.display()))?;
    }

    let config = resolve_config(args)?;
    let runtime = build_runtime(&config).await;
    let orchestrator = Arc::new(Orchestrator::new(runtime, config.orchestrator_config()));

    // Bootstrap nodes, then services so they have somewhere to land
    if args.register_local_node {
        let node = orchestrator
            .add_node(NodeSpec::new(local_hostname(), "127.0.0.1").with_label("local", "true"))
            .await?;
        info!("Registered local node {} ({})", node.name, node.id);
    }
    for spec in &config.bootstrap.nodes {
        orchestrator.add_node(spec.clone()).await?;
    }
    for spec in &config.bootstrap.services {
        match orchestrator.create_service(spec.clone()).await {
            Ok(service) => info!(
                "Bootstrapped service {} with {}/{} containers",
                service.name,
                service.containers.len(),
                service.replicas
            ),
            Err(e) => warn!("Failed to bootstrap service {}: {}", spec.name, e),
        }
    }

    let sampler: Box<dyn MetricsSampler> = match config.sampler {
        SamplerKind::Random => Box::new(RandomSampler::new()),
        SamplerKind::System => Box::new(SystemSampler::for_local_host()),
    };
    let probe: Arc<dyn HealthProbe> =
        Arc::new(HttpProbe::new().context("Failed to create HTTP probe client")?);
    let loops = orchestrator.start(sampler, probe);

    let app = create_control_plane_router(ControlPlaneState::new(orchestrator.clone()))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Control plane listening on {}", addr);
    info!("Endpoints:");
    info!("  GET  /health                     - Health check");
    info!("  GET  /v1/status                  - Cluster status");
    info!("  GET  /v1/health                  - Container health");
    info!("  *    /v1/services[/{{id}}[/scale]]  - Services");
    info!("  *    /v1/nodes[/{{id}}[/status|score]] - Nodes");
    info!("  GET  /v1/load-balance/{{id}}       - Pick a container");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Stopping background loops and containers");
    orchestrator.shutdown(loops).await;

    served.context("Server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

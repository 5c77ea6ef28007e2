//! Docker runtime - drives the `docker` CLI
//!
//! Argument generation is pure and unit-tested; [`DockerRuntime`] only runs
//! the generated commands with `tokio::process` and parses their output.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{ContainerInspection, ContainerRuntime, CreateRequest, RuntimeError};

/// Template handed to `docker inspect --format`
const INSPECT_FORMAT: &str = "{{.State.Status}}|{{.NetworkSettings.IPAddress}}";

// ============================================================================
// Argument generation (pure)
// ============================================================================

/// Generate `docker create` arguments
pub fn generate_create_args(request: &CreateRequest) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        request.name.clone(),
    ];

    if !request.restart_policy.is_empty() {
        args.push("--restart".to_string());
        args.push(request.restart_policy.clone());
    }

    for var in &request.env {
        args.push("-e".to_string());
        args.push(var.clone());
    }

    let mut labels: Vec<_> = request.labels.iter().collect();
    labels.sort();
    for (key, value) in labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push("-p".to_string());
    args.push(format!(
        "{}:{}/tcp",
        request.port.host_port, request.port.container_port
    ));

    args.push(request.image.clone());
    args
}

/// Generate `docker start` arguments
pub fn generate_start_args(id: &str) -> Vec<String> {
    vec!["start".to_string(), id.to_string()]
}

/// Generate `docker stop` arguments
pub fn generate_stop_args(id: &str, timeout: Duration) -> Vec<String> {
    vec![
        "stop".to_string(),
        "-t".to_string(),
        timeout.as_secs().to_string(),
        id.to_string(),
    ]
}

/// Generate `docker rm` arguments
pub fn generate_rm_args(id: &str, force: bool) -> Vec<String> {
    let mut args = vec!["rm".to_string()];
    if force {
        args.push("-f".to_string());
    }
    args.push(id.to_string());
    args
}

/// Generate `docker restart` arguments
pub fn generate_restart_args(id: &str, timeout: Duration) -> Vec<String> {
    vec![
        "restart".to_string(),
        "-t".to_string(),
        timeout.as_secs().to_string(),
        id.to_string(),
    ]
}

/// Generate `docker inspect` arguments
pub fn generate_inspect_args(id: &str) -> Vec<String> {
    vec![
        "inspect".to_string(),
        "--format".to_string(),
        INSPECT_FORMAT.to_string(),
        id.to_string(),
    ]
}

/// Parse the output of [`generate_inspect_args`]
pub fn parse_inspect_output(output: &str) -> Result<ContainerInspection, RuntimeError> {
    let line = output.trim();
    let (status, ip) = line
        .split_once('|')
        .ok_or_else(|| RuntimeError::Parse(format!("unexpected inspect output '{}'", line)))?;
    let status = status.parse().map_err(RuntimeError::Parse)?;
    Ok(ContainerInspection {
        status,
        ip: ip.trim().to_string(),
    })
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("No such object")
}

// ============================================================================
// Runtime
// ============================================================================

/// Runtime backed by the local `docker` CLI
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check the daemon is reachable, returning its version
    pub async fn check_available(&self) -> Result<String, RuntimeError> {
        let args = vec![
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}".to_string(),
        ];
        self.run(&args, None).await
    }

    /// Run the binary with `args`, returning trimmed stdout
    async fn run(&self, args: &[String], id: Option<&str>) -> Result<String, RuntimeError> {
        debug!("Docker args: {:?}", args);

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| RuntimeError::Spawn(format!("Failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if let Some(id) = id {
                if is_not_found(&stderr) {
                    return Err(RuntimeError::NotFound(id.to_string()));
                }
            }
            return Err(RuntimeError::CommandFailed {
                command: args.first().cloned().unwrap_or_default(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError> {
        let id = self.run(&generate_create_args(request), None).await?;
        if id.is_empty() {
            return Err(RuntimeError::Parse(
                "docker create printed no container id".to_string(),
            ));
        }
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&generate_start_args(id), Some(id)).await.map(|_| ())
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        self.run(&generate_stop_args(id, timeout), Some(id))
            .await
            .map(|_| ())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        self.run(&generate_rm_args(id, force), Some(id))
            .await
            .map(|_| ())
    }

    async fn restart(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        self.run(&generate_restart_args(id, timeout), Some(id))
            .await
            .map(|_| ())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInspection, RuntimeError> {
        let output = self.run(&generate_inspect_args(id), Some(id)).await?;
        parse_inspect_output(&output)
    }

    fn name(&self) -> &'static str {
        "docker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::container::ContainerStatus;
    use crate::runtime::PortBinding;
    use std::collections::HashMap;

    fn request() -> CreateRequest {
        CreateRequest {
            name: "web-1-0a1b2c3d".to_string(),
            image: "nginx:latest".to_string(),
            env: vec!["ENV=production".to_string()],
            labels: HashMap::from([
                ("harbormaster.service_name".to_string(), "web".to_string()),
                ("app".to_string(), "web".to_string()),
            ]),
            port: PortBinding {
                container_port: 80,
                host_port: 81,
            },
            restart_policy: "unless-stopped".to_string(),
        }
    }

    #[test]
    fn test_generate_create_args() {
        let args = generate_create_args(&request());

        assert_eq!(args[0], "create");
        assert!(args.windows(2).any(|w| w == ["--name", "web-1-0a1b2c3d"]));
        assert!(args.windows(2).any(|w| w == ["--restart", "unless-stopped"]));
        assert!(args.windows(2).any(|w| w == ["-e", "ENV=production"]));
        assert!(args.windows(2).any(|w| w == ["-p", "81:80/tcp"]));
        assert_eq!(args.last().unwrap(), "nginx:latest");
    }

    #[test]
    fn test_labels_sorted() {
        let args = generate_create_args(&request());
        let labels: Vec<&String> = args
            .windows(2)
            .filter(|w| w[0] == "--label")
            .map(|w| &w[1])
            .collect();
        assert_eq!(labels, vec!["app=web", "harbormaster.service_name=web"]);
    }

    #[test]
    fn test_empty_restart_policy_omitted() {
        let mut req = request();
        req.restart_policy.clear();
        assert!(!generate_create_args(&req).contains(&"--restart".to_string()));
    }

    #[test]
    fn test_generate_stop_and_rm_args() {
        assert_eq!(
            generate_stop_args("abc", Duration::from_secs(30)),
            vec!["stop", "-t", "30", "abc"]
        );
        assert_eq!(generate_rm_args("abc", true), vec!["rm", "-f", "abc"]);
        assert_eq!(generate_rm_args("abc", false), vec!["rm", "abc"]);
        assert_eq!(
            generate_restart_args("abc", Duration::from_secs(10)),
            vec!["restart", "-t", "10", "abc"]
        );
        assert_eq!(generate_start_args("abc"), vec!["start", "abc"]);
    }

    #[test]
    fn test_parse_inspect_output() {
        let info = parse_inspect_output("running|172.17.0.3\n").unwrap();
        assert_eq!(info.status, ContainerStatus::Running);
        assert_eq!(info.ip, "172.17.0.3");

        let info = parse_inspect_output("exited|").unwrap();
        assert_eq!(info.status, ContainerStatus::Exited);
        assert!(info.ip.is_empty());
    }

    #[test]
    fn test_parse_inspect_output_rejects_garbage() {
        assert!(matches!(
            parse_inspect_output("running"),
            Err(RuntimeError::Parse(_))
        ));
        assert!(matches!(
            parse_inspect_output("sleeping|1.2.3.4"),
            Err(RuntimeError::Parse(_))
        ));
    }

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found("Error response from daemon: No such container: abc"));
        assert!(!is_not_found("permission denied"));
    }
}

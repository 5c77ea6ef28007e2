//! Command implementations for the CLI
//!
//! SBIO pattern: commands return Results and formatted output, printing is
//! handled by the caller

use std::collections::HashMap;
use std::path::Path;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::display::*;
use super::{Commands, DeleteResource, GetResource};
use crate::cluster::{
    ClusterStatus, HealthSummary, Node, NodeRemoval, NodeSpec, NodeStatus, OperationStatus,
    ResourceList, ResourceResponse, RouteResponse, Service, ServiceSpec,
};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("The serve command is handled by the binary")]
    NotAClientCommand,
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Manifests and arguments
// ============================================================================

/// Load and parse a service manifest
pub fn load_service_manifest(path: &Path) -> CommandResult<ServiceSpec> {
    let content = std::fs::read_to_string(path)?;

    let spec: ServiceSpec = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&content).map_err(|e| CommandError::Manifest(e.to_string()))?
        }
        _ => serde_json::from_str(&content)?,
    };

    spec.validate().map_err(CommandError::Manifest)?;
    Ok(spec)
}

/// Parse `key=value` label arguments
pub fn parse_labels(labels: &[String]) -> CommandResult<HashMap<String, String>> {
    labels
        .iter()
        .map(|label| match label.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(CommandError::InvalidArgument(format!(
                "label '{}' is not in key=value form",
                label
            ))),
        })
        .collect()
}

/// Pull the human-readable message out of an error body
fn server_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

// ============================================================================
// Control plane client
// ============================================================================

/// Thin HTTP client for a running control plane
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    base_url: String,
    http: Client,
}

impl ControlPlaneClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> CommandResult<T> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CommandError::Server {
                status: status.as_u16(),
                message: server_message(&body),
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn item<T: DeserializeOwned>(response: Response) -> CommandResult<T> {
        let envelope: ResourceResponse<T> = Self::decode(response).await?;
        match envelope.item {
            Some(item) => Ok(item),
            None => Err(CommandError::Server {
                status: 200,
                message: envelope
                    .error
                    .unwrap_or_else(|| "response carried no item".to_string()),
            }),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> CommandResult<T> {
        let response = self.http.get(self.url(path)).send().await?;
        Self::decode(response).await
    }

    async fn send_json<B: Serialize>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> CommandResult<Response> {
        Ok(self
            .http
            .request(method, self.url(path))
            .json(body)
            .send()
            .await?)
    }

    pub async fn list_services(&self) -> CommandResult<Vec<Service>> {
        let list: ResourceList<Service> = self.get("/v1/services").await?;
        Ok(list.items)
    }

    pub async fn get_service(&self, id: &str) -> CommandResult<Service> {
        let response = self
            .http
            .get(self.url(&format!("/v1/services/{}", id)))
            .send()
            .await?;
        Self::item(response).await
    }

    pub async fn create_service(&self, spec: &ServiceSpec) -> CommandResult<Service> {
        let response = self
            .send_json(reqwest::Method::POST, "/v1/services", spec)
            .await?;
        Self::item(response).await
    }

    pub async fn scale_service(&self, id: &str, replicas: i64) -> CommandResult<Service> {
        let response = self
            .send_json(
                reqwest::Method::POST,
                &format!("/v1/services/{}/scale", id),
                &serde_json::json!({ "replicas": replicas }),
            )
            .await?;
        Self::item(response).await
    }

    pub async fn delete_service(&self, id: &str) -> CommandResult<OperationStatus> {
        let response = self
            .http
            .delete(self.url(&format!("/v1/services/{}", id)))
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn list_nodes(&self) -> CommandResult<Vec<Node>> {
        let list: ResourceList<Node> = self.get("/v1/nodes").await?;
        Ok(list.items)
    }

    pub async fn get_node(&self, id: &str) -> CommandResult<Node> {
        let response = self
            .http
            .get(self.url(&format!("/v1/nodes/{}", id)))
            .send()
            .await?;
        Self::item(response).await
    }

    pub async fn add_node(&self, spec: &NodeSpec) -> CommandResult<Node> {
        let response = self
            .send_json(reqwest::Method::POST, "/v1/nodes", spec)
            .await?;
        Self::item(response).await
    }

    /// Drain and remove a node, returning the migration report
    pub async fn remove_node(&self, id: &str) -> CommandResult<NodeRemoval> {
        let response = self
            .http
            .delete(self.url(&format!("/v1/nodes/{}", id)))
            .send()
            .await?;
        let status: OperationStatus = Self::decode(response).await?;
        let details = status.details.unwrap_or_default();
        Ok(serde_json::from_value(details)?)
    }

    pub async fn set_node_status(&self, id: &str, status: NodeStatus) -> CommandResult<Node> {
        let response = self
            .send_json(
                reqwest::Method::PUT,
                &format!("/v1/nodes/{}/status", id),
                &serde_json::json!({ "status": status }),
            )
            .await?;
        Self::item(response).await
    }

    pub async fn route(&self, service_id: &str) -> CommandResult<RouteResponse> {
        self.get(&format!("/v1/load-balance/{}", service_id)).await
    }

    pub async fn status(&self) -> CommandResult<ClusterStatus> {
        self.get("/v1/status").await
    }

    pub async fn health(&self) -> CommandResult<HealthSummary> {
        self.get("/v1/health").await
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Run a client command against the control plane and return its output
pub async fn run_client_command(
    client: &ControlPlaneClient,
    command: &Commands,
) -> CommandResult<String> {
    match command {
        Commands::Serve(_) => Err(CommandError::NotAClientCommand),
        Commands::Get(args) => match &args.resource {
            GetResource::Services => Ok(format_service_list(&client.list_services().await?)),
            GetResource::Service { id } => Ok(format_service_detail(&client.get_service(id).await?)),
            GetResource::Nodes => Ok(format_node_list(&client.list_nodes().await?)),
            GetResource::Node { id } => Ok(format_node_detail(&client.get_node(id).await?)),
            GetResource::Health => Ok(format_health(&client.health().await?)),
        },
        Commands::Apply(args) => {
            let spec = load_service_manifest(&args.file)?;
            let service = client.create_service(&spec).await?;
            Ok(format!(
                "service/{} created ({}, {}/{} containers)\n",
                service.name,
                service.id,
                service.containers.len(),
                service.replicas
            ))
        }
        Commands::Scale(args) => {
            let service = client.scale_service(&args.id, args.replicas).await?;
            Ok(format!(
                "service/{} scaled to {} ({} containers)\n",
                service.name,
                service.replicas,
                service.containers.len()
            ))
        }
        Commands::Delete(args) => match &args.resource {
            DeleteResource::Service { id } => {
                let status = client.delete_service(id).await?;
                Ok(format!("{}\n", status.message))
            }
            DeleteResource::Node { id } => Ok(format_node_removal(&client.remove_node(id).await?)),
        },
        Commands::AddNode(args) => {
            let spec = NodeSpec {
                name: args.name.clone(),
                address: args.address.clone(),
                labels: parse_labels(&args.labels)?,
            };
            let node = client.add_node(&spec).await?;
            Ok(format!("node/{} added ({})\n", node.name, node.id))
        }
        Commands::NodeStatus(args) => {
            let node = client.set_node_status(&args.id, args.status).await?;
            Ok(format!("node/{} is now {}\n", node.name, node.status))
        }
        Commands::Route(args) => Ok(format_route(&client.route(&args.service_id).await?)),
        Commands::Status => Ok(format_cluster_status(&client.status().await?)),
    }
}

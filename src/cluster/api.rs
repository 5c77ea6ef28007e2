//! Control Plane API Server
//!
//! REST endpoints over the orchestrator:
//! - Services: create, list, get, update, delete, scale
//! - Nodes: add, list, get, remove, status, score
//! - Routing: pick a running container of a service
//! - Status: cluster counts and container health

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{
    load_balancer::LoadBalanceStrategy,
    node::{Node, NodeSpec, NodeStatus},
    orchestrator::{Orchestrator, OrchestratorError},
    resources::{OperationStatus, ResourceList, ResourceResponse},
    service::{Service, ServiceSpec},
};

/// Shared state for the control plane API
#[derive(Clone)]
pub struct ControlPlaneState {
    pub orchestrator: Arc<Orchestrator>,
}

impl ControlPlaneState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

/// Create the control plane router
pub fn create_control_plane_router(state: ControlPlaneState) -> Router {
    Router::new()
        // Cluster status
        .route("/v1/status", get(cluster_status))
        .route("/v1/health", get(cluster_health))
        // Services
        .route("/v1/services", get(list_services).post(create_service))
        .route(
            "/v1/services/{id}",
            get(get_service).put(update_service).delete(delete_service),
        )
        .route(
            "/v1/services/{id}/scale",
            post(scale_service).patch(scale_service),
        )
        // Nodes
        .route("/v1/nodes", get(list_nodes).post(add_node))
        .route("/v1/nodes/{id}", get(get_node).delete(remove_node))
        .route("/v1/nodes/{id}/status", put(set_node_status))
        .route("/v1/nodes/{id}/score", get(get_node_score))
        // Routing
        .route("/v1/load-balance/{service_id}", get(select_container))
        // Health check
        .route("/health", get(health_check))
        .with_state(state)
}

/// Error response for a failed orchestrator call on a single resource
fn resource_error<T: Serialize>(e: OrchestratorError) -> (StatusCode, Json<ResourceResponse<T>>) {
    (e.status_code(), Json(ResourceResponse::error(e.to_string())))
}

/// Unwrap a JSON body; any rejection (syntax, missing field, out-of-range
/// value, content type) answers 400
fn payload<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    body.map(|Json(value)| value).map_err(|rejection| {
        (
            StatusCode::BAD_REQUEST,
            Json(OperationStatus::failure(format!(
                "Invalid payload: {}",
                rejection.body_text()
            ))),
        )
            .into_response()
    })
}

// ============================================================================
// Health & Status
// ============================================================================

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

async fn cluster_status(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    Json(state.orchestrator.status().await)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    summary: super::health_checker::HealthSummary,
}

async fn cluster_health(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    let summary = state.orchestrator.health().await;
    Json(HealthResponse {
        status: summary.status(),
        summary,
    })
}

// ============================================================================
// Service Endpoints
// ============================================================================

async fn create_service(
    State(state): State<ControlPlaneState>,
    body: Result<Json<ServiceSpec>, JsonRejection>,
) -> Response {
    let spec = match payload(body) {
        Ok(spec) => spec,
        Err(rejection) => return rejection,
    };
    match state.orchestrator.create_service(spec).await {
        Ok(service) => {
            (StatusCode::CREATED, Json(ResourceResponse::success(service))).into_response()
        }
        Err(e) => resource_error::<Service>(e).into_response(),
    }
}

async fn list_services(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    let services = state.orchestrator.list_services().await;
    Json(ResourceList::new("ServiceList", services))
}

async fn get_service(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.get_service(&id).await {
        Ok(service) => (StatusCode::OK, Json(ResourceResponse::success(service))),
        Err(e) => resource_error::<Service>(e),
    }
}

async fn update_service(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
    body: Result<Json<ServiceSpec>, JsonRejection>,
) -> Response {
    let spec = match payload(body) {
        Ok(spec) => spec,
        Err(rejection) => return rejection,
    };
    match state.orchestrator.update_service(&id, spec).await {
        Ok(service) => (StatusCode::OK, Json(ResourceResponse::success(service))).into_response(),
        Err(e) => resource_error::<Service>(e).into_response(),
    }
}

async fn delete_service(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.delete_service(&id).await {
        Ok(service) => (
            StatusCode::OK,
            Json(OperationStatus::success(format!(
                "Service '{}' deleted",
                service.name
            ))),
        ),
        Err(e) => (e.status_code(), Json(OperationStatus::failure(e.to_string()))),
    }
}

/// Scale payload; signed so a negative count reaches validation
#[derive(Debug, Deserialize)]
struct ScaleRequest {
    replicas: i64,
}

async fn scale_service(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
    body: Result<Json<ScaleRequest>, JsonRejection>,
) -> Response {
    let req = match payload(body) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    match state.orchestrator.scale_service(&id, req.replicas).await {
        Ok(service) => (StatusCode::OK, Json(ResourceResponse::success(service))).into_response(),
        Err(e) => resource_error::<Service>(e).into_response(),
    }
}

// ============================================================================
// Node Endpoints
// ============================================================================

async fn add_node(
    State(state): State<ControlPlaneState>,
    body: Result<Json<NodeSpec>, JsonRejection>,
) -> Response {
    let spec = match payload(body) {
        Ok(spec) => spec,
        Err(rejection) => return rejection,
    };
    match state.orchestrator.add_node(spec).await {
        Ok(node) => (StatusCode::CREATED, Json(ResourceResponse::success(node))).into_response(),
        Err(e) => resource_error::<Node>(e).into_response(),
    }
}

async fn list_nodes(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    let nodes = state.orchestrator.list_nodes().await;
    Json(ResourceList::new("NodeList", nodes))
}

async fn get_node(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.get_node(&id).await {
        Ok(node) => (StatusCode::OK, Json(ResourceResponse::success(node))),
        Err(e) => resource_error::<Node>(e),
    }
}

async fn remove_node(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.remove_node(&id).await {
        Ok(removal) => {
            let message = format!(
                "Node '{}' removed, {}/{} containers migrated",
                id, removal.migrated, removal.attempted
            );
            let details = serde_json::to_value(&removal).unwrap_or_default();
            (
                StatusCode::OK,
                Json(OperationStatus::success(message).with_details(details)),
            )
        }
        Err(e) => (e.status_code(), Json(OperationStatus::failure(e.to_string()))),
    }
}

#[derive(Debug, Deserialize)]
struct NodeStatusRequest {
    status: NodeStatus,
}

async fn set_node_status(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
    body: Result<Json<NodeStatusRequest>, JsonRejection>,
) -> Response {
    let req = match payload(body) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    match state.orchestrator.set_node_status(&id, req.status).await {
        Ok(node) => (StatusCode::OK, Json(ResourceResponse::success(node))).into_response(),
        Err(e) => resource_error::<Node>(e).into_response(),
    }
}

async fn get_node_score(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.node_score(&id).await {
        Ok(score) => (StatusCode::OK, Json(score)).into_response(),
        Err(e) => (e.status_code(), Json(OperationStatus::failure(e.to_string()))).into_response(),
    }
}

// ============================================================================
// Routing
// ============================================================================

/// Where to send the next request for a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResponse {
    pub service_id: String,
    pub container_id: String,
    pub container_name: String,
    pub node_id: String,
    /// Container IP, empty when the runtime reported none
    pub ip: String,
    pub port: u16,
    pub strategy: LoadBalanceStrategy,
    pub differentiated: bool,
}

async fn select_container(
    State(state): State<ControlPlaneState>,
    Path(service_id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.select_container(&service_id).await {
        Ok(selection) => {
            let container = selection.container;
            let route = RouteResponse {
                service_id: container.service_id,
                container_id: container.id,
                container_name: container.name,
                node_id: container.node_id,
                ip: container.ip,
                port: container.port,
                strategy: selection.strategy,
                differentiated: selection.differentiated,
            };
            (StatusCode::OK, Json(route)).into_response()
        }
        Err(e) => (e.status_code(), Json(OperationStatus::failure(e.to_string()))).into_response(),
    }
}

//! Wire envelopes shared by the API and the CLI client

use serde::{Deserialize, Serialize};

/// API version stamped on list responses
pub const API_VERSION: &str = "harbormaster/v1";

/// List of resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceList<T> {
    /// API version
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Kind (e.g., "ServiceList", "NodeList")
    pub kind: String,

    /// List of items
    pub items: Vec<T>,
}

impl<T> ResourceList<T> {
    /// Create a new resource list
    pub fn new(kind: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: kind.into(),
            items,
        }
    }
}

/// Status response for operations without a resource body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatus {
    /// Success or failure
    pub success: bool,

    /// Status message
    pub message: String,

    /// Details (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl OperationStatus {
    /// Create success status
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: None,
        }
    }

    /// Create failure status
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: None,
        }
    }

    /// Add details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Response carrying a single resource, or the error that prevented it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ResourceResponse<T> {
    pub fn success(item: T) -> Self {
        Self {
            success: true,
            item: Some(item),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            item: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_list_envelope() {
        let list = ResourceList::new("NodeList", vec![1, 2]);
        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["apiVersion"], "harbormaster/v1");
        assert_eq!(json["kind"], "NodeList");
        assert_eq!(json["items"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_operation_status_details() {
        let status = OperationStatus::failure("boom");
        assert!(serde_json::to_value(&status).unwrap().get("details").is_none());

        let status = OperationStatus::success("done").with_details(serde_json::json!({"migrated": 2}));
        assert_eq!(status.details.unwrap()["migrated"], 2);
    }

    #[test]
    fn test_resource_response_error_has_no_item() {
        let response: ResourceResponse<u32> = ResourceResponse::error("nope");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("item").is_none());
    }

    #[test]
    fn test_resource_response_service_from_json() {
        use crate::cluster::service::{Service, ServiceSpec};

        let service = Service::from_spec(ServiceSpec::new("web", "nginx:latest", 8000));
        let json = serde_json::to_string(&ResourceResponse::success(service.clone())).unwrap();
        let parsed: ResourceResponse<Service> = serde_json::from_str(&json).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.item.unwrap().id, service.id);

        let parsed: ResourceResponse<Service> =
            serde_json::from_str(r#"{"success":false,"error":"Service not found"}"#).unwrap();
        assert!(parsed.item.is_none());
        assert_eq!(parsed.error.as_deref(), Some("Service not found"));
    }
}

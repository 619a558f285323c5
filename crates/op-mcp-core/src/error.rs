//! Structured error type for the gateway, carrying the JSON-RPC compatible
//! error codes the dispatcher surfaces to clients.

use serde_json::{json, Value};
use thiserror::Error;

/// Gateway-wide error type. Every variant maps to a stable numeric `code`
/// via [`GatewayError::code`], matching the JSON-RPC error-code table.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Argument validation failed for {tool_id}")]
    ArgValidationFailed {
        tool_id: String,
        errors: Vec<ValidationIssue>,
    },

    #[error("Package unavailable: {0}")]
    PackageUnavailable(String),

    #[error("Authentication required for package {0}")]
    AuthRequired(String),

    #[error("Authentication did not complete for package {0}: {1}")]
    AuthIncomplete(String, String),

    #[error("Downstream error calling {tool_id} on {package_id}: {message}")]
    DownstreamError {
        package_id: String,
        tool_id: String,
        message: String,
        data: Option<Value>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// One structured validation failure, shaped to match JSON-Schema
/// validator output (keyword / message / missing-property / etc).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub keyword: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,
}

impl GatewayError {
    /// JSON-RPC compatible numeric error code for this variant.
    pub fn code(&self) -> i32 {
        match self {
            GatewayError::InvalidParams(_) => -32602,
            GatewayError::PackageNotFound(_) => -32001,
            GatewayError::ToolNotFound(_) => -32002,
            GatewayError::ArgValidationFailed { .. } => -32003,
            GatewayError::PackageUnavailable(_) => -32004,
            GatewayError::AuthRequired(_) => -32005,
            GatewayError::AuthIncomplete(_, _) => -32006,
            GatewayError::DownstreamError { .. } => -32007,
            GatewayError::Internal(_) => -32603,
        }
    }

    /// Short human action hint appended to the error message by the
    /// dispatcher, keyed on the error code.
    pub fn action_hint(&self) -> Option<&'static str> {
        match self {
            GatewayError::PackageNotFound(_) => Some("run list_tool_packages()"),
            GatewayError::ToolNotFound(_) => Some("run list_tools() for this package"),
            GatewayError::PackageUnavailable(_) => Some("check health_check_all() for diagnostics"),
            GatewayError::AuthRequired(_) => Some("run authenticate() for this package"),
            GatewayError::Internal(_) => Some("see get_help(topic:\"error_handling\")"),
            _ => None,
        }
    }

    /// Render as the `data` payload of a structured JSON-RPC error. The
    /// action hint (if any) is merged in under `action` so it reaches the
    /// caller, not just the server log.
    pub fn data(&self) -> Option<Value> {
        let mut data = match self {
            GatewayError::ArgValidationFailed { errors, .. } => serde_json::to_value(errors).ok(),
            GatewayError::DownstreamError { data, .. } => data.clone(),
            _ => None,
        };
        if let Some(hint) = self.action_hint() {
            let entry = data.get_or_insert_with(|| json!({}));
            if let Some(map) = entry.as_object_mut() {
                map.insert("action".to_string(), Value::String(hint.to_string()));
            }
        }
        data
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        GatewayError::InvalidParams(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GatewayError::Internal(msg.into())
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

//! Control-plane error envelope
//!
//! Every failure leaves the HTTP surface as `{error_kind, message, details}`
//! with a stable machine-readable kind: 4xx for client faults, 5xx for core
//! faults.

use crate::plugin::api::PluginError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error_kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn bad_request(error_kind: &str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error_kind: error_kind.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error_kind: "plugin_not_found".to_string(),
            message: message.into(),
            details: None,
        }
    }
}

impl From<PluginError> for ApiError {
    fn from(error: PluginError) -> Self {
        let status = match &error {
            PluginError::PluginNotFound { .. } => StatusCode::NOT_FOUND,
            PluginError::AlreadyRegistered { .. } => StatusCode::CONFLICT,
            PluginError::ManifestInvalid { .. }
            | PluginError::VersionIncompatible { .. }
            | PluginError::MissingDependency { .. }
            | PluginError::VersionIncompatibility { .. }
            | PluginError::CyclicDependency { .. }
            | PluginError::ConfigError { .. }
            | PluginError::InvalidState { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PluginError::LoadError { .. }
            | PluginError::HookFailed { .. }
            | PluginError::ExecutionError { .. }
            | PluginError::Generic { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self {
            status,
            error_kind: error.error_kind().to_string(),
            message: error.to_string(),
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let error: ApiError = PluginError::PluginNotFound {
            plugin_id: "plugin-detection-price".to_string(),
        }
        .into();
        assert_eq!(error.status, StatusCode::NOT_FOUND);
        assert_eq!(error.error_kind, "plugin_not_found");
    }

    #[test]
    fn test_client_faults_are_4xx() {
        let error: ApiError = PluginError::CyclicDependency {
            path: vec!["a".to_string(), "b".to_string()],
        }
        .into();
        assert!(error.status.is_client_error());
    }

    #[test]
    fn test_core_faults_are_5xx() {
        let error: ApiError = PluginError::LoadError {
            plugin_id: "plugin-source-x".to_string(),
            cause: "factory missing".to_string(),
        }
        .into();
        assert!(error.status.is_server_error());
    }

    #[test]
    fn test_envelope_shape() {
        let error = ApiError::bad_request("bad_filter", "unknown kind 'widget'");
        let body = serde_json::to_value(&error).unwrap();
        assert_eq!(body["error_kind"], "bad_filter");
        assert_eq!(body["message"], "unknown kind 'widget'");
        assert!(body.get("status").is_none());
    }
}

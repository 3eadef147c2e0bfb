//! Plugin administration routes
//!
//! The minimal control surface the core exposes: register, list, inspect,
//! enable/disable, hot reload, unregister. Success returns the plugin
//! record; failures return the structured error envelope.

use crate::api::error::ApiError;
use crate::api::router::ApiState;
use crate::manifest::{PluginKind, PluginManifest};
use crate::plugin::api::{PluginDescriptor, PluginState};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct ListFilter {
    pub kind: Option<String>,
    pub state: Option<String>,
}

fn parse_kind(value: &str) -> Result<PluginKind, ApiError> {
    match value.to_lowercase().as_str() {
        "source" => Ok(PluginKind::Source),
        "processing" => Ok(PluginKind::Processing),
        "detection" => Ok(PluginKind::Detection),
        "search" => Ok(PluginKind::Search),
        "display" => Ok(PluginKind::Display),
        other => Err(ApiError::bad_request(
            "bad_filter",
            format!("unknown plugin kind '{}'", other),
        )),
    }
}

fn parse_state(value: &str) -> Result<PluginState, ApiError> {
    match value.to_lowercase().as_str() {
        "registered" => Ok(PluginState::Registered),
        "configured" => Ok(PluginState::Configured),
        "enabled" => Ok(PluginState::Enabled),
        "disabled" => Ok(PluginState::Disabled),
        "failed" => Ok(PluginState::Failed),
        other => Err(ApiError::bad_request(
            "bad_filter",
            format!("unknown plugin state '{}'", other),
        )),
    }
}

/// POST /api/v1/plugins/register
pub async fn register_plugin(
    State(state): State<ApiState>,
    Json(manifest): Json<PluginManifest>,
) -> Result<Json<PluginDescriptor>, ApiError> {
    let violations = manifest.validate();
    if !violations.is_empty() {
        return Err(ApiError {
            status: axum::http::StatusCode::UNPROCESSABLE_ENTITY,
            error_kind: "manifest_invalid".to_string(),
            message: "manifest failed schema validation".to_string(),
            details: Some(serde_json::json!(violations
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>())),
        });
    }

    let mut manager = state.services.plugin_manager().await;
    let descriptor = manager.register_manifest(manifest, None).await?;
    Ok(Json(descriptor))
}

/// GET /api/v1/plugins
pub async fn list_plugins(
    State(state): State<ApiState>,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<PluginDescriptor>>, ApiError> {
    let kind = filter.kind.as_deref().map(parse_kind).transpose()?;
    let plugin_state = filter.state.as_deref().map(parse_state).transpose()?;

    let manager = state.services.plugin_manager().await;
    let descriptors = manager.registry().list(kind, plugin_state).await;
    Ok(Json(descriptors))
}

/// GET /api/v1/plugins/{id}
pub async fn get_plugin(
    State(state): State<ApiState>,
    Path(plugin_id): Path<String>,
) -> Result<Json<PluginDescriptor>, ApiError> {
    let manager = state.services.plugin_manager().await;
    manager
        .registry()
        .descriptor(&plugin_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Plugin not found: {}", plugin_id)))
}

/// PUT /api/v1/plugins/{id}/enable
pub async fn enable_plugin(
    State(state): State<ApiState>,
    Path(plugin_id): Path<String>,
) -> Result<Json<PluginDescriptor>, ApiError> {
    let manager = state.services.plugin_manager().await;
    let descriptor = manager.enable(&plugin_id).await?;
    Ok(Json(descriptor))
}

/// PUT /api/v1/plugins/{id}/disable
pub async fn disable_plugin(
    State(state): State<ApiState>,
    Path(plugin_id): Path<String>,
) -> Result<Json<PluginDescriptor>, ApiError> {
    let manager = state.services.plugin_manager().await;
    let descriptor = manager.disable(&plugin_id).await?;
    Ok(Json(descriptor))
}

/// POST /api/v1/plugins/{id}/reload
pub async fn reload_plugin(
    State(state): State<ApiState>,
    Path(plugin_id): Path<String>,
) -> Result<Json<PluginDescriptor>, ApiError> {
    let mut manager = state.services.plugin_manager().await;
    let descriptor = manager.reload(&plugin_id).await?;
    Ok(Json(descriptor))
}

/// DELETE /api/v1/plugins/{id}
pub async fn unregister_plugin(
    State(state): State<ApiState>,
    Path(plugin_id): Path<String>,
) -> Result<Json<PluginDescriptor>, ApiError> {
    let mut manager = state.services.plugin_manager().await;
    let descriptor = manager.unregister(&plugin_id).await?;
    Ok(Json(descriptor))
}

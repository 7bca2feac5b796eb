//! JSON bodies of the HTTP API. Field names are part of the public contract.

use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Contents of the optional build-metadata side file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildInfo {
    pub version: String,
    pub build_date: String,
    pub build_timestamp: i64,
    pub environment: String,
    pub service: String,
    pub description: String,
}

/// Missing or malformed files are treated as absent.
pub async fn load_build_info(path: &Path) -> Option<BuildInfo> {
    let data = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&data) {
        Ok(info) => Some(info),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed build info");
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    #[serde(
        rename = "buildInfo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub build_info: Option<BuildInfo>,
    pub error: String,
}

/// Version of this service, fixed at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub version: String,
    pub build_datetime: String,
}

impl AppInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            build_datetime: option_env!("CHRONY_API_BUILD_DATETIME")
                .unwrap_or("unknown")
                .to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Servers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServersResponse {
    pub servers: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetServersRequest {
    #[serde(default)]
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerResult {
    pub server: String,
    pub output: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetServersResponse {
    pub result: Vec<ServerResult>,
    pub restart_success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteServersResponse {
    pub output: String,
    pub error: String,
    pub restart_success: bool,
}

// ---------------------------------------------------------------------------
// Server mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerModeResponse {
    pub server_mode_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetServerModeRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetServerModeResponse {
    pub success: bool,
    pub server_mode_enabled: bool,
}

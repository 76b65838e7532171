//! Health and connectivity reports.

use serde::Serialize;

use crate::attempt::Strategy;
use crate::http_client::HttpInferenceClient;
use crate::version::VersionInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: VersionInfo,
    /// Enabled strategies in priority order.
    pub strategies: Vec<Strategy>,
}

/// Reachability of the HTTP inference service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpApiStatus {
    pub configured: bool,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HttpApiStatus {
    pub fn not_configured() -> Self {
        Self {
            configured: false,
            reachable: false,
            url: None,
            error: None,
        }
    }

    /// Hit the service's health endpoint.
    pub async fn check(client: &HttpInferenceClient) -> Self {
        let url = Some(client.health_url().to_string());
        match client.check_health().await {
            Ok(_) => Self {
                configured: true,
                reachable: true,
                url,
                error: None,
            },
            Err(e) => {
                tracing::info!(error = %e, "HTTP inference service unreachable");
                Self {
                    configured: true,
                    reachable: false,
                    url,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteScriptStatus {
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Answer to "which backends could serve a prediction right now".
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub http_api: HttpApiStatus,
    pub remote_script: RemoteScriptStatus,
    /// Strategy the next dispatch will try first.
    pub preferred: Strategy,
    pub message: String,
}

impl ConnectionReport {
    pub fn new(http_api: HttpApiStatus, remote_script: RemoteScriptStatus) -> Self {
        let (preferred, message) = if http_api.reachable {
            (Strategy::HttpApi, "HTTP inference service is reachable")
        } else if remote_script.configured {
            (
                Strategy::RemoteScript,
                "HTTP inference service unavailable, remote script execution configured",
            )
        } else {
            (
                Strategy::Synthetic,
                "No inference backend available, predictions will be synthetic",
            )
        };
        Self {
            http_api,
            remote_script,
            preferred,
            message: message.to_string(),
        }
    }
}

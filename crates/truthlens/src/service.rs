//! PredictionService: transport-agnostic entry point.
//!
//! Validates and stores uploads, hands them to the orchestrator or the
//! aggregator, and wraps results in the response envelopes. Transports
//! (currently HTTP) only translate wire formats into calls on this type.

use std::sync::Arc;

use base64::Engine;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::aggregator::MultiMethodAggregator;
use crate::config::DispatchConfig;
use crate::health::{
    ConnectionReport, HealthReport, HealthStatus, HttpApiStatus, RemoteScriptStatus,
};
use crate::method::{MethodId, MethodSet};
use crate::orchestrator::StrategyOrchestrator;
use crate::prediction::{AggregateResult, Prediction};
use crate::request::{PredictionRequest, RequestError};
use crate::version::VersionInfo;

/// Name used when the client sends no file name.
const DEFAULT_FILE_NAME: &str = "upload";

/// An image as received from a client, before validation.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    /// Base64 payload, optionally as a `data:` URL.
    pub image: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    pub filename: String,
    pub prediction: Prediction,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiPredictResponse {
    pub success: bool,
    pub filename: String,
    #[serde(flatten)]
    pub aggregate: AggregateResult,
    pub timestamp: String,
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Strip an optional `data:<mime>;base64,` prefix and decode.
fn decode_image(payload: &str) -> Result<Vec<u8>, RequestError> {
    let payload = payload.trim();
    let encoded = match payload.strip_prefix("data:") {
        Some(rest) => match rest.split_once(',') {
            Some((_, data)) => data,
            None => return Err(RequestError::InvalidImage("malformed data URL".into())),
        },
        None => payload,
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| RequestError::InvalidImage(e.to_string()))?;
    if bytes.is_empty() {
        return Err(RequestError::InvalidImage("empty payload".into()));
    }
    Ok(bytes)
}

pub struct PredictionService {
    orchestrator: Arc<StrategyOrchestrator>,
    aggregator: MultiMethodAggregator,
    max_upload_bytes: usize,
    version: VersionInfo,
}

impl PredictionService {
    pub fn new(config: &DispatchConfig) -> Self {
        Self::with_orchestrator(Arc::new(StrategyOrchestrator::new(config)), config)
    }

    /// Use a pre-built orchestrator (e.g. one with a custom transport).
    pub fn with_orchestrator(orchestrator: Arc<StrategyOrchestrator>, config: &DispatchConfig) -> Self {
        Self {
            aggregator: MultiMethodAggregator::new(orchestrator.clone(), config.max_concurrency),
            orchestrator,
            max_upload_bytes: config.artifacts.max_upload_bytes,
            version: VersionInfo::new(),
        }
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Validate and store an upload. Nothing is written on rejection.
    pub fn accept(&self, upload: &Upload) -> Result<PredictionRequest, RequestError> {
        let payload = upload
            .image
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(RequestError::MissingImage)?;
        // Base64 is 4/3 the decoded size; reject obviously oversize payloads
        // before allocating.
        let estimated = payload.len() / 4 * 3;
        if estimated > self.max_upload_bytes + 3 {
            return Err(RequestError::TooLarge {
                size: estimated,
                limit: self.max_upload_bytes,
            });
        }
        let bytes = decode_image(payload)?;
        if bytes.len() > self.max_upload_bytes {
            return Err(RequestError::TooLarge {
                size: bytes.len(),
                limit: self.max_upload_bytes,
            });
        }

        let file_name = upload
            .file_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_FILE_NAME);
        let image = self
            .orchestrator
            .artifact_store()
            .store_upload(&bytes, file_name)?;
        tracing::debug!(
            file = file_name,
            bytes = bytes.len(),
            path = %image.local_path().display(),
            "Stored upload"
        );
        Ok(PredictionRequest::new(image, file_name))
    }

    /// Single-method prediction. `method` of `None` uses the default method.
    pub async fn predict(
        &self,
        upload: &Upload,
        method: Option<&str>,
    ) -> Result<PredictResponse, RequestError> {
        let method = method
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::parse::<MethodId>)
            .transpose()?;
        let request = self.accept(upload)?.with_methods(method);
        let filename = request.file_name().to_string();

        let prediction = self.orchestrator.dispatch(request, method).await;
        Ok(PredictResponse {
            success: true,
            filename,
            prediction,
            timestamp: timestamp(),
        })
    }

    /// Fan out across `methods`; an empty list means the default method.
    pub async fn predict_multi<S: AsRef<str>>(
        &self,
        upload: &Upload,
        methods: &[S],
    ) -> Result<MultiPredictResponse, RequestError> {
        let methods = MethodSet::parse(methods)?;
        let request = self
            .accept(upload)?
            .with_methods(methods.iter().copied());
        let filename = request.file_name().to_string();

        let aggregate = self.aggregator.aggregate(request).await;
        Ok(MultiPredictResponse {
            success: true,
            filename,
            aggregate,
            timestamp: timestamp(),
        })
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: HealthStatus::Ok,
            version: self.version.clone(),
            strategies: self.orchestrator.strategies(),
        }
    }

    pub async fn test_connection(&self) -> ConnectionReport {
        let http_api = match self.orchestrator.http_client() {
            Some(client) => HttpApiStatus::check(client).await,
            None => HttpApiStatus::not_configured(),
        };
        let remote_script = RemoteScriptStatus {
            configured: self.orchestrator.remote_host().is_some(),
            host: self.orchestrator.remote_host().map(|h| h.host.clone()),
        };
        ConnectionReport::new(http_api, remote_script)
    }
}

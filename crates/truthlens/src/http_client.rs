//! Client for the remote HTTP inference service.

use std::time::Duration;

use base64::Engine;
use serde::Serialize;

use crate::attempt::{AttemptError, RawOutput};
use crate::config::HttpApiConfig;
use crate::method::MethodId;
use crate::version::TRUTHLENS_VERSION;

/// Longest response body echoed into an error.
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Serialize)]
struct PredictBody<'a> {
    image: String,
    filename: &'a str,
    method: MethodId,
}

#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    client: reqwest::Client,
    predict_url: String,
    health_url: String,
    timeout: Duration,
    health_timeout: Duration,
}

impl HttpInferenceClient {
    pub fn new(config: &HttpApiConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!("truthlens/{TRUTHLENS_VERSION}"))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            client,
            predict_url: config.predict_url.clone(),
            health_url: config.health_url.clone(),
            timeout: config.timeout,
            health_timeout: config.health_timeout,
        }
    }

    pub fn predict_url(&self) -> &str {
        &self.predict_url
    }

    pub fn health_url(&self) -> &str {
        &self.health_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST the image and return the 2xx body unparsed.
    pub async fn predict(
        &self,
        image: &[u8],
        file_name: &str,
        method: MethodId,
    ) -> Result<RawOutput, AttemptError> {
        let body = PredictBody {
            image: base64::engine::general_purpose::STANDARD.encode(image),
            filename: file_name,
            method,
        };
        let response = self
            .client
            .post(&self.predict_url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e, self.timeout))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.request_error(e, self.timeout))?;

        if !status.is_success() {
            return Err(AttemptError::RemoteFailure {
                exit_code: None,
                detail: format!("HTTP {}: {}", status, truncate(&text)),
            });
        }
        tracing::debug!(status = %status, bytes = text.len(), "Inference service responded");
        Ok(RawOutput::new(text))
    }

    /// GET the health endpoint with the short health timeout.
    pub async fn check_health(&self) -> Result<reqwest::StatusCode, AttemptError> {
        let response = self
            .client
            .get(&self.health_url)
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| self.request_error(e, self.health_timeout))?;
        let status = response.status();
        if status.is_success() {
            Ok(status)
        } else {
            Err(AttemptError::RemoteFailure {
                exit_code: None,
                detail: format!("HTTP {status}"),
            })
        }
    }

    fn request_error(&self, e: reqwest::Error, timeout: Duration) -> AttemptError {
        if e.is_timeout() {
            AttemptError::Timeout(timeout)
        } else {
            AttemptError::Transport(e.to_string())
        }
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

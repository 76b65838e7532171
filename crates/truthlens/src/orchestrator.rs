//! Strategy orchestration: priority order, per-attempt deadlines, fallback.
//!
//! [`StrategyOrchestrator::dispatch`] is total. Every backend failure is
//! recorded on a [`BackendAttempt`], logged, and absorbed; the synthetic
//! strategy terminates the chain and its note lists what was absorbed.

use std::sync::Arc;

use tracing::Instrument;

use crate::artifact::ArtifactStore;
use crate::attempt::{AttemptError, AttemptOutcome, BackendAttempt, RawOutput, Strategy};
use crate::config::{DispatchConfig, RemoteHostConfig};
use crate::http_client::HttpInferenceClient;
use crate::method::MethodId;
use crate::parser::{ParseFailure, ResultParser};
use crate::prediction::Prediction;
use crate::remote::{RemoteExecutionChannel, RemoteOutput, RemoteTransport, SshTransport};
use crate::request::PredictionRequest;
use crate::script;
use crate::synthetic::{SYNTHETIC_NOTE_PREFIX, SyntheticPredictor};

struct RemoteBackend {
    channel: RemoteExecutionChannel,
    host: RemoteHostConfig,
}

pub struct StrategyOrchestrator {
    http: Option<HttpInferenceClient>,
    remote: Option<RemoteBackend>,
    synthetic: SyntheticPredictor,
    store: ArtifactStore,
}

impl StrategyOrchestrator {
    /// Build with the ssh/scp transport for the remote strategy.
    pub fn new(config: &DispatchConfig) -> Self {
        let transport = config
            .remote
            .as_ref()
            .map(|host| Arc::new(SshTransport::new(host)) as Arc<dyn RemoteTransport>);
        Self::build(config, transport)
    }

    /// Build with a caller-supplied remote transport.
    pub fn with_transport(config: &DispatchConfig, transport: Arc<dyn RemoteTransport>) -> Self {
        Self::build(config, Some(transport))
    }

    fn build(config: &DispatchConfig, transport: Option<Arc<dyn RemoteTransport>>) -> Self {
        let remote = match (&config.remote, transport) {
            (Some(host), Some(transport)) => Some(RemoteBackend {
                channel: RemoteExecutionChannel::new(transport),
                host: host.clone(),
            }),
            _ => None,
        };
        Self {
            http: config.http.as_ref().map(HttpInferenceClient::new),
            remote,
            synthetic: SyntheticPredictor::new(&config.synthetic),
            store: ArtifactStore::from_config(&config.artifacts),
        }
    }

    pub fn artifact_store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn http_client(&self) -> Option<&HttpInferenceClient> {
        self.http.as_ref()
    }

    pub fn remote_host(&self) -> Option<&RemoteHostConfig> {
        self.remote.as_ref().map(|r| &r.host)
    }

    /// Strategies that will be attempted, in priority order.
    pub fn strategies(&self) -> Vec<Strategy> {
        let mut order = Vec::with_capacity(3);
        if self.http.is_some() {
            order.push(Strategy::HttpApi);
        }
        if self.remote.is_some() {
            order.push(Strategy::RemoteScript);
        }
        order.push(Strategy::Synthetic);
        order
    }

    /// Run one prediction and consume the request, deleting its image.
    ///
    /// `method` of `None` runs the default method on every strategy.
    pub async fn dispatch(&self, request: PredictionRequest, method: Option<MethodId>) -> Prediction {
        let prediction = self.dispatch_ref(&request, method).await;
        request.finish();
        prediction
    }

    /// Run one prediction without taking ownership of the request.
    pub async fn dispatch_ref(
        &self,
        request: &PredictionRequest,
        method: Option<MethodId>,
    ) -> Prediction {
        let method = method.unwrap_or_default();
        let span = tracing::info_span!(
            "dispatch",
            file = request.file_name(),
            method = %method,
        );
        self.run_strategies(request, method)
            .instrument(span)
            .await
    }

    async fn run_strategies(
        &self,
        request: &PredictionRequest,
        method: MethodId,
    ) -> Prediction {
        let mut absorbed: Vec<BackendAttempt> = Vec::new();

        for strategy in self.strategies() {
            let mut attempt = match strategy {
                Strategy::HttpApi => {
                    let Some(http) = &self.http else { continue };
                    let mut attempt = BackendAttempt::start(strategy, http.timeout());
                    let result = self.attempt_http(http, request, method, &attempt).await;
                    attempt.settle(result);
                    attempt
                }
                Strategy::RemoteScript => {
                    let Some(remote) = &self.remote else { continue };
                    let mut attempt = BackendAttempt::start(strategy, remote.host.timeout);
                    let result = self
                        .attempt_remote(remote, request, method, &attempt)
                        .await;
                    attempt.settle(result);
                    attempt
                }
                Strategy::Synthetic => break,
            };

            let parsed = match &attempt.outcome {
                AttemptOutcome::Success(raw) => Some(parse_output(strategy, raw)),
                _ => None,
            };
            if let Some(parsed) = parsed {
                match parsed {
                    Ok(mut prediction) => {
                        if prediction.processing_time_seconds == 0.0 {
                            prediction.processing_time_seconds = attempt.elapsed().as_secs_f64();
                        }
                        tracing::info!(
                            strategy = %strategy,
                            label = prediction.label.as_str(),
                            confidence = prediction.confidence,
                            elapsed_ms = attempt.elapsed().as_millis() as u64,
                            "Prediction completed"
                        );
                        return prediction;
                    }
                    Err(e) => attempt.fail(e),
                }
            }

            if let AttemptOutcome::Failure(e) = &attempt.outcome {
                tracing::warn!(
                    strategy = %strategy,
                    error = %e,
                    elapsed_ms = attempt.elapsed().as_millis() as u64,
                    "Strategy failed, falling back"
                );
            }
            absorbed.push(attempt);
        }

        let mut prediction = self.synthetic.generate(Some(method)).await;
        prediction.source_note = Some(fallback_note(&absorbed));
        tracing::info!(
            absorbed = absorbed.len(),
            label = prediction.label.as_str(),
            "Returning synthetic prediction"
        );
        prediction
    }

    async fn attempt_http(
        &self,
        http: &HttpInferenceClient,
        request: &PredictionRequest,
        method: MethodId,
        attempt: &BackendAttempt,
    ) -> Result<RawOutput, AttemptError> {
        let call = async {
            let image = tokio::fs::read(request.image_path())
                .await
                .map_err(|e| AttemptError::Transport(format!("failed to read image: {e}")))?;
            http.predict(&image, request.file_name(), method).await
        };
        tokio::time::timeout(attempt.remaining(), call)
            .await
            .unwrap_or(Err(AttemptError::Timeout(attempt.budget())))
    }

    async fn attempt_remote(
        &self,
        remote: &RemoteBackend,
        request: &PredictionRequest,
        method: MethodId,
        attempt: &BackendAttempt,
    ) -> Result<RawOutput, AttemptError> {
        let contents = script::render(&remote.host, method)
            .map_err(|e| AttemptError::Transport(format!("failed to render script: {e}")))?;
        let paths = self.store.remote_paths(request.file_name());
        let script = self
            .store
            .write_script(&contents)
            .map_err(|e| AttemptError::Transport(format!("failed to write script: {e}")))?;

        let output = remote
            .channel
            .run(
                request.image_path(),
                script.local_path(),
                &paths,
                &remote.host,
                attempt.budget(),
            )
            .await?;

        if !output.success() {
            return Err(remote_failure(&output));
        }
        if !output.stderr.trim().is_empty() {
            tracing::debug!(stderr = %output.stderr.trim(), "Remote script stderr");
        }
        Ok(RawOutput::new(output.stdout))
    }
}

fn parse_output(strategy: Strategy, raw: &RawOutput) -> Result<Prediction, AttemptError> {
    let exit_code = (strategy == Strategy::RemoteScript).then_some(0);
    ResultParser::parse(&raw.text).map_err(|f| AttemptError::from_parse(f, exit_code))
}

/// Describe a non-zero remote exit using the script's error payload if it
/// printed one, else the last stderr line.
fn remote_failure(output: &RemoteOutput) -> AttemptError {
    let detail = match ResultParser::parse(&output.stdout) {
        Err(ParseFailure::BackendError { error, .. }) => error,
        _ => output
            .stderr
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .unwrap_or("no output")
            .to_string(),
    };
    AttemptError::RemoteFailure {
        exit_code: output.exit_code,
        detail,
    }
}

fn fallback_note(absorbed: &[BackendAttempt]) -> String {
    let failures: Vec<String> = absorbed
        .iter()
        .filter_map(|a| match &a.outcome {
            AttemptOutcome::Failure(e) => Some(format!("{}: {}", a.strategy, e)),
            _ => None,
        })
        .collect();
    if failures.is_empty() {
        format!("{SYNTHETIC_NOTE_PREFIX}: no inference backend configured")
    } else {
        format!(
            "{SYNTHETIC_NOTE_PREFIX}: fallback after {}",
            failures.join("; ")
        )
    }
}

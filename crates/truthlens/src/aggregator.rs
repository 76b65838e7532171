//! Fan-out of one request across several methods.

use std::sync::Arc;

use futures::StreamExt;

use crate::orchestrator::StrategyOrchestrator;
use crate::prediction::{AggregateResult, MethodPrediction};
use crate::request::PredictionRequest;

pub struct MultiMethodAggregator {
    orchestrator: Arc<StrategyOrchestrator>,
    max_concurrency: usize,
}

impl MultiMethodAggregator {
    pub fn new(orchestrator: Arc<StrategyOrchestrator>, max_concurrency: usize) -> Self {
        Self {
            orchestrator,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn orchestrator(&self) -> &Arc<StrategyOrchestrator> {
        &self.orchestrator
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Dispatch once per requested method, at most `max_concurrency` at a
    /// time.
    ///
    /// Rows come back in request order; a request without methods runs the
    /// default one. The image is shared by every dispatch and deleted after
    /// the last one.
    pub async fn aggregate(&self, request: PredictionRequest) -> AggregateResult {
        let methods = request.method_set();
        tracing::debug!(
            methods = methods.len(),
            max_concurrency = self.max_concurrency,
            "Aggregating prediction"
        );
        let request_ref = &request;
        let rows: Vec<MethodPrediction> = futures::stream::iter(methods.iter().copied())
            .map(|method| async move {
                let prediction = self
                    .orchestrator
                    .dispatch_ref(request_ref, Some(method))
                    .await;
                MethodPrediction::new(method, prediction)
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;
        request.finish();

        let result = AggregateResult::new(rows);
        tracing::info!(
            methods = result.len(),
            consensus = result.consensus.label.as_str(),
            confidence = result.consensus.confidence,
            "Aggregate completed"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::{DispatchConfig, HttpApiConfig, RemoteHostConfig};
    use crate::method::{MethodId, MethodSet};
    use crate::prediction::Label;
    use crate::remote::{RemoteCommand, RemoteOutput, RemoteTransport, TransportError};

    fn config(dir: &Path) -> DispatchConfig {
        DispatchConfig::default()
            .with_scratch_dir(dir.join("scratch"))
            .with_synthetic_delay(Duration::ZERO)
    }

    fn request(orchestrator: &StrategyOrchestrator) -> PredictionRequest {
        let image = orchestrator
            .artifact_store()
            .store_upload(b"img", "face.jpg")
            .unwrap();
        PredictionRequest::new(image, "face.jpg")
    }

    async fn mount_method(server: &MockServer, id: &str, body: &str, delay_ms: u64) {
        Mock::given(method("POST"))
            .and(path("/predict"))
            .and(body_partial_json(serde_json::json!({ "method": id })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body)
                    .set_delay(Duration::from_millis(delay_ms)),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn preserves_order_and_computes_consensus() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        mount_method(
            &server,
            "hog_rf",
            r#"{"prediction":"truth","confidence":0.9,"processing_time":1.0}"#,
            300,
        )
        .await;
        mount_method(
            &server,
            "dlib_dt",
            r#"{"prediction":"truth","confidence":0.8,"processing_time":2.0}"#,
            0,
        )
        .await;
        mount_method(
            &server,
            "resnet_lr",
            r#"{"prediction":"lie","confidence":0.6,"processing_time":0.5}"#,
            100,
        )
        .await;

        let orchestrator = Arc::new(StrategyOrchestrator::new(
            &config(dir.path()).with_http(HttpApiConfig::new(server.uri())),
        ));
        let aggregator = MultiMethodAggregator::new(orchestrator.clone(), 3);
        let methods = MethodSet::parse(&["hog_rf", "dlib_dt", "resnet_lr"]).unwrap();

        let req = request(&orchestrator).with_methods(methods.iter().copied());
        let image = req.image_path().to_path_buf();
        let result = aggregator.aggregate(req).await;

        let ids: Vec<String> = result.per_method.iter().map(|r| r.method.to_string()).collect();
        assert_eq!(ids, ["hog_rf", "dlib_dt", "resnet_lr"]);
        assert_eq!(result.per_method[2].model_combination, "RESNET + LR");
        assert_eq!(result.consensus.label, Label::Truth);
        assert!((result.consensus.confidence - 0.766_666).abs() < 1e-5);
        assert!((result.consensus.total_processing_time - 3.5).abs() < 1e-9);
        assert!(!image.exists());
    }

    #[tokio::test]
    async fn default_set_dispatches_default_method() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({ "method": "dlib_rf" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"prediction":"lie","confidence":0.7}"#),
            )
            .expect(2)
            .mount(&server)
            .await;

        let orchestrator = Arc::new(StrategyOrchestrator::new(
            &config(dir.path()).with_http(HttpApiConfig::new(server.uri())),
        ));
        let aggregator = MultiMethodAggregator::new(orchestrator.clone(), 3);

        let multi = aggregator.aggregate(request(&orchestrator)).await;
        let single = orchestrator.dispatch(request(&orchestrator), None).await;

        assert_eq!(multi.len(), 1);
        assert_eq!(multi.per_method[0].method, MethodId::DEFAULT);
        assert_eq!(multi.per_method[0].prediction.label, single.label);
        assert_eq!(multi.per_method[0].prediction.confidence, single.confidence);
        assert_eq!(multi.consensus.confidence, 0.7);
    }

    /// Records the peak number of concurrent executions.
    #[derive(Default)]
    struct GaugeTransport {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RemoteTransport for GaugeTransport {
        async fn copy_to(&self, _local: &Path, _remote: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn execute(&self, _command: &RemoteCommand) -> Result<RemoteOutput, TransportError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(RemoteOutput {
                exit_code: Some(0),
                stdout: r#"{"prediction":"truth","confidence":0.7}"#.to_string(),
                stderr: String::new(),
            })
        }

        async fn remove(&self, _paths: &[String]) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(GaugeTransport::default());
        let orchestrator = Arc::new(StrategyOrchestrator::with_transport(
            &config(dir.path()).with_remote(RemoteHostConfig::new("gpu")),
            transport.clone(),
        ));
        let aggregator = MultiMethodAggregator::new(orchestrator.clone(), 2);
        let all: Vec<String> = MethodId::ALL.iter().map(|m| m.to_string()).collect();
        let methods = MethodSet::parse(&all).unwrap();

        let result = aggregator
            .aggregate(request(&orchestrator).with_methods(methods.iter().copied()))
            .await;

        assert_eq!(result.len(), MethodId::ALL.len());
        assert_eq!(transport.peak.load(Ordering::SeqCst), 2);
        assert_eq!(result.consensus.agreeing, MethodId::ALL.len());
        assert!(result.per_method.iter().all(|r| !r.prediction.is_synthetic()));
    }

    #[tokio::test]
    async fn synthetic_rows_still_fill_the_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Arc::new(StrategyOrchestrator::new(&config(dir.path())));
        let aggregator = MultiMethodAggregator::new(orchestrator.clone(), 3);
        let methods = MethodSet::parse(&["resnet_rf", "hog_dt"]).unwrap();

        let result = aggregator
            .aggregate(request(&orchestrator).with_methods(methods.iter().copied()))
            .await;

        assert_eq!(result.len(), 2);
        assert_eq!(result.per_method[0].prediction.encoding_method, "resnet");
        assert_eq!(result.per_method[1].prediction.model_type, "DecisionTree");
        assert_eq!(result.consensus.considered, 2);
    }
}

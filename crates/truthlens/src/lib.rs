//! truthlens: prediction dispatch with fallback strategies.
//!
//! A request is tried against an HTTP inference service, then a remote
//! host over ssh, and finally answered synthetically so callers always get
//! a well-formed [`Prediction`].

mod aggregator;
mod artifact;
mod attempt;
mod health;
mod http_client;
mod method;
mod parser;
mod prediction;
mod request;
mod script;
mod synthetic;
mod version;

pub mod config;
pub mod orchestrator;
pub mod remote;
pub mod service;
pub mod transport;

pub use aggregator::MultiMethodAggregator;
pub use artifact::{ArtifactStore, RemotePaths, TemporaryArtifact};
pub use attempt::{AttemptError, AttemptOutcome, BackendAttempt, RawOutput, Strategy};
pub use config::{
    ArtifactConfig, ConfigError, DispatchConfig, HttpApiConfig, RemoteHostConfig, SyntheticConfig,
};
pub use health::{ConnectionReport, HealthReport, HealthStatus, HttpApiStatus, RemoteScriptStatus};
pub use http_client::HttpInferenceClient;
pub use method::{
    ClassifierKind, EncodingKind, MethodDescriptor, MethodId, MethodSet, available_methods,
};
pub use orchestrator::StrategyOrchestrator;
pub use parser::{DEFAULT_CONFIDENCE, ParseFailure, ResultParser};
pub use prediction::{AggregateResult, Consensus, FeatureCount, Label, MethodPrediction, Prediction};
pub use request::{PredictionRequest, RequestError};
pub use service::{MultiPredictResponse, PredictResponse, PredictionService, Upload};
pub use synthetic::{SYNTHETIC_NOTE_PREFIX, SyntheticPredictor};
pub use version::{TRUTHLENS_VERSION, VersionInfo};

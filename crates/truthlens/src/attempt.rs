//! Strategy identifiers and the per-attempt record.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::parser::ParseFailure;

/// Execution strategies, in the order the orchestrator tries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    HttpApi,
    RemoteScript,
    Synthetic,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpApi => "http_api",
            Self::RemoteScript => "remote_script",
            Self::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unparsed backend output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub text: String,
}

impl RawOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Why a strategy was abandoned. Never reaches the caller; every variant is
/// absorbed into fallback.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote failure (exit code {exit_code:?}): {detail}")]
    RemoteFailure {
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("unparseable output: {0}")]
    Parse(ParseFailure),
}

impl AttemptError {
    /// Parse failures that carry a backend `error` payload are remote
    /// failures, not parse failures.
    pub fn from_parse(failure: ParseFailure, exit_code: Option<i32>) -> Self {
        match failure {
            ParseFailure::BackendError { error, .. } => Self::RemoteFailure {
                exit_code,
                detail: error,
            },
            other => Self::Parse(other),
        }
    }
}

#[derive(Debug)]
pub enum AttemptOutcome {
    Pending,
    Success(RawOutput),
    Failure(AttemptError),
}

/// One try of one strategy. Created per attempt, never persisted.
#[derive(Debug)]
pub struct BackendAttempt {
    pub strategy: Strategy,
    pub started_at: Instant,
    pub deadline: Instant,
    pub outcome: AttemptOutcome,
}

impl BackendAttempt {
    pub fn start(strategy: Strategy, budget: Duration) -> Self {
        let started_at = Instant::now();
        Self {
            strategy,
            started_at,
            deadline: started_at + budget,
            outcome: AttemptOutcome::Pending,
        }
    }

    pub fn budget(&self) -> Duration {
        self.deadline.saturating_duration_since(self.started_at)
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Pending)
    }

    pub fn succeed(&mut self, raw: RawOutput) {
        self.outcome = AttemptOutcome::Success(raw);
    }

    pub fn fail(&mut self, error: AttemptError) {
        self.outcome = AttemptOutcome::Failure(error);
    }

    /// Record a result from the strategy call.
    pub fn settle(&mut self, result: Result<RawOutput, AttemptError>) {
        match result {
            Ok(raw) => self.succeed(raw),
            Err(e) => self.fail(e),
        }
    }
}

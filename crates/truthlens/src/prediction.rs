//! Prediction and aggregate result types.
//!
//! A [`Prediction`] is the unit handed back to callers. It is always fully
//! populated: backends that fail or emit garbage are replaced by a synthetic
//! prediction rather than surfacing partial records.

use serde::{Deserialize, Serialize};

use crate::method::MethodId;

/// Binary classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Truth,
    Lie,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Truth => "truth",
            Self::Lie => "lie",
        }
    }

    /// Lenient parse accepting the spellings backends have been seen to emit.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "truth" | "truthful" => Some(Self::Truth),
            "lie" | "deceptive" => Some(Self::Lie),
            _ => None,
        }
    }
}

/// Feature vector length reported by the backend, if it reported one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureCount {
    Known(u32),
    Unknown,
}

impl Serialize for FeatureCount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Known(n) => serializer.serialize_u32(*n),
            Self::Unknown => serializer.serialize_str("N/A"),
        }
    }
}

/// A single classification result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    #[serde(rename = "prediction")]
    pub label: Label,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub encoding_method: String,
    pub features_extracted: FeatureCount,
    pub model_type: String,
    #[serde(rename = "processing_time")]
    pub processing_time_seconds: f64,
    /// Diagnostic annotation; set on every non-authoritative result.
    #[serde(rename = "note", skip_serializing_if = "Option::is_none")]
    pub source_note: Option<String>,
}

impl Prediction {
    pub fn is_synthetic(&self) -> bool {
        self.source_note
            .as_deref()
            .is_some_and(|n| n.starts_with(crate::synthetic::SYNTHETIC_NOTE_PREFIX))
    }
}

/// One row of an aggregate: which method produced which prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodPrediction {
    pub method: MethodId,
    pub model_combination: String,
    #[serde(flatten)]
    pub prediction: Prediction,
}

impl MethodPrediction {
    pub fn new(method: MethodId, prediction: Prediction) -> Self {
        Self {
            method,
            model_combination: method.model_combination(),
            prediction,
        }
    }
}

/// Consensus statistics over an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Consensus {
    pub label: Label,
    /// Mean confidence over all considered predictions.
    pub confidence: f64,
    pub total_processing_time: f64,
    /// Number of predictions that voted for `label`.
    pub agreeing: usize,
    pub considered: usize,
}

impl Consensus {
    /// Majority vote by count with ties going to [`Label::Lie`].
    pub fn compute<'a>(predictions: impl IntoIterator<Item = &'a Prediction>) -> Self {
        let mut truth = 0usize;
        let mut lie = 0usize;
        let mut confidence_sum = 0.0;
        let mut time_sum = 0.0;

        for p in predictions {
            match p.label {
                Label::Truth => truth += 1,
                Label::Lie => lie += 1,
            }
            confidence_sum += p.confidence;
            time_sum += p.processing_time_seconds;
        }

        let considered = truth + lie;
        let (label, agreeing) = if truth > lie {
            (Label::Truth, truth)
        } else {
            (Label::Lie, lie)
        };
        let confidence = if considered == 0 {
            0.0
        } else {
            confidence_sum / considered as f64
        };

        Self {
            label,
            confidence,
            total_processing_time: time_sum,
            agreeing,
            considered,
        }
    }
}

/// Result of running one request through several methods.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    #[serde(rename = "results")]
    pub per_method: Vec<MethodPrediction>,
    pub consensus: Consensus,
}

impl AggregateResult {
    pub fn new(per_method: Vec<MethodPrediction>) -> Self {
        let consensus = Consensus::compute(per_method.iter().map(|m| &m.prediction));
        Self {
            per_method,
            consensus,
        }
    }

    pub fn len(&self) -> usize {
        self.per_method.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_method.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn sample(label: Label, confidence: f64, processing_time_seconds: f64) -> Prediction {
    Prediction {
        label,
        confidence,
        encoding_method: "dlib".to_string(),
        features_extracted: FeatureCount::Known(68),
        model_type: "PyTorch".to_string(),
        processing_time_seconds,
        source_note: None,
    }
}

//! Terminal fallback: a plausible, clearly marked fabricated prediction.

use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;

use crate::config::SyntheticConfig;
use crate::method::{EncodingKind, MethodId};
use crate::prediction::{FeatureCount, Label, Prediction};

/// Every synthetic `source_note` starts with this.
pub const SYNTHETIC_NOTE_PREFIX: &str = "synthetic";

const TRUTH_CONFIDENCE: RangeInclusive<f64> = 0.65..=0.92;
const LIE_CONFIDENCE: RangeInclusive<f64> = 0.58..=0.89;
const UNSPECIFIED_MODEL: &str = "PyTorch";

#[derive(Debug, Clone)]
pub struct SyntheticPredictor {
    delay: Duration,
}

impl SyntheticPredictor {
    pub fn new(config: &SyntheticConfig) -> Self {
        Self::with_delay(config.delay)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sleep for the configured delay, then fabricate a prediction.
    pub async fn generate(&self, method: Option<MethodId>) -> Prediction {
        let started = tokio::time::Instant::now();
        tokio::time::sleep(self.delay).await;
        let mut prediction = fabricate(&mut rand::rng(), method);
        prediction.processing_time_seconds = started.elapsed().as_secs_f64();
        prediction
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Draw a prediction without any delay.
pub fn fabricate<R: Rng + ?Sized>(rng: &mut R, method: Option<MethodId>) -> Prediction {
    let label = if rng.random_bool(0.5) {
        Label::Truth
    } else {
        Label::Lie
    };
    let band = match label {
        Label::Truth => TRUTH_CONFIDENCE,
        Label::Lie => LIE_CONFIDENCE,
    };
    let confidence = round4(rng.random_range(band));

    let (encoding, model_type) = match method {
        Some(m) => (m.encoding, m.classifier.name()),
        None => {
            let idx = rng.random_range(0..EncodingKind::ALL.len());
            (EncodingKind::ALL[idx], UNSPECIFIED_MODEL)
        }
    };

    Prediction {
        label,
        confidence,
        encoding_method: encoding.as_str().to_string(),
        features_extracted: FeatureCount::Known(encoding.feature_count()),
        model_type: model_type.to_string(),
        processing_time_seconds: 0.0,
        source_note: Some(format!(
            "{SYNTHETIC_NOTE_PREFIX}: no inference backend produced this result"
        )),
    }
}

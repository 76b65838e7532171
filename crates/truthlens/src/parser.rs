//! Turns raw backend output into a [`Prediction`].
//!
//! Backends are loosely specified: scripts print log lines before their JSON,
//! confidence arrives as a fraction, a percentage or a string, and feature
//! counts are sometimes `"N/A"`. Everything that can be coerced is; anything
//! that cannot becomes a [`ParseFailure`].

use serde_json::{Map, Value};

use crate::prediction::{FeatureCount, Label, Prediction};

/// Used when a backend omits confidence entirely.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseFailure {
    #[error("empty output")]
    Empty,

    #[error("output is not JSON: {0:?}")]
    NotJson(String),

    #[error("expected a JSON object")]
    NotAnObject,

    #[error("backend reported an error: {error}")]
    BackendError {
        error: String,
        traceback: Option<String>,
    },

    #[error("missing prediction label")]
    MissingLabel,

    #[error("unrecognized prediction label: {0:?}")]
    InvalidLabel(String),

    #[error("invalid confidence: {0}")]
    InvalidConfidence(String),
}

pub struct ResultParser;

impl ResultParser {
    pub fn parse(raw: &str) -> Result<Prediction, ParseFailure> {
        let value = locate_json(raw)?;
        let Value::Object(obj) = value else {
            return Err(ParseFailure::NotAnObject);
        };

        if let Some(error) = obj.get("error").filter(|v| !v.is_null()) {
            return Err(ParseFailure::BackendError {
                error: value_text(error),
                traceback: obj.get("traceback").and_then(Value::as_str).map(str::to_string),
            });
        }

        let label = match obj.get("prediction") {
            None | Some(Value::Null) => return Err(ParseFailure::MissingLabel),
            Some(Value::String(s)) => {
                Label::parse_lenient(s).ok_or_else(|| ParseFailure::InvalidLabel(s.clone()))?
            }
            Some(other) => return Err(ParseFailure::InvalidLabel(other.to_string())),
        };

        Ok(Prediction {
            label,
            confidence: confidence(obj.get("confidence"))?,
            encoding_method: text_field(&obj, "encoding_method"),
            features_extracted: feature_count(obj.get("features_extracted")),
            model_type: text_field(&obj, "model_type"),
            processing_time_seconds: processing_time(obj.get("processing_time")),
            source_note: obj.get("note").and_then(Value::as_str).map(str::to_string),
        })
    }
}

/// Whole output as JSON (pretty-printed HTTP bodies), else the last non-empty
/// line (script output preceded by logs).
fn locate_json(raw: &str) -> Result<Value, ParseFailure> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseFailure::Empty);
    }
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }
    let last = trimmed
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .ok_or(ParseFailure::Empty)?;
    serde_json::from_str(last).map_err(|_| ParseFailure::NotJson(snippet(last)))
}

fn snippet(line: &str) -> String {
    const MAX: usize = 120;
    match line.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &line[..idx]),
        None => line.to_string(),
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn number_of(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

fn confidence(v: Option<&Value>) -> Result<f64, ParseFailure> {
    let v = match v {
        None | Some(Value::Null) => return Ok(DEFAULT_CONFIDENCE),
        Some(v) => v,
    };
    let invalid = || ParseFailure::InvalidConfidence(v.to_string());
    let n = number_of(v).filter(|n| n.is_finite()).ok_or_else(invalid)?;
    let explicit_percent = matches!(v, Value::String(s) if s.trim_end().ends_with('%'));
    match n {
        n if explicit_percent && (0.0..=100.0).contains(&n) => Ok(n / 100.0),
        n if explicit_percent => Err(invalid()),
        n if (0.0..=1.0).contains(&n) => Ok(n),
        // (1, 2) is neither a plausible fraction nor a plausible percentage.
        n if (2.0..=100.0).contains(&n) => Ok(n / 100.0),
        _ => Err(invalid()),
    }
}

fn feature_count(v: Option<&Value>) -> FeatureCount {
    v.and_then(number_of)
        .filter(|n| n.is_finite() && *n >= 0.0 && n.fract() == 0.0 && *n <= u32::MAX as f64)
        .map(|n| FeatureCount::Known(n as u32))
        .unwrap_or(FeatureCount::Unknown)
}

fn processing_time(v: Option<&Value>) -> f64 {
    v.and_then(number_of)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .unwrap_or(0.0)
}

fn text_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_single_line() {
        let p = ResultParser::parse(
            r#"{"prediction":"truth","confidence":0.87,"encoding_method":"dlib","features_extracted":68,"model_type":"RandomForest"}"#,
        )
        .unwrap();
        assert_eq!(p.label, Label::Truth);
        assert_eq!(p.confidence, 0.87);
        assert_eq!(p.encoding_method, "dlib");
        assert_eq!(p.features_extracted, FeatureCount::Known(68));
        assert_eq!(p.model_type, "RandomForest");
        assert_eq!(p.processing_time_seconds, 0.0);
        assert_eq!(p.source_note, None);
    }

    #[test]
    fn json_after_log_lines() {
        let raw = "Loading model...\nWARNING: cuda unavailable\nextracting landmarks\n\
                   {\"prediction\": \"Lie\", \"confidence\": 0.61}\n\n";
        let p = ResultParser::parse(raw).unwrap();
        assert_eq!(p.label, Label::Lie);
        assert_eq!(p.confidence, 0.61);
        assert_eq!(p.encoding_method, "unknown");
        assert_eq!(p.model_type, "unknown");
        assert_eq!(p.features_extracted, FeatureCount::Unknown);
    }

    #[test]
    fn pretty_printed_body() {
        let raw = "{\n  \"prediction\": \"truthful\",\n  \"confidence\": \"91.5\"\n}\n";
        let p = ResultParser::parse(raw).unwrap();
        assert_eq!(p.label, Label::Truth);
        assert!((p.confidence - 0.915).abs() < 1e-12);
    }

    #[test]
    fn backend_error_payload() {
        let raw = "Traceback noise\n{\"error\": \"Model file not found\", \"traceback\": \"line 3\"}";
        assert_eq!(
            ResultParser::parse(raw).unwrap_err(),
            ParseFailure::BackendError {
                error: "Model file not found".into(),
                traceback: Some("line 3".into()),
            }
        );
    }

    #[test]
    fn non_json_text() {
        assert!(matches!(
            ResultParser::parse("segmentation fault (core dumped)"),
            Err(ParseFailure::NotJson(_))
        ));
        assert_eq!(ResultParser::parse("  \n\n"), Err(ParseFailure::Empty));
        assert_eq!(ResultParser::parse("[1, 2]"), Err(ParseFailure::NotAnObject));
    }

    #[test]
    fn label_problems() {
        assert_eq!(
            ResultParser::parse(r#"{"confidence": 0.9}"#),
            Err(ParseFailure::MissingLabel)
        );
        assert_eq!(
            ResultParser::parse(r#"{"prediction": "maybe"}"#),
            Err(ParseFailure::InvalidLabel("maybe".into()))
        );
        assert!(matches!(
            ResultParser::parse(r#"{"prediction": 1}"#),
            Err(ParseFailure::InvalidLabel(_))
        ));
    }

    #[test]
    fn confidence_coercions() {
        let conf = |c: &str| {
            ResultParser::parse(&format!(r#"{{"prediction":"truth","confidence":{c}}}"#))
                .map(|p| p.confidence)
        };
        assert_eq!(conf("1"), Ok(1.0));
        assert_eq!(conf("0"), Ok(0.0));
        assert_eq!(conf("75"), Ok(0.75));
        assert_eq!(conf("\"0.42\""), Ok(0.42));
        assert_eq!(conf("\"80%\""), Ok(0.8));
        assert_eq!(conf("\"1.5%\""), Ok(0.015));
        assert_eq!(conf("\"0.5%\""), Ok(0.005));
        assert_eq!(conf("2"), Ok(0.02));
        assert!(matches!(conf("1.5"), Err(ParseFailure::InvalidConfidence(_))));
        assert!(matches!(conf("\"1.5\""), Err(ParseFailure::InvalidConfidence(_))));
        assert!(matches!(conf("\"120%\""), Err(ParseFailure::InvalidConfidence(_))));
        assert_eq!(conf("null"), Ok(DEFAULT_CONFIDENCE));
        assert!(matches!(conf("150"), Err(ParseFailure::InvalidConfidence(_))));
        assert!(matches!(conf("-0.1"), Err(ParseFailure::InvalidConfidence(_))));
        assert!(matches!(conf("\"high\""), Err(ParseFailure::InvalidConfidence(_))));
        assert!(matches!(conf("\"NaN\""), Err(ParseFailure::InvalidConfidence(_))));

        let missing = ResultParser::parse(r#"{"prediction":"lie"}"#).unwrap();
        assert_eq!(missing.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn feature_count_coercions() {
        let features = |f: &str| {
            ResultParser::parse(&format!(r#"{{"prediction":"truth","features_extracted":{f}}}"#))
                .unwrap()
                .features_extracted
        };
        assert_eq!(features("324"), FeatureCount::Known(324));
        assert_eq!(features("512.0"), FeatureCount::Known(512));
        assert_eq!(features("\"68\""), FeatureCount::Known(68));
        assert_eq!(features("\"N/A\""), FeatureCount::Unknown);
        assert_eq!(features("12.5"), FeatureCount::Unknown);
        assert_eq!(features("-3"), FeatureCount::Unknown);
        assert_eq!(features("[1,2]"), FeatureCount::Unknown);
    }

    #[test]
    fn serialized_prediction_round_trips() {
        let original = Prediction {
            label: Label::Lie,
            confidence: 0.7312,
            encoding_method: "hog".into(),
            features_extracted: FeatureCount::Unknown,
            model_type: "DecisionTree".into(),
            processing_time_seconds: 1.25,
            source_note: Some("cached".into()),
        };
        let json = serde_json::to_string(&original).unwrap();
        assert_eq!(ResultParser::parse(&json).unwrap(), original);
    }

    #[test]
    fn long_garbage_is_truncated_in_error() {
        let garbage = "x".repeat(500);
        let ParseFailure::NotJson(s) = ResultParser::parse(&garbage).unwrap_err() else {
            panic!("expected NotJson");
        };
        assert_eq!(s.len(), 123);
    }
}

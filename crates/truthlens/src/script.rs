//! Renders the analysis script uploaded by the RemoteScript strategy.
//!
//! The script body is fixed; only a JSON config blob is substituted in, as a
//! quoted string literal, so no configured value is ever spliced into code.

use serde::Serialize;

use crate::config::RemoteHostConfig;
use crate::method::MethodId;

const TEMPLATE: &str = include_str!("../scripts/remote_predict.py");
const PLACEHOLDER: &str = "__TRUTHLENS_CONFIG__";

#[derive(Debug, Serialize)]
struct ScriptConfig<'a> {
    project_path: &'a str,
    model_file: &'a str,
    landmarks_file: &'a str,
    encoding: &'a str,
    classifier: &'a str,
    model_type: &'a str,
}

/// Produce the script for one attempt.
pub fn render(remote: &RemoteHostConfig, method: MethodId) -> Result<String, serde_json::Error> {
    let config = ScriptConfig {
        project_path: &remote.project_path,
        model_file: &remote.model_file,
        landmarks_file: &remote.landmarks_file,
        encoding: method.encoding.as_str(),
        classifier: method.classifier.code(),
        model_type: method.classifier.name(),
    };
    // Encode twice: the outer layer is a JSON string literal, which Python
    // also accepts as a str literal.
    let inner = serde_json::to_string(&config)?;
    let literal = serde_json::to_string(&inner)?;
    Ok(TEMPLATE.replacen(PLACEHOLDER, &literal, 1))
}

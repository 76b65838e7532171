//! Version information for truthlens.

/// Crate version from Cargo.toml
pub const TRUTHLENS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version block reported by the health endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub truthlens: &'static str,
    /// Build identifier, when the deployment provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            truthlens: TRUTHLENS_VERSION,
            build: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_build(mut self, build: impl Into<String>) -> Self {
        self.build = Some(build.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_has_crate_version() {
        let info = VersionInfo::new();
        assert_eq!(info.truthlens, TRUTHLENS_VERSION);
        assert!(info.build.is_none());
    }

    #[test]
    fn version_info_serializes() {
        let info = VersionInfo {
            truthlens: "0.1.0",
            build: None,
        };
        insta::assert_json_snapshot!(info, @r#"
        {
          "truthlens": "0.1.0"
        }
        "#);

        let info = info.with_build("abc123");
        insta::assert_json_snapshot!(info, @r#"
        {
          "truthlens": "0.1.0",
          "build": "abc123"
        }
        "#);
    }
}

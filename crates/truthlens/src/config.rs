//! Dispatch configuration.
//!
//! Loaded once at startup from a JSON file (the `server-config.json` shape,
//! camelCase keys) plus `TRUTHLENS_*` environment overrides, then passed by
//! value into the dispatcher. Nothing here is re-read after construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;


/// Hosts that mean "not configured yet".
const PLACEHOLDER_HOSTS: &[&str] = &["", "your-server-ip"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// HttpApi strategy settings.
#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    /// Full URL of the prediction endpoint.
    pub predict_url: String,
    /// URL hit by the connection check.
    pub health_url: String,
    pub timeout: Duration,
    pub health_timeout: Duration,
}

impl HttpApiConfig {
    /// Build from a base URL such as `http://host:5000`.
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self::with_endpoint(base_url, "/predict")
    }

    pub fn with_endpoint(base_url: impl AsRef<str>, endpoint: &str) -> Self {
        let base = base_url.as_ref().trim_end_matches('/');
        let endpoint = if endpoint.starts_with('/') {
            endpoint.to_string()
        } else {
            format!("/{endpoint}")
        };
        Self {
            predict_url: format!("{base}{endpoint}"),
            health_url: format!("{base}/health"),
            timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// RemoteScript strategy settings.
#[derive(Debug, Clone)]
pub struct RemoteHostConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub python_path: String,
    /// Remote directory holding the model assets; scripts run from here.
    pub project_path: String,
    pub model_file: String,
    pub landmarks_file: String,
    /// Budget for the whole copy/execute/cleanup unit.
    pub timeout: Duration,
    /// Portion of `timeout` reserved for remote cleanup.
    pub cleanup_grace: Duration,
    pub connect_timeout: Duration,
}

impl RemoteHostConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: None,
            identity_file: None,
            python_path: "python3".to_string(),
            project_path: ".".to_string(),
            model_file: "balanced_model.pth".to_string(),
            landmarks_file: "shape_predictor_68_face_landmarks.dat".to_string(),
            timeout: Duration::from_secs(60),
            cleanup_grace: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_project_path(mut self, path: impl Into<String>) -> Self {
        self.project_path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cleanup_grace(mut self, grace: Duration) -> Self {
        self.cleanup_grace = grace;
        self
    }

    /// `user@host` or just `host`.
    pub fn destination(&self) -> String {
        match &self.username {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Artificial latency before a synthetic result is returned.
    pub delay: Duration,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactConfig {
    pub scratch_dir: PathBuf,
    pub remote_temp_dir: String,
    pub max_upload_bytes: usize,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("truthlens"),
            remote_temp_dir: "/tmp".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Everything the dispatcher needs, resolved and validated.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub http: Option<HttpApiConfig>,
    pub remote: Option<RemoteHostConfig>,
    pub synthetic: SyntheticConfig,
    pub artifacts: ArtifactConfig,
    /// Upper bound on concurrent per-method dispatches in one aggregation.
    pub max_concurrency: usize,
}

impl Default for DispatchConfig {
    /// Synthetic-only configuration.
    fn default() -> Self {
        Self {
            http: None,
            remote: None,
            synthetic: SyntheticConfig::default(),
            artifacts: ArtifactConfig::default(),
            max_concurrency: 3,
        }
    }
}

impl DispatchConfig {
    /// Load from `path` (if given and present) and apply environment overrides.
    ///
    /// A missing file falls back to defaults with a warning.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut file = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Read {
                    path: p.display().to_string(),
                    source,
                })?;
                tracing::info!(path = %p.display(), "Loaded dispatch configuration");
                serde_json::from_str(&text)?
            }
            Some(p) => {
                tracing::warn!(path = %p.display(), "Config file not found, using defaults");
                ConfigFile::default()
            }
            None => ConfigFile::default(),
        };
        file.apply_env(|key| std::env::var(key).ok())?;
        file.resolve()
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(text)?;
        file.resolve()
    }

    pub fn with_http(mut self, http: HttpApiConfig) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_remote(mut self, remote: RemoteHostConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_synthetic_delay(mut self, delay: Duration) -> Self {
        self.synthetic.delay = delay;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts.scratch_dir = dir.into();
        self
    }

    /// Worst-case wall time of a single dispatch, excluding scheduling slack.
    pub fn dispatch_budget(&self) -> Duration {
        self.http.as_ref().map(|h| h.timeout).unwrap_or_default()
            + self.remote.as_ref().map(|r| r.timeout).unwrap_or_default()
            + self.synthetic.delay
    }
}

fn default_port() -> u16 {
    22
}
fn default_python_path() -> String {
    "python3".to_string()
}
fn default_project_path() -> String {
    ".".to_string()
}
fn default_api_port() -> Option<u16> {
    Some(5000)
}
fn default_api_endpoint() -> String {
    "/predict".to_string()
}
fn default_model_file() -> String {
    "balanced_model.pth".to_string()
}
fn default_landmarks_file() -> String {
    "shape_predictor_68_face_landmarks.dat".to_string()
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_remote_timeout_secs() -> u64 {
    60
}
fn default_cleanup_grace_secs() -> u64 {
    5
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_synthetic_delay_ms() -> u64 {
    2000
}
fn default_max_concurrency() -> usize {
    3
}
fn default_remote_temp_dir() -> String {
    "/tmp".to_string()
}
fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

/// On-disk representation. Every key is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConfigFile {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    username: Option<String>,
    identity_file: Option<PathBuf>,
    #[serde(default = "default_python_path")]
    python_path: String,
    #[serde(default = "default_project_path")]
    project_path: String,
    #[serde(default = "default_api_port")]
    api_port: Option<u16>,
    #[serde(default = "default_api_endpoint")]
    api_endpoint: String,
    api_url: Option<String>,
    #[serde(default = "default_model_file")]
    model_file: String,
    #[serde(default = "default_landmarks_file")]
    landmarks_file: String,
    #[serde(default = "default_http_timeout_secs")]
    http_timeout_secs: u64,
    #[serde(default = "default_remote_timeout_secs")]
    remote_timeout_secs: u64,
    #[serde(default = "default_cleanup_grace_secs")]
    cleanup_grace_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    connect_timeout_secs: u64,
    #[serde(default = "default_synthetic_delay_ms")]
    synthetic_delay_ms: u64,
    #[serde(default = "default_max_concurrency")]
    max_concurrency: usize,
    scratch_dir: Option<PathBuf>,
    #[serde(default = "default_remote_temp_dir")]
    remote_temp_dir: String,
    #[serde(default = "default_max_upload_bytes")]
    max_upload_bytes: usize,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: None,
            identity_file: None,
            python_path: default_python_path(),
            project_path: default_project_path(),
            api_port: default_api_port(),
            api_endpoint: default_api_endpoint(),
            api_url: None,
            model_file: default_model_file(),
            landmarks_file: default_landmarks_file(),
            http_timeout_secs: default_http_timeout_secs(),
            remote_timeout_secs: default_remote_timeout_secs(),
            cleanup_grace_secs: default_cleanup_grace_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            synthetic_delay_ms: default_synthetic_delay_ms(),
            max_concurrency: default_max_concurrency(),
            scratch_dir: None,
            remote_temp_dir: default_remote_temp_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}

impl ConfigFile {
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("TRUTHLENS_HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("TRUTHLENS_USER") {
            self.username = Some(v);
        }
        if let Some(v) = lookup("TRUTHLENS_IDENTITY_FILE") {
            self.identity_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("TRUTHLENS_PROJECT_PATH") {
            self.project_path = v;
        }
        if let Some(v) = lookup("TRUTHLENS_API_URL") {
            self.api_url = Some(v);
        }
        if let Some(v) = lookup("TRUTHLENS_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = parse_env("TRUTHLENS_HTTP_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("TRUTHLENS_REMOTE_TIMEOUT_SECS") {
            self.remote_timeout_secs = parse_env("TRUTHLENS_REMOTE_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("TRUTHLENS_SYNTHETIC_DELAY_MS") {
            self.synthetic_delay_ms = parse_env("TRUTHLENS_SYNTHETIC_DELAY_MS", v)?;
        }
        if let Some(v) = lookup("TRUTHLENS_MAX_CONCURRENCY") {
            self.max_concurrency = parse_env("TRUTHLENS_MAX_CONCURRENCY", v)?;
        }
        if let Some(v) = lookup("TRUTHLENS_SCRATCH_DIR") {
            self.scratch_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    fn resolve(self) -> Result<DispatchConfig, ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("maxConcurrency must be at least 1".into()));
        }
        if self.http_timeout_secs == 0 || self.remote_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if self.cleanup_grace_secs.saturating_mul(2) > self.remote_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "cleanupGraceSecs ({}) must be at most half of remoteTimeoutSecs ({})",
                self.cleanup_grace_secs, self.remote_timeout_secs
            )));
        }

        let host = self.host.trim().to_string();
        let host_configured = !PLACEHOLDER_HOSTS.contains(&host.as_str());

        let http_base = match (&self.api_url, self.api_port) {
            (Some(url), _) => Some(url.clone()),
            (None, Some(port)) if host_configured => Some(format!("http://{host}:{port}")),
            _ => None,
        };
        let http = http_base.map(|base| {
            HttpApiConfig::with_endpoint(base, &self.api_endpoint)
                .with_timeout(Duration::from_secs(self.http_timeout_secs))
        });

        let remote = host_configured.then(|| RemoteHostConfig {
            host: host.clone(),
            port: self.port,
            username: self.username.clone(),
            identity_file: self.identity_file.clone(),
            python_path: self.python_path.clone(),
            project_path: self.project_path.clone(),
            model_file: self.model_file.clone(),
            landmarks_file: self.landmarks_file.clone(),
            timeout: Duration::from_secs(self.remote_timeout_secs),
            cleanup_grace: Duration::from_secs(self.cleanup_grace_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        });

        let mut artifacts = ArtifactConfig {
            remote_temp_dir: self.remote_temp_dir,
            max_upload_bytes: self.max_upload_bytes,
            ..ArtifactConfig::default()
        };
        if let Some(dir) = self.scratch_dir {
            artifacts.scratch_dir = dir;
        }

        Ok(DispatchConfig {
            http,
            remote,
            synthetic: SyntheticConfig {
                delay: Duration::from_millis(self.synthetic_delay_ms),
            },
            artifacts,
            max_concurrency: self.max_concurrency,
        })
    }
}

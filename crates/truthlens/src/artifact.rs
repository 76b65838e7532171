//! Temporary artifacts owned for the lifetime of a single dispatch.
//!
//! Every local file handed out by [`ArtifactStore`] is wrapped in a
//! [`TemporaryArtifact`] that deletes it exactly once: explicitly via
//! [`TemporaryArtifact::remove`], or on drop (success, error, timeout,
//! cancellation, unwinding). Names combine a nanosecond timestamp with a
//! random suffix so concurrent requests never collide locally or on the
//! remote host.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::ArtifactConfig;

/// Collision-resistant file name: `<prefix>_<nanos>_<random>[.ext]`.
pub fn unique_name(prefix: &str, extension: Option<&str>) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let stem = format!("{}_{:x}_{}", prefix, nanos, &suffix[..12]);
    match extension {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

/// Extension of an uploaded file name, if it is short and plain ASCII.
///
/// Anything else is dropped so user-supplied names never reach a path.
fn safe_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Remote temp paths for one RemoteScript attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePaths {
    pub image: String,
    pub script: String,
}

impl RemotePaths {
    pub fn all(&self) -> [&str; 2] {
        [&self.image, &self.script]
    }
}

/// A local file scoped to one dispatch. Remote copies are cleaned up by the
/// channel through [`RemotePaths`].
#[derive(Debug)]
pub struct TemporaryArtifact {
    local_path: PathBuf,
    removed: bool,
}

impl TemporaryArtifact {
    fn new(local_path: PathBuf) -> Self {
        Self {
            local_path,
            removed: false,
        }
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Delete the local file. Only the first call touches the filesystem;
    /// returns whether this call performed the deletion.
    pub fn remove(&mut self) -> bool {
        if self.removed {
            return false;
        }
        self.removed = true;
        match std::fs::remove_file(&self.local_path) {
            Ok(()) => {
                tracing::debug!(path = %self.local_path.display(), "Removed temporary artifact");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %self.local_path.display(),
                    error = %e,
                    "Failed to remove temporary artifact"
                );
            }
        }
        true
    }
}

impl Drop for TemporaryArtifact {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Hands out namespaced temporary files and remote temp paths.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    scratch_dir: PathBuf,
    remote_temp_dir: String,
}

impl ArtifactStore {
    pub fn new(scratch_dir: impl Into<PathBuf>, remote_temp_dir: impl Into<String>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            remote_temp_dir: remote_temp_dir.into(),
        }
    }

    pub fn from_config(config: &ArtifactConfig) -> Self {
        Self::new(&config.scratch_dir, &config.remote_temp_dir)
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Take ownership of a file stored by the upload layer.
    pub fn adopt(&self, path: impl Into<PathBuf>) -> TemporaryArtifact {
        TemporaryArtifact::new(path.into())
    }

    /// Write uploaded bytes under a unique name that keeps the original
    /// extension.
    pub fn store_upload(&self, bytes: &[u8], file_name: &str) -> io::Result<TemporaryArtifact> {
        let ext = safe_extension(file_name);
        self.write_file(&unique_name("upload", ext.as_deref()), bytes)
    }

    /// Write a generated analysis script to a local temp file.
    pub fn write_script(&self, contents: &str) -> io::Result<TemporaryArtifact> {
        self.write_file(&unique_name("predict", Some("py")), contents.as_bytes())
    }

    /// Fresh remote temp paths for the image and script of one attempt.
    pub fn remote_paths(&self, file_name: &str) -> RemotePaths {
        let dir = self.remote_temp_dir.trim_end_matches('/');
        let ext = safe_extension(file_name);
        RemotePaths {
            image: format!("{}/{}", dir, unique_name("truthlens_img", ext.as_deref())),
            script: format!("{}/{}", dir, unique_name("truthlens_predict", Some("py"))),
        }
    }

    fn write_file(&self, name: &str, bytes: &[u8]) -> io::Result<TemporaryArtifact> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        let path = self.scratch_dir.join(name);
        // Wrap before writing so a failed write still cleans up a partial file.
        let artifact = TemporaryArtifact::new(path);
        std::fs::write(artifact.local_path(), bytes)?;
        Ok(artifact)
    }
}

//! Inbound prediction requests and the validation errors that reject them.

use std::path::Path;

use crate::artifact::TemporaryArtifact;
use crate::method::{MethodId, MethodSet};

/// The only caller-visible failures: malformed input rejected before dispatch.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("unknown method id: {0:?}")]
    UnknownMethod(String),

    #[error("no image provided")]
    MissingImage,

    #[error("invalid image payload: {0}")]
    InvalidImage(String),

    #[error("image is {size} bytes, maximum is {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("failed to store upload: {0}")]
    Storage(#[from] std::io::Error),
}

/// An uploaded image plus the methods to run it through.
///
/// Owns the uploaded file: dropping the request deletes it.
#[derive(Debug)]
pub struct PredictionRequest {
    image: TemporaryArtifact,
    file_name: String,
    methods: Vec<MethodId>,
}

impl PredictionRequest {
    pub fn new(image: TemporaryArtifact, file_name: impl Into<String>) -> Self {
        Self {
            image,
            file_name: file_name.into(),
            methods: Vec::new(),
        }
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = MethodId>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn image_path(&self) -> &Path {
        self.image.local_path()
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Requested methods; empty means the default single method.
    pub fn methods(&self) -> &[MethodId] {
        &self.methods
    }

    pub fn method_set(&self) -> MethodSet {
        MethodSet::new(self.methods.iter().copied())
    }

    /// Delete the uploaded image now instead of on drop.
    pub fn finish(mut self) {
        self.image.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactStore;

    #[test]
    fn empty_methods_mean_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "/tmp");
        let image = store.store_upload(b"img", "face.png").unwrap();
        let request = PredictionRequest::new(image, "face.png");

        assert!(request.methods().is_empty());
        assert_eq!(request.method_set(), MethodSet::default());
    }

    #[test]
    fn finish_deletes_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "/tmp");
        let image = store.store_upload(b"img", "face.png").unwrap();
        let path = image.local_path().to_path_buf();
        let request = PredictionRequest::new(image, "face.png")
            .with_methods(["hog_rf".parse().unwrap()]);

        assert!(path.exists());
        request.finish();
        assert!(!path.exists());
    }

    #[test]
    fn error_messages() {
        let err = RequestError::TooLarge {
            size: 20,
            limit: 10,
        };
        assert_eq!(err.to_string(), "image is 20 bytes, maximum is 10 bytes");
        assert_eq!(
            RequestError::UnknownMethod("x_y".into()).to_string(),
            "unknown method id: \"x_y\""
        );
    }
}

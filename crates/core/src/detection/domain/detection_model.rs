use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::detection::domain::face_detector::FaceDetector;

/// Why the face model could not be made ready. Cloned to every caller
/// waiting on the same load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelLoadError {
    #[error("could not fetch face model: {0}")]
    Fetch(String),
    #[error("could not initialize face model: {0}")]
    Init(String),
    #[error("face model load was interrupted")]
    Interrupted,
}

/// A loaded face model. Shared process-wide; hands out one detector per
/// live stream.
pub trait DetectionModel: Send + Sync {
    fn name(&self) -> &str;

    fn detector(&self) -> Result<Box<dyn FaceDetector>, ModelLoadError>;
}

/// Where a model comes from. `load` may block on disk or network I/O and is
/// always called off the event loop.
pub trait ModelSource: Send + Sync {
    fn load(&self) -> Result<Arc<dyn DetectionModel>, ModelLoadError>;
}

/// Cheap, cloneable reference to the process-wide loaded model.
#[derive(Clone)]
pub struct ModelHandle {
    model: Arc<dyn DetectionModel>,
}

impl ModelHandle {
    pub fn new(model: Arc<dyn DetectionModel>) -> Self {
        Self { model }
    }

    pub fn name(&self) -> &str {
        self.model.name()
    }

    pub fn detector(&self) -> Result<Box<dyn FaceDetector>, ModelLoadError> {
        self.model.detector()
    }

    /// True when both handles refer to the same loaded model instance.
    pub fn same_model(&self, other: &ModelHandle) -> bool {
        Arc::ptr_eq(&self.model, &other.model)
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model", &self.model.name())
            .finish()
    }
}

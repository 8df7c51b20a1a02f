use thiserror::Error;

use crate::capture::domain::capture_phase::InvalidTransition;
use crate::capture::domain::media::{PermissionDenied, StreamError};

/// Why `start()` refused to record. Nothing changes when this is returned.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionViolation {
    #[error("no face detected; position your face in the frame")]
    FaceNotDetected,
    #[error("watch the question prompt before recording")]
    PromptNotWatched,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error(transparent)]
    PermissionDenied(#[from] PermissionDenied),
    #[error("no supported recording encoding (tried {})", .tried.join(", "))]
    RecorderUnsupported { tried: Vec<String> },
    #[error(transparent)]
    Precondition(#[from] PreconditionViolation),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("the recording produced no data")]
    EmptyClip,
    #[error("capture session is closed")]
    SessionClosed,
    #[error(transparent)]
    Stream(#[from] StreamError),
}

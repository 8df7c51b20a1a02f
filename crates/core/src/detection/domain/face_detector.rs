use serde::Serialize;

use crate::detection::domain::face_landmarks::FaceLandmarks;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

pub type DetectError = Box<dyn std::error::Error + Send + Sync>;

/// One face found in a frame, in that frame's pixel coordinates.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub landmarks: Option<FaceLandmarks>,
}

impl FaceDetection {
    /// Maps the detection onto a surface scaled by `(sx, sy)`.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self {
            bbox: self.bbox.scaled(sx, sy),
            confidence: self.confidence,
            landmarks: self.landmarks.as_ref().map(|lm| lm.scaled(sx, sy)),
        }
    }
}

/// Domain interface for face detection on a single frame.
///
/// Implementations may keep per-stream scratch state, hence `&mut self`.
/// They are moved onto a blocking worker for each call, hence `Send`.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceDetection>, DetectError>;
}

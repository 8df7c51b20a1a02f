use tokio::time::Instant;

use crate::detection::domain::face_detector::FaceDetection;

/// What one sampled frame says about face presence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameClassification {
    FacePresent,
    FaceAbsent,
    /// The frame could not be classified (grab or detector error).
    Undetermined,
}

impl FrameClassification {
    pub fn from_detections(detections: &[FaceDetection]) -> Self {
        if detections.is_empty() {
            Self::FaceAbsent
        } else {
            Self::FacePresent
        }
    }

    fn presence(self) -> Option<bool> {
        match self {
            Self::FacePresent => Some(true),
            Self::FaceAbsent => Some(false),
            Self::Undetermined => None,
        }
    }
}

/// Reports a presence change only when the observed state differs from the
/// last reported one.
///
/// The first determined frame is always reported. Undetermined frames never
/// report and never interrupt a run of identical classifications.
#[derive(Debug, Default)]
pub struct PresenceDebouncer {
    last_reported: Option<bool>,
}

impl PresenceDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, classification: FrameClassification) -> Option<bool> {
        let present = classification.presence()?;
        if self.last_reported == Some(present) {
            return None;
        }
        self.last_reported = Some(present);
        Some(present)
    }

    pub fn last_reported(&self) -> Option<bool> {
        self.last_reported
    }
}

/// The monitor's current view of presence. Until the first determination
/// arrives the state is indeterminate and reads as absent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FacePresenceState {
    pub present: bool,
    pub updated_at: Instant,
}

impl FacePresenceState {
    pub fn indeterminate() -> Self {
        Self {
            present: false,
            updated_at: Instant::now(),
        }
    }
}

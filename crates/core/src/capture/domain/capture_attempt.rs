use serde::Serialize;

use crate::shared::clip::Clip;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    NotStarted,
    Recording,
    Stopped,
    Accepted,
}

/// What ended a recording. Does not affect the clip itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCause {
    Manual,
    Timeout,
    /// The recorder closed its chunk stream on its own.
    RecorderEnded,
}

/// One question's recording attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureAttempt {
    pub question_index: usize,
    pub status: AttemptStatus,
    pub clip: Option<Clip>,
    pub elapsed_seconds: u32,
    pub stop_cause: Option<StopCause>,
}

impl CaptureAttempt {
    pub fn new(question_index: usize) -> Self {
        Self {
            question_index,
            status: AttemptStatus::NotStarted,
            clip: None,
            elapsed_seconds: 0,
            stop_cause: None,
        }
    }

    pub fn begin_recording(&mut self) {
        self.status = AttemptStatus::Recording;
        self.elapsed_seconds = 0;
    }

    pub fn finish(&mut self, clip: Clip, elapsed_seconds: u32, cause: StopCause) {
        self.status = AttemptStatus::Stopped;
        self.clip = Some(clip);
        self.elapsed_seconds = elapsed_seconds;
        self.stop_cause = Some(cause);
    }

    pub fn accept(&mut self) {
        self.status = AttemptStatus::Accepted;
    }

    /// Drops the clip and returns to `NotStarted`.
    pub fn discard(&mut self) {
        *self = Self::new(self.question_index);
    }

    pub fn is_accepted(&self) -> bool {
        self.status == AttemptStatus::Accepted && self.clip.is_some()
    }
}

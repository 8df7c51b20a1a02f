use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Lifecycle of one question's capture.
///
/// ```text
/// RequestingPermission ──granted──▶ Ready ──start──▶ Recording ──stop──▶ Stopped
///        │  ▲                         ▲                                  │    │
///   denied  retry                     └────────────retake────────────────┘  submit
///        ▼  │                                                                 ▼
///       Blocked                                                            Accepted
/// ```
///
/// Every phase can be torn down; `TornDown` is final.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePhase {
    RequestingPermission,
    Blocked,
    Ready,
    Recording,
    Stopped,
    Accepted,
    TornDown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureEvent {
    PermissionGranted,
    PermissionDenied,
    RetryPermission,
    Start,
    Stop,
    Submit,
    Retake,
    Teardown,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot {event:?} while {from}")]
pub struct InvalidTransition {
    pub from: CapturePhase,
    pub event: CaptureEvent,
}

impl CapturePhase {
    pub fn on(self, event: CaptureEvent) -> Result<CapturePhase, InvalidTransition> {
        use CaptureEvent as E;
        use CapturePhase as P;

        let next = match (self, event) {
            (P::RequestingPermission, E::PermissionGranted) => P::Ready,
            (P::RequestingPermission, E::PermissionDenied) => P::Blocked,
            (P::Blocked, E::RetryPermission) => P::RequestingPermission,
            (P::Ready, E::Start) => P::Recording,
            (P::Recording, E::Stop) => P::Stopped,
            (P::Stopped, E::Submit) => P::Accepted,
            (P::Stopped, E::Retake) => P::Ready,
            (from, E::Teardown) if from != P::TornDown => P::TornDown,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }

    /// Phases during which the sampling loop runs.
    pub fn monitors_presence(self) -> bool {
        matches!(self, Self::Ready | Self::Recording)
    }
}

impl fmt::Display for CapturePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RequestingPermission => "requesting permission",
            Self::Blocked => "blocked",
            Self::Ready => "ready",
            Self::Recording => "recording",
            Self::Stopped => "stopped",
            Self::Accepted => "accepted",
            Self::TornDown => "torn down",
        };
        f.write_str(name)
    }
}

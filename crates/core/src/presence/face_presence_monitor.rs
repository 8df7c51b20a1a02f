use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::capture::domain::media::{MediaStream, PlaybackState, StreamError};
use crate::detection::domain::detection_model::{ModelHandle, ModelLoadError};
use crate::detection::domain::face_detector::{DetectError, FaceDetection, FaceDetector};
use crate::presence::domain::overlay::{Overlay, OverlayOptions};
use crate::presence::domain::presence_debouncer::{
    FacePresenceState, FrameClassification, PresenceDebouncer,
};
use crate::shared::config::VerificationConfig;
use crate::shared::frame::Frame;

/// A single sampled frame that could not be classified. Logged and skipped.
#[derive(Error, Debug)]
pub enum DetectionFrameError {
    #[error("could not grab frame: {0}")]
    Capture(#[from] StreamError),
    #[error("detector failed on frame {index}: {reason}")]
    Detector { index: usize, reason: DetectError },
    #[error("detector crashed on frame {index}; replaced it")]
    DetectorReplaced { index: usize },
    #[error("detector crashed on frame {index} and could not be replaced: {source}")]
    DetectorLost {
        index: usize,
        #[source]
        source: ModelLoadError,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorConfig {
    pub sampling_interval: Duration,
    pub overlay: OverlayOptions,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&VerificationConfig::default())
    }
}

impl From<&VerificationConfig> for MonitorConfig {
    fn from(config: &VerificationConfig) -> Self {
        Self {
            sampling_interval: config.sampling_interval(),
            overlay: OverlayOptions {
                highlight_face: config.highlight_face,
                draw_landmarks: config.draw_landmarks,
            },
        }
    }
}

/// Samples a live stream at a fixed cadence and reports debounced face
/// presence.
///
/// Detection runs on the blocking pool so the event loop never waits on
/// inference. Ticks that fall while the stream is paused or ended are
/// skipped. A frame that fails to grab or classify is logged and counts as
/// no determination. A detector that panics is replaced with a fresh one
/// from the model; if that fails the monitor reports no face and exits.
pub struct FacePresenceMonitor {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    state: watch::Receiver<FacePresenceState>,
    overlay: watch::Receiver<Option<Overlay>>,
}

impl FacePresenceMonitor {
    /// Begins sampling `stream` with a fresh detector from `model`.
    ///
    /// `on_change` runs on the event loop once per debounced change.
    pub fn start<F>(
        stream: Arc<dyn MediaStream>,
        model: &ModelHandle,
        config: MonitorConfig,
        on_change: F,
    ) -> Result<Self, ModelLoadError>
    where
        F: FnMut(bool) + Send + 'static,
    {
        let detector = model.detector()?;
        let cancel = CancellationToken::new();
        let (state_tx, state) = watch::channel(FacePresenceState::indeterminate());
        let (overlay_tx, overlay) = watch::channel(None);

        let sampler = Sampler {
            stream,
            model: model.clone(),
            detector: Some(detector),
            config,
            debouncer: PresenceDebouncer::new(),
            on_change: Box::new(on_change),
            state_tx,
            overlay_tx,
        };
        let task = tokio::spawn(sampler.run(cancel.clone()));
        log::debug!(
            "Presence monitor started ({} every {:?})",
            model.name(),
            config.sampling_interval
        );

        Ok(Self {
            cancel,
            task: Some(task),
            state,
            overlay,
        })
    }

    pub fn state(&self) -> FacePresenceState {
        *self.state.borrow()
    }

    pub fn present(&self) -> bool {
        self.state.borrow().present
    }

    pub fn overlay(&self) -> Option<Overlay> {
        self.overlay.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FacePresenceState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancels sampling and waits for the loop to exit. No `on_change` call
    /// happens after this returns. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    log::error!("Presence monitor panicked: {e}");
                }
            }
            log::debug!("Presence monitor stopped");
        }
    }
}

impl Drop for FacePresenceMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Sampler {
    stream: Arc<dyn MediaStream>,
    model: ModelHandle,
    // Moved onto the blocking pool for each detection and handed back.
    detector: Option<Box<dyn FaceDetector>>,
    config: MonitorConfig,
    debouncer: PresenceDebouncer,
    on_change: Box<dyn FnMut(bool) + Send>,
    state_tx: watch::Sender<FacePresenceState>,
    overlay_tx: watch::Sender<Option<Overlay>>,
}

impl Sampler {
    async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sampling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.stream.playback() != PlaybackState::Playing {
                continue;
            }

            let classification = match self.sample().await {
                Ok(classification) => classification,
                Err(e @ DetectionFrameError::DetectorLost { .. }) => {
                    log::error!("Presence monitor giving up: {e}");
                    if !cancel.is_cancelled() {
                        self.report(FrameClassification::FaceAbsent);
                    }
                    break;
                }
                Err(e) => {
                    log::warn!("Skipping frame: {e}");
                    FrameClassification::Undetermined
                }
            };

            // A stop that lands mid-inference must not see a late callback.
            if cancel.is_cancelled() {
                break;
            }

            self.report(classification);
        }
    }

    fn report(&mut self, classification: FrameClassification) {
        if let Some(present) = self.debouncer.observe(classification) {
            log::debug!("Face {}", if present { "detected" } else { "lost" });
            self.state_tx.send_replace(FacePresenceState {
                present,
                updated_at: Instant::now(),
            });
            (self.on_change)(present);
        }
    }

    /// Grabs and classifies one frame.
    async fn sample(&mut self) -> Result<FrameClassification, DetectionFrameError> {
        let frame = self.stream.grab_frame()?;
        let index = frame.index();

        let mut detector = match self.detector.take() {
            Some(detector) => detector,
            None => self.replace_detector(index)?,
        };
        let worker = tokio::task::spawn_blocking(move || {
            let result = detector.detect(&frame);
            (detector, frame, result)
        });
        let (detector, frame, result) = match worker.await {
            Ok(done) => done,
            Err(e) => {
                log::error!("Face detector worker failed: {e}");
                self.detector = Some(self.replace_detector(index)?);
                return Err(DetectionFrameError::DetectorReplaced { index });
            }
        };
        self.detector = Some(detector);

        match result {
            Ok(detections) => {
                let classification = FrameClassification::from_detections(&detections);
                self.publish_overlay(&frame, &detections, classification);
                Ok(classification)
            }
            Err(reason) => Err(DetectionFrameError::Detector { index, reason }),
        }
    }

    fn replace_detector(&self, index: usize) -> Result<Box<dyn FaceDetector>, DetectionFrameError> {
        self.model
            .detector()
            .map_err(|source| DetectionFrameError::DetectorLost { index, source })
    }

    fn publish_overlay(
        &self,
        frame: &Frame,
        detections: &[FaceDetection],
        classification: FrameClassification,
    ) {
        let overlay = Overlay::build(
            (frame.width(), frame.height()),
            self.stream.display_size(),
            detections,
            classification == FrameClassification::FacePresent,
            self.config.overlay,
        );
        self.overlay_tx.send_replace(Some(overlay));
    }
}

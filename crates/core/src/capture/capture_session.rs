//! One question's capture, driven as an actor.
//!
//! [`CaptureSession`] is a handle; the state lives in a driver task that
//! owns the stream, the presence monitor, the recorder, and the countdown.
//! Commands, permission and model results, presence changes, recorder
//! chunks, and countdown ticks are all handled on that one task, so the
//! phase table in [`CapturePhase`] is the only place transitions happen.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};

use crate::capture::camera_lease::{CameraLease, CameraPermit};
use crate::capture::domain::capture_attempt::{CaptureAttempt, StopCause};
use crate::capture::domain::capture_error::{CaptureError, PreconditionViolation};
use crate::capture::domain::capture_phase::{CaptureEvent, CapturePhase};
use crate::capture::domain::media::{
    negotiate_mime, ClipPreviewer, MediaDevices, MediaRecorder, MediaStream, PermissionDenied,
    PreviewGuard, PreviewId,
};
use crate::detection::domain::detection_model::{ModelHandle, ModelLoadError};
use crate::detection::model_loader::ModelLoader;
use crate::presence::domain::overlay::Overlay;
use crate::presence::face_presence_monitor::{FacePresenceMonitor, MonitorConfig};
use crate::shared::clip::{Clip, MediaChunk};
use crate::shared::config::VerificationConfig;
use crate::verification::domain::question::Question;

const TICK: Duration = Duration::from_secs(1);

/// Everything a capture session borrows from the process: devices, the
/// shared model, and the camera lease.
#[derive(Clone)]
pub struct CaptureEnvironment {
    pub devices: Arc<dyn MediaDevices>,
    pub previewer: Arc<dyn ClipPreviewer>,
    pub models: ModelLoader,
    pub camera: CameraLease,
    pub config: Arc<VerificationConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum DetectorStatus {
    Loading,
    Ready,
    Failed(String),
}

/// Snapshot published after every state change.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaptureStatus {
    pub phase: CapturePhase,
    pub question_index: usize,
    /// Last reported presence; `false` while indeterminate.
    pub presence: bool,
    pub prompt_watched: bool,
    pub detector: DetectorStatus,
    pub max_duration_seconds: u32,
    pub remaining_seconds: u32,
    pub elapsed_seconds: u32,
    pub blocked_reason: Option<String>,
    pub preview: Option<PreviewId>,
    pub last_stop: Option<StopCause>,
    pub mime_type: Option<String>,
}

impl CaptureStatus {
    /// Whether `start()` would currently be accepted.
    pub fn can_record(&self) -> bool {
        self.phase == CapturePhase::Ready && self.presence
    }
}

type Reply<T> = oneshot::Sender<Result<T, CaptureError>>;

enum Command {
    PromptWatched,
    Start(Reply<()>),
    Stop(Reply<()>),
    Submit(Reply<CaptureAttempt>),
    Retake(Reply<()>),
    RetryPermission(Reply<()>),
    RetryDetection,
    Overlay(oneshot::Sender<Option<Overlay>>),
    Teardown(oneshot::Sender<()>),
}

/// A granted stream together with the camera permit it was acquired under.
struct LiveCamera {
    stream: Arc<dyn MediaStream>,
    _permit: CameraPermit,
}

impl LiveCamera {
    fn release(self) {
        self.stream.release();
    }
}

enum Event {
    Permission {
        generation: u64,
        result: Result<LiveCamera, PermissionDenied>,
    },
    Model(Result<ModelHandle, ModelLoadError>),
    Presence {
        generation: u64,
        present: bool,
    },
}

pub struct CaptureSession {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<CaptureStatus>,
    driver: Option<JoinHandle<()>>,
}

impl CaptureSession {
    /// Opens a session for `question` and immediately requests camera
    /// access and the face model.
    pub fn open(env: CaptureEnvironment, question: Question, max_duration_seconds: u32) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let initial = CaptureStatus {
            phase: CapturePhase::RequestingPermission,
            question_index: question.index,
            presence: false,
            prompt_watched: false,
            detector: DetectorStatus::Loading,
            max_duration_seconds,
            remaining_seconds: max_duration_seconds,
            elapsed_seconds: 0,
            blocked_reason: None,
            preview: None,
            last_stop: None,
            mime_type: None,
        };
        let (status_tx, status) = watch::channel(initial);

        log::info!(
            "Opening capture for question {} ({max_duration_seconds}s limit)",
            question.index + 1
        );
        let driver = Driver {
            attempt: CaptureAttempt::new(question.index),
            env,
            question,
            max_duration_seconds,
            phase: CapturePhase::RequestingPermission,
            events_tx,
            status_tx,
            camera: None,
            model: None,
            detector: DetectorStatus::Loading,
            monitor: None,
            monitor_generation: 0,
            permission_generation: 0,
            presence: false,
            prompt_watched: false,
            recording: None,
            preview: None,
            blocked_reason: None,
            background: BackgroundTasks::default(),
        };
        let driver = tokio::spawn(driver.run(commands_rx, events_rx));

        Self {
            commands,
            status,
            driver: Some(driver),
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureStatus> {
        self.status.clone()
    }

    /// Waits for a status matching `predicate`.
    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&CaptureStatus) -> bool,
    ) -> Result<CaptureStatus, CaptureError> {
        let mut status = self.status.clone();
        let matched = status
            .wait_for(predicate)
            .await
            .map_err(|_| CaptureError::SessionClosed)?;
        Ok(matched.clone())
    }

    /// The prompt clip finished playing at least once.
    pub fn mark_prompt_watched(&self) {
        let _ = self.commands.send(Command::PromptWatched);
    }

    /// Starts recording. Rejected without any state change when no face is
    /// present or the prompt has not been watched.
    pub async fn start(&self) -> Result<(), CaptureError> {
        self.request(Command::Start).await
    }

    /// Stops recording. A stop that loses the race against the countdown is
    /// a no-op.
    pub async fn stop(&self) -> Result<(), CaptureError> {
        self.request(Command::Stop).await
    }

    /// Accepts the stopped clip and releases the camera.
    pub async fn submit(&self) -> Result<CaptureAttempt, CaptureError> {
        self.request(Command::Submit).await
    }

    /// Discards the stopped clip and returns to `Ready` with a full
    /// countdown.
    pub async fn retake(&self) -> Result<(), CaptureError> {
        self.request(Command::Retake).await
    }

    pub async fn retry_permission(&self) -> Result<(), CaptureError> {
        self.request(Command::RetryPermission).await
    }

    /// Retries a failed model load. Ignored unless the last load failed.
    pub fn retry_detection(&self) {
        let _ = self.commands.send(Command::RetryDetection);
    }

    pub async fn overlay(&self) -> Option<Overlay> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Overlay(tx)).ok()?;
        rx.await.ok().flatten()
    }

    /// Cancels the countdown, stops the detection loop and any recorder, and
    /// releases the stream, whatever the phase. Returns once all of it is
    /// done.
    pub async fn teardown(mut self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Teardown(tx)).is_ok() {
            let _ = rx.await;
        }
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                log::error!("Capture driver failed: {e}");
            }
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| CaptureError::SessionClosed)?;
        rx.await.map_err(|_| CaptureError::SessionClosed)?
    }
}

struct Recording {
    recorder: Box<dyn MediaRecorder>,
    chunks_rx: mpsc::UnboundedReceiver<MediaChunk>,
    chunks: Vec<MediaChunk>,
    countdown: Interval,
    remaining: u32,
    elapsed: u32,
}

impl Recording {
    fn push(&mut self, chunk: MediaChunk) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }
}

enum RecordingStep {
    Chunk(Option<MediaChunk>),
    Tick,
}

async fn next_recording_step(recording: &mut Option<Recording>) -> RecordingStep {
    match recording {
        Some(rec) => tokio::select! {
            chunk = rec.chunks_rx.recv() => RecordingStep::Chunk(chunk),
            _ = rec.countdown.tick() => RecordingStep::Tick,
        },
        None => std::future::pending().await,
    }
}

/// Permission and model requests in flight. Finished handles are pruned on
/// each spawn so retries don't accumulate them.
#[derive(Default)]
struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    fn spawn(&mut self, task: impl Future<Output = ()> + Send + 'static) {
        self.handles.retain(|t| !t.is_finished());
        self.handles.push(tokio::spawn(task));
    }

    fn abort_all(&mut self) {
        for task in self.handles.drain(..) {
            task.abort();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.handles.len()
    }
}

struct Driver {
    env: CaptureEnvironment,
    question: Question,
    max_duration_seconds: u32,
    phase: CapturePhase,
    events_tx: mpsc::UnboundedSender<Event>,
    status_tx: watch::Sender<CaptureStatus>,
    camera: Option<LiveCamera>,
    model: Option<ModelHandle>,
    detector: DetectorStatus,
    monitor: Option<FacePresenceMonitor>,
    monitor_generation: u64,
    permission_generation: u64,
    presence: bool,
    prompt_watched: bool,
    recording: Option<Recording>,
    attempt: CaptureAttempt,
    preview: Option<PreviewGuard>,
    blocked_reason: Option<String>,
    background: BackgroundTasks,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        self.request_permission();
        self.request_model();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Teardown(reply)) => {
                        self.teardown(&mut events).await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        log::debug!("Capture handle dropped; tearing down");
                        self.teardown(&mut events).await;
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
                step = next_recording_step(&mut self.recording) => self.handle_recording_step(step).await,
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::PromptWatched => {
                self.prompt_watched = true;
                self.publish();
            }
            Command::Start(reply) => {
                let _ = reply.send(self.start());
            }
            Command::Stop(reply) => {
                let _ = reply.send(self.stop(StopCause::Manual).await);
            }
            Command::Submit(reply) => {
                let _ = reply.send(self.submit());
            }
            Command::Retake(reply) => {
                let _ = reply.send(self.retake());
            }
            Command::RetryPermission(reply) => {
                let _ = reply.send(self.retry_permission());
            }
            Command::RetryDetection => {
                if matches!(self.detector, DetectorStatus::Failed(_)) {
                    log::info!("Retrying face model load");
                    self.detector = DetectorStatus::Loading;
                    self.request_model();
                    self.publish();
                }
            }
            Command::Overlay(reply) => {
                let _ = reply.send(self.monitor.as_ref().and_then(FacePresenceMonitor::overlay));
            }
            Command::Teardown(_) => unreachable!("teardown is handled by the run loop"),
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Permission { generation, result } => self.on_permission(generation, result),
            Event::Model(result) => self.on_model(result),
            Event::Presence {
                generation,
                present,
            } => {
                if generation == self.monitor_generation && self.monitor.is_some() {
                    self.presence = present;
                    self.publish();
                }
            }
        }
    }

    async fn handle_recording_step(&mut self, step: RecordingStep) {
        match step {
            RecordingStep::Chunk(Some(chunk)) => {
                if let Some(recording) = self.recording.as_mut() {
                    recording.push(chunk);
                }
            }
            RecordingStep::Chunk(None) => {
                log::warn!("Recorder closed its stream while recording");
                self.finish_recording(StopCause::RecorderEnded).await;
            }
            RecordingStep::Tick => {
                let expired = match self.recording.as_mut() {
                    Some(recording) => {
                        recording.elapsed += 1;
                        recording.remaining = recording.remaining.saturating_sub(1);
                        recording.remaining == 0
                    }
                    None => false,
                };
                if expired {
                    log::info!("Recording reached its {}s limit", self.max_duration_seconds);
                    self.finish_recording(StopCause::Timeout).await;
                } else {
                    self.publish();
                }
            }
        }
    }

    // --- permission & model --------------------------------------------

    fn request_permission(&mut self) {
        self.permission_generation += 1;
        let generation = self.permission_generation;
        let devices = self.env.devices.clone();
        let camera = self.env.camera.clone();
        let constraints = self.env.config.video_constraints.clone();
        let events = self.events_tx.clone();

        self.background.spawn(async move {
            let Some(permit) = camera.acquire().await else {
                return;
            };
            let result = devices
                .request_stream(&constraints)
                .await
                .map(|stream| LiveCamera {
                    stream,
                    _permit: permit,
                });
            if let Err(mpsc::error::SendError(Event::Permission {
                result: Ok(camera), ..
            })) = events.send(Event::Permission { generation, result })
            {
                camera.release();
            }
        });
    }

    fn request_model(&mut self) {
        let models = self.env.models.clone();
        let events = self.events_tx.clone();
        self.background.spawn(async move {
            let _ = events.send(Event::Model(models.load().await));
        });
    }

    fn on_permission(&mut self, generation: u64, result: Result<LiveCamera, PermissionDenied>) {
        if generation != self.permission_generation || self.phase != CapturePhase::RequestingPermission {
            if let Ok(camera) = result {
                camera.release();
            }
            return;
        }

        match result {
            Ok(camera) => {
                self.camera = Some(camera);
                self.transition(CaptureEvent::PermissionGranted);
                self.ensure_monitor();
            }
            Err(denied) => {
                log::error!("Question {}: {denied}", self.question.index + 1);
                self.blocked_reason = Some(denied.reason);
                self.transition(CaptureEvent::PermissionDenied);
            }
        }
        self.publish();
    }

    fn on_model(&mut self, result: Result<ModelHandle, ModelLoadError>) {
        match result {
            Ok(model) => {
                self.model = Some(model);
                self.detector = DetectorStatus::Ready;
                self.ensure_monitor();
            }
            Err(e) => {
                log::error!("Face detection unavailable: {e}");
                self.detector = DetectorStatus::Failed(e.to_string());
                self.presence = false;
            }
        }
        self.publish();
    }

    // --- recording -------------------------------------------------------

    fn start(&mut self) -> Result<(), CaptureError> {
        let next = self.phase.on(CaptureEvent::Start)?;
        if !self.presence {
            return Err(PreconditionViolation::FaceNotDetected.into());
        }
        if self.question.has_prompt_clip() && !self.prompt_watched {
            return Err(PreconditionViolation::PromptNotWatched.into());
        }
        let stream = match &self.camera {
            Some(camera) => camera.stream.clone(),
            None => return Err(CaptureError::SessionClosed),
        };

        let preferred = &self.env.config.recorder_mime_types;
        let mime = negotiate_mime(stream.as_ref(), preferred).ok_or_else(|| {
            CaptureError::RecorderUnsupported {
                tried: preferred.clone(),
            }
        })?;
        let mut recorder = stream.create_recorder(&mime)?;
        let (chunks_tx, chunks_rx) = mpsc::unbounded_channel();
        recorder.start(chunks_tx)?;

        self.recording = Some(Recording {
            recorder,
            chunks_rx,
            chunks: Vec::new(),
            countdown: tokio::time::interval_at(Instant::now() + TICK, TICK),
            remaining: self.max_duration_seconds,
            elapsed: 0,
        });
        self.attempt.begin_recording();
        self.phase = next;
        log::info!(
            "Recording question {} as {mime}",
            self.question.index + 1
        );
        self.publish();
        Ok(())
    }

    async fn stop(&mut self, cause: StopCause) -> Result<(), CaptureError> {
        if self.phase == CapturePhase::Stopped {
            log::debug!("Stop ignored; recording already stopped");
            return Ok(());
        }
        self.phase.on(CaptureEvent::Stop)?;
        self.finish_recording(cause).await;
        Ok(())
    }

    /// Finalizes the recorder and assembles the clip. The presence monitor
    /// stops with the recording.
    async fn finish_recording(&mut self, cause: StopCause) {
        let Some(mut recording) = self.recording.take() else {
            return;
        };
        recording.recorder.stop();

        let flush_timeout = self.env.config.recorder_flush_timeout();
        let flushed = tokio::time::timeout(flush_timeout, async {
            while let Some(chunk) = recording.chunks_rx.recv().await {
                recording.push(chunk);
            }
        })
        .await;
        if flushed.is_err() {
            log::warn!(
                "Recorder did not finish within {flush_timeout:?}; keeping {} chunks",
                recording.chunks.len()
            );
        }

        let clip = Clip::from_chunks(recording.recorder.mime_type(), &recording.chunks);
        log::info!(
            "Question {} stopped ({cause:?}) after {}s: {} bytes in {} chunks",
            self.question.index + 1,
            recording.elapsed,
            clip.len(),
            clip.chunk_count()
        );
        self.preview = Some(PreviewGuard::open(self.env.previewer.clone(), &clip));
        self.attempt.finish(clip, recording.elapsed, cause);
        self.transition(CaptureEvent::Stop);
        self.stop_monitor().await;
        self.publish();
    }

    fn submit(&mut self) -> Result<CaptureAttempt, CaptureError> {
        self.phase.on(CaptureEvent::Submit)?;
        if self.attempt.clip.as_ref().map_or(true, Clip::is_empty) {
            return Err(CaptureError::EmptyClip);
        }
        self.attempt.accept();
        self.transition(CaptureEvent::Submit);
        self.preview = None;
        self.release_camera();
        self.publish();
        log::info!("Question {} accepted", self.question.index + 1);
        Ok(self.attempt.clone())
    }

    fn retake(&mut self) -> Result<(), CaptureError> {
        self.phase.on(CaptureEvent::Retake)?;
        self.preview = None;
        self.attempt.discard();
        self.transition(CaptureEvent::Retake);
        self.ensure_monitor();
        self.publish();
        Ok(())
    }

    fn retry_permission(&mut self) -> Result<(), CaptureError> {
        self.phase.on(CaptureEvent::RetryPermission)?;
        self.blocked_reason = None;
        self.transition(CaptureEvent::RetryPermission);
        self.request_permission();
        self.publish();
        Ok(())
    }

    // --- presence --------------------------------------------------------

    fn ensure_monitor(&mut self) {
        if self.monitor.is_some() || !self.phase.monitors_presence() {
            return;
        }
        let (Some(camera), Some(model)) = (&self.camera, &self.model) else {
            return;
        };

        self.monitor_generation += 1;
        let generation = self.monitor_generation;
        let events = self.events_tx.clone();
        let config = MonitorConfig::from(self.env.config.as_ref());
        match FacePresenceMonitor::start(camera.stream.clone(), model, config, move |present| {
            let _ = events.send(Event::Presence {
                generation,
                present,
            });
        }) {
            Ok(monitor) => self.monitor = Some(monitor),
            Err(e) => {
                log::error!("Could not create a face detector: {e}");
                self.detector = DetectorStatus::Failed(e.to_string());
                self.model = None;
            }
        }
    }

    async fn stop_monitor(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop().await;
        }
        self.presence = false;
    }

    // --- teardown --------------------------------------------------------

    fn release_camera(&mut self) {
        if let Some(camera) = self.camera.take() {
            camera.release();
            log::debug!("Camera released for question {}", self.question.index + 1);
        }
    }

    async fn teardown(&mut self, events: &mut mpsc::UnboundedReceiver<Event>) {
        self.background.abort_all();
        if let Some(mut recording) = self.recording.take() {
            recording.recorder.stop();
        }
        self.stop_monitor().await;
        self.preview = None;
        self.release_camera();

        // A grant that raced the teardown still owns a live stream.
        while let Ok(event) = events.try_recv() {
            if let Event::Permission {
                result: Ok(camera), ..
            } = event
            {
                camera.release();
            }
        }

        if self.phase != CapturePhase::TornDown {
            self.transition(CaptureEvent::Teardown);
            log::info!("Capture for question {} torn down", self.question.index + 1);
        }
        self.publish();
    }

    // --- status ----------------------------------------------------------

    /// Applies a transition already validated by the caller.
    fn transition(&mut self, event: CaptureEvent) {
        match self.phase.on(event) {
            Ok(next) => {
                log::debug!("Capture {} -> {next}", self.phase);
                self.phase = next;
            }
            Err(e) => log::error!("Capture state machine: {e}"),
        }
    }

    fn publish(&self) {
        let (remaining, elapsed) = match &self.recording {
            Some(recording) => (recording.remaining, recording.elapsed),
            None if self.attempt.clip.is_some() => (
                self.max_duration_seconds
                    .saturating_sub(self.attempt.elapsed_seconds),
                self.attempt.elapsed_seconds,
            ),
            None => (self.max_duration_seconds, 0),
        };
        self.status_tx.send_replace(CaptureStatus {
            phase: self.phase,
            question_index: self.question.index,
            presence: self.presence,
            prompt_watched: self.prompt_watched,
            detector: self.detector.clone(),
            max_duration_seconds: self.max_duration_seconds,
            remaining_seconds: remaining,
            elapsed_seconds: elapsed,
            blocked_reason: self.blocked_reason.clone(),
            preview: self.preview.as_ref().map(PreviewGuard::id),
            last_stop: self.attempt.stop_cause,
            mime_type: self
                .recording
                .as_ref()
                .map(|r| r.recorder.mime_type().to_string())
                .or_else(|| self.attempt.clip.as_ref().map(|c| c.mime_type().to_string())),
        });
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.background.abort_all();
        if let Some(mut recording) = self.recording.take() {
            recording.recorder.stop();
        }
        if let Some(camera) = self.camera.take() {
            camera.release();
        }
    }
}

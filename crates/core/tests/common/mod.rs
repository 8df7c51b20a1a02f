//! In-memory media devices, recorder, and face model for driving capture
//! sessions on a paused clock.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use verifycam_core::capture::camera_lease::CameraLease;
use verifycam_core::capture::capture_session::CaptureEnvironment;
use verifycam_core::capture::domain::media::{
    MediaDevices, MediaRecorder, MediaStream, PermissionDenied, PlaybackState, StreamError,
};
use verifycam_core::capture::infrastructure::in_memory_clip_previewer::InMemoryClipPreviewer;
use verifycam_core::detection::domain::detection_model::{
    DetectionModel, ModelLoadError, ModelSource,
};
use verifycam_core::detection::domain::face_detector::{DetectError, FaceDetection, FaceDetector};
use verifycam_core::detection::model_loader::ModelLoader;
use verifycam_core::shared::bounding_box::BoundingBox;
use verifycam_core::shared::clip::{Clip, MediaChunk};
use verifycam_core::shared::config::{VerificationConfig, VideoConstraints};
use verifycam_core::shared::frame::Frame;
use verifycam_core::verification::domain::question::Question;

// ---------------------------------------------------------------------------
// Face model
// ---------------------------------------------------------------------------

/// Sees a face whenever the shared switch is on.
struct SwitchDetector {
    face: Arc<AtomicBool>,
}

impl FaceDetector for SwitchDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<FaceDetection>, DetectError> {
        if !self.face.load(Ordering::SeqCst) {
            return Ok(vec![]);
        }
        Ok(vec![FaceDetection {
            bbox: BoundingBox {
                x: 1.0,
                y: 1.0,
                width: 2.0,
                height: 2.0,
            },
            confidence: 0.95,
            landmarks: None,
        }])
    }
}

struct SwitchModel {
    face: Arc<AtomicBool>,
}

impl DetectionModel for SwitchModel {
    fn name(&self) -> &str {
        "switch"
    }

    fn detector(&self) -> Result<Box<dyn FaceDetector>, ModelLoadError> {
        Ok(Box::new(SwitchDetector {
            face: self.face.clone(),
        }))
    }
}

pub struct SwitchSource {
    face: Arc<AtomicBool>,
    failures_left: AtomicUsize,
    pub loads: AtomicUsize,
}

impl ModelSource for SwitchSource {
    fn load(&self) -> Result<Arc<dyn DetectionModel>, ModelLoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ModelLoadError::Fetch("connection reset".into()));
        }
        Ok(Arc::new(SwitchModel {
            face: self.face.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Recorder: one chunk per second, sequence-numbered
// ---------------------------------------------------------------------------

pub struct FakeRecorder {
    mime_type: String,
    silent: bool,
    seq: Arc<AtomicU32>,
    sender: Option<mpsc::UnboundedSender<MediaChunk>>,
    ticker: Option<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

fn chunk(seq: &AtomicU32, silent: bool) -> MediaChunk {
    if silent {
        return MediaChunk::new(Vec::new());
    }
    MediaChunk::new(seq.fetch_add(1, Ordering::SeqCst).to_be_bytes().to_vec())
}

impl MediaRecorder for FakeRecorder {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn start(&mut self, chunks: mpsc::UnboundedSender<MediaChunk>) -> Result<(), StreamError> {
        let tx = chunks.clone();
        let seq = self.seq.clone();
        let silent = self.silent;
        self.ticker = Some(tokio::spawn(async move {
            let second = Duration::from_secs(1);
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + second, second);
            loop {
                ticker.tick().await;
                if tx.send(chunk(&seq, silent)).is_err() {
                    break;
                }
            }
        }));
        self.sender = Some(chunks);
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        let _ = sender.send(chunk(&self.seq, self.silent));
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn is_recording(&self) -> bool {
        self.sender.is_some()
    }
}

impl Drop for FakeRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Stream & devices
// ---------------------------------------------------------------------------

pub struct FakeStream {
    mimes: Vec<String>,
    silent: bool,
    pub grabs: AtomicUsize,
    pub releases: AtomicUsize,
    pub recorders_created: AtomicUsize,
    pub active_recorders: Arc<AtomicUsize>,
}

impl FakeStream {
    pub fn grab_count(&self) -> usize {
        self.grabs.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn recorder_count(&self) -> usize {
        self.recorders_created.load(Ordering::SeqCst)
    }

    pub fn active_recorder_count(&self) -> usize {
        self.active_recorders.load(Ordering::SeqCst)
    }
}

impl MediaStream for FakeStream {
    fn playback(&self) -> PlaybackState {
        if self.release_count() > 0 {
            PlaybackState::Ended
        } else {
            PlaybackState::Playing
        }
    }

    fn grab_frame(&self) -> Result<Frame, StreamError> {
        let index = self.grabs.fetch_add(1, Ordering::SeqCst);
        Ok(Frame::blank(4, 4, index))
    }

    fn display_size(&self) -> (u32, u32) {
        (8, 8)
    }

    fn supports_mime(&self, mime_type: &str) -> bool {
        self.mimes.iter().any(|m| m == mime_type)
    }

    fn create_recorder(&self, mime_type: &str) -> Result<Box<dyn MediaRecorder>, StreamError> {
        self.recorders_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeRecorder {
            mime_type: mime_type.to_string(),
            silent: self.silent,
            seq: Arc::new(AtomicU32::new(0)),
            sender: None,
            ticker: None,
            active: self.active_recorders.clone(),
        }))
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Grants or denies in script order; grants once the script runs out.
pub struct FakeDevices {
    script: Mutex<VecDeque<bool>>,
    mimes: Vec<String>,
    silent: bool,
    pub requests: AtomicUsize,
    pub constraints: Mutex<Vec<VideoConstraints>>,
    streams: Mutex<Vec<Arc<FakeStream>>>,
}

impl FakeDevices {
    pub fn stream(&self, index: usize) -> Arc<FakeStream> {
        self.streams.lock().unwrap()[index].clone()
    }

    pub fn streams(&self) -> Vec<Arc<FakeStream>> {
        self.streams.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn request_stream(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Arc<dyn MediaStream>, PermissionDenied> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.constraints.lock().unwrap().push(constraints.clone());
        let grant = self.script.lock().unwrap().pop_front().unwrap_or(true);
        if !grant {
            return Err(PermissionDenied::new("user dismissed the prompt"));
        }
        let stream = Arc::new(FakeStream {
            mimes: self.mimes.clone(),
            silent: self.silent,
            grabs: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            recorders_created: AtomicUsize::new(0),
            active_recorders: Arc::new(AtomicUsize::new(0)),
        });
        self.streams.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct HarnessBuilder {
    config: VerificationConfig,
    permissions: Vec<bool>,
    mimes: Vec<String>,
    silent: bool,
    face: bool,
    model_failures: usize,
}

impl HarnessBuilder {
    pub fn max_duration(mut self, seconds: u32) -> Self {
        self.config.max_duration_seconds = seconds;
        self
    }

    pub fn permissions(mut self, script: &[bool]) -> Self {
        self.permissions = script.to_vec();
        self
    }

    pub fn mimes(mut self, mimes: &[&str]) -> Self {
        self.mimes = mimes.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn silent_recorder(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn no_face(mut self) -> Self {
        self.face = false;
        self
    }

    pub fn model_failures(mut self, n: usize) -> Self {
        self.model_failures = n;
        self
    }

    pub fn build(self) -> Harness {
        let face = Arc::new(AtomicBool::new(self.face));
        let source = Arc::new(SwitchSource {
            face: face.clone(),
            failures_left: AtomicUsize::new(self.model_failures),
            loads: AtomicUsize::new(0),
        });
        let devices = Arc::new(FakeDevices {
            script: Mutex::new(self.permissions.into_iter().collect()),
            mimes: self.mimes,
            silent: self.silent,
            requests: AtomicUsize::new(0),
            constraints: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
        });
        let previewer = Arc::new(InMemoryClipPreviewer::new());
        let camera = CameraLease::new();
        let env = CaptureEnvironment {
            devices: devices.clone(),
            previewer: previewer.clone(),
            models: ModelLoader::new(source.clone()),
            camera: camera.clone(),
            config: Arc::new(self.config),
        };
        Harness {
            env,
            devices,
            previewer,
            source,
            face,
            camera,
        }
    }
}

pub struct Harness {
    pub env: CaptureEnvironment,
    pub devices: Arc<FakeDevices>,
    pub previewer: Arc<InMemoryClipPreviewer>,
    pub source: Arc<SwitchSource>,
    pub face: Arc<AtomicBool>,
    pub camera: CameraLease,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            config: VerificationConfig::default(),
            permissions: Vec::new(),
            mimes: vec!["video/webm".into(), "video/mp4".into()],
            silent: false,
            face: true,
            model_failures: 0,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn set_face(&self, present: bool) {
        self.face.store(present, Ordering::SeqCst);
    }
}

pub fn question(index: usize) -> Question {
    Question::new(index, format!("Question {}", index + 1))
}

/// The recorder sequence numbers carried by a clip, in clip order.
pub fn sequence(clip: &Clip) -> Vec<u32> {
    clip.data()
        .chunks_exact(4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

pub fn assert_consecutive(seq: &[u32]) {
    assert!(!seq.is_empty(), "clip has no chunks");
    for (i, n) in seq.iter().enumerate() {
        assert_eq!(*n, i as u32, "chunk {i} out of order in {seq:?}");
    }
}

pub async fn sleep_secs(secs: f64) {
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

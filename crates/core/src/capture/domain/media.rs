//! Ports to the camera, microphone, recorder, and preview surfaces.
//!
//! The capture pipeline never touches a device directly; a runtime supplies
//! these implementations (browser bridge, native capture, or test fakes).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::shared::clip::{Clip, MediaChunk};
use crate::shared::config::VideoConstraints;
use crate::shared::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream has ended")]
    Ended,
    #[error("no frame available yet")]
    NoFrame,
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("recording encoding {0} is not supported")]
    UnsupportedMime(String),
    #[error("recorder failed: {0}")]
    Recorder(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("camera or microphone access was denied: {reason}")]
pub struct PermissionDenied {
    pub reason: String,
}

impl PermissionDenied {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Playing,
    Paused,
    Ended,
}

/// A live camera+microphone stream.
pub trait MediaStream: Send + Sync {
    fn playback(&self) -> PlaybackState;

    /// The most recent video frame.
    fn grab_frame(&self) -> Result<Frame, StreamError>;

    /// Size of the surface the stream is displayed on. Overlay geometry is
    /// mapped into this space.
    fn display_size(&self) -> (u32, u32);

    fn supports_mime(&self, mime_type: &str) -> bool;

    fn create_recorder(&self, mime_type: &str) -> Result<Box<dyn MediaRecorder>, StreamError>;

    /// Stops every track. Called exactly once per acquired stream.
    fn release(&self);
}

/// Encodes the stream into data chunks.
///
/// Chunks are delivered through the sender passed to `start`, in the order
/// the recorder produces them. `stop` flushes any buffered data as a final
/// chunk and then drops the sender, closing the channel. Stopping an
/// inactive recorder does nothing.
pub trait MediaRecorder: Send {
    fn mime_type(&self) -> &str;

    fn start(&mut self, chunks: mpsc::UnboundedSender<MediaChunk>) -> Result<(), StreamError>;

    fn stop(&mut self);

    fn is_recording(&self) -> bool;
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Prompts for camera and microphone access. Never retried implicitly.
    async fn request_stream(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Arc<dyn MediaStream>, PermissionDenied>;
}

/// Opaque reference to a playable preview of a finished clip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PreviewId(pub u64);

pub trait ClipPreviewer: Send + Sync {
    fn open(&self, clip: &Clip) -> PreviewId;

    fn revoke(&self, id: PreviewId);
}

/// Revokes its preview when dropped, so a discarded clip never leaves a
/// preview behind.
pub struct PreviewGuard {
    previewer: Arc<dyn ClipPreviewer>,
    id: PreviewId,
}

impl PreviewGuard {
    pub fn open(previewer: Arc<dyn ClipPreviewer>, clip: &Clip) -> Self {
        let id = previewer.open(clip);
        Self { previewer, id }
    }

    pub fn id(&self) -> PreviewId {
        self.id
    }
}

impl Drop for PreviewGuard {
    fn drop(&mut self) {
        self.previewer.revoke(self.id);
    }
}

/// First encoding in `preferred` the stream can record, if any.
pub fn negotiate_mime(stream: &dyn MediaStream, preferred: &[String]) -> Option<String> {
    preferred
        .iter()
        .find(|mime| stream.supports_mime(mime))
        .cloned()
}

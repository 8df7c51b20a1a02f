use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::capture::domain::media::{MediaRecorder, MediaStream, PlaybackState, StreamError};
use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::Frame;

/// Plays a directory of still images (or a single image) as a video-only
/// stream.
///
/// Each `grab_frame` decodes the next image in file-name order; once the
/// last one has been grabbed the stream reports `Ended`. Recording is not
/// supported.
pub struct ImageSequenceStream {
    paths: Vec<PathBuf>,
    frame_interval: Duration,
    display_size: (u32, u32),
    cursor: AtomicUsize,
    released: AtomicBool,
}

impl ImageSequenceStream {
    pub fn open(source: &Path, frame_interval: Duration) -> Result<Self, StreamError> {
        let paths = if source.is_dir() {
            list_images(source)?
        } else if is_image(source) {
            vec![source.to_path_buf()]
        } else {
            return Err(StreamError::Read(format!(
                "{} is not an image or a directory of images",
                source.display()
            )));
        };
        if paths.is_empty() {
            return Err(StreamError::Read(format!(
                "no images found in {}",
                source.display()
            )));
        }

        let display_size = image::image_dimensions(&paths[0])
            .map_err(|e| StreamError::Read(format!("{}: {e}", paths[0].display())))?;
        log::info!(
            "Playing {} frames from {} at {display_size:?}",
            paths.len(),
            source.display()
        );

        Ok(Self {
            paths,
            frame_interval,
            display_size,
            cursor: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        })
    }

    pub fn frame_count(&self) -> usize {
        self.paths.len()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl MediaStream for ImageSequenceStream {
    fn playback(&self) -> PlaybackState {
        if self.is_released() || self.cursor.load(Ordering::SeqCst) >= self.paths.len() {
            PlaybackState::Ended
        } else {
            PlaybackState::Playing
        }
    }

    fn grab_frame(&self) -> Result<Frame, StreamError> {
        if self.is_released() {
            return Err(StreamError::Ended);
        }
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let path = self.paths.get(index).ok_or(StreamError::Ended)?;

        let img = image::open(path)
            .map_err(|e| StreamError::Read(format!("{}: {e}", path.display())))?
            .to_rgb8();
        let (width, height) = img.dimensions();
        Ok(Frame::new(img.into_raw(), width, height, 3, index)
            .with_timestamp(self.frame_interval * index as u32))
    }

    fn display_size(&self) -> (u32, u32) {
        self.display_size
    }

    fn supports_mime(&self, _mime_type: &str) -> bool {
        false
    }

    fn create_recorder(&self, mime_type: &str) -> Result<Box<dyn MediaRecorder>, StreamError> {
        Err(StreamError::UnsupportedMime(mime_type.to_string()))
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            log::debug!("Image sequence released");
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, StreamError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| StreamError::Read(format!("{}: {e}", dir.display())))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image(p))
        .collect();
    paths.sort();
    Ok(paths)
}

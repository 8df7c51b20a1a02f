use serde::Serialize;

use crate::detection::domain::face_detector::FaceDetection;
use crate::shared::constants::{FACE_ABSENT_COLOR, FACE_PRESENT_COLOR};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayOptions {
    pub highlight_face: bool,
    pub draw_landmarks: bool,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            highlight_face: true,
            draw_landmarks: true,
        }
    }
}

/// Geometry a UI draws over the live preview, already in display
/// coordinates.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Overlay {
    pub width: u32,
    pub height: u32,
    pub border_color: &'static str,
    pub faces: Vec<FaceDetection>,
}

impl Overlay {
    /// Rescales detections from frame pixels onto a `display` surface.
    ///
    /// A zero-sized frame or display yields an overlay with no faces.
    pub fn build(
        frame_size: (u32, u32),
        display: (u32, u32),
        detections: &[FaceDetection],
        present: bool,
        options: OverlayOptions,
    ) -> Self {
        let border_color = if present {
            FACE_PRESENT_COLOR
        } else {
            FACE_ABSENT_COLOR
        };

        let (fw, fh) = frame_size;
        let (dw, dh) = display;
        let faces = if !options.highlight_face || fw == 0 || fh == 0 || dw == 0 || dh == 0 {
            Vec::new()
        } else {
            let sx = dw as f64 / fw as f64;
            let sy = dh as f64 / fh as f64;
            detections
                .iter()
                .map(|d| {
                    let mut face = d.scaled(sx, sy);
                    if !options.draw_landmarks {
                        face.landmarks = None;
                    }
                    face
                })
                .collect()
        };

        Self {
            width: dw,
            height: dh,
            border_color,
            faces,
        }
    }
}

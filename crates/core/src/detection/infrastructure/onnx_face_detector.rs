//! YOLO-pose face detector on ONNX Runtime via `ort`.
//!
//! One `ort` session is shared by every stream's detector; each call
//! letterboxes the frame, runs inference, decodes boxes plus five keypoints,
//! and suppresses overlapping boxes.
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::detection::domain::detection_model::{DetectionModel, ModelLoadError, ModelSource};
use crate::detection::domain::face_detector::{DetectError, FaceDetection, FaceDetector};
use crate::detection::domain::face_landmarks::FaceLandmarks;
use crate::detection::infrastructure::model_resolver::{self, ModelLocation, ProgressFn};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

/// Fallback model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

const NMS_IOU_THRESH: f64 = 0.45;

/// 5 landmarks × (x, y, conf).
const NUM_KEYPOINT_VALUES: usize = 15;

/// Minimum keypoint confidence to treat a landmark as visible.
const KEYPOINT_CONF_THRESH: f64 = 0.5;

/// Resolves the model file and opens an ONNX Runtime session for it.
pub struct OnnxModelSource {
    location: ModelLocation,
    confidence: f64,
    progress: Option<ProgressFn>,
}

impl OnnxModelSource {
    pub fn new(location: ModelLocation, confidence: f64) -> Self {
        Self {
            location,
            confidence,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl ModelSource for OnnxModelSource {
    fn load(&self) -> Result<Arc<dyn DetectionModel>, ModelLoadError> {
        let path = model_resolver::resolve(&self.location, self.progress.as_ref())
            .map_err(|e| ModelLoadError::Fetch(e.to_string()))?;
        let model = OnnxFaceModel::open(&path, self.confidence)
            .map_err(|e| ModelLoadError::Init(e.to_string()))?;
        Ok(Arc::new(model))
    }
}

/// A loaded face model: the shared session plus its input geometry.
pub struct OnnxFaceModel {
    name: String,
    session: Arc<Mutex<ort::session::Session>>,
    input_size: u32,
    confidence: f64,
}

impl OnnxFaceModel {
    /// The input resolution is read from the model's input shape (NCHW),
    /// falling back to 640 when it is dynamic or unreadable.
    pub fn open(model_path: &Path, confidence: f64) -> Result<Self, DetectError> {
        let session = ort::session::Session::builder()?.commit_from_file(model_path)?;

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| match input.dtype() {
                ort::value::ValueType::Tensor { shape, .. } if shape.len() >= 4 && shape[2] > 0 => {
                    Some(shape[2] as u32)
                }
                _ => None,
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        let name = model_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx-face".to_string());

        Ok(Self {
            name,
            session: Arc::new(Mutex::new(session)),
            input_size,
            confidence,
        })
    }
}

impl DetectionModel for OnnxFaceModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn detector(&self) -> Result<Box<dyn FaceDetector>, ModelLoadError> {
        Ok(Box::new(OnnxFaceDetector {
            session: self.session.clone(),
            input_size: self.input_size,
            confidence: self.confidence,
        }))
    }
}

pub struct OnnxFaceDetector {
    session: Arc<Mutex<ort::session::Session>>,
    input_size: u32,
    confidence: f64,
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceDetection>, DetectError> {
        let (input_tensor, letterbox) = letterbox(frame, self.input_size);
        let input_value = ort::value::Tensor::from_array(input_tensor)?;

        let (shape, data) = {
            let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            let outputs = session.run(ort::inputs![input_value])?;
            if outputs.len() == 0 {
                return Err("face model produced no outputs".into());
            }
            let tensor = outputs[0].try_extract_array::<f32>()?;
            let shape = tensor.shape().to_vec();
            let data: Vec<f32> = tensor.iter().copied().collect();
            (shape, data)
        };

        if shape.len() != 3 {
            return Err(format!("unexpected face model output shape: {shape:?}").into());
        }

        let mut raw = decode_rows(&shape, &data, self.confidence, &letterbox);
        let kept = nms(&mut raw, NMS_IOU_THRESH);

        Ok(kept
            .into_iter()
            .map(|d| FaceDetection {
                bbox: BoundingBox::from_corners(d.x1, d.y1, d.x2, d.y2),
                confidence: d.confidence,
                landmarks: d.keypoints.map(FaceLandmarks::new),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Maps letterboxed model coordinates back onto the source frame.
#[derive(Clone, Copy, Debug)]
struct Letterbox {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn unmap(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_x as f64) / self.scale,
            (y - self.pad_y as f64) / self.scale,
        )
    }
}

/// Letterbox-resize a frame to `target_size` × `target_size` as a
/// normalized NCHW float32 tensor, padded with YOLO gray (114/255).
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, Letterbox) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = (fw * scale).round() as u32;
    let new_h = (fh * scale).round() as u32;
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    // Nearest-neighbor resize into the padded region.
    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            for c in 0..3 {
                tensor[[0, c, pad_y as usize + y, pad_x as usize + x]] =
                    src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x,
            pad_y,
        },
    )
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct RawDetection {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    confidence: f64,
    keypoints: Option<[(f64, f64); 5]>,
}

/// Decodes `[1, features, detections]` or `[1, detections, features]` output.
///
/// Row layout: `[cx, cy, w, h, conf, kp0_x, kp0_y, kp0_conf, ...]`.
fn decode_rows(shape: &[usize], data: &[f32], confidence: f64, lb: &Letterbox) -> Vec<RawDetection> {
    let transposed = shape[1] < shape[2];
    let (num_dets, num_feats) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if num_feats < 5 || data.len() < num_dets * num_feats {
        return Vec::new();
    }

    let value = |det: usize, feat: usize| -> f64 {
        if transposed {
            data[feat * num_dets + det] as f64
        } else {
            data[det * num_feats + feat] as f64
        }
    };

    let mut out = Vec::new();
    for i in 0..num_dets {
        let conf = value(i, 4);
        if conf < confidence {
            continue;
        }
        let (cx, cy, w, h) = (value(i, 0), value(i, 1), value(i, 2), value(i, 3));
        let (x1, y1) = lb.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = lb.unmap(cx + w / 2.0, cy + h / 2.0);

        let keypoints = (num_feats >= 5 + NUM_KEYPOINT_VALUES).then(|| {
            let mut pts = [(0.0f64, 0.0f64); 5];
            for (k, pt) in pts.iter_mut().enumerate() {
                let base = 5 + k * 3;
                // Low-confidence keypoints stay at (0, 0), which FaceLandmarks treats as hidden.
                if value(i, base + 2) >= KEYPOINT_CONF_THRESH {
                    *pt = lb.unmap(value(i, base), value(i, base + 1));
                }
            }
            pts
        });

        out.push(RawDetection {
            x1,
            y1,
            x2,
            y2,
            confidence: conf,
            keypoints,
        });
    }
    out
}

/// Greedy NMS: sort by confidence descending, suppress overlapping boxes.
fn nms(dets: &mut [RawDetection], iou_thresh: f64) -> Vec<RawDetection> {
    dets.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let boxes: Vec<BoundingBox> = dets
        .iter()
        .map(|d| BoundingBox::from_corners(d.x1, d.y1, d.x2, d.y2))
        .collect();
    let mut suppressed = vec![false; dets.len()];
    let mut keep = Vec::new();

    for i in 0..dets.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(dets[i].clone());
        for j in (i + 1)..dets.len() {
            if !suppressed[j] && boxes[i].iou(&boxes[j]) > iou_thresh {
                suppressed[j] = true;
            }
        }
    }
    keep
}

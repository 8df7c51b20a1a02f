/// Face detection model with 5-point landmarks (YOLO pose head trained on WIDER FACE).
pub const FACE_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const FACE_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

/// Directory name used under the platform cache/config roots.
pub const APP_DIR_NAME: &str = "verifycam";

pub const DEFAULT_MAX_DURATION_SECONDS: u32 = 60;
pub const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 100;
pub const DEFAULT_PROCESSING_DELAY_MS: u64 = 3000;
pub const DEFAULT_RECORDER_FLUSH_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Recorder encodings in order of preference.
pub const DEFAULT_RECORDER_MIME_TYPES: &[&str] = &["video/webm", "video/mp4"];

/// Overlay border colours (RGB hex) for face present / absent.
pub const FACE_PRESENT_COLOR: &str = "#22c55e";
pub const FACE_ABSENT_COLOR: &str = "#ef4444";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

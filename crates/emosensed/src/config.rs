use emosense_core::TensorLayout;
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing the cascade and classifier artifacts.
    pub model_dir: PathBuf,
    /// Classifier artifact (`.onnx` or `.mpk`).
    pub model_path: PathBuf,
    /// SeetaFace cascade model.
    pub cascade_path: PathBuf,
    /// Input layout for ONNX classifiers.
    pub onnx_layout: TensorLayout,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Root directory for uploaded and captured images.
    pub media_root: PathBuf,
    /// URL prefix under which `media_root` is served.
    pub media_url: String,
    /// V4L2 device path for camera capture.
    pub camera_device: String,
    /// Frames discarded before each capture (auto-exposure settling).
    pub warmup_frames: usize,
    /// Smallest face, in pixels, the cascade looks for.
    pub min_face_size: u32,
}

impl Config {
    /// Load configuration from `EMOSENSE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("EMOSENSE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| emosense_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("emosense");

        let model_path = std::env::var("EMOSENSE_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| model_dir.join(emosense_core::SERVING_MODEL_FILE));

        let cascade_path = std::env::var("EMOSENSE_CASCADE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| model_dir.join(emosense_core::CASCADE_MODEL_FILE));

        let onnx_layout = parse_layout(std::env::var("EMOSENSE_ONNX_LAYOUT").ok().as_deref());

        let db_path = std::env::var("EMOSENSE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("results.db"));

        let media_root = std::env::var("EMOSENSE_MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("media"));

        Self {
            model_dir,
            model_path,
            cascade_path,
            onnx_layout,
            db_path,
            media_root,
            media_url: std::env::var("EMOSENSE_MEDIA_URL").unwrap_or_else(|_| "/media/".to_string()),
            camera_device: std::env::var("EMOSENSE_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            warmup_frames: env_usize("EMOSENSE_WARMUP_FRAMES", 4),
            min_face_size: env_u32("EMOSENSE_MIN_FACE_SIZE", 20),
        }
    }

    pub fn model_path_str(&self) -> String {
        self.model_path.to_string_lossy().into_owned()
    }

    pub fn cascade_path_str(&self) -> String {
        self.cascade_path.to_string_lossy().into_owned()
    }
}

/// Unset means NHWC. An unknown value also falls back to NHWC, loudly.
fn parse_layout(value: Option<&str>) -> TensorLayout {
    let Some(value) = value else {
        return TensorLayout::Nhwc;
    };
    value.parse().unwrap_or_else(|e| {
        tracing::warn!(value, error = %e, "EMOSENSE_ONNX_LAYOUT not recognised, using NHWC");
        TensorLayout::Nhwc
    })
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_layout() {
        assert_eq!(parse_layout(None), TensorLayout::Nhwc);
        assert_eq!(parse_layout(Some("nchw")), TensorLayout::Nchw);
        assert_eq!(parse_layout(Some("NHWC")), TensorLayout::Nhwc);
        assert_eq!(parse_layout(Some("channels_first")), TensorLayout::Nhwc);
    }
}

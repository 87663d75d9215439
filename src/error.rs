use std::path::PathBuf;

use thiserror::Error;

use crate::engine::Stage;

/// Errors that abort a pipeline invocation.
///
/// Empty detections, empty decodes and degenerate geometry are not errors;
/// they surface as empty or filtered results instead.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("malformed config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("model not found at {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("failed to read character dictionary {path}: {source}")]
    Dictionary {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{stage} output has shape {actual:?}, expected {expected}")]
    OutputShape {
        stage: Stage,
        expected: &'static str,
        actual: Vec<usize>,
    },

    #[error("{stage} session was not initialised")]
    MissingSession { stage: Stage },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("ONNX Runtime error: {0}")]
    Runtime(#[from] ort::Error),
}

pub type Result<T, E = OcrError> = std::result::Result<T, E>;

//! YAML configuration for the OCR pipeline.
//!
//! Every field has a default, so a config file only needs to name the model
//! locations. Call [`Config::validate`] (done by [`Config::from_file`]) before
//! building a pipeline from a hand-assembled config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OcrError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub predictor: PredictorConfig,
    pub detector: DetectorConfig,
    pub classifier: ClassifierConfig,
    pub recognizer: RecognizerConfig,
    /// What to do with boxes whose decoded text is empty.
    pub empty_text: EmptyTextPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub use_gpu: bool,
    pub gpu_id: i32,
    pub num_cpu_threads: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            use_gpu: false,
            gpu_id: 0,
            num_cpu_threads: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    /// Upscale so the shorter side reaches `limit_side_len`.
    Min,
    /// Downscale so the longer side fits in `limit_side_len`.
    #[default]
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMode {
    /// Mean probability inside the rotated box.
    #[default]
    Fast,
    /// Mean probability inside the raw contour polygon.
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyTextPolicy {
    #[default]
    Keep,
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_dir: PathBuf,
    pub limit_type: LimitType,
    pub limit_side_len: u32,
    pub thresh: f32,
    pub box_thresh: f32,
    pub unclip_ratio: f32,
    pub score_mode: ScoreMode,
    pub use_dilation: bool,
    pub max_candidates: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models/det"),
            limit_type: LimitType::Max,
            limit_side_len: 960,
            thresh: 0.3,
            box_thresh: 0.6,
            unclip_ratio: 1.5,
            score_mode: ScoreMode::Fast,
            use_dilation: false,
            max_candidates: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub enabled: bool,
    pub model_dir: PathBuf,
    pub thresh: f32,
    pub batch_num: usize,
    pub image_shape: Vec<usize>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model_dir: PathBuf::from("models/cls"),
            thresh: 0.9,
            batch_num: 30,
            image_shape: vec![3, 48, 192],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub model_dir: PathBuf,
    pub batch_num: usize,
    pub image_shape: Vec<usize>,
    pub char_dict_path: PathBuf,
    pub max_text_length: usize,
    pub use_space_char: bool,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models/rec"),
            batch_num: 30,
            image_shape: vec![3, 48, 320],
            char_dict_path: PathBuf::from("models/ppocr_keys_v1.txt"),
            max_text_length: 25,
            use_space_char: true,
        }
    }
}

/// Input shape of a classifier or recognizer model, `[channels, height, width]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    fn parse(field: &str, shape: &[usize]) -> Result<Self> {
        match *shape {
            [3, height, width] if height > 0 && width > 0 => Ok(Self {
                channels: 3,
                height,
                width,
            }),
            _ => Err(OcrError::Config(format!(
                "{field} must be [3, height, width] with positive sizes, got {shape:?}"
            ))),
        }
    }
}

impl ClassifierConfig {
    pub fn shape(&self) -> Result<ImageShape> {
        ImageShape::parse("classifier.image_shape", &self.image_shape)
    }
}

impl RecognizerConfig {
    pub fn shape(&self) -> Result<ImageShape> {
        ImageShape::parse("recognizer.image_shape", &self.image_shape)
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| OcrError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&data)?;
        log::debug!("Loaded config from {}: {config:?}", path.display());
        Ok(config)
    }

    pub fn from_yaml_str(data: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, value: f32| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(OcrError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )))
            }
        };
        let positive = |name: &str, value: usize| {
            if value > 0 {
                Ok(())
            } else {
                Err(OcrError::Config(format!("{name} must be positive")))
            }
        };

        unit("detector.thresh", self.detector.thresh)?;
        unit("detector.box_thresh", self.detector.box_thresh)?;
        unit("classifier.thresh", self.classifier.thresh)?;
        positive("detector.limit_side_len", self.detector.limit_side_len as usize)?;
        positive("detector.max_candidates", self.detector.max_candidates)?;
        positive("classifier.batch_num", self.classifier.batch_num)?;
        positive("recognizer.batch_num", self.recognizer.batch_num)?;
        if !(self.detector.unclip_ratio >= 0.0 && self.detector.unclip_ratio.is_finite()) {
            return Err(OcrError::Config(format!(
                "detector.unclip_ratio must be a non-negative number, got {}",
                self.detector.unclip_ratio
            )));
        }
        self.classifier.shape()?;
        self.recognizer.shape()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let config = Config::from_yaml_str(
            r#"
detector:
  model_dir: /models/det
  limit_type: min
  score_mode: slow
classifier:
  enabled: true
recognizer:
  char_dict_path: keys.txt
  image_shape: [3, 32, 320]
empty_text: drop
"#,
        )
        .unwrap();

        assert_eq!(config.detector.model_dir, PathBuf::from("/models/det"));
        assert_eq!(config.detector.limit_type, LimitType::Min);
        assert_eq!(config.detector.score_mode, ScoreMode::Slow);
        assert_eq!(config.detector.thresh, 0.3);
        assert_eq!(config.detector.max_candidates, 1000);
        assert!(config.classifier.enabled);
        assert_eq!(config.classifier.batch_num, 30);
        assert_eq!(
            config.recognizer.shape().unwrap(),
            ImageShape {
                channels: 3,
                height: 32,
                width: 320
            }
        );
        assert_eq!(config.empty_text, EmptyTextPolicy::Drop);
        assert!(!config.predictor.use_gpu);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = Config::from_yaml_str("detector:\n  box_thresh: 1.5\n").unwrap_err();
        assert!(matches!(err, OcrError::Config(_)));

        let err = Config::from_yaml_str("recognizer:\n  image_shape: [1, 32, 320]\n").unwrap_err();
        assert!(matches!(err, OcrError::Config(_)));

        let err = Config::from_yaml_str("classifier:\n  batch_num: 0\n").unwrap_err();
        assert!(matches!(err, OcrError::Config(_)));
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let err = Config::from_yaml_str("detector: [not, a, map]").unwrap_err();
        assert!(matches!(err, OcrError::Yaml(_)));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, OcrError::ConfigIo { .. }));
    }
}

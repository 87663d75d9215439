use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use ndarray::{Array4, ArrayD};
use ort::{inputs, ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{
    config::{Config, PredictorConfig},
    error::{OcrError, Result},
};

/// Which model a tensor is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Detection,
    Classification,
    Recognition,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Detection => "det",
            Stage::Classification => "cls",
            Stage::Recognition => "rec",
        })
    }
}

/// The neural network side of the pipeline.
///
/// Inputs are `(batch, 3, height, width)` planar tensors. Outputs are
/// `(batch, 1, H, W)` for detection, `(batch, classes)` for classification
/// and `(batch, timesteps, classes)` for recognition.
pub trait InferenceEngine {
    fn infer(&self, stage: Stage, input: Array4<f32>) -> Result<ArrayD<f32>>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for &E {
    fn infer(&self, stage: Stage, input: Array4<f32>) -> Result<ArrayD<f32>> {
        (**self).infer(stage, input)
    }
}

/// Receives the wall time spent in each pipeline stage.
pub type StageObserver = Box<dyn Fn(Stage, Duration) + Send + Sync>;

/// Resolves a configured model location to an ONNX file.
///
/// Accepts the file itself, or a directory containing `inference.onnx` or
/// exactly one `*.onnx` file.
pub fn resolve_model(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if path.is_dir() {
        let preferred = path.join("inference.onnx");
        if preferred.is_file() {
            return Ok(preferred);
        }
        let candidates = std::fs::read_dir(path)
            .map_err(|_| OcrError::ModelNotFound(path.to_path_buf()))?
            .filter_map(|entry| entry.ok().map(|it| it.path()))
            .filter(|it| it.extension().is_some_and(|ext| ext == "onnx"))
            .collect::<Vec<_>>();
        if let [only] = candidates.as_slice() {
            return Ok(only.clone());
        }
    }
    Err(OcrError::ModelNotFound(path.to_path_buf()))
}

/// ONNX Runtime backed engine holding one session per enabled stage.
pub struct OrtEngine {
    det: Session,
    cls: Option<Session>,
    rec: Session,
}

#[cfg(feature = "cuda")]
fn setup_cuda(device_id: i32) -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    CUDAExecutionProvider::default()
        .with_device_id(device_id)
        .build()
}

fn execution_providers(predictor: &PredictorConfig) -> Vec<ExecutionProviderDispatch> {
    if !predictor.use_gpu {
        return Vec::new();
    }
    #[cfg(feature = "cuda")]
    {
        vec![setup_cuda(predictor.gpu_id)]
    }
    #[cfg(not(feature = "cuda"))]
    {
        log::warn!(
            "use_gpu is set but the crate was built without the `cuda` feature; running on CPU"
        );
        Vec::new()
    }
}

#[instrument(level = "debug", skip(predictor))]
fn load_session(model: &Path, predictor: &PredictorConfig) -> Result<Session> {
    let path = resolve_model(model)?;
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(predictor.num_cpu_threads.max(1))?
        .with_execution_providers(execution_providers(predictor))?
        .commit_from_file(&path)?;

    log::debug!("{} inputs: {:?}", path.display(), session.inputs);
    log::debug!("{} outputs: {:?}", path.display(), session.outputs);
    Ok(session)
}

impl OrtEngine {
    #[instrument(level = "debug", skip(config))]
    pub fn init(config: &Config) -> Result<Self> {
        let det = load_session(&config.detector.model_dir, &config.predictor)?;
        let cls = config
            .classifier
            .enabled
            .then(|| load_session(&config.classifier.model_dir, &config.predictor))
            .transpose()?;
        let rec = load_session(&config.recognizer.model_dir, &config.predictor)?;
        Ok(Self { det, cls, rec })
    }

    fn session(&self, stage: Stage) -> Result<&Session> {
        match stage {
            Stage::Detection => Ok(&self.det),
            Stage::Classification => self.cls.as_ref().ok_or(OcrError::MissingSession { stage }),
            Stage::Recognition => Ok(&self.rec),
        }
    }
}

impl InferenceEngine for OrtEngine {
    #[instrument(level = "trace", skip(self, input), fields(shape = ?input.dim()))]
    fn infer(&self, stage: Stage, input: Array4<f32>) -> Result<ArrayD<f32>> {
        let session = self.session(stage)?;
        let input_name = session
            .inputs
            .first()
            .map(|it| it.name.clone())
            .ok_or_else(|| OcrError::Inference(format!("{stage} model declares no inputs")))?;
        let outputs = session.run(inputs![input_name.as_str() => input]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| OcrError::Inference(format!("{stage} model returned no outputs")))?;
        let tensor = output.try_extract_tensor::<f32>()?;
        log::trace!("{stage} output tensor size: {:?}", tensor.shape());
        Ok(tensor.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_model_inside_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_model(dir.path()),
            Err(OcrError::ModelNotFound(_))
        ));

        let model = dir.path().join("det.onnx");
        std::fs::write(&model, b"onnx").unwrap();
        assert_eq!(resolve_model(dir.path()).unwrap(), model);
        assert_eq!(resolve_model(&model).unwrap(), model);

        std::fs::write(dir.path().join("inference.onnx"), b"onnx").unwrap();
        assert_eq!(
            resolve_model(dir.path()).unwrap(),
            dir.path().join("inference.onnx")
        );
    }

    #[test]
    fn missing_path_is_reported() {
        let err = resolve_model(Path::new("/no/such/model")).unwrap_err();
        assert!(err.to_string().contains("/no/such/model"));
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::Detection.to_string(), "det");
        assert_eq!(Stage::Classification.to_string(), "cls");
        assert_eq!(Stage::Recognition.to_string(), "rec");
    }
}

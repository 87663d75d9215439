use std::{
    path::Path,
    time::{Duration, Instant},
};

use angle_net::AngleNet;
use boxes::sort_boxes;
use crnn_net::CrnnNet;
use crop::get_rotate_crop_image;
use dbnet::DbNet;

pub mod angle_net;
pub mod boxes;
pub mod config;
pub mod crnn_net;
pub mod crop;
pub mod dbnet;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod preprocess;
mod result;
pub mod util;

pub use config::{Config, EmptyTextPolicy};
pub use crnn_net::Alphabet;
pub use engine::{InferenceEngine, OrtEngine, Stage, StageObserver};
pub use error::{OcrError, Result};
pub use geometry::{Point, QuadBox};
use image::DynamicImage;
pub use result::*;
use tracing::instrument;

pub use ort as runtime;

#[derive(Default)]
pub struct OcrBuilder {
    config: Config,
    observer: Option<StageObserver>,
}

impl OcrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Called with the wall time of every stage of every `predict` call.
    pub fn observer(
        mut self,
        observer: impl Fn(Stage, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Loads the ONNX models and the recognizer dictionary named by the
    /// config.
    #[instrument(skip(self))]
    pub fn build(self) -> Result<PaddleOcr> {
        self.config.validate()?;
        let engine = OrtEngine::init(&self.config)?;
        let alphabet = Alphabet::load(
            &self.config.recognizer.char_dict_path,
            self.config.recognizer.use_space_char,
        )?;
        self.build_with_engine(engine, alphabet)
    }

    /// Assembles the pipeline around an already constructed engine.
    pub fn build_with_engine<E: InferenceEngine>(
        self,
        engine: E,
        alphabet: Alphabet,
    ) -> Result<PaddleOcr<E>> {
        let Self { config, observer } = self;
        config.validate()?;
        let cls = config
            .classifier
            .enabled
            .then(|| AngleNet::from_config(&config.classifier))
            .transpose()?;
        Ok(PaddleOcr {
            det: DbNet::from_config(&config.detector),
            cls,
            rec: CrnnNet::with_alphabet(&config.recognizer, alphabet)?,
            engine,
            empty_text: config.empty_text,
            observer,
        })
    }
}

/// Detection, optional orientation classification and recognition over one
/// inference engine.
pub struct PaddleOcr<E: InferenceEngine = OrtEngine> {
    det: DbNet,
    cls: Option<AngleNet>,
    rec: CrnnNet,
    engine: E,
    empty_text: EmptyTextPolicy,
    observer: Option<StageObserver>,
}

impl PaddleOcr {
    /// Decodes an image file.
    pub fn read_image(path: impl AsRef<Path>) -> Result<DynamicImage> {
        let path = path.as_ref();
        image::open(path).map_err(|source| OcrError::Image {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl<E: InferenceEngine> PaddleOcr<E> {
    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn timed<T>(&self, stage: Stage, run: impl FnOnce() -> Result<T>) -> Result<T> {
        let start = Instant::now();
        let out = run()?;
        let elapsed = start.elapsed();
        log::debug!("{stage} took {elapsed:?}");
        if let Some(observer) = &self.observer {
            observer(stage, elapsed);
        }
        Ok(out)
    }

    /// Finds and reads every text line in `image`, in reading order.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn predict(&self, image: &DynamicImage) -> Result<Vec<OcrResult>> {
        let boxes = self.timed(Stage::Detection, || {
            self.det.get_text_boxes(&self.engine, image)
        })?;
        if boxes.is_empty() {
            log::debug!("No text boxes found");
            return Ok(Vec::new());
        }

        let boxes = sort_boxes(&boxes);
        let crops = boxes
            .iter()
            .map(|it| get_rotate_crop_image(image, it))
            .collect::<Vec<_>>();
        #[cfg(feature = "debug")]
        save_crops(&crops);

        let (crops, directions) = match &self.cls {
            Some(angle_net) => {
                let (crops, directions) = self.timed(Stage::Classification, || {
                    angle_net.get_angles(&self.engine, crops)
                })?;
                (crops, Some(directions))
            }
            None => (crops, None),
        };

        let lines = self.timed(Stage::Recognition, || {
            self.rec.get_text_lines(&self.engine, &crops)
        })?;

        let results = boxes
            .into_iter()
            .zip(lines)
            .enumerate()
            .map(|(i, (bbox, line))| OcrResult {
                text: line.text,
                bbox,
                score: line.score,
                direction: directions.as_ref().and_then(|it| it.get(i).copied()),
            })
            .filter(|it| self.empty_text == EmptyTextPolicy::Keep || !it.text.is_empty())
            .collect::<Vec<_>>();
        log::debug!("{} results", results.len());
        Ok(results)
    }

    /// Runs [`predict`](Self::predict) on each image in turn.
    pub fn predict_batch(&self, images: &[DynamicImage]) -> Result<Vec<Vec<OcrResult>>> {
        images.iter().map(|image| self.predict(image)).collect()
    }
}

#[cfg(feature = "debug")]
fn save_crops(crops: &[DynamicImage]) {
    if let Err(err) = std::fs::create_dir_all("part_images") {
        log::warn!("Failed to create part_images: {err}");
        return;
    }
    for (i, crop) in crops.iter().enumerate() {
        if let Err(err) = crop.save(format!("part_images/{i}.png")) {
            log::warn!("Failed to save crop {i}: {err}");
        }
    }
}

use image::DynamicImage;
use ndarray::{ArrayView2, Axis, Ix2};
use tracing::instrument;

use crate::{
    config::{ClassifierConfig, ImageShape},
    engine::{InferenceEngine, Stage},
    error::{OcrError, Result},
    preprocess::classifier_batch,
    util::argmax,
    Direction,
};

/// Text orientation classifier.
pub struct AngleNet {
    batch_num: usize,
    thresh: f32,
    shape: ImageShape,
}

impl AngleNet {
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        Ok(Self {
            batch_num: config.batch_num.max(1),
            thresh: config.thresh,
            shape: config.shape()?,
        })
    }

    /// Classifies every crop, returning the crops with confidently
    /// upside-down ones turned 180 degrees, plus each crop's direction.
    #[instrument(level = "debug", skip(self, engine, images))]
    pub fn get_angles<E: InferenceEngine>(
        &self,
        engine: &E,
        images: Vec<DynamicImage>,
    ) -> Result<(Vec<DynamicImage>, Vec<Direction>)> {
        let rgb = images.iter().map(|it| it.to_rgb8()).collect::<Vec<_>>();
        let mut directions = Vec::with_capacity(images.len());
        for chunk in rgb.chunks(self.batch_num) {
            let batch = classifier_batch(&chunk.iter().collect::<Vec<_>>(), self.shape);
            let output = engine.infer(Stage::Classification, batch)?;
            let actual = output.shape().to_vec();
            let scores = output
                .into_dimensionality::<Ix2>()
                .ok()
                .filter(|it| it.len_of(Axis(0)) == chunk.len() && it.len_of(Axis(1)) > 0)
                .ok_or(OcrError::OutputShape {
                    stage: Stage::Classification,
                    expected: "(batch, classes)",
                    actual,
                })?;
            directions.extend(decode_directions(scores.view()));
        }

        let images = images
            .into_iter()
            .zip(&directions)
            .map(|(image, direction)| {
                if direction.is_upside_down() && direction.score > self.thresh {
                    image.rotate180()
                } else {
                    image
                }
            })
            .collect();
        log::debug!("cls num: {}", directions.len());
        Ok((images, directions))
    }
}

/// One direction per row of a `(batch, classes)` score matrix.
pub fn decode_directions(scores: ArrayView2<f32>) -> Vec<Direction> {
    scores
        .outer_iter()
        .map(|row| {
            let (label, score) = argmax(row).unwrap_or((0, 0.0));
            Direction { label, score }
        })
        .collect()
}

use std::path::Path;

use float_ord::FloatOrd;
use image::DynamicImage;
use ndarray::{ArrayView2, Axis, Ix3};
use tracing::instrument;

use crate::{
    config::{ImageShape, RecognizerConfig},
    engine::{InferenceEngine, Stage},
    error::{OcrError, Result},
    preprocess::recognizer_batch,
    util::{argmax, Permutation},
    TextLine,
};

/// Recognizer output classes. Index 0 is the CTC blank and is never emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    keys: Vec<String>,
}

impl Alphabet {
    pub const BLANK: usize = 0;

    /// Builds an alphabet from dictionary tokens, one per class after the
    /// blank.
    pub fn new<S: Into<String>>(tokens: impl IntoIterator<Item = S>, use_space_char: bool) -> Self {
        let keys = ["#".to_string()]
            .into_iter()
            .chain(tokens.into_iter().map(Into::into))
            .chain(use_space_char.then(|| " ".to_string()))
            .collect();
        Self { keys }
    }

    /// One token per line of `dict`.
    pub fn from_dict(dict: &str, use_space_char: bool) -> Self {
        Self::new(dict.lines(), use_space_char)
    }

    pub fn load(path: impl AsRef<Path>, use_space_char: bool) -> Result<Self> {
        let path = path.as_ref();
        let dict = std::fs::read_to_string(path).map_err(|source| OcrError::Dictionary {
            path: path.to_path_buf(),
            source,
        })?;
        let alphabet = Self::from_dict(&dict, use_space_char);
        log::debug!("Loaded {} recognizer classes from {}", alphabet.len(), path.display());
        Ok(alphabet)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }
}

/// Greedy CTC decode of one `(timesteps, classes)` score matrix.
///
/// Takes the best class per timestep, skips blanks and repeats of the
/// previous timestep's class, and averages the kept probabilities. Class
/// indices outside the alphabet are skipped as well.
pub fn ctc_greedy_decode(alphabet: &Alphabet, scores: ArrayView2<f32>) -> TextLine {
    let mut text = String::new();
    let mut character_scores = Vec::new();
    let mut last_index = None;
    for row in scores.outer_iter() {
        let Some((index, score)) = argmax(row) else {
            continue;
        };
        if index != Alphabet::BLANK && last_index != Some(index) {
            if let Some(key) = alphabet.get(index) {
                text.push_str(key);
                character_scores.push(score);
            }
        }
        last_index = Some(index);
    }
    let score = if character_scores.is_empty() {
        0.0
    } else {
        character_scores.iter().sum::<f32>() / character_scores.len() as f32
    };
    TextLine {
        text,
        score,
        character_scores,
    }
}

/// Text line recognizer.
pub struct CrnnNet {
    alphabet: Alphabet,
    batch_num: usize,
    shape: ImageShape,
    max_text_length: usize,
}

impl CrnnNet {
    pub fn init(config: &RecognizerConfig) -> Result<Self> {
        let alphabet = Alphabet::load(&config.char_dict_path, config.use_space_char)?;
        Self::with_alphabet(config, alphabet)
    }

    pub fn with_alphabet(config: &RecognizerConfig, alphabet: Alphabet) -> Result<Self> {
        Ok(Self {
            alphabet,
            batch_num: config.batch_num.max(1),
            shape: config.shape()?,
            max_text_length: config.max_text_length,
        })
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    /// Recognizes every crop. Crops are batched in order of aspect ratio so
    /// each batch pads to a similar width; the returned lines follow the
    /// input order.
    #[instrument(level = "debug", skip(self, engine, images))]
    pub fn get_text_lines<E: InferenceEngine>(
        &self,
        engine: &E,
        images: &[DynamicImage],
    ) -> Result<Vec<TextLine>> {
        let rgb = images.iter().map(|it| it.to_rgb8()).collect::<Vec<_>>();
        let ratios = rgb
            .iter()
            .map(|it| FloatOrd(it.width() as f32 / it.height().max(1) as f32))
            .collect::<Vec<_>>();
        let order = Permutation::sort_by(&ratios, |a, b| a.cmp(b));

        let mut lines = Vec::with_capacity(rgb.len());
        for chunk in order.indices().chunks(self.batch_num) {
            let batch = chunk.iter().map(|&i| &rgb[i]).collect::<Vec<_>>();
            lines.extend(self.recognize_batch(engine, &batch)?);
        }
        Ok(order.scatter(lines))
    }

    #[instrument(level = "trace", skip(self, engine, images), fields(batch = images.len()))]
    fn recognize_batch<E: InferenceEngine>(
        &self,
        engine: &E,
        images: &[&image::RgbImage],
    ) -> Result<Vec<TextLine>> {
        let tensor = recognizer_batch(images, self.shape);
        let output = engine.infer(Stage::Recognition, tensor)?;
        log::trace!("Output tensor size: {:?}", output.shape());

        let actual = output.shape().to_vec();
        let output = output
            .into_dimensionality::<Ix3>()
            .ok()
            .filter(|it| it.len_of(Axis(0)) == images.len())
            .ok_or(OcrError::OutputShape {
                stage: Stage::Recognition,
                expected: "(batch, timesteps, classes)",
                actual,
            })?;

        Ok(output
            .outer_iter()
            .map(|scores| {
                let line = ctc_greedy_decode(&self.alphabet, scores);
                if line.character_scores.len() > self.max_text_length {
                    log::debug!(
                        "Decoded {} characters, more than max_text_length {}",
                        line.character_scores.len(),
                        self.max_text_length
                    );
                }
                line
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use ndarray::{Array2, Array4, ArrayD, IxDyn};

    use super::*;

    fn alphabet() -> Alphabet {
        Alphabet::new(["a", "b", "c", "d", "A", "e", "B"], false)
    }

    /// One-hot style scores: `prob` on the given class, the rest spread out.
    fn scores(path: &[usize], classes: usize, prob: f32) -> Array2<f32> {
        let rest = (1.0 - prob) / (classes - 1) as f32;
        Array2::from_shape_fn((path.len(), classes), |(t, c)| {
            if c == path[t] {
                prob
            } else {
                rest
            }
        })
    }

    #[test]
    fn collapses_repeats_and_blanks() {
        let line = ctc_greedy_decode(&alphabet(), scores(&[0, 5, 5, 5, 0, 7], 8, 0.9).view());
        assert_eq!(line.text, "AB");
        assert_eq!(line.character_scores, vec![0.9, 0.9]);
        assert!((line.score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn blank_separated_repeats_are_kept() {
        let line = ctc_greedy_decode(&alphabet(), scores(&[1, 1, 0, 1, 2], 8, 0.6).view());
        assert_eq!(line.text, "aab");
    }

    #[test]
    fn all_blank_yields_empty_zero_score() {
        let line = ctc_greedy_decode(&alphabet(), scores(&[0, 0, 0, 0], 8, 0.99).view());
        assert_eq!(line.text, "");
        assert_eq!(line.score, 0.0);
        assert!(line.character_scores.is_empty());
    }

    #[test]
    fn averages_character_confidence() {
        let mut probs = scores(&[1, 0, 2], 8, 0.9);
        probs[[2, 2]] = 0.5;
        probs[[2, 0]] = 0.0;
        let line = ctc_greedy_decode(&alphabet(), probs.view());
        assert_eq!(line.text, "ab");
        assert!((line.score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn out_of_alphabet_classes_are_skipped() {
        let line = ctc_greedy_decode(&alphabet(), scores(&[1, 9, 2], 10, 0.9).view());
        assert_eq!(line.text, "ab");
    }

    #[test]
    fn dictionary_gets_blank_and_space() {
        let alphabet = Alphabet::from_dict("x\ny\nz\n", true);
        assert_eq!(alphabet.len(), 5);
        assert_eq!(alphabet.get(0), Some("#"));
        assert_eq!(alphabet.get(1), Some("x"));
        assert_eq!(alphabet.get(4), Some(" "));

        assert_eq!(Alphabet::from_dict("x\ny", false).len(), 3);
    }

    #[test]
    fn missing_dictionary_is_an_error() {
        let err = Alphabet::load("/no/such/keys.txt", true).unwrap_err();
        assert!(matches!(err, OcrError::Dictionary { .. }));
    }

    /// Reads each crop's fill level back out of the tensor and answers with
    /// the matching digit, recording the batch widths it saw.
    struct GreyLevelEcho {
        widths: std::sync::Mutex<Vec<usize>>,
    }

    impl InferenceEngine for GreyLevelEcho {
        fn infer(&self, stage: Stage, input: Array4<f32>) -> Result<ArrayD<f32>> {
            assert_eq!(stage, Stage::Recognition);
            let (batch, _, _, width) = input.dim();
            self.widths.lock().unwrap().push(width);
            let classes = 11;
            let mut out = ArrayD::<f32>::zeros(IxDyn(&[batch, 3, classes]));
            for b in 0..batch {
                let level = (input[[b, 0, 0, 0]] * 0.5 + 0.5) * 255.0;
                let digit = (level / 10.0).round() as usize - 1;
                out[[b, 0, 0]] = 0.9;
                out[[b, 1, digit + 1]] = 0.8;
                out[[b, 2, 0]] = 0.9;
            }
            Ok(out)
        }
    }

    #[test]
    fn results_follow_input_order_across_batches() {
        let widths = [200u32, 40, 120, 80, 300, 60, 100];
        let crops = widths
            .iter()
            .enumerate()
            .map(|(k, &w)| {
                let level = 10 * (k as u8 + 1);
                DynamicImage::ImageRgb8(RgbImage::from_pixel(w, 32, Rgb([level; 3])))
            })
            .collect::<Vec<_>>();
        let digits = Alphabet::new((0..10).map(|d| d.to_string()), false);
        let config = RecognizerConfig {
            batch_num: 2,
            ..RecognizerConfig::default()
        };
        let net = CrnnNet::with_alphabet(&config, digits).unwrap();
        let engine = GreyLevelEcho {
            widths: Default::default(),
        };

        let lines = net.get_text_lines(&engine, &crops).unwrap();
        let texts = lines.iter().map(|it| it.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["0", "1", "2", "3", "4", "5", "6"]);
        assert!(lines.iter().all(|it| (it.score - 0.8).abs() < 1e-6));

        // batches run from narrowest to widest
        let seen = engine.widths.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    }

    #[test]
    fn rejects_batch_size_mismatch() {
        struct Short;
        impl InferenceEngine for Short {
            fn infer(&self, _: Stage, _: Array4<f32>) -> Result<ArrayD<f32>> {
                Ok(ArrayD::zeros(IxDyn(&[1, 4, 8])))
            }
        }
        let net = CrnnNet::with_alphabet(&RecognizerConfig::default(), alphabet()).unwrap();
        let crops = vec![DynamicImage::new_rgb8(20, 10); 2];
        let err = net.get_text_lines(&Short, &crops).unwrap_err();
        assert!(matches!(err, OcrError::OutputShape { stage: Stage::Recognition, .. }));
    }
}

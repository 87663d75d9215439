use geo::Coord;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::{
    contours::{find_contours, Contour},
    drawing::draw_polygon_mut,
    morphology::{grayscale_dilate, Mask},
    point::Point as PixelPoint,
};
use ndarray::{s, ArrayView2, Ix4};
use tracing::instrument;

use crate::{
    boxes::filter_tag_det_res,
    config::{DetectorConfig, LimitType, ScoreMode},
    engine::{InferenceEngine, Stage},
    error::{OcrError, Result},
    geometry::{min_area_box, unclip, Point, QuadBox},
    preprocess::{detection_tensor, scale_for_detection, Scale},
};

const MIN_SIZE: f32 = 3.0;

/// Turns a DB probability map into quadrilateral text boxes.
#[derive(Debug, Clone, PartialEq)]
pub struct DbPostProcess {
    pub thresh: f32,
    pub box_thresh: f32,
    pub unclip_ratio: f32,
    pub score_mode: ScoreMode,
    pub use_dilation: bool,
    pub max_candidates: usize,
    pub min_size: f32,
}

impl Default for DbPostProcess {
    fn default() -> Self {
        Self::from_config(&DetectorConfig::default())
    }
}

impl DbPostProcess {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            thresh: config.thresh,
            box_thresh: config.box_thresh,
            unclip_ratio: config.unclip_ratio,
            score_mode: config.score_mode,
            use_dilation: config.use_dilation,
            max_candidates: config.max_candidates,
            min_size: MIN_SIZE,
        }
    }

    /// Boxes in source image pixels, clockwise from the top-left corner,
    /// with undersized boxes removed.
    #[instrument(level = "debug", skip(self, pred))]
    pub fn run(
        &self,
        pred: ArrayView2<f32>,
        ori_width: u32,
        ori_height: u32,
        scale: Scale,
    ) -> Vec<QuadBox> {
        let boxes = self.boxes_from_map(pred);
        log::debug!("{} candidate boxes before filtering", boxes.len());
        filter_tag_det_res(boxes, ori_width, ori_height, scale.ratio_w, scale.ratio_h)
    }

    /// Boxes in probability map coordinates.
    #[instrument(level = "trace", skip(self, pred))]
    pub fn boxes_from_map(&self, pred: ArrayView2<f32>) -> Vec<QuadBox> {
        if pred.is_empty() {
            return Vec::new();
        }
        let mut bitmap = binarize(pred, self.thresh);
        if self.use_dilation {
            bitmap = dilate_2x2(&bitmap);
        }

        // Top-level borders only. A blob touching column 0 is reported as a
        // hole without a parent, so `border_type` can't be used here.
        find_contours::<i32>(&bitmap)
            .into_iter()
            .filter(|it| it.parent.is_none())
            .take(self.max_candidates)
            .filter_map(|contour| self.contour_to_box(pred, &contour))
            .collect()
    }

    fn contour_to_box(&self, pred: ArrayView2<f32>, contour: &Contour<i32>) -> Option<QuadBox> {
        if contour.points.len() <= 2 {
            return None;
        }
        let rect = min_area_box(contour.points.iter().map(|p| Coord {
            x: p.x as f32,
            y: p.y as f32,
        }))?;
        if rect.short_side() < self.min_size {
            return None;
        }

        let score = match self.score_mode {
            ScoreMode::Fast => box_score_fast(pred, &rect.points),
            ScoreMode::Slow => polygon_score(pred, &contour.points),
        };
        if score < self.box_thresh {
            return None;
        }

        let expanded = unclip(&rect.points, self.unclip_ratio)?;
        if expanded.width < 1.001 || expanded.height < 1.001 {
            return None;
        }
        if expanded.short_side() < self.min_size + 2.0 {
            return None;
        }

        // The output grid is the map itself; rescaling to the source image
        // happens in `filter_tag_det_res`.
        let (height, width) = pred.dim();
        let (dest_width, dest_height) = (width as f32, height as f32);
        let points = expanded.points.map(|c| {
            Point::new(
                ((c.x / width as f32 * dest_width).round() as i32).clamp(0, dest_width as i32),
                ((c.y / height as f32 * dest_height).round() as i32).clamp(0, dest_height as i32),
            )
        });
        Some(QuadBox::new(points))
    }
}

fn binarize(pred: ArrayView2<f32>, thresh: f32) -> GrayImage {
    let (height, width) = pred.dim();
    let threshold = thresh * 255.0;
    let pixels = pred
        .iter()
        .map(|p| if (p * 255.0) as u8 as f32 > threshold { 255 } else { 0 })
        .collect::<Vec<u8>>();
    GrayImage::from_raw(width as u32, height as u32, pixels)
        .unwrap_or_else(|| GrayImage::new(width as u32, height as u32))
}

/// Dilation with a 2x2 rectangular kernel anchored at its bottom-right cell.
fn dilate_2x2(bitmap: &GrayImage) -> GrayImage {
    let kernel = Mask::from_image(&GrayImage::from_pixel(2, 2, Luma([255])), 1, 1);
    grayscale_dilate(bitmap, &kernel)
}

/// Mean probability inside the filled polygon, restricted to the window
/// `[x_min, x_max] x [y_min, y_max]`. Polygon points are window-relative.
fn masked_mean(
    pred: ArrayView2<f32>,
    (x_min, x_max, y_min, y_max): (usize, usize, usize, usize),
    polygon: &mut Vec<PixelPoint<i32>>,
) -> f32 {
    polygon.dedup();
    while polygon.len() > 1 && polygon.first() == polygon.last() {
        polygon.pop();
    }
    if polygon.len() < 3 {
        return 0.0;
    }

    let mut mask = GrayImage::new((x_max - x_min + 1) as u32, (y_max - y_min + 1) as u32);
    draw_polygon_mut(&mut mask, polygon.as_slice(), Luma([1]));

    let window = pred.slice(s![y_min..=y_max, x_min..=x_max]);
    let (sum, count) = window
        .indexed_iter()
        .filter(|((y, x), _)| mask.get_pixel(*x as u32, *y as u32).0[0] > 0)
        .fold((0.0f32, 0usize), |(sum, count), (_, value)| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

fn window(
    pred: ArrayView2<f32>,
    xs: impl Iterator<Item = f32> + Clone,
    ys: impl Iterator<Item = f32> + Clone,
) -> (usize, usize, usize, usize) {
    let (height, width) = pred.dim();
    let clamp_x = |v: f32| (v as i64).clamp(0, width as i64 - 1) as usize;
    let clamp_y = |v: f32| (v as i64).clamp(0, height as i64 - 1) as usize;
    (
        clamp_x(xs.clone().fold(f32::INFINITY, f32::min).floor()),
        clamp_x(xs.fold(f32::NEG_INFINITY, f32::max).ceil()),
        clamp_y(ys.clone().fold(f32::INFINITY, f32::min).floor()),
        clamp_y(ys.fold(f32::NEG_INFINITY, f32::max).ceil()),
    )
}

/// Mean probability inside the rotated box.
pub(crate) fn box_score_fast(pred: ArrayView2<f32>, points: &[Coord<f32>; 4]) -> f32 {
    let bounds = window(pred, points.iter().map(|p| p.x), points.iter().map(|p| p.y));
    let (x_min, _, y_min, _) = bounds;
    let mut polygon = points
        .iter()
        .map(|p| PixelPoint::new(p.x as i32 - x_min as i32, p.y as i32 - y_min as i32))
        .collect();
    masked_mean(pred, bounds, &mut polygon)
}

/// Mean probability inside the contour itself.
pub(crate) fn polygon_score(pred: ArrayView2<f32>, contour: &[PixelPoint<i32>]) -> f32 {
    let bounds = window(
        pred,
        contour.iter().map(|p| p.x as f32),
        contour.iter().map(|p| p.y as f32),
    );
    let (x_min, _, y_min, _) = bounds;
    let mut polygon = contour
        .iter()
        .map(|p| PixelPoint::new(p.x - x_min as i32, p.y - y_min as i32))
        .collect();
    masked_mean(pred, bounds, &mut polygon)
}

/// Text detection stage: resize, infer, post-process.
pub struct DbNet {
    post: DbPostProcess,
    limit_type: LimitType,
    limit_side_len: u32,
}

impl DbNet {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            post: DbPostProcess::from_config(config),
            limit_type: config.limit_type,
            limit_side_len: config.limit_side_len,
        }
    }

    #[instrument(skip(self, engine, image), level = "debug")]
    pub fn get_text_boxes<E: InferenceEngine>(
        &self,
        engine: &E,
        image: &DynamicImage,
    ) -> Result<Vec<QuadBox>> {
        let scale = scale_for_detection(
            image.width(),
            image.height(),
            self.limit_type,
            self.limit_side_len,
        );
        let input = detection_tensor(image, scale);
        let output = engine.infer(Stage::Detection, input)?;

        let actual = output.shape().to_vec();
        let shape_error = || OcrError::OutputShape {
            stage: Stage::Detection,
            expected: "(batch, 1, height, width)",
            actual: actual.clone(),
        };
        let pred_mat = output.into_dimensionality::<Ix4>().map_err(|_| shape_error())?;
        if pred_mat.len_of(ndarray::Axis(0)) == 0 || pred_mat.len_of(ndarray::Axis(1)) == 0 {
            return Err(shape_error());
        }
        let pred_data = pred_mat.slice(s![0, 0, .., ..]);

        let boxes = self.post.run(pred_data, image.width(), image.height(), scale);
        log::debug!("det box num: {}", boxes.len());
        Ok(boxes)
    }
}

//! Resizing and tensor assembly for the three model stages.

use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::{s, Array4, Axis};
use tracing::instrument;

use crate::{
    config::{ImageShape, LimitType},
    util::subtract_mean_normalize,
};

pub(crate) const DET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub(crate) const DET_SCALE: [f32; 3] = [1.0 / 0.229, 1.0 / 0.224, 1.0 / 0.225];
pub(crate) const TEXT_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub(crate) const TEXT_SCALE: [f32; 3] = [2.0, 2.0, 2.0];

/// Detector input size and the ratios that map it back to the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub target_width: u32,
    pub target_height: u32,
    /// `target_height / source_height`
    pub ratio_h: f32,
    /// `target_width / source_width`
    pub ratio_w: f32,
}

fn round_to_32(side: f32) -> u32 {
    (((side / 32.0).round() * 32.0) as u32).max(32)
}

pub fn scale_for_detection(
    width: u32,
    height: u32,
    limit_type: LimitType,
    limit_side_len: u32,
) -> Scale {
    let (w, h) = (width as f32, height as f32);
    let limit = limit_side_len as f32;
    let ratio = match limit_type {
        LimitType::Min if w.min(h) < limit => limit / w.min(h),
        LimitType::Max if w.max(h) > limit => limit / w.max(h),
        _ => 1.0,
    };
    let target_width = round_to_32((w * ratio).trunc());
    let target_height = round_to_32((h * ratio).trunc());
    log::debug!(
        "Resize will change image dimensions from (w: {width}, h: {height}) \
         to (w: {target_width}, h: {target_height})."
    );
    Scale {
        target_width,
        target_height,
        ratio_h: target_height as f32 / h,
        ratio_w: target_width as f32 / w,
    }
}

#[instrument(level = "debug", skip(image))]
pub(crate) fn detection_tensor(image: &DynamicImage, scale: Scale) -> Array4<f32> {
    let resized = image
        .resize_exact(scale.target_width, scale.target_height, FilterType::Triangle)
        .to_rgb8();
    subtract_mean_normalize(&resized, &DET_MEAN, &DET_SCALE).insert_axis(Axis(0))
}

/// Width a crop gets when its height is scaled to `target_height`, capped at
/// `max_width`.
fn fit_width(image: &RgbImage, target_height: usize, max_width: usize) -> usize {
    let ratio = image.width() as f32 / image.height().max(1) as f32;
    ((target_height as f32 * ratio).ceil() as usize).clamp(1, max_width.max(1))
}

/// Classifier batch: each crop is resized to the model height, normalised,
/// and zero-padded on the right up to the model width.
#[instrument(level = "trace", skip(images))]
pub(crate) fn classifier_batch(images: &[&RgbImage], shape: ImageShape) -> Array4<f32> {
    let mut batch = Array4::<f32>::zeros((images.len(), 3, shape.height, shape.width));
    for (k, image) in images.iter().enumerate() {
        let resize_w = fit_width(image, shape.height, shape.width);
        let resized = image::imageops::resize(
            *image,
            resize_w as u32,
            shape.height as u32,
            FilterType::Triangle,
        );
        let tensor = subtract_mean_normalize(&resized, &TEXT_MEAN, &TEXT_SCALE);
        batch
            .slice_mut(s![k, .., .., 0..resize_w])
            .assign(&tensor);
    }
    batch
}

/// Recognizer batch: every crop shares a width derived from the widest
/// aspect ratio in the batch; narrower crops are black-padded before
/// normalisation.
#[instrument(level = "trace", skip(images))]
pub(crate) fn recognizer_batch(images: &[&RgbImage], shape: ImageShape) -> Array4<f32> {
    let base_ratio = shape.width as f32 / shape.height as f32;
    let max_wh_ratio = images
        .iter()
        .map(|image| image.width() as f32 / image.height().max(1) as f32)
        .fold(base_ratio, f32::max);
    let batch_width = ((shape.height as f32 * max_wh_ratio) as usize).max(1);

    let mut batch = Array4::<f32>::zeros((images.len(), 3, shape.height, batch_width));
    for (k, image) in images.iter().enumerate() {
        let resize_w = fit_width(image, shape.height, batch_width);
        let resized = image::imageops::resize(
            *image,
            resize_w as u32,
            shape.height as u32,
            FilterType::Triangle,
        );
        let mut canvas = RgbImage::new(batch_width as u32, shape.height as u32);
        image::imageops::replace(&mut canvas, &resized, 0, 0);
        batch
            .slice_mut(s![k, .., .., ..])
            .assign(&subtract_mean_normalize(&canvas, &TEXT_MEAN, &TEXT_SCALE));
    }
    batch
}

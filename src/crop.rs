use image::{imageops, DynamicImage, Rgb, RgbImage};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use tracing::instrument;

use crate::geometry::{distance, QuadBox};

/// Homography taking each `from[i]` to `to[i]`, or `None` for degenerate
/// (collinear) corner sets.
fn perspective_transform(from: [(f64, f64); 4], to: [(f64, f64); 4]) -> Option<Matrix3<f64>> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (i, ((x, y), (u, v))) in from.into_iter().zip(to).enumerate() {
        let (r0, r1) = (2 * i, 2 * i + 1);
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }
    let h = a.lu().solve(&b)?;
    Some(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
}

/// Bilinear sample with out-of-range coordinates clamped to the edge pixels.
fn sample_replicate(image: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let max_x = image.width() as i64 - 1;
    let max_y = image.height() as i64 - 1;
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let pixel = |px: i64, py: i64| {
        image
            .get_pixel(px.clamp(0, max_x) as u32, py.clamp(0, max_y) as u32)
            .0
    };
    let (x0, y0) = (x0 as i64, y0 as i64);
    let (p00, p10) = (pixel(x0, y0), pixel(x0 + 1, y0));
    let (p01, p11) = (pixel(x0, y0 + 1), pixel(x0 + 1, y0 + 1));
    Rgb(std::array::from_fn(|c| {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    }))
}

/// Cuts the quadrilateral out of `image` and warps it upright.
///
/// The crop is `|p0 p1|` wide and `|p0 p3|` tall (truncated). Crops at least
/// 1.5 times taller than wide are turned a quarter counter-clockwise so
/// vertical text reads horizontally.
#[instrument(level = "trace", skip(image))]
pub fn get_rotate_crop_image(image: &DynamicImage, quad: &QuadBox) -> DynamicImage {
    let [p0, p1, _, p3] = quad.points;
    let crop_w = (distance(p0, p1) as u32).max(1);
    let crop_h = (distance(p0, p3) as u32).max(1);

    let (left, top, right, bottom) = quad.bounds();
    let (left, top) = (left.max(0), top.max(0));
    let region_w = ((right - left).max(1) as u32)
        .min(image.width().saturating_sub(left as u32).max(1));
    let region_h = ((bottom - top).max(1) as u32)
        .min(image.height().saturating_sub(top as u32).max(1));
    let region = image.crop_imm(left as u32, top as u32, region_w, region_h).to_rgb8();

    let from = quad.points.map(|p| ((p.x - left) as f64, (p.y - top) as f64));
    let to = [
        (0.0, 0.0),
        (crop_w as f64, 0.0),
        (crop_w as f64, crop_h as f64),
        (0.0, crop_h as f64),
    ];

    // Map destination pixels back into the region.
    let warped = match perspective_transform(to, from) {
        Some(inverse) => RgbImage::from_fn(crop_w, crop_h, |x, y| {
            let src = inverse * Vector3::new(x as f64, y as f64, 1.0);
            if src.z.abs() < f64::EPSILON {
                return sample_replicate(&region, 0.0, 0.0);
            }
            sample_replicate(&region, src.x / src.z, src.y / src.z)
        }),
        None => imageops::resize(&region, crop_w, crop_h, imageops::FilterType::Triangle),
    };

    if warped.height() as f32 >= warped.width() as f32 * 1.5 {
        DynamicImage::ImageRgb8(imageops::rotate270(&warped))
    } else {
        DynamicImage::ImageRgb8(warped)
    }
}

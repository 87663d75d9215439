use std::cmp::Ordering;

use image::RgbImage;
use ndarray::{Array3, ArrayView1};
use tracing::instrument;

/// Converts an RGB image to a planar BGR tensor of shape `(3, h, w)`,
/// computing `(pixel / 255 - mean[c]) * scale[c]` per tensor channel.
#[instrument(level = "trace", skip(image))]
pub(crate) fn subtract_mean_normalize(
    image: &RgbImage,
    mean_vals: &[f32; 3],
    scale_vals: &[f32; 3],
) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array3::<f32>::zeros((3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        for ch in 0..3 {
            // tensor channel 0 is blue
            let value = pixel.0[2 - ch] as f32 / 255.0;
            tensor[[ch, y as usize, x as usize]] = (value - mean_vals[ch]) * scale_vals[ch];
        }
    }
    tensor
}

/// Index and value of the largest element. Ties resolve to the first index.
pub(crate) fn argmax(row: ArrayView1<f32>) -> Option<(usize, f32)> {
    row.iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, value)| match best {
            Some((_, max)) if value <= max => best,
            _ => Some((i, value)),
        })
}

/// A stable sort order over a slice, kept as indices so results computed on
/// the reordered view can be restored to the original positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    order: Vec<usize>,
}

impl Permutation {
    pub fn sort_by<T>(items: &[T], mut compare: impl FnMut(&T, &T) -> Ordering) -> Self {
        let mut order = (0..items.len()).collect::<Vec<_>>();
        order.sort_by(|&a, &b| compare(&items[a], &items[b]));
        Self { order }
    }

    /// Wraps an order produced elsewhere. `order` must hold each index in
    /// `0..order.len()` exactly once.
    pub(crate) fn from_order(order: Vec<usize>) -> Self {
        Self { order }
    }

    /// Original indices in sorted order.
    pub fn indices(&self) -> &[usize] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Items rearranged into sorted order.
    pub fn gather<T: Clone>(&self, items: &[T]) -> Vec<T> {
        self.order.iter().map(|&i| items[i].clone()).collect()
    }

    /// Inverse of [`gather`](Self::gather): `values[k]` was produced for the
    /// `k`-th sorted item and is moved back to that item's original index.
    pub fn scatter<T>(&self, values: Vec<T>) -> Vec<T> {
        let mut slots = (0..self.order.len()).map(|_| None).collect::<Vec<Option<T>>>();
        for (&original, value) in self.order.iter().zip(values) {
            slots[original] = Some(value);
        }
        slots.into_iter().flatten().collect()
    }
}

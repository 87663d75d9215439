//! Box clean-up and reading order.

use crate::{
    geometry::{Point, QuadBox},
    util::Permutation,
};

/// Boxes narrower or shorter than this many pixels are treated as noise.
const MIN_BOX_SIDE: i32 = 4;

/// Same-line tolerance used by [`sort_boxes`].
const LINE_TOLERANCE: i32 = 10;

/// Maps boxes from detector resolution back to source pixels and drops the
/// ones too small to hold text.
pub fn filter_tag_det_res(
    boxes: Vec<QuadBox>,
    ori_width: u32,
    ori_height: u32,
    ratio_w: f32,
    ratio_h: f32,
) -> Vec<QuadBox> {
    let max_x = ori_width as i32 - 1;
    let max_y = ori_height as i32 - 1;
    boxes
        .into_iter()
        .map(|quad| {
            let quad = quad.ordered();
            QuadBox::new(quad.points.map(|p| {
                Point::new(
                    ((p.x as f32 / ratio_w) as i32).clamp(0, max_x.max(0)),
                    ((p.y as f32 / ratio_h) as i32).clamp(0, max_y.max(0)),
                )
            }))
        })
        .filter(|quad| quad.width() > MIN_BOX_SIDE && quad.height() > MIN_BOX_SIDE)
        .collect()
}

/// Sorts boxes top to bottom by their top-left corner, then lets a single
/// adjacent pass pull boxes on the same line into left-to-right order.
pub fn sort_boxes(boxes: &[QuadBox]) -> Vec<QuadBox> {
    reading_order(boxes).gather(boxes)
}

/// The permutation [`sort_boxes`] applies.
pub fn reading_order(boxes: &[QuadBox]) -> Permutation {
    let primary = Permutation::sort_by(boxes, |a, b| {
        let (a, b) = (a.top_left(), b.top_left());
        a.y.cmp(&b.y).then(a.x.cmp(&b.x))
    });
    let mut order = primary.indices().to_vec();
    for i in 0..order.len().saturating_sub(1) {
        let current = boxes[order[i]].top_left();
        let next = boxes[order[i + 1]].top_left();
        if (next.y - current.y).abs() < LINE_TOLERANCE && next.x < current.x {
            order.swap(i, i + 1);
        }
    }
    Permutation::from_order(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: i32, y: i32, w: i32, h: i32) -> QuadBox {
        QuadBox::from_xy([(x, y), (x + w, y), (x + w, y + h), (x, y + h)])
    }

    #[test]
    fn drops_boxes_of_four_pixels_or_less() {
        let boxes = vec![rect(0, 0, 4, 20), rect(0, 0, 20, 4), rect(0, 0, 5, 5)];
        let kept = filter_tag_det_res(boxes, 100, 100, 1.0, 1.0);
        assert_eq!(kept, vec![rect(0, 0, 5, 5)]);
    }

    #[test]
    fn rescales_and_clamps_to_image() {
        let boxes = vec![QuadBox::from_xy([(-3, 10), (60, 10), (60, 40), (-3, 40)])];
        let kept = filter_tag_det_res(boxes, 100, 50, 0.5, 0.5);
        assert_eq!(
            kept,
            vec![QuadBox::from_xy([(0, 20), (99, 20), (99, 49), (0, 49)])]
        );
    }

    #[test]
    fn restores_clockwise_order() {
        let boxes = vec![QuadBox::from_xy([(30, 20), (30, 5), (5, 5), (5, 20)])];
        let kept = filter_tag_det_res(boxes, 100, 100, 1.0, 1.0);
        assert_eq!(kept, vec![rect(5, 5, 25, 15)]);
    }

    #[test]
    fn sorts_lines_left_to_right_despite_jitter() {
        let boxes = vec![
            rect(10, 50, 50, 20),
            rect(200, 14, 50, 20),
            rect(100, 48, 50, 20),
            rect(100, 10, 50, 20),
            rect(10, 12, 50, 20),
        ];
        let sorted = sort_boxes(&boxes);
        let corners = sorted.iter().map(|b| (b.top_left().x, b.top_left().y)).collect::<Vec<_>>();
        assert_eq!(corners, vec![(10, 12), (100, 10), (200, 14), (10, 50), (100, 48)]);
    }

    #[test]
    fn sorting_is_idempotent() {
        let boxes = vec![
            rect(300, 100, 40, 20),
            rect(10, 12, 50, 20),
            rect(100, 10, 50, 20),
            rect(5, 104, 50, 20),
            rect(200, 14, 50, 20),
        ];
        let once = sort_boxes(&boxes);
        assert_eq!(sort_boxes(&once), once);
    }

    #[test]
    fn reading_order_maps_back_to_inputs() {
        let boxes = vec![rect(0, 100, 10, 10), rect(0, 0, 10, 10)];
        let order = reading_order(&boxes);
        assert_eq!(order.indices(), &[1, 0]);
        assert_eq!(order.scatter(vec!["top", "bottom"]), vec!["bottom", "top"]);
    }

    #[test]
    fn empty_input() {
        assert!(sort_boxes(&[]).is_empty());
    }
}

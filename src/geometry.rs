use geo::{Coord, LineString, MinimumRotatedRect, MultiPoint, Polygon};
use geo_clipper::{Clipper, EndType, JoinType};
use serde::Serialize;

/// Integer pixel coordinate in the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A text region as four corners: top-left, top-right, bottom-right,
/// bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "[[i32; 2]; 4]")]
pub struct QuadBox {
    pub points: [Point; 4],
}

impl From<QuadBox> for [[i32; 2]; 4] {
    fn from(quad: QuadBox) -> Self {
        quad.points.map(|p| [p.x, p.y])
    }
}

impl QuadBox {
    pub fn new(points: [Point; 4]) -> Self {
        Self { points }
    }

    pub fn from_xy(points: [(i32, i32); 4]) -> Self {
        Self::new(points.map(|(x, y)| Point::new(x, y)))
    }

    pub fn top_left(&self) -> Point {
        self.points[0]
    }

    /// Edge length between corners 0 and 1, truncated to whole pixels.
    pub fn width(&self) -> i32 {
        distance(self.points[0], self.points[1]) as i32
    }

    /// Edge length between corners 0 and 3, truncated to whole pixels.
    pub fn height(&self) -> i32 {
        distance(self.points[0], self.points[3]) as i32
    }

    /// Axis-aligned bounds as `(left, top, right, bottom)`.
    pub fn bounds(&self) -> (i32, i32, i32, i32) {
        let xs = self.points.map(|p| p.x);
        let ys = self.points.map(|p| p.y);
        (
            xs.iter().copied().min().unwrap_or(0),
            ys.iter().copied().min().unwrap_or(0),
            xs.iter().copied().max().unwrap_or(0),
            ys.iter().copied().max().unwrap_or(0),
        )
    }

    /// Re-sorts the corners into clockwise order from the top-left.
    pub fn ordered(self) -> Self {
        Self::new(order_clockwise(self.points, |p| (p.x as f32, p.y as f32)))
    }
}

pub fn distance(a: Point, b: Point) -> f32 {
    let dx = (a.x - b.x) as f32;
    let dy = (a.y - b.y) as f32;
    dx.hypot(dy)
}

/// Orders four corners as top-left, top-right, bottom-right, bottom-left.
///
/// Corners are sorted by x; the two leftmost form the left edge and the two
/// rightmost the right edge, each ordered top to bottom.
pub fn order_clockwise<T: Copy>(mut points: [T; 4], xy: impl Fn(&T) -> (f32, f32)) -> [T; 4] {
    points.sort_by(|a, b| xy(a).0.total_cmp(&xy(b).0));
    let [mut l0, mut l1, mut r0, mut r1] = points;
    if xy(&l0).1 > xy(&l1).1 {
        std::mem::swap(&mut l0, &mut l1);
    }
    if xy(&r0).1 > xy(&r1).1 {
        std::mem::swap(&mut r0, &mut r1);
    }
    [l0, r0, r1, l1]
}

/// Shoelace area of a closed polygon given without the repeated endpoint.
pub fn polygon_area(points: &[Coord<f32>]) -> f32 {
    let n = points.len();
    let twice: f32 = (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            a.x * b.y - a.y * b.x
        })
        .sum();
    twice.abs() / 2.0
}

pub fn polygon_perimeter(points: &[Coord<f32>]) -> f32 {
    let n = points.len();
    (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            (a.x - b.x).hypot(a.y - b.y)
        })
        .sum()
}

/// Minimum-area rotated rectangle with its corners in clockwise order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MiniBox {
    pub points: [Coord<f32>; 4],
    pub width: f32,
    pub height: f32,
}

impl MiniBox {
    pub fn short_side(&self) -> f32 {
        self.width.min(self.height)
    }
}

pub fn min_area_box(coords: impl IntoIterator<Item = Coord<f32>>) -> Option<MiniBox> {
    let cloud: MultiPoint<f32> = coords.into_iter().collect::<Vec<_>>().into();
    if cloud.0.len() < 3 {
        return None;
    }
    let rect = cloud.minimum_rotated_rect()?;
    let corners = rect.exterior().0.get(..4)?;
    let raw: [Coord<f32>; 4] = [corners[0], corners[1], corners[2], corners[3]];
    let width = (raw[0].x - raw[1].x).hypot(raw[0].y - raw[1].y);
    let height = (raw[1].x - raw[2].x).hypot(raw[1].y - raw[2].y);
    if !width.is_finite() || !height.is_finite() {
        return None;
    }
    Some(MiniBox {
        points: order_clockwise(raw, |c| (c.x, c.y)),
        width,
        height,
    })
}

/// Inflates a box outward by `unclip_ratio * area / perimeter` with a rounded
/// offset, returning the minimum-area rectangle around the result.
pub fn unclip(corners: &[Coord<f32>; 4], unclip_ratio: f32) -> Option<MiniBox> {
    let perimeter = polygon_perimeter(corners);
    if perimeter <= 0.0 {
        return None;
    }
    let distance = polygon_area(corners) * unclip_ratio / perimeter;
    if distance <= 0.0 {
        return min_area_box(corners.iter().copied());
    }

    let polygon = Polygon::new(LineString::from(corners.to_vec()), vec![]);
    let inflated = polygon.offset(distance, JoinType::Round(0.25), EndType::ClosedPolygon, 1.0);
    let coords = inflated
        .0
        .iter()
        .flat_map(|poly| poly.exterior().0.iter().copied())
        .collect::<Vec<_>>();
    if coords.is_empty() {
        return None;
    }
    min_area_box(coords)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(x: f32, y: f32) -> Coord<f32> {
        Coord { x, y }
    }

    #[test]
    fn orders_rotated_corners_clockwise() {
        let quad = QuadBox::from_xy([(12, 40), (2, 12), (40, 2), (50, 30)]).ordered();
        assert_eq!(
            quad,
            QuadBox::from_xy([(2, 12), (40, 2), (50, 30), (12, 40)])
        );
    }

    #[test]
    fn quad_measurements() {
        let quad = QuadBox::from_xy([(0, 0), (30, 0), (30, 10), (0, 10)]);
        assert_eq!(quad.width(), 30);
        assert_eq!(quad.height(), 10);
        assert_eq!(quad.bounds(), (0, 0, 30, 10));
    }

    #[test]
    fn area_and_perimeter_of_rectangle() {
        let rect = [coord(0.0, 0.0), coord(4.0, 0.0), coord(4.0, 3.0), coord(0.0, 3.0)];
        assert_eq!(polygon_area(&rect), 12.0);
        assert_eq!(polygon_perimeter(&rect), 14.0);
    }

    #[test]
    fn min_area_box_of_axis_aligned_points() {
        let points = (0..=20)
            .flat_map(|x| [coord(x as f32 + 5.0, 10.0), coord(x as f32 + 5.0, 18.0)])
            .collect::<Vec<_>>();
        let mini = min_area_box(points).unwrap();
        let expected = [(5.0, 10.0), (25.0, 10.0), (25.0, 18.0), (5.0, 18.0)];
        for (corner, (x, y)) in mini.points.iter().zip(expected) {
            assert!((corner.x - x).abs() < 1e-3, "{corner:?}");
            assert!((corner.y - y).abs() < 1e-3, "{corner:?}");
        }
        assert!((mini.short_side() - 8.0).abs() < 1e-3);
    }

    #[test]
    fn min_area_box_needs_three_points() {
        assert!(min_area_box([coord(0.0, 0.0), coord(1.0, 1.0)]).is_none());
    }

    #[test]
    fn unclip_with_zero_ratio_is_identity() {
        let rect = [
            coord(10.0, 10.0),
            coord(50.0, 10.0),
            coord(50.0, 30.0),
            coord(10.0, 30.0),
        ];
        let mini = unclip(&rect, 0.0).unwrap();
        for (a, b) in mini.points.iter().zip(rect.iter()) {
            assert!((a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3);
        }
    }

    #[test]
    fn unclip_grows_the_box() {
        let rect = [
            coord(10.0, 10.0),
            coord(50.0, 10.0),
            coord(50.0, 30.0),
            coord(10.0, 30.0),
        ];
        // area 800, perimeter 120 -> offset of 10 px at ratio 1.5
        let mini = unclip(&rect, 1.5).unwrap();
        assert!((mini.width.max(mini.height) - 60.0).abs() <= 1.5, "{mini:?}");
        assert!((mini.short_side() - 40.0).abs() <= 1.5, "{mini:?}");
        assert!(mini.points[0].x < 10.0 && mini.points[0].y < 10.0);
    }

    #[test]
    fn serializes_as_coordinate_pairs() {
        let quad = QuadBox::from_xy([(1, 2), (3, 4), (5, 6), (7, 8)]);
        assert_eq!(
            serde_json::to_string(&quad).unwrap(),
            "[[1,2],[3,4],[5,6],[7,8]]"
        );
    }
}

//! Perspective rectification
//!
//! Warps a detected card outline into an upright rectangle.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use tracing::{debug, warn};

use super::detection::Detection;

/// Four card corners in top-left, top-right, bottom-right, bottom-left order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadrilateral {
    corners: [(f32, f32); 4],
}

impl Quadrilateral {
    /// Order four points as top-left, top-right, bottom-right, bottom-left.
    ///
    /// The top-left corner has the smallest `x + y` and the bottom-right the
    /// largest; the top-right corner has the smallest `y - x` and the
    /// bottom-left the largest. Ties are broken on the coordinates
    /// themselves, so the result never depends on input order. When the rule
    /// assigns one point to two corners (a square turned 45 degrees), the
    /// points are ordered clockwise around their centroid instead.
    pub fn ordered(points: [(f32, f32); 4]) -> Self {
        let sum = |p: &(f32, f32)| p.0 + p.1;
        let diff = |p: &(f32, f32)| p.1 - p.0;

        let top_left = pick(&points, |a, b| sum(a).total_cmp(&sum(b)).then(a.0.total_cmp(&b.0)));
        let bottom_right = pick(&points, |a, b| sum(b).total_cmp(&sum(a)).then(b.0.total_cmp(&a.0)));
        let top_right = pick(&points, |a, b| diff(a).total_cmp(&diff(b)).then(b.0.total_cmp(&a.0)));
        let bottom_left = pick(&points, |a, b| diff(b).total_cmp(&diff(a)).then(a.0.total_cmp(&b.0)));

        let indices = [top_left, top_right, bottom_right, bottom_left];
        let distinct = (0..4).all(|i| (i + 1..4).all(|j| indices[i] != indices[j]));

        if distinct {
            Self {
                corners: indices.map(|i| points[i]),
            }
        } else {
            Self::clockwise_from(points, top_left)
        }
    }

    fn clockwise_from(points: [(f32, f32); 4], start: usize) -> Self {
        let cx = points.iter().map(|p| p.0).sum::<f32>() / 4.0;
        let cy = points.iter().map(|p| p.1).sum::<f32>() / 4.0;
        let angle = |p: &(f32, f32)| (p.1 - cy).atan2(p.0 - cx);

        // With y pointing down, increasing angle runs clockwise on screen
        let mut order = [0usize, 1, 2, 3];
        order.sort_by(|&a, &b| {
            angle(&points[a])
                .total_cmp(&angle(&points[b]))
                .then(points[a].0.total_cmp(&points[b].0))
                .then(points[a].1.total_cmp(&points[b].1))
        });
        let offset = order.iter().position(|&i| i == start).unwrap_or(0);
        order.rotate_left(offset);

        Self {
            corners: order.map(|i| points[i]),
        }
    }

    /// Corners as (top-left, top-right, bottom-right, bottom-left)
    pub fn corners(&self) -> [(f32, f32); 4] {
        self.corners
    }

    pub fn top_left(&self) -> (f32, f32) {
        self.corners[0]
    }

    pub fn top_right(&self) -> (f32, f32) {
        self.corners[1]
    }

    pub fn bottom_right(&self) -> (f32, f32) {
        self.corners[2]
    }

    pub fn bottom_left(&self) -> (f32, f32) {
        self.corners[3]
    }

    /// Multiply every coordinate by `factor` and re-order
    pub fn scaled(&self, factor: f32) -> Self {
        Self::ordered(self.corners.map(|(x, y)| (x * factor, y * factor)))
    }

    /// Output size that keeps the longer of each pair of opposite edges
    pub fn output_size(&self) -> (u32, u32) {
        let (tl, tr, br, bl) = (self.top_left(), self.top_right(), self.bottom_right(), self.bottom_left());
        let width = distance(br, bl).max(distance(tr, tl));
        let height = distance(tr, br).max(distance(tl, bl));
        ((width as u32).max(1), (height as u32).max(1))
    }
}

/// Index of the smallest point under `cmp`
fn pick<F>(points: &[(f32, f32); 4], cmp: F) -> usize
where
    F: Fn(&(f32, f32), &(f32, f32)) -> std::cmp::Ordering,
{
    (0..4)
        .min_by(|&a, &b| cmp(&points[a], &points[b]))
        .unwrap_or(0)
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Rectify a photo using a detection from the working-resolution image.
///
/// Without a detection the original photo is returned unchanged.
pub fn rectify(image: &RgbImage, detection: Option<&Detection>) -> RgbImage {
    let Some(detection) = detection else {
        debug!("No card outline, using the full photo");
        return image.clone();
    };

    let quad = detection.quad.scaled(detection.scale);
    match warp_quadrilateral(image, &quad) {
        Some(warped) => warped,
        None => {
            warn!("Degenerate card outline {:?}, using the full photo", quad.corners());
            image.clone()
        }
    }
}

/// Warp the area inside `quad` onto an upright rectangle
pub fn warp_quadrilateral(image: &RgbImage, quad: &Quadrilateral) -> Option<RgbImage> {
    let (width, height) = quad.output_size();
    if width < 2 || height < 2 {
        return None;
    }

    let w = (width - 1) as f32;
    let h = (height - 1) as f32;
    let dest = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
    let projection = Projection::from_control_points(quad.corners(), dest)?;

    let mut output = RgbImage::new(width, height);
    warp_into(image, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut output);

    debug!("Rectified card to {}x{}", width, height);
    Some(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::detection::Detection;

    const TILTED: [(f32, f32); 4] = [(120.0, 40.0), (410.0, 75.0), (380.0, 520.0), (90.0, 480.0)];

    fn permutations(points: [(f32, f32); 4]) -> Vec<[(f32, f32); 4]> {
        let mut result = Vec::new();
        for a in 0..4 {
            for b in 0..4 {
                for c in 0..4 {
                    for d in 0..4 {
                        let idx = [a, b, c, d];
                        let distinct = (0..4).all(|i| (i + 1..4).all(|j| idx[i] != idx[j]));
                        if distinct {
                            result.push(idx.map(|i| points[i]));
                        }
                    }
                }
            }
        }
        result
    }

    #[test]
    fn test_order_points_canonical() {
        let quad = Quadrilateral::ordered([TILTED[2], TILTED[0], TILTED[3], TILTED[1]]);
        assert_eq!(quad.top_left(), (120.0, 40.0));
        assert_eq!(quad.top_right(), (410.0, 75.0));
        assert_eq!(quad.bottom_right(), (380.0, 520.0));
        assert_eq!(quad.bottom_left(), (90.0, 480.0));
    }

    #[test]
    fn test_order_points_independent_of_input_order() {
        let shapes = [
            TILTED,
            [(0.0, 0.0), (100.0, 0.0), (100.0, 140.0), (0.0, 140.0)],
            // Rotated a few degrees the other way
            [(30.0, 12.0), (250.0, 0.0), (268.0, 300.0), (45.0, 315.0)],
            // Square turned 45 degrees, where the sum/difference rule collides
            [(50.0, 0.0), (100.0, 50.0), (50.0, 100.0), (0.0, 50.0)],
        ];

        for shape in shapes {
            let expected = Quadrilateral::ordered(shape);
            for perm in permutations(shape) {
                assert_eq!(Quadrilateral::ordered(perm), expected, "shape {:?}", shape);
            }
        }
    }

    #[test]
    fn test_order_points_idempotent() {
        let once = Quadrilateral::ordered(TILTED);
        let twice = Quadrilateral::ordered(once.corners());
        assert_eq!(once, twice);

        let diamond = Quadrilateral::ordered([(50.0, 0.0), (100.0, 50.0), (50.0, 100.0), (0.0, 50.0)]);
        assert_eq!(Quadrilateral::ordered(diamond.corners()), diamond);
    }

    #[test]
    fn test_diamond_corners_are_distinct() {
        let quad = Quadrilateral::ordered([(50.0, 0.0), (100.0, 50.0), (50.0, 100.0), (0.0, 50.0)]);
        let corners = quad.corners();
        for i in 0..4 {
            for j in i + 1..4 {
                assert_ne!(corners[i], corners[j]);
            }
        }
    }

    #[test]
    fn test_output_size_uses_longer_edges() {
        let quad = Quadrilateral::ordered([(0.0, 0.0), (100.0, 0.0), (110.0, 150.0), (-5.0, 140.0)]);
        let (w, h) = quad.output_size();
        // Bottom edge is ~115.4 long, top edge 100
        assert_eq!(w, 115);
        // Right edge is ~150.3, left edge ~140.1
        assert_eq!(h, 150);
    }

    #[test]
    fn test_scaled_multiplies_coordinates() {
        let quad = Quadrilateral::ordered(TILTED).scaled(2.0);
        assert_eq!(quad.top_left(), (240.0, 80.0));
        assert_eq!(quad.bottom_left(), (180.0, 960.0));
    }

    #[test]
    fn test_rectify_without_detection_returns_original() {
        let image = RgbImage::from_fn(20, 30, |x, y| Rgb([x as u8, y as u8, 7]));
        let rectified = rectify(&image, None);
        assert_eq!(rectified, image);
    }

    #[test]
    fn test_rectify_axis_aligned_region() {
        // Left half dark, right half bright
        let image = RgbImage::from_fn(200, 300, |x, _| {
            if x < 100 { Rgb([20, 20, 20]) } else { Rgb([230, 230, 230]) }
        });
        let detection = Detection {
            quad: Quadrilateral::ordered([(20.0, 30.0), (180.0, 30.0), (180.0, 270.0), (20.0, 270.0)]),
            scale: 1.0,
        };

        let rectified = rectify(&image, Some(&detection));
        assert_eq!(rectified.dimensions(), (160, 240));
        assert_eq!(rectified.get_pixel(10, 120)[0], 20);
        assert_eq!(rectified.get_pixel(150, 120)[0], 230);
    }

    #[test]
    fn test_rectify_applies_detection_scale() {
        let image = RgbImage::from_pixel(400, 600, Rgb([90, 90, 90]));
        let detection = Detection {
            quad: Quadrilateral::ordered([(10.0, 10.0), (110.0, 10.0), (110.0, 160.0), (10.0, 160.0)]),
            scale: 2.0,
        };

        let rectified = rectify(&image, Some(&detection));
        assert_eq!(rectified.dimensions(), (200, 300));
    }

    #[test]
    fn test_warp_rejects_collapsed_outline() {
        let image = RgbImage::new(50, 50);
        let quad = Quadrilateral::ordered([(5.0, 5.0), (5.5, 5.0), (5.5, 5.5), (5.0, 5.5)]);
        assert!(warp_quadrilateral(&image, &quad).is_none());
    }
}

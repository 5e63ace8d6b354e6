//! Card outline detection
//!
//! Finds the card's four-cornered outline in a photo. Edges are detected on a
//! fixed-height copy of the photo so the thresholds behave the same for any
//! camera resolution; the scale back to the original is kept alongside the
//! outline.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;
use std::time::Instant;
use tracing::{debug, info};

use super::rectify::Quadrilateral;
use crate::config::DetectionSettings;

/// A card outline found in the working-resolution image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Outline in working-image coordinates
    pub quad: Quadrilateral,
    /// Original height divided by working height
    pub scale: f32,
}

/// Detects the card outline in a photo
#[derive(Debug, Clone)]
pub struct CardDetector {
    settings: DetectionSettings,
}

impl CardDetector {
    /// Create a detector with default settings
    pub fn new() -> Self {
        Self::with_settings(DetectionSettings::default())
    }

    /// Create a detector with custom settings
    pub fn with_settings(settings: DetectionSettings) -> Self {
        Self { settings }
    }

    /// Find the card outline, or `None` when no four-cornered contour stands out
    pub fn detect(&self, image: &RgbImage) -> Option<Detection> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        let start = Instant::now();

        let working_height = self.settings.working_height.max(1);
        let scale = height as f32 / working_height as f32;
        let working_width = ((width as f32 / scale).round() as u32).max(1);

        let gray = imageops::grayscale(image);
        let small = imageops::resize(&gray, working_width, working_height, FilterType::Triangle);
        let blurred = if self.settings.blur_sigma > 0.0 {
            gaussian_blur_f32(&small, self.settings.blur_sigma)
        } else {
            small
        };
        let edges = canny(&blurred, self.settings.canny_low, self.settings.canny_high);

        let quad = find_card_outline(
            &edges,
            self.settings.max_candidates,
            self.settings.epsilon_ratio,
        );

        match quad {
            Some(quad) => {
                info!(
                    "Card outline found in {:?}: {:?} (scale {:.3})",
                    start.elapsed(),
                    quad.corners(),
                    scale
                );
                Some(Detection { quad, scale })
            }
            None => {
                info!("Card edges not found in {:?}", start.elapsed());
                None
            }
        }
    }
}

impl Default for CardDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Search the largest outer contours of an edge map for one that simplifies
/// to exactly four vertices
pub fn find_card_outline(
    edges: &GrayImage,
    max_candidates: usize,
    epsilon_ratio: f64,
) -> Option<Quadrilateral> {
    let mut candidates: Vec<(f64, Contour<i32>)> = find_contours::<i32>(edges)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.points.len() >= 4)
        .map(|c| (polygon_area(&c.points), c))
        .collect();

    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
    debug!("{} outer contours in edge map", candidates.len());

    for (area, contour) in candidates.iter().take(max_candidates) {
        let perimeter = arc_length(&contour.points, true);
        let epsilon = epsilon_ratio * perimeter;
        if epsilon <= 0.0 {
            continue;
        }

        let approx = simplify_closed(&contour.points, epsilon);
        debug!(
            "Contour area {:.0}, perimeter {:.0} -> {} vertices",
            area,
            perimeter,
            approx.len()
        );

        if approx.len() == 4 {
            let points = [0, 1, 2, 3].map(|i| (approx[i].x as f32, approx[i].y as f32));
            return Some(Quadrilateral::ordered(points));
        }
    }

    None
}

/// Douglas-Peucker simplification of a closed contour.
///
/// The contour is split at its first point and the point farthest from it,
/// each half is simplified as an open curve, and the first point is dropped
/// again if it turns out to lie on a straight edge.
pub fn simplify_closed(points: &[Point<i32>], epsilon: f64) -> Vec<Point<i32>> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let origin = points[0];
    let far = (1..points.len())
        .max_by_key(|&i| {
            let dx = (points[i].x - origin.x) as i64;
            let dy = (points[i].y - origin.y) as i64;
            dx * dx + dy * dy
        })
        .unwrap_or(1);

    let first_half = approximate_polygon_dp(&points[..=far], epsilon, false);
    let mut second: Vec<Point<i32>> = points[far..].to_vec();
    second.push(origin);
    let second_half = approximate_polygon_dp(&second, epsilon, false);

    // Both halves carry the split points at their ends
    let mut simplified: Vec<Point<i32>> = first_half;
    simplified.pop();
    simplified.extend_from_slice(&second_half[..second_half.len().saturating_sub(1)]);

    if simplified.len() > 3 {
        let prev = simplified[simplified.len() - 1];
        let next = simplified[1];
        if perpendicular_distance(prev, next, origin) <= epsilon {
            simplified.remove(0);
        }
    }

    simplified
}

fn perpendicular_distance(a: Point<i32>, b: Point<i32>, p: Point<i32>) -> f64 {
    let (ax, ay) = (a.x as f64, a.y as f64);
    let (bx, by) = (b.x as f64, b.y as f64);
    let (px, py) = (p.x as f64, p.y as f64);

    let length = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt();
    if length == 0.0 {
        return ((px - ax).powi(2) + (py - ay).powi(2)).sqrt();
    }
    ((by - ay) * px - (bx - ax) * py + bx * ay - by * ax).abs() / length
}

/// Area enclosed by a closed polygon (shoelace formula)
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }

    let twice_area: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();

    (twice_area as f64 / 2.0).abs()
}

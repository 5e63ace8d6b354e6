//! Card text regions
//!
//! Crops the name and number bands out of a rectified card and enhances them
//! for OCR. Each band has its own recipe: the name band is binarized for a
//! clean black-on-white block, while the number band, which sits on a glossy
//! strip, gets local histogram equalization first.

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::sharpen_gaussian;
use std::fmt;
use tracing::debug;

/// Fractional bounding box of a text band on a rectified card
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionSpec {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

/// Card name band along the top edge
pub const NAME_REGION: RegionSpec = RegionSpec {
    top: 0.0,
    bottom: 0.2,
    left: 0.1,
    right: 0.9,
};

/// Collector number band in the bottom-right corner
pub const NUMBER_REGION: RegionSpec = RegionSpec {
    top: 0.92,
    bottom: 0.975,
    left: 0.70,
    right: 0.96,
};

/// Upscale factor for the name band
pub const NAME_UPSCALE: f32 = 2.0;
/// Upscale factor for the number band
pub const NUMBER_UPSCALE: f32 = 2.5;
/// Blur sigma of the unsharp mask
pub const UNSHARP_SIGMA: f32 = 3.0;
/// CLAHE clip limit for the number band
pub const CLAHE_CLIP_LIMIT: f32 = 3.0;
/// CLAHE tile grid (per axis) for the number band
pub const CLAHE_TILES: u32 = 4;

impl RegionSpec {
    /// Pixel bounds as (x, y, width, height), clamped to the image and never
    /// empty for a non-empty image
    pub fn pixel_bounds(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let (x0, x1) = span(self.left, self.right, width);
        let (y0, y1) = span(self.top, self.bottom, height);
        (x0, y0, x1 - x0, y1 - y0)
    }
}

fn span(start: f32, end: f32, extent: u32) -> (u32, u32) {
    if extent == 0 {
        return (0, 0);
    }
    let lo = ((start.max(0.0) * extent as f32) as u32).min(extent - 1);
    let hi = ((end.max(0.0) * extent as f32) as u32).clamp(lo + 1, extent);
    (lo, hi)
}

/// Semantic text field on a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Number,
}

impl Field {
    /// Where the field lives on a rectified card
    pub fn region(&self) -> RegionSpec {
        match self {
            Field::Name => NAME_REGION,
            Field::Number => NUMBER_REGION,
        }
    }

    /// File name used for the debug crop
    pub fn debug_file_name(&self) -> &'static str {
        match self {
            Field::Name => "debug_name_crop.png",
            Field::Number => "debug_number_crop.png",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Name => write!(f, "name"),
            Field::Number => write!(f, "number"),
        }
    }
}

/// Crop a field's band from a rectified card and enhance it for OCR
pub fn extract_region(card: &RgbImage, field: Field) -> GrayImage {
    let crop = crop_region(card, &field.region());
    let enhanced = match field {
        Field::Name => enhance_name(&crop),
        Field::Number => enhance_number(&crop),
    };
    debug!(
        "Extracted {} band {}x{} -> {}x{}",
        field,
        crop.width(),
        crop.height(),
        enhanced.width(),
        enhanced.height()
    );
    enhanced
}

/// Enhanced name band of a rectified card
pub fn extract_name_region(card: &RgbImage) -> GrayImage {
    extract_region(card, Field::Name)
}

/// Enhanced number band of a rectified card
pub fn extract_number_region(card: &RgbImage) -> GrayImage {
    extract_region(card, Field::Number)
}

/// Crop a fractional region
pub fn crop_region(card: &RgbImage, spec: &RegionSpec) -> RgbImage {
    let (x, y, w, h) = spec.pixel_bounds(card.width(), card.height());
    imageops::crop_imm(card, x, y, w, h).to_image()
}

/// Name band: 2x cubic upscale, grayscale, unsharp mask, Otsu binarization
pub fn enhance_name(crop: &RgbImage) -> GrayImage {
    let upscaled = upscale(crop, NAME_UPSCALE, FilterType::CatmullRom);
    let gray = imageops::grayscale(&upscaled);
    let sharpened = unsharp_mask(&gray, UNSHARP_SIGMA);
    binarize_otsu(&sharpened)
}

/// Number band: 2.5x linear upscale, grayscale, CLAHE, unsharp mask
pub fn enhance_number(crop: &RgbImage) -> GrayImage {
    let upscaled = upscale(crop, NUMBER_UPSCALE, FilterType::Triangle);
    let gray = imageops::grayscale(&upscaled);
    let equalized = clahe(&gray, CLAHE_CLIP_LIMIT, CLAHE_TILES);
    unsharp_mask(&equalized, UNSHARP_SIGMA)
}

fn upscale(image: &RgbImage, factor: f32, filter: FilterType) -> RgbImage {
    let width = ((image.width() as f32 * factor).round() as u32).max(1);
    let height = ((image.height() as f32 * factor).round() as u32).max(1);
    imageops::resize(image, width, height, filter)
}

/// Sharpen by subtracting a blurred copy: `1.5 * src - 0.5 * blur`
pub fn unsharp_mask(gray: &GrayImage, sigma: f32) -> GrayImage {
    if gray.width() == 0 || gray.height() == 0 || sigma <= 0.0 {
        return gray.clone();
    }

    sharpen_gaussian(gray, sigma, 0.5)
}

/// Global binarization at the Otsu level; pixels above the level become white
pub fn binarize_otsu(gray: &GrayImage) -> GrayImage {
    let level = otsu_level(gray);
    debug!("Otsu level {}", level);
    threshold(gray, level, ThresholdType::Binary)
}

/// Contrast limited adaptive histogram equalization.
///
/// The image is split into a `tiles x tiles` grid; each tile gets its own
/// equalization table with histogram bins clipped at
/// `clip_limit * tile_pixels / 256` and the excess spread over all bins.
/// Pixels are mapped by bilinear interpolation between the tables of the
/// four nearest tile centers.
pub fn clahe(gray: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let tiles_x = tiles.clamp(1, width);
    let tiles_y = tiles.clamp(1, height);
    let tile_w = width as f32 / tiles_x as f32;
    let tile_h = height as f32 / tiles_y as f32;

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * width / tiles_x;
            let x1 = (tx + 1) * width / tiles_x;
            let y0 = ty * height / tiles_y;
            let y1 = (ty + 1) * height / tiles_y;
            luts[(ty * tiles_x + tx) as usize] = tile_lut(gray, x0, x1, y0, y1, clip_limit);
        }
    }

    ImageBuffer::from_fn(width, height, |x, y| {
        let value = gray.get_pixel(x, y)[0] as usize;

        let gx = ((x as f32 + 0.5) / tile_w - 0.5).clamp(0.0, (tiles_x - 1) as f32);
        let gy = ((y as f32 + 0.5) / tile_h - 0.5).clamp(0.0, (tiles_y - 1) as f32);
        let tx0 = gx.floor() as u32;
        let ty0 = gy.floor() as u32;
        let tx1 = (tx0 + 1).min(tiles_x - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let fx = gx - tx0 as f32;
        let fy = gy - ty0 as f32;

        let lut = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][value] as f32;
        let top = lut(tx0, ty0) * (1.0 - fx) + lut(tx1, ty0) * fx;
        let bottom = lut(tx0, ty1) * (1.0 - fx) + lut(tx1, ty1) * fx;

        Luma([(top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_lut(gray: &GrayImage, x0: u32, x1: u32, y0: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut histogram = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            histogram[gray.get_pixel(x, y)[0] as usize] += 1;
        }
    }

    let pixels = (x1 - x0) * (y1 - y0);
    let mut lut = [0u8; 256];
    if pixels == 0 {
        for (i, entry) in lut.iter_mut().enumerate() {
            *entry = i as u8;
        }
        return lut;
    }

    let clip = ((clip_limit * pixels as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in histogram.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }

    let per_bin = excess / 256;
    let remainder = (excess % 256) as usize;
    for bin in histogram.iter_mut() {
        *bin += per_bin;
    }
    if remainder > 0 {
        let step = (256 / remainder).max(1);
        for bin in histogram.iter_mut().step_by(step).take(remainder) {
            *bin += 1;
        }
    }

    let scale = 255.0 / pixels as f32;
    let mut cumulative = 0u32;
    for (entry, &count) in lut.iter_mut().zip(histogram.iter()) {
        cumulative += count;
        *entry = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn value_range(image: &GrayImage) -> (u8, u8) {
        let min = image.pixels().map(|p| p[0]).min().unwrap();
        let max = image.pixels().map(|p| p[0]).max().unwrap();
        (min, max)
    }

    #[test]
    fn test_pixel_bounds_name_region() {
        assert_eq!(NAME_REGION.pixel_bounds(600, 840), (60, 0, 480, 168));
    }

    #[test]
    fn test_pixel_bounds_number_region() {
        // 0.92 * 840 = 772.8, 0.975 * 840 = 819, 0.70 * 600 = 420, 0.96 * 600 = 576
        assert_eq!(NUMBER_REGION.pixel_bounds(600, 840), (420, 772, 156, 47));
    }

    #[test]
    fn test_pixel_bounds_never_empty() {
        let (x, y, w, h) = NUMBER_REGION.pixel_bounds(3, 3);
        assert!(w >= 1 && h >= 1);
        assert!(x + w <= 3 && y + h <= 3);

        let spec = RegionSpec { top: 0.5, bottom: 0.5, left: 1.0, right: 1.2 };
        let (x, y, w, h) = spec.pixel_bounds(10, 10);
        assert_eq!((x, y, w, h), (9, 5, 1, 1));
    }

    #[test]
    fn test_field_regions() {
        assert_eq!(Field::Name.region(), NAME_REGION);
        assert_eq!(Field::Number.region(), NUMBER_REGION);
        assert_eq!(Field::Number.to_string(), "number");
    }

    #[test]
    fn test_name_band_is_upscaled_and_binary() {
        let card = RgbImage::from_fn(300, 420, |x, y| {
            if (x / 7 + y / 5) % 2 == 0 { Rgb([30, 30, 30]) } else { Rgb([220, 210, 200]) }
        });
        let band = extract_region(&card, Field::Name);

        // 240x84 crop doubled
        assert_eq!(band.dimensions(), (480, 168));
        assert!(band.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_number_band_is_upscaled() {
        let card = RgbImage::from_pixel(300, 420, Rgb([120, 130, 140]));
        let band = extract_region(&card, Field::Number);
        let (_, _, w, h) = NUMBER_REGION.pixel_bounds(300, 420);
        assert_eq!(
            band.dimensions(),
            ((w as f32 * 2.5).round() as u32, (h as f32 * 2.5).round() as u32)
        );
    }

    #[test]
    fn test_unsharp_mask_leaves_flat_image() {
        let flat = GrayImage::from_pixel(40, 30, Luma([90]));
        let sharpened = unsharp_mask(&flat, UNSHARP_SIGMA);
        assert!(sharpened.pixels().all(|p| (p[0] as i32 - 90).abs() <= 1));
    }

    #[test]
    fn test_unsharp_mask_boosts_edges() {
        let step = GrayImage::from_fn(40, 10, |x, _| if x < 20 { Luma([80]) } else { Luma([160]) });
        let sharpened = unsharp_mask(&step, UNSHARP_SIGMA);
        assert!(sharpened.get_pixel(19, 5)[0] < 80);
        assert!(sharpened.get_pixel(20, 5)[0] > 160);
    }

    #[test]
    fn test_otsu_splits_two_levels() {
        let image = GrayImage::from_fn(20, 20, |x, _| if x < 10 { Luma([40]) } else { Luma([200]) });
        let binary = binarize_otsu(&image);
        assert_eq!(binary.get_pixel(2, 2)[0], 0);
        assert_eq!(binary.get_pixel(15, 2)[0], 255);
    }

    #[test]
    fn test_otsu_output_is_binary() {
        let image = GrayImage::from_fn(32, 8, |x, y| Luma([(x * 7 + y * 3) as u8]));
        let binary = binarize_otsu(&image);
        assert!(binary.pixels().all(|p| p[0] == 0 || p[0] == 255));
        assert!(binary.pixels().any(|p| p[0] == 0));
        assert!(binary.pixels().any(|p| p[0] == 255));
    }

    #[test]
    fn test_clahe_stretches_low_contrast() {
        let image = GrayImage::from_fn(100, 40, |x, _| Luma([100 + (x % 21) as u8]));
        let (in_min, in_max) = value_range(&image);
        let equalized = clahe(&image, CLAHE_CLIP_LIMIT, CLAHE_TILES);
        let (out_min, out_max) = value_range(&equalized);

        assert_eq!(equalized.dimensions(), image.dimensions());
        assert!(out_max - out_min > in_max - in_min);
    }

    #[test]
    fn test_clahe_tiny_image() {
        let image = GrayImage::from_pixel(2, 1, Luma([50]));
        let equalized = clahe(&image, CLAHE_CLIP_LIMIT, CLAHE_TILES);
        assert_eq!(equalized.dimensions(), (2, 1));
    }
}

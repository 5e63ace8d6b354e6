//! Tensor preparation for the PaddleOCR models
//!
//! The region extractor hands over single-channel bands; the models expect
//! three-channel NCHW input normalized to [-1, 1].

use image::GrayImage;
use ndarray::{Array3, Array4};

/// Tensor layout settings for detection and recognition
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Longest side of the detection input
    pub det_target_size: u32,
    /// Height of the recognition input
    pub rec_target_height: u32,
    /// Widest recognition input
    pub rec_max_width: u32,
    /// Per-channel mean
    pub mean: [f32; 3],
    /// Per-channel std
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            // Bands are already upscaled, so a moderate side is enough
            det_target_size: 736,
            rec_target_height: 48,
            rec_max_width: 640,
            // (pixel / 255 - 0.5) / 0.5 maps [0, 255] onto [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

/// Replicate a grayscale band into three channels scaled to [0, 1]
pub fn gray_to_rgb_f32(gray: &GrayImage) -> Array3<f32> {
    let (width, height) = gray.dimensions();
    Array3::<f32>::from_shape_fn((height as usize, width as usize, 3), |(y, x, _)| {
        gray.get_pixel(x as u32, y as u32)[0] as f32 / 255.0
    })
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let mut normalized = image.clone();
    for ((_, _, c), value) in normalized.indexed_iter_mut() {
        *value = (*value - mean[c]) / std[c];
    }
    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    Array4::<f32>::from_shape_fn((1, c, h, w), |(_, ch, y, x)| image[[y, x, ch]])
}

/// Bilinear sample of an HWC image at fractional source coordinates
fn sample(image: &Array3<f32>, src_y: f32, src_x: f32, ch: usize) -> f32 {
    let (h, w, _) = image.dim();
    let y0 = src_y.floor() as usize;
    let x0 = src_x.floor() as usize;
    let y1 = (y0 + 1).min(h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let fy = src_y - y0 as f32;
    let fx = src_x - x0 as f32;

    let top = image[[y0, x0, ch]] * (1.0 - fx) + image[[y0, x1, ch]] * fx;
    let bottom = image[[y1, x0, ch]] * (1.0 - fx) + image[[y1, x1, ch]] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Resize so the longest side fits `target_size`, then zero-pad both sides
/// up to a multiple of 32. Returns the padded image and the scale applied.
pub fn resize_for_detection(image: &Array3<f32>, target_size: u32) -> (Array3<f32>, f32) {
    let (h, w, c) = image.dim();
    if h == 0 || w == 0 {
        return (Array3::<f32>::zeros((32, 32, c)), 1.0);
    }

    let scale = target_size as f32 / h.max(w) as f32;
    let new_h = ((h as f32 * scale) as usize).max(1);
    let new_w = ((w as f32 * scale) as usize).max(1);
    let padded_h = new_h.div_ceil(32) * 32;
    let padded_w = new_w.div_ceil(32) * 32;

    let mut resized = Array3::<f32>::zeros((padded_h, padded_w, c));
    for y in 0..new_h {
        let src_y = (y as f32 / scale).min((h - 1) as f32);
        for x in 0..new_w {
            let src_x = (x as f32 / scale).min((w - 1) as f32);
            for ch in 0..c {
                resized[[y, x, ch]] = sample(image, src_y, src_x, ch);
            }
        }
    }

    (resized, scale)
}

/// Resize to a fixed height, keeping aspect ratio up to `max_width`
pub fn resize_for_recognition(image: &Array3<f32>, target_height: u32, max_width: u32) -> Array3<f32> {
    let (h, w, c) = image.dim();
    let new_h = target_height.max(1) as usize;
    if h == 0 || w == 0 {
        return Array3::<f32>::zeros((new_h, 1, c));
    }

    let scale = new_h as f32 / h as f32;
    let new_w = ((w as f32 * scale) as u32).clamp(1, max_width.max(1)) as usize;
    let scale_x = new_w as f32 / w as f32;

    Array3::<f32>::from_shape_fn((new_h, new_w, c), |(y, x, ch)| {
        let src_y = (y as f32 / scale).min((h - 1) as f32);
        let src_x = (x as f32 / scale_x).min((w - 1) as f32);
        sample(image, src_y, src_x, ch)
    })
}

/// Crop an axis-aligned box `(x, y, width, height)`, clamped to the image
pub fn crop_box(image: &Array3<f32>, bounds: (u32, u32, u32, u32)) -> Array3<f32> {
    let (img_h, img_w, c) = image.dim();
    let x0 = (bounds.0 as usize).min(img_w);
    let y0 = (bounds.1 as usize).min(img_h);
    let x1 = (x0 + bounds.2 as usize).min(img_w);
    let y1 = (y0 + bounds.3 as usize).min(img_h);

    if x1 <= x0 || y1 <= y0 {
        return Array3::<f32>::zeros((1, 1, c));
    }

    image
        .slice(ndarray::s![y0..y1, x0..x1, ..])
        .to_owned()
}

/// Build the detection tensor for a band. Returns the tensor and the scale
/// from band pixels to tensor pixels.
pub fn preprocess_for_detection(image: &Array3<f32>, config: &PreprocessConfig) -> (Array4<f32>, f32) {
    let (resized, scale) = resize_for_detection(image, config.det_target_size);
    let normalized = normalize(&resized, &config.mean, &config.std);
    (hwc_to_nchw(&normalized), scale)
}

/// Build the recognition tensor for one text line
pub fn preprocess_for_recognition(line: &Array3<f32>, config: &PreprocessConfig) -> Array4<f32> {
    let resized = resize_for_recognition(line, config.rec_target_height, config.rec_max_width);
    let normalized = normalize(&resized, &config.mean, &config.std);
    hwc_to_nchw(&normalized)
}

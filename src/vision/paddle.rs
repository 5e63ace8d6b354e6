//! PaddleOCR scene-text engine
//!
//! Two ONNX models: a DBNet detector producing a text probability map and a
//! CRNN recognizer decoded with CTC. Every detected line becomes one
//! candidate, with the mean probability of its decoded characters as the
//! confidence.

use anyhow::{Context, Result};
use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::Array3;
use std::time::Instant;
use tracing::{debug, info};

use super::models::{ModelManager, ModelType, OnnxSession};
use super::ocr::{OcrCandidate, OcrEngineKind, TextRecognizer};
use super::preprocess::{
    crop_box, gray_to_rgb_f32, preprocess_for_detection, preprocess_for_recognition,
    PreprocessConfig,
};

/// Text box post-processing thresholds
#[derive(Debug, Clone)]
pub struct DbSettings {
    /// Probability above which a pixel counts as text
    pub threshold: f32,
    /// Minimum mean probability inside a box
    pub box_threshold: f32,
    /// Box expansion ratio
    pub unclip_ratio: f32,
    /// Smallest box side kept, in map pixels
    pub min_size: u32,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
            min_size: 3,
        }
    }
}

/// A text line found in the probability map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextBox {
    /// (x, y, width, height) in map pixels
    pub bounds: (u32, u32, u32, u32),
    /// Mean probability over the component
    pub score: f32,
}

/// Scene-text engine backed by PaddleOCR models
pub struct PaddleOcr {
    detector: OnnxSession,
    recognizer: OnnxSession,
    dictionary: Vec<String>,
    preprocess: PreprocessConfig,
    db: DbSettings,
}

impl PaddleOcr {
    /// Load (downloading if needed) the detection and recognition models
    pub fn new(manager: &ModelManager, intra_threads: usize) -> Result<Self> {
        if !manager.are_models_ready() {
            info!("Fetching PaddleOCR models into {:?}", manager.models_dir());
        }

        let det_path = manager.ensure_model(ModelType::Detection)?;
        let rec_path = manager.ensure_model(ModelType::Recognition)?;
        let dict_path = manager.ensure_model(ModelType::Dictionary)?;

        let dictionary = std::fs::read_to_string(&dict_path)
            .with_context(|| format!("Failed to read dictionary {:?}", dict_path))?;

        let engine = Self {
            detector: OnnxSession::new(&det_path, intra_threads)?,
            recognizer: OnnxSession::new(&rec_path, intra_threads)?,
            dictionary: load_dictionary(&dictionary),
            preprocess: PreprocessConfig::default(),
            db: DbSettings::default(),
        };

        info!(
            "PaddleOCR ready ({} dictionary entries)",
            engine.dictionary.len()
        );
        Ok(engine)
    }

    fn detect_lines(&mut self, band: &Array3<f32>) -> Result<Vec<TextBox>> {
        let (tensor, scale) = preprocess_for_detection(band, &self.preprocess);
        let (shape, data) = self.detector.run(&tensor)?;

        let (map_h, map_w) = match shape.as_slice() {
            [_, _, h, w] => (*h, *w),
            [_, h, w] => (*h, *w),
            other => anyhow::bail!("Unexpected detection output shape {:?}", other),
        };
        if data.len() < map_h * map_w {
            anyhow::bail!("Detection output is smaller than its shape {:?}", shape);
        }

        let boxes = boxes_from_probability_map(&data[..map_h * map_w], map_w, map_h, &self.db);
        let (band_h, band_w, _) = band.dim();

        Ok(boxes
            .into_iter()
            .filter_map(|b| rescale_box(b, scale, band_w as u32, band_h as u32))
            .collect())
    }

    fn recognize_line(&mut self, line: &Array3<f32>) -> Result<(String, f32)> {
        let tensor = preprocess_for_recognition(line, &self.preprocess);
        let (shape, data) = self.recognizer.run(&tensor)?;

        let (steps, classes) = match shape.as_slice() {
            [_, t, c] => (*t, *c),
            [t, c] => (*t, *c),
            other => anyhow::bail!("Unexpected recognition output shape {:?}", other),
        };
        if data.len() < steps * classes {
            anyhow::bail!("Recognition output is smaller than its shape {:?}", shape);
        }

        Ok(ctc_greedy_decode(&data[..steps * classes], steps, classes, &self.dictionary))
    }
}

impl TextRecognizer for PaddleOcr {
    fn engine(&self) -> OcrEngineKind {
        OcrEngineKind::PaddleOcr
    }

    fn recognize(&mut self, image: &GrayImage) -> Result<Vec<OcrCandidate>> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let band = gray_to_rgb_f32(image);
        let boxes = self.detect_lines(&band)?;

        let mut candidates = Vec::with_capacity(boxes.len());
        for text_box in sort_reading_order(boxes) {
            let line = crop_box(&band, text_box.bounds);
            let (text, confidence) = self.recognize_line(&line)?;
            let text = text.trim();
            if !text.is_empty() {
                candidates.push(OcrCandidate::new(text, Some(confidence), OcrEngineKind::PaddleOcr));
            }
        }

        debug!(
            "PaddleOCR read {} lines in {:?}",
            candidates.len(),
            start.elapsed()
        );
        Ok(candidates)
    }
}

/// Dictionary layout expected by the recognizer: CTC blank first, one entry
/// per line of the file, and a trailing space
pub fn load_dictionary(contents: &str) -> Vec<String> {
    let mut dictionary = vec![String::new()];
    dictionary.extend(
        contents
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(str::to_string),
    );
    dictionary.push(" ".to_string());
    dictionary
}

/// Extract text boxes from a row-major probability map.
///
/// Pixels above `threshold` are grouped into 8-connected components. A
/// component is kept when its mean probability reaches `box_threshold` and
/// its bounding box is at least `min_size` on both sides; kept boxes are
/// grown by `area * unclip_ratio / perimeter` on every side.
pub fn boxes_from_probability_map(
    probabilities: &[f32],
    width: usize,
    height: usize,
    settings: &DbSettings,
) -> Vec<TextBox> {
    if width == 0 || height == 0 || probabilities.len() < width * height {
        return Vec::new();
    }

    let mask = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        if probabilities[y as usize * width + x as usize] > settings.threshold {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

    #[derive(Clone, Copy)]
    struct Component {
        min_x: u32,
        min_y: u32,
        max_x: u32,
        max_y: u32,
        sum: f64,
        count: u32,
    }

    let mut components: Vec<Option<Component>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if components.len() <= label {
            components.resize(label + 1, None);
        }
        let p = probabilities[y as usize * width + x as usize];
        let c = components[label].get_or_insert(Component {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            sum: 0.0,
            count: 0,
        });
        c.min_x = c.min_x.min(x);
        c.min_y = c.min_y.min(y);
        c.max_x = c.max_x.max(x);
        c.max_y = c.max_y.max(y);
        c.sum += p as f64;
        c.count += 1;
    }

    components
        .into_iter()
        .flatten()
        .filter_map(|c| {
            let w = c.max_x - c.min_x + 1;
            let h = c.max_y - c.min_y + 1;
            let score = (c.sum / c.count as f64) as f32;
            if w < settings.min_size || h < settings.min_size || score < settings.box_threshold {
                return None;
            }

            let distance = (w * h) as f32 * settings.unclip_ratio / (2 * (w + h)) as f32;
            let grow = distance.round() as u32;
            let x0 = c.min_x.saturating_sub(grow);
            let y0 = c.min_y.saturating_sub(grow);
            let x1 = (c.max_x + 1 + grow).min(width as u32);
            let y1 = (c.max_y + 1 + grow).min(height as u32);

            Some(TextBox {
                bounds: (x0, y0, x1 - x0, y1 - y0),
                score,
            })
        })
        .collect()
}

/// Map a box from detection-tensor pixels back to band pixels
fn rescale_box(text_box: TextBox, scale: f32, band_w: u32, band_h: u32) -> Option<TextBox> {
    if scale <= 0.0 {
        return None;
    }
    let (x, y, w, h) = text_box.bounds;
    let x0 = ((x as f32 / scale) as u32).min(band_w);
    let y0 = ((y as f32 / scale) as u32).min(band_h);
    let x1 = (((x + w) as f32 / scale).ceil() as u32).min(band_w);
    let y1 = (((y + h) as f32 / scale).ceil() as u32).min(band_h);

    (x1 > x0 && y1 > y0).then_some(TextBox {
        bounds: (x0, y0, x1 - x0, y1 - y0),
        score: text_box.score,
    })
}

/// Top-to-bottom, then left-to-right within a line
pub fn sort_reading_order(mut boxes: Vec<TextBox>) -> Vec<TextBox> {
    const SAME_LINE: i64 = 10;

    boxes.sort_by_key(|b| (b.bounds.1, b.bounds.0));
    for i in 1..boxes.len() {
        let mut j = i;
        while j > 0 {
            let (prev, cur) = (boxes[j - 1].bounds, boxes[j].bounds);
            if (cur.1 as i64 - prev.1 as i64).abs() < SAME_LINE && cur.0 < prev.0 {
                boxes.swap(j - 1, j);
                j -= 1;
            } else {
                break;
            }
        }
    }
    boxes
}

/// Greedy CTC decoding of a row-major `[steps, classes]` probability matrix.
///
/// Repeated classes collapse and the blank (class 0) separates them.
/// Returns the text and the mean probability of the emitted characters.
pub fn ctc_greedy_decode(
    probabilities: &[f32],
    steps: usize,
    classes: usize,
    dictionary: &[String],
) -> (String, f32) {
    let mut text = String::new();
    let mut kept = Vec::new();
    let mut previous = 0usize;

    for step in probabilities.chunks(classes.max(1)).take(steps) {
        let (best, prob) = step
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f32::MIN), |acc, (i, p)| if p > acc.1 { (i, p) } else { acc });

        if best != 0 && best != previous {
            if let Some(ch) = dictionary.get(best) {
                text.push_str(ch);
                kept.push(prob);
            }
        }
        previous = best;
    }

    let confidence = if kept.is_empty() {
        0.0
    } else {
        kept.iter().sum::<f32>() / kept.len() as f32
    };
    (text, confidence)
}

//! Text recognition with engine fallback
//!
//! Engines share one capability, turning an enhanced band into candidate
//! strings. A [`RecognizerChain`] tries them in priority order and stops at
//! the first candidate a field extractor accepts.

use anyhow::Result;
use image::GrayImage;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Identity of the engine that produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrEngineKind {
    /// PaddleOCR detection + recognition via ONNX Runtime
    PaddleOcr,
    /// Tesseract command line
    Tesseract,
}

impl fmt::Display for OcrEngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OcrEngineKind::PaddleOcr => write!(f, "paddleocr"),
            OcrEngineKind::Tesseract => write!(f, "tesseract"),
        }
    }
}

/// One recognized string
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct OcrCandidate {
    pub text: String,
    /// Engine confidence in [0, 1]; `None` for engines that do not report one
    pub confidence: Option<f32>,
    pub engine: OcrEngineKind,
}

impl OcrCandidate {
    pub fn new(text: impl Into<String>, confidence: Option<f32>, engine: OcrEngineKind) -> Self {
        Self {
            text: text.into(),
            confidence,
            engine,
        }
    }

    /// Whether the candidate clears `min_confidence`. Candidates without a
    /// confidence cannot be judged and always pass.
    pub fn meets(&self, min_confidence: Option<f32>) -> bool {
        match (min_confidence, self.confidence) {
            (Some(min), Some(confidence)) => confidence >= min,
            _ => true,
        }
    }
}

/// An OCR engine
pub trait TextRecognizer: Send {
    fn engine(&self) -> OcrEngineKind;

    /// Recognize text in an enhanced band. Candidates come in reading order.
    fn recognize(&mut self, image: &GrayImage) -> Result<Vec<OcrCandidate>>;
}

/// An engine instance shared between chains; the lock serializes its calls
pub type SharedRecognizer = Arc<Mutex<dyn TextRecognizer>>;

pub fn shared<R: TextRecognizer + 'static>(recognizer: R) -> SharedRecognizer {
    Arc::new(Mutex::new(recognizer))
}

struct ChainStage {
    recognizer: SharedRecognizer,
    min_confidence: Option<f32>,
}

/// A candidate accepted by a field extractor
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Extracted field value
    pub value: String,
    /// Candidate it was extracted from
    pub candidate: OcrCandidate,
}

impl Resolved {
    /// Field value, logging which engine read it
    pub fn into_value(self, field: impl fmt::Display) -> String {
        debug!(
            "{} {:?} read by {} (confidence {:?})",
            field, self.value, self.candidate.engine, self.candidate.confidence
        );
        self.value
    }
}

/// Engines in priority order, each with its own confidence floor
#[derive(Default)]
pub struct RecognizerChain {
    stages: Vec<ChainStage>,
}

impl RecognizerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an engine
    pub fn then(mut self, recognizer: SharedRecognizer, min_confidence: Option<f32>) -> Self {
        self.stages.push(ChainStage {
            recognizer,
            min_confidence,
        });
        self
    }

    /// Engines in the order they are tried
    pub fn engines(&self) -> Vec<OcrEngineKind> {
        self.stages.iter().map(|s| s.recognizer.lock().engine()).collect()
    }

    /// Run engines in order until `extract` accepts a candidate.
    ///
    /// An engine error counts as an empty candidate set; `None` means no
    /// engine produced a usable value.
    pub fn resolve<F>(&self, image: &GrayImage, extract: F) -> Option<Resolved>
    where
        F: Fn(&str) -> Option<String>,
    {
        for stage in &self.stages {
            let start = Instant::now();
            let (engine, result) = {
                let mut recognizer = stage.recognizer.lock();
                (recognizer.engine(), recognizer.recognize(image))
            };

            let candidates = match result {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!("{} failed, trying next engine: {:#}", engine, e);
                    continue;
                }
            };

            debug!(
                "{} returned {} candidates in {:?}",
                engine,
                candidates.len(),
                start.elapsed()
            );

            for candidate in candidates {
                if !candidate.meets(stage.min_confidence) {
                    debug!(
                        "Discarding {:?} from {} (confidence {:?})",
                        candidate.text, engine, candidate.confidence
                    );
                    continue;
                }

                if let Some(value) = extract(&candidate.text) {
                    debug!("{} resolved {:?} from {:?}", engine, value, candidate.text);
                    return Some(Resolved { value, candidate });
                }
            }
        }

        None
    }
}

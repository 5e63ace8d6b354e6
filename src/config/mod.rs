//! Scanner Configuration
//!
//! Detection, OCR, catalog and debug settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::vision::tesseract::{PSM_SINGLE_BLOCK, PSM_SINGLE_LINE};

/// Scanner settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Card outline detection
    pub detection: DetectionSettings,
    /// OCR engines
    pub ocr: OcrSettings,
    /// Catalog lookup
    pub catalog: CatalogSettings,
    /// Debug artifacts
    pub debug: DebugSettings,
}

/// Card outline detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Height the photo is scaled to before edge detection
    pub working_height: u32,
    /// Gaussian blur sigma applied before edge detection
    pub blur_sigma: f32,
    /// Canny low threshold
    pub canny_low: f32,
    /// Canny high threshold
    pub canny_high: f32,
    /// Number of largest contours examined
    pub max_candidates: usize,
    /// Polygon approximation tolerance as a fraction of contour perimeter
    pub epsilon_ratio: f64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            working_height: 500,
            // Roughly a 5x5 kernel
            blur_sigma: 1.1,
            canny_low: 75.0,
            canny_high: 200.0,
            max_candidates: 5,
            epsilon_ratio: 0.02,
        }
    }
}

/// OCR engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Minimum confidence for scene-text candidates (0.0 - 1.0)
    pub min_confidence: f32,
    /// Use PaddleOCR as the first engine for the number field
    pub enable_paddle: bool,
    /// Override for the PaddleOCR model directory
    pub models_dir: Option<PathBuf>,
    /// Never download missing PaddleOCR models
    pub offline: bool,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
    /// Tesseract executable
    pub tesseract_cmd: String,
    /// Tesseract language
    pub language: String,
    /// Tesseract page segmentation mode for the name band (single block)
    pub name_psm: u8,
    /// Tesseract page segmentation mode for the number band (single line)
    pub number_psm: u8,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            enable_paddle: true,
            models_dir: None,
            offline: false,
            intra_threads: 4,
            tesseract_cmd: "tesseract".to_string(),
            language: "eng".to_string(),
            name_psm: PSM_SINGLE_BLOCK,
            number_psm: PSM_SINGLE_LINE,
        }
    }
}

/// Catalog lookup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// Card search endpoint
    pub endpoint: String,
    /// Optional API key sent as `X-Api-Key`
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.pokemontcg.io/v2/cards".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Debug artifact settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    /// Write the rectified card and enhanced crops to `output_dir`
    pub save_crops: bool,
    /// Directory for debug images
    pub output_dir: PathBuf,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            save_crops: false,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<ScannerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: ScannerConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &ScannerConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load an explicit config file, or the default one from the config
/// directory, or fall back to defaults
pub fn load_or_default(explicit: Option<&Path>) -> Result<ScannerConfig> {
    if let Some(path) = explicit {
        let config = load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_dir) = crate::storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            if let Ok(config) = load_config(&config_path) {
                info!("Loaded configuration from {:?}", config_path);
                return Ok(config);
            }
        }
    }

    info!("Using default configuration");
    Ok(ScannerConfig::default())
}

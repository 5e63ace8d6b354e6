//! Tesseract engine
//!
//! Runs the `tesseract` executable on a temporary PNG. Tesseract reports no
//! per-line confidence on stdout, so its single candidate is unscored.

use anyhow::{Context, Result};
use image::GrayImage;
use std::process::Command;
use tracing::debug;

use super::ocr::{OcrCandidate, OcrEngineKind, TextRecognizer};
use super::regions::Field;
use crate::config::OcrSettings;

/// Page segmentation mode for a uniform block of text
pub const PSM_SINGLE_BLOCK: u8 = 6;
/// Page segmentation mode for a single text line
pub const PSM_SINGLE_LINE: u8 = 7;

/// Classical OCR through the Tesseract command line
#[derive(Debug, Clone)]
pub struct Tesseract {
    command: String,
    language: String,
    psm: u8,
}

impl Tesseract {
    pub fn new(command: impl Into<String>, language: impl Into<String>, psm: u8) -> Self {
        Self {
            command: command.into(),
            language: language.into(),
            psm,
        }
    }

    /// Engine configured for one card field
    pub fn for_field(settings: &OcrSettings, field: Field) -> Self {
        let psm = match field {
            Field::Name => settings.name_psm,
            Field::Number => settings.number_psm,
        };
        Self::new(&settings.tesseract_cmd, &settings.language, psm)
    }

    /// Command-line arguments after the input path
    fn args(&self) -> Vec<String> {
        vec![
            "stdout".to_string(),
            "-l".to_string(),
            self.language.clone(),
            "--psm".to_string(),
            self.psm.to_string(),
        ]
    }

    /// Raw text Tesseract prints for an image
    pub fn read_text(&self, image: &GrayImage) -> Result<String> {
        let input = tempfile::Builder::new()
            .prefix("card-band-")
            .suffix(".png")
            .tempfile()
            .context("Failed to create temp file for OCR")?
            .into_temp_path();

        image
            .save(&input)
            .context("Failed to write temp image for OCR")?;

        let output = Command::new(&self.command)
            .arg(&*input)
            .args(self.args())
            .output()
            .with_context(|| format!("Failed to run {}", self.command))?;

        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TextRecognizer for Tesseract {
    fn engine(&self) -> OcrEngineKind {
        OcrEngineKind::Tesseract
    }

    fn recognize(&mut self, image: &GrayImage) -> Result<Vec<OcrCandidate>> {
        let text = self.read_text(image)?;
        debug!("tesseract --psm {} read {:?}", self.psm, text.trim());

        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![OcrCandidate::new(text, None, OcrEngineKind::Tesseract)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_modes() {
        let settings = OcrSettings::default();
        assert_eq!(Tesseract::for_field(&settings, Field::Name).psm, PSM_SINGLE_BLOCK);
        assert_eq!(Tesseract::for_field(&settings, Field::Number).psm, PSM_SINGLE_LINE);
    }

    #[test]
    fn test_args() {
        let engine = Tesseract::new("tesseract", "eng", 7);
        assert_eq!(engine.args(), vec!["stdout", "-l", "eng", "--psm", "7"]);
    }

    #[test]
    fn test_missing_executable_is_error() {
        let mut engine = Tesseract::new("/nonexistent/bin/tesseract", "eng", 6);
        let err = engine.recognize(&GrayImage::new(16, 16)).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/bin/tesseract"));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_executable_is_error() {
        let mut engine = Tesseract::new("false", "eng", 6);
        assert!(engine.recognize(&GrayImage::new(16, 16)).is_err());
    }
}

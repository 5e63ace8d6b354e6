//! Scan pipeline
//!
//! Detect → rectify → read the name and number bands → look the card up.
//! Engines and the catalog client are built once and reused for every photo.

use anyhow::Result;
use image::{GrayImage, RgbImage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::analysis::{extract_name, extract_number};
use crate::capture::CardPhoto;
use crate::catalog::{CardCatalog, CardQuery, CardRecord, PokemonTcgCatalog};
use crate::config::{DebugSettings, ScannerConfig};
use crate::error::ScanError;
use crate::vision::{
    extract_name_region, extract_number_region, rectify, shared, CardDetector, Field, ModelManager,
    PaddleOcr, RecognizerChain, Tesseract,
};

/// Field values read from a card; `None` means the field could not be read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedFields {
    pub name: Option<String>,
    /// Collector number without the set total
    pub number: Option<String>,
}

/// What happened on the catalog side of a scan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "card", rename_all = "snake_case")]
pub enum LookupOutcome {
    /// No name was read, so nothing was queried
    Skipped,
    /// Lookups are turned off
    Disabled,
    /// The catalog has no matching card
    NoMatch,
    Found(Box<CardRecord>),
}

/// Result of scanning one photo
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanOutcome {
    pub source: Option<PathBuf>,
    pub fields: ExtractedFields,
    /// Whether a card outline was found; otherwise the whole photo was read
    pub card_detected: bool,
    pub lookup: LookupOutcome,
}

/// Catalog query for a set of fields. A name is required; the number narrows
/// the query when present.
pub fn build_query(fields: &ExtractedFields) -> Option<CardQuery> {
    let name = fields.name.as_deref()?.trim();
    if name.is_empty() {
        return None;
    }
    Some(CardQuery::new(name, fields.number.clone()))
}

/// Runs the scan pipeline
pub struct CardScanner {
    detector: CardDetector,
    name_chain: RecognizerChain,
    number_chain: RecognizerChain,
    catalog: Option<Box<dyn CardCatalog>>,
    debug: DebugSettings,
}

impl CardScanner {
    /// Build detector, engines and catalog client from configuration.
    ///
    /// PaddleOCR is optional: when its models cannot be loaded the number
    /// band is read by Tesseract alone.
    pub fn new(config: &ScannerConfig) -> Result<Self> {
        let ocr = &config.ocr;

        let name_chain =
            RecognizerChain::new().then(shared(Tesseract::for_field(ocr, Field::Name)), None);

        let mut number_chain = RecognizerChain::new();
        if ocr.enable_paddle {
            match load_paddle(config) {
                Ok(paddle) => {
                    number_chain = number_chain.then(shared(paddle), Some(ocr.min_confidence));
                }
                Err(e) => warn!("PaddleOCR unavailable, reading numbers with Tesseract only: {:#}", e),
            }
        }
        let number_chain =
            number_chain.then(shared(Tesseract::for_field(ocr, Field::Number)), None);

        info!(
            "Engines: name {:?}, number {:?}",
            name_chain.engines(),
            number_chain.engines()
        );

        let catalog: Box<dyn CardCatalog> = Box::new(PokemonTcgCatalog::new(&config.catalog)?);

        Ok(Self::from_parts(
            CardDetector::with_settings(config.detection.clone()),
            name_chain,
            number_chain,
            Some(catalog),
        )
        .with_debug(config.debug.clone()))
    }

    /// Assemble a scanner from prebuilt parts
    pub fn from_parts(
        detector: CardDetector,
        name_chain: RecognizerChain,
        number_chain: RecognizerChain,
        catalog: Option<Box<dyn CardCatalog>>,
    ) -> Self {
        Self {
            detector,
            name_chain,
            number_chain,
            catalog,
            debug: DebugSettings::default(),
        }
    }

    pub fn with_debug(mut self, debug: DebugSettings) -> Self {
        self.debug = debug;
        self
    }

    /// Skip catalog lookups
    pub fn without_lookup(mut self) -> Self {
        self.catalog = None;
        self
    }

    /// Read the name and number from a photo
    #[allow(dead_code)]
    pub fn extract_fields(&self, photo: &CardPhoto) -> ExtractedFields {
        self.read_card(photo).0
    }

    fn read_card(&self, photo: &CardPhoto) -> (ExtractedFields, bool) {
        let start = Instant::now();

        let detection = self.detector.detect(&photo.image);
        let card = rectify(&photo.image, detection.as_ref());

        let name_band = extract_name_region(&card);
        let number_band = extract_number_region(&card);

        if self.debug.save_crops {
            self.save_debug_images(&card, &name_band, &number_band);
        }

        let name = self
            .name_chain
            .resolve(&name_band, extract_name)
            .map(|resolved| resolved.into_value(Field::Name));
        let number = self
            .number_chain
            .resolve(&number_band, extract_number)
            .map(|resolved| resolved.into_value(Field::Number));

        info!(
            "{}: name {:?}, number {:?} in {:?}",
            photo.label(),
            name,
            number,
            start.elapsed()
        );

        (ExtractedFields { name, number }, detection.is_some())
    }

    /// Read a photo and look the card up
    pub fn scan(&self, photo: &CardPhoto) -> Result<ScanOutcome, ScanError> {
        let (fields, card_detected) = self.read_card(photo);

        let lookup = match (&self.catalog, build_query(&fields)) {
            (None, _) => LookupOutcome::Disabled,
            (Some(_), None) => {
                debug!("No name read, skipping lookup");
                LookupOutcome::Skipped
            }
            (Some(catalog), Some(query)) => match catalog.find_card(&query)? {
                Some(record) => LookupOutcome::Found(Box::new(record)),
                None => LookupOutcome::NoMatch,
            },
        };

        Ok(ScanOutcome {
            source: photo.source.clone(),
            fields,
            card_detected,
            lookup,
        })
    }

    /// Decode a photo from disk and scan it
    pub fn scan_path(&self, path: &Path) -> Result<ScanOutcome, ScanError> {
        let photo = CardPhoto::open(path)?;
        self.scan(&photo)
    }

    fn save_debug_images(&self, card: &RgbImage, name_band: &GrayImage, number_band: &GrayImage) {
        let dir = &self.debug.output_dir;
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("Cannot create debug directory {:?}: {}", dir, e);
            return;
        }

        let results = [
            ("warped.png", card.save(dir.join("warped.png"))),
            (
                Field::Name.debug_file_name(),
                name_band.save(dir.join(Field::Name.debug_file_name())),
            ),
            (
                Field::Number.debug_file_name(),
                number_band.save(dir.join(Field::Number.debug_file_name())),
            ),
        ];
        for (file, result) in results {
            match result {
                Ok(()) => debug!("Wrote {:?}", dir.join(file)),
                Err(e) => warn!("Failed to write {:?}: {}", dir.join(file), e),
            }
        }
    }
}

fn load_paddle(config: &ScannerConfig) -> Result<PaddleOcr> {
    let mut manager = match &config.ocr.models_dir {
        Some(dir) => ModelManager::with_dir(dir.clone())?,
        None => ModelManager::new()?,
    };
    if config.ocr.offline {
        manager.set_offline(true);
    }
    PaddleOcr::new(&manager, config.ocr.intra_threads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CardSet;
    use crate::vision::ocr::{OcrCandidate, OcrEngineKind, TextRecognizer};
    use image::Rgb;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct FixedText {
        kind: OcrEngineKind,
        text: &'static str,
        confidence: Option<f32>,
    }

    impl TextRecognizer for FixedText {
        fn engine(&self) -> OcrEngineKind {
            self.kind
        }

        fn recognize(&mut self, _image: &GrayImage) -> Result<Vec<OcrCandidate>> {
            if self.text.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![OcrCandidate::new(self.text, self.confidence, self.kind)])
        }
    }

    struct Failing;

    impl TextRecognizer for Failing {
        fn engine(&self) -> OcrEngineKind {
            OcrEngineKind::PaddleOcr
        }

        fn recognize(&mut self, _image: &GrayImage) -> Result<Vec<OcrCandidate>> {
            anyhow::bail!("engine crashed")
        }
    }

    #[derive(Clone, Default)]
    struct RecordingCatalog {
        queries: Arc<Mutex<Vec<CardQuery>>>,
        fail: bool,
        empty: bool,
    }

    impl CardCatalog for RecordingCatalog {
        fn find_card(&self, query: &CardQuery) -> Result<Option<CardRecord>, ScanError> {
            self.queries.lock().push(query.clone());
            if self.fail {
                return Err(ScanError::CatalogStatus { status: 503 });
            }
            if self.empty {
                return Ok(None);
            }
            Ok(Some(CardRecord {
                name: query.name.clone(),
                set: CardSet {
                    name: "Base".to_string(),
                },
                rarity: Some("Common".to_string()),
                tcgplayer: None,
            }))
        }
    }

    fn tesseract_says(text: &'static str) -> RecognizerChain {
        RecognizerChain::new().then(
            shared(FixedText {
                kind: OcrEngineKind::Tesseract,
                text,
                confidence: None,
            }),
            None,
        )
    }

    fn scanner(name: &'static str, number: &'static str, catalog: &RecordingCatalog) -> CardScanner {
        CardScanner::from_parts(
            CardDetector::new(),
            tesseract_says(name),
            tesseract_says(number),
            Some(Box::new(catalog.clone())),
        )
    }

    fn blank_photo() -> CardPhoto {
        CardPhoto::from_dynamic(image::DynamicImage::ImageRgb8(RgbImage::from_pixel(
            300,
            420,
            Rgb([128, 128, 128]),
        )))
    }

    #[test]
    fn test_build_query() {
        let both = ExtractedFields {
            name: Some("Pikachu".into()),
            number: Some("25".into()),
        };
        assert_eq!(
            build_query(&both),
            Some(CardQuery::new("Pikachu", Some("25".to_string())))
        );

        let name_only = ExtractedFields {
            name: Some("Pikachu".into()),
            number: None,
        };
        assert_eq!(build_query(&name_only), Some(CardQuery::new("Pikachu", None)));

        let number_only = ExtractedFields {
            name: None,
            number: Some("25".into()),
        };
        assert_eq!(build_query(&number_only), None);
        assert_eq!(
            build_query(&ExtractedFields {
                name: Some("  ".into()),
                number: None
            }),
            None
        );
    }

    #[test]
    fn test_blank_photo_uses_whole_image() {
        let catalog = RecordingCatalog::default();
        let outcome = scanner("Pikachu\nBASIC", "Il2/l02", &catalog)
            .scan(&blank_photo())
            .unwrap();

        assert!(!outcome.card_detected);
        assert_eq!(outcome.fields.name.as_deref(), Some("Pikachu"));
        assert_eq!(outcome.fields.number.as_deref(), Some("112"));
    }

    #[test]
    fn test_joint_query_for_name_and_number() {
        let catalog = RecordingCatalog::default();
        let outcome = scanner("Pikachu", "25/102", &catalog)
            .scan(&blank_photo())
            .unwrap();

        let queries = catalog.queries.lock().clone();
        assert_eq!(queries, vec![CardQuery::new("Pikachu", Some("25".to_string()))]);
        assert_eq!(queries[0].to_search_string(), r#"name:"Pikachu" number:"25""#);
        assert!(matches!(&outcome.lookup, LookupOutcome::Found(r) if r.name == "Pikachu"));
    }

    #[test]
    fn test_unread_name_skips_lookup() {
        let catalog = RecordingCatalog::default();
        let outcome = scanner("", "25/102", &catalog).scan(&blank_photo()).unwrap();

        assert_eq!(outcome.fields.name, None);
        assert_eq!(outcome.fields.number.as_deref(), Some("25"));
        assert_eq!(outcome.lookup, LookupOutcome::Skipped);
        assert!(catalog.queries.lock().is_empty());
    }

    #[test]
    fn test_no_match_is_distinct_from_unread() {
        let catalog = RecordingCatalog {
            empty: true,
            ..Default::default()
        };
        let outcome = scanner("Missingno", "", &catalog).scan(&blank_photo()).unwrap();

        assert_eq!(outcome.fields.number, None);
        assert_eq!(outcome.lookup, LookupOutcome::NoMatch);
        assert_eq!(
            catalog.queries.lock().clone(),
            vec![CardQuery::new("Missingno", None)]
        );
    }

    #[test]
    fn test_catalog_error_propagates() {
        let catalog = RecordingCatalog {
            fail: true,
            ..Default::default()
        };
        let err = scanner("Pikachu", "25/102", &catalog)
            .scan(&blank_photo())
            .unwrap_err();
        assert!(err.is_catalog_error());
    }

    #[test]
    fn test_lookup_disabled() {
        let catalog = RecordingCatalog::default();
        let outcome = scanner("Pikachu", "25/102", &catalog)
            .without_lookup()
            .scan(&blank_photo())
            .unwrap();
        assert_eq!(outcome.lookup, LookupOutcome::Disabled);
        assert!(catalog.queries.lock().is_empty());
    }

    #[test]
    fn test_number_falls_back_past_failing_and_low_confidence_engines() {
        let number_chain = RecognizerChain::new()
            .then(shared(Failing), Some(0.3))
            .then(
                shared(FixedText {
                    kind: OcrEngineKind::PaddleOcr,
                    text: "99/102",
                    confidence: Some(0.1),
                }),
                Some(0.3),
            )
            .then(
                shared(FixedText {
                    kind: OcrEngineKind::Tesseract,
                    text: "4/102",
                    confidence: None,
                }),
                None,
            );
        let scanner = CardScanner::from_parts(CardDetector::new(), tesseract_says("Bulbasaur"), number_chain, None);

        let fields = scanner.extract_fields(&blank_photo());
        assert_eq!(fields.number.as_deref(), Some("4"));
    }

    #[test]
    fn test_scan_path_decode_error() {
        let catalog = RecordingCatalog::default();
        let err = scanner("Pikachu", "25/102", &catalog)
            .scan_path(Path::new("/nonexistent/card.jpg"))
            .unwrap_err();
        assert!(matches!(err, ScanError::Decode { .. }));
        assert!(catalog.queries.lock().is_empty());
    }

    #[test]
    fn test_debug_images_written() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = scanner("Pikachu", "25/102", &RecordingCatalog::default()).with_debug(DebugSettings {
            save_crops: true,
            output_dir: dir.path().join("debug"),
        });
        scanner.extract_fields(&blank_photo());

        for file in ["warped.png", "debug_name_crop.png", "debug_number_crop.png"] {
            assert!(dir.path().join("debug").join(file).is_file(), "{file} missing");
        }
    }

    #[test]
    fn test_offline_without_models_reads_numbers_with_tesseract() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ScannerConfig::default();
        config.ocr.offline = true;
        config.ocr.models_dir = Some(dir.path().join("models"));

        let scanner = CardScanner::new(&config).unwrap();
        assert_eq!(scanner.number_chain.engines(), vec![OcrEngineKind::Tesseract]);
        assert_eq!(scanner.name_chain.engines(), vec![OcrEngineKind::Tesseract]);
    }

    #[test]
    fn test_outcome_serializes() {
        let outcome = ScanOutcome {
            source: None,
            fields: ExtractedFields {
                name: Some("Pikachu".into()),
                number: None,
            },
            card_detected: false,
            lookup: LookupOutcome::NoMatch,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["fields"]["name"], "Pikachu");
        assert_eq!(json["lookup"]["status"], "no_match");
    }
}

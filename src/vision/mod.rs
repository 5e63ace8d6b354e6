//! Vision Layer
//!
//! Everything between a decoded photo and raw OCR text:
//! - card outline detection and perspective rectification
//! - name/number band extraction and enhancement
//! - OCR engines (PaddleOCR via ONNX Runtime, Tesseract CLI) and their
//!   fallback chain

pub mod detection;
pub mod models;
pub mod ocr;
pub mod paddle;
pub mod preprocess;
pub mod rectify;
pub mod regions;
pub mod tesseract;

pub use detection::CardDetector;
pub use models::ModelManager;
pub use ocr::{shared, RecognizerChain};
pub use paddle::PaddleOcr;
pub use rectify::rectify;
pub use regions::{extract_name_region, extract_number_region, Field};
pub use tesseract::Tesseract;

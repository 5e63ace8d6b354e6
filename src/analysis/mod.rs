//! Text Analysis
//!
//! Turns raw OCR output into card field values.

pub mod fields;

pub use fields::{extract_name, extract_number};

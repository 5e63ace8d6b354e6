//! Messages passed between the batch worker and its caller

pub mod messages;

pub use messages::{BatchEntry, ScanStatus};

//! Status messages for batch scans

use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::scanner::{LookupOutcome, ScanOutcome};

/// One line of a batch summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchEntry {
    pub file: String,
    pub name: Option<String>,
    pub number: Option<String>,
    pub lookup: EntryLookup,
}

/// Catalog side of a batch entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "card", rename_all = "snake_case")]
pub enum EntryLookup {
    /// Name of the matched record
    Found(String),
    NoMatch,
    /// No name was read, so nothing was queried
    Skipped,
    Disabled,
}

impl From<&LookupOutcome> for EntryLookup {
    fn from(outcome: &LookupOutcome) -> Self {
        match outcome {
            LookupOutcome::Found(record) => EntryLookup::Found(record.name.clone()),
            LookupOutcome::NoMatch => EntryLookup::NoMatch,
            LookupOutcome::Skipped => EntryLookup::Skipped,
            LookupOutcome::Disabled => EntryLookup::Disabled,
        }
    }
}

impl fmt::Display for EntryLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryLookup::Found(name) => write!(f, "{}", name),
            EntryLookup::NoMatch => write!(f, "Not Found"),
            EntryLookup::Skipped => write!(f, "Not Looked Up (no name)"),
            EntryLookup::Disabled => write!(f, "Lookup Disabled"),
        }
    }
}

impl BatchEntry {
    pub fn from_outcome(path: &Path, outcome: &ScanOutcome) -> Self {
        Self {
            file: file_label(path),
            name: outcome.fields.name.clone(),
            number: outcome.fields.number.clone(),
            lookup: EntryLookup::from(&outcome.lookup),
        }
    }
}

impl fmt::Display for BatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} #{} => {}",
            self.file,
            self.name.as_deref().unwrap_or("Failed"),
            self.number.as_deref().unwrap_or("Failed"),
            self.lookup
        )
    }
}

/// Progress of a running batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanStatus {
    Started { total: usize },
    Scanned { entry: BatchEntry },
    Failed { file: String, error: String },
    Finished { scanned: usize, failed: usize },
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::Started { total } => write!(f, "Scanning {} cards...", total),
            ScanStatus::Scanned { entry } => write!(f, "{}", entry),
            ScanStatus::Failed { file, error } => write!(f, "{}: error: {}", file, error),
            ScanStatus::Finished { scanned, failed } => {
                write!(f, "Scan complete: {} scanned, {} failed", scanned, failed)
            }
        }
    }
}

/// File name for status lines
pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

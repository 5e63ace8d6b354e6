//! Application Coordinator
//!
//! Batch scanning on a background thread, and the text report for a single
//! scan.

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info};

use crate::scanner::{CardScanner, LookupOutcome, ScanOutcome};
use crate::shared::messages::file_label;
use crate::shared::{BatchEntry, ScanStatus};

/// A batch of photos scanned one after another on a worker thread
pub struct BatchScan {
    status: Receiver<ScanStatus>,
    handle: Option<JoinHandle<Vec<BatchEntry>>>,
}

impl BatchScan {
    /// Start scanning `files` in order. A failing file is reported and
    /// skipped; the batch always runs to the end.
    pub fn start(scanner: Arc<CardScanner>, files: Vec<PathBuf>) -> Self {
        let (tx, status) = unbounded();

        let handle = std::thread::spawn(move || {
            info!("Batch thread starting ({} files)", files.len());
            let entries = run_batch(&scanner, &files, &tx);
            info!("Batch thread exiting");
            entries
        });

        Self {
            status,
            handle: Some(handle),
        }
    }

    /// Status messages; the channel closes when the batch is done
    pub fn status(&self) -> &Receiver<ScanStatus> {
        &self.status
    }

    /// Wait for the batch and return the summary of every scanned file
    pub fn wait(mut self) -> Result<Vec<BatchEntry>> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow::anyhow!("Batch thread panicked")),
            None => Ok(Vec::new()),
        }
    }
}

impl Drop for BatchScan {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_batch(scanner: &CardScanner, files: &[PathBuf], tx: &Sender<ScanStatus>) -> Vec<BatchEntry> {
    // Send errors only mean nobody is listening any more
    let _ = tx.send(ScanStatus::Started { total: files.len() });

    let mut entries = Vec::with_capacity(files.len());
    let mut failed = 0;

    for path in files {
        match scanner.scan_path(path) {
            Ok(outcome) => {
                let entry = BatchEntry::from_outcome(path, &outcome);
                let _ = tx.send(ScanStatus::Scanned { entry: entry.clone() });
                entries.push(entry);
            }
            Err(e) => {
                error!("Scan of {:?} failed: {}", path, e);
                failed += 1;
                let _ = tx.send(ScanStatus::Failed {
                    file: file_label(path),
                    error: e.to_string(),
                });
            }
        }
    }

    let _ = tx.send(ScanStatus::Finished {
        scanned: entries.len(),
        failed,
    });
    entries
}

/// Human-readable report for one scan
pub fn format_report(outcome: &ScanOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[NAME]: {}", outcome.fields.name.as_deref().unwrap_or("Failed"));
    let _ = writeln!(out, "[NUMBER]: {}", outcome.fields.number.as_deref().unwrap_or("Failed"));

    match &outcome.lookup {
        LookupOutcome::Found(card) => {
            let _ = writeln!(out, "\nName: {}", card.name);
            let _ = writeln!(out, "Set: {}", card.set.name);
            let _ = writeln!(out, "Rarity: {}", card.rarity_or_unknown());

            let prices = card.prices();
            if prices.is_empty() {
                let _ = writeln!(out, "No price data available.");
            }
            for (variant, fields) in &prices {
                let _ = writeln!(out, "\nVariant: {}", variant);
                for (field, value) in fields {
                    match value {
                        Some(value) => {
                            let _ = writeln!(out, "  {}: ${:.2}", field, value);
                        }
                        None => {
                            let _ = writeln!(out, "  {}: -", field);
                        }
                    }
                }
            }
        }
        LookupOutcome::NoMatch => {
            let _ = writeln!(out, "No match found.");
        }
        LookupOutcome::Skipped => {
            let _ = writeln!(out, "Failed to extract card name.");
        }
        LookupOutcome::Disabled => {}
    }

    out
}

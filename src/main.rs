//! Card Scanner - reads a trading card from a photo and looks it up
//!
//! Finds the card in the photo, straightens it, reads its name and
//! collector number, and queries the card catalog with them.

mod analysis;
mod app;
mod capture;
mod catalog;
mod config;
mod error;
mod scanner;
mod shared;
mod storage;
mod vision;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::app::{format_report, BatchScan};
use crate::capture::CardPhoto;
use crate::error::ScanError;
use crate::scanner::CardScanner;

/// Card Scanner - read a card's name and number and look it up
#[derive(Parser, Debug)]
#[command(name = "card-scanner")]
#[command(about = "Reads trading card photos and looks the cards up in a catalog")]
struct Args {
    /// Card photos to scan; `-` reads one photo from stdin
    #[arg(required_unless_present_any = ["batch", "write_config"])]
    images: Vec<PathBuf>,

    /// Scan every .jpg/.jpeg/.png in a folder
    #[arg(long, value_name = "DIR")]
    batch: Option<PathBuf>,

    /// Configuration file (defaults to config.toml in the config directory)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Write the rectified card and enhanced crops to DIR
    #[arg(long, value_name = "DIR")]
    save_crops: Option<PathBuf>,

    /// Read fields only, without querying the catalog
    #[arg(long)]
    no_lookup: bool,

    /// Write the effective configuration to PATH and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = config::load_or_default(args.config.as_deref())?;
    if let Some(dir) = &args.save_crops {
        config.debug.save_crops = true;
        config.debug.output_dir = dir.clone();
    }

    if let Some(path) = &args.write_config {
        config::save_config(&config, path)?;
        info!("Wrote configuration to {:?}", path);
        return Ok(());
    }

    let mut scanner = CardScanner::new(&config).context("Failed to set up scanner")?;
    if args.no_lookup {
        scanner = scanner.without_lookup();
    }

    match &args.batch {
        Some(dir) => run_batch(Arc::new(scanner), dir, args.json),
        None => run_single(&scanner, &args.images, args.json),
    }
}

/// Scan photos one by one and print a report for each
fn run_single(scanner: &CardScanner, images: &[PathBuf], json: bool) -> Result<()> {
    let mut failed = 0;

    for path in images {
        let result = if path.as_os_str() == "-" {
            read_stdin_photo().and_then(|photo| scanner.scan(&photo))
        } else {
            scanner.scan_path(path)
        };

        match result {
            Ok(outcome) if json => println!("{}", serde_json::to_string_pretty(&outcome)?),
            Ok(outcome) => {
                if images.len() > 1 {
                    println!("== {} ==", path.display());
                }
                println!("{}", format_report(&outcome));
            }
            Err(e) => {
                error!("{}: {}", path.display(), e);
                if e.is_catalog_error() {
                    error!("Check network access and the catalog API key, or pass --no-lookup");
                }
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} scans failed", failed, images.len());
    }
    Ok(())
}

fn read_stdin_photo() -> Result<CardPhoto, ScanError> {
    let mut data = Vec::new();
    std::io::stdin().read_to_end(&mut data)?;
    CardPhoto::from_bytes(&data)
}

/// Scan a folder on a worker thread, printing status lines as they arrive
fn run_batch(scanner: Arc<CardScanner>, dir: &std::path::Path, json: bool) -> Result<()> {
    let files = capture::scan_folder(dir)?;
    info!("Found {} card photos in {:?}", files.len(), dir);

    let batch = BatchScan::start(scanner, files);
    for status in batch.status().iter() {
        if json {
            println!("{}", serde_json::to_string(&status)?);
        } else {
            println!("{}", status);
        }
    }

    let entries = batch.wait()?;
    info!("Batch finished with {} scanned cards", entries.len());
    Ok(())
}

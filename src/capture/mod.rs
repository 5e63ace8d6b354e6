//! Image Sources
//!
//! Decodes card photos from disk or memory and lists photos in a folder.

pub mod frame;

pub use frame::CardPhoto;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// File extensions accepted as card photos
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Whether a path looks like a card photo
pub fn is_card_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// List card photos in a folder, sorted by file name
pub fn scan_folder(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read scan folder {:?}", dir))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && is_card_image(&path) {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_card_image() {
        assert!(is_card_image(Path::new("a/b/card.jpg")));
        assert!(is_card_image(Path::new("CARD.JPEG")));
        assert!(is_card_image(Path::new("scan.Png")));
        assert!(!is_card_image(Path::new("notes.txt")));
        assert!(!is_card_image(Path::new("no_extension")));
    }

    #[test]
    fn test_scan_folder_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.JPG", "notes.txt", "c.jpeg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let files = scan_folder(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.png", "c.jpeg"]);
    }

    #[test]
    fn test_scan_folder_missing_dir() {
        assert!(scan_folder(Path::new("/nonexistent/scans")).is_err());
    }
}

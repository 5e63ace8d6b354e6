//! Decoded card photos

use image::{DynamicImage, RgbImage};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ScanError;

/// A decoded photograph that may contain a card
#[derive(Debug, Clone)]
pub struct CardPhoto {
    /// RGB pixel data
    pub image: RgbImage,
    /// File the photo was decoded from
    pub source: Option<PathBuf>,
}

impl CardPhoto {
    /// Decode a photo from disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|source| ScanError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Decoded {:?} ({}x{})", path, image.width(), image.height());

        Ok(Self {
            image: image.to_rgb8(),
            source: Some(path.to_path_buf()),
        })
    }

    /// Decode a photo from encoded bytes (JPEG, PNG, ...)
    pub fn from_bytes(data: &[u8]) -> Result<Self, ScanError> {
        let image = image::load_from_memory(data).map_err(|source| ScanError::Decode {
            path: ScanError::in_memory_path(),
            source,
        })?;
        Ok(Self::from_dynamic(image))
    }

    /// Wrap an already decoded image
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self {
            image: image.to_rgb8(),
            source: None,
        }
    }

    /// File name for status lines
    pub fn label(&self) -> String {
        self.source
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<memory>".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_open_missing_file_is_decode_error() {
        let err = CardPhoto::open("/nonexistent/card.jpg").unwrap_err();
        assert!(matches!(err, ScanError::Decode { .. }));
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        let err = CardPhoto::from_bytes(b"definitely not an image").unwrap_err();
        match err {
            ScanError::Decode { path, .. } => assert_eq!(path, ScanError::in_memory_path()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_bytes_decodes_png() {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(12, 9, Rgb([1, 2, 3])))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let photo = CardPhoto::from_bytes(&bytes).unwrap();
        assert_eq!(photo.image.dimensions(), (12, 9));
        assert!(photo.source.is_none());
    }

    #[test]
    fn test_open_round_trips_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("card.png");
        RgbImage::from_pixel(30, 42, Rgb([10, 20, 30])).save(&path).unwrap();

        let photo = CardPhoto::open(&path).unwrap();
        assert_eq!(photo.image.dimensions(), (30, 42));
        assert_eq!(photo.label(), "card.png");
    }

    #[test]
    fn test_from_dynamic_converts_to_rgb() {
        let gray = image::GrayImage::from_pixel(4, 3, image::Luma([200]));
        let photo = CardPhoto::from_dynamic(DynamicImage::ImageLuma8(gray));
        assert_eq!(photo.image.dimensions(), (4, 3));
        assert_eq!(photo.image.get_pixel(0, 0), &Rgb([200, 200, 200]));
        assert_eq!(photo.label(), "<memory>");
    }
}

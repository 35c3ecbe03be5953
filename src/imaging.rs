//! Web image variants.
//!
//! A generated source image (1024×1024 PNG from the image API) is turned
//! into two web-ready files, a JPEG and a WebP, both scaled to fit inside a
//! square bounding box (800×800 by default) with the aspect ratio kept.
//! Both variants share one fresh UUID so their names never collide with
//! earlier runs: `{uuid}.jpg` and `{uuid}.webp`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use uuid::Uuid;

/// Paths and file names of the two variants of one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebImages {
    pub jpeg_path: PathBuf,
    pub jpeg_filename: String,
    pub webp_path: PathBuf,
    pub webp_filename: String,
}

/// Converts a source image into web variants.
pub trait ImageProcessor: Send + Sync {
    fn web_variants(&self, source: &Path) -> Result<WebImages>;
}

/// [`ImageProcessor`] using the `image` crate.
pub struct WebImageProcessor {
    output_dir: PathBuf,
    max_dimension: u32,
}

impl WebImageProcessor {
    pub fn new(output_dir: impl Into<PathBuf>, max_dimension: u32) -> Self {
        Self {
            output_dir: output_dir.into(),
            max_dimension,
        }
    }

    fn write_variant(&self, image: &DynamicImage, path: &Path, format: ImageFormat) -> Result<()> {
        image
            .save_with_format(path, format)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

impl ImageProcessor for WebImageProcessor {
    fn web_variants(&self, source: &Path) -> Result<WebImages> {
        let bytes = std::fs::read(source)
            .with_context(|| format!("Failed to read source image {}", source.display()))?;
        let original = image::load_from_memory(&bytes)
            .with_context(|| format!("Failed to decode source image {}", source.display()))?;

        // JPEG has no alpha channel; flatten once for both encoders.
        let resized = DynamicImage::ImageRgb8(
            original
                .resize(self.max_dimension, self.max_dimension, FilterType::Lanczos3)
                .to_rgb8(),
        );

        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("Failed to create output dir {}", self.output_dir.display())
        })?;

        let id = Uuid::new_v4();
        let jpeg_filename = format!("{}.jpg", id);
        let webp_filename = format!("{}.webp", id);
        let jpeg_path = self.output_dir.join(&jpeg_filename);
        let webp_path = self.output_dir.join(&webp_filename);

        self.write_variant(&resized, &jpeg_path, ImageFormat::Jpeg)?;
        self.write_variant(&resized, &webp_path, ImageFormat::WebP)?;

        Ok(WebImages {
            jpeg_path,
            jpeg_filename,
            webp_path,
            webp_filename,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    fn write_source(dir: &Path, width: u32, height: u32) -> PathBuf {
        let path = dir.join("source.png");
        RgbaImage::from_pixel(width, height, Rgba([200, 40, 90, 255]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        path
    }

    #[test]
    fn test_square_source_becomes_800() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), 1024, 1024);
        let processor = WebImageProcessor::new(dir.path().join("out"), 800);

        let images = processor.web_variants(&source).unwrap();

        let jpeg = image::open(&images.jpeg_path).unwrap();
        assert_eq!(jpeg.dimensions(), (800, 800));
        let webp = image::open(&images.webp_path).unwrap();
        assert_eq!(webp.dimensions(), (800, 800));
    }

    #[test]
    fn test_wide_source_keeps_aspect_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), 1600, 800);
        let processor = WebImageProcessor::new(dir.path(), 800);

        let images = processor.web_variants(&source).unwrap();
        let jpeg = image::open(&images.jpeg_path).unwrap();
        assert_eq!(jpeg.dimensions(), (800, 400));
    }

    #[test]
    fn test_variants_share_a_fresh_id() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), 64, 64);
        let processor = WebImageProcessor::new(dir.path(), 32);

        let first = processor.web_variants(&source).unwrap();
        let second = processor.web_variants(&source).unwrap();

        let stem = first.jpeg_filename.trim_end_matches(".jpg");
        assert_eq!(first.webp_filename, format!("{}.webp", stem));
        assert!(Uuid::parse_str(stem).is_ok());
        assert_ne!(first.jpeg_filename, second.jpeg_filename);
        assert!(first.jpeg_path.ends_with(&first.jpeg_filename));
    }

    #[test]
    fn test_undecodable_source_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.png");
        std::fs::write(&source, b"not an image").unwrap();
        let processor = WebImageProcessor::new(dir.path(), 800);
        assert!(processor.web_variants(&source).is_err());
    }
}

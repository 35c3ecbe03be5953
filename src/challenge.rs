//! Challenge building: words → prompt → image → web variants → CDN.
//!
//! [`ChallengeBuilder::build`] runs the steps for one difficulty strictly
//! in order. Any failing step fails the build. The one local loop is the
//! text check: when a [`TextDetector`] is attached, an image that shows
//! text is regenerated, up to a fixed number of generations, after which
//! the last image is used anyway. The only side effects are the two
//! uploaded image objects under `{date}/` and files in the work directory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::generate::{SceneGenerator, TextDetector};
use crate::imaging::ImageProcessor;
use crate::models::{Challenge, Word};
use crate::storage::ObjectStore;

pub struct ChallengeBuilder {
    generator: Arc<dyn SceneGenerator>,
    processor: Arc<dyn ImageProcessor>,
    store: Arc<dyn ObjectStore>,
    work_dir: PathBuf,
    text_check: Option<TextCheck>,
}

struct TextCheck {
    detector: Arc<dyn TextDetector>,
    max_generations: u32,
}

impl ChallengeBuilder {
    pub fn new(
        generator: Arc<dyn SceneGenerator>,
        processor: Arc<dyn ImageProcessor>,
        store: Arc<dyn ObjectStore>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            generator,
            processor,
            store,
            work_dir: work_dir.into(),
            text_check: None,
        }
    }

    /// Check each generated image for text and regenerate it, allowing at
    /// most `max_generations` images per challenge.
    pub fn with_text_check(mut self, detector: Arc<dyn TextDetector>, max_generations: u32) -> Self {
        self.text_check = Some(TextCheck {
            detector,
            max_generations: max_generations.max(1),
        });
        self
    }

    /// Build the challenge for `words`, uploading images under `{date}/`.
    pub async fn build(&self, words: &[Word], date: &str) -> Result<Challenge> {
        info!("generating prompt");
        let prompt = self
            .generator
            .generate_prompt(words)
            .await
            .context("requesting scene prompt")?;

        info!(chars = prompt.chars().count(), "generating image");
        let bytes = self.render(&prompt).await?;
        let source_path = self.save_source(&bytes).await?;

        info!("processing web variants");
        let processor = Arc::clone(&self.processor);
        let source = source_path.clone();
        let variants = tokio::task::spawn_blocking(move || processor.web_variants(&source))
            .await
            .context("image processing task failed")?
            .context("processing web variants")?;

        info!("uploading images to CDN");
        let jpeg_url = self
            .store
            .upload_file(
                &variants.jpeg_path,
                &format!("{}/{}", date, variants.jpeg_filename),
            )
            .await
            .context("uploading JPEG variant")?;
        let webp_url = self
            .store
            .upload_file(
                &variants.webp_path,
                &format!("{}/{}", date, variants.webp_filename),
            )
            .await
            .context("uploading WebP variant")?;

        Ok(Challenge {
            words: words.to_vec(),
            source_image_path: source_path.to_string_lossy().to_string(),
            jpeg_url,
            webp_url,
            prompt,
        })
    }

    /// Generate and download an image for `prompt`, regenerating while the
    /// text check finds text and generations remain.
    async fn render(&self, prompt: &str) -> Result<Vec<u8>> {
        let mut generation = 1;
        loop {
            let generated = self
                .generator
                .generate_image(prompt)
                .await
                .context("requesting image")?;
            let bytes = self
                .generator
                .download_image(&generated)
                .await
                .context("downloading generated image")?;

            let Some(check) = &self.text_check else {
                return Ok(bytes);
            };
            let has_text = check
                .detector
                .detect_text(&bytes)
                .await
                .context("checking image for text")?;

            if !has_text {
                info!(generation, "image passed text check");
                return Ok(bytes);
            }
            if generation >= check.max_generations {
                warn!(
                    generations = generation,
                    "image still contains text; using it anyway"
                );
                return Ok(bytes);
            }
            warn!(
                generation,
                max_generations = check.max_generations,
                "image contains text; regenerating"
            );
            generation += 1;
        }
    }

    /// Write the downloaded image under a fresh name in the work directory.
    async fn save_source(&self, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .with_context(|| format!("Failed to create work dir {}", self.work_dir.display()))?;

        let extension = image::guess_format(bytes)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("png");
        let path = self
            .work_dir
            .join(format!("{}-source.{}", Uuid::new_v4(), extension));

        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

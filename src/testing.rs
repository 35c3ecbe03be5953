//! In-memory fakes for the collaborator traits, shared by unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::generate::{user_message, GeneratedImage, SceneGenerator, TextDetector};
use crate::imaging::{ImageProcessor, WebImages};
use crate::models::Word;
use crate::report::ErrorReporter;
use crate::storage::{MemoryStore, ObjectStore};

/// PNG signature; enough for format sniffing.
const FAKE_PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Scene generator that answers deterministically and can be told to fail
/// on a specific (1-based) image call.
#[derive(Default)]
pub struct FakeGenerator {
    fail_image_on: Option<usize>,
    image_calls: AtomicUsize,
    image_prompts: Mutex<Vec<String>>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_image_on_call(mut self, call: usize) -> Self {
        self.fail_image_on = Some(call);
        self
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    pub fn image_prompts(&self) -> Vec<String> {
        self.image_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SceneGenerator for FakeGenerator {
    async fn generate_prompt(&self, words: &[Word]) -> Result<String> {
        Ok(format!("A dream of {}", user_message(words)))
    }

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage> {
        let call = self.image_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_image_on == Some(call) {
            bail!("OpenAI API error 500 Internal Server Error: image call {}", call);
        }
        self.image_prompts.lock().unwrap().push(prompt.to_string());
        Ok(GeneratedImage::Inline(FAKE_PNG.to_vec()))
    }

    async fn download_image(&self, image: &GeneratedImage) -> Result<Vec<u8>> {
        match image {
            GeneratedImage::Inline(bytes) => Ok(bytes.clone()),
            GeneratedImage::Url(url) => bail!("unexpected url {}", url),
        }
    }
}

/// Text detector with scripted answers; the last answer repeats once the
/// script runs out.
#[derive(Default)]
pub struct FakeTextDetector {
    answers: Vec<bool>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeTextDetector {
    pub fn with_answers(answers: &[bool]) -> Self {
        Self {
            answers: answers.to_vec(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextDetector for FakeTextDetector {
    async fn detect_text(&self, _image: &[u8]) -> Result<bool> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("OpenAI API error 500 Internal Server Error: text check");
        }
        let answer = self
            .answers
            .get(call)
            .or_else(|| self.answers.last())
            .copied()
            .unwrap_or(false);
        Ok(answer)
    }
}

/// Writes placeholder variant files without decoding anything.
pub struct FakeProcessor {
    output_dir: PathBuf,
}

impl FakeProcessor {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl ImageProcessor for FakeProcessor {
    fn web_variants(&self, source: &Path) -> Result<WebImages> {
        std::fs::create_dir_all(&self.output_dir)?;
        let bytes = std::fs::read(source)?;
        let id = Uuid::new_v4();
        let jpeg_filename = format!("{}.jpg", id);
        let webp_filename = format!("{}.webp", id);
        let jpeg_path = self.output_dir.join(&jpeg_filename);
        let webp_path = self.output_dir.join(&webp_filename);
        std::fs::write(&jpeg_path, &bytes)?;
        std::fs::write(&webp_path, &bytes)?;
        Ok(WebImages {
            jpeg_path,
            jpeg_filename,
            webp_path,
            webp_filename,
        })
    }
}

/// Wraps a [`MemoryStore`] and injects failures.
#[derive(Clone)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_origin_reads: bool,
    put_failures: Arc<Mutex<HashMap<String, usize>>>,
    origin_reads: Arc<AtomicUsize>,
    public_reads: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_origin_reads: false,
            put_failures: Arc::default(),
            origin_reads: Arc::default(),
            public_reads: Arc::default(),
        }
    }

    pub fn fail_origin_reads(mut self) -> Self {
        self.fail_origin_reads = true;
        self
    }

    /// Fail the next `times` puts to `key`.
    pub fn fail_puts(self, key: &str, times: usize) -> Self {
        self.put_failures
            .lock()
            .unwrap()
            .insert(key.to_string(), times);
        self
    }

    pub fn origin_reads(&self) -> usize {
        self.origin_reads.load(Ordering::SeqCst)
    }

    pub fn public_reads(&self) -> usize {
        self.public_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String> {
        {
            let mut failures = self.put_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    bail!("S3 PutObject failed (HTTP 503) for key '{}'", key);
                }
            }
        }
        self.inner.put_object(key, body, content_type).await
    }

    async fn read_origin(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.origin_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_origin_reads {
            bail!("S3 GetObject failed (HTTP 500) for key '{}'", key);
        }
        self.inner.read_origin(key).await
    }

    async fn read_public(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.public_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_public(key).await
    }

    fn public_url(&self, key: &str) -> String {
        self.inner.public_url(key)
    }
}

/// Reporter that records the context of every report.
#[derive(Default)]
pub struct RecordingReporter {
    contexts: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn contexts(&self) -> Vec<String> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErrorReporter for RecordingReporter {
    async fn report(&self, _err: &anyhow::Error, context: &str) {
        self.contexts.lock().unwrap().push(context.to_string());
    }
}

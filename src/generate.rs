//! Generative API access: scene prompts and images.
//!
//! Defines the [`SceneGenerator`] trait and the [`OpenAiGenerator`]
//! implementation, which calls:
//!
//! - `POST /v1/chat/completions` to turn a word list into a short,
//!   dream-like scene description, and
//! - `POST /v1/images/generations` to render that description, and
//! - `POST /v1/chat/completions` again, with the rendered image attached,
//!   to check whether the model slipped text into it ([`TextDetector`]).
//!
//! Neither call is retried here. A failed request fails the whole day's
//! attempt, and the pipeline-level retry policy decides what happens next.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::AiConfig;
use crate::models::Word;

/// System instruction for scene prompts. The length limit is a guideline
/// for the model; replies are not truncated.
pub const SCENE_INSTRUCTIONS: &str = "\
You are feeding into an image generation model. You will be given three words, each separated by a comma.
Return a vivid description of a dream-like scene, based on the three elements the user has provided.
The three elements must feature prominently.
No mentions of race, ethnicity, or text should be present in your output.
Only return the description, as this will feed directly into the image generator.
Limit your output to about 250 characters.";

/// Appended to every image prompt.
pub const NO_TEXT_DIRECTIVE: &str = "You must not include any text in the image.";

/// System instruction for the text check.
pub const TEXT_CHECK_INSTRUCTIONS: &str = "\
You inspect generated illustrations for a word puzzle.
Decide whether the image contains any visible text: letters, words, numbers, signage, captions or writing of any kind, in any language.
Decorative shapes that only resemble letters do not count.";

/// Question sent alongside the image.
pub const TEXT_CHECK_QUESTION: &str = "Does this image contain any text?";

/// Where a generated image can be fetched from.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedImage {
    /// Hosted by the provider; must be downloaded.
    Url(String),
    /// Returned inline (`b64_json`).
    Inline(Vec<u8>),
}

/// Text-to-prompt and prompt-to-image generation.
#[async_trait]
pub trait SceneGenerator: Send + Sync {
    /// Describe a dream-like scene featuring `words`.
    async fn generate_prompt(&self, words: &[Word]) -> Result<String>;

    /// Render `prompt` (the no-text directive is added by the implementation).
    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage>;

    /// Fetch the bytes of a generated image.
    async fn download_image(&self, image: &GeneratedImage) -> Result<Vec<u8>>;
}

/// Checks generated images for unwanted text.
#[async_trait]
pub trait TextDetector: Send + Sync {
    /// `true` when `image` shows any text.
    async fn detect_text(&self, image: &[u8]) -> Result<bool>;
}

/// User message for the chat request: the words joined by `", "`.
pub fn user_message(words: &[Word]) -> String {
    words
        .iter()
        .map(|w| w.word.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Image prompt with the no-text directive appended.
pub fn image_prompt(prompt: &str) -> String {
    format!(
        "{}. {}",
        prompt.trim().trim_end_matches('.'),
        NO_TEXT_DIRECTIVE
    )
}

// ============ OpenAI ============

/// [`SceneGenerator`] backed by the OpenAI HTTP API.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    image_model: String,
    image_size: String,
    qa_model: String,
}

impl OpenAiGenerator {
    pub fn new(client: reqwest::Client, config: &AiConfig, api_key: String) -> Self {
        Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chat_model: config.chat_model.clone(),
            image_model: config.image_model.clone(),
            image_size: config.image_size.clone(),
            qa_model: config.qa_model.clone(),
        }
    }

    /// Build a client with the configured request timeout.
    pub fn http_client(config: &AiConfig) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?)
    }

    fn chat_request(&self, words: &[Word]) -> Value {
        json!({
            "model": self.chat_model,
            "messages": [
                {"role": "system", "content": SCENE_INSTRUCTIONS},
                {"role": "user", "content": user_message(words)},
            ],
        })
    }

    fn image_request(&self, prompt: &str) -> Value {
        json!({
            "model": self.image_model,
            "prompt": image_prompt(prompt),
            "size": self.image_size,
            "n": 1,
        })
    }

    fn text_check_request(&self, image: &[u8]) -> Value {
        let mime = image::guess_format(image)
            .map(|format| format.to_mime_type())
            .unwrap_or("image/png");
        let data_url = format!(
            "data:{};base64,{}",
            mime,
            base64::engine::general_purpose::STANDARD.encode(image)
        );
        json!({
            "model": self.qa_model,
            "messages": [
                {"role": "system", "content": TEXT_CHECK_INSTRUCTIONS},
                {"role": "user", "content": [
                    {"type": "text", "text": TEXT_CHECK_QUESTION},
                    {"type": "image_url", "image_url": {"url": data_url}},
                ]},
            ],
            "max_completion_tokens": 100,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "text_detection",
                    "strict": true,
                    "schema": {
                        "type": "object",
                        "properties": {
                            "includes_text": {
                                "type": "boolean",
                                "description": "True if the image contains any text, letters, words, or writing"
                            }
                        },
                        "required": ["includes_text"],
                        "additionalProperties": false
                    }
                }
            }
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl SceneGenerator for OpenAiGenerator {
    async fn generate_prompt(&self, words: &[Word]) -> Result<String> {
        let json = self
            .post("/v1/chat/completions", &self.chat_request(words))
            .await
            .context("Failed to generate prompt")?;
        parse_chat_response(&json)
    }

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage> {
        let json = self
            .post("/v1/images/generations", &self.image_request(prompt))
            .await
            .context("Failed to generate image")?;
        parse_image_response(&json)
    }

    async fn download_image(&self, image: &GeneratedImage) -> Result<Vec<u8>> {
        match image {
            GeneratedImage::Inline(bytes) => Ok(bytes.clone()),
            GeneratedImage::Url(url) => {
                let resp = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .context("Failed to download generated image")?;
                if !resp.status().is_success() {
                    bail!("Image download failed (HTTP {})", resp.status());
                }
                let bytes = resp.bytes().await?;
                debug!(bytes = bytes.len(), "downloaded generated image");
                Ok(bytes.to_vec())
            }
        }
    }
}

#[async_trait]
impl TextDetector for OpenAiGenerator {
    async fn detect_text(&self, image: &[u8]) -> Result<bool> {
        debug!(bytes = image.len(), "checking image for text");
        let json = self
            .post("/v1/chat/completions", &self.text_check_request(image))
            .await
            .context("Failed to check image for text")?;
        parse_text_detection(&json)
    }
}

#[derive(Debug, Deserialize)]
struct TextDetection {
    includes_text: bool,
}

/// Read the structured `{"includes_text": bool}` answer.
fn parse_text_detection(json: &Value) -> Result<bool> {
    let content = parse_chat_response(json).context("Invalid text detection response")?;
    let detection: TextDetection = serde_json::from_str(&content)
        .with_context(|| format!("Invalid text detection payload: {}", content))?;
    Ok(detection.includes_text)
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(json: &Value) -> Result<String> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))?;

    let content = content.trim();
    if content.is_empty() {
        bail!("OpenAI returned an empty prompt");
    }
    Ok(content.to_string())
}

/// Extract `data[0].url`, or decode `data[0].b64_json`.
fn parse_image_response(json: &Value) -> Result<GeneratedImage> {
    let first = json
        .get("data")
        .and_then(|d| d.get(0))
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    if let Some(url) = first.get("url").and_then(|u| u.as_str()) {
        return Ok(GeneratedImage::Url(url.to_string()));
    }
    if let Some(b64) = first.get("b64_json").and_then(|b| b.as_str()) {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .context("Invalid base64 image in OpenAI response")?;
        return Ok(GeneratedImage::Inline(bytes));
    }
    bail!("Invalid OpenAI response: image has neither url nor b64_json")
}

//! Gemini (Google) backend for prompt expansion and image composition.

use crate::config::{ApiKey, StudioConfig, DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{parse_retry_after, sanitize_error_message, Result, StudioError};
use crate::image::provider::{ComposeResponse, ContentPart, ImageComposer, PromptExpander};
use crate::image::types::EncodedImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Default model for prompt expansion.
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";

/// Gemini image model variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeminiModel {
    /// Nano Banana - Gemini 2.5 Flash Image (fast, economical).
    #[default]
    NanoBanana,
    /// Nano Banana Pro - Gemini 3 Pro Image (highest quality).
    NanoBananaPro,
}

impl GeminiModel {
    /// Returns the API model identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NanoBanana => "gemini-2.5-flash-image",
            Self::NanoBananaPro => "nano-banana-pro-preview",
        }
    }
}

impl FromStr for GeminiModel {
    type Err = StudioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "nano-banana" | "gemini-2.5-flash-image" => Ok(Self::NanoBanana),
            "nano-banana-pro" | "nano-banana-pro-preview" => Ok(Self::NanoBananaPro),
            other => Err(StudioError::InvalidRequest(format!(
                "unknown Gemini image model '{other}' (expected nano-banana or nano-banana-pro)"
            ))),
        }
    }
}

/// Builder for GeminiProvider.
#[derive(Debug, Clone, Default)]
pub struct GeminiProviderBuilder {
    api_key: Option<ApiKey>,
    model: GeminiModel,
    text_model: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl GeminiProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a resolved configuration.
    pub fn from_config(config: &StudioConfig) -> Result<Self> {
        let mut builder = Self::new()
            .api_key(config.api_key.clone())
            .base_url(config.base_url.clone())
            .timeout(config.request_timeout);
        if let Some(model) = &config.image_model {
            builder = builder.model(model.parse()?);
        }
        if let Some(text_model) = &config.text_model {
            builder = builder.text_model(text_model.clone());
        }
        Ok(builder)
    }

    /// Sets the credential.
    pub fn api_key(mut self, key: ApiKey) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Sets the image model variant.
    pub fn model(mut self, model: GeminiModel) -> Self {
        self.model = model;
        self
    }

    /// Sets the model used for prompt expansion.
    pub fn text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = Some(model.into());
        self
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the provider. Fails with `Auth` if no key was given.
    pub fn build(self) -> Result<GeminiProvider> {
        let api_key = self
            .api_key
            .ok_or_else(|| StudioError::Auth("no API key provided".into()))?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT))
            .build()?;

        Ok(GeminiProvider {
            client,
            api_key,
            model: self.model,
            text_model: self
                .text_model
                .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

/// Gemini backend implementing both remote capabilities.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: ApiKey,
    model: GeminiModel,
    text_model: String,
    base_url: String,
}

impl GeminiProvider {
    /// Creates a new `GeminiProviderBuilder`.
    pub fn builder() -> GeminiProviderBuilder {
        GeminiProviderBuilder::new()
    }

    /// The image model in use.
    pub fn model(&self) -> GeminiModel {
        self.model
    }

    /// The text model in use.
    pub fn text_model(&self) -> &str {
        &self.text_model
    }

    fn model_url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}", self.base_url, model)
    }

    async fn generate_content(&self, model: &str, body: &GeminiRequest) -> Result<GeminiResponse> {
        let url = format!("{}:generateContent", self.model_url(model));

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose())
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text, &headers));
        }

        Ok(response.json().await?)
    }

    async fn check_model(&self, model: &str) -> Result<()> {
        let response = self
            .client
            .get(self.model_url(model))
            .header("x-goog-api-key", self.api_key.expose())
            .send()
            .await?;

        match response.status().as_u16() {
            401 | 403 => Err(StudioError::Auth("Invalid API key".into())),
            404 => Err(StudioError::InvalidRequest(
                "Model not found. Verify the model name is correct.".into(),
            )),
            s if !(200..300).contains(&s) => Err(StudioError::Api {
                status: s,
                message: "Health check failed".into(),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PromptExpander for GeminiProvider {
    async fn expand(&self, system_directive: &str, idea: &str) -> Result<String> {
        let start = Instant::now();
        let body = GeminiRequest::expansion(system_directive, idea);
        let response = self.generate_content(&self.text_model, &body).await?;
        let parts = response.into_parts()?;

        let text: String = parts.into_iter().filter_map(|p| p.text).collect();
        tracing::debug!(
            model = %self.text_model,
            duration_ms = start.elapsed().as_millis() as u64,
            "prompt expansion complete"
        );
        Ok(text)
    }

    async fn health_check(&self) -> Result<()> {
        self.check_model(&self.text_model).await
    }
}

#[async_trait]
impl ImageComposer for GeminiProvider {
    async fn compose(&self, instruction: &str, images: &[EncodedImage]) -> Result<ComposeResponse> {
        let start = Instant::now();
        let body = GeminiRequest::composition(instruction, images);
        let response = self.generate_content(self.model.as_str(), &body).await?;
        let parts = response.into_parts()?;

        tracing::debug!(
            model = %self.model.as_str(),
            parts = parts.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "composition response received"
        );
        Ok(ComposeResponse {
            parts: parts.into_iter().map(ContentPart::from).collect(),
        })
    }

    async fn health_check(&self) -> Result<()> {
        self.check_model(self.model.as_str()).await
    }
}

fn parse_error(status: u16, text: &str, headers: &reqwest::header::HeaderMap) -> StudioError {
    // Google wraps failures as {"error": {"code", "message", "status"}}.
    let message = serde_json::from_str::<GeminiErrorResponse>(text)
        .ok()
        .and_then(|e| e.error.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| text.to_string());
    let text = sanitize_error_message(&message);

    if status == 404 {
        return StudioError::InvalidRequest(
            "Model not found. Verify the model name is correct.".into(),
        );
    }
    if status == 429 {
        let retry_after = parse_retry_after(headers).map(Duration::from_secs);
        return StudioError::RateLimited { retry_after };
    }
    if status == 401 || status == 403 {
        return StudioError::Auth(text);
    }
    let lower = text.to_lowercase();
    if lower.contains("safety") || lower.contains("blocked") || lower.contains("prohibited") {
        return StudioError::ContentBlocked(text);
    }
    StudioError::Api {
        status,
        message: text,
    }
}

// Request/Response types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiRequestPart>,
}

/// A part in a Gemini request - can be text or inline image data.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiRequestPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiConfig {
    response_modalities: Vec<String>,
}

impl GeminiRequest {
    fn expansion(system_directive: &str, idea: &str) -> Self {
        Self {
            system_instruction: Some(GeminiContent {
                role: None,
                parts: vec![GeminiRequestPart::Text {
                    text: system_directive.to_string(),
                }],
            }),
            contents: vec![GeminiContent {
                role: Some("user"),
                parts: vec![GeminiRequestPart::Text {
                    text: idea.to_string(),
                }],
            }],
            generation_config: None,
        }
    }

    fn composition(instruction: &str, images: &[EncodedImage]) -> Self {
        // Instruction first, then images in registry order.
        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(GeminiRequestPart::Text {
            text: instruction.to_string(),
        });
        parts.extend(images.iter().map(|image| GeminiRequestPart::InlineData {
            inline_data: InlineData {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            },
        }));

        Self {
            system_instruction: None,
            contents: vec![GeminiContent {
                role: Some("user"),
                parts,
            }],
            generation_config: Some(GeminiConfig {
                response_modalities: vec!["IMAGE".to_string()],
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

impl GeminiResponse {
    /// Returns the first candidate's parts after checking for blocks.
    fn into_parts(self) -> Result<Vec<GeminiPartResponse>> {
        // Prompt blocks arrive as HTTP 200 with prompt_feedback set.
        if let Some(ref feedback) = self.prompt_feedback {
            if let Some(ref reason) = feedback.block_reason {
                let msg = feedback
                    .block_reason_message
                    .clone()
                    .unwrap_or_else(|| format!("Prompt blocked: {}", reason));
                return Err(StudioError::ContentBlocked(msg));
            }
        }

        let candidate = self.candidates.into_iter().next().ok_or_else(|| {
            StudioError::UnexpectedResponse("No candidates in Gemini response".into())
        })?;

        if let Some(ref finish_reason) = candidate.finish_reason {
            match finish_reason.as_str() {
                "SAFETY"
                | "IMAGE_SAFETY"
                | "IMAGE_PROHIBITED_CONTENT"
                | "IMAGE_RECITATION"
                | "RECITATION"
                | "PROHIBITED_CONTENT"
                | "BLOCKLIST" => {
                    return Err(StudioError::ContentBlocked(format!(
                        "Content blocked by Gemini safety filter: {}",
                        finish_reason
                    )));
                }
                _ => {} // STOP, MAX_TOKENS, NO_IMAGE etc. leave judgement to the caller
            }
        }

        Ok(candidate.content.map(|c| c.parts).unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContentResponse>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    block_reason_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

impl From<GeminiPartResponse> for ContentPart {
    fn from(part: GeminiPartResponse) -> Self {
        Self {
            text: part.text,
            inline_image: part.inline_data.map(|d| EncodedImage {
                data: d.data,
                mime_type: d.mime_type,
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    #[serde(default)]
    message: Option<String>,
}

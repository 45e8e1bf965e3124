//! Remote capability traits.

use crate::error::Result;
use crate::image::types::EncodedImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One part of a composition response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPart {
    /// Text returned by the model, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Inline image data, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_image: Option<EncodedImage>,
}

impl ContentPart {
    /// A text-only part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_image: None,
        }
    }

    /// An image-only part.
    pub fn image(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: None,
            inline_image: Some(EncodedImage {
                data: data.into(),
                mime_type: mime_type.into(),
            }),
        }
    }
}

/// The ordered content parts returned by a composition call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeResponse {
    /// Parts in the order the model produced them.
    pub parts: Vec<ContentPart>,
}

/// Turns a short idea into a detailed generation prompt.
#[async_trait]
pub trait PromptExpander: Send + Sync {
    /// Runs the expansion with the given system directive.
    async fn expand(&self, system_directive: &str, idea: &str) -> Result<String>;

    /// Checks if the backend is reachable and authenticated.
    async fn health_check(&self) -> Result<()>;
}

/// Turns an instruction plus ordered images into composed content.
#[async_trait]
pub trait ImageComposer: Send + Sync {
    /// Requests an image-typed response for the instruction and images.
    async fn compose(&self, instruction: &str, images: &[EncodedImage])
        -> Result<ComposeResponse>;

    /// Checks if the backend is reachable and authenticated.
    async fn health_check(&self) -> Result<()>;
}

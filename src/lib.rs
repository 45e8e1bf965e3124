#![warn(missing_docs)]
//! Compose Studio - turn role-tagged reference images and an idea into one
//! AI-composed image.
//!
//! A session holds up to five uploaded images, each tagged with a role
//! (primary subject, background, element). A short idea is expanded into a
//! detailed prompt by a text model; the user may edit the prompt; then the
//! images and the prompt are sent to an image model that returns a single
//! composed image.
//!
//! # Quick Start
//!
//! ```no_run
//! use compose_studio::{ApiKey, CandidateFile, GeminiProvider, Outcome, Studio};
//!
//! #[tokio::main]
//! async fn main() -> compose_studio::Result<()> {
//!     let provider = GeminiProvider::builder()
//!         .api_key(ApiKey::from_env()?)
//!         .build()?;
//!     let studio = Studio::with_gemini(provider);
//!
//!     studio.add_images(vec![
//!         CandidateFile::from_path("portrait.jpg"),
//!         CandidateFile::from_path("beach.png"),
//!     ]);
//!     studio.set_idea("a surfer at golden hour");
//!     studio.expand_prompt().await?;
//!
//!     if let Outcome::Succeeded = studio.compose().await? {
//!         if let Some(image) = studio.result() {
//!             image.save(image.suggested_filename())?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
mod error;
pub mod image;
pub mod studio;

#[cfg(feature = "cli")]
#[doc(hidden)]
pub mod mcp;

// Re-export error types at crate root
pub use error::{Result, StudioError};

pub use config::{ApiKey, StudioConfig};
pub use image::providers::{GeminiModel, GeminiProvider, GeminiProviderBuilder};
pub use image::{
    CandidateFile, ComposeResponse, ComposedImage, ContentPart, EncodedImage, ImageComposer,
    ImageFormat, ImageId, ImageRegistry, ImageRole, PromptExpander, PromptState, MAX_IMAGES,
};
pub use studio::{GenerationStatus, Operation, Outcome, Studio, StudioEvent, StudioSnapshot};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{ApiKey, StudioConfig};
    pub use crate::error::{Result, StudioError};
    pub use crate::image::providers::GeminiProvider;
    pub use crate::image::{CandidateFile, ComposedImage, ImageComposer, ImageRole, PromptExpander};
    pub use crate::studio::{Outcome, Studio};
}

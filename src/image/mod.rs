//! Image registry, prompt pipeline and composition request assembly.

pub mod composition;
pub mod prompt;
mod provider;
pub mod providers;
pub mod registry;
mod types;

pub use prompt::{PromptState, EXPANSION_DIRECTIVE};
pub use provider::{ComposeResponse, ContentPart, ImageComposer, PromptExpander};
pub use registry::{
    CandidateFile, ImageId, ImageRegistry, PreviewTracker, UploadedImage, MAX_IMAGES,
};
pub use types::{
    ComposedImage, EncodedImage, ImageFormat, ImageInput, ImageRole, ImageSource,
    DOWNLOAD_FILENAME,
};

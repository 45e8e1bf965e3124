//! Remote backends.

mod gemini;

pub use gemini::{GeminiModel, GeminiProvider, GeminiProviderBuilder, DEFAULT_TEXT_MODEL};

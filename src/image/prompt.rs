//! Idea and final-prompt state, and the expansion call.

use crate::error::{Result, StudioError};
use crate::image::provider::PromptExpander;
use serde::Serialize;

/// System directive sent with every expansion request.
pub const EXPANSION_DIRECTIVE: &str = "You are an expert prompt engineer for image generation models. \
Take the user's simple idea, written in natural language, and turn it into a detailed, rich and \
effective prompt in the same language. The prompt must vividly describe the scene, lighting, art \
style, composition and emotion, ready to be used to generate an image. Reply ONLY with the \
generated prompt as plain text, with no introduction or explanation.";

/// The user's idea and the editable final prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromptState {
    idea: String,
    final_prompt: String,
    #[serde(skip)]
    revision: u64,
}

impl PromptState {
    /// Creates empty prompt state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current idea.
    pub fn idea(&self) -> &str {
        &self.idea
    }

    /// The current final prompt.
    pub fn final_prompt(&self) -> &str {
        &self.final_prompt
    }

    /// Bumped on every change to the final prompt.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Replaces the idea.
    pub fn set_idea(&mut self, idea: impl Into<String>) {
        self.idea = idea.into();
    }

    /// Replaces the final prompt.
    pub fn set_final_prompt(&mut self, prompt: impl Into<String>) {
        self.final_prompt = prompt.into();
        self.revision += 1;
    }

    /// Overwrites the final prompt with an expansion result, unless the
    /// prompt was edited after `started_at` was read.
    pub fn apply_expansion(&mut self, text: impl Into<String>, started_at: u64) -> bool {
        if self.revision != started_at {
            return false;
        }
        self.set_final_prompt(text);
        true
    }

    /// True when the final prompt has non-whitespace content.
    pub fn has_final_prompt(&self) -> bool {
        !self.final_prompt.trim().is_empty()
    }
}

/// Rejects ideas that are empty or whitespace.
pub fn validate_idea(idea: &str) -> Result<()> {
    if idea.trim().is_empty() {
        return Err(StudioError::Validation(
            "describe your idea before generating a prompt".into(),
        ));
    }
    Ok(())
}

/// Expands `idea` into a detailed prompt.
///
/// Validation failures return before the expander is called. The result is
/// trimmed; an empty result is reported as an unexpected response.
pub async fn expand(expander: &dyn PromptExpander, idea: &str) -> Result<String> {
    validate_idea(idea)?;

    tracing::debug!(idea_len = idea.len(), "expanding idea into prompt");
    let text = expander.expand(EXPANSION_DIRECTIVE, idea).await?;
    let text = text.trim();
    if text.is_empty() {
        return Err(StudioError::UnexpectedResponse(
            "the model returned an empty prompt".into(),
        ));
    }
    Ok(text.to_string())
}

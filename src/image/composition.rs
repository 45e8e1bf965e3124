//! Turns registry contents and a final prompt into a composition call.

use crate::error::{Result, StudioError};
use crate::image::provider::{ComposeResponse, ImageComposer};
use crate::image::types::{ComposedImage, EncodedImage, ImageInput, ImageRole};
use base64::Engine;
use std::time::Instant;

const INSTRUCTION_PREAMBLE: &str = "You are an expert in image composition. \
The following images were provided by the user with specific roles. ";

/// Rejects requests with no images or an empty prompt.
pub fn validate_request(images: &[ImageInput], final_prompt: &str) -> Result<()> {
    if images.is_empty() || final_prompt.trim().is_empty() {
        return Err(StudioError::Validation(
            "upload at least one image and write a prompt first".into(),
        ));
    }
    Ok(())
}

/// Builds the natural-language instruction sent ahead of the images.
///
/// One clause per image, 1-based and in input order, with the role name
/// inserted verbatim, followed by the prompt in quotes.
pub fn build_instruction(roles: &[ImageRole], final_prompt: &str) -> String {
    let mut instruction = String::from(INSTRUCTION_PREAMBLE);
    for (index, role) in roles.iter().enumerate() {
        instruction.push_str(&format!(
            "Image {} must be used as '{}'. ",
            index + 1,
            role
        ));
    }
    instruction.push_str(&format!(
        "Based on this, apply the following creative prompt: \"{}\"",
        final_prompt
    ));
    instruction
}

/// Base64-encodes every image on its own task.
///
/// Tasks may finish in any order; the output follows input order. The first
/// failure, in input order, is returned.
pub async fn encode_images(images: &[ImageInput]) -> Result<Vec<EncodedImage>> {
    let handles: Vec<_> = images
        .iter()
        .cloned()
        .map(|input| {
            tokio::spawn(async move {
                let bytes = input.source.load().await?;
                Ok::<_, StudioError>(EncodedImage {
                    data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                    mime_type: input.mime_type,
                })
            })
        })
        .collect();

    let mut encoded = Vec::with_capacity(handles.len());
    for (index, handle) in handles.into_iter().enumerate() {
        let image = handle
            .await
            .map_err(|e| StudioError::Encode(format!("image {}: task failed: {}", index + 1, e)))??;
        encoded.push(image);
    }
    Ok(encoded)
}

/// Picks the first inline image out of a composition response.
pub fn extract_image(response: ComposeResponse) -> Result<ComposedImage> {
    response
        .parts
        .into_iter()
        .find_map(|part| part.inline_image)
        .map(|inline| ComposedImage::new(inline.mime_type, inline.data))
        .ok_or(StudioError::NoImageInResponse)
}

/// Validates, encodes, instructs and submits, returning the composed image.
pub async fn build_and_submit(
    composer: &dyn ImageComposer,
    images: &[ImageInput],
    final_prompt: &str,
) -> Result<ComposedImage> {
    validate_request(images, final_prompt)?;
    let start = Instant::now();

    let encoded = encode_images(images).await?;
    let roles: Vec<ImageRole> = images.iter().map(|i| i.role).collect();
    let instruction = build_instruction(&roles, final_prompt);

    tracing::debug!(images = encoded.len(), "submitting composition request");
    let response = composer.compose(&instruction, &encoded).await?;
    let image = extract_image(response)?;

    tracing::debug!(
        mime_type = %image.mime_type,
        duration_ms = start.elapsed().as_millis() as u64,
        "composition complete"
    );
    Ok(image)
}

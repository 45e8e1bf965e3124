//! Core types for image composition.

use crate::error::{Result, StudioError};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Suggested filename when downloading a composed image.
pub const DOWNLOAD_FILENAME: &str = "imagem-gerada.png";

/// Image formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG format (lossless).
    #[default]
    Png,
    /// JPEG format (lossy).
    Jpeg,
    /// WebP format (modern, efficient).
    WebP,
}

impl ImageFormat {
    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
        }
    }

    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }

    /// Parses an accepted MIME type. `image/jpg` is treated as JPEG.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Attempts to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Detects format from a file name's extension.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Detects image format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }

        None
    }
}

/// How an uploaded image should be used during composition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageRole {
    /// The main subject.
    #[default]
    Primary,
    /// The scene behind the subject.
    Background,
    /// An element to place in the scene.
    Element,
}

impl ImageRole {
    /// All roles, in display order.
    pub const ALL: [ImageRole; 3] = [Self::Primary, Self::Background, Self::Element];

    /// Returns the role name as it appears in composition instructions.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "Primary",
            Self::Background => "Background",
            Self::Element => "Element",
        }
    }
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageRole {
    type Err = StudioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "primary" | "principal" => Ok(Self::Primary),
            "background" | "fundo" => Ok(Self::Background),
            "element" | "elemento" => Ok(Self::Element),
            other => Err(StudioError::InvalidRequest(format!(
                "unknown role '{other}' (expected primary, background or element)"
            ))),
        }
    }
}

/// Where an uploaded image's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Bytes already held in memory.
    Bytes(Arc<[u8]>),
    /// A file read when the image is encoded.
    File(PathBuf),
}

impl ImageSource {
    /// Reads the full content.
    pub async fn load(&self) -> Result<Arc<[u8]>> {
        match self {
            Self::Bytes(bytes) => Ok(Arc::clone(bytes)),
            Self::File(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    StudioError::Encode(format!("failed to read {}: {}", path.display(), e))
                })?;
                Ok(bytes.into())
            }
        }
    }
}

/// A point-in-time copy of one registry entry, used to assemble a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    /// Content handle.
    pub source: ImageSource,
    /// Accepted MIME type.
    pub mime_type: String,
    /// Assigned role.
    pub role: ImageRole,
}

/// Base64 image data paired with its MIME type, as sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    /// Standard base64 payload.
    pub data: String,
    /// Declared MIME type.
    pub mime_type: String,
}

/// A single composed image returned by the remote model.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "composed image should be saved or displayed"]
pub struct ComposedImage {
    /// MIME type declared by the response part.
    pub mime_type: String,
    /// Base64 payload, as returned.
    pub data: String,
}

impl ComposedImage {
    /// Creates a composed image from a response part.
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Returns the image as a data URI, usable as a display or download source.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Decodes the payload to raw bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| StudioError::Decode(e.to_string()))
    }

    /// Returns the known format for the declared MIME type, if any.
    pub fn format(&self) -> Option<ImageFormat> {
        ImageFormat::from_mime_type(&self.mime_type)
    }

    /// Suggested filename for downloads.
    pub fn suggested_filename(&self) -> &'static str {
        DOWNLOAD_FILENAME
    }

    /// Decodes and writes the image to `path`. Returns the number of bytes written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<usize> {
        let bytes = self.decode()?;
        std::fs::write(path, &bytes)?;
        Ok(bytes.len())
    }
}

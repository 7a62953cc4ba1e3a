use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("unsupported file type '{0}': please upload a PNG or JPEG image")]
    UnsupportedMediaType(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Raster formats accepted as reference images.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/jpeg")]
    Jpeg,
}

impl MediaType {
    /// Parse a MIME string. Parameters (`; charset=...`) and case are ignored.
    pub fn parse(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim();
        if essence.eq_ignore_ascii_case("image/png") {
            Some(MediaType::Png)
        } else if essence.eq_ignore_ascii_case("image/jpeg") {
            Some(MediaType::Jpeg)
        } else {
            None
        }
    }

    /// Infer from a file extension (`png`, `jpg`, `jpeg`).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(MediaType::Png),
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Png => "image/png",
            MediaType::Jpeg => "image/jpeg",
        }
    }
}

/// A pending reference image, held base64-encoded until the next submit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub media_type: MediaType,
    /// Standard-alphabet base64 of the file bytes.
    pub data: String,
}

impl Attachment {
    /// Validate the declared MIME type and encode the bytes.
    pub fn from_bytes(mime: &str, bytes: &[u8]) -> Result<Self, AttachmentError> {
        let media_type = MediaType::parse(mime)
            .ok_or_else(|| AttachmentError::UnsupportedMediaType(mime.to_string()))?;
        Ok(Self {
            media_type,
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    }

    /// Read an image from disk, inferring the media type from its extension.
    pub fn from_path(path: &Path) -> Result<Self, AttachmentError> {
        let media_type = MediaType::from_path(path).ok_or_else(|| {
            AttachmentError::UnsupportedMediaType(
                path.extension()
                    .map(|e| e.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string()),
            )
        })?;
        let bytes = std::fs::read(path).map_err(|source| AttachmentError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_bytes(media_type.as_str(), &bytes)
    }
}

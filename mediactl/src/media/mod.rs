//! Media validation: content sniffing, size-bounded compression, and the upload validator that
//! combines them.
//!
//! - [`sniff`]: determine the true type of a buffer from its magic bytes
//! - [`compress`]: shrink an encoded image until it fits a byte budget
//! - [`validator`]: apply both to one or many uploaded files

pub mod compress;
pub mod sniff;
pub mod validator;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::UploadsConfig;

pub use compress::{CompressError, ImageCompressor};
pub use sniff::SniffResult;
pub use validator::UploadValidator;

/// Image formats the pipeline knows how to re-encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum ImageKind {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
}

impl ImageKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" => Some(ImageKind::Jpeg),
            "image/png" => Some(ImageKind::Png),
            _ => None,
        }
    }

    pub(crate) fn image_format(&self) -> image::ImageFormat {
        match self {
            ImageKind::Jpeg => image::ImageFormat::Jpeg,
            ImageKind::Png => image::ImageFormat::Png,
        }
    }
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// A file as received from the client. Nothing here is trusted except the byte length.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Client-declared filename
    pub filename: String,
    /// Client-declared MIME type
    pub content_type: Option<String>,
    pub buffer: Bytes,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content_type: Option<String>, buffer: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            buffer: buffer.into(),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// A file that passed validation and is ready to be stored.
#[derive(Debug, Clone)]
pub struct NormalizedFile {
    pub filename: String,
    pub declared_content_type: Option<String>,
    /// Type detected from the bytes; this is what gets stored as the object's content type
    pub kind: ImageKind,
    pub original_size_bytes: u64,
    /// Final buffer, at most the policy ceiling in length
    pub buffer: Bytes,
}

impl NormalizedFile {
    pub fn content_type(&self) -> &'static str {
        self.kind.mime_type()
    }

    pub fn size_bytes(&self) -> u64 {
        self.buffer.len() as u64
    }
}

/// Size ceiling, allowlist and loop guards applied to every upload.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionPolicy {
    pub max_size_bytes: u64,
    pub allowed_types: Vec<ImageKind>,
    /// Upper bound on resize/re-encode rounds before giving up
    pub max_iterations: u32,
    /// Images are never resized below this many pixels wide
    pub min_width: u32,
    pub jpeg_quality: u8,
}

impl CompressionPolicy {
    pub fn from_config(config: &UploadsConfig) -> Self {
        Self {
            max_size_bytes: config.max_size_bytes,
            allowed_types: config.allowed_types.clone(),
            max_iterations: config.max_iterations,
            min_width: config.min_width,
            jpeg_quality: config.jpeg_quality,
        }
    }

    pub fn allows(&self, kind: ImageKind) -> bool {
        self.allowed_types.contains(&kind)
    }
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self::from_config(&UploadsConfig::default())
    }
}

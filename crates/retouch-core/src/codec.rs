//! Boundary between sessions and file formats.

use std::fmt;
use std::path::Path;

use retouch_ops::{Image, OpError};
use serde::{Deserialize, Serialize};

/// Target format for exported images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Lossless PNG.
    #[default]
    Png,
    /// Baseline JPEG. Alpha is flattened.
    Jpeg,
    /// Uncompressed BMP.
    Bmp,
    /// Lossless WebP.
    WebP,
}

impl ExportFormat {
    /// Every format, PNG first.
    pub const ALL: [Self; 4] = [Self::Png, Self::Jpeg, Self::Bmp, Self::WebP];

    /// Canonical file extension, without the dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Bmp => "bmp",
            Self::WebP => "webp",
        }
    }

    /// Format for a file extension (case-insensitive, no dot).
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "bmp" => Some(Self::Bmp),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Format implied by a path's extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Errors produced by an [`ImageCodec`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The input byte slice was empty.
    #[error("input is empty")]
    EmptyInput,

    /// The bytes could not be decoded as an image.
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// The image could not be encoded in the requested format.
    #[error("failed to encode {format}: {reason}")]
    Encode {
        /// Requested format.
        format: ExportFormat,
        /// Encoder message.
        reason: String,
    },

    /// The decoded image cannot be edited (e.g. zero-sized).
    #[error(transparent)]
    Unusable(#[from] OpError),
}

/// Decodes file bytes into images and encodes images back to bytes.
///
/// Sessions only see this trait, which keeps file formats out of the
/// history engine and lets tests substitute an in-memory codec.
pub trait ImageCodec {
    /// Decode `bytes` into an image.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the bytes are empty, are not a supported
    /// image, or decode to an unusable image.
    fn decode(&self, bytes: &[u8]) -> Result<Image, CodecError>;

    /// Encode `image` as `format`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the encoder fails.
    fn encode(&self, image: &Image, format: ExportFormat) -> Result<Vec<u8>, CodecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_resolve() {
        assert_eq!(ExportFormat::from_extension("PNG"), Some(ExportFormat::Png));
        assert_eq!(ExportFormat::from_extension("jpeg"), Some(ExportFormat::Jpeg));
        assert_eq!(ExportFormat::from_extension("tiff"), None);
        for format in ExportFormat::ALL {
            assert_eq!(ExportFormat::from_extension(format.extension()), Some(format));
        }
    }

    #[test]
    fn path_extension_resolves() {
        assert_eq!(
            ExportFormat::from_path(Path::new("out/edges.WebP")),
            Some(ExportFormat::WebP)
        );
        assert_eq!(ExportFormat::from_path(Path::new("noext")), None);
    }
}

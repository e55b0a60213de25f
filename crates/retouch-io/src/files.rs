//! Loading and saving images on the local filesystem.

use std::fs;
use std::path::{Path, PathBuf};

use retouch_core::{CodecError, ExportFormat, ImageCodec};
use retouch_ops::Image;
use tracing::info;

use crate::codec::StdCodec;

/// Errors reading or writing image files.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// The file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// File that was written.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The path has no extension naming a supported format.
    #[error("cannot tell the image format of {} (use .png, .jpg, .bmp or .webp)", .0.display())]
    UnknownFormat(PathBuf),

    /// Decoding or encoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Export format implied by `path`'s extension.
///
/// # Errors
///
/// Returns [`IoError::UnknownFormat`] if the extension is missing or
/// not supported.
pub fn format_for_path(path: &Path) -> Result<ExportFormat, IoError> {
    ExportFormat::from_path(path).ok_or_else(|| IoError::UnknownFormat(path.to_path_buf()))
}

/// Read the raw bytes of an image file.
///
/// # Errors
///
/// Returns [`IoError::Read`] if the file cannot be read.
pub fn read_bytes(path: &Path) -> Result<Vec<u8>, IoError> {
    fs::read(path).map_err(|source| IoError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and decode an image file. The format is detected from the
/// contents, not the extension.
///
/// # Errors
///
/// Returns [`IoError::Read`] or [`IoError::Codec`].
pub fn load(path: &Path) -> Result<Image, IoError> {
    let image = StdCodec.decode(&read_bytes(path)?)?;
    info!(path = %path.display(), width = image.width(), height = image.height(), "image loaded");
    Ok(image)
}

/// Write already-encoded bytes to `path`.
///
/// # Errors
///
/// Returns [`IoError::Write`] if the file cannot be written.
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), IoError> {
    fs::write(path, bytes).map_err(|source| IoError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), bytes = bytes.len(), "image written");
    Ok(())
}

/// Encode `image` in the format named by `path`'s extension and write it.
///
/// # Errors
///
/// Returns [`IoError::UnknownFormat`], [`IoError::Codec`] or
/// [`IoError::Write`].
pub fn save(path: &Path, image: &Image) -> Result<(), IoError> {
    let format = format_for_path(path)?;
    write_bytes(path, &StdCodec.encode(image, format)?)
}

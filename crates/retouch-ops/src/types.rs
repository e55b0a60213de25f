//! Shared types for retouch operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::{ColorType, DynamicImage};
use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can build test fixtures
/// and inspect single-channel results without depending on `image`
/// directly.
pub use image::GrayImage;

/// Re-export `RgbImage` for the same reason as [`GrayImage`].
pub use image::RgbImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Numeric type of a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    /// 8-bit unsigned integer samples.
    U8,
    /// 16-bit unsigned integer samples.
    U16,
    /// 32-bit float samples in `[0, 1]`.
    F32,
}

/// Metadata describing an [`Image`] without its pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Width and height.
    pub dimensions: Dimensions,
    /// Number of channels, alpha included.
    pub channels: u8,
    /// Sample type shared by every channel.
    pub sample_type: SampleType,
    /// Whether the last channel is alpha.
    pub has_alpha: bool,
}

/// An immutable decoded image.
///
/// Pixels are shared behind an [`Arc`]: cloning an `Image` is cheap, and
/// nothing in this workspace mutates pixels once an `Image` exists.
/// Operations always produce a new `Image`.
///
/// Equality compares dimensions, colour type and every sample.
#[derive(Debug, Clone)]
pub struct Image(Arc<DynamicImage>);

impl Image {
    /// Wrap a decoded image.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::UnsupportedImage`] if the image has zero width
    /// or height.
    pub fn new(image: DynamicImage) -> Result<Self, OpError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(OpError::UnsupportedImage(format!(
                "image has no pixels ({}x{})",
                image.width(),
                image.height()
            )));
        }
        Ok(Self(Arc::new(image)))
    }

    /// Wrap the output of a kernel. Kernels preserve the input's
    /// (non-zero) dimensions, so the emptiness check is skipped.
    fn from_kernel(image: DynamicImage) -> Self {
        debug_assert!(image.width() > 0 && image.height() > 0);
        Self(Arc::new(image))
    }

    /// Wrap a single-channel kernel output.
    pub(crate) fn from_gray(image: GrayImage) -> Self {
        Self::from_kernel(DynamicImage::ImageLuma8(image))
    }

    /// Wrap a colour kernel output.
    pub(crate) fn from_rgb(image: RgbImage) -> Self {
        Self::from_kernel(DynamicImage::ImageRgb8(image))
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.0.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.0.height()
    }

    /// Width and height.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width(),
            height: self.height(),
        }
    }

    /// Number of channels, alpha included.
    #[must_use]
    pub fn channels(&self) -> u8 {
        self.0.color().channel_count()
    }

    /// Whether the image carries an alpha channel.
    #[must_use]
    pub fn has_alpha(&self) -> bool {
        self.0.color().has_alpha()
    }

    /// Whether the image holds a single colour channel (gray, with or
    /// without alpha).
    #[must_use]
    pub fn is_single_channel(&self) -> bool {
        self.channels() - u8::from(self.has_alpha()) == 1
    }

    /// Numeric type of the samples.
    #[must_use]
    pub fn sample_type(&self) -> SampleType {
        match self.0.color() {
            ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => {
                SampleType::U16
            }
            ColorType::Rgb32F | ColorType::Rgba32F => SampleType::F32,
            _ => SampleType::U8,
        }
    }

    /// Metadata snapshot.
    #[must_use]
    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            dimensions: self.dimensions(),
            channels: self.channels(),
            sample_type: self.sample_type(),
            has_alpha: self.has_alpha(),
        }
    }

    /// Size of the raw sample buffer in bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.0.as_bytes().len()
    }

    /// Borrow the underlying decoded image.
    #[must_use]
    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.0
    }

    /// 8-bit luma of the image (alpha dropped).
    #[must_use]
    pub fn to_luma8(&self) -> GrayImage {
        self.0.to_luma8()
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl TryFrom<GrayImage> for Image {
    type Error = OpError;

    fn try_from(image: GrayImage) -> Result<Self, Self::Error> {
        Self::new(DynamicImage::ImageLuma8(image))
    }
}

impl TryFrom<RgbImage> for Image {
    type Error = OpError;

    fn try_from(image: RgbImage) -> Result<Self, Self::Error> {
        Self::new(DynamicImage::ImageRgb8(image))
    }
}

/// Cooperative cancellation flag shared between a caller and a running
/// operation.
///
/// Iterative kernels poll the token between iterations and stop with
/// [`OpError::Cancelled`]. Single-pass kernels ignore it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes the request.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Return [`OpError::Cancelled`] if cancellation has been requested.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::Cancelled`] once [`cancel`](Self::cancel) has
    /// been called on any clone.
    pub fn check(&self) -> Result<(), OpError> {
        if self.is_cancelled() {
            Err(OpError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Errors produced while validating or running an operation.
///
/// Every variant is recoverable: the caller can re-prompt, pick another
/// operation, or retry. Serializable so worker replies and reports can
/// carry it.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum OpError {
    /// A parameter is missing, has the wrong type, or is outside its
    /// declared range.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Parameter name as it appears in the descriptor.
        name: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// The image's channel layout or sample type does not suit the
    /// operation.
    #[error("unsupported image: {0}")]
    UnsupportedImage(String),

    /// A descriptor was handed to a handler bound to another family.
    #[error("{found} is not a {expected} operation")]
    FamilyMismatch {
        /// Family the handler is bound to.
        expected: String,
        /// Kind named by the descriptor.
        found: String,
    },

    /// The operation name is not recognised.
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    /// The kernel failed while computing the result.
    #[error("operation failed: {0}")]
    Kernel(String),

    /// The operation stopped because cancellation was requested.
    #[error("operation cancelled")]
    Cancelled,
}

impl OpError {
    /// Shorthand for [`OpError::InvalidParameter`].
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

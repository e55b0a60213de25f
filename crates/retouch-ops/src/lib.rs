//! retouch-ops: Pure image operations (sans-IO).
//!
//! Every operation is a stateless transformation from one [`Image`] to a
//! new one. Operations are grouped into three families:
//!
//! - conversion: grayscale, hue visualisation (HSV)
//! - segmentation: Multi-Otsu, Chan-Vese, morphological snakes
//! - edge detection: Sobel, Scharr, Prewitt, Roberts
//!
//! Callers describe an operation with an untyped [`Descriptor`]
//! (kind + named parameters). A [`Handler`] checks the descriptor
//! against the parameter schema derived from [`Limits`] and produces a
//! typed [`Operation`], which is then run through the single
//! [`ImageOperation::apply`] contract.
//!
//! This crate has **no I/O dependencies** -- it never touches files or
//! threads. History, sessions and background execution live in
//! `retouch-core`; encoding and decoding live in `retouch-io`.

pub mod chan_vese;
pub mod conversion;
pub mod edge;
mod field;
pub mod handler;
pub mod morph_snakes;
pub mod multi_otsu;
pub mod operation;
pub mod params;
pub mod types;

pub use edge::EdgeDetector;
pub use handler::Handler;
pub use operation::{Descriptor, Family, ImageOperation, Operation, OperationKind};
pub use params::{Limits, ParamKind, ParamSpec, ParamValue, Params, Range};
pub use types::{
    CancelToken, Dimensions, GrayImage, Image, ImageInfo, OpError, RgbImage, SampleType,
};

/// Validate `descriptor` with the default [`Limits`] and apply it to `image`.
///
/// Convenience for one-off calls; long-lived callers should keep a
/// [`Handler`] bound to their configured limits instead.
///
/// # Errors
///
/// Returns [`OpError::InvalidParameter`] if a parameter is missing or out
/// of range, and [`OpError::UnsupportedImage`] if the operation cannot
/// run on this image.
pub fn apply(descriptor: &Descriptor, image: &Image) -> Result<Image, OpError> {
    Handler::for_kind(descriptor.kind, Limits::default()).run(
        descriptor,
        image,
        &CancelToken::new(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn color_image() -> Image {
        Image::new(image::DynamicImage::ImageRgb8(image::RgbImage::from_fn(
            16,
            16,
            |x, y| {
                if x < 8 {
                    image::Rgb([200, 40, 40])
                } else if y < 8 {
                    image::Rgb([20, 180, 60])
                } else {
                    image::Rgb([10, 10, 90])
                }
            },
        )))
        .unwrap()
    }

    #[test]
    fn apply_with_defaults_runs_every_kind() {
        let input = color_image();
        for kind in OperationKind::ALL {
            let result = apply(&Descriptor::with_defaults(kind), &input);
            assert!(result.is_ok(), "{kind} failed: {result:?}");
            let output = result.unwrap();
            assert_eq!(output.dimensions(), input.dimensions(), "{kind}");
        }
    }

    #[test]
    fn apply_rejects_missing_parameter() {
        let result = apply(&Descriptor::new(OperationKind::Sobel), &color_image());
        assert!(matches!(
            result,
            Err(OpError::InvalidParameter { ref name, .. }) if name == "threshold"
        ));
    }
}

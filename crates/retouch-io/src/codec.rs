//! [`ImageCodec`] backed by the `image` crate.

use std::borrow::Cow;
use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use retouch_core::{CodecError, ExportFormat, ImageCodec};
use retouch_ops::{Image, SampleType};
use tracing::debug;

/// Decodes PNG, JPEG, BMP and WebP; encodes the same set.
///
/// Images are converted to a layout each encoder accepts before
/// writing: JPEG gets 8-bit gray or RGB (alpha discarded), BMP and WebP
/// get 8-bit samples, PNG keeps 16-bit samples and converts float
/// samples to 8-bit.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdCodec;

impl ImageCodec for StdCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Image, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::EmptyInput);
        }
        let decoded =
            image::load_from_memory(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        debug!(
            width = decoded.width(),
            height = decoded.height(),
            color = ?decoded.color(),
            "image decoded"
        );
        Ok(Image::new(decoded)?)
    }

    fn encode(&self, image: &Image, format: ExportFormat) -> Result<Vec<u8>, CodecError> {
        let prepared = prepare(image, format);
        let mut bytes = Vec::new();
        prepared
            .write_to(&mut Cursor::new(&mut bytes), image_format(format))
            .map_err(|e| CodecError::Encode {
                format,
                reason: e.to_string(),
            })?;
        debug!(%format, bytes = bytes.len(), "image encoded");
        Ok(bytes)
    }
}

const fn image_format(format: ExportFormat) -> ImageFormat {
    match format {
        ExportFormat::Png => ImageFormat::Png,
        ExportFormat::Jpeg => ImageFormat::Jpeg,
        ExportFormat::Bmp => ImageFormat::Bmp,
        ExportFormat::WebP => ImageFormat::WebP,
    }
}

/// Convert `image` to a layout the encoder for `format` accepts,
/// borrowing when it already fits.
fn prepare(image: &Image, format: ExportFormat) -> Cow<'_, DynamicImage> {
    let dynamic = image.as_dynamic();
    let eight_bit = image.sample_type() == SampleType::U8;
    match format {
        ExportFormat::Jpeg => match dynamic {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => Cow::Borrowed(dynamic),
            _ if image.is_single_channel() => {
                Cow::Owned(DynamicImage::ImageLuma8(dynamic.to_luma8()))
            }
            _ => Cow::Owned(DynamicImage::ImageRgb8(dynamic.to_rgb8())),
        },
        ExportFormat::Png if image.sample_type() != SampleType::F32 => Cow::Borrowed(dynamic),
        ExportFormat::Bmp if eight_bit => Cow::Borrowed(dynamic),
        ExportFormat::WebP
            if matches!(
                dynamic,
                DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_)
            ) =>
        {
            Cow::Borrowed(dynamic)
        }
        _ if image.has_alpha() => Cow::Owned(DynamicImage::ImageRgba8(dynamic.to_rgba8())),
        _ if image.is_single_channel() && format != ExportFormat::WebP => {
            Cow::Owned(DynamicImage::ImageLuma8(dynamic.to_luma8()))
        }
        _ => Cow::Owned(DynamicImage::ImageRgb8(dynamic.to_rgb8())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Rgb32FImage, RgbaImage};

    use super::*;

    fn gray() -> Image {
        Image::try_from(GrayImage::from_fn(6, 4, |x, y| image::Luma([(x * 40 + y) as u8]))).unwrap()
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(StdCodec.decode(&[]), Err(CodecError::EmptyInput)));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            StdCodec.decode(b"definitely not an image"),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn png_round_trip_is_lossless() {
        let bytes = StdCodec.encode(&gray(), ExportFormat::Png).unwrap();
        assert_eq!(StdCodec.decode(&bytes).unwrap(), gray());
    }

    #[test]
    fn jpeg_of_rgba_drops_alpha() {
        let rgba = Image::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            8,
            8,
            image::Rgba([10, 200, 30, 128]),
        )))
        .unwrap();
        assert!(matches!(
            prepare(&rgba, ExportFormat::Jpeg),
            Cow::Owned(DynamicImage::ImageRgb8(_))
        ));
        let bytes = StdCodec.encode(&rgba, ExportFormat::Jpeg).unwrap();
        let back = StdCodec.decode(&bytes).unwrap();
        assert_eq!(back.dimensions(), rgba.dimensions());
        assert!(!back.has_alpha());
    }

    #[test]
    fn layouts_are_prepared_per_format() {
        assert!(matches!(prepare(&gray(), ExportFormat::Png), Cow::Borrowed(_)));
        assert!(matches!(prepare(&gray(), ExportFormat::Bmp), Cow::Borrowed(_)));
        assert!(matches!(
            prepare(&gray(), ExportFormat::WebP),
            Cow::Owned(DynamicImage::ImageRgb8(_))
        ));
        let float = Image::new(DynamicImage::ImageRgb32F(Rgb32FImage::new(2, 2))).unwrap();
        assert!(matches!(
            prepare(&float, ExportFormat::Png),
            Cow::Owned(DynamicImage::ImageRgb8(_))
        ));
    }

    #[test]
    fn every_format_encodes_gray_and_colour() {
        let colour = Image::try_from(retouch_ops::RgbImage::from_pixel(
            5,
            3,
            image::Rgb([1, 2, 3]),
        ))
        .unwrap();
        for format in ExportFormat::ALL {
            for image in [gray(), colour.clone()] {
                let bytes = StdCodec.encode(&image, format).unwrap();
                let back = StdCodec.decode(&bytes).unwrap();
                assert_eq!(back.dimensions(), image.dimensions(), "{format}");
            }
        }
    }
}

//! Colour conversions: grayscale and hue visualisation.
//!
//! Both conversions need colour input. A single-channel image (gray,
//! with or without alpha) has nothing to convert and is rejected with
//! [`OpError::UnsupportedImage`]. Alpha is dropped from the output.

use tracing::debug;

use crate::types::{GrayImage, Image, OpError, RgbImage};

/// Convert a colour image to 8-bit grayscale.
///
/// Uses the Rec. 709 luminance weights applied by the `image` crate:
/// `0.2126*R + 0.7152*G + 0.0722*B`.
///
/// # Errors
///
/// Returns [`OpError::UnsupportedImage`] if `image` is single-channel.
pub fn grayscale(image: &Image) -> Result<Image, OpError> {
    require_color(image, "grayscale")?;
    let gray: GrayImage = image.to_luma8();
    debug!(
        width = gray.width(),
        height = gray.height(),
        "grayscale conversion done"
    );
    Ok(Image::from_gray(gray))
}

/// Visualise the hue of a colour image.
///
/// Each pixel is converted to HSV, saturation and value are forced to
/// 1, and the result is converted back to 8-bit RGB. Only the hue of
/// the input survives, which makes colour regions easy to tell apart.
/// Achromatic pixels (R = G = B) have hue 0 and render as pure red.
///
/// # Errors
///
/// Returns [`OpError::UnsupportedImage`] if `image` is single-channel.
pub fn hsv(image: &Image) -> Result<Image, OpError> {
    require_color(image, "hsv")?;
    let rgb = image.as_dynamic().to_rgb32f();
    let out = RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        image::Rgb(hue_to_rgb8(hue_degrees(r, g, b)))
    });
    Ok(Image::from_rgb(out))
}

fn require_color(image: &Image, operation: &str) -> Result<(), OpError> {
    if image.is_single_channel() {
        return Err(OpError::UnsupportedImage(format!(
            "{operation} needs a colour image, got {} channel(s)",
            image.channels()
        )));
    }
    Ok(())
}

/// Hue in degrees `[0, 360)`. Achromatic colours map to 0.
fn hue_degrees(r: f32, g: f32, b: f32) -> f32 {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    if delta <= 0.0 {
        return 0.0;
    }
    let hue = if (max - r).abs() < f32::EPSILON {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if (max - g).abs() < f32::EPSILON {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    hue.rem_euclid(360.0)
}

/// Fully saturated, full-value colour for a hue.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::many_single_char_names
)]
fn hue_to_rgb8(hue: f32) -> [u8; 3] {
    let h = hue / 60.0;
    let sector = h.floor();
    let f = h - sector;
    let q = 1.0 - f;
    let t = f;
    let (r, g, b) = match sector as u32 % 6 {
        0 => (1.0, t, 0.0),
        1 => (q, 1.0, 0.0),
        2 => (0.0, 1.0, t),
        3 => (0.0, q, 1.0),
        4 => (t, 0.0, 1.0),
        _ => (1.0, 0.0, q),
    };
    // Truncation matches the float-to-u8 cast of the reference output.
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}

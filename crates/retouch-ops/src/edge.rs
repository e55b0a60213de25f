//! Gradient-magnitude edge detection with thresholding.
//!
//! Four classic operators are available through [`EdgeDetector`]. The
//! image is converted to 8-bit luma, the gradient magnitude is computed
//! with the matching `imageproc` kernels (borders clamp to the nearest
//! pixel), and pixels whose magnitude exceeds the threshold become
//! edges. The result is a binary image where white pixels (255) are
//! edges and black pixels (0) are background.
//!
//! Magnitudes are divided by `weight × 255 × √2`, where `weight` is the
//! response of one kernel to a unit step. A unit step therefore
//! produces a magnitude of at most 1, which keeps the threshold
//! meaningful in `[0, 1]` for every operator.

use std::f64::consts::SQRT_2;
use std::fmt;

use imageproc::gradients::gradients_grayscale;
use imageproc::kernel::{self, Kernel};
use serde::{Deserialize, Serialize};

use crate::field::mask_to_image;
use crate::types::{GrayImage, Image};

/// Selects the gradient operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDetector {
    /// 3x3 Sobel, smoothing weights `[1, 2, 1]`.
    Sobel,
    /// 3x3 Scharr, smoothing weights `[3, 10, 3]`. Better rotational
    /// symmetry than Sobel.
    Scharr,
    /// 3x3 Prewitt, smoothing weights `[1, 1, 1]`.
    Prewitt,
    /// 2x2 Roberts cross, differences along the two diagonals.
    Roberts,
}

impl EdgeDetector {
    /// Every detector, in menu order.
    pub const ALL: [Self; 4] = [Self::Sobel, Self::Scharr, Self::Prewitt, Self::Roberts];

    /// Horizontal and vertical gradient kernels.
    const fn kernels(self) -> (Kernel<'static, i32>, Kernel<'static, i32>) {
        match self {
            Self::Sobel => (kernel::SOBEL_HORIZONTAL_3X3, kernel::SOBEL_VERTICAL_3X3),
            Self::Scharr => (kernel::SCHARR_HORIZONTAL_3X3, kernel::SCHARR_VERTICAL_3X3),
            Self::Prewitt => (kernel::PREWITT_HORIZONTAL_3X3, kernel::PREWITT_VERTICAL_3X3),
            Self::Roberts => (kernel::ROBERTS_HORIZONTAL_2X2, kernel::ROBERTS_VERTICAL_2X2),
        }
    }

    /// Response of one kernel to a step from 0 to 1: the sum of its
    /// positive weights.
    const fn step_weight(self) -> f64 {
        match self {
            Self::Sobel => 4.0,
            Self::Scharr => 16.0,
            Self::Prewitt => 3.0,
            Self::Roberts => 1.0,
        }
    }

    /// Lowercase operator name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sobel => "sobel",
            Self::Scharr => "scharr",
            Self::Prewitt => "prewitt",
            Self::Roberts => "roberts",
        }
    }
}

impl fmt::Display for EdgeDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Detect edges and return the binary edge map.
///
/// `threshold` is compared against the normalised gradient magnitude;
/// pixels strictly above it are edges. A threshold of 0 marks every
/// pixel with any gradient.
#[must_use = "returns the binary edge map"]
pub fn detect(image: &Image, detector: EdgeDetector, threshold: f32) -> Image {
    let gray = image.to_luma8();
    let magnitude = gradient_magnitude(&gray, detector);
    let threshold = f64::from(threshold);
    mask_to_image(gray.width() as usize, gray.height() as usize, |i| {
        magnitude[i] > threshold
    })
}

/// Per-pixel gradient magnitude of `gray` (row-major), scaled to
/// `[0, 1]`.
pub(crate) fn gradient_magnitude(gray: &GrayImage, detector: EdgeDetector) -> Vec<f64> {
    let (horizontal, vertical) = detector.kernels();
    let scale = detector.step_weight() * 255.0 * SQRT_2;
    gradients_grayscale(gray, horizontal, vertical)
        .pixels()
        .map(|p| (f64::from(p.0[0]) / scale).min(1.0))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// 20x20 image with a sharp vertical boundary at x = 10.
    fn sharp_edge_image() -> Image {
        Image::try_from(GrayImage::from_fn(20, 20, |x, _y| {
            if x < 10 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        }))
        .unwrap()
    }

    fn edge_count(image: &Image) -> u32 {
        image
            .to_luma8()
            .pixels()
            .map(|p| u32::from(p.0[0] > 0))
            .sum()
    }

    #[test]
    fn blank_image_produces_no_edges() {
        let img = Image::try_from(GrayImage::from_pixel(20, 20, image::Luma([128]))).unwrap();
        for detector in EdgeDetector::ALL {
            let edges = detect(&img, detector, 0.0);
            assert_eq!(edge_count(&edges), 0, "{detector} found edges in a flat image");
        }
    }

    #[test]
    fn sharp_edge_detected_by_every_operator() {
        let img = sharp_edge_image();
        for detector in EdgeDetector::ALL {
            let edges = detect(&img, detector, 0.2).to_luma8();
            assert!(
                edges.get_pixel(9, 10).0[0] == 255 || edges.get_pixel(10, 10).0[0] == 255,
                "{detector} missed the boundary"
            );
            assert_eq!(edges.get_pixel(2, 10).0[0], 0, "{detector} marked flat area");
            assert_eq!(edges.get_pixel(17, 10).0[0], 0, "{detector} marked flat area");
        }
    }

    #[test]
    fn unit_step_magnitude_is_bounded() {
        let gray = sharp_edge_image().to_luma8();
        for detector in EdgeDetector::ALL {
            let magnitude = gradient_magnitude(&gray, detector);
            let max = magnitude.iter().copied().fold(0.0, f64::max);
            assert!(max > 0.5, "{detector} max magnitude {max}");
            assert!(max <= 1.0 + 1e-9, "{detector} max magnitude {max}");
        }
    }

    #[test]
    fn unit_step_response_is_scaled_per_operator() {
        let gray = sharp_edge_image().to_luma8();
        for (detector, expected) in [
            (EdgeDetector::Sobel, std::f64::consts::FRAC_1_SQRT_2),
            (EdgeDetector::Scharr, std::f64::consts::FRAC_1_SQRT_2),
            (EdgeDetector::Prewitt, std::f64::consts::FRAC_1_SQRT_2),
            (EdgeDetector::Roberts, 1.0),
        ] {
            let max = gradient_magnitude(&gray, detector)
                .into_iter()
                .fold(0.0, f64::max);
            assert!((max - expected).abs() < 3e-3, "{detector}: {max}");
        }
    }

    #[test]
    fn roberts_marks_the_pixel_after_the_step() {
        let edges = detect(&sharp_edge_image(), EdgeDetector::Roberts, 0.5).to_luma8();
        assert_eq!(edges.get_pixel(10, 5).0[0], 255);
        assert_eq!(edges.get_pixel(9, 5).0[0], 0);
    }

    #[test]
    fn threshold_of_one_suppresses_everything() {
        let img = sharp_edge_image();
        for detector in EdgeDetector::ALL {
            assert_eq!(edge_count(&detect(&img, detector, 1.0)), 0, "{detector}");
        }
    }

    #[test]
    fn output_is_single_channel_with_input_dimensions() {
        let img = Image::try_from(GrayImage::new(17, 31)).unwrap();
        let edges = detect(&img, EdgeDetector::Sobel, 0.5);
        assert_eq!(edges.channels(), 1);
        assert_eq!(edges.dimensions(), img.dimensions());
    }

    #[test]
    fn single_pixel_image_has_no_edges() {
        let img = Image::try_from(GrayImage::from_pixel(1, 1, image::Luma([200]))).unwrap();
        for detector in EdgeDetector::ALL {
            assert_eq!(edge_count(&detect(&img, detector, 0.0)), 0);
        }
    }
}

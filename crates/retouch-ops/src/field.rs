//! Dense scalar field used by the segmentation kernels.

use crate::types::{GrayImage, Image};

/// Row-major `f64` samples with edge-replicating reads.
#[derive(Debug, Clone)]
pub(crate) struct Field {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
}

impl Field {
    /// Luma of `image` scaled to `[0, 1]`, alpha dropped.
    pub fn luma(image: &Image) -> Self {
        let luma = image.as_dynamic().to_luma32f();
        Self {
            width: luma.width() as usize,
            height: luma.height() as usize,
            data: luma.as_raw().iter().map(|&v| f64::from(v)).collect(),
        }
    }

    /// Zero-filled field of the given size.
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub const fn len(&self) -> usize {
        self.width * self.height
    }

    pub const fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    /// Sample at `(x, y)`, clamping out-of-range coordinates to the
    /// nearest edge pixel.
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub fn at(&self, x: isize, y: isize) -> f64 {
        let cx = x.clamp(0, self.width as isize - 1) as usize;
        let cy = y.clamp(0, self.height as isize - 1) as usize;
        self.data[self.index(cx, cy)]
    }

    /// Rescale samples to span `[0, 1]`. A constant field becomes all
    /// zeros.
    pub fn normalized(mut self) -> Self {
        let min = self.data.iter().copied().fold(f64::INFINITY, f64::min);
        for v in &mut self.data {
            *v -= min;
        }
        let max = self.data.iter().copied().fold(0.0, f64::max);
        if max > 0.0 {
            for v in &mut self.data {
                *v /= max;
            }
        }
        self
    }
}

/// Render a binary mask as an 8-bit image: 255 where set, 0 elsewhere.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn mask_to_image(width: usize, height: usize, mask: impl Fn(usize) -> bool) -> Image {
    Image::from_gray(GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let i = y as usize * width + x as usize;
        image::Luma([if mask(i) { 255 } else { 0 }])
    }))
}

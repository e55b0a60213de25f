//! Morphological active contours without edges (MorphACWE).
//!
//! A binary level set approximation of Chan-Vese after Márquez-Neila,
//! Baumela and Álvarez (2014). Each iteration moves the contour with the
//! region fitting term, then smooths it with a morphological curvature
//! operator built from line erosions and dilations. Everything stays
//! binary, so no PDE is solved and the result is stable for any number
//! of iterations.

use tracing::debug;

use crate::field::{Field, mask_to_image};
use crate::types::{CancelToken, Image, OpError};

/// Side of the checkerboard cells of the initial level set.
const SQUARE: usize = 5;

/// Three-pixel line structuring elements: diagonal, vertical,
/// anti-diagonal and horizontal.
const LINES: [[(isize, isize); 3]; 4] = [
    [(-1, -1), (0, 0), (1, 1)],
    [(0, -1), (0, 0), (0, 1)],
    [(1, -1), (0, 0), (-1, 1)],
    [(-1, 0), (0, 0), (1, 0)],
];

/// Binary level set, row-major.
struct Mask {
    width: usize,
    height: usize,
    bits: Vec<bool>,
}

impl Mask {
    fn checkerboard(width: usize, height: usize) -> Self {
        let bits = (0..height)
            .flat_map(|y| (0..width).map(move |x| ((y / SQUARE) ^ (x / SQUARE)) & 1 == 1))
            .collect();
        Self {
            width,
            height,
            bits,
        }
    }

    /// Pixels outside the image read as unset.
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn get(&self, x: isize, y: isize) -> bool {
        x >= 0
            && y >= 0
            && (x as usize) < self.width
            && (y as usize) < self.height
            && self.bits[y as usize * self.width + x as usize]
    }

    fn value(&self, x: usize, y: usize) -> f64 {
        f64::from(u8::from(self.bits[y * self.width + x]))
    }

    /// `np.gradient`-style derivative along one axis: central differences
    /// inside, one-sided at the borders, zero when the axis has length 1.
    fn derivative(&self, x: usize, y: usize, horizontal: bool) -> f64 {
        let (pos, len) = if horizontal {
            (x, self.width)
        } else {
            (y, self.height)
        };
        if len < 2 {
            return 0.0;
        }
        let sample = |k: usize| {
            if horizontal {
                self.value(k, y)
            } else {
                self.value(x, k)
            }
        };
        if pos == 0 {
            sample(1) - sample(0)
        } else if pos == len - 1 {
            sample(len - 1) - sample(len - 2)
        } else {
            (sample(pos + 1) - sample(pos - 1)) / 2.0
        }
    }

    /// Supremum of line erosions (`erode`) or infimum of line dilations.
    #[allow(clippy::cast_possible_wrap)]
    fn morph(&self, erode: bool) -> Self {
        let mut bits = Vec::with_capacity(self.bits.len());
        for y in 0..self.height as isize {
            for x in 0..self.width as isize {
                let mut per_line = LINES.iter().map(|line| {
                    let mut points = line.iter().map(|&(dx, dy)| self.get(x + dx, y + dy));
                    if erode {
                        points.all(|b| b)
                    } else {
                        points.any(|b| b)
                    }
                });
                // Sup of erosions, inf of dilations.
                bits.push(if erode {
                    per_line.any(|b| b)
                } else {
                    per_line.all(|b| b)
                });
            }
        }
        Self {
            width: self.width,
            height: self.height,
            bits,
        }
    }

    fn sup_inf(&self) -> Self {
        self.morph(true)
    }

    fn inf_sup(&self) -> Self {
        self.morph(false)
    }

    /// One round of the curvature operator: SI∘IS when `inf_sup_first`,
    /// IS∘SI otherwise.
    fn curvature(&self, inf_sup_first: bool) -> Self {
        if inf_sup_first {
            self.inf_sup().sup_inf()
        } else {
            self.sup_inf().inf_sup()
        }
    }
}

/// Segment `image` with `iterations` contour updates, each followed by
/// `smoothing` rounds of the curvature operator.
///
/// Pixels inside the final contour become 255, the rest 0.
///
/// # Errors
///
/// Returns [`OpError::InvalidParameter`] if `iterations` is 0 and
/// [`OpError::Cancelled`] if `cancel` fires between iterations.
pub fn morph_snakes(
    image: &Image,
    iterations: u32,
    smoothing: u32,
    cancel: &CancelToken,
) -> Result<Image, OpError> {
    if iterations == 0 {
        return Err(OpError::invalid(
            "iterations",
            "at least one iteration is needed",
        ));
    }
    let intensity = Field::luma(image);
    let mut mask = Mask::checkerboard(intensity.width, intensity.height);
    // SI∘IS and IS∘SI alternate across every smoothing round of the run,
    // starting with SI∘IS.
    let mut inf_sup_first = true;

    for _ in 0..iterations {
        cancel.check()?;
        let (inside, outside) = region_means(&mask, &intensity);

        let mut next = mask.bits.clone();
        for y in 0..mask.height {
            for x in 0..mask.width {
                let gradient =
                    mask.derivative(x, y, true).abs() + mask.derivative(x, y, false).abs();
                let v = intensity.data[intensity.index(x, y)];
                let aux = gradient * ((v - inside).powi(2) - (v - outside).powi(2));
                if aux < 0.0 {
                    next[y * mask.width + x] = true;
                } else if aux > 0.0 {
                    next[y * mask.width + x] = false;
                }
            }
        }
        mask.bits = next;

        for _ in 0..smoothing {
            mask = mask.curvature(inf_sup_first);
            inf_sup_first = !inf_sup_first;
        }
    }
    debug!(iterations, smoothing, "morphological snakes finished");

    Ok(mask_to_image(mask.width, mask.height, |i| mask.bits[i]))
}

/// Mean intensity inside and outside the mask.
#[allow(clippy::cast_precision_loss)]
fn region_means(mask: &Mask, intensity: &Field) -> (f64, f64) {
    let (mut inside, mut count) = (0.0, 0_usize);
    let mut total = 0.0;
    for (&set, &v) in mask.bits.iter().zip(&intensity.data) {
        total += v;
        if set {
            inside += v;
            count += 1;
        }
    }
    let outside_count = mask.bits.len() - count;
    (
        inside / (count as f64 + 1e-8),
        (total - inside) / (outside_count as f64 + 1e-8),
    )
}

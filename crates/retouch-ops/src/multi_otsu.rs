//! Multi-level Otsu thresholding.
//!
//! Splits the 8-bit luma histogram into `classes` contiguous groups that
//! maximise the between-class variance, then paints each pixel with its
//! class index spread evenly over `0..=255`.
//!
//! Two classes reduce to the classic Otsu threshold, which is taken from
//! [`imageproc::contrast::otsu_level`]. More classes are solved exactly
//! with a dynamic programme over the distinct gray levels present in the
//! image, `O(classes * levels²)`.

use tracing::debug;

use crate::types::{GrayImage, Image, OpError};

/// Segment `image` into `classes` intensity regions.
///
/// A pixel with gray value `v` belongs to class `k` when exactly `k`
/// thresholds are strictly below `v`. Output gray is
/// `k * 255 / (classes - 1)`.
///
/// # Errors
///
/// Returns [`OpError::InvalidParameter`] if `classes < 2` or if the image
/// has fewer distinct gray levels than `classes`.
pub fn multi_otsu(image: &Image, classes: u8) -> Result<Image, OpError> {
    let gray = image.to_luma8();
    let thresholds = thresholds(&gray, classes)?;
    debug!(classes, ?thresholds, "multi-otsu thresholds computed");

    let top = u32::from(classes - 1);
    let out = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y).0[0];
        let class = thresholds.iter().filter(|&&t| value > t).count();
        #[allow(clippy::cast_possible_truncation)]
        let level = (class as u32 * 255 / top) as u8;
        image::Luma([level])
    });
    Ok(Image::from_gray(out))
}

/// Compute the `classes - 1` thresholds for `gray`, in ascending order.
///
/// # Errors
///
/// Returns [`OpError::InvalidParameter`] if `classes < 2` or the image
/// has fewer distinct gray levels than `classes`.
pub fn thresholds(gray: &GrayImage, classes: u8) -> Result<Vec<u8>, OpError> {
    if classes < 2 {
        return Err(OpError::invalid(
            "classes",
            format!("{classes} classes requested, at least 2 are needed"),
        ));
    }

    let mut histogram = [0_u64; 256];
    for pixel in gray.pixels() {
        histogram[usize::from(pixel.0[0])] += 1;
    }
    let levels: Vec<(u8, u64)> = (0..=u8::MAX)
        .zip(histogram)
        .filter(|&(_, count)| count > 0)
        .collect();

    if levels.len() < usize::from(classes) {
        return Err(OpError::invalid(
            "classes",
            format!(
                "image has only {} distinct gray level(s), cannot split into {classes} classes",
                levels.len()
            ),
        ));
    }

    if classes == 2 {
        let level = imageproc::contrast::otsu_level(gray);
        // The threshold must leave pixels on both sides to be usable.
        if levels.iter().any(|&(v, _)| v <= level) && levels.iter().any(|&(v, _)| v > level) {
            return Ok(vec![level]);
        }
    }

    Ok(optimal_partition(&levels, usize::from(classes)))
}

/// Exact maximisation of `Σ S_k² / N_k` over contiguous partitions of
/// `levels` into `classes` non-empty groups, where `N_k` is the pixel
/// count and `S_k` the intensity sum of group `k`. Returns the last
/// level of every group but the final one.
#[allow(clippy::cast_precision_loss)]
fn optimal_partition(levels: &[(u8, u64)], classes: usize) -> Vec<u8> {
    let n = levels.len();

    // Prefix sums of counts and intensity mass.
    let mut count = vec![0.0_f64; n + 1];
    let mut mass = vec![0.0_f64; n + 1];
    for (i, &(value, c)) in levels.iter().enumerate() {
        count[i + 1] = count[i] + c as f64;
        mass[i + 1] = f64::from(value).mul_add(c as f64, mass[i]);
    }
    // Score of the group covering levels[a..b].
    let score = |a: usize, b: usize| {
        let s = mass[b] - mass[a];
        s * s / (count[b] - count[a])
    };

    // best[k][j]: best score splitting levels[..j] into k + 1 groups.
    // cut[k][j]: start index of the last group in that split.
    let mut best = vec![vec![f64::NEG_INFINITY; n + 1]; classes];
    let mut cut = vec![vec![0_usize; n + 1]; classes];
    for j in 1..=n {
        best[0][j] = score(0, j);
    }
    for k in 1..classes {
        for j in (k + 1)..=n {
            for i in k..j {
                let candidate = best[k - 1][i] + score(i, j);
                if candidate > best[k][j] {
                    best[k][j] = candidate;
                    cut[k][j] = i;
                }
            }
        }
    }

    let mut thresholds = Vec::with_capacity(classes - 1);
    let mut end = n;
    for k in (1..classes).rev() {
        let start = cut[k][end];
        thresholds.push(levels[start - 1].0);
        end = start;
    }
    thresholds.reverse();
    thresholds
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Three flat bands: 30, 120, 220.
    fn three_band_image() -> GrayImage {
        GrayImage::from_fn(30, 10, |x, _| {
            image::Luma([match x {
                0..10 => 30,
                10..20 => 120,
                _ => 220,
            }])
        })
    }

    #[test]
    fn zero_classes_is_invalid() {
        let result = multi_otsu(&Image::try_from(three_band_image()).unwrap(), 0);
        assert!(matches!(
            result,
            Err(OpError::InvalidParameter { ref name, .. }) if name == "classes"
        ));
    }

    #[test]
    fn too_few_distinct_levels_is_invalid() {
        let flat = GrayImage::from_pixel(8, 8, image::Luma([77]));
        assert!(matches!(
            thresholds(&flat, 2),
            Err(OpError::InvalidParameter { .. })
        ));
        assert!(thresholds(&three_band_image(), 4).is_err());
    }

    #[test]
    fn three_bands_split_between_bands() {
        let t = thresholds(&three_band_image(), 3).unwrap();
        assert_eq!(t.len(), 2);
        assert!((30..120).contains(&t[0]), "first threshold {t:?}");
        assert!((120..220).contains(&t[1]), "second threshold {t:?}");
    }

    #[test]
    fn three_bands_render_as_three_levels() {
        let out = multi_otsu(&Image::try_from(three_band_image()).unwrap(), 3)
            .unwrap()
            .to_luma8();
        assert_eq!(out.get_pixel(5, 5).0[0], 0);
        assert_eq!(out.get_pixel(15, 5).0[0], 127);
        assert_eq!(out.get_pixel(25, 5).0[0], 255);
    }

    #[test]
    fn two_classes_separate_bimodal_image() {
        let img = GrayImage::from_fn(20, 20, |x, _| image::Luma([if x < 7 { 40 } else { 200 }]));
        let out = multi_otsu(&Image::try_from(img).unwrap(), 2).unwrap().to_luma8();
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(19, 19).0[0], 255);
    }

    #[test]
    fn partition_matches_brute_force_for_two_thresholds() {
        let levels: Vec<(u8, u64)> = vec![(10, 5), (20, 9), (60, 2), (90, 7), (200, 4), (250, 1)];
        let group = |a: usize, b: usize| {
            let (s, c) = levels[a..b].iter().fold((0.0, 0.0), |(s, c), &(v, n)| {
                #[allow(clippy::cast_precision_loss)]
                let n = n as f64;
                (f64::from(v).mul_add(n, s), c + n)
            });
            s * s / c
        };
        let mut best = (f64::NEG_INFINITY, 0, 0);
        for i in 1..levels.len() {
            for j in (i + 1)..levels.len() {
                let total = group(0, i) + group(i, j) + group(j, levels.len());
                if total > best.0 {
                    best = (total, i, j);
                }
            }
        }
        let expected = vec![levels[best.1 - 1].0, levels[best.2 - 1].0];
        assert_eq!(optimal_partition(&levels, 3), expected);
    }

    #[test]
    fn output_preserves_dimensions() {
        let out = multi_otsu(&Image::try_from(three_band_image()).unwrap(), 2).unwrap();
        assert_eq!(out.width(), 30);
        assert_eq!(out.height(), 10);
        assert_eq!(out.channels(), 1);
    }
}

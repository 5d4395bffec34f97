//! Background re-thresholding and connected-component artifact cleanup.
//!
//! The soft cutout (composite blended against white through the refined
//! matte) is blurred and classified per pixel: a pixel is background if
//! every channel lies inside the configured backdrop band, or if its
//! gray value is near white. Two size filters then run on the result:
//!
//! - **black artifacts**: foreground components of at most
//!   `min_artifact_black` pixels become background;
//! - **white artifacts**: background components of at most
//!   `min_artifact_white` pixels become foreground (holes are filled).
//!
//! A filter that would remove every component of its polarity is skipped
//! and the skip is recorded in the [`CleanupReport`], so the cleaner
//! never turns a non-empty mask into an empty one.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::contour::label_bound;
use crate::types::{BACKGROUND, CleanupReport, FOREGROUND, MatteConfig, RgbImage};

/// Classify each pixel of `cutout` as foreground or background.
///
/// `cutout` is blurred with `config.blur_sigma` first. Background means
/// all three channels in `[background_min, background_max]`, or a
/// grayscale value at or above `near_white`.
#[must_use]
pub fn band_threshold(cutout: &RgbImage, config: &MatteConfig) -> GrayImage {
    let blurred = crate::blur::gaussian_blur_rgb(cutout, config.blur_sigma);
    let gray = crate::grayscale::to_gray(&blurred);
    let (lo, hi) = (config.background_min, config.background_max);
    GrayImage::from_fn(cutout.width(), cutout.height(), |x, y| {
        let p = blurred.get_pixel(x, y).0;
        let in_band = p.iter().all(|&c| (lo..=hi).contains(&f32::from(c)));
        let near_white = gray.get_pixel(x, y).0[0] >= config.near_white;
        Luma([if in_band || near_white {
            BACKGROUND
        } else {
            FOREGROUND
        }])
    })
}

/// Outcome of one size filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FilterOutcome {
    removed: usize,
    fallback: bool,
}

/// Flip every `polarity` component smaller than `min_size` pixels to the
/// opposite value. If that would flip all of them, leave `mask` unchanged
/// and report a fallback.
fn filter_components(mask: &mut GrayImage, polarity: u8, min_size: u32) -> FilterOutcome {
    let opposite = if polarity == FOREGROUND {
        BACKGROUND
    } else {
        FOREGROUND
    };

    // connected_components labels non-background pixels, so label the
    // requested polarity by mapping it to non-zero.
    let selected = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([u8::from(mask.get_pixel(x, y).0[0] == polarity)])
    });
    let labels = connected_components(&selected, Connectivity::Eight, Luma([0u8]));

    let mut sizes = vec![0u64; label_bound(&labels)];
    for p in labels.pixels() {
        sizes[p.0[0] as usize] += 1;
    }
    let components = sizes.iter().skip(1).filter(|&&s| s > 0).count();
    let small: Vec<bool> = sizes
        .iter()
        .enumerate()
        .map(|(label, &s)| label != 0 && s > 0 && s <= u64::from(min_size))
        .collect();
    let removed = small.iter().filter(|&&s| s).count();

    if components > 0 && removed == components {
        return FilterOutcome {
            removed: 0,
            fallback: true,
        };
    }

    for (x, y, label) in labels.enumerate_pixels() {
        if small[label.0[0] as usize] {
            mask.put_pixel(x, y, Luma([opposite]));
        }
    }
    FilterOutcome {
        removed,
        fallback: false,
    }
}

/// Apply the black then white artifact filters to a binary mask.
#[must_use]
pub fn filter_artifacts(
    binary: &GrayImage,
    min_black: u32,
    min_white: u32,
) -> (GrayImage, CleanupReport) {
    let mut mask = binary.clone();
    let foreground_before = count_foreground(&mask);

    let black = filter_components(&mut mask, FOREGROUND, min_black);
    if black.fallback {
        tracing::warn!(
            min_black,
            "every foreground component is below the black artifact size, keeping them"
        );
    }
    let white = filter_components(&mut mask, BACKGROUND, min_white);
    if white.fallback {
        tracing::warn!(
            min_white,
            "every background component is below the white artifact size, keeping them"
        );
    }

    let report = CleanupReport {
        foreground_before,
        foreground_after: count_foreground(&mask),
        black_components_removed: black.removed,
        white_components_filled: white.removed,
        black_fallback: black.fallback,
        white_fallback: white.fallback,
    };
    (mask, report)
}

/// Re-threshold a soft cutout against the backdrop band and remove
/// artifacts.
#[must_use]
pub fn clean(cutout: &RgbImage, config: &MatteConfig) -> (GrayImage, CleanupReport) {
    let binary = band_threshold(cutout, config);
    filter_artifacts(
        &binary,
        config.min_artifact_black,
        config.min_artifact_white,
    )
}

/// Number of [`FOREGROUND`] pixels in `mask`.
#[must_use]
pub fn count_foreground(mask: &GrayImage) -> u64 {
    mask.pixels().filter(|p| p.0[0] == FOREGROUND).count() as u64
}

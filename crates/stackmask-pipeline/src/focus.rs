//! Frame sharpness scoring.
//!
//! The focus measure is the variance of the discrete Laplacian (kernel
//! `[0 1 0; 1 -4 1; 0 1 0]`) after a 3x3 median blur, following
//! Pech-Pacheco et al., "Diatom autofocusing in brightfield microscopy"
//! (ICPR 2000). In-focus frames have strong, high-frequency Laplacian
//! responses and therefore a high variance.
//!
//! Frames are scored on a reduced copy (see [`FocusConfig::scale`]) so
//! that a full burst can be classified quickly; the reduction is
//! deterministic for a given scale.

use image::GrayImage;

use crate::types::{FocusClass, FocusConfig, PipelineError};

/// Variance of the Laplacian of `image` after 3x3 median noise
/// suppression.
///
/// Returns 0.0 for an empty image.
#[must_use]
pub fn variance_of_laplacian(image: &GrayImage) -> f64 {
    if image.width() == 0 || image.height() == 0 {
        return 0.0;
    }
    let denoised = imageproc::filter::median_filter(image, 1, 1);
    let laplacian = imageproc::filter::laplacian_filter(&denoised);

    #[allow(clippy::cast_precision_loss)]
    let n = laplacian.pixels().len() as f64;
    let mean = laplacian.pixels().map(|p| f64::from(p.0[0])).sum::<f64>() / n;
    laplacian
        .pixels()
        .map(|p| {
            let d = f64::from(p.0[0]) - mean;
            d * d
        })
        .sum::<f64>()
        / n
}

/// Score a full-resolution grayscale frame: reduce it by `scale`, then
/// take the [`variance_of_laplacian`].
#[must_use]
pub fn sharpness(image: &GrayImage, scale: f32) -> f64 {
    let reduced = crate::downsample::scale_gray(image, scale);
    variance_of_laplacian(&reduced)
}

/// Classify a sharpness score against a threshold.
///
/// Scores strictly below `threshold` are [`FocusClass::Blurry`].
#[must_use]
pub fn classify(score: f64, threshold: f64) -> FocusClass {
    if score < threshold {
        FocusClass::Blurry
    } else {
        FocusClass::Usable
    }
}

/// Decode an encoded frame and score it.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] or [`PipelineError::ImageDecode`]
/// if the frame cannot be decoded.
pub fn score_bytes(bytes: &[u8], config: &FocusConfig) -> Result<(f64, FocusClass), PipelineError> {
    let gray = crate::grayscale::decode_and_grayscale(bytes)?;
    let score = sharpness(&gray, config.scale);
    Ok((score, classify(score, config.threshold)))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Checkerboard with `cell`-pixel squares.
    fn checkerboard(size: u32, cell: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if ((x / cell) + (y / cell)) % 2 == 0 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn uniform_image_scores_zero() {
        let img = GrayImage::from_pixel(32, 32, image::Luma([90]));
        assert!(variance_of_laplacian(&img).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_image_scores_zero() {
        assert!(variance_of_laplacian(&GrayImage::new(0, 0)).abs() < f64::EPSILON);
    }

    #[test]
    fn sharp_image_scores_higher_than_blurred() {
        let sharp = checkerboard(64, 4);
        let blurred = crate::blur::gaussian_blur(&sharp, 3.0);
        let sharp_score = variance_of_laplacian(&sharp);
        let blurred_score = variance_of_laplacian(&blurred);
        assert!(
            sharp_score > blurred_score * 4.0,
            "sharp={sharp_score} blurred={blurred_score}"
        );
    }

    #[test]
    fn scoring_is_deterministic() {
        let img = checkerboard(100, 10);
        assert!((sharpness(&img, 0.5) - sharpness(&img, 0.5)).abs() < f64::EPSILON);
    }

    #[test]
    fn classify_threshold_boundary() {
        assert_eq!(classify(9.99, 10.0), FocusClass::Blurry);
        assert_eq!(classify(10.0, 10.0), FocusClass::Usable);
        assert_eq!(classify(250.0, 10.0), FocusClass::Usable);
    }

    #[test]
    fn score_bytes_rejects_empty_input() {
        let result = score_bytes(&[], &FocusConfig::default());
        assert!(matches!(result, Err(PipelineError::EmptyInput)));
    }
}

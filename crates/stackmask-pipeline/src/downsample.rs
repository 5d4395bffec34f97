//! Resampling between the composite resolution and the working resolution.
//!
//! Segmentation cost grows with pixel count, so composites are reduced
//! until the longest axis matches the configured working resolution, and
//! the resulting mask is scaled back up afterwards.
//!
//! If the image is already at or below the target resolution, it is
//! returned unchanged.

use std::fmt;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::types::{BACKGROUND, Dimensions, FOREGROUND, GrayImage, RgbImage};

/// Resampling filter used when downsampling.
///
/// Ordered from fastest/lowest-quality to slowest/highest-quality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownsampleFilter {
    /// Nearest-neighbor: fastest, blocky artifacts.
    Nearest,
    /// Bilinear interpolation: fast, decent quality.
    #[default]
    Triangle,
    /// Bicubic (Catmull-Rom): moderate speed, good quality.
    CatmullRom,
    /// Gaussian: moderate speed, smooth output.
    Gaussian,
    /// Lanczos with 3 lobes: slowest, sharpest/best for photos.
    Lanczos3,
}

impl DownsampleFilter {
    /// Convert to the `image` crate's `FilterType`.
    const fn to_image_filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Gaussian => FilterType::Gaussian,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

impl fmt::Display for DownsampleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => f.write_str("Nearest"),
            Self::Triangle => f.write_str("Triangle"),
            Self::CatmullRom => f.write_str("CatmullRom"),
            Self::Gaussian => f.write_str("Gaussian"),
            Self::Lanczos3 => f.write_str("Lanczos3"),
        }
    }
}

/// Dimensions after fitting `dims` inside a `max_dimension` square,
/// preserving aspect ratio. Each side is at least one pixel.
#[must_use]
pub fn fit_within(dims: Dimensions, max_dimension: u32) -> Dimensions {
    let long_axis = dims.width.max(dims.height);
    if long_axis <= max_dimension {
        return dims;
    }
    let scale = f64::from(max_dimension) / f64::from(long_axis);
    Dimensions {
        width: scaled_side(dims.width, scale),
        height: scaled_side(dims.height, scale),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scaled_side(side: u32, scale: f64) -> u32 {
    ((f64::from(side) * scale).round() as u32).max(1)
}

/// Downsample a composite so the longest axis is at most
/// `max_dimension` pixels, using the specified resampling filter.
///
/// Returns the (possibly unchanged) image and whether downsampling
/// was actually applied.
#[must_use]
pub fn downsample(
    image: &RgbImage,
    max_dimension: u32,
    filter: DownsampleFilter,
) -> (RgbImage, bool) {
    let dims = Dimensions {
        width: image.width(),
        height: image.height(),
    };
    let target = fit_within(dims, max_dimension);
    if target == dims {
        return (image.clone(), false);
    }
    let resized = image::imageops::resize(
        image,
        target.width,
        target.height,
        filter.to_image_filter(),
    );
    (resized, true)
}

/// Scale a grayscale image by a linear factor (used for fast focus
/// scoring). Factors at or above 1.0 return the image unchanged.
#[must_use]
pub fn scale_gray(image: &GrayImage, factor: f32) -> GrayImage {
    if !(factor > 0.0 && factor < 1.0) {
        return image.clone();
    }
    let factor = f64::from(factor);
    let width = scaled_side(image.width(), factor);
    let height = scaled_side(image.height(), factor);
    image::imageops::resize(image, width, height, FilterType::Triangle)
}

/// Resize a binary mask to `target` and re-binarize it.
///
/// Interpolation produces intermediate values along the boundary; pixels
/// at or above the midpoint become foreground so the result stays
/// strictly binary.
#[must_use]
pub fn upscale_mask(mask: &GrayImage, target: Dimensions) -> GrayImage {
    if mask.width() == target.width && mask.height() == target.height {
        return mask.clone();
    }
    let resized = image::imageops::resize(mask, target.width, target.height, FilterType::Triangle);
    GrayImage::from_fn(target.width, target.height, |x, y| {
        if resized.get_pixel(x, y).0[0] >= 128 {
            image::Luma([FOREGROUND])
        } else {
            image::Luma([BACKGROUND])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, image::Rgb([128, 128, 128]))
    }

    #[test]
    fn default_filter_is_triangle() {
        assert_eq!(DownsampleFilter::default(), DownsampleFilter::Triangle);
    }

    #[test]
    fn no_downsample_when_already_small() {
        let img = test_image(100, 80);
        let (result, applied) = downsample(&img, 256, DownsampleFilter::Triangle);
        assert!(!applied);
        assert_eq!(result.dimensions(), (100, 80));
    }

    #[test]
    fn no_downsample_when_exact_match() {
        let img = test_image(256, 200);
        let (result, applied) = downsample(&img, 256, DownsampleFilter::Triangle);
        assert!(!applied);
        assert_eq!(result.dimensions(), (256, 200));
    }

    #[test]
    fn downsample_landscape() {
        let img = test_image(1024, 768);
        let (result, applied) = downsample(&img, 256, DownsampleFilter::Triangle);
        assert!(applied);
        assert_eq!(result.dimensions(), (256, 192));
    }

    #[test]
    fn downsample_portrait() {
        let img = test_image(600, 1200);
        let (result, applied) = downsample(&img, 256, DownsampleFilter::Lanczos3);
        assert!(applied);
        assert_eq!(result.dimensions(), (128, 256));
    }

    #[test]
    fn fit_within_keeps_at_least_one_pixel() {
        let dims = fit_within(
            Dimensions {
                width: 10_000,
                height: 1,
            },
            100,
        );
        assert_eq!(dims.width, 100);
        assert_eq!(dims.height, 1);
    }

    #[test]
    fn scale_gray_reduces_dimensions() {
        let img = GrayImage::new(200, 100);
        let scaled = scale_gray(&img, 0.15);
        assert_eq!(scaled.dimensions(), (30, 15));
    }

    #[test]
    fn scale_gray_ignores_non_shrinking_factor() {
        let img = GrayImage::new(20, 10);
        assert_eq!(scale_gray(&img, 1.0).dimensions(), (20, 10));
        assert_eq!(scale_gray(&img, 0.0).dimensions(), (20, 10));
    }

    #[test]
    fn upscale_mask_is_strictly_binary() {
        let mask = GrayImage::from_fn(10, 10, |x, _| {
            if x < 5 {
                image::Luma([FOREGROUND])
            } else {
                image::Luma([BACKGROUND])
            }
        });
        let up = upscale_mask(
            &mask,
            Dimensions {
                width: 37,
                height: 23,
            },
        );
        assert_eq!(up.dimensions(), (37, 23));
        assert!(up.pixels().all(|p| p.0[0] == FOREGROUND || p.0[0] == BACKGROUND));
        assert_eq!(up.get_pixel(0, 0).0[0], FOREGROUND);
        assert_eq!(up.get_pixel(36, 22).0[0], BACKGROUND);
    }
}

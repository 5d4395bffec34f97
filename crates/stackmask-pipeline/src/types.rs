//! Shared types for the stackmask matte pipeline.

use serde::{Deserialize, Serialize};

use crate::downsample::DownsampleFilter;

/// Re-export `GrayImage` so downstream crates can reference masks and
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage`, the pixel layout of a composite.
pub use image::RgbImage;

/// Re-export `RgbaImage`, the pixel layout of an alpha cutout.
pub use image::RgbaImage;

/// Mask pixel value for foreground.
pub const FOREGROUND: u8 = 255;

/// Mask pixel value for background.
pub const BACKGROUND: u8 = 0;

/// Returns `true` if every pixel of `mask` is [`FOREGROUND`] or
/// [`BACKGROUND`].
#[must_use]
pub fn is_binary(mask: &GrayImage) -> bool {
    mask.pixels()
        .all(|p| p.0[0] == FOREGROUND || p.0[0] == BACKGROUND)
}

/// A pixel position on the image grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    /// Column (pixels from left edge).
    pub x: u32,
    /// Row (pixels from top edge).
    pub y: u32,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// An ordered, closed boundary traced around a foreground region.
///
/// The last point connects back to the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contour(Vec<Point>);

impl Contour {
    /// Create a contour from its boundary points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the contour has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of boundary points.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns a slice of all boundary points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Enclosed area in square pixels (shoelace formula over the
    /// boundary polygon).
    ///
    /// Degenerate contours (fewer than three points, or collinear points)
    /// have zero area.
    #[must_use]
    pub fn area(&self) -> f64 {
        if self.0.len() < 3 {
            return 0.0;
        }
        let twice: i64 = self
            .0
            .iter()
            .zip(self.0.iter().cycle().skip(1))
            .map(|(a, b)| {
                i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y)
            })
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let area = twice.unsigned_abs() as f64 / 2.0;
        area
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Classification of a single frame's sharpness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocusClass {
    /// Sharp enough to contribute to a stack.
    Usable,
    /// Too blurry; excluded from stacking.
    Blurry,
}

/// Configuration for frame sharpness scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    /// Frames scoring below this variance-of-Laplacian value are blurry.
    pub threshold: f64,

    /// Linear scale factor applied before scoring (0.0, 1.0].
    pub scale: f32,
}

impl FocusConfig {
    /// Default blur threshold.
    pub const DEFAULT_THRESHOLD: f64 = 10.0;
    /// Default downsampling scale (15 % of the original linear size).
    pub const DEFAULT_SCALE: f32 = 0.15;
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            threshold: Self::DEFAULT_THRESHOLD,
            scale: Self::DEFAULT_SCALE,
        }
    }
}

/// Configuration for the matte (mask extraction) pipeline.
///
/// All parameters have defaults matching the scanner's stock settings.
/// Call [`validate`](Self::validate) before use when values come from an
/// untrusted source (CLI flags, project files).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatteConfig {
    /// Process at full resolution instead of downscaling to
    /// `working_resolution`.
    pub full_resolution: bool,

    /// Longest side of the working image when `full_resolution` is off.
    pub working_resolution: u32,

    /// Resampling filter used when downscaling to the working resolution.
    pub downsample_filter: DownsampleFilter,

    /// Contrast-limited adaptive histogram equalization clip limit.
    pub clahe_clip_limit: f32,

    /// Number of CLAHE tiles along each axis.
    pub clahe_grid: u32,

    /// Gaussian sigma applied before and after local-contrast enhancement.
    pub blur_sigma: f32,

    /// Sharpness enhancement factor applied after CLAHE (1.0 = unchanged).
    pub sharpen_factor: f32,

    /// Edge responses at or above this value (0-255) are kept when
    /// binarizing the edge map.
    pub edge_threshold: u8,

    /// Cap on salt-and-pepper median iterations.
    pub denoise_iterations: u32,

    /// Radius of the square structuring element used to erode the
    /// definite-foreground core (2 = 5x5 kernel).
    pub core_erosion_radius: u8,

    /// Number of erosion passes for the definite-foreground core.
    pub core_erosion_iterations: u32,

    /// Foreground/background energy minimization iterations.
    pub grabcut_iterations: u32,

    /// Lower bound of the background gray band (per channel, 0-255).
    pub background_min: f32,

    /// Upper bound of the background gray band (per channel, 0-255).
    pub background_max: f32,

    /// Grayscale value at or above which a pixel is treated as background.
    pub near_white: u8,

    /// Foreground components of at most this many pixels are removed.
    pub min_artifact_black: u32,

    /// Background islands of at most this many pixels are filled.
    pub min_artifact_white: u32,
}

impl MatteConfig {
    /// Default working resolution (longest side, pixels).
    pub const DEFAULT_WORKING_RESOLUTION: u32 = 1500;
    /// Default CLAHE clip limit.
    pub const DEFAULT_CLAHE_CLIP_LIMIT: f32 = 1.0;
    /// Default CLAHE tile grid.
    pub const DEFAULT_CLAHE_GRID: u32 = 7;
    /// Sigma equivalent to a 5x5 Gaussian kernel.
    pub const DEFAULT_BLUR_SIGMA: f32 = 1.1;
    /// Default sharpness enhancement after CLAHE.
    pub const DEFAULT_SHARPEN_FACTOR: f32 = 31.0;
    /// Default edge binarization threshold.
    pub const DEFAULT_EDGE_THRESHOLD: u8 = 24;
    /// Default salt-and-pepper iteration cap.
    pub const DEFAULT_DENOISE_ITERATIONS: u32 = 70;
    /// Default core erosion radius (5x5 kernel).
    pub const DEFAULT_CORE_EROSION_RADIUS: u8 = 2;
    /// Default core erosion passes.
    pub const DEFAULT_CORE_EROSION_ITERATIONS: u32 = 10;
    /// Default refinement iterations.
    pub const DEFAULT_GRABCUT_ITERATIONS: u32 = 5;
    /// Default lower background band bound.
    pub const DEFAULT_BACKGROUND_MIN: f32 = 80.0;
    /// Default upper background band bound.
    pub const DEFAULT_BACKGROUND_MAX: f32 = 100.0;
    /// Default near-white cut-off.
    pub const DEFAULT_NEAR_WHITE: u8 = 254;
    /// Default black artifact minimum size.
    pub const DEFAULT_MIN_ARTIFACT_BLACK: u32 = 1000;
    /// Default white artifact minimum size.
    pub const DEFAULT_MIN_ARTIFACT_WHITE: u32 = 2000;

    /// Check the configuration for values the pipeline cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the first
    /// offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.working_resolution == 0 {
            return Err(PipelineError::InvalidConfig(
                "working_resolution must be positive".to_string(),
            ));
        }
        if self.clahe_grid == 0 {
            return Err(PipelineError::InvalidConfig(
                "clahe_grid must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("clahe_clip_limit", self.clahe_clip_limit),
            ("blur_sigma", self.blur_sigma),
            ("sharpen_factor", self.sharpen_factor),
            ("background_min", self.background_min),
            ("background_max", self.background_max),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if self.background_min > self.background_max {
            return Err(PipelineError::InvalidConfig(format!(
                "background_min ({}) > background_max ({})",
                self.background_min, self.background_max
            )));
        }
        Ok(())
    }
}

impl Default for MatteConfig {
    fn default() -> Self {
        Self {
            full_resolution: false,
            working_resolution: Self::DEFAULT_WORKING_RESOLUTION,
            downsample_filter: DownsampleFilter::default(),
            clahe_clip_limit: Self::DEFAULT_CLAHE_CLIP_LIMIT,
            clahe_grid: Self::DEFAULT_CLAHE_GRID,
            blur_sigma: Self::DEFAULT_BLUR_SIGMA,
            sharpen_factor: Self::DEFAULT_SHARPEN_FACTOR,
            edge_threshold: Self::DEFAULT_EDGE_THRESHOLD,
            denoise_iterations: Self::DEFAULT_DENOISE_ITERATIONS,
            core_erosion_radius: Self::DEFAULT_CORE_EROSION_RADIUS,
            core_erosion_iterations: Self::DEFAULT_CORE_EROSION_ITERATIONS,
            grabcut_iterations: Self::DEFAULT_GRABCUT_ITERATIONS,
            background_min: Self::DEFAULT_BACKGROUND_MIN,
            background_max: Self::DEFAULT_BACKGROUND_MAX,
            near_white: Self::DEFAULT_NEAR_WHITE,
            min_artifact_black: Self::DEFAULT_MIN_ARTIFACT_BLACK,
            min_artifact_white: Self::DEFAULT_MIN_ARTIFACT_WHITE,
        }
    }
}

/// What the artifact cleaner did to the thresholded mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Foreground pixels before cleanup.
    pub foreground_before: u64,
    /// Foreground pixels after cleanup.
    pub foreground_after: u64,
    /// Foreground components removed as black artifacts.
    pub black_components_removed: usize,
    /// Background islands filled as white artifacts.
    pub white_components_filled: usize,
    /// The black-artifact filter would have removed every foreground
    /// component and was skipped.
    pub black_fallback: bool,
    /// The white-artifact filter would have removed every background
    /// component and was skipped.
    pub white_fallback: bool,
}

impl CleanupReport {
    /// Returns `true` if either filter fell back to the unfiltered mask.
    #[must_use]
    pub const fn degenerate(&self) -> bool {
        self.black_fallback || self.white_fallback
    }
}

/// Result of running the matte pipeline on one composite.
#[derive(Debug, Clone)]
pub struct MatteResult {
    /// Final binary mask at the composite's original resolution.
    pub mask: GrayImage,
    /// Dimensions of the composite.
    pub dimensions: Dimensions,
    /// Dimensions the segmentation ran at.
    pub working_dimensions: Dimensions,
    /// Area of the significant contour found by edge segmentation
    /// (working resolution).
    pub contour_area: f64,
    /// Whether the trimap refinement ran (it is skipped when the trimap
    /// has no definite-foreground or no background pixels).
    pub refined: bool,
    /// Artifact cleanup summary.
    pub cleanup: CleanupReport,
}

/// Errors that can occur during pipeline processing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// Edge segmentation found no candidate contour.
    #[error("no foreground contour found in the image")]
    NoContours,

    /// A mask does not match the image it is applied to.
    #[error("mask is {actual_width}x{actual_height}, expected {width}x{height}")]
    DimensionMismatch {
        /// Expected width.
        width: u32,
        /// Expected height.
        height: u32,
        /// Width of the mask.
        actual_width: u32,
        /// Height of the mask.
        actual_height: u32,
    },

    /// The edge detector model could not be used.
    #[error("invalid edge model: {0}")]
    InvalidEdgeModel(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // --- Contour tests ---

    #[test]
    fn square_contour_area() {
        let c = Contour::new(vec![
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ]);
        assert!((c.area() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn area_is_orientation_independent() {
        let c = Contour::new(vec![
            Point::new(0, 0),
            Point::new(0, 10),
            Point::new(10, 10),
            Point::new(10, 0),
        ]);
        assert!((c.area() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn degenerate_contour_has_zero_area() {
        assert!(Contour::new(vec![]).area().abs() < f64::EPSILON);
        assert!(
            Contour::new(vec![Point::new(1, 1), Point::new(2, 2)])
                .area()
                .abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn dimensions_pixel_count() {
        let d = Dimensions {
            width: 640,
            height: 480,
        };
        assert_eq!(d.pixel_count(), 307_200);
    }

    // --- Config tests ---

    #[test]
    fn matte_config_defaults() {
        let config = MatteConfig::default();
        assert!(!config.full_resolution);
        assert_eq!(config.working_resolution, 1500);
        assert_eq!(config.denoise_iterations, 70);
        assert_eq!(config.core_erosion_radius, 2);
        assert_eq!(config.core_erosion_iterations, 10);
        assert_eq!(config.grabcut_iterations, 5);
        assert_eq!(config.min_artifact_black, 1000);
        assert_eq!(config.min_artifact_white, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn focus_config_defaults() {
        let config = FocusConfig::default();
        assert!((config.threshold - 10.0).abs() < f64::EPSILON);
        assert!((config.scale - 0.15).abs() < f32::EPSILON);
    }

    #[test]
    fn inverted_band_is_rejected() {
        let config = MatteConfig {
            background_min: 150.0,
            background_max: 100.0,
            ..MatteConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn non_finite_value_is_rejected() {
        let config = MatteConfig {
            clahe_clip_limit: f32::NAN,
            ..MatteConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_working_resolution_is_rejected() {
        let config = MatteConfig {
            working_resolution: 0,
            ..MatteConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: MatteConfig =
            serde_json::from_str(r#"{"background_min": 100.0, "background_max": 150.0}"#).unwrap();
        assert!((config.background_min - 100.0).abs() < f32::EPSILON);
        assert_eq!(config.working_resolution, MatteConfig::DEFAULT_WORKING_RESOLUTION);
    }

    // --- Cleanup report ---

    #[test]
    fn cleanup_report_degenerate_flags() {
        let mut report = CleanupReport::default();
        assert!(!report.degenerate());
        report.white_fallback = true;
        assert!(report.degenerate());
    }

    // --- Error display ---

    #[test]
    fn error_no_contours_display() {
        let err = PipelineError::NoContours;
        assert_eq!(err.to_string(), "no foreground contour found in the image");
    }

    #[test]
    fn error_invalid_config_display() {
        let err = PipelineError::InvalidConfig("bad value".to_string());
        assert_eq!(err.to_string(), "invalid pipeline configuration: bad value");
    }
}

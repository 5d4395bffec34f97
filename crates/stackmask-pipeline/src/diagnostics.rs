//! Matte diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation intended for
//! parameter tuning on difficult scans. [`process_with_diagnostics`]
//! drives the staged [`Pipeline`](crate::Pipeline) and records how long
//! each stage took and what it produced.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::edge::EdgeDetector;
use crate::grabcut::TrimapCounts;
use crate::pipeline::Pipeline;
use crate::types::{CleanupReport, MatteConfig, MatteResult, PipelineError, RgbImage};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single matte extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatteDiagnostics {
    /// Stage 1: reduction to the working resolution.
    pub downsample: StageDiagnostics,
    /// Stage 2: grayscale, blur, CLAHE and sharpening.
    pub enhance: StageDiagnostics,
    /// Stage 3: edge detection and binarization.
    pub edge_detection: StageDiagnostics,
    /// Stage 4: salt-and-pepper removal.
    pub denoise: StageDiagnostics,
    /// Stage 5: significant contour selection and fill.
    pub segmentation: StageDiagnostics,
    /// Stage 6: trimap refinement and soft cutout.
    pub refinement: StageDiagnostics,
    /// Stage 7: re-thresholding, artifact cleanup and upscaling.
    pub cleanup: StageDiagnostics,
    /// Total wall-clock duration of the extraction (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: MatteSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Downsampling metrics.
    Downsample {
        /// Working image width in pixels.
        width: u32,
        /// Working image height in pixels.
        height: u32,
        /// Whether the image was actually reduced.
        applied: bool,
    },
    /// Enhancement metrics.
    Enhance {
        /// CLAHE clip limit.
        clip_limit: f32,
        /// CLAHE tiles per side.
        grid: u32,
        /// Sharpness enhancement factor.
        sharpen_factor: f32,
    },
    /// Edge detection metrics.
    EdgeDetection {
        /// Name of the detector used.
        detector: String,
        /// Binarization threshold.
        threshold: u8,
        /// Number of edge pixels after binarization.
        edge_pixel_count: u64,
        /// Total pixel count for computing edge density.
        total_pixel_count: u64,
    },
    /// Denoising metrics.
    Denoise {
        /// Median passes that changed the map.
        iterations: u32,
        /// Number of edge pixels after denoising.
        edge_pixel_count: u64,
    },
    /// Segmentation metrics.
    Segmentation {
        /// Number of outermost contours found.
        contour_count: usize,
        /// Area enclosed by the selected contour.
        contour_area: f64,
        /// Foreground pixels in the filled mask.
        foreground_pixel_count: u64,
    },
    /// Refinement metrics.
    Refinement {
        /// Trimap label counts after refinement.
        trimap: TrimapCounts,
        /// Whether refinement ran.
        refined: bool,
        /// Foreground pixels in the re-extracted mask.
        foreground_pixel_count: u64,
    },
    /// Cleanup metrics.
    Cleanup {
        /// Artifact cleanup summary at working resolution.
        report: CleanupReport,
        /// Output mask width.
        width: u32,
        /// Output mask height.
        height: u32,
    },
}

/// High-level summary for the extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatteSummary {
    /// Composite width in pixels.
    pub image_width: u32,
    /// Composite height in pixels.
    pub image_height: u32,
    /// Working width in pixels.
    pub working_width: u32,
    /// Working height in pixels.
    pub working_height: u32,
    /// Foreground pixels in the final mask.
    pub foreground_pixel_count: u64,
}

impl MatteDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Matte Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} (working {}x{})",
            self.summary.image_width,
            self.summary.image_height,
            self.summary.working_width,
            self.summary.working_height,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let stages = [
            ("Downsample", &self.downsample),
            ("Enhance", &self.enhance),
            ("Edge Detection", &self.edge_detection),
            ("Denoise", &self.denoise),
            ("Segmentation", &self.segmentation),
            ("Refinement", &self.refinement),
            ("Cleanup", &self.cleanup),
        ];
        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Foreground pixels: {}",
            self.summary.foreground_pixel_count
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Downsample {
            width,
            height,
            applied,
        } => {
            if *applied {
                format!("-> {width}x{height}")
            } else {
                format!("{width}x{height} (unchanged)")
            }
        }
        StageMetrics::Enhance {
            clip_limit,
            grid,
            sharpen_factor,
        } => format!("clip={clip_limit:.1} grid={grid} sharpen={sharpen_factor:.2}"),
        StageMetrics::EdgeDetection {
            detector,
            threshold,
            edge_pixel_count,
            total_pixel_count,
        } => format!(
            "{detector} t={threshold} edges={edge_pixel_count} ({:.1}%)",
            percent(*edge_pixel_count, *total_pixel_count),
        ),
        StageMetrics::Denoise {
            iterations,
            edge_pixel_count,
        } => format!("{iterations} passes, edges={edge_pixel_count}"),
        StageMetrics::Segmentation {
            contour_count,
            contour_area,
            foreground_pixel_count,
        } => format!(
            "{contour_count} contours, area={contour_area:.0} fg={foreground_pixel_count}"
        ),
        StageMetrics::Refinement {
            trimap,
            refined,
            foreground_pixel_count,
        } => format!(
            "{} bg={} pbg={} pfg={} fg={} -> {foreground_pixel_count}",
            if *refined { "refined" } else { "skipped" },
            trimap.background,
            trimap.probable_background,
            trimap.probable_foreground,
            trimap.foreground,
        ),
        StageMetrics::Cleanup {
            report,
            width,
            height,
        } => format!(
            "-{} specks +{} holes{} -> {width}x{height}",
            report.black_components_removed,
            report.white_components_filled,
            if report.degenerate() { " (fallback)" } else { "" },
        ),
    }
}

/// Count foreground pixels (value == 255) in a grayscale image.
pub(crate) fn count_edge_pixels(image: &image::GrayImage) -> u64 {
    crate::cleanup::count_foreground(image)
}

fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let value = f();
    (value, start.elapsed())
}

/// Run the staged pipeline on a decoded composite and collect
/// [`MatteDiagnostics`] alongside the result.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if the config fails
/// validation, and otherwise the same errors as
/// [`process`](crate::process).
pub fn process_with_diagnostics(
    composite: RgbImage,
    config: &MatteConfig,
    detector: &dyn EdgeDetector,
) -> Result<(MatteResult, MatteDiagnostics), PipelineError> {
    config.validate()?;
    let start = Instant::now();
    let (image_width, image_height) = composite.dimensions();

    let (stage, duration) = timed(|| Pipeline::from_image(composite, config.clone()).downsample());
    let (working_width, working_height) = stage.working().dimensions();
    let downsample = StageDiagnostics {
        duration,
        metrics: StageMetrics::Downsample {
            width: working_width,
            height: working_height,
            applied: stage.applied(),
        },
    };

    let (stage, duration) = timed(|| stage.enhance());
    let enhance = StageDiagnostics {
        duration,
        metrics: StageMetrics::Enhance {
            clip_limit: config.clahe_clip_limit,
            grid: config.clahe_grid,
            sharpen_factor: config.sharpen_factor,
        },
    };

    let (stage, duration) = timed(|| stage.detect_edges(detector));
    let stage = stage?;
    let edge_detection = StageDiagnostics {
        duration,
        metrics: StageMetrics::EdgeDetection {
            detector: detector.name().to_owned(),
            threshold: config.edge_threshold,
            edge_pixel_count: count_edge_pixels(stage.edges()),
            total_pixel_count: u64::from(working_width) * u64::from(working_height),
        },
    };

    let (stage, duration) = timed(|| stage.denoise());
    let denoise = StageDiagnostics {
        duration,
        metrics: StageMetrics::Denoise {
            iterations: stage.iterations(),
            edge_pixel_count: count_edge_pixels(stage.edges()),
        },
    };

    let (stage, duration) = timed(|| stage.segment());
    let stage = stage?;
    let segmentation = StageDiagnostics {
        duration,
        metrics: StageMetrics::Segmentation {
            contour_count: stage.contour_count(),
            contour_area: stage.contour().area(),
            foreground_pixel_count: count_edge_pixels(stage.mask()),
        },
    };

    let (stage, duration) = timed(|| stage.refine());
    let stage = stage?;
    let refinement = StageDiagnostics {
        duration,
        metrics: StageMetrics::Refinement {
            trimap: stage.trimap_counts(),
            refined: stage.refined(),
            foreground_pixel_count: count_edge_pixels(stage.mask()),
        },
    };

    let (stage, duration) = timed(|| stage.clean());
    let cleanup = StageDiagnostics {
        duration,
        metrics: StageMetrics::Cleanup {
            report: stage.cleanup(),
            width: stage.mask().width(),
            height: stage.mask().height(),
        },
    };

    let result = stage.into_result();
    let diagnostics = MatteDiagnostics {
        downsample,
        enhance,
        edge_detection,
        denoise,
        segmentation,
        refinement,
        cleanup,
        total_duration: start.elapsed(),
        summary: MatteSummary {
            image_width,
            image_height,
            working_width,
            working_height,
            foreground_pixel_count: count_edge_pixels(&result.mask),
        },
    };
    Ok((result, diagnostics))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::edge::FilterBankEdgeDetector;

    fn stage(ms: u64, metrics: StageMetrics) -> StageDiagnostics {
        StageDiagnostics {
            duration: Duration::from_millis(ms),
            metrics,
        }
    }

    fn sample() -> MatteDiagnostics {
        MatteDiagnostics {
            downsample: stage(
                1,
                StageMetrics::Downsample {
                    width: 100,
                    height: 80,
                    applied: true,
                },
            ),
            enhance: stage(
                2,
                StageMetrics::Enhance {
                    clip_limit: 2.0,
                    grid: 8,
                    sharpen_factor: 2.0,
                },
            ),
            edge_detection: stage(
                3,
                StageMetrics::EdgeDetection {
                    detector: "sobel-bank".to_owned(),
                    threshold: 90,
                    edge_pixel_count: 400,
                    total_pixel_count: 8000,
                },
            ),
            denoise: stage(
                1,
                StageMetrics::Denoise {
                    iterations: 2,
                    edge_pixel_count: 380,
                },
            ),
            segmentation: stage(
                1,
                StageMetrics::Segmentation {
                    contour_count: 3,
                    contour_area: 2500.0,
                    foreground_pixel_count: 2600,
                },
            ),
            refinement: stage(
                10,
                StageMetrics::Refinement {
                    trimap: TrimapCounts {
                        background: 5000,
                        probable_background: 0,
                        probable_foreground: 400,
                        foreground: 2200,
                    },
                    refined: true,
                    foreground_pixel_count: 2550,
                },
            ),
            cleanup: stage(
                2,
                StageMetrics::Cleanup {
                    report: CleanupReport::default(),
                    width: 1000,
                    height: 800,
                },
            ),
            total_duration: Duration::from_millis(20),
            summary: MatteSummary {
                image_width: 1000,
                image_height: 800,
                working_width: 100,
                working_height: 80,
                foreground_pixel_count: 255_000,
            },
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let d = Duration::from_millis(1234);
        let ms = duration_ms(d);
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn count_edge_pixels_works() {
        let mut img = image::GrayImage::new(10, 10);
        for i in 0..5 {
            img.put_pixel(i, 0, image::Luma([255]));
        }
        img.put_pixel(9, 9, image::Luma([128]));
        assert_eq!(count_edge_pixels(&img), 5);
    }

    #[test]
    fn report_lists_every_stage() {
        let report = sample().report();
        for name in [
            "Downsample",
            "Enhance",
            "Edge Detection",
            "Denoise",
            "Segmentation",
            "Refinement",
            "Cleanup",
        ] {
            assert!(report.contains(name), "missing {name} in:\n{report}");
        }
        assert!(report.contains("sobel-bank t=90 edges=400 (5.0%)"));
        assert!(report.contains("Image: 1000x800 (working 100x80)"));
    }

    #[test]
    fn diagnostics_round_trip_through_json() {
        let json = serde_json::to_string(&sample()).unwrap();
        let back: MatteDiagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total_duration, Duration::from_millis(20));
        assert_eq!(back.summary.foreground_pixel_count, 255_000);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["total_duration"] = serde_json::json!(-1.0);
        assert!(serde_json::from_value::<MatteDiagnostics>(value).is_err());
    }

    #[test]
    fn process_with_diagnostics_collects_all_stages() {
        let composite = RgbImage::from_fn(120, 120, |x, y| {
            if (40..80).contains(&x) && (40..80).contains(&y) {
                image::Rgb([200, 40, 40])
            } else {
                image::Rgb([130, 130, 130])
            }
        });
        let config = MatteConfig {
            background_min: 100.0,
            background_max: 150.0,
            min_artifact_black: 50,
            min_artifact_white: 50,
            ..MatteConfig::default()
        };
        let (result, diag) = process_with_diagnostics(
            composite,
            &config,
            &FilterBankEdgeDetector::default(),
        )
        .unwrap();
        assert_eq!(diag.summary.image_width, 120);
        assert_eq!(
            diag.summary.foreground_pixel_count,
            count_edge_pixels(&result.mask)
        );
        assert!(matches!(
            diag.edge_detection.metrics,
            StageMetrics::EdgeDetection { edge_pixel_count, .. } if edge_pixel_count > 0
        ));
        assert!(diag.total_duration >= diag.refinement.duration);
    }

    #[test]
    fn process_with_diagnostics_validates_config() {
        let config = MatteConfig {
            background_min: 200.0,
            background_max: 100.0,
            ..MatteConfig::default()
        };
        let result = process_with_diagnostics(
            RgbImage::new(4, 4),
            &config,
            &FilterBankEdgeDetector::default(),
        );
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }
}

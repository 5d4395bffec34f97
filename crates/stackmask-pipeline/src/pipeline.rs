//! Incremental matte pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process`] which runs the whole matte extraction in one
//! call, [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use stackmask_pipeline::{FilterBankEdgeDetector, MatteConfig, Pipeline, PipelineError};
//! # fn run(tiff: Vec<u8>) -> Result<(), PipelineError> {
//! let detector = FilterBankEdgeDetector::default();
//! let result = Pipeline::new(tiff, MatteConfig::default())
//!     .decode()?
//!     .downsample()
//!     .enhance()
//!     .detect_edges(&detector)?
//!     .denoise()
//!     .segment()?
//!     .refine()?
//!     .clean()
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state
//! (or `Result` for fallible stages). The caller can inspect the current
//! stage's output via accessor methods at any point.
//!
//! # Memory
//!
//! The full-resolution composite is dropped at [`Decoded::downsample`];
//! later stages keep only the working-resolution image they still need
//! and the output of the current stage.

use crate::edge::EdgeDetector;
use crate::grabcut::{Trimap, TrimapCounts};
use crate::types::{
    CleanupReport, Contour, Dimensions, GrayImage, MatteConfig, MatteResult, PipelineError,
    RgbImage,
};

fn dimensions_of<P: image::Pixel>(image: &image::ImageBuffer<P, Vec<P::Subpixel>>) -> Dimensions {
    Dimensions {
        width: image.width(),
        height: image.height(),
    }
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// The encoded composite and config are stored but not yet touched.
/// Call [`decode`](Self::decode) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing: call .decode() to continue"]
pub struct Pending {
    config: MatteConfig,
    source: Vec<u8>,
}

impl Pending {
    /// The raw encoded composite.
    #[must_use]
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    /// Decode the composite and advance to the [`Decoded`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyInput`] if the source bytes are
    /// empty. Returns [`PipelineError::ImageDecode`] if the image
    /// format is unrecognized or the data is corrupt.
    pub fn decode(self) -> Result<Decoded, PipelineError> {
        let composite = crate::grayscale::decode_rgb(&self.source)?;
        Ok(Decoded {
            config: self.config,
            composite,
        })
    }
}

// ───────────────────────── Stage 1: Decoded ──────────────────────────

/// Pipeline state after decoding the composite.
///
/// Call [`downsample`](Self::downsample) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing: call .downsample() to continue"]
pub struct Decoded {
    config: MatteConfig,
    composite: RgbImage,
}

impl Decoded {
    /// The decoded composite at full resolution.
    #[must_use]
    pub const fn composite(&self) -> &RgbImage {
        &self.composite
    }

    /// Reduce the composite to the working resolution (unless
    /// `config.full_resolution` is set) and advance.
    pub fn downsample(self) -> Downsampled {
        let original = dimensions_of(&self.composite);
        let (working, applied) = if self.config.full_resolution {
            (self.composite, false)
        } else {
            crate::downsample::downsample(
                &self.composite,
                self.config.working_resolution,
                self.config.downsample_filter,
            )
        };
        Downsampled {
            config: self.config,
            original,
            working,
            applied,
        }
    }
}

// ───────────────────────── Stage 2: Downsampled ──────────────────────

/// Pipeline state after reducing to the working resolution.
///
/// Call [`enhance`](Self::enhance) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing: call .enhance() to continue"]
pub struct Downsampled {
    config: MatteConfig,
    original: Dimensions,
    working: RgbImage,
    applied: bool,
}

impl Downsampled {
    /// The working-resolution composite.
    #[must_use]
    pub const fn working(&self) -> &RgbImage {
        &self.working
    }

    /// Whether downsampling was actually applied.
    #[must_use]
    pub const fn applied(&self) -> bool {
        self.applied
    }

    /// Dimensions of the full-resolution composite.
    #[must_use]
    pub const fn original_dimensions(&self) -> Dimensions {
        self.original
    }

    /// Local-contrast enhancement: grayscale, Gaussian blur, CLAHE, then
    /// sharpness enhancement.
    pub fn enhance(self) -> Enhanced {
        let gray = crate::grayscale::to_gray(&self.working);
        let smooth = crate::blur::gaussian_blur(&gray, self.config.blur_sigma);
        let equalized = crate::contrast::clahe(
            &smooth,
            self.config.clahe_clip_limit,
            self.config.clahe_grid,
        );
        let enhanced = crate::contrast::enhance_sharpness(&equalized, self.config.sharpen_factor);
        Enhanced {
            config: self.config,
            original: self.original,
            working: self.working,
            enhanced,
        }
    }
}

// ───────────────────────── Stage 3: Enhanced ─────────────────────────

/// Pipeline state after local-contrast enhancement.
///
/// Call [`detect_edges`](Self::detect_edges) to advance to the next
/// stage.
#[must_use = "pipeline stages are consumed by advancing: call .detect_edges() to continue"]
pub struct Enhanced {
    config: MatteConfig,
    original: Dimensions,
    working: RgbImage,
    enhanced: GrayImage,
}

impl Enhanced {
    /// The enhanced grayscale image.
    #[must_use]
    pub const fn enhanced(&self) -> &GrayImage {
        &self.enhanced
    }

    /// Blur the enhanced image, run `detector` on it and binarize the
    /// edge map at `config.edge_threshold`.
    ///
    /// # Errors
    ///
    /// Returns whatever error the detector reports, typically
    /// [`PipelineError::InvalidEdgeModel`].
    pub fn detect_edges(self, detector: &dyn EdgeDetector) -> Result<EdgesDetected, PipelineError> {
        let smooth = crate::blur::gaussian_blur(&self.enhanced, self.config.blur_sigma);
        let strength = detector.detect(&crate::edge::normalize(&smooth))?;
        let edge_map = crate::edge::edge_map_to_gray(&strength);
        let binary = crate::edge::binarize(&edge_map, self.config.edge_threshold);
        Ok(EdgesDetected {
            config: self.config,
            original: self.original,
            working: self.working,
            edge_map,
            binary,
        })
    }
}

// ───────────────────────── Stage 4: EdgesDetected ────────────────────

/// Pipeline state after edge detection.
///
/// Call [`denoise`](Self::denoise) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing: call .denoise() to continue"]
pub struct EdgesDetected {
    config: MatteConfig,
    original: Dimensions,
    working: RgbImage,
    edge_map: GrayImage,
    binary: GrayImage,
}

impl EdgesDetected {
    /// Edge strength scaled to 0-255.
    #[must_use]
    pub const fn edge_map(&self) -> &GrayImage {
        &self.edge_map
    }

    /// The binarized edge map.
    #[must_use]
    pub const fn edges(&self) -> &GrayImage {
        &self.binary
    }

    /// Remove salt-and-pepper noise from the binary edge map.
    pub fn denoise(self) -> Denoised {
        let (edges, iterations) =
            crate::edge::remove_salt_pepper(&self.binary, self.config.denoise_iterations);
        Denoised {
            config: self.config,
            original: self.original,
            working: self.working,
            edges,
            iterations,
        }
    }
}

// ───────────────────────── Stage 5: Denoised ─────────────────────────

/// Pipeline state after edge denoising.
///
/// Call [`segment`](Self::segment) to advance to the next stage. This is
/// a fallible step: it returns `Err` if no contour is found.
#[must_use = "pipeline stages are consumed by advancing: call .segment() to continue"]
pub struct Denoised {
    config: MatteConfig,
    original: Dimensions,
    working: RgbImage,
    edges: GrayImage,
    iterations: u32,
}

impl Denoised {
    /// The denoised binary edge map.
    #[must_use]
    pub const fn edges(&self) -> &GrayImage {
        &self.edges
    }

    /// Number of median passes that changed the edge map.
    #[must_use]
    pub const fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Trace the outermost contours, keep the one with the largest area
    /// and fill it into the initial mask.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoContours`] if the edge map contains no
    /// contour.
    pub fn segment(self) -> Result<Segmented, PipelineError> {
        let candidates = crate::contour::outer_contours(&self.edges);
        let contour_count = candidates.len();
        let contour =
            crate::contour::significant_contour(candidates).ok_or(PipelineError::NoContours)?;
        let mask = crate::contour::fill_contour(&contour, self.edges.width(), self.edges.height());
        Ok(Segmented {
            config: self.config,
            original: self.original,
            working: self.working,
            contour,
            contour_count,
            mask,
        })
    }
}

// ───────────────────────── Stage 6: Segmented ────────────────────────

/// Pipeline state after edge segmentation.
///
/// Call [`refine`](Self::refine) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing: call .refine() to continue"]
pub struct Segmented {
    config: MatteConfig,
    original: Dimensions,
    working: RgbImage,
    contour: Contour,
    contour_count: usize,
    mask: GrayImage,
}

impl Segmented {
    /// The significant foreground contour.
    #[must_use]
    pub const fn contour(&self) -> &Contour {
        &self.contour
    }

    /// How many outermost contours were candidates.
    #[must_use]
    pub const fn contour_count(&self) -> usize {
        self.contour_count
    }

    /// The filled contour (initial mask).
    #[must_use]
    pub const fn mask(&self) -> &GrayImage {
        &self.mask
    }

    /// Build the trimap, refine it, re-extract the significant contour
    /// and composite the soft cutout used for re-thresholding.
    ///
    /// Refinement is skipped (with a warning) when the eroded core is
    /// empty or nothing is left outside it; re-extraction falls back to
    /// the initial mask if refinement leaves no foreground.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DimensionMismatch`] if the refined mask
    /// and working image disagree in size, which indicates a bug in an
    /// earlier stage.
    pub fn refine(self) -> Result<Refined, PipelineError> {
        let core = crate::grabcut::erode_core(
            &self.mask,
            self.config.core_erosion_radius,
            self.config.core_erosion_iterations,
        );
        let mut trimap = Trimap::from_masks(&self.mask, &core);
        let initial_counts = trimap.counts();
        let refined = crate::grabcut::grabcut(
            &self.working,
            &mut trimap,
            self.config.grabcut_iterations,
        );
        if !refined {
            tracing::warn!(
                foreground = initial_counts.foreground,
                background = initial_counts.background + initial_counts.probable_background,
                "trimap has no seed for one side, skipping refinement"
            );
        }

        let mask = match crate::contour::fill_significant(&trimap.foreground_mask()) {
            Some((_, filled)) => filled,
            None => {
                tracing::warn!("refinement left no foreground, keeping the initial mask");
                self.mask
            }
        };
        let soft = crate::cutout::soft_cutout(&self.working, &mask)?;

        Ok(Refined {
            config: self.config,
            original: self.original,
            contour_area: self.contour.area(),
            trimap_counts: trimap.counts(),
            refined,
            mask,
            soft,
        })
    }
}

// ───────────────────────── Stage 7: Refined ──────────────────────────

/// Pipeline state after trimap refinement.
///
/// Call [`clean`](Self::clean) to advance to the final stage.
#[must_use = "pipeline stages are consumed by advancing: call .clean() to continue"]
pub struct Refined {
    config: MatteConfig,
    original: Dimensions,
    contour_area: f64,
    trimap_counts: TrimapCounts,
    refined: bool,
    mask: GrayImage,
    soft: RgbImage,
}

impl Refined {
    /// The refined, re-filled mask at working resolution.
    #[must_use]
    pub const fn mask(&self) -> &GrayImage {
        &self.mask
    }

    /// The soft cutout (composite blended against white).
    #[must_use]
    pub const fn soft_cutout(&self) -> &RgbImage {
        &self.soft
    }

    /// Label tally of the trimap after refinement.
    #[must_use]
    pub const fn trimap_counts(&self) -> TrimapCounts {
        self.trimap_counts
    }

    /// Whether the refinement actually ran.
    #[must_use]
    pub const fn refined(&self) -> bool {
        self.refined
    }

    /// Re-threshold the soft cutout against the backdrop band, remove
    /// artifacts and scale the mask back to the composite's resolution.
    pub fn clean(self) -> Cleaned {
        let working = dimensions_of(&self.soft);
        let (mask, cleanup) = crate::cleanup::clean(&self.soft, &self.config);
        let mask = crate::downsample::upscale_mask(&mask, self.original);
        Cleaned {
            mask,
            original: self.original,
            working,
            contour_area: self.contour_area,
            refined: self.refined,
            cleanup,
        }
    }
}

// ───────────────────────── Stage 8: Cleaned ──────────────────────────

/// The final stage.
///
/// Call [`into_result`](Self::into_result) to extract the
/// [`MatteResult`].
#[must_use = "call .into_result() to extract the MatteResult"]
pub struct Cleaned {
    mask: GrayImage,
    original: Dimensions,
    working: Dimensions,
    contour_area: f64,
    refined: bool,
    cleanup: CleanupReport,
}

impl Cleaned {
    /// The final binary mask at full resolution.
    #[must_use]
    pub const fn mask(&self) -> &GrayImage {
        &self.mask
    }

    /// Artifact cleanup summary.
    #[must_use]
    pub const fn cleanup(&self) -> CleanupReport {
        self.cleanup
    }

    /// Consume the pipeline and return the [`MatteResult`].
    #[must_use]
    pub fn into_result(self) -> MatteResult {
        MatteResult {
            mask: self.mask,
            dimensions: self.original,
            working_dimensions: self.working,
            contour_area: self.contour_area,
            refined: self.refined,
            cleanup: self.cleanup,
        }
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental matte pipeline.
///
/// Created via [`Pipeline::new`] from encoded bytes, or
/// [`Pipeline::from_image`] from an already decoded composite. Each
/// stage method consumes the current state and returns the next, making
/// it a compile-time error to skip stages or call them out of order.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline from an encoded composite and config.
    ///
    /// No processing is performed; call [`.decode()`](Pending::decode)
    /// to begin.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(image_bytes: Vec<u8>, config: MatteConfig) -> Pending {
        Pending {
            config,
            source: image_bytes,
        }
    }

    /// Start from a decoded composite, skipping the decode stage.
    pub const fn from_image(composite: RgbImage, config: MatteConfig) -> Decoded {
        Decoded { config, composite }
    }
}

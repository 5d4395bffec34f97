//! Masking a composite on disk and persisting the mask and cutout.
//!
//! For a composite `<stack>.tif` the outputs are `<stack>_masked.png`
//! (8-bit, values 0 and 255 only) and, depending on [`CutoutMode`],
//! `<stack>_cutout.tif` (alpha) or `<stack>_cutout.jpg` (flattened).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use stackmask_pipeline::{
    Cutout, CutoutMode, EdgeDetector, FilterBankEdgeDetector, MatteConfig, MatteDiagnostics,
    MatteResult, PipelineError, RgbImage,
};

use crate::error::{ProcessError, ProcessResult};
use crate::output;

/// Files written for one masked composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaskOutputs {
    /// The binary mask.
    pub mask: PathBuf,
    /// The cutout, unless [`CutoutMode::None`].
    pub cutout: Option<PathBuf>,
    /// Whether the trimap refinement ran.
    pub refined: bool,
    /// Whether an artifact filter had to fall back to the unfiltered
    /// mask.
    pub degenerate: bool,
}

fn derived_path(composite: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = composite
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    composite.with_file_name(format!("{stem}{suffix}.{extension}"))
}

/// Path of the mask for `composite`.
#[must_use]
pub fn mask_path(composite: &Path) -> PathBuf {
    derived_path(composite, "_masked", "png")
}

/// Path of the cutout for `composite` in `mode`, if any.
#[must_use]
pub fn cutout_path(composite: &Path, mode: CutoutMode) -> Option<PathBuf> {
    match mode {
        CutoutMode::None => None,
        CutoutMode::Alpha => Some(derived_path(composite, "_cutout", "tif")),
        CutoutMode::Flattened => Some(derived_path(composite, "_cutout", "jpg")),
    }
}

/// Load the edge detector shared by every masking job.
///
/// With no model file the built-in filter bank is used.
///
/// # Errors
///
/// Returns [`ProcessError::Io`] if the model file cannot be read and
/// [`ProcessError::Config`] if it is not a valid model.
pub fn load_edge_detector(model: Option<&Path>) -> ProcessResult<Arc<dyn EdgeDetector>> {
    let Some(path) = model else {
        return Ok(Arc::new(FilterBankEdgeDetector::default()));
    };
    let json = std::fs::read_to_string(path).map_err(|e| ProcessError::io(path, e))?;
    let detector = FilterBankEdgeDetector::from_json(&json)
        .map_err(|e| ProcessError::Config(format!("edge model {}: {e}", path.display())))?;
    tracing::info!(model = %path.display(), name = detector.name(), "edge model loaded");
    Ok(Arc::new(detector))
}

fn read_composite(path: &Path) -> ProcessResult<RgbImage> {
    Ok(output::read_image(path)?.to_rgb8())
}

fn pipeline_error(path: &Path, source: PipelineError) -> ProcessError {
    match source {
        PipelineError::NoContours => ProcessError::Segmentation {
            path: path.to_path_buf(),
        },
        source => ProcessError::Masking {
            path: path.to_path_buf(),
            source,
        },
    }
}

fn persist(
    composite_path: &Path,
    composite: &RgbImage,
    result: &MatteResult,
    mode: CutoutMode,
) -> ProcessResult<MaskOutputs> {
    let mask = mask_path(composite_path);
    output::write_image(
        &DynamicImage::ImageLuma8(result.mask.clone()),
        ImageFormat::Png,
        &mask,
    )?;

    let cutout = match stackmask_pipeline::cutout::compose(composite, &result.mask, mode)
        .map_err(|e| pipeline_error(composite_path, e))?
    {
        None => None,
        Some(cutout) => {
            let path = derived_path(composite_path, "_cutout", cutout.extension());
            let (image, format) = match cutout {
                Cutout::Alpha(rgba) => (DynamicImage::ImageRgba8(rgba), ImageFormat::Tiff),
                Cutout::Flattened(rgb) => (DynamicImage::ImageRgb8(rgb), ImageFormat::Jpeg),
            };
            output::write_image(&image, format, &path)?;
            Some(path)
        }
    };

    tracing::info!(
        composite = %composite_path.display(),
        mask = %mask.display(),
        refined = result.refined,
        "composite masked"
    );
    Ok(MaskOutputs {
        mask,
        cutout,
        refined: result.refined,
        degenerate: result.cleanup.degenerate(),
    })
}

/// Mask the composite at `path` and write the mask and cutout next to
/// it.
///
/// # Errors
///
/// Returns [`ProcessError::Segmentation`] if no foreground contour is
/// found (the composite is left untouched), [`ProcessError::Decode`] if
/// the composite is unreadable, and I/O or encoding errors from writing
/// the outputs.
pub fn mask_composite(
    path: &Path,
    config: &MatteConfig,
    mode: CutoutMode,
    detector: &dyn EdgeDetector,
) -> ProcessResult<MaskOutputs> {
    let composite = read_composite(path)?;
    let result = stackmask_pipeline::process(&composite, config, detector)
        .map_err(|e| pipeline_error(path, e))?;
    persist(path, &composite, &result, mode)
}

/// Like [`mask_composite`], additionally returning per-stage
/// diagnostics.
///
/// # Errors
///
/// Same as [`mask_composite`].
pub fn mask_composite_with_diagnostics(
    path: &Path,
    config: &MatteConfig,
    mode: CutoutMode,
    detector: &dyn EdgeDetector,
) -> ProcessResult<(MaskOutputs, MatteDiagnostics)> {
    let composite = read_composite(path)?;
    let (result, diagnostics) =
        stackmask_pipeline::process_with_diagnostics(composite.clone(), config, detector)
            .map_err(|e| pipeline_error(path, e))?;
    let outputs = persist(path, &composite, &result, mode)?;
    Ok((outputs, diagnostics))
}

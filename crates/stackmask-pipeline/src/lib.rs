//! stackmask-pipeline: Pure focus scoring and matte extraction (sans-IO).
//!
//! Turns a focus-stacked composite into a binary foreground mask through:
//! downsample -> enhance -> edge detection -> denoise -> significant
//! contour -> trimap refinement -> soft cutout -> re-threshold ->
//! artifact cleanup -> upscale.
//!
//! Also scores individual frames for focus sharpness and composes
//! cutouts from a composite and its mask.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! images and byte slices and returns structured data. Filesystem
//! layout, external tools and scheduling live in `stackmask-io`.

pub mod blur;
pub mod cleanup;
pub mod contour;
pub mod contrast;
pub mod cutout;
pub mod diagnostics;
pub mod downsample;
pub mod edge;
pub mod focus;
pub mod gmm;
pub mod grabcut;
pub mod grayscale;
pub mod maxflow;
pub mod pipeline;
pub mod types;

pub use cutout::{Cutout, CutoutMode};
pub use diagnostics::{MatteDiagnostics, process_with_diagnostics};
pub use downsample::DownsampleFilter;
pub use edge::{EdgeDetector, FilterBankEdgeDetector};
pub use pipeline::Pipeline;
pub use types::{
    CleanupReport, Dimensions, FocusClass, FocusConfig, GrayImage, MatteConfig, MatteResult,
    PipelineError, RgbImage, RgbaImage,
};

/// Extract the foreground mask of a composite.
///
/// Runs every stage of the [`Pipeline`] in order and returns the final
/// binary mask at the composite's resolution.
///
/// # Pipeline steps
///
/// 1. Downsample to the working resolution (unless `full_resolution`)
/// 2. Grayscale, Gaussian blur, CLAHE and sharpness enhancement
/// 3. Edge detection with `detector`, then binarization
/// 4. Salt-and-pepper removal
/// 5. Fill the largest outermost contour
/// 6. Trimap refinement and re-extraction of the significant contour
/// 7. Soft cutout, band re-threshold and artifact cleanup
/// 8. Upscale to the original resolution
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` fails validation.
/// Returns [`PipelineError::NoContours`] if edge segmentation finds no
/// contour. Returns [`PipelineError::InvalidEdgeModel`] if the detector
/// rejects its input.
pub fn process(
    composite: &RgbImage,
    config: &MatteConfig,
    detector: &dyn EdgeDetector,
) -> Result<MatteResult, PipelineError> {
    config.validate()?;
    Ok(Pipeline::from_image(composite.clone(), config.clone())
        .downsample()
        .enhance()
        .detect_edges(detector)?
        .denoise()
        .segment()?
        .refine()?
        .clean()
        .into_result())
}

/// Decode an encoded composite and extract its foreground mask.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `image_bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized. Otherwise the same errors as [`process`].
pub fn process_bytes(
    image_bytes: &[u8],
    config: &MatteConfig,
    detector: &dyn EdgeDetector,
) -> Result<MatteResult, PipelineError> {
    let composite = grayscale::decode_rgb(image_bytes)?;
    process(&composite, config, detector)
}

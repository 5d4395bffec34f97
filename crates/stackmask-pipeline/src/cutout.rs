//! Applying a matte to a composite.
//!
//! Two kinds of output are produced here:
//!
//! - [`soft_cutout`]: an intermediate used only for re-thresholding. The
//!   composite is blended against white through a slightly blurred and
//!   strengthened copy of the matte.
//! - [`compose`]: the final cutout. The mask is forced to strict binary
//!   and either becomes an alpha channel or replaces the background with
//!   solid black.

use std::fmt;

use image::{Rgb, Rgba};
use serde::{Deserialize, Serialize};

use crate::types::{GrayImage, PipelineError, RgbImage, RgbaImage};

/// Sigma of the 3x3 blur applied to the matte edge.
const SOFT_EDGE_SIGMA: f32 = 0.8;

/// Gain applied to the blurred matte before blending.
const SOFT_EDGE_GAIN: f32 = 1.1;

/// Mask values above this are foreground when composing.
const MASK_THRESHOLD: u8 = 127;

/// Which final cutout, if any, to produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutoutMode {
    /// No cutout; only the mask is written.
    None,
    /// Four-channel image with the mask as alpha.
    Alpha,
    /// Three-channel image with a black background.
    #[default]
    Flattened,
}

impl fmt::Display for CutoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Alpha => f.write_str("alpha"),
            Self::Flattened => f.write_str("flattened"),
        }
    }
}

/// A composed cutout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cutout {
    /// Background is transparent.
    Alpha(RgbaImage),
    /// Background is black.
    Flattened(RgbImage),
}

impl Cutout {
    /// Conventional file extension for this cutout kind.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Alpha(_) => "tif",
            Self::Flattened(_) => "jpg",
        }
    }
}

fn check_dimensions(composite: &RgbImage, mask: &GrayImage) -> Result<(), PipelineError> {
    if composite.dimensions() == mask.dimensions() {
        return Ok(());
    }
    Err(PipelineError::DimensionMismatch {
        width: composite.width(),
        height: composite.height(),
        actual_width: mask.width(),
        actual_height: mask.height(),
    })
}

/// Blend `composite` against white through a softened `mask`.
///
/// The alpha is the mask blurred with a 3x3-equivalent Gaussian, scaled
/// by 1.1, and forced to full opacity wherever the mask itself is
/// foreground; the blur therefore only feathers outward.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if the mask and composite
/// sizes differ.
pub fn soft_cutout(composite: &RgbImage, mask: &GrayImage) -> Result<RgbImage, PipelineError> {
    check_dimensions(composite, mask)?;
    let feathered = crate::blur::gaussian_blur(mask, SOFT_EDGE_SIGMA);
    Ok(RgbImage::from_fn(composite.width(), composite.height(), |x, y| {
        let alpha = if mask.get_pixel(x, y).0[0] > MASK_THRESHOLD {
            1.0
        } else {
            (f32::from(feathered.get_pixel(x, y).0[0]) * SOFT_EDGE_GAIN / 255.0).min(1.0)
        };
        let p = composite.get_pixel(x, y).0;
        Rgb(p.map(|c| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let blended = f32::from(c)
                .mul_add(alpha, 255.0 * (1.0 - alpha))
                .round()
                .clamp(0.0, 255.0) as u8;
            blended
        }))
    }))
}

/// Apply a binary mask to `composite` according to `mode`.
///
/// Returns `Ok(None)` for [`CutoutMode::None`].
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if the mask and composite
/// sizes differ.
pub fn compose(
    composite: &RgbImage,
    mask: &GrayImage,
    mode: CutoutMode,
) -> Result<Option<Cutout>, PipelineError> {
    check_dimensions(composite, mask)?;
    let keep = |x: u32, y: u32| mask.get_pixel(x, y).0[0] > MASK_THRESHOLD;
    Ok(match mode {
        CutoutMode::None => None,
        CutoutMode::Alpha => Some(Cutout::Alpha(RgbaImage::from_fn(
            composite.width(),
            composite.height(),
            |x, y| {
                let [r, g, b] = composite.get_pixel(x, y).0;
                Rgba([r, g, b, if keep(x, y) { 255 } else { 0 }])
            },
        ))),
        CutoutMode::Flattened => Some(Cutout::Flattened(RgbImage::from_fn(
            composite.width(),
            composite.height(),
            |x, y| {
                if keep(x, y) {
                    *composite.get_pixel(x, y)
                } else {
                    Rgb([0, 0, 0])
                }
            },
        ))),
    })
}

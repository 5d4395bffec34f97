//! Edge detection and edge map denoising.
//!
//! The edge detector is pluggable through the [`EdgeDetector`] trait. The
//! shipped implementation, [`FilterBankEdgeDetector`], evaluates a bank
//! of oriented convolution kernels and reports the strongest absolute
//! response per pixel, scaled by a gain. Its weights come from a JSON
//! model file (see [`FilterBankModel`]) so that a tuned bank can be
//! swapped in without rebuilding; [`FilterBankEdgeDetector::default`]
//! provides a Sobel-style bank.
//!
//! The detector's float output is converted to 0-255 with
//! [`edge_map_to_gray`], binarized with [`binarize`] and cleaned with
//! [`remove_salt_pepper`].

use image::{GrayImage, ImageBuffer, Luma};
use serde::{Deserialize, Serialize};

use crate::types::{BACKGROUND, FOREGROUND, PipelineError};

/// Per-pixel edge strength in `[0.0, 1.0]`.
pub type EdgeMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// An edge detector that turns a normalized grayscale image into an
/// [`EdgeMap`].
///
/// Implementations are stateless with respect to individual images and
/// shared by every masking worker, hence `Send + Sync`.
pub trait EdgeDetector: Send + Sync {
    /// Short name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Detect edges. `image` values are in `[0.0, 1.0]`; the result has
    /// the same dimensions with values in `[0.0, 1.0]`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidEdgeModel`] if the detector cannot
    /// be applied to the image.
    fn detect(&self, image: &EdgeMap) -> Result<EdgeMap, PipelineError>;
}

/// One square convolution kernel, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    /// Side length; must be odd.
    pub size: usize,
    /// `size * size` weights.
    pub weights: Vec<f32>,
}

/// Serialized form of a [`FilterBankEdgeDetector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterBankModel {
    /// Model name reported by [`EdgeDetector::name`].
    pub name: String,
    /// Multiplier applied to the strongest kernel response.
    pub gain: f32,
    /// Oriented kernels.
    pub kernels: Vec<Kernel>,
}

impl FilterBankModel {
    fn validate(&self) -> Result<(), PipelineError> {
        if self.kernels.is_empty() {
            return Err(PipelineError::InvalidEdgeModel(
                "model has no kernels".to_string(),
            ));
        }
        if !self.gain.is_finite() || self.gain <= 0.0 {
            return Err(PipelineError::InvalidEdgeModel(format!(
                "gain must be finite and positive, got {}",
                self.gain
            )));
        }
        for (i, kernel) in self.kernels.iter().enumerate() {
            if kernel.size % 2 == 0 {
                return Err(PipelineError::InvalidEdgeModel(format!(
                    "kernel {i}: size {} is not odd",
                    kernel.size
                )));
            }
            if kernel.weights.len() != kernel.size * kernel.size {
                return Err(PipelineError::InvalidEdgeModel(format!(
                    "kernel {i}: expected {} weights, got {}",
                    kernel.size * kernel.size,
                    kernel.weights.len()
                )));
            }
            if kernel.weights.iter().any(|w| !w.is_finite()) {
                return Err(PipelineError::InvalidEdgeModel(format!(
                    "kernel {i}: non-finite weight"
                )));
            }
        }
        Ok(())
    }
}

/// Edge detector backed by a bank of oriented kernels.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterBankEdgeDetector {
    model: FilterBankModel,
}

impl FilterBankEdgeDetector {
    /// Gain of the built-in bank. A unit step between 0.0 and 1.0 gives a
    /// Sobel response of 4.0, which this maps to full strength.
    pub const DEFAULT_GAIN: f32 = 0.25;

    /// Build a detector from a model, validating its kernels.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidEdgeModel`] for empty banks,
    /// even-sized or mis-sized kernels, non-finite weights or a
    /// non-positive gain.
    pub fn new(model: FilterBankModel) -> Result<Self, PipelineError> {
        model.validate()?;
        Ok(Self { model })
    }

    /// Parse and validate a JSON model.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidEdgeModel`] if the JSON is
    /// malformed or the model is invalid.
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let model: FilterBankModel = serde_json::from_str(json)
            .map_err(|e| PipelineError::InvalidEdgeModel(e.to_string()))?;
        Self::new(model)
    }

    /// The underlying model.
    #[must_use]
    pub const fn model(&self) -> &FilterBankModel {
        &self.model
    }
}

impl Default for FilterBankEdgeDetector {
    fn default() -> Self {
        #[rustfmt::skip]
        let kernels = vec![
            // horizontal gradient
            [-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0],
            // vertical gradient
            [-1.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.0],
            // diagonals
            [0.0, 1.0, 2.0, -1.0, 0.0, 1.0, -2.0, -1.0, 0.0],
            [-2.0, -1.0, 0.0, -1.0, 0.0, 1.0, 0.0, 1.0, 2.0],
        ];
        Self {
            model: FilterBankModel {
                name: "sobel-bank".to_string(),
                gain: Self::DEFAULT_GAIN,
                kernels: kernels
                    .into_iter()
                    .map(|w| Kernel {
                        size: 3,
                        weights: w.to_vec(),
                    })
                    .collect(),
            },
        }
    }
}

impl EdgeDetector for FilterBankEdgeDetector {
    fn name(&self) -> &str {
        &self.model.name
    }

    fn detect(&self, image: &EdgeMap) -> Result<EdgeMap, PipelineError> {
        let (w, h) = image.dimensions();
        let mut strength = vec![0.0_f32; image.as_raw().len()];
        for kernel in &self.model.kernels {
            let response = convolve_clamped(image, kernel);
            for (s, r) in strength.iter_mut().zip(response) {
                *s = s.max(r.abs());
            }
        }
        for s in &mut strength {
            *s = (*s * self.model.gain).clamp(0.0, 1.0);
        }
        EdgeMap::from_raw(w, h, strength).ok_or_else(|| {
            PipelineError::InvalidEdgeModel("edge map buffer size mismatch".to_string())
        })
    }
}

/// Correlate `image` with `kernel`, replicating border pixels.
fn convolve_clamped(image: &EdgeMap, kernel: &Kernel) -> Vec<f32> {
    let (w, h) = image.dimensions();
    let radius = i64::try_from(kernel.size / 2).unwrap_or(0);
    let max_x = i64::from(w) - 1;
    let max_y = i64::from(h) - 1;
    let mut out = Vec::with_capacity(image.as_raw().len());
    for y in 0..i64::from(h) {
        for x in 0..i64::from(w) {
            let mut acc = 0.0_f32;
            let mut weights = kernel.weights.iter();
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let sx = u32::try_from((x + dx).clamp(0, max_x)).unwrap_or(0);
                    let sy = u32::try_from((y + dy).clamp(0, max_y)).unwrap_or(0);
                    if let Some(weight) = weights.next() {
                        acc = weight.mul_add(image.get_pixel(sx, sy).0[0], acc);
                    }
                }
            }
            out.push(acc);
        }
    }
    out
}

/// Normalize an 8-bit grayscale image to `[0.0, 1.0]`.
#[must_use]
pub fn normalize(image: &GrayImage) -> EdgeMap {
    EdgeMap::from_fn(image.width(), image.height(), |x, y| {
        Luma([f32::from(image.get_pixel(x, y).0[0]) / 255.0])
    })
}

/// Scale an edge map to 0-255.
#[must_use]
pub fn edge_map_to_gray(edges: &EdgeMap) -> GrayImage {
    GrayImage::from_fn(edges.width(), edges.height(), |x, y| {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let v = (edges.get_pixel(x, y).0[0] * 255.0).round().clamp(0.0, 255.0) as u8;
        Luma([v])
    })
}

/// Keep edge pixels at or above `threshold` as foreground; everything
/// else becomes background. A threshold of 0 keeps any non-zero pixel.
#[must_use = "returns the binary edge map"]
pub fn binarize(edges: &GrayImage, threshold: u8) -> GrayImage {
    let threshold = threshold.max(1);
    GrayImage::from_fn(edges.width(), edges.height(), |x, y| {
        if edges.get_pixel(x, y).0[0] >= threshold {
            Luma([FOREGROUND])
        } else {
            Luma([BACKGROUND])
        }
    })
}

/// Remove isolated edge pixels.
///
/// Each pass zeroes every pixel that a 3x3 median filter would zero. The
/// loop stops at a fixed point or after `max_iterations` passes,
/// whichever comes first. Returns the cleaned map and the number of
/// passes that changed it.
#[must_use = "returns the denoised edge map"]
pub fn remove_salt_pepper(edges: &GrayImage, max_iterations: u32) -> (GrayImage, u32) {
    let mut current = edges.clone();
    for pass in 0..max_iterations {
        let median = imageproc::filter::median_filter(&current, 1, 1);
        let next = GrayImage::from_fn(current.width(), current.height(), |x, y| {
            let keep = median.get_pixel(x, y).0[0] > 0 && current.get_pixel(x, y).0[0] > 0;
            Luma([if keep { FOREGROUND } else { BACKGROUND }])
        });
        if next == current {
            return (current, pass);
        }
        current = next;
    }
    (current, max_iterations)
}

//! Focus checking of frames on disk.

use serde::{Deserialize, Serialize};
use stackmask_pipeline::{FocusClass, FocusConfig};

use crate::error::{ProcessError, ProcessResult};
use crate::frame::Frame;

/// Whether and how frames are focus checked before stacking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusSettings {
    /// Score frames and drop blurry ones. When off, every readable
    /// frame is usable.
    pub enabled: bool,
    /// Threshold and scoring scale.
    #[serde(flatten)]
    pub config: FocusConfig,
}

impl Default for FocusSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            config: FocusConfig::default(),
        }
    }
}

/// Sharpness of one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FocusReport {
    /// The scored frame.
    pub frame: Frame,
    /// Variance of the Laplacian.
    pub score: f64,
    /// Usable or blurry.
    pub class: FocusClass,
}

/// Read and score a single frame.
///
/// # Errors
///
/// Returns [`ProcessError::Io`] if the file cannot be read and
/// [`ProcessError::Decode`] if it is not a decodable image.
pub fn score_frame(frame: &Frame, config: &FocusConfig) -> ProcessResult<FocusReport> {
    let bytes = std::fs::read(frame.path()).map_err(|e| ProcessError::io(frame.path(), e))?;
    let (score, class) = stackmask_pipeline::focus::score_bytes(&bytes, config).map_err(|source| {
        ProcessError::Decode {
            path: frame.path().to_path_buf(),
            source,
        }
    })?;
    tracing::debug!(frame = frame.file_name(), score, ?class, "scored frame");
    Ok(FocusReport {
        frame: frame.clone(),
        score,
        class,
    })
}

/// Outcome of checking a set of frames.
#[derive(Debug, Clone, Default)]
pub struct FocusSelection {
    /// Frames sharp enough to stack, in input order.
    pub usable: Vec<Frame>,
    /// One report per frame that could be scored. Empty when focus
    /// checking is disabled.
    pub reports: Vec<FocusReport>,
    /// Frames that could not be read or decoded.
    pub unreadable: Vec<Frame>,
}

/// Score `frames` and keep the usable ones.
///
/// Unreadable frames are logged and excluded; they never abort the
/// selection.
#[must_use]
pub fn select_usable(frames: &[Frame], settings: &FocusSettings) -> FocusSelection {
    let mut selection = FocusSelection::default();
    if !settings.enabled {
        selection.usable = frames.to_vec();
        return selection;
    }
    for frame in frames {
        match score_frame(frame, &settings.config) {
            Ok(report) => {
                if report.class == FocusClass::Usable {
                    selection.usable.push(frame.clone());
                } else {
                    tracing::info!(
                        frame = frame.file_name(),
                        score = report.score,
                        "frame is blurry, excluding"
                    );
                }
                selection.reports.push(report);
            }
            Err(e) => {
                tracing::warn!(frame = frame.file_name(), error = %e, "excluding unreadable frame");
                selection.unreadable.push(frame.clone());
            }
        }
    }
    selection
}

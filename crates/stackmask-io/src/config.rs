//! Project-wide settings loaded from JSON.
//!
//! Every section is optional; missing fields take their defaults:
//!
//! ```json
//! {
//!   "focus": { "enabled": true, "threshold": 10.0 },
//!   "stack": { "method": "align_fuse", "sharpen": false },
//!   "matte": { "background_min": 80.0, "background_max": 100.0 },
//!   "cutout": "flattened",
//!   "scheduler": { "stack_workers": 2, "poll_interval_ms": 250 },
//!   "edge_model": "models/edges.json"
//! }
//! ```

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stackmask_pipeline::{CutoutMode, MatteConfig};

use crate::assemble::StackConfig;
use crate::error::{ProcessError, ProcessResult};
use crate::focus::FocusSettings;

/// Cores per stacking worker. The external tools are themselves
/// multi-threaded.
const CORES_PER_WORKER: usize = 6;

/// Default size of each worker pool: `max(1, cores / 6)`.
#[must_use]
pub fn default_workers() -> usize {
    let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    (cores / CORES_PER_WORKER).max(1)
}

/// Worker pool sizing and dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum concurrent stacking jobs.
    pub stack_workers: usize,
    /// Maximum concurrent masking jobs.
    pub mask_workers: usize,
    /// Dispatcher tick in milliseconds.
    pub poll_interval_ms: u64,
    /// Queue a masking job for every composite produced.
    pub mask_after_stack: bool,
}

impl SchedulerConfig {
    /// Default dispatcher tick.
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

    /// Dispatcher tick.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn validate(&self) -> ProcessResult<()> {
        if self.stack_workers == 0 || self.mask_workers == 0 {
            return Err(ProcessError::Config(
                "worker pools need at least one worker".to_owned(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ProcessError::Config(
                "poll interval must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let workers = default_workers();
        Self {
            stack_workers: workers,
            mask_workers: workers,
            poll_interval_ms: Self::DEFAULT_POLL_INTERVAL_MS,
            mask_after_stack: true,
        }
    }
}

/// Everything a project run needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Focus checking.
    pub focus: FocusSettings,
    /// External stacking.
    pub stack: StackConfig,
    /// Mask extraction.
    pub matte: MatteConfig,
    /// Cutout output.
    pub cutout: CutoutMode,
    /// Worker pools.
    pub scheduler: SchedulerConfig,
    /// Edge detector model; the built-in bank when absent.
    pub edge_model: Option<PathBuf>,
}

impl ProjectConfig {
    /// Read and validate a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Io`] if the file cannot be read,
    /// [`ProcessError::Json`] if it does not parse, and
    /// [`ProcessError::Config`] if a value is out of range.
    pub fn load(path: &Path) -> ProcessResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| ProcessError::io(path, e))?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Check every section for out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Config`] describing the first problem.
    pub fn validate(&self) -> ProcessResult<()> {
        self.matte
            .validate()
            .map_err(|e| ProcessError::Config(e.to_string()))?;
        let threshold = self.focus.config.threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ProcessError::Config(format!(
                "focus threshold must be finite and non-negative, got {threshold}"
            )));
        }
        let scale = self.focus.config.scale;
        if !scale.is_finite() || scale <= 0.0 || scale > 1.0 {
            return Err(ProcessError::Config(format!(
                "focus scale must be in (0, 1], got {scale}"
            )));
        }
        if !self.stack.sharpen_sigma.is_finite() || self.stack.sharpen_sigma <= 0.0 {
            return Err(ProcessError::Config(format!(
                "sharpen sigma must be positive, got {}",
                self.stack.sharpen_sigma
            )));
        }
        self.scheduler.validate()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tools::StackingMethod;

    #[test]
    fn empty_object_is_all_defaults() {
        let config: ProjectConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ProjectConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn default_pool_is_at_least_one() {
        assert!(default_workers() >= 1);
        let scheduler = SchedulerConfig::default();
        assert_eq!(scheduler.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config: ProjectConfig = serde_json::from_str(
            r#"{
                "stack": { "method": "focus_stack", "sharpen": true },
                "matte": { "background_min": 100.0, "background_max": 150.0 },
                "cutout": "alpha",
                "scheduler": { "stack_workers": 3 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.stack.method, StackingMethod::FocusStack);
        assert!(config.stack.sharpen);
        assert_eq!(config.cutout, CutoutMode::Alpha);
        assert_eq!(config.scheduler.stack_workers, 3);
        assert_eq!(
            config.matte.working_resolution,
            MatteConfig::DEFAULT_WORKING_RESOLUTION
        );
        config.validate().unwrap();
    }

    #[test]
    fn inverted_band_is_rejected() {
        let mut config = ProjectConfig::default();
        config.matte.background_min = 200.0;
        config.matte.background_max = 100.0;
        assert!(matches!(config.validate(), Err(ProcessError::Config(_))));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = ProjectConfig::default();
        config.scheduler.mask_workers = 0;
        assert!(matches!(config.validate(), Err(ProcessError::Config(_))));
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stackmask.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ProjectConfig::load(&path),
            Err(ProcessError::Json(_))
        ));
        std::fs::write(&path, r#"{"focus": {"threshold": 3.5}}"#).unwrap();
        let config = ProjectConfig::load(&path).unwrap();
        assert!((config.focus.config.threshold - 3.5).abs() < f64::EPSILON);
    }
}

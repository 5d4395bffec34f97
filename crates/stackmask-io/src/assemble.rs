//! Turning one [`ImageStack`] into one composite with external tools.
//!
//! With [`StackingMethod::AlignFuse`] the frames are first aligned into
//! a scoped temporary directory (`<name>OUT0000.tif`, `<name>OUT0001.tif`,
//! ...), then fused with weights that favour local contrast over
//! exposure and saturation. The temporary directory is removed when the
//! assembler returns, whether or not fusion succeeded.
//!
//! The composite is fused into a staging file next to its destination
//! and renamed into place only after every step (including optional
//! sharpening) has succeeded.

use std::path::{Path, PathBuf};

use image::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::error::{ProcessError, ProcessResult};
use crate::grouping::ImageStack;
use crate::output;
use crate::tools::{ExternalTools, StackingMethod, ToolCommand, ToolPaths};

/// Fixed arguments for the alignment tool, before `-a <prefix>`.
const ALIGN_ARGS: [&str; 4] = ["-m", "-x", "-c", "200"];

/// Fixed arguments for the fusion tool: contrast-only weighting with a
/// hard mask.
const FUSE_ARGS: [&str; 5] = [
    "--exposure-weight=0",
    "--saturation-weight=0",
    "--contrast-weight=1",
    "--hard-mask",
    "--contrast-edge-scale=1",
];

/// Stacking configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Which external pipeline produces the composite.
    pub method: StackingMethod,
    /// External binaries.
    pub tools: ToolPaths,
    /// Unsharp-mask the composite after fusion.
    pub sharpen: bool,
    /// Unsharp-mask blur sigma.
    pub sharpen_sigma: f32,
    /// Unsharp-mask difference threshold.
    pub sharpen_threshold: i32,
}

impl StackConfig {
    /// Default unsharp-mask sigma.
    pub const DEFAULT_SHARPEN_SIGMA: f32 = 1.5;
    /// Default unsharp-mask threshold.
    pub const DEFAULT_SHARPEN_THRESHOLD: i32 = 2;
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            method: StackingMethod::default(),
            tools: ToolPaths::default(),
            sharpen: false,
            sharpen_sigma: Self::DEFAULT_SHARPEN_SIGMA,
            sharpen_threshold: Self::DEFAULT_SHARPEN_THRESHOLD,
        }
    }
}

/// Path of the composite for `stack_name` in `out_dir`.
#[must_use]
pub fn composite_path(out_dir: &Path, stack_name: &str) -> PathBuf {
    out_dir.join(format!("{stack_name}.tif"))
}

/// Name the alignment tool gives the `index`-th aligned frame.
fn aligned_path(prefix: &Path, index: usize) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(format!("{index:04}.tif"));
    PathBuf::from(name)
}

/// Runs the external stacking tools for one stack at a time.
#[derive(Debug, Clone)]
pub struct StackAssembler {
    tools: ExternalTools,
    config: StackConfig,
}

impl StackAssembler {
    /// Resolve the tools `config` needs.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::ToolMissing`] if a binary is not
    /// installed.
    pub fn new(config: StackConfig) -> ProcessResult<Self> {
        let tools = ExternalTools::verify(config.method, &config.tools)?;
        Ok(Self { tools, config })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Assemble `stack` into `out_dir/<name>.tif`.
    ///
    /// A one-frame stack is passed through unmodified without invoking
    /// any tool; sharpening applies to fused composites only.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Alignment`] or [`ProcessError::Fusion`]
    /// if a tool fails, [`ProcessError::NoUsableFrames`] for an empty
    /// stack, and [`ProcessError::Io`] on filesystem failure. On error
    /// no composite is written and all intermediates are removed.
    pub fn assemble(&self, stack: &ImageStack, out_dir: &Path) -> ProcessResult<PathBuf> {
        if stack.is_empty() {
            return Err(ProcessError::NoUsableFrames {
                stack: stack.name().to_owned(),
            });
        }
        std::fs::create_dir_all(out_dir).map_err(|e| ProcessError::io(out_dir, e))?;
        // Tools run in a scratch directory, so every path they see must be
        // absolute.
        let out_dir = &std::path::absolute(out_dir).map_err(|e| ProcessError::io(out_dir, e))?;
        let destination = composite_path(out_dir, stack.name());
        let staging = output::staging_file(&destination)?;

        if stack.len() == 1 {
            tracing::info!(stack = stack.name(), "single frame, passing through");
            Self::pass_through(stack, staging.path())?;
        } else {
            let inputs = stack
                .alignment_order()
                .map(|f| std::path::absolute(f.path()).map_err(|e| ProcessError::io(f.path(), e)))
                .collect::<ProcessResult<Vec<_>>>()?;
            match &self.tools {
                ExternalTools::AlignFuse { align, fuse } => {
                    Self::align_fuse(stack, &inputs, align, fuse, out_dir, staging.path())?;
                }
                ExternalTools::FocusStack { focus_stack } => {
                    Self::focus_stack(stack, &inputs, focus_stack, out_dir, staging.path())?;
                }
            }
            check_written(stack, staging.path())?;
            if self.config.sharpen {
                self.sharpen(staging.path())?;
            }
        }
        output::commit(staging, &destination)?;
        tracing::info!(
            stack = stack.name(),
            frames = stack.len(),
            composite = %destination.display(),
            "stack assembled"
        );
        Ok(destination)
    }

    fn pass_through(stack: &ImageStack, staging: &Path) -> ProcessResult<()> {
        let Some(frame) = stack.frames().first() else {
            return Err(ProcessError::NoUsableFrames {
                stack: stack.name().to_owned(),
            });
        };
        let is_tiff = frame
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"));
        if is_tiff {
            std::fs::copy(frame.path(), staging).map_err(|e| ProcessError::io(frame.path(), e))?;
        } else {
            let image = output::read_image(frame.path())?;
            image
                .save_with_format(staging, ImageFormat::Tiff)
                .map_err(|source| ProcessError::Encode {
                    path: staging.to_path_buf(),
                    source,
                })?;
        }
        Ok(())
    }

    fn align_fuse(
        stack: &ImageStack,
        inputs: &[PathBuf],
        align: &Path,
        fuse: &Path,
        out_dir: &Path,
        staging: &Path,
    ) -> ProcessResult<()> {
        let scratch = tempfile::Builder::new()
            .prefix(stack.name())
            .tempdir_in(out_dir)
            .map_err(|e| ProcessError::io(out_dir, e))?;
        let prefix = scratch.path().join(format!("{}OUT", stack.name()));

        ToolCommand::new(align)
            .args(ALIGN_ARGS)
            .arg("-a")
            .arg(&prefix)
            .args(inputs)
            .run(scratch.path())
            .map_err(|message| ProcessError::Alignment {
                stack: stack.name().to_owned(),
                message,
            })?;

        let aligned: Vec<PathBuf> = (0..inputs.len()).map(|i| aligned_path(&prefix, i)).collect();
        if let Some(missing) = aligned.iter().find(|p| !p.is_file()) {
            return Err(ProcessError::Alignment {
                stack: stack.name().to_owned(),
                message: format!("aligned image {} was not written", missing.display()),
            });
        }
        tracing::debug!(stack = stack.name(), count = aligned.len(), "frames aligned");

        ToolCommand::new(fuse)
            .args(FUSE_ARGS)
            .flag_path("--output=", staging)
            .args(&aligned)
            .run(scratch.path())
            .map_err(|message| ProcessError::Fusion {
                stack: stack.name().to_owned(),
                message,
            })?;
        // Dropping `scratch` removes the aligned frames.
        Ok(())
    }

    fn focus_stack(
        stack: &ImageStack,
        inputs: &[PathBuf],
        program: &Path,
        out_dir: &Path,
        staging: &Path,
    ) -> ProcessResult<()> {
        ToolCommand::new(program)
            .args(inputs)
            .flag_path("--output=", staging)
            .run(out_dir)
            .map_err(|message| ProcessError::Fusion {
                stack: stack.name().to_owned(),
                message,
            })
    }

    fn sharpen(&self, path: &Path) -> ProcessResult<()> {
        let image = output::read_image(path)?;
        let sharpened = image.unsharpen(self.config.sharpen_sigma, self.config.sharpen_threshold);
        sharpened
            .save_with_format(path, ImageFormat::Tiff)
            .map_err(|source| ProcessError::Encode {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// A tool can exit 0 without producing output; treat that as a fusion
/// failure.
fn check_written(stack: &ImageStack, staging: &Path) -> ProcessResult<()> {
    let len = std::fs::metadata(staging)
        .map_err(|e| ProcessError::io(staging, e))?
        .len();
    if len == 0 {
        return Err(ProcessError::Fusion {
            stack: stack.name().to_owned(),
            message: "no composite was written".to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_names_are_zero_padded() {
        let prefix = Path::new("/tmp/x/_x_00010_y_00020_OUT");
        assert_eq!(
            aligned_path(prefix, 3),
            PathBuf::from("/tmp/x/_x_00010_y_00020_OUT0003.tif")
        );
        assert_eq!(
            aligned_path(prefix, 1234),
            PathBuf::from("/tmp/x/_x_00010_y_00020_OUT1234.tif")
        );
    }

    #[test]
    fn composite_is_named_after_stack() {
        assert_eq!(
            composite_path(Path::new("/scan/stacked"), "_x_00010_y_00020_"),
            PathBuf::from("/scan/stacked/_x_00010_y_00020_.tif")
        );
    }

    #[test]
    fn default_config_aligns_then_fuses() {
        let config = StackConfig::default();
        assert_eq!(config.method, StackingMethod::AlignFuse);
        assert!(!config.sharpen);
        assert_eq!(config.tools.fuse, "enfuse");
    }
}

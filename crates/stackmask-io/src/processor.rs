//! The filesystem-backed [`StackProcessor`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stackmask_pipeline::{CutoutMode, EdgeDetector, MatteConfig};

use crate::assemble::StackAssembler;
use crate::config::ProjectConfig;
use crate::error::{ProcessError, ProcessResult};
use crate::focus::{FocusSettings, select_usable};
use crate::frame::Frame;
use crate::grouping::group_frames;
use crate::masking::{MaskOutputs, load_edge_detector, mask_composite};
use crate::scheduler::StackProcessor;

/// Stacks bursts with external tools into `out_dir` and masks the
/// composites in place.
pub struct FsProcessor {
    assembler: Option<StackAssembler>,
    focus: FocusSettings,
    matte: MatteConfig,
    cutout: CutoutMode,
    detector: Arc<dyn EdgeDetector>,
    out_dir: PathBuf,
}

impl std::fmt::Debug for FsProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsProcessor")
            .field("assembler", &self.assembler)
            .field("detector", &self.detector.name())
            .field("out_dir", &self.out_dir)
            .finish_non_exhaustive()
    }
}

impl FsProcessor {
    /// A processor that stacks and masks.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::ToolMissing`] if a stacking tool is not
    /// installed, or an error loading the edge model.
    pub fn new(config: &ProjectConfig, out_dir: impl Into<PathBuf>) -> ProcessResult<Self> {
        let assembler = StackAssembler::new(config.stack.clone())?;
        let mut processor = Self::masking_only(config, out_dir)?;
        processor.assembler = Some(assembler);
        Ok(processor)
    }

    /// A processor for existing composites; no external tools are
    /// needed and stacking jobs fail.
    ///
    /// # Errors
    ///
    /// Returns an error loading the edge model.
    pub fn masking_only(config: &ProjectConfig, out_dir: impl Into<PathBuf>) -> ProcessResult<Self> {
        Ok(Self {
            assembler: None,
            focus: config.focus,
            matte: config.matte.clone(),
            cutout: config.cutout,
            detector: load_edge_detector(config.edge_model.as_deref())?,
            out_dir: out_dir.into(),
        })
    }

    /// Where composites are written.
    #[must_use]
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }
}

impl StackProcessor for FsProcessor {
    fn stack(&self, burst: &[Frame]) -> Vec<ProcessResult<PathBuf>> {
        let Some(assembler) = &self.assembler else {
            return vec![Err(ProcessError::Config(
                "stacking tools were not configured".to_owned(),
            ))];
        };
        let selection = select_usable(burst, &self.focus);
        let stacks = group_frames(selection.usable);

        // A stack whose every frame was dropped still gets reported.
        let mut missing: Vec<&str> = burst.iter().map(Frame::stack_name).collect();
        missing.sort_unstable();
        missing.dedup();
        missing.retain(|name| stacks.iter().all(|s| s.name() != *name));

        let mut results: Vec<ProcessResult<PathBuf>> = missing
            .into_iter()
            .map(|name| {
                Err(ProcessError::NoUsableFrames {
                    stack: name.to_owned(),
                })
            })
            .collect();
        results.extend(
            stacks
                .iter()
                .map(|stack| assembler.assemble(stack, &self.out_dir)),
        );
        results
    }

    fn mask(&self, composite: &Path) -> ProcessResult<MaskOutputs> {
        mask_composite(composite, &self.matte, self.cutout, self.detector.as_ref())
    }
}

//! Running the scheduler over a project that is already on disk.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::config::ProjectConfig;
use crate::error::ProcessResult;
use crate::grouping::group_frames;
use crate::processor::FsProcessor;
use crate::project::Project;
use crate::scheduler::{SchedulerReport, StackProcessor, WorkScheduler};

/// Which phases a batch run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phases {
    /// Stack `RAW/` into `stacked/` only.
    Stack,
    /// Mask the composites already in `stacked/`.
    Mask,
    /// Stack, then mask every new composite.
    Both,
}

/// Process `project` with the worker pools configured in `config`.
///
/// Every frame in `RAW/` is complete, so each burst is marked saved as
/// it is submitted. Setting `cancel` aborts the run once queued work has
/// drained.
///
/// # Errors
///
/// Returns an error only for conditions that stop the run before any
/// work starts: a missing external tool, an unreadable edge model, or an
/// unreadable project directory. Per-stack failures are collected in the
/// returned report.
pub fn run_project(
    project: &Project,
    config: &ProjectConfig,
    phases: Phases,
    cancel: Arc<AtomicBool>,
) -> ProcessResult<SchedulerReport> {
    let out_dir = project.stacked_dir()?;
    let processor: Arc<dyn StackProcessor> = match phases {
        Phases::Mask => Arc::new(FsProcessor::masking_only(config, &out_dir)?),
        Phases::Stack | Phases::Both => Arc::new(FsProcessor::new(config, &out_dir)?),
    };
    let mut scheduler_config = config.scheduler.clone();
    scheduler_config.mask_after_stack = phases == Phases::Both;

    let scheduler = WorkScheduler::with_cancel_flag(scheduler_config, processor, cancel)?;
    match phases {
        Phases::Stack | Phases::Both => {
            let stacks = group_frames(project.discover_frames()?);
            tracing::info!(stacks = stacks.len(), "submitting stacks");
            for stack in stacks {
                if !scheduler.submit_saved(stack.frames().to_vec()) {
                    break;
                }
            }
        }
        Phases::Mask => {
            let composites = project.discover_composites()?;
            tracing::info!(composites = composites.len(), "submitting composites");
            for composite in composites {
                if !scheduler.submit_mask(composite) {
                    break;
                }
            }
        }
    }
    Ok(scheduler.finish())
}

//! Filesystem, external tool and worker-pool plumbing for stackmask.
//!
//! Frames captured during a scan are parsed from their file names
//! ([`frame`]), focus checked ([`focus`]), grouped by scan position
//! ([`grouping`]) and assembled into one composite per position by
//! external align and fuse tools ([`assemble`]). Composites are then
//! masked with the pixel pipeline from `stackmask-pipeline`
//! ([`masking`]).
//!
//! [`WorkScheduler`] runs both phases on bounded worker pools while
//! capture is still producing frames; [`run_project`] drives it over a
//! project already on disk.

pub mod assemble;
pub mod batch;
pub mod config;
pub mod error;
pub mod focus;
pub mod frame;
pub mod grouping;
pub mod masking;
pub mod output;
pub mod processor;
pub mod project;
pub mod scheduler;
pub mod tools;

pub use assemble::{StackAssembler, StackConfig};
pub use batch::{Phases, run_project};
pub use config::{ProjectConfig, SchedulerConfig};
pub use error::{ProcessError, ProcessResult};
pub use focus::{FocusReport, FocusSelection, FocusSettings, select_usable};
pub use frame::{Frame, Position};
pub use grouping::{ImageStack, group_frames};
pub use masking::{MaskOutputs, load_edge_detector, mask_composite};
pub use processor::FsProcessor;
pub use project::Project;
pub use scheduler::{
    JobFailure, JobKind, SchedulerReport, StackProcessor, WorkItem, WorkScheduler,
};
pub use tools::{ExternalTools, StackingMethod, ToolPaths};

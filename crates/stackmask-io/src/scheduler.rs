//! Bounded worker pools fed by a live queue of capture bursts.
//!
//! A [`WorkScheduler`] owns two pools, one for stacking and one for
//! masking, and a dispatcher thread that launches queued [`WorkItem`]s as
//! capacity frees up. The dispatcher wakes when a job finishes or a new
//! item arrives, and at least once per poll interval.
//!
//! A submitted burst is held back until every one of its frames has been
//! reported through [`WorkScheduler::mark_saved`], so a stacking job never
//! reads a frame the capture side is still writing.
//!
//! Aborting stops new submissions and drops bursts still waiting for
//! their files. Work that was already queued or running is drained,
//! including the masking of composites it produces, so a project never
//! ends up with a composite whose mask was abandoned halfway.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use serde::Serialize;

use crate::config::SchedulerConfig;
use crate::error::{ProcessError, ProcessResult};
use crate::frame::Frame;
use crate::masking::MaskOutputs;

/// The work a pool job performs.
///
/// Implementations must be safe to call from several worker threads at
/// once; each call receives exclusively owned inputs.
pub trait StackProcessor: Send + Sync {
    /// Focus check, group and assemble one burst. Returns one result per
    /// stack found in the burst.
    fn stack(&self, burst: &[Frame]) -> Vec<ProcessResult<PathBuf>>;

    /// Segment, refine, clean and compose one composite.
    ///
    /// # Errors
    ///
    /// Any per-composite failure.
    fn mask(&self, composite: &Path) -> ProcessResult<MaskOutputs>;
}

/// Which pool a job runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Focus check and stack assembly.
    Stack,
    /// Mask extraction and cutout.
    Mask,
}

impl JobKind {
    const ALL: [Self; 2] = [Self::Stack, Self::Mask];
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stack => f.write_str("stack"),
            Self::Mask => f.write_str("mask"),
        }
    }
}

/// One unit of queued work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// Frames captured at one scan position.
    Stack(Vec<Frame>),
    /// A composite to mask.
    Mask(PathBuf),
}

impl WorkItem {
    /// The pool this item runs in.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        match self {
            Self::Stack(_) => JobKind::Stack,
            Self::Mask(_) => JobKind::Mask,
        }
    }

    /// Identifier used in logs and failure reports: the stack name(s) of
    /// a burst, or the composite's file stem.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Stack(frames) => {
                let mut names: Vec<&str> = frames.iter().map(Frame::stack_name).collect();
                names.sort_unstable();
                names.dedup();
                names.join("+")
            }
            Self::Mask(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

/// A job that did not produce its artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    /// Pool the job ran in.
    pub kind: JobKind,
    /// Stack or composite identifier.
    pub item: String,
    /// Reason.
    pub error: String,
    /// Whether the failure should fail the whole run.
    pub catastrophic: bool,
}

/// What a scheduler run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerReport {
    /// Composites written, in completion order.
    pub composites: Vec<PathBuf>,
    /// Masks written, in completion order.
    pub masks: Vec<MaskOutputs>,
    /// Per-job failures.
    pub failures: Vec<JobFailure>,
    /// Bursts dropped before they started (abort, or frames never
    /// confirmed saved).
    pub abandoned: usize,
    /// Most stacking jobs in flight at once.
    pub peak_stack_jobs: usize,
    /// Most masking jobs in flight at once.
    pub peak_mask_jobs: usize,
    /// Whether the run was aborted.
    pub aborted: bool,
}

impl SchedulerReport {
    /// Whether any failure should fail the run as a whole.
    #[must_use]
    pub fn has_catastrophic_failure(&self) -> bool {
        self.failures.iter().any(|f| f.catastrophic)
    }
}

/// A bounded pool: its FIFO and how many of its jobs are running.
#[derive(Debug)]
struct Pool {
    queue: VecDeque<WorkItem>,
    running: usize,
    capacity: usize,
    peak: usize,
}

impl Pool {
    const fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            running: 0,
            capacity,
            peak: 0,
        }
    }

    const fn has_capacity(&self) -> bool {
        self.running < self.capacity
    }

    /// Dequeue the next item if a worker slot is free.
    fn take(&mut self) -> Option<WorkItem> {
        if !self.has_capacity() {
            return None;
        }
        let item = self.queue.pop_front()?;
        self.running += 1;
        self.peak = self.peak.max(self.running);
        Some(item)
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.running == 0
    }
}

enum Outcome {
    Stacked(Vec<ProcessResult<PathBuf>>),
    Masked(ProcessResult<MaskOutputs>),
}

struct State {
    /// Bursts whose frames are not all saved yet.
    waiting: VecDeque<Vec<Frame>>,
    saved: HashSet<PathBuf>,
    stack: Pool,
    mask: Pool,
    closed: bool,
    aborted: bool,
    report: SchedulerReport,
}

impl State {
    fn new(config: &SchedulerConfig) -> Self {
        Self {
            waiting: VecDeque::new(),
            saved: HashSet::new(),
            stack: Pool::new(config.stack_workers.max(1)),
            mask: Pool::new(config.mask_workers.max(1)),
            closed: false,
            aborted: false,
            report: SchedulerReport::default(),
        }
    }

    const fn pool_mut(&mut self, kind: JobKind) -> &mut Pool {
        match kind {
            JobKind::Stack => &mut self.stack,
            JobKind::Mask => &mut self.mask,
        }
    }

    /// Move bursts whose frames are all saved into the stacking queue.
    fn promote_saved(&mut self) {
        let (ready, waiting): (VecDeque<_>, VecDeque<_>) = self
            .waiting
            .drain(..)
            .partition(|burst| burst.iter().all(|f| self.saved.contains(f.path())));
        self.waiting = waiting;
        for burst in ready {
            for frame in &burst {
                self.saved.remove(frame.path());
            }
            self.stack.queue.push_back(WorkItem::Stack(burst));
        }
    }

    /// Drop bursts still waiting for their frames, and forget saved
    /// paths no burst will claim.
    fn abandon_waiting(&mut self, reason: &str) {
        self.saved.clear();
        for burst in self.waiting.drain(..) {
            tracing::warn!(
                stack = %WorkItem::Stack(burst).label(),
                reason,
                "burst abandoned"
            );
            self.report.abandoned += 1;
        }
    }

    fn abort(&mut self) {
        if self.aborted {
            return;
        }
        self.aborted = true;
        self.report.aborted = true;
        self.promote_saved();
        tracing::warn!(
            queued = self.stack.queue.len() + self.mask.queue.len(),
            "abort requested, draining queued work"
        );
        self.abandon_waiting("aborted before frames were saved");
    }

    fn is_idle(&self) -> bool {
        self.waiting.is_empty() && self.stack.is_idle() && self.mask.is_idle()
    }

    fn is_done(&self) -> bool {
        self.closed && self.is_idle()
    }

    fn can_launch(&self) -> bool {
        (self.stack.has_capacity() && !self.stack.queue.is_empty())
            || (self.mask.has_capacity() && !self.mask.queue.is_empty())
    }

    fn fail(&mut self, kind: JobKind, item: &str, error: &ProcessError) {
        if error.is_catastrophic() {
            tracing::error!(%kind, stack = item, error = %error, "job failed");
        } else if matches!(error, ProcessError::Segmentation { .. }) {
            tracing::warn!(stack = item, error = %error, "masking skipped, composite kept");
        } else {
            tracing::warn!(%kind, stack = item, error = %error, "job failed");
        }
        self.report.failures.push(JobFailure {
            kind,
            item: item.to_owned(),
            error: error.to_string(),
            catastrophic: error.is_catastrophic(),
        });
    }

    fn record(&mut self, item: &str, outcome: Outcome, mask_after_stack: bool) {
        match outcome {
            Outcome::Stacked(results) => {
                for result in results {
                    match result {
                        Ok(composite) => {
                            if mask_after_stack {
                                self.mask.queue.push_back(WorkItem::Mask(composite.clone()));
                            }
                            self.report.composites.push(composite);
                        }
                        Err(e) => self.fail(JobKind::Stack, item, &e),
                    }
                }
            }
            Outcome::Masked(Ok(outputs)) => self.report.masks.push(outputs),
            Outcome::Masked(Err(e)) => self.fail(JobKind::Mask, item, &e),
        }
    }
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    cancel: Arc<AtomicBool>,
}

impl Shared {
    /// Lock the state. A panicking job never holds the lock while it
    /// mutates, so a poisoned lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds one worker slot; releasing it (even while unwinding) frees the
/// slot and wakes the dispatcher.
struct JobSlot {
    shared: Arc<Shared>,
    kind: JobKind,
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        let pool = state.pool_mut(self.kind);
        pool.running = pool.running.saturating_sub(1);
        drop(state);
        self.shared.wake.notify_all();
    }
}

fn execute(processor: &dyn StackProcessor, item: &WorkItem) -> Outcome {
    match item {
        WorkItem::Stack(burst) => Outcome::Stacked(processor.stack(burst)),
        WorkItem::Mask(composite) => Outcome::Masked(processor.mask(composite)),
    }
}

struct Dispatcher {
    shared: Arc<Shared>,
    processor: Arc<dyn StackProcessor>,
    config: SchedulerConfig,
    jobs: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    fn run(mut self) -> SchedulerReport {
        loop {
            let launch = {
                let mut state = self.shared.lock();
                if self.shared.cancel.load(Ordering::Relaxed) {
                    state.abort();
                }
                state.promote_saved();
                if state.closed {
                    state.abandon_waiting("frames never confirmed saved");
                }
                let mut launch = Vec::new();
                for kind in JobKind::ALL {
                    while let Some(item) = state.pool_mut(kind).take() {
                        launch.push(item);
                    }
                }
                if launch.is_empty() && state.is_done() {
                    break;
                }
                launch
            };

            for item in launch {
                self.launch(item);
            }
            self.reap();

            let state = self.shared.lock();
            if !state.can_launch() && !state.is_done() {
                let (state, _) = self
                    .shared
                    .wake
                    .wait_timeout(state, self.config.poll_interval())
                    .unwrap_or_else(PoisonError::into_inner);
                drop(state);
            }
        }

        for job in self.jobs.drain(..) {
            Self::join(&self.shared, job);
        }
        let mut state = self.shared.lock();
        state.report.peak_stack_jobs = state.stack.peak;
        state.report.peak_mask_jobs = state.mask.peak;
        std::mem::take(&mut state.report)
    }

    fn launch(&mut self, item: WorkItem) {
        let kind = item.kind();
        let label = item.label();
        let slot = JobSlot {
            shared: Arc::clone(&self.shared),
            kind,
        };
        let processor = Arc::clone(&self.processor);
        let mask_after_stack = self.config.mask_after_stack;
        let thread_name = format!("{kind}:{label}");
        tracing::debug!(%kind, stack = %label, "job started");

        let spawned = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let _span = tracing::info_span!("job", %kind, stack = %label).entered();
                let outcome = execute(processor.as_ref(), &item);
                slot.shared
                    .lock()
                    .record(&label, outcome, mask_after_stack);
                drop(slot);
            });
        match spawned {
            Ok(handle) => self.jobs.push(handle),
            // The closure, and with it the slot, was dropped.
            Err(e) => {
                let item = thread_name.split_once(':').map_or("", |(_, item)| item);
                self.shared.lock().fail(kind, item, &ProcessError::Spawn(e));
            }
        }
    }

    /// Join finished job threads, reporting any that panicked.
    fn reap(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) =
            self.jobs.drain(..).partition(JoinHandle::is_finished);
        self.jobs = running;
        for job in finished {
            Self::join(&self.shared, job);
        }
    }

    fn join(shared: &Shared, job: JoinHandle<()>) {
        let name = job.thread().name().unwrap_or_default().to_owned();
        if job.join().is_err() {
            let (kind, item) = match name.split_once(':') {
                Some(("mask", item)) => (JobKind::Mask, item),
                Some((_, item)) => (JobKind::Stack, item),
                None => (JobKind::Stack, name.as_str()),
            };
            tracing::error!(%kind, stack = item, "job panicked");
            shared.lock().report.failures.push(JobFailure {
                kind,
                item: item.to_owned(),
                error: "job panicked".to_owned(),
                catastrophic: false,
            });
        }
    }
}

/// Coordinates the stacking and masking pools for one run.
///
/// Dropping a scheduler without calling [`finish`](Self::finish) still
/// waits for queued work to drain.
pub struct WorkScheduler {
    shared: Arc<Shared>,
    dispatcher: Option<JoinHandle<SchedulerReport>>,
}

impl fmt::Debug for WorkScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkScheduler")
            .field("cancelled", &self.shared.cancel.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl WorkScheduler {
    /// Start a scheduler with its own cancellation flag.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] if the dispatcher thread cannot be
    /// started.
    pub fn new(config: SchedulerConfig, processor: Arc<dyn StackProcessor>) -> ProcessResult<Self> {
        Self::with_cancel_flag(config, processor, Arc::new(AtomicBool::new(false)))
    }

    /// Start a scheduler that aborts once `cancel` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] if the dispatcher thread cannot be
    /// started.
    pub fn with_cancel_flag(
        config: SchedulerConfig,
        processor: Arc<dyn StackProcessor>,
        cancel: Arc<AtomicBool>,
    ) -> ProcessResult<Self> {
        tracing::info!(
            stack_workers = config.stack_workers,
            mask_workers = config.mask_workers,
            poll_ms = config.poll_interval_ms,
            "scheduler started"
        );
        let shared = Arc::new(Shared {
            state: Mutex::new(State::new(&config)),
            wake: Condvar::new(),
            cancel,
        });
        let dispatcher = Dispatcher {
            shared: Arc::clone(&shared),
            processor,
            config,
            jobs: Vec::new(),
        };
        let handle = std::thread::Builder::new()
            .name("stackmask-dispatch".to_owned())
            .spawn(move || dispatcher.run())
            .map_err(ProcessError::Spawn)?;
        Ok(Self {
            shared,
            dispatcher: Some(handle),
        })
    }

    /// The flag that aborts this scheduler when set.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shared.cancel)
    }

    /// Queue a burst. It starts once all of its frames are marked saved.
    ///
    /// Returns `false` if the scheduler has been aborted.
    pub fn submit(&self, burst: Vec<Frame>) -> bool {
        if burst.is_empty() {
            return true;
        }
        let mut state = self.shared.lock();
        if state.aborted || self.shared.cancel.load(Ordering::Relaxed) {
            tracing::debug!(stack = %WorkItem::Stack(burst).label(), "rejected after abort");
            return false;
        }
        state.waiting.push_back(burst);
        drop(state);
        self.shared.wake.notify_all();
        true
    }

    /// Queue a burst whose frames are already complete on disk.
    ///
    /// Returns `false` if the scheduler has been aborted.
    pub fn submit_saved(&self, burst: Vec<Frame>) -> bool {
        for frame in &burst {
            self.mark_saved(frame.path());
        }
        self.submit(burst)
    }

    /// Queue a composite for masking.
    ///
    /// Returns `false` if the scheduler has been aborted.
    pub fn submit_mask(&self, composite: PathBuf) -> bool {
        let mut state = self.shared.lock();
        if state.aborted || self.shared.cancel.load(Ordering::Relaxed) {
            return false;
        }
        state.mask.queue.push_back(WorkItem::Mask(composite));
        drop(state);
        self.shared.wake.notify_all();
        true
    }

    /// Record that the capture side has finished writing `path`. The path
    /// must be spelled the same way as in the submitted [`Frame`].
    pub fn mark_saved(&self, path: impl Into<PathBuf>) {
        let mut state = self.shared.lock();
        if state.aborted || state.closed {
            return;
        }
        state.saved.insert(path.into());
        drop(state);
        self.shared.wake.notify_all();
    }

    /// Stop accepting work and drain what is already queued.
    pub fn abort(&self) {
        self.shared.cancel.store(true, Ordering::Relaxed);
        self.shared.lock().abort();
        self.shared.wake.notify_all();
    }

    /// Close the queue, wait for every job to finish and return the
    /// report.
    #[must_use]
    pub fn finish(mut self) -> SchedulerReport {
        self.close_and_join()
    }

    fn close_and_join(&mut self) -> SchedulerReport {
        self.shared.lock().closed = true;
        self.shared.wake.notify_all();
        let Some(handle) = self.dispatcher.take() else {
            return SchedulerReport::default();
        };
        let report = handle.join().unwrap_or_else(|_| {
            tracing::error!("dispatcher panicked");
            let mut state = self.shared.lock();
            std::mem::take(&mut state.report)
        });
        tracing::info!(
            composites = report.composites.len(),
            masks = report.masks.len(),
            failures = report.failures.len(),
            "scheduler finished"
        );
        report
    }
}

impl Drop for WorkScheduler {
    fn drop(&mut self) {
        if self.dispatcher.is_some() {
            let _ = self.close_and_join();
        }
    }
}

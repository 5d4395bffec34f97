//! Partitioning usable frames into per-position stacks.

use serde::Serialize;

use crate::frame::{Frame, Position};

/// Frames captured at one scan position, ordered by ascending depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageStack {
    name: String,
    position: Position,
    frames: Vec<Frame>,
}

impl ImageStack {
    /// Stack name shared by all frames, e.g. `_x_00010_y_00020_`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scan position shared by all frames.
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    /// Frames in ascending depth order.
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Number of frames.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the stack has no frames. Stacks built by
    /// [`group_frames`] never are.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames in the order handed to the alignment tool: farthest depth
    /// first, which keeps the widest field of view as the reference.
    pub fn alignment_order(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().rev()
    }
}

/// Partition `frames` into stacks.
///
/// Frames are walked in reverse file-name order, consuming each maximal
/// run that shares a stack name. Every frame lands in exactly one stack;
/// a position with a single usable frame becomes a one-frame stack. The
/// returned stacks are sorted by name and each stack's frames by
/// ascending depth.
#[must_use]
pub fn group_frames(mut frames: Vec<Frame>) -> Vec<ImageStack> {
    frames.sort_by(|a, b| b.file_name().cmp(a.file_name()));

    let mut stacks: Vec<ImageStack> = Vec::new();
    for frame in frames {
        match stacks.last_mut() {
            Some(stack) if stack.name == frame.stack_name() => stack.frames.push(frame),
            _ => stacks.push(ImageStack {
                name: frame.stack_name().to_owned(),
                position: frame.position(),
                frames: vec![frame],
            }),
        }
    }

    for stack in &mut stacks {
        stack.frames.sort_by_key(|f| (f.depth(), f.file_name().to_owned()));
    }
    stacks.sort_by(|a, b| a.name.cmp(&b.name));
    stacks
}

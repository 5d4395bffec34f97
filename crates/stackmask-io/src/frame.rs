//! Captured frames and the filename convention that encodes their scan
//! position and focus depth.
//!
//! The capture subsystem names every frame
//! `<prefix>_x_<5 digits>_y_<5 digits>_step_<5 digits>_.<ext>`. The part
//! up to and including the `y` field identifies the stack; `step` is the
//! focus depth index.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProcessError, ProcessResult};

/// Width of every numeric field in a frame name.
pub const FIELD_DIGITS: usize = 5;

/// Scan position of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal scan coordinate.
    pub x: u32,
    /// Vertical (rotation) scan coordinate.
    pub y: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x={} y={}", self.x, self.y)
    }
}

/// A captured image file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    path: PathBuf,
    stack: String,
    position: Position,
    depth: u32,
}

/// Split a trailing fixed-width number off `s`.
fn split_number(s: &str) -> Option<(&str, u32)> {
    let cut = s.len().checked_sub(FIELD_DIGITS)?;
    let (head, digits) = s.split_at_checked(cut)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((head, digits.parse().ok()?))
}

/// Parse `<prefix>_x_#####_y_#####_step_#####_.<ext>` into
/// `(stack name, position, depth)`.
fn parse_name(name: &str) -> Option<(String, Position, u32)> {
    let (stem, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    let stem = stem.strip_suffix('_')?;
    let (head, depth) = split_number(stem)?;
    let stack = head.strip_suffix("step_")?;

    let (head, y) = split_number(stack.strip_suffix('_')?)?;
    let head = head.strip_suffix("_y_")?;
    let (head, x) = split_number(head)?;
    head.strip_suffix("_x_")?;

    Some((stack.to_owned(), Position { x, y }, depth))
}

impl Frame {
    /// Parse a frame from its path.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::FrameName`] if the file name does not
    /// follow the capture naming convention.
    pub fn parse(path: impl Into<PathBuf>) -> ProcessResult<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ProcessError::FrameName(path.display().to_string()))?;
        let (stack, position, depth) =
            parse_name(name).ok_or_else(|| ProcessError::FrameName(name.to_owned()))?;
        Ok(Self {
            path,
            stack,
            position,
            depth,
        })
    }

    /// Location of the frame on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the stack this frame belongs to, e.g. `_x_00010_y_00020_`.
    #[must_use]
    pub fn stack_name(&self) -> &str {
        &self.stack
    }

    /// Scan position.
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    /// Focus depth index.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// File name used for sorting frames the way the capture
    /// subsystem lists them.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Build a frame file name from its parts.
#[must_use]
pub fn frame_name(position: Position, depth: u32, extension: &str) -> String {
    format!(
        "_x_{:05}_y_{:05}_step_{depth:05}_.{extension}",
        position.x, position.y
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_capture_names() {
        let frame = Frame::parse("/scan/RAW/_x_00010_y_00020_step_00004_.tif").unwrap();
        assert_eq!(frame.stack_name(), "_x_00010_y_00020_");
        assert_eq!(frame.position(), Position { x: 10, y: 20 });
        assert_eq!(frame.depth(), 4);
        assert_eq!(frame.file_name(), "_x_00010_y_00020_step_00004_.tif");
    }

    #[test]
    fn keeps_prefix_in_stack_name() {
        let frame = Frame::parse("ant_x_00100_y_00000_step_00250_.jpg").unwrap();
        assert_eq!(frame.stack_name(), "ant_x_00100_y_00000_");
        assert_eq!(frame.depth(), 250);
    }

    #[test]
    fn rejects_other_names() {
        for name in [
            "IMG_0001.tif",
            "_x_00010_y_00020_step_00004.tif",
            "_x_0010_y_00020_step_00004_.tif",
            "_x_00010_y_00020_step_0000a_.tif",
            "_x_00010_y_00020_step_00004_",
            "_x_00010_z_00020_step_00004_.tif",
        ] {
            assert!(
                matches!(Frame::parse(name), Err(ProcessError::FrameName(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn frame_name_round_trips() {
        let position = Position { x: 3, y: 40 };
        let name = frame_name(position, 7, "tif");
        assert_eq!(name, "_x_00003_y_00040_step_00007_.tif");
        let frame = Frame::parse(name).unwrap();
        assert_eq!(frame.position(), position);
        assert_eq!(frame.depth(), 7);
    }
}

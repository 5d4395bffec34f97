//! External tool discovery and invocation.
//!
//! Tools are always run with an explicit argument vector (never through
//! a shell), stdin closed, and stderr captured for error reporting.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::{ProcessError, ProcessResult};

/// How a stack of frames becomes a composite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackingMethod {
    /// Align with one tool, then fuse the aligned frames with another.
    #[default]
    AlignFuse,
    /// A single tool that aligns and fuses in one pass.
    FocusStack,
}

/// Names or paths of the external binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// Alignment tool (`align_image_stack` interface).
    pub align: String,
    /// Exposure fusion tool (`enfuse` interface).
    pub fuse: String,
    /// Single-pass focus stacker (`focus-stack` interface).
    pub focus_stack: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            align: "align_image_stack".to_owned(),
            fuse: "enfuse".to_owned(),
            focus_stack: "focus-stack".to_owned(),
        }
    }
}

/// Resolved tool locations for one stacking method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalTools {
    /// Align then fuse.
    AlignFuse {
        /// Resolved alignment binary.
        align: PathBuf,
        /// Resolved fusion binary.
        fuse: PathBuf,
    },
    /// Single-pass focus stacker.
    FocusStack {
        /// Resolved binary.
        focus_stack: PathBuf,
    },
}

fn resolve(tool: &str) -> ProcessResult<PathBuf> {
    which::which(tool).map_err(|source| ProcessError::ToolMissing {
        tool: tool.to_owned(),
        source,
    })
}

impl ExternalTools {
    /// Resolve the binaries `method` needs on `PATH` (or as given paths).
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::ToolMissing`] for the first binary that
    /// cannot be found.
    pub fn verify(method: StackingMethod, paths: &ToolPaths) -> ProcessResult<Self> {
        let tools = match method {
            StackingMethod::AlignFuse => Self::AlignFuse {
                align: resolve(&paths.align)?,
                fuse: resolve(&paths.fuse)?,
            },
            StackingMethod::FocusStack => Self::FocusStack {
                focus_stack: resolve(&paths.focus_stack)?,
            },
        };
        tracing::debug!(?tools, "external tools resolved");
        Ok(tools)
    }
}

/// Builder for one external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ToolCommand {
    /// Start a command for `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Append `<flag><path>`, e.g. `--output=/tmp/x.tif`.
    #[must_use]
    pub fn flag_path(self, flag: &str, path: &Path) -> Self {
        let mut joined = OsString::from(flag);
        joined.push(path.as_os_str());
        self.arg(joined)
    }

    /// The argument vector, without the program.
    #[must_use]
    pub fn argv(&self) -> &[OsString] {
        &self.args
    }

    /// Run the command in `working_dir` and wait for it.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure: the process could not be
    /// started, or it exited unsuccessfully (with its trimmed stderr).
    pub fn run(&self, working_dir: &Path) -> Result<(), String> {
        tracing::debug!(
            program = %self.program.display(),
            args = ?self.args,
            "running external tool"
        );
        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| format!("cannot start {}: {e}", self.program.display()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            Err(format!("{} {}", self.program.display(), output.status))
        } else {
            Err(format!("{} {}: {stderr}", self.program.display(), output.status))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_arguments() {
        let cmd = ToolCommand::new("enfuse")
            .arg("--hard-mask")
            .args(["a.tif", "b.tif"])
            .flag_path("--output=", Path::new("/out/c.tif"));
        let argv: Vec<&OsStr> = cmd.argv().iter().map(OsString::as_os_str).collect();
        assert_eq!(
            argv,
            vec![
                OsStr::new("--hard-mask"),
                OsStr::new("a.tif"),
                OsStr::new("b.tif"),
                OsStr::new("--output=/out/c.tif"),
            ]
        );
    }

    #[test]
    fn missing_tool_is_reported() {
        let paths = ToolPaths {
            focus_stack: "stackmask-no-such-tool".to_owned(),
            ..ToolPaths::default()
        };
        let err = ExternalTools::verify(StackingMethod::FocusStack, &paths).unwrap_err();
        assert!(err.is_catastrophic());
        assert!(err.to_string().contains("stackmask-no-such-tool"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_tool_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = ToolCommand::new("/bin/sh")
            .args(["-c", "echo boom >&2; exit 3"])
            .run(dir.path())
            .unwrap_err();
        assert!(err.contains("boom"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn successful_tool_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        ToolCommand::new("/bin/sh")
            .args(["-c", "touch marker"])
            .run(dir.path())
            .unwrap();
        assert!(dir.path().join("marker").exists());
    }

    #[test]
    fn method_parses_snake_case() {
        let method: StackingMethod = serde_json::from_str("\"focus_stack\"").unwrap();
        assert_eq!(method, StackingMethod::FocusStack);
    }
}

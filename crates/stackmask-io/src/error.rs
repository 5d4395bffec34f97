//! Error types for stacking, masking and scheduling.

use std::path::PathBuf;

use stackmask_pipeline::PipelineError;
use thiserror::Error;

/// Result type for filesystem and external-tool operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Errors that can occur while turning captured frames into composites,
/// masks and cutouts.
///
/// Every variant except [`ToolMissing`](Self::ToolMissing) is scoped to
/// one frame or one stack: it is logged and the remaining work carries
/// on.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// A frame or composite could not be read or decoded.
    #[error("cannot decode {}: {source}", path.display())]
    Decode {
        /// The offending file.
        path: PathBuf,
        /// What went wrong.
        #[source]
        source: PipelineError,
    },

    /// The alignment tool failed for a stack.
    #[error("alignment failed for stack {stack}: {message}")]
    Alignment {
        /// Stack name.
        stack: String,
        /// Exit status and captured stderr.
        message: String,
    },

    /// The fusion tool failed for a stack.
    #[error("fusion failed for stack {stack}: {message}")]
    Fusion {
        /// Stack name.
        stack: String,
        /// Exit status and captured stderr.
        message: String,
    },

    /// Edge segmentation found no foreground contour.
    #[error("no foreground contour in {}", path.display())]
    Segmentation {
        /// The composite that could not be masked.
        path: PathBuf,
    },

    /// The matte pipeline failed for another reason.
    #[error("masking failed for {}: {source}", path.display())]
    Masking {
        /// The composite being masked.
        path: PathBuf,
        /// What went wrong.
        #[source]
        source: PipelineError,
    },

    /// No frame of a burst survived the focus check.
    #[error("no usable frames for stack {stack}")]
    NoUsableFrames {
        /// Stack name.
        stack: String,
    },

    /// A required external binary is not installed.
    #[error("external tool {tool:?} not found")]
    ToolMissing {
        /// The configured program name or path.
        tool: String,
        /// Lookup failure.
        #[source]
        source: which::Error,
    },

    /// A frame filename does not follow the capture naming convention.
    #[error("not a frame name: {0}")]
    FrameName(String),

    /// An output image could not be encoded.
    #[error("cannot encode {}: {source}", path.display())]
    Encode {
        /// Destination path.
        path: PathBuf,
        /// Encoder failure.
        #[source]
        source: image::ImageError,
    },

    /// Configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Filesystem failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Project file parse failure.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A worker thread could not be started.
    #[error("cannot start worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl ProcessError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error should stop the whole run rather than a
    /// single stack.
    #[must_use]
    pub const fn is_catastrophic(&self) -> bool {
        matches!(self, Self::ToolMissing { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_tools_are_catastrophic() {
        let missing = ProcessError::ToolMissing {
            tool: "enfuse".to_owned(),
            source: which::Error::CannotFindBinaryPath,
        };
        assert!(missing.is_catastrophic());
        let fusion = ProcessError::Fusion {
            stack: "_x_00010_y_00020_".to_owned(),
            message: "exit status 1".to_owned(),
        };
        assert!(!fusion.is_catastrophic());
    }

    #[test]
    fn messages_name_the_stack() {
        let err = ProcessError::Alignment {
            stack: "_x_00010_y_00020_".to_owned(),
            message: "exit status 2".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "alignment failed for stack _x_00010_y_00020_: exit status 2"
        );
    }

    #[test]
    fn io_helper_keeps_path() {
        let err = ProcessError::io(
            "/tmp/missing.tif",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(err.to_string().contains("/tmp/missing.tif"));
    }
}

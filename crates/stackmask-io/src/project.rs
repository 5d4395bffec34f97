//! Scan project directory layout.
//!
//! ```text
//! <root>/
//!   RAW/       captured frames, one file per position and depth
//!   stacked/   composites, masks and cutouts
//! ```

use std::path::{Path, PathBuf};

use stackmask_pipeline::CutoutMode;

use crate::assemble::composite_path;
use crate::error::{ProcessError, ProcessResult};
use crate::frame::Frame;
use crate::masking::{cutout_path, mask_path};

const RAW_DIR: &str = "RAW";
const STACKED_DIR: &str = "stacked";

/// A scan project on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    /// Open an existing project directory.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Io`] if `root` is not a directory.
    pub fn open(root: impl Into<PathBuf>) -> ProcessResult<Self> {
        let root = root.into();
        let metadata = std::fs::metadata(&root).map_err(|e| ProcessError::io(&root, e))?;
        if !metadata.is_dir() {
            return Err(ProcessError::io(
                &root,
                std::io::Error::new(std::io::ErrorKind::NotADirectory, "not a directory"),
            ));
        }
        Ok(Self { root })
    }

    /// The project directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the captured frames.
    #[must_use]
    pub fn raw_dir(&self) -> PathBuf {
        self.root.join(RAW_DIR)
    }

    /// Directory holding composites and their masks, created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Io`] if the directory cannot be created.
    pub fn stacked_dir(&self) -> ProcessResult<PathBuf> {
        let dir = self.root.join(STACKED_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| ProcessError::io(&dir, e))?;
        Ok(dir)
    }

    /// Frames in `RAW/`, sorted by file name.
    ///
    /// Files that do not follow the frame naming convention are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Io`] if `RAW/` cannot be listed.
    pub fn discover_frames(&self) -> ProcessResult<Vec<Frame>> {
        let raw = self.raw_dir();
        let mut frames = Vec::new();
        for path in list_files(&raw)? {
            match Frame::parse(&path) {
                Ok(frame) => frames.push(frame),
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "skipping file"),
            }
        }
        frames.sort_by(|a, b| a.file_name().cmp(b.file_name()));
        tracing::info!(dir = %raw.display(), count = frames.len(), "frames discovered");
        Ok(frames)
    }

    /// Composites in `stacked/`, sorted by file name.
    ///
    /// Masks, cutouts and in-progress staging files are excluded.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Io`] if `stacked/` cannot be listed.
    pub fn discover_composites(&self) -> ProcessResult<Vec<PathBuf>> {
        let dir = self.stacked_dir()?;
        let mut composites: Vec<PathBuf> = list_files(&dir)?
            .into_iter()
            .filter(|p| is_composite(p))
            .collect();
        composites.sort();
        Ok(composites)
    }

    /// Whether the composite, mask and cutout for `stack_name` all exist.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Io`] if `stacked/` cannot be created.
    pub fn is_complete(&self, stack_name: &str, mode: CutoutMode) -> ProcessResult<bool> {
        let composite = composite_path(&self.stacked_dir()?, stack_name);
        Ok(composite.is_file()
            && mask_path(&composite).is_file()
            && cutout_path(&composite, mode).is_none_or(|p| p.is_file()))
    }
}

fn list_files(dir: &Path) -> ProcessResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| ProcessError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ProcessError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

fn is_composite(path: &Path) -> bool {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    let is_tiff = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("tif"));
    is_tiff && !stem.starts_with('.') && !stem.ends_with("_cutout")
}

//! Atomic image output.
//!
//! Every artifact is written to a temporary file in its destination
//! directory and renamed into place, so an output path either holds a
//! complete image or does not exist.

use std::io::{BufWriter, Write};
use std::path::Path;

use image::{DynamicImage, ImageFormat};
use tempfile::NamedTempFile;

use crate::error::{ProcessError, ProcessResult};

/// Create a temporary file next to `destination`.
///
/// # Errors
///
/// Returns [`ProcessError::Io`] if the directory is not writable.
pub fn staging_file(destination: &Path) -> ProcessResult<NamedTempFile> {
    let dir = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let extension = destination
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    tempfile::Builder::new()
        .prefix(".stackmask-")
        .suffix(&extension)
        .tempfile_in(dir)
        .map_err(|e| ProcessError::io(dir, e))
}

/// Move a finished staging file to `destination`, replacing any
/// existing file.
///
/// # Errors
///
/// Returns [`ProcessError::Io`] if the rename fails.
pub fn commit(staging: NamedTempFile, destination: &Path) -> ProcessResult<()> {
    staging
        .persist(destination)
        .map_err(|e| ProcessError::io(destination, e.error))?;
    Ok(())
}

/// Encode `image` as `format` and atomically write it to `destination`.
///
/// # Errors
///
/// Returns [`ProcessError::Encode`] if the image cannot be encoded in
/// `format` and [`ProcessError::Io`] on filesystem failure.
pub fn write_image(
    image: &DynamicImage,
    format: ImageFormat,
    destination: &Path,
) -> ProcessResult<()> {
    let staging = staging_file(destination)?;
    {
        let mut writer = BufWriter::new(staging.as_file());
        image
            .write_to(&mut writer, format)
            .map_err(|source| ProcessError::Encode {
                path: destination.to_path_buf(),
                source,
            })?;
        writer
            .flush()
            .map_err(|e| ProcessError::io(destination, e))?;
    }
    commit(staging, destination)
}

/// Decode an image file, detecting the format from its content.
///
/// # Errors
///
/// Returns [`ProcessError::Io`] if the file cannot be opened and
/// [`ProcessError::Decode`] if it cannot be decoded.
pub fn read_image(path: &Path) -> ProcessResult<DynamicImage> {
    let bytes = std::fs::read(path).map_err(|e| ProcessError::io(path, e))?;
    stackmask_pipeline::grayscale::decode(&bytes).map_err(|source| ProcessError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn written_image_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.png");
        let img = DynamicImage::ImageLuma8(image::GrayImage::from_fn(4, 3, |x, _| {
            image::Luma([if x < 2 { 255 } else { 0 }])
        }));
        write_image(&img, ImageFormat::Png, &path).unwrap();
        let back = read_image(&path).unwrap().to_luma8();
        assert_eq!(back, img.to_luma8());
        // Only the final file remains.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_encode_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cutout.tga");
        // No TGA encoder is compiled in.
        let img = DynamicImage::ImageRgba8(image::RgbaImage::new(4, 4));
        let err = write_image(&img, ImageFormat::Tga, &path).unwrap_err();
        assert!(matches!(err, ProcessError::Encode { .. }));
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.tif");
        std::fs::write(&path, b"garbage").unwrap();
        assert!(matches!(
            read_image(&path),
            Err(ProcessError::Decode { .. })
        ));
    }
}

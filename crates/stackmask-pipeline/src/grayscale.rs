//! Image decoding and grayscale conversion.
//!
//! Accepts raw image bytes (TIFF, PNG, JPEG, BMP) and produces either the
//! RGB composite layout used by the matte pipeline or a single-channel
//! grayscale image used for focus scoring.

use image::{DynamicImage, GrayImage};

use crate::types::{PipelineError, RgbImage};

/// Decode raw image bytes into a [`DynamicImage`].
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    Ok(image::load_from_memory(bytes)?)
}

/// Decode raw image bytes into an 8-bit RGB image.
///
/// Alpha is discarded; 16-bit inputs (common for fused TIFFs) are
/// reduced to 8 bits per channel.
///
/// # Errors
///
/// Same as [`decode`].
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    Ok(decode(bytes)?.to_rgb8())
}

/// Decode raw image bytes and convert to grayscale.
///
/// The standard luminance formula is used for RGB-to-gray conversion:
/// `0.299*R + 0.587*G + 0.114*B`.
///
/// # Errors
///
/// Same as [`decode`].
pub fn decode_and_grayscale(bytes: &[u8]) -> Result<GrayImage, PipelineError> {
    Ok(decode(bytes)?.to_luma8())
}

/// Convert an RGB image to grayscale.
#[must_use]
pub fn to_gray(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Encode an RGB image as PNG bytes.
    fn encode_png(img: &RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )
        .unwrap();
        buf
    }

    #[test]
    fn empty_input_returns_error() {
        assert!(matches!(decode(&[]), Err(PipelineError::EmptyInput)));
    }

    #[test]
    fn corrupt_bytes_returns_image_decode_error() {
        let result = decode_rgb(&[0xFF, 0xFE, 0x00, 0x01]);
        assert!(matches!(result, Err(PipelineError::ImageDecode(_))));
    }

    #[test]
    fn decode_rgb_preserves_pixels() {
        let img = RgbImage::from_fn(3, 2, |x, y| image::Rgb([x as u8 * 40, y as u8 * 60, 7]));
        let decoded = decode_rgb(&encode_png(&img)).unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn grayscale_conversion_weights_green_highest() {
        let red = decode_and_grayscale(&encode_png(&RgbImage::from_pixel(
            1,
            1,
            image::Rgb([255, 0, 0]),
        )))
        .unwrap();
        let green = decode_and_grayscale(&encode_png(&RgbImage::from_pixel(
            1,
            1,
            image::Rgb([0, 255, 0]),
        )))
        .unwrap();
        let blue = to_gray(&RgbImage::from_pixel(1, 1, image::Rgb([0, 0, 255])));

        let (r, g, b) = (
            red.get_pixel(0, 0).0[0],
            green.get_pixel(0, 0).0[0],
            blue.get_pixel(0, 0).0[0],
        );
        assert!(g > r && r > b, "expected green > red > blue, got R={r} G={g} B={b}");
    }
}

//! Integration test: extract the matte of a synthetic scan composite.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use stackmask_pipeline::types::{BACKGROUND, FOREGROUND, is_binary};
use stackmask_pipeline::{
    CutoutMode, FilterBankEdgeDetector, MatteConfig, PipelineError, RgbImage, cutout,
};

const SIZE: u32 = 240;
const SIDE: u32 = 100;
const LO: u32 = (SIZE - SIDE) / 2;
const HI: u32 = LO + SIDE;

/// Blue specimen on a mid-gray backdrop.
fn composite() -> RgbImage {
    RgbImage::from_fn(SIZE, SIZE, |x, y| {
        if (LO..HI).contains(&x) && (LO..HI).contains(&y) {
            image::Rgb([30, 30, 160])
        } else {
            image::Rgb([130, 130, 130])
        }
    })
}

fn config() -> MatteConfig {
    MatteConfig {
        background_min: 100.0,
        background_max: 150.0,
        ..MatteConfig::default()
    }
}

fn distance_outside(x: u32, y: u32) -> u32 {
    let dx = LO.saturating_sub(x).max(x.saturating_sub(HI - 1));
    let dy = LO.saturating_sub(y).max(y.saturating_sub(HI - 1));
    dx.max(dy)
}

#[test]
fn specimen_mask_matches_footprint() {
    let detector = FilterBankEdgeDetector::default();
    let result = stackmask_pipeline::process(&composite(), &config(), &detector)
        .expect("pipeline should succeed");

    assert_eq!(result.mask.dimensions(), (SIZE, SIZE));
    assert!(is_binary(&result.mask));

    let foreground = stackmask_pipeline::cleanup::count_foreground(&result.mask);
    let footprint = u64::from(SIDE * SIDE);
    eprintln!("foreground {foreground} / footprint {footprint}");
    assert!(foreground * 100 >= footprint * 95, "mask too small: {foreground}");
    assert!(
        foreground <= u64::from((SIDE + 8) * (SIDE + 8)),
        "mask too large: {foreground}"
    );

    for (x, y, p) in result.mask.enumerate_pixels() {
        if distance_outside(x, y) > 6 {
            assert_eq!(p.0[0], BACKGROUND, "stray foreground at ({x}, {y})");
        }
    }
    assert_eq!(result.mask.get_pixel(SIZE / 2, SIZE / 2).0[0], FOREGROUND);
}

#[test]
fn repeated_runs_are_identical() {
    let detector = FilterBankEdgeDetector::default();
    let a = stackmask_pipeline::process(&composite(), &config(), &detector).unwrap();
    let b = stackmask_pipeline::process(&composite(), &config(), &detector).unwrap();
    assert_eq!(a.mask, b.mask);
}

#[test]
fn downsampled_run_returns_full_size_mask() {
    let detector = FilterBankEdgeDetector::default();
    let config = MatteConfig {
        working_resolution: 120,
        min_artifact_black: 200,
        min_artifact_white: 200,
        ..config()
    };
    let result = stackmask_pipeline::process(&composite(), &config, &detector).unwrap();
    assert_eq!(result.working_dimensions.width, 120);
    assert_eq!(result.mask.dimensions(), (SIZE, SIZE));
    assert!(is_binary(&result.mask));
    assert_eq!(result.mask.get_pixel(SIZE / 2, SIZE / 2).0[0], FOREGROUND);
    assert_eq!(result.mask.get_pixel(5, 5).0[0], BACKGROUND);
}

#[test]
fn flattened_cutout_blacks_out_backdrop() {
    let detector = FilterBankEdgeDetector::default();
    let image = composite();
    let result = stackmask_pipeline::process(&image, &config(), &detector).unwrap();
    let Some(stackmask_pipeline::Cutout::Flattened(flat)) =
        cutout::compose(&image, &result.mask, CutoutMode::Flattened).unwrap()
    else {
        unreachable!("flattened mode always yields a flattened cutout");
    };
    assert_eq!(flat.get_pixel(2, 2).0, [0, 0, 0]);
    assert_eq!(flat.get_pixel(SIZE / 2, SIZE / 2).0, [30, 30, 160]);
}

#[test]
fn featureless_composite_has_no_contours() {
    let detector = FilterBankEdgeDetector::default();
    let flat = RgbImage::from_pixel(64, 64, image::Rgb([130, 130, 130]));
    let result = stackmask_pipeline::process(&flat, &config(), &detector);
    assert!(matches!(result, Err(PipelineError::NoContours)));
}

#[test]
fn specimen_touching_left_edge_is_segmented() {
    let detector = FilterBankEdgeDetector::default();
    let image = RgbImage::from_fn(200, 200, |x, y| {
        if x < 120 && (40..160).contains(&y) {
            image::Rgb([30, 30, 160])
        } else {
            image::Rgb([130, 130, 130])
        }
    });
    let result = stackmask_pipeline::process(&image, &config(), &detector)
        .expect("a specimen on the image edge still has a contour");
    assert!(is_binary(&result.mask));
    assert_eq!(result.mask.get_pixel(60, 100).0[0], FOREGROUND);
    assert_eq!(result.mask.get_pixel(15, 100).0[0], FOREGROUND);
    assert_eq!(result.mask.get_pixel(180, 100).0[0], BACKGROUND);
    assert_eq!(result.mask.get_pixel(60, 10).0[0], BACKGROUND);
}

//! Integration test: batch runs over a project directory.

#![cfg(unix)]
#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use stackmask_io::frame::Position;
use stackmask_io::{Phases, Project, ProjectConfig, SchedulerConfig, run_project};
use stackmask_pipeline::{CutoutMode, RgbImage};

use common::{entries, fake_tools, write_burst};

fn project() -> (tempfile::TempDir, Project, std::path::PathBuf) {
    let root = tempfile::tempdir().unwrap();
    let tools = root.path().join("tools");
    std::fs::create_dir(&tools).unwrap();
    std::fs::create_dir(root.path().join("RAW")).unwrap();
    let project = Project::open(root.path()).unwrap();
    (root, project, tools)
}

fn config(tools: &std::path::Path) -> ProjectConfig {
    let mut config = ProjectConfig {
        stack: fake_tools(tools, true, true),
        scheduler: SchedulerConfig {
            stack_workers: 2,
            mask_workers: 2,
            poll_interval_ms: 5,
            mask_after_stack: false,
        },
        ..ProjectConfig::default()
    };
    config.focus.enabled = false;
    config
}

#[test]
fn every_position_gets_a_composite() {
    let (_root, project, tools) = project();
    let raw = project.raw_dir();
    write_burst(&raw, Position { x: 0, y: 0 }, &[0, 1, 2]);
    write_burst(&raw, Position { x: 10, y: 0 }, &[0, 1]);
    write_burst(&raw, Position { x: 20, y: 0 }, &[0]);

    let report = run_project(
        &project,
        &config(&tools),
        Phases::Stack,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.composites.len(), 3);
    assert!(report.masks.is_empty());
    assert_eq!(
        entries(&project.stacked_dir().unwrap()),
        vec![
            "_x_00000_y_00000_.tif".to_owned(),
            "_x_00010_y_00000_.tif".to_owned(),
            "_x_00020_y_00000_.tif".to_owned(),
        ]
    );
}

#[test]
fn failed_stacks_do_not_fail_the_run() {
    let (_root, project, tools) = project();
    let raw = project.raw_dir();
    write_burst(&raw, Position { x: 0, y: 0 }, &[0, 1]);
    write_burst(&raw, Position { x: 5, y: 0 }, &[0]);
    let mut config = config(&tools);
    config.stack = fake_tools(&tools, true, false);

    let report = run_project(
        &project,
        &config,
        Phases::Stack,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

    // The single-frame stack needs no tools; the other fails to fuse.
    assert_eq!(report.composites.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].item, "_x_00000_y_00000_");
    assert!(!report.has_catastrophic_failure());
}

#[test]
fn mask_phase_masks_existing_composites() {
    let (_root, project, tools) = project();
    let stacked = project.stacked_dir().unwrap();
    RgbImage::from_fn(160, 160, |x, y| {
        if (50..110).contains(&x) && (50..110).contains(&y) {
            image::Rgb([30, 30, 160])
        } else {
            image::Rgb([130, 130, 130])
        }
    })
    .save(stacked.join("_x_00000_y_00000_.tif"))
    .unwrap();
    RgbImage::from_pixel(64, 64, image::Rgb([120, 120, 120]))
        .save(stacked.join("_x_00001_y_00000_.tif"))
        .unwrap();

    let mut config = config(&tools);
    config.matte.background_min = 100.0;
    config.matte.background_max = 150.0;
    config.matte.min_artifact_black = 100;
    config.matte.min_artifact_white = 100;
    config.cutout = CutoutMode::Flattened;

    let report = run_project(
        &project,
        &config,
        Phases::Mask,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

    assert_eq!(report.masks.len(), 1);
    // The featureless composite is kept, unmasked.
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].item, "_x_00001_y_00000_");
    assert!(project.is_complete("_x_00000_y_00000_", CutoutMode::Flattened).unwrap());
    assert!(stacked.join("_x_00001_y_00000_.tif").is_file());
    assert!(!stacked.join("_x_00001_y_00000__masked.png").exists());
}

#[test]
fn missing_tools_stop_the_run_up_front() {
    let (_root, project, tools) = project();
    write_burst(&project.raw_dir(), Position { x: 0, y: 0 }, &[0, 1]);
    let mut config = config(&tools);
    config.stack.tools.align = tools.join("absent").display().to_string();

    let err = run_project(
        &project,
        &config,
        Phases::Stack,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap_err();
    assert!(err.is_catastrophic());
}

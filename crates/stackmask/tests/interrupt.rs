//! Integration test: Ctrl-C lets the running stack finish cleanly.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::panic)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use stackmask_io::frame::{Position, frame_name};

/// Announces itself, stalls, then copies each input to `<prefix>NNNN.tif`.
const SLOW_ALIGN: &str = r#"touch "$STARTED"
sleep 2
prefix=""
while [ $# -gt 0 ]; do
  case "$1" in
    -a) prefix="$2"; shift 2 ;;
    -c) shift 2 ;;
    -*) shift ;;
    *) break ;;
  esac
done
i=0
for f in "$@"; do
  cp "$f" "$(printf '%s%04d.tif' "$prefix" "$i")" || exit 1
  i=$((i + 1))
done
"#;

const FUSE: &str = r#"out=""
first=""
for a in "$@"; do
  case "$a" in
    --output=*) out="${a#--output=}" ;;
    -*) ;;
    *) if [ -z "$first" ]; then first="$a"; fi ;;
  esac
done
cp "$first" "$out"
"#;

fn script(dir: &Path, name: &str, started: &Path, body: &str) -> PathBuf {
    let path = dir.join(name);
    let text = format!("#!/bin/sh\nSTARTED='{}'\n{body}", started.display());
    std::fs::write(&path, text).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn interrupt_drains_running_stack() {
    let root = tempfile::tempdir().unwrap();
    let project = root.path().join("scan");
    let raw = project.join("RAW");
    let tools = root.path().join("tools");
    std::fs::create_dir_all(&raw).unwrap();
    std::fs::create_dir(&tools).unwrap();

    let position = Position { x: 1, y: 2 };
    for depth in 0..2 {
        let img = image::RgbImage::from_pixel(16, 16, image::Rgb([90, 90, 90]));
        img.save(raw.join(frame_name(position, depth, "tif"))).unwrap();
    }

    let started = tools.join("started");
    let align = script(&tools, "align", &started, SLOW_ALIGN);
    let fuse = script(&tools, "fuse", &started, FUSE);
    let config = serde_json::json!({
        "focus": { "enabled": false },
        "stack": { "tools": { "align": align, "fuse": fuse } },
        "scheduler": { "stack_workers": 1, "poll_interval_ms": 50 },
    });
    std::fs::write(project.join("stackmask.json"), config.to_string()).unwrap();

    let child = Command::new(env!("CARGO_BIN_EXE_stackmask"))
        .arg("stack")
        .arg(&project)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    while !started.exists() {
        assert!(Instant::now() < deadline, "aligner never started");
        std::thread::sleep(Duration::from_millis(20));
    }
    std::thread::sleep(Duration::from_millis(300));
    let status = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let output = child.wait_with_output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    // Killed by the signal would leave no exit code.
    assert_eq!(output.status.code(), Some(0), "stdout: {stdout}\nstderr: {stderr}");
    assert!(stdout.contains("Aborted"), "{stdout}");
    assert!(stdout.contains("Composites: 1"), "{stdout}");

    // No staging file or alignment scratch directory is left behind.
    assert_eq!(
        entries(&project.join("stacked")),
        vec!["_x_00001_y_00002_.tif".to_owned()]
    );
}

//! Shared fixtures: synthetic frames and shell-script stand-ins for the
//! external stacking tools.

#![allow(dead_code, clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use stackmask_io::frame::{Position, frame_name};
use stackmask_io::{Frame, StackConfig, StackingMethod, ToolPaths};

/// Records its arguments one per line, then copies every input to
/// `<prefix>NNNN.tif` like the real aligner.
const ALIGN: &str = r#"printf '%s\n' "$@" > "$LOG"
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

/// Records its arguments, then copies the first input to `--output=`.
const FUSE: &str = r#"printf '%s\n' "$@" > "$LOG"
out=""
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

const FAIL: &str = "echo boom >&2\nexit 3\n";

/// Writes the first aligned image, then dies like an aligner killed
/// partway through a stack.
pub const PARTIAL_ALIGN: &str = r#"printf '%s\n' "$@" > "$LOG"
prefix=""
while [ $# -gt 0 ]; do
  case "$1" in
    -a) prefix="$2"; shift 2 ;;
    -c) shift 2 ;;
    -*) shift ;;
    *) break ;;
  esac
done
cp "$1" "${prefix}0000.tif"
ls "$(dirname "$prefix")" > "$LOG.partial"
echo "out of memory" >&2
exit 4
"#;

/// Write an executable `/bin/sh` script logging to `<dir>/<name>.log`.
#[cfg(unix)]
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    let log = dir.join(format!("{name}.log"));
    let text = format!(
        "#!/bin/sh\nLOG='{}'\n{body}",
        log.display()
    );
    std::fs::write(&path, text).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Arguments the script `name` in `dir` was last called with.
pub fn logged_args(dir: &Path, name: &str) -> Vec<String> {
    std::fs::read_to_string(dir.join(format!("{name}.log")))
        .unwrap()
        .lines()
        .map(str::to_owned)
        .collect()
}

/// Fake tool set in `dir`. `align_ok` / `fuse_ok` choose between the
/// working and the failing script.
#[cfg(unix)]
pub fn fake_tools(dir: &Path, align_ok: bool, fuse_ok: bool) -> StackConfig {
    fake_tools_from(
        dir,
        if align_ok { ALIGN } else { FAIL },
        if fuse_ok { FUSE } else { FAIL },
    )
}

/// Fake tool set in `dir` running the given aligner and fuser scripts.
#[cfg(unix)]
pub fn fake_tools_from(dir: &Path, align_body: &str, fuse_body: &str) -> StackConfig {
    let align = script(dir, "align", align_body);
    let fuse = script(dir, "fuse", fuse_body);
    let focus_stack = script(dir, "focus-stack", FUSE);
    StackConfig {
        method: StackingMethod::AlignFuse,
        tools: ToolPaths {
            align: align.display().to_string(),
            fuse: fuse.display().to_string(),
            focus_stack: focus_stack.display().to_string(),
        },
        ..StackConfig::default()
    }
}

/// A textured frame whose brightness encodes its depth, so the composite
/// reveals which input the fake fuser picked.
pub fn write_frame(dir: &Path, position: Position, depth: u32) -> Frame {
    let base = u8::try_from(40 + depth * 30).unwrap_or(u8::MAX);
    let img = image::RgbImage::from_fn(32, 24, |x, y| {
        let v = if (x / 4 + y / 4) % 2 == 0 { base } else { base / 2 };
        image::Rgb([v, v, v])
    });
    let path = dir.join(frame_name(position, depth, "tif"));
    img.save(&path).unwrap();
    Frame::parse(path).unwrap()
}

/// `depths.len()` frames at `position`.
pub fn write_burst(dir: &Path, position: Position, depths: &[u32]) -> Vec<Frame> {
    depths
        .iter()
        .map(|&d| write_frame(dir, position, d))
        .collect()
}

/// Entries directly inside `dir`, sorted.
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

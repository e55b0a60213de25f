//! Integration test: the `retouch` binary on a real file.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::path::PathBuf;
use std::process::{Command, Output};

use retouch_ops::{Image, RgbImage};

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("retouch-cli-{}-{name}", std::process::id()))
}

fn write_input(name: &str) -> PathBuf {
    let path = scratch(name);
    let image = Image::try_from(RgbImage::from_fn(24, 16, |x, _| {
        if x < 12 {
            image::Rgb([220, 60, 20])
        } else {
            image::Rgb([20, 60, 220])
        }
    }))
    .unwrap();
    retouch_io::save(&path, &image).unwrap();
    path
}

fn retouch(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_retouch"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("binary should start")
}

#[test]
fn script_runs_and_exports() {
    let input = write_input("script-in.png");
    let output = scratch("script-out.png");
    let result = retouch(&[
        input.to_str().unwrap(),
        "--step",
        "grayscale",
        "--step",
        "sobel:threshold=0.2",
        "--step",
        "undo",
        "-o",
        output.to_str().unwrap(),
    ]);
    assert!(result.status.success(), "{result:?}");

    let stdout = String::from_utf8(result.stdout).unwrap();
    assert!(stdout.contains("> 1. grayscale"), "{stdout}");
    assert!(stdout.contains("2. sobel:threshold=0.2"), "{stdout}");

    let exported = retouch_io::load(&output).unwrap();
    assert_eq!(exported.channels(), 1);
    std::fs::remove_file(&input).unwrap();
    std::fs::remove_file(&output).unwrap();
}

#[test]
fn failing_step_exits_with_failure() {
    let input = write_input("fail-in.png");
    let result = retouch(&[input.to_str().unwrap(), "--step", "redo"]);
    assert!(!result.status.success());
    let stderr = String::from_utf8(result.stderr).unwrap();
    assert!(stderr.contains("step 1 (redo) failed"), "{stderr}");

    let kept_going = retouch(&[
        input.to_str().unwrap(),
        "--inline",
        "--keep-going",
        "--step",
        "redo",
        "--step",
        "hsv",
        "--json",
    ]);
    assert!(kept_going.status.success(), "{kept_going:?}");
    let summary: serde_json::Value = serde_json::from_slice(&kept_going.stdout).unwrap();
    assert_eq!(summary["entries"].as_array().unwrap().len(), 1);
    std::fs::remove_file(&input).unwrap();
}

#[test]
fn list_operations_needs_no_input() {
    let result = retouch(&["--list-operations"]);
    assert!(result.status.success());
    let stdout = String::from_utf8(result.stdout).unwrap();
    assert!(stdout.contains("multi-otsu: classes=3"), "{stdout}");
}

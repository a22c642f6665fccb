#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bench_front::StageError;
use bench_front::convert::{Converter, ConverterSettings, ProcessConverter, prepare_output_dir};
use bench_front::product::Product;
use chrono::{TimeZone, Utc};
use image::{ImageBuffer, Rgb};
use tempfile::tempdir;

fn product(title: &str) -> Product {
    Product {
        title: title.to_string(),
        identifier: format!("/eodata/Sentinel-2/MSI/L1C/{title}"),
        size_bytes: 800 * 1024 * 1024,
        start_date: Utc.with_ymd_and_hms(2019, 1, 3, 11, 4, 19).unwrap(),
        cloud_cover: 4.0,
        keywords: Vec::new(),
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn converter(program: PathBuf, timeout: Duration) -> ProcessConverter {
    ProcessConverter::new(ConverterSettings {
        program,
        format: "png".into(),
        width: 800,
        style_file: PathBuf::from("/opt/bench/rgb_def.txt"),
        timeout,
    })
}

#[test]
fn command_follows_fixed_argument_template() {
    let converter = converter(PathBuf::from("/usr/local/snap/bin/pconvert"), Duration::from_secs(1));
    let args = converter.command_args(&product("S2B_X.SAFE"), Path::new("/work/S2B_X.SAFE"));
    let args: Vec<String> = args
        .into_iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        args,
        vec![
            "-f",
            "png",
            "-W",
            "800",
            "-p",
            "/opt/bench/rgb_def.txt",
            "-o",
            "/work/S2B_X.SAFE",
            "/eodata/Sentinel-2/MSI/L1C/S2B_X.SAFE",
        ]
    );
}

#[test]
fn output_directory_must_not_exist() {
    let temp = tempdir().unwrap();
    let scene = product("S2A_MSIL1C_20190103.SAFE");

    let created = prepare_output_dir(temp.path(), &scene).unwrap();
    assert!(created.is_dir());
    assert_eq!(created, temp.path().join("S2A_MSIL1C_20190103.SAFE"));

    let err = prepare_output_dir(temp.path(), &scene).unwrap_err();
    assert!(matches!(err, StageError::DirectoryCreate { .. }));

    let err = prepare_output_dir(&temp.path().join("missing"), &scene).unwrap_err();
    assert!(matches!(err, StageError::DirectoryCreate { .. }));

    let err = prepare_output_dir(temp.path(), &product("../escape")).unwrap_err();
    assert!(matches!(err, StageError::DirectoryCreate { .. }));
}

#[test]
fn converter_output_yields_artifact() {
    let temp = tempdir().unwrap();
    let fixture = temp.path().join("fixture.png");
    let image: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(8, 4, Rgb([10, 200, 30]));
    image.save(&fixture).expect("save fixture");

    let script = write_script(
        temp.path(),
        "pconvert",
        &format!(
            "cp {fixture} \"$8/scene.png\"\necho \"reading $9\"\necho \"writing RGB image to '$8/scene.png'...\"",
            fixture = fixture.display()
        ),
    );
    let scene = product("S2B_MSIL1C_OK.SAFE");
    let output_dir = prepare_output_dir(temp.path(), &scene).unwrap();

    let artifact = converter(script, Duration::from_secs(30))
        .convert(&scene, &output_dir)
        .unwrap();

    assert_eq!(artifact, output_dir.join("scene.png"));
    assert!(artifact.is_file());
}

#[test]
fn converter_failures_are_conversion_errors() {
    let temp = tempdir().unwrap();
    let crash = write_script(temp.path(), "crash", "echo 'boom' >&2\nexit 3");
    let silent = write_script(temp.path(), "silent", "echo done");
    let bogus = write_script(
        temp.path(),
        "bogus",
        "echo text > \"$8/scene.png\"\necho \"writing '$8/scene.png'...\"",
    );
    let slow = write_script(temp.path(), "slow", "sleep 5");

    let cases = [
        ("crash", crash, 10_000, "exited with"),
        ("silent", silent, 10_000, "artifact path not found"),
        ("bogus", bogus, 10_000, "not a readable image"),
        ("slow", slow, 300, "did not finish"),
    ];
    for (name, script, timeout_ms, expected) in cases {
        let scene = product(&format!("S2A_{name}.SAFE"));
        let output_dir = prepare_output_dir(temp.path(), &scene).unwrap();
        let err = converter(script, Duration::from_millis(timeout_ms))
            .convert(&scene, &output_dir)
            .unwrap_err();
        match err {
            StageError::Conversion(message) => assert!(
                message.contains(expected),
                "{name}: '{message}' does not mention '{expected}'"
            ),
            other => panic!("{name}: unexpected error {other}"),
        }
    }

    let err = converter(temp.path().join("missing-tool"), Duration::from_secs(1))
        .convert(&product("S2A_missing.SAFE"), temp.path())
        .unwrap_err();
    assert!(matches!(err, StageError::Conversion(_)));
}

#[test]
fn timeout_covers_descendants_holding_output_open() {
    let temp = tempdir().unwrap();
    let marker = temp.path().join("straggler-ran");
    let script = write_script(
        temp.path(),
        "forking",
        &format!(
            "(sleep 4; touch {marker}) &\necho \"writing '/nope.png'...\"\nexit 0",
            marker = marker.display()
        ),
    );
    let scene = product("S2A_forking.SAFE");
    let output_dir = prepare_output_dir(temp.path(), &scene).unwrap();

    let started = Instant::now();
    let err = converter(script, Duration::from_millis(300))
        .convert(&scene, &output_dir)
        .unwrap_err();
    let elapsed = started.elapsed();

    match err {
        StageError::Conversion(message) => {
            assert!(message.contains("did not finish"), "{message}")
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(elapsed < Duration::from_secs(3), "convert took {elapsed:?}");

    std::thread::sleep(Duration::from_millis(4500).saturating_sub(elapsed));
    assert!(!marker.exists(), "background process outlived the timeout");
}

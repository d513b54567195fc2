// tests/cli_tests.rs
//
// Exit-code contract of the etas_eval binary.


use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use eval_testkit::{fixture, write_manifest};

fn run_bin(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_etas_eval"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("ETAS_EVAL_CATALOG_PATH")
        .env_remove("ETAS_EVAL_FORECAST_DURATION_MILLIS")
        .env_remove("ETAS_EVAL_MULTI_MAG")
        .output()
        .expect("failed to run etas_eval binary")
}

fn s(p: &Path) -> &str {
    p.to_str().unwrap()
}

#[test]
fn completed_run_exits_zero() {
    let fx = fixture(true);
    let output = run_bin(&[
        "0",
        s(&fx.manifest),
        s(&fx.output_dir),
        "--catalog",
        s(&fx.catalog),
    ]);
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(fx.output_dir.join("SimDir42_meta.json").is_file());
    assert!(fx.output_dir.join("SimDir42_stest_result.json").is_file());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Finished processing forecast in"),
        "missing timing line: {stderr}"
    );
}

#[test]
fn exhausted_manifest_exits_zero_without_outputs() {
    let fx = fixture(true);
    let output = run_bin(&["3", s(&fx.manifest), s(&fx.output_dir)]);
    assert_eq!(output.status.code(), Some(0));
    assert!(!fx.output_dir.exists());
}

#[test]
fn missing_forecast_exits_255_without_outputs() {
    let fx = fixture(true);
    let empty = fx.root.path().join("EmptySim");
    fs::create_dir_all(&empty).unwrap();
    write_manifest(&fx.manifest, &[&empty]);

    let output = run_bin(&["0", s(&fx.manifest), s(&fx.output_dir)]);
    assert_eq!(output.status.code(), Some(255));
    assert!(!fx.output_dir.exists());
}

#[test]
fn missing_catalog_exits_one() {
    let fx = fixture(true);
    let missing = fx.root.path().join("nope.csv");
    let output = run_bin(&[
        "0",
        s(&fx.manifest),
        s(&fx.output_dir),
        "--catalog",
        s(&missing),
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!fx.output_dir.join("SimDir42_meta.json").exists());
}

#[test]
fn settings_file_and_flags() {
    let fx = fixture(true);
    let yaml = fx.root.path().join("settings.yaml");
    fs::write(
        &yaml,
        "forecast_duration_millis: 86400000\nobserved_catalog_name: anss\n",
    )
    .unwrap();

    let output = run_bin(&[
        "0",
        s(&fx.manifest),
        s(&fx.output_dir),
        "--config",
        s(&yaml),
        "--catalog",
        s(&fx.catalog),
        "--multi-mag",
    ]);
    assert_eq!(output.status.code(), Some(0));

    let meta: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(fx.output_dir.join("SimDir42_meta.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(meta["forecast_duration_millis"], 86_400_000);
    assert_eq!(meta["observed_catalog_name"], "anss");
    assert_eq!(meta["multi_magnitude_ntest"]["enabled"], true);
    assert!(fx.output_dir.join("SimDir42_ntest_result_mw2.6.json").is_file());
}

#[test]
fn usage_errors_exit_two() {
    assert_eq!(run_bin(&[]).status.code(), Some(2));
    assert_eq!(run_bin(&["abc", "m.txt", "out"]).status.code(), Some(2));
    assert_eq!(run_bin(&["0", "m.txt"]).status.code(), Some(2));
}

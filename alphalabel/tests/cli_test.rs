mod common;

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use common::{build_orchard, file_names};
use tempfile::TempDir;

fn alphalabel(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_alphalabel"))
        .args(args)
        .current_dir(cwd)
        .env("ALPHALABEL_NO_COLOR", "1")
        .env_remove("ALPHALABEL_MATTING_URL")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute alphalabel")
}

#[test]
fn test_version_command() {
    let temp_dir = TempDir::new().unwrap();
    let output = alphalabel(&["version"], temp_dir.path());
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "{stdout}");
}

#[test]
fn test_assemble_then_preview() {
    let temp_dir = TempDir::new().unwrap();
    build_orchard(temp_dir.path());

    let output = alphalabel(
        &["assemble", "raw", "-o", "corpus", "--metadata", "-v"],
        temp_dir.path(),
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stdout: {stdout}\nstderr: {stderr}");
    assert!(stdout.contains("Annotated: 19"), "{stdout}");
    assert!(stdout.contains("Split plan: 16 train / 4 val"), "{stdout}");
    assert!(stdout.contains("Failed: 1"), "{stdout}");
    assert!(stdout.contains("blank.png"), "{stdout}");
    assert!(stderr.contains("[INFO]"), "{stderr}");

    let corpus = temp_dir.path().join("corpus");
    assert!(corpus.join("data.yaml").exists());
    assert!(corpus.join("assembly.toml").exists());
    // Default masked directory sits next to the corpus
    assert!(temp_dir.path().join("corpus_masked/healthy").is_dir());

    let metadata = fs::read_to_string(corpus.join("assembly.toml")).unwrap();
    assert!(metadata.contains("empty-mask"), "{metadata}");

    let output = alphalabel(&["preview", "corpus", "--count", "3"], temp_dir.path());
    assert!(output.status.success());
    let previews = file_names(&corpus.join("visualization"));
    assert_eq!(previews.len(), 3);
    assert!(previews.iter().all(|n| n.starts_with("viz_")));
}

#[test]
fn test_missing_source_exits_with_error() {
    let temp_dir = TempDir::new().unwrap();
    let output = alphalabel(&["assemble", "nowhere", "-o", "corpus"], temp_dir.path());
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("source directory does not exist"), "{stderr}");
    assert!(!temp_dir.path().join("corpus").exists());
}

#[test]
fn test_missing_class_strict_and_permissive() {
    let temp_dir = TempDir::new().unwrap();
    build_orchard(temp_dir.path());

    let strict = alphalabel(
        &["assemble", "raw", "-o", "strict", "--classes", "healthy,rotten"],
        temp_dir.path(),
    );
    assert!(!strict.status.success());
    assert!(String::from_utf8_lossy(&strict.stderr).contains("--permissive"));

    let permissive = alphalabel(
        &[
            "assemble",
            "raw",
            "-o",
            "loose",
            "--classes",
            "healthy,rotten",
            "--permissive",
        ],
        temp_dir.path(),
    );
    assert!(permissive.status.success());
    let stdout = String::from_utf8_lossy(&permissive.stdout);
    assert!(stdout.contains("Missing class folders: rotten"), "{stdout}");
    assert!(stdout.contains("INCOMPLETE"), "{stdout}");
    let manifest = fs::read_to_string(temp_dir.path().join("loose/data.yaml")).unwrap();
    assert!(manifest.contains("healthy"));
    assert!(manifest.contains("rotten"));
}

#[test]
fn test_matting_without_endpoint_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    build_orchard(temp_dir.path());
    let output = alphalabel(
        &["assemble", "raw", "-o", "corpus", "--strategy", "matting"],
        temp_dir.path(),
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("requires an endpoint"));
}

#[test]
fn test_remove_then_split() {
    let temp_dir = TempDir::new().unwrap();
    build_orchard(temp_dir.path());

    let output = alphalabel(&["remove", "raw", "-o", "masked"], temp_dir.path());
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("healthy: 10 succeeded"), "{stdout}");
    assert_eq!(file_names(&temp_dir.path().join("masked/diseased")).len(), 10);

    let output = alphalabel(
        &["split", "masked", "--train-dir", "train", "--val-dir", "val"],
        temp_dir.path(),
    );
    assert!(output.status.success());
    assert_eq!(file_names(&temp_dir.path().join("val/diseased")).len(), 2);
    assert_eq!(file_names(&temp_dir.path().join("train/healthy")).len(), 8);

    // Existing destinations are kept on a second split
    let kept = temp_dir.path().join("val/diseased").join(&file_names(&temp_dir.path().join("val/diseased"))[0]);
    fs::write(&kept, b"edited").unwrap();
    let output = alphalabel(
        &["split", "masked", "--train-dir", "train", "--val-dir", "val"],
        temp_dir.path(),
    );
    assert!(output.status.success());
    assert_eq!(fs::read(&kept).unwrap(), b"edited");
}

#[test]
fn test_invalid_ratio_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let output = alphalabel(
        &["split", "raw", "--train-dir", "t", "--val-dir", "v", "--val-ratio", "1.0"],
        temp_dir.path(),
    );
    assert!(!output.status.success());
}

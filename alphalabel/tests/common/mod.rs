//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use alphalabel::config::{AssembleConfig, BaseConfig};
use alphalabel::mask_analysis::MaskThresholds;
use image::{Rgb, RgbImage};

/// Opaque photo: white backdrop with a dark rectangle whose position depends on `seed`
pub fn write_photo(path: &Path, seed: u32) {
    let mut img = RgbImage::from_pixel(32, 24, Rgb([255, 255, 255]));
    let x0 = 2 + seed % 10;
    let y0 = 2 + seed % 6;
    for y in y0..y0 + 8 {
        for x in x0..x0 + 12 {
            img.put_pixel(x, y, Rgb([60 + (seed * 7 % 100) as u8, 120, 40]));
        }
    }
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    img.save(path).unwrap();
}

/// Pure white photo; nothing survives background removal
pub fn write_blank(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbImage::from_pixel(32, 24, Rgb([255, 255, 255]))
        .save(path)
        .unwrap();
}

/// 10 healthy photos (one of them blank) and 10 diseased photos
pub fn build_orchard(root: &Path) -> PathBuf {
    let raw = root.join("raw");
    for i in 0..10 {
        write_photo(&raw.join(format!("diseased/leaf_{i:02}.png")), i);
    }
    for i in 0..9 {
        write_photo(&raw.join(format!("healthy/apple_{i:02}.png")), i + 20);
    }
    write_blank(&raw.join("healthy/blank.png"));
    raw
}

pub fn assemble_config(source: &Path, corpus: &Path, masked: &Path) -> AssembleConfig {
    AssembleConfig {
        base: BaseConfig {
            skip_metadata: true,
            strict: true,
        },
        source_root: source.to_path_buf(),
        corpus_dir: corpus.to_path_buf(),
        masked_dir: masked.to_path_buf(),
        strategy: Some(alphalabel::background::RemovalStrategy::ColorThreshold { threshold: 240 }),
        classes: None,
        val_ratio: 0.2,
        seed: 42,
        thresholds: MaskThresholds::default(),
        removal_concurrency: 4,
        annotation_concurrency: 4,
    }
}

/// File names in a directory, sorted
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

/// Every label file under `labels/` with its contents, keyed by relative path
pub fn label_contents(corpus: &Path) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for split in ["train", "val"] {
        let dir = corpus.join("labels").join(split);
        for name in file_names(&dir) {
            let contents = fs::read_to_string(dir.join(&name)).unwrap();
            out.push((format!("{split}/{name}"), contents));
        }
    }
    out
}

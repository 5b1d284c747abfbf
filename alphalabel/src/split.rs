//! Deterministic train/validation splitting.
//!
//! Items are sorted before a seeded ChaCha8 shuffle, so the partition depends
//! only on the item set, the ratio and the seed, never on directory iteration
//! order or the host platform. The first `floor(total * val_ratio)` shuffled
//! items become validation. Splits are per class; adding images changes the
//! global shuffle, so a grown dataset needs a fresh full split.

use anyhow::Result;
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::color_utils::symbols;
use crate::config::SplitConfig;
use crate::error::ConfigurationError;
use crate::image_input::{scan_source_root, ClassFolder};

pub const DEFAULT_VAL_RATIO: f64 = 0.2;
pub const DEFAULT_SEED: u64 = 42;

/// Absorbs representation error in products like `100 * 0.29`
const RATIO_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
}

impl Split {
    /// Directory name used in the corpus layout
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }

    pub fn all() -> [Split; 2] {
        [Split::Train, Split::Val]
    }
}

impl std::str::FromStr for Split {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "train" => Ok(Split::Train),
            "val" | "validation" => Ok(Split::Val),
            _ => Err(format!("Unknown split: {s} (expected train or val)")),
        }
    }
}

pub fn validate_ratio(val_ratio: f64) -> Result<(), ConfigurationError> {
    if (0.0..1.0).contains(&val_ratio) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidRatio(val_ratio))
    }
}

/// `floor(total * val_ratio)`
pub fn validation_count(total: usize, val_ratio: f64) -> usize {
    let count = (total as f64 * val_ratio + RATIO_EPSILON).floor() as usize;
    count.min(total)
}

/// Partition `items` into `(train, val)`.
pub fn split<T: Ord + Clone>(items: &[T], val_ratio: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut ordered = items.to_vec();
    ordered.sort();

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    ordered.shuffle(&mut rng);

    let val_count = validation_count(ordered.len(), val_ratio);
    let train = ordered.split_off(val_count);
    (train, ordered)
}

/// Train/validation assignment of one class
#[derive(Debug, Clone, PartialEq)]
pub struct ClassSplit {
    pub class_name: String,
    pub train: Vec<PathBuf>,
    pub val: Vec<PathBuf>,
}

impl ClassSplit {
    pub fn assignments(&self) -> impl Iterator<Item = (&PathBuf, Split)> {
        self.train
            .iter()
            .map(|p| (p, Split::Train))
            .chain(self.val.iter().map(|p| (p, Split::Val)))
    }
}

/// Stratified split: every class is partitioned independently with the same seed
pub fn split_classes(folders: &[ClassFolder], val_ratio: f64, seed: u64) -> Vec<ClassSplit> {
    folders
        .iter()
        .map(|folder| {
            let (train, val) = split(&folder.images, val_ratio, seed);
            debug!(
                "[{}] {} image(s): {} train, {} val",
                folder.name,
                folder.images.len(),
                train.len(),
                val.len()
            );
            ClassSplit {
                class_name: folder.name.clone(),
                train,
                val,
            }
        })
        .collect()
}

/// Counts from a non-destructive copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub copied: usize,
    pub skipped_existing: usize,
}

/// Copy files into `dest_dir`, keeping their file names. Existing destinations are left untouched.
pub fn copy_preserving_existing(files: &[PathBuf], dest_dir: &Path) -> Result<CopyStats> {
    fs::create_dir_all(dest_dir)?;
    let mut stats = CopyStats::default();
    for file in files {
        let Some(name) = file.file_name() else {
            continue;
        };
        let dest = dest_dir.join(name);
        if dest.exists() {
            stats.skipped_existing += 1;
            continue;
        }
        fs::copy(file, &dest)?;
        stats.copied += 1;
    }
    Ok(stats)
}

/// Split each class folder and copy into `train_root/{class}` and `val_root/{class}`
pub fn split_into_directories(
    folders: &[ClassFolder],
    train_root: &Path,
    val_root: &Path,
    val_ratio: f64,
    seed: u64,
) -> Result<Vec<(ClassSplit, CopyStats, CopyStats)>> {
    let mut results = Vec::new();
    for class_split in split_classes(folders, val_ratio, seed) {
        info!(
            "{} [{}] {} train / {} val",
            symbols::split_start(),
            class_split.class_name,
            class_split.train.len(),
            class_split.val.len()
        );
        let train_stats =
            copy_preserving_existing(&class_split.train, &train_root.join(&class_split.class_name))?;
        let val_stats =
            copy_preserving_existing(&class_split.val, &val_root.join(&class_split.class_name))?;
        results.push((class_split, train_stats, val_stats));
    }
    Ok(results)
}

/// Standalone `split` command over an already-masked tree
pub fn run_split(config: &SplitConfig) -> Result<Vec<(ClassSplit, CopyStats, CopyStats)>> {
    validate_ratio(config.val_ratio)?;
    let scan = scan_source_root(
        &config.source_root,
        config.classes.as_deref(),
        config.base.strict,
    )?;
    let results = split_into_directories(
        &scan.folders,
        &config.train_dir,
        &config.val_dir,
        config.val_ratio,
        config.seed,
    )?;

    for (class_split, train, val) in &results {
        println!(
            "{}: {} train ({} existing kept), {} val ({} existing kept)",
            class_split.class_name,
            class_split.train.len(),
            train.skipped_existing,
            class_split.val.len(),
            val.skipped_existing
        );
    }
    if !scan.missing.is_empty() {
        println!("Missing class folders: {}", scan.missing.join(", "));
    }
    Ok(results)
}

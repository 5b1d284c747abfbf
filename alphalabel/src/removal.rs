//! Background removal stage: mirror class folders into a masked tree.
//!
//! Each class folder is run through [`run_batch`] with the selected
//! [`BackgroundRemover`]. Outputs are written via a temporary sibling and a
//! rename. With `skip_existing`, an output whose image header decodes is
//! reused instead of recomputed; a truncated or corrupt one is redone.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{debug, info, warn};

use crate::background::BackgroundRemover;
use crate::batch::{run_batch, BatchOptions, ItemFailure};
use crate::color_utils::symbols;
use crate::config::RemoveConfig;
use crate::error::ItemError;
use crate::image_input::{scan_source_root, ClassFolder};
use crate::output_manager::{masked_output_path, output_stems, write_atomically};

/// Per-item result of the removal transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedImage {
    pub output: PathBuf,
    /// An existing output was reused
    pub reused: bool,
}

/// Per-class totals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassRemovalStats {
    pub class_name: String,
    pub succeeded: usize,
    pub reused: usize,
    pub failed: usize,
}

/// Outcome of a removal run across all classes
#[derive(Debug, Default)]
pub struct RemovalReport {
    /// Source image to masked output, for every success
    pub outputs: BTreeMap<PathBuf, PathBuf>,
    pub failures: Vec<ItemFailure>,
    pub per_class: Vec<ClassRemovalStats>,
}

impl RemovalReport {
    pub fn success_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn reused_count(&self) -> usize {
        self.per_class.iter().map(|c| c.reused).sum()
    }
}

/// An existing output is reusable when its header decodes
pub fn is_reusable_output(path: &Path) -> bool {
    path.is_file() && image::image_dimensions(path).is_ok()
}

/// Remove the background of one image into `output`
pub fn remove_one(
    source: &Path,
    output: &Path,
    remover: &dyn BackgroundRemover,
    skip_existing: bool,
) -> Result<RemovedImage, ItemError> {
    if skip_existing && is_reusable_output(output) {
        debug!("{} reusing {}", symbols::skipped(), output.display());
        return Ok(RemovedImage {
            output: output.to_path_buf(),
            reused: true,
        });
    }

    let input = fs::read(source)?;
    let masked = remover.remove(&input)?;
    write_atomically(output, &masked)?;
    Ok(RemovedImage {
        output: output.to_path_buf(),
        reused: false,
    })
}

/// Run the removal stage over every class folder.
///
/// Only infrastructure problems (pool construction) are returned as errors;
/// per-image failures are recorded in the report.
pub fn remove_backgrounds(
    folders: &[ClassFolder],
    masked_root: &Path,
    remover: &dyn BackgroundRemover,
    skip_existing: bool,
    options: &BatchOptions,
) -> Result<RemovalReport> {
    info!(
        "{} Removing backgrounds with {} ({} worker(s)) into {}",
        symbols::background_removal_start(),
        remover.name(),
        options.concurrency,
        masked_root.display()
    );

    let mut report = RemovalReport::default();
    for folder in folders {
        fs::create_dir_all(masked_root.join(&folder.name))?;
        let stems = output_stems(&folder.images);

        let class_options = BatchOptions {
            stage: format!("{}:{}", options.stage, folder.name),
            ..options.clone()
        };
        let result = run_batch(
            &folder.images,
            |source| {
                let stem = stems.get(source).ok_or_else(|| {
                    ItemError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no output name for {}", source.display()),
                    ))
                })?;
                let output = masked_output_path(masked_root, &folder.name, stem);
                remove_one(source, &output, remover, skip_existing)
            },
            &class_options,
        )?;

        let stats = ClassRemovalStats {
            class_name: folder.name.clone(),
            succeeded: result.success_count(),
            reused: result.succeeded.iter().filter(|(_, r)| r.reused).count(),
            failed: result.failure_count(),
        };
        info!(
            "[{}] {} succeeded ({} reused), {} failed",
            stats.class_name, stats.succeeded, stats.reused, stats.failed
        );

        for (source, removed) in result.succeeded {
            report.outputs.insert(source, removed.output);
        }
        report.failures.extend(result.failed);
        report.per_class.push(stats);
    }

    if report.failure_count() > 0 {
        warn!(
            "{}Background removal: {} succeeded, {} failed",
            symbols::warning(),
            report.success_count(),
            report.failure_count()
        );
    } else {
        info!(
            "{} Background removal: {} succeeded",
            symbols::completed_successfully(),
            report.success_count()
        );
    }
    Ok(report)
}

/// Standalone `remove` command: scan, remove, report
pub fn run_removal(config: &RemoveConfig) -> Result<RemovalReport> {
    let scan = scan_source_root(
        &config.source_root,
        config.classes.as_deref(),
        config.base.strict,
    )?;
    let remover = config.strategy.build()?;
    let options = BatchOptions::new(
        "remove",
        config.concurrency,
        config.strategy.report_every(),
    );
    let report = remove_backgrounds(
        &scan.folders,
        &config.output_dir,
        remover.as_ref(),
        config.skip_existing,
        &options,
    )?;

    for class in &report.per_class {
        println!(
            "{}: {} succeeded ({} reused), {} failed",
            class.class_name, class.succeeded, class.reused, class.failed
        );
    }
    for failure in &report.failures {
        println!(
            "  - {} [{}]",
            failure.path.display(),
            failure.error.kind()
        );
    }
    if !scan.missing.is_empty() {
        println!("Missing class folders: {}", scan.missing.join(", "));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::ColorThresholdRemover;
    use crate::output_manager::partial_path;
    use image::{GenericImageView, Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn write_photo(path: &Path) {
        let mut img = RgbImage::from_pixel(16, 16, Rgb([255, 255, 255]));
        for y in 4..12 {
            for x in 4..12 {
                img.put_pixel(x, y, Rgb([120, 30, 30]));
            }
        }
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        img.save(path).unwrap();
    }

    fn class_folder(root: &Path, name: &str, files: &[&str]) -> ClassFolder {
        let dir = root.join(name);
        let images: Vec<PathBuf> = files.iter().map(|f| dir.join(f)).collect();
        for image in &images {
            write_photo(image);
        }
        ClassFolder {
            name: name.to_string(),
            dir,
            images,
        }
    }

    /// Counts calls so reuse can be observed
    struct CountingRemover {
        inner: ColorThresholdRemover,
        calls: AtomicUsize,
    }

    impl BackgroundRemover for CountingRemover {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn remove(&self, input: &[u8]) -> Result<Vec<u8>, ItemError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.remove(input)
        }
    }

    #[test]
    fn test_mirrors_class_folders_as_png() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("raw");
        let masked = temp_dir.path().join("masked");
        let folders = vec![
            class_folder(&src, "diseased", &["a.jpg", "b.png"]),
            class_folder(&src, "healthy", &["c.bmp"]),
        ];

        let remover = ColorThresholdRemover { threshold: 240 };
        let report = remove_backgrounds(
            &folders,
            &masked,
            &remover,
            false,
            &BatchOptions::new("remove", 2, 100),
        )
        .unwrap();

        assert_eq!(report.success_count(), 3);
        assert_eq!(report.failure_count(), 0);
        let out = masked.join("diseased/a.png");
        assert_eq!(report.outputs[&src.join("diseased/a.jpg")], out);
        let decoded = image::open(&out).unwrap();
        assert!(decoded.color().has_alpha());
        assert_eq!(decoded.get_pixel(0, 0)[3], 0);
        assert!(masked.join("healthy/c.png").exists());
        assert!(!partial_path(&out).exists());
    }

    #[test]
    fn test_undecodable_source_is_recorded_failure() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("raw");
        let mut folder = class_folder(&src, "healthy", &["ok.png"]);
        let broken = folder.dir.join("broken.png");
        fs::write(&broken, b"not a png").unwrap();
        folder.images.push(broken.clone());

        let remover = ColorThresholdRemover { threshold: 240 };
        let report = remove_backgrounds(
            &[folder],
            &temp_dir.path().join("masked"),
            &remover,
            false,
            &BatchOptions::new("remove", 4, 100),
        )
        .unwrap();

        assert_eq!(report.success_count(), 1);
        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.failures[0].path, broken);
        assert_eq!(report.failures[0].error.kind(), "decode");
        assert!(!temp_dir.path().join("masked/healthy/broken.png").exists());
    }

    #[test]
    fn test_same_stem_sources_get_distinct_outputs() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("raw");
        let masked = temp_dir.path().join("masked");
        let folder = class_folder(&src, "ripe", &["a.jpg", "a.png", "p0.png"]);

        let remover = ColorThresholdRemover { threshold: 240 };
        let report = remove_backgrounds(
            &[folder],
            &masked,
            &remover,
            false,
            &BatchOptions::new("remove", 3, 100),
        )
        .unwrap();

        assert_eq!(report.success_count(), 3);
        assert_eq!(report.outputs[&src.join("ripe/a.jpg")], masked.join("ripe/a_jpg.png"));
        assert_eq!(report.outputs[&src.join("ripe/a.png")], masked.join("ripe/a_png.png"));
        assert_eq!(report.outputs[&src.join("ripe/p0.png")], masked.join("ripe/p0.png"));
        let mut written: Vec<_> = fs::read_dir(masked.join("ripe"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        written.sort();
        assert_eq!(written, vec!["a_jpg.png", "a_png.png", "p0.png"]);
    }

    #[test]
    fn test_skip_existing_reuses_only_decodable_outputs() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("raw");
        let masked = temp_dir.path().join("masked");
        let folder = class_folder(&src, "healthy", &["a.png", "b.png"]);

        let remover = CountingRemover {
            inner: ColorThresholdRemover { threshold: 240 },
            calls: AtomicUsize::new(0),
        };
        let options = BatchOptions::new("remove", 2, 10);
        remove_backgrounds(std::slice::from_ref(&folder), &masked, &remover, true, &options)
            .unwrap();
        assert_eq!(remover.calls.load(Ordering::SeqCst), 2);

        // Truncate one output, as an interrupted run might
        fs::write(masked.join("healthy/b.png"), b"\x89PNG").unwrap();

        let report =
            remove_backgrounds(&[folder], &masked, &remover, true, &options).unwrap();
        assert_eq!(remover.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.reused_count(), 1);
        assert!(is_reusable_output(&masked.join("healthy/b.png")));
    }

    #[test]
    fn test_without_skip_existing_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("raw");
        let folder = class_folder(&src, "healthy", &["a.png"]);
        let output = temp_dir.path().join("masked/healthy/a.png");
        write_photo(&output);

        let remover = ColorThresholdRemover { threshold: 240 };
        let removed = remove_one(&folder.images[0], &output, &remover, false).unwrap();
        assert!(!removed.reused);
        assert!(image::open(&output).unwrap().color().has_alpha());
    }
}

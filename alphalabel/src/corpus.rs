//! Corpus assembly: removal, annotation, split and manifest.
//!
//! The split is planned per class over every source image before any worker
//! starts, so the assignment of an image never depends on whether another
//! image fails. Each stage runs to completion before the next begins. Images
//! whose annotation fails are left out of the corpus together with their
//! label; the manifest is written once, after every class.
//!
//! Re-running into an existing corpus converges on the current plan: an image
//! that moved split, or failed this time, has its earlier entries removed, so
//! no source ever sits in both `train` and `val`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use log::{debug, info, warn};

use crate::annotation::{encode, AnnotationRecord, ClassCatalog, ClassLabel};
use crate::batch::{run_batch, BatchOptions, ItemFailure};
use crate::color_utils::symbols;
use crate::config::AssembleConfig;
use crate::error::ItemError;
use crate::image_input::scan_source_root;
use crate::manifest::CorpusManifest;
use crate::mask_analysis::{analyze_path, MaskThresholds};
use crate::output_manager::{
    copy_atomically, corpus_stem, image_extension, make_path_relative, output_stems,
    same_contents, write_atomically, CorpusLayout,
};
use crate::removal::remove_backgrounds;
use crate::run_metadata::{
    load_metadata, save_metadata, AssemblyCounts, AssemblyMetadata, ExecutionContext,
    FailureEntry,
};
use crate::split::{split_classes, validate_ratio, Split};

/// Failed paths listed in the printed summary before the remainder note
pub const SUMMARY_FAILURE_LIMIT: usize = 10;

const ANNOTATION_REPORT_EVERY: usize = 100;

/// Pipeline stage an item failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Remove,
    Annotate,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Remove => "remove",
            Stage::Annotate => "annotate",
        }
    }
}

/// A source image that did not make it into the corpus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub path: PathBuf,
    pub stage: Stage,
    pub kind: &'static str,
    pub message: String,
}

impl FailedItem {
    fn from_batch(stage: Stage, failure: ItemFailure) -> Self {
        Self {
            path: failure.path,
            stage,
            kind: failure.error.kind(),
            message: failure.error.to_string(),
        }
    }
}

/// Where a source image is headed
#[derive(Debug, Clone)]
struct PlannedItem {
    class_label: ClassLabel,
    split: Split,
    /// `{class}_{stem}`, unique within the corpus
    stem: String,
}

/// One image and label pair written into the corpus
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedItem {
    pub split: Split,
    pub image: PathBuf,
    pub label: PathBuf,
    pub record: AnnotationRecord,
}

/// Outcome of an assembly run
#[derive(Debug, Default)]
pub struct AssemblySummary {
    pub classes: usize,
    pub sources: usize,
    pub masked: usize,
    pub train_planned: usize,
    pub val_planned: usize,
    pub train_written: usize,
    pub val_written: usize,
    /// Sorted by source path
    pub failures: Vec<FailedItem>,
    pub missing_classes: Vec<String>,
    pub manifest_path: PathBuf,
    pub elapsed: Duration,
}

impl AssemblySummary {
    pub fn annotated(&self) -> usize {
        self.train_written + self.val_written
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// False when a requested class folder was missing
    pub fn is_complete(&self) -> bool {
        self.missing_classes.is_empty()
    }

    pub fn counts(&self) -> AssemblyCounts {
        AssemblyCounts {
            sources: self.sources,
            masked: self.masked,
            annotated: self.annotated(),
            failed: self.failed(),
            train_planned: self.train_planned,
            val_planned: self.val_planned,
            train_written: self.train_written,
            val_written: self.val_written,
            complete: self.is_complete(),
        }
    }

    /// Human-readable summary, one line per entry
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!(
                "Processed: {} image(s) across {} class(es)",
                self.sources, self.classes
            ),
            format!("Masked: {}", self.masked),
            format!(
                "Annotated: {} (train {}, val {})",
                self.annotated(),
                self.train_written,
                self.val_written
            ),
            format!(
                "Split plan: {} train / {} val",
                self.train_planned, self.val_planned
            ),
            format!("Failed: {}", self.failed()),
        ];

        for failure in self.failures.iter().take(SUMMARY_FAILURE_LIMIT) {
            lines.push(format!(
                "  - {} [{}: {}]",
                failure.path.display(),
                failure.stage.name(),
                failure.kind
            ));
        }
        if self.failed() > SUMMARY_FAILURE_LIMIT {
            lines.push(format!(
                "  ... and {} more",
                self.failed() - SUMMARY_FAILURE_LIMIT
            ));
        }

        if !self.is_complete() {
            lines.push(format!(
                "Missing class folders: {}",
                self.missing_classes.join(", ")
            ));
            lines.push("Corpus is INCOMPLETE".to_string());
        }
        lines.push(format!("Manifest: {}", self.manifest_path.display()));
        lines
    }
}

/// Analyze one masked image and write its image and label pair.
///
/// The image is copied unless the destination already holds the same bytes.
/// The label is always rewritten. If the label cannot be written, an image
/// copied by this call is removed again so no image is left without a label.
fn annotate_item(
    input: &Path,
    planned: &PlannedItem,
    layout: &CorpusLayout,
    thresholds: &MaskThresholds,
) -> Result<AnnotatedItem, ItemError> {
    let region = analyze_path(input, thresholds)?;
    let record = encode(&planned.class_label, region);

    let image = layout.image_path(planned.split, &planned.stem, &image_extension(input));
    let label = layout.label_path(planned.split, &planned.stem);

    let copied = if same_contents(input, &image)? {
        false
    } else {
        copy_atomically(input, &image)?;
        true
    };

    if let Err(e) = write_atomically(&label, record.to_label_line().as_bytes()) {
        if copied {
            if let Err(cleanup) = fs::remove_file(&image) {
                warn!(
                    "{}Could not remove {} after label failure: {}",
                    symbols::warning(),
                    image.display(),
                    cleanup
                );
            }
        }
        return Err(e.into());
    }

    Ok(AnnotatedItem {
        split: planned.split,
        image,
        label,
        record,
    })
}

pub struct CorpusAssembler {
    config: AssembleConfig,
    layout: CorpusLayout,
}

impl CorpusAssembler {
    pub fn new(config: AssembleConfig) -> Self {
        let layout = CorpusLayout::new(config.corpus_dir.clone());
        Self { config, layout }
    }

    pub fn layout(&self) -> &CorpusLayout {
        &self.layout
    }

    /// Run the whole pipeline.
    ///
    /// Configuration problems (missing source root, missing class in strict
    /// mode, bad ratio) are returned before any image is touched. Per-image
    /// failures never abort the run; they are collected in the summary.
    pub fn run(&self) -> Result<AssemblySummary> {
        let started = Instant::now();
        let config = &self.config;
        validate_ratio(config.val_ratio)?;

        let scan = scan_source_root(
            &config.source_root,
            config.classes.as_deref(),
            config.base.strict,
        )?;
        let catalog = match &config.classes {
            Some(classes) => ClassCatalog::new(classes.iter().cloned()),
            None => ClassCatalog::new(scan.folders.iter().map(|f| f.name.clone())),
        };
        info!(
            "{} Found {} image(s) in {} class folder(s) under {}",
            symbols::resources_found(),
            scan.total_images(),
            scan.folders.len(),
            config.source_root.display()
        );

        if let Some(previous) = load_metadata(&self.layout.metadata_path())? {
            if let Some(change) =
                split_settings_change(&previous, config.val_ratio, config.seed)
            {
                warn!(
                    "{}Split settings changed since the last assembly ({change}); \
                     entries that moved split will be replaced",
                    symbols::warning()
                );
            }
        }

        let mut stems: BTreeMap<PathBuf, String> = BTreeMap::new();
        for folder in &scan.folders {
            let folder_stems = output_stems(&folder.images);
            let renamed = folder_stems
                .iter()
                .filter(|(path, stem)| {
                    path.file_stem().and_then(|s| s.to_str()) != Some(stem.as_str())
                })
                .count();
            if renamed > 0 {
                warn!(
                    "{}[{}] {} image(s) share a file stem, output names get the extension",
                    symbols::warning(),
                    folder.name,
                    renamed
                );
            }
            stems.extend(folder_stems);
        }

        // Plan the split over every source image up front
        let mut planned: HashMap<PathBuf, PlannedItem> = HashMap::new();
        let mut train_planned = 0;
        let mut val_planned = 0;
        for class_split in split_classes(&scan.folders, config.val_ratio, config.seed) {
            let class_label = catalog
                .label(&class_split.class_name)
                .ok_or_else(|| anyhow!("Class '{}' is not in the catalog", class_split.class_name))?;
            train_planned += class_split.train.len();
            val_planned += class_split.val.len();
            for (path, split) in class_split.assignments() {
                let stem = stems
                    .get(path)
                    .ok_or_else(|| anyhow!("No output name for {}", path.display()))?;
                planned.insert(
                    path.clone(),
                    PlannedItem {
                        class_label: class_label.clone(),
                        split,
                        stem: corpus_stem(&class_label.name, stem),
                    },
                );
            }
        }
        info!(
            "{} Planned {} train / {} val (ratio {}, seed {})",
            symbols::split_start(),
            train_planned,
            val_planned,
            config.val_ratio,
            config.seed
        );

        let mut failures = Vec::new();

        // Stage 1: background removal
        let inputs: BTreeMap<PathBuf, PathBuf> = match &config.strategy {
            Some(strategy) => {
                let remover = strategy.build()?;
                let options = BatchOptions::new(
                    "remove",
                    config.removal_concurrency,
                    strategy.report_every(),
                );
                let report = remove_backgrounds(
                    &scan.folders,
                    &config.masked_dir,
                    remover.as_ref(),
                    strategy.is_expensive(),
                    &options,
                )?;
                failures.extend(
                    report
                        .failures
                        .into_iter()
                        .map(|f| FailedItem::from_batch(Stage::Remove, f)),
                );
                report.outputs
            }
            None => {
                debug!("Sources are already masked, skipping background removal");
                planned.keys().map(|p| (p.clone(), p.clone())).collect()
            }
        };

        // Stage 2: analysis, encoding and writing
        self.layout.create_dirs()?;
        let sources: Vec<PathBuf> = inputs.keys().cloned().collect();
        info!(
            "{} Annotating {} image(s) into {}",
            symbols::annotation_start(),
            sources.len(),
            self.layout.root().display()
        );
        let options = BatchOptions::new(
            "annotate",
            config.annotation_concurrency,
            ANNOTATION_REPORT_EVERY,
        );
        let result = run_batch(
            &sources,
            |source| {
                let (Some(input), Some(item)) = (inputs.get(source), planned.get(source)) else {
                    return Err(ItemError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no planned input for {}", source.display()),
                    )));
                };
                annotate_item(input, item, &self.layout, &config.thresholds)
            },
            &options,
        )?;

        let train_written = result
            .succeeded
            .iter()
            .filter(|(_, item)| item.split == Split::Train)
            .count();
        let val_written = result.success_count() - train_written;
        failures.extend(
            result
                .failed
                .into_iter()
                .map(|f| FailedItem::from_batch(Stage::Annotate, f)),
        );
        failures.sort_by(|a, b| a.path.cmp(&b.path));

        let written: HashMap<&PathBuf, &AnnotatedItem> =
            result.succeeded.iter().map(|(p, item)| (p, item)).collect();
        self.prune_stale_entries(&planned, &written)?;

        // Manifest, once every class is done
        let manifest = CorpusManifest::new(self.layout.root(), &catalog)?;
        let manifest_path = self.layout.manifest_path();
        manifest.write(&manifest_path)?;
        info!(
            "{} Wrote manifest {}",
            symbols::manifest_written(),
            manifest_path.display()
        );

        let summary = AssemblySummary {
            classes: catalog.len(),
            sources: scan.total_images(),
            masked: inputs.len(),
            train_planned,
            val_planned,
            train_written,
            val_written,
            failures,
            missing_classes: scan.missing,
            manifest_path,
            elapsed: started.elapsed(),
        };

        if !config.base.skip_metadata {
            self.write_metadata(&summary)?;
        }
        Ok(summary)
    }

    /// Remove corpus entries of planned sources that this run did not write.
    ///
    /// A written item loses its copy in the other split and any image of the
    /// same stem with another extension. An item that failed loses every entry.
    fn prune_stale_entries(
        &self,
        planned: &HashMap<PathBuf, PlannedItem>,
        written: &HashMap<&PathBuf, &AnnotatedItem>,
    ) -> Result<usize> {
        let mut removed = Vec::new();
        for (source, item) in planned {
            let done = written.get(source);
            for split in Split::all() {
                let keep = done
                    .filter(|d| d.split == split)
                    .map(|d| d.image.as_path());
                removed.extend(self.layout.discard_entries(split, &item.stem, keep)?);
            }
        }

        removed.sort();
        for path in &removed {
            debug!("Removed stale {}", path.display());
        }
        if !removed.is_empty() {
            info!(
                "{} Removed {} stale file(s) from earlier runs",
                symbols::cleanup(),
                removed.len()
            );
        }
        Ok(removed.len())
    }

    fn write_metadata(&self, summary: &AssemblySummary) -> Result<()> {
        let mut execution = ExecutionContext::current();
        execution.elapsed_ms = Some(summary.elapsed.as_secs_f64() * 1000.0);

        let metadata = AssemblyMetadata {
            missing_classes: summary.missing_classes.clone(),
            execution,
            config: Some(toml::Value::try_from(&self.config)?),
            counts: summary.counts(),
            failures: summary
                .failures
                .iter()
                .map(|f| FailureEntry {
                    path: make_path_relative(&f.path, &self.config.source_root),
                    stage: f.stage.name().to_string(),
                    kind: f.kind.to_string(),
                    message: f.message.clone(),
                })
                .collect(),
        };
        let path = self.layout.metadata_path();
        save_metadata(&metadata, &path)?;
        debug!("Wrote run metadata {}", path.display());
        Ok(())
    }
}

/// Describe how the split settings of a previous run differ from the current ones
fn split_settings_change(
    previous: &AssemblyMetadata,
    val_ratio: f64,
    seed: u64,
) -> Option<String> {
    let config = previous.config.as_ref()?;
    let mut changes = Vec::new();

    if let Some(old_seed) = config.get("seed").and_then(|v| v.as_integer()) {
        if i64::try_from(seed).ok() != Some(old_seed) {
            changes.push(format!("seed {old_seed} -> {seed}"));
        }
    }
    if let Some(old_ratio) = config.get("val_ratio").and_then(|v| v.as_float()) {
        if (old_ratio - val_ratio).abs() > f64::EPSILON {
            changes.push(format!("val ratio {old_ratio} -> {val_ratio}"));
        }
    }

    if changes.is_empty() {
        None
    } else {
        Some(changes.join(", "))
    }
}

/// Run corpus assembly and print the summary
pub fn run_assembly(config: AssembleConfig) -> Result<AssemblySummary> {
    let summary = CorpusAssembler::new(config).run()?;
    for line in summary.summary_lines() {
        println!("{line}");
    }

    if !summary.is_complete() {
        warn!(
            "{}Corpus assembled without class folder(s): {}",
            symbols::warning(),
            summary.missing_classes.join(", ")
        );
    } else if summary.failed() > 0 {
        warn!(
            "{} Assembled {} of {} image(s) in {:.1}s",
            symbols::completed_partially_successfully(),
            summary.annotated(),
            summary.sources,
            summary.elapsed.as_secs_f64()
        );
    } else {
        info!(
            "{} Assembled {} image(s) in {:.1}s",
            symbols::completed_successfully(),
            summary.annotated(),
            summary.elapsed.as_secs_f64()
        );
    }
    Ok(summary)
}

//! Configuration layer separating CLI arguments from internal processing configurations.
//!
//! - `GlobalArgs`: flags shared by every subcommand
//! - `*Command`: clap argument structs, one per subcommand
//! - `*Config`: validated internal configurations built with `from_args`
//!
//! Internal configurations are `Serialize` so a run can record what it was asked to do.

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use clap_verbosity_flag::Verbosity;
use serde::Serialize;

use crate::background::{RemovalStrategy, DEFAULT_MATTING_TIMEOUT_SECS, DEFAULT_WHITE_THRESHOLD};
use crate::batch::DEFAULT_CHEAP_CONCURRENCY;
use crate::error::ConfigurationError;
use crate::mask_analysis::{MaskThresholds, DEFAULT_ALPHA_THRESHOLD, DEFAULT_GRAY_THRESHOLD};
use crate::split::{validate_ratio, Split, DEFAULT_SEED, DEFAULT_VAL_RATIO};

pub const MATTING_URL_ENV: &str = "ALPHALABEL_MATTING_URL";
pub const MATTING_TIMEOUT_ENV: &str = "ALPHALABEL_MATTING_TIMEOUT_SECS";
pub const DEFAULT_PREVIEW_COUNT: usize = 5;

/// Background removal strategy as chosen on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Near-white pixels become transparent
    Threshold,
    /// External learned matting service over HTTP
    Matting,
    /// Source images are already masked
    None,
}

/// Parse a validation ratio (must be in [0.0, 1.0))
pub fn parse_ratio(s: &str) -> Result<f64, String> {
    let val = s
        .parse::<f64>()
        .map_err(|_| format!("Invalid number: '{s}'"))?;
    validate_ratio(val).map_err(|e| e.to_string())?;
    Ok(val)
}

/// Parse a comma-separated class list, e.g. "healthy,diseased"
pub fn parse_class_list(s: &str) -> Result<Vec<String>, String> {
    let mut classes: Vec<String> = s
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();

    if let Some(bad) = classes
        .iter()
        .find(|c| c.contains('/') || c.contains('\\') || c.starts_with('.'))
    {
        return Err(format!("Invalid class name: '{bad}'"));
    }

    classes.sort();
    classes.dedup();
    if classes.is_empty() {
        return Err("No valid classes specified".to_string());
    }
    Ok(classes)
}

pub fn parse_split(s: &str) -> Result<Split, String> {
    s.parse()
}

/// Global CLI arguments that apply to all alphalabel commands
#[derive(Parser, Debug, Clone)]
pub struct GlobalArgs {
    /// Write a run metadata file (assembly.toml) into the corpus root
    #[arg(long, global = true)]
    pub metadata: bool,

    /// Verbosity level (-q/--quiet, -v/-vv/-vvv for info/debug/trace)
    #[command(flatten)]
    pub verbosity: Verbosity,

    /// Continue when a requested class folder is missing (the corpus is flagged incomplete)
    #[arg(long, global = true)]
    pub permissive: bool,

    /// Disable colored output (also respects NO_COLOR and ALPHALABEL_NO_COLOR env vars)
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Settings common to every command
#[derive(Debug, Clone, Serialize)]
pub struct BaseConfig {
    pub skip_metadata: bool,
    /// Fail on missing class folders. Opposite of `--permissive`.
    pub strict: bool,
}

impl From<GlobalArgs> for BaseConfig {
    fn from(global: GlobalArgs) -> Self {
        Self {
            skip_metadata: !global.metadata,
            strict: !global.permissive,
        }
    }
}

/// Background removal options shared by `remove` and `assemble`
#[derive(Parser, Debug, Clone)]
pub struct RemovalArgs {
    /// Background removal strategy
    #[arg(long, value_enum, default_value_t = StrategyKind::Threshold)]
    pub strategy: StrategyKind,

    /// Channel value above which a pixel is treated as white background (threshold strategy)
    #[arg(long, default_value_t = DEFAULT_WHITE_THRESHOLD)]
    pub threshold: u8,

    /// Endpoint of the matting service (matting strategy)
    #[arg(long, env = MATTING_URL_ENV)]
    pub matting_url: Option<String>,

    /// Per-image timeout for the matting service, in seconds
    #[arg(long, env = MATTING_TIMEOUT_ENV, default_value_t = DEFAULT_MATTING_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Number of worker threads (default: 4 for threshold, 2 for matting)
    #[arg(long)]
    pub concurrency: Option<usize>,
}

impl RemovalArgs {
    /// Resolve the strategy; `None` means the inputs are already masked
    fn strategy(&self) -> Result<Option<RemovalStrategy>, ConfigurationError> {
        match self.strategy {
            StrategyKind::Threshold => Ok(Some(RemovalStrategy::ColorThreshold {
                threshold: self.threshold,
            })),
            StrategyKind::Matting => {
                let endpoint = self
                    .matting_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .ok_or(ConfigurationError::MissingMattingEndpoint)?;
                Ok(Some(RemovalStrategy::LearnedMatting {
                    endpoint: endpoint.to_string(),
                    timeout_secs: self.timeout_secs.max(1),
                }))
            }
            StrategyKind::None => Ok(None),
        }
    }

    fn concurrency(&self, default: usize) -> Result<usize, ConfigurationError> {
        match self.concurrency {
            Some(0) => Err(ConfigurationError::InvalidConcurrency),
            Some(n) => Ok(n),
            None => Ok(default),
        }
    }
}

/// CLI command for standalone background removal
#[derive(Parser, Debug, Clone)]
pub struct RemoveCommand {
    /// Directory containing one folder per class
    #[arg(value_name = "SOURCE_ROOT")]
    pub source_root: PathBuf,

    /// Directory receiving the masked mirror tree
    #[arg(short, long)]
    pub output_dir: PathBuf,

    #[command(flatten)]
    pub removal: RemovalArgs,

    /// Keep existing outputs whose image header decodes (always on for matting)
    #[arg(long)]
    pub skip_existing: bool,

    /// Restrict to these classes, comma separated
    #[arg(long, value_name = "CLASSES")]
    pub classes: Option<String>,
}

/// Internal configuration for standalone background removal
#[derive(Debug, Clone, Serialize)]
pub struct RemoveConfig {
    #[serde(skip)]
    pub base: BaseConfig,
    pub source_root: PathBuf,
    pub output_dir: PathBuf,
    pub strategy: RemovalStrategy,
    pub concurrency: usize,
    pub skip_existing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
}

impl RemoveConfig {
    /// Create configuration from global args and command-specific args
    pub fn from_args(global: GlobalArgs, cmd: RemoveCommand) -> Result<Self, ConfigurationError> {
        let strategy = cmd.removal.strategy()?.ok_or_else(|| {
            ConfigurationError::ConflictingOptions(
                "remove needs a strategy other than 'none'".to_string(),
            )
        })?;
        if same_directory(&cmd.source_root, &cmd.output_dir) {
            return Err(ConfigurationError::ConflictingOptions(
                "--output-dir must differ from the source root".to_string(),
            ));
        }
        let concurrency = cmd.removal.concurrency(strategy.default_concurrency())?;

        Ok(Self {
            base: global.into(),
            source_root: cmd.source_root,
            output_dir: cmd.output_dir,
            skip_existing: cmd.skip_existing || strategy.is_expensive(),
            strategy,
            concurrency,
            classes: parse_classes(cmd.classes.as_deref())?,
        })
    }
}

/// CLI command for a standalone train/validation split
#[derive(Parser, Debug, Clone)]
pub struct SplitCommand {
    /// Directory containing one folder per class
    #[arg(value_name = "SOURCE_ROOT")]
    pub source_root: PathBuf,

    /// Destination for training images (one folder per class)
    #[arg(long)]
    pub train_dir: PathBuf,

    /// Destination for validation images (one folder per class)
    #[arg(long)]
    pub val_dir: PathBuf,

    /// Fraction of each class assigned to validation, in [0.0, 1.0)
    #[arg(long, default_value_t = DEFAULT_VAL_RATIO, value_parser = parse_ratio)]
    pub val_ratio: f64,

    /// Shuffle seed
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Restrict to these classes, comma separated
    #[arg(long, value_name = "CLASSES")]
    pub classes: Option<String>,
}

/// Internal configuration for a standalone split
#[derive(Debug, Clone, Serialize)]
pub struct SplitConfig {
    #[serde(skip)]
    pub base: BaseConfig,
    pub source_root: PathBuf,
    pub train_dir: PathBuf,
    pub val_dir: PathBuf,
    pub val_ratio: f64,
    pub seed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
}

impl SplitConfig {
    pub fn from_args(global: GlobalArgs, cmd: SplitCommand) -> Result<Self, ConfigurationError> {
        validate_ratio(cmd.val_ratio)?;
        if same_directory(&cmd.train_dir, &cmd.val_dir) {
            return Err(ConfigurationError::ConflictingOptions(
                "--train-dir and --val-dir must differ".to_string(),
            ));
        }
        Ok(Self {
            base: global.into(),
            source_root: cmd.source_root,
            train_dir: cmd.train_dir,
            val_dir: cmd.val_dir,
            val_ratio: cmd.val_ratio,
            seed: cmd.seed,
            classes: parse_classes(cmd.classes.as_deref())?,
        })
    }
}

/// CLI command for full corpus assembly
#[derive(Parser, Debug, Clone)]
pub struct AssembleCommand {
    /// Directory containing one folder per class
    #[arg(value_name = "SOURCE_ROOT")]
    pub source_root: PathBuf,

    /// Corpus root receiving images/, labels/ and data.yaml
    #[arg(short = 'o', long)]
    pub corpus_dir: PathBuf,

    /// Directory for masked intermediates (default: <CORPUS_DIR>_masked next to the corpus)
    #[arg(long)]
    pub masked_dir: Option<PathBuf>,

    #[command(flatten)]
    pub removal: RemovalArgs,

    /// Class names, comma separated (default: every folder under SOURCE_ROOT)
    #[arg(long, value_name = "CLASSES")]
    pub classes: Option<String>,

    /// Fraction of each class assigned to validation, in [0.0, 1.0)
    #[arg(long, default_value_t = DEFAULT_VAL_RATIO, value_parser = parse_ratio)]
    pub val_ratio: f64,

    /// Shuffle seed
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Opacity above which a pixel is foreground (images with alpha)
    #[arg(long, default_value_t = DEFAULT_ALPHA_THRESHOLD)]
    pub alpha_threshold: u8,

    /// Luminance below which a pixel is foreground (opaque images)
    #[arg(long, default_value_t = DEFAULT_GRAY_THRESHOLD)]
    pub gray_threshold: u8,
}

/// Internal configuration for corpus assembly
#[derive(Debug, Clone, Serialize)]
pub struct AssembleConfig {
    #[serde(skip)]
    pub base: BaseConfig,
    pub source_root: PathBuf,
    pub corpus_dir: PathBuf,
    pub masked_dir: PathBuf,
    /// `None` when the source images are already masked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RemovalStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
    pub val_ratio: f64,
    pub seed: u64,
    pub thresholds: MaskThresholds,
    pub removal_concurrency: usize,
    pub annotation_concurrency: usize,
}

impl AssembleConfig {
    pub fn from_args(global: GlobalArgs, cmd: AssembleCommand) -> Result<Self, ConfigurationError> {
        validate_ratio(cmd.val_ratio)?;
        let strategy = cmd.removal.strategy()?;

        if strategy.is_none() && cmd.masked_dir.is_some() {
            return Err(ConfigurationError::ConflictingOptions(
                "--masked-dir has no effect with --strategy none".to_string(),
            ));
        }
        let masked_dir = cmd
            .masked_dir
            .unwrap_or_else(|| default_masked_dir(&cmd.corpus_dir));
        if strategy.is_some() && same_directory(&masked_dir, &cmd.source_root) {
            return Err(ConfigurationError::ConflictingOptions(
                "--masked-dir must differ from the source root".to_string(),
            ));
        }

        let removal_default = strategy
            .as_ref()
            .map(RemovalStrategy::default_concurrency)
            .unwrap_or(DEFAULT_CHEAP_CONCURRENCY);
        let removal_concurrency = cmd.removal.concurrency(removal_default)?;
        let annotation_concurrency = cmd.removal.concurrency(DEFAULT_CHEAP_CONCURRENCY)?;

        Ok(Self {
            base: global.into(),
            source_root: cmd.source_root,
            corpus_dir: cmd.corpus_dir,
            masked_dir,
            strategy,
            classes: parse_classes(cmd.classes.as_deref())?,
            val_ratio: cmd.val_ratio,
            seed: cmd.seed,
            thresholds: MaskThresholds {
                alpha: cmd.alpha_threshold,
                gray: cmd.gray_threshold,
            },
            removal_concurrency,
            annotation_concurrency,
        })
    }
}

/// CLI command for drawing label boxes over corpus images
#[derive(Parser, Debug, Clone)]
pub struct PreviewCommand {
    /// Corpus root (the directory holding data.yaml)
    #[arg(value_name = "CORPUS_DIR")]
    pub corpus_dir: PathBuf,

    /// Which split to preview
    #[arg(long, default_value = "train", value_parser = parse_split)]
    pub split: Split,

    /// Maximum number of images to render
    #[arg(long, default_value_t = DEFAULT_PREVIEW_COUNT)]
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewConfig {
    #[serde(skip)]
    pub base: BaseConfig,
    pub corpus_dir: PathBuf,
    pub split: Split,
    pub count: usize,
}

impl PreviewConfig {
    pub fn from_args(global: GlobalArgs, cmd: PreviewCommand) -> Result<Self, ConfigurationError> {
        if !cmd.corpus_dir.is_dir() {
            return Err(ConfigurationError::MissingSource(cmd.corpus_dir));
        }
        Ok(Self {
            base: global.into(),
            corpus_dir: cmd.corpus_dir,
            split: cmd.split,
            count: cmd.count,
        })
    }
}

/// `<corpus>_masked`, next to the corpus root
pub fn default_masked_dir(corpus_dir: &Path) -> PathBuf {
    let name = corpus_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "corpus".to_string());
    corpus_dir.with_file_name(format!("{name}_masked"))
}

fn parse_classes(classes: Option<&str>) -> Result<Option<Vec<String>>, ConfigurationError> {
    classes
        .map(|s| parse_class_list(s).map_err(ConfigurationError::InvalidClasses))
        .transpose()
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

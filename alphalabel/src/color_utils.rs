//! Color and styling utilities with support for NO_COLOR and TERM environment variables.
//!
//! Colored output is disabled by any of:
//! - `--no-color` CLI flag
//! - `NO_COLOR` environment variable (https://no-color.org/)
//! - `ALPHALABEL_NO_COLOR` environment variable
//! - `TERM=dumb`
//! - stderr not being a TTY

use colored::ColoredString;
use std::io::{stderr, IsTerminal};
use std::sync::OnceLock;

static COLOR_CONFIG: OnceLock<ColorConfig> = OnceLock::new();

fn should_disable_colors_from_env() -> bool {
    !std::env::var("NO_COLOR").unwrap_or_default().is_empty()
        || !std::env::var("ALPHALABEL_NO_COLOR")
            .unwrap_or_default()
            .is_empty()
        || std::env::var("TERM").unwrap_or_default() == "dumb"
        // log messages go to stderr
        || !stderr().is_terminal()
}

#[derive(Debug, Clone)]
struct ColorConfig {
    colors_enabled: bool,
}

impl ColorConfig {
    fn new(no_color_flag: bool) -> Self {
        let colors_enabled = !no_color_flag && !should_disable_colors_from_env();
        Self { colors_enabled }
    }

    fn is_enabled(&self) -> bool {
        self.colors_enabled
    }
}

/// Initialize the color configuration with the CLI flag state.
/// Call once at startup, after parsing CLI arguments.
pub fn init_color_config(no_color_flag: bool) {
    let config = ColorConfig::new(no_color_flag);
    COLOR_CONFIG.set(config).unwrap_or_else(|_| {
        eprintln!("Warning: Color configuration already initialized");
    });
}

fn colors_enabled() -> bool {
    COLOR_CONFIG
        .get()
        .map(|config| config.is_enabled())
        .unwrap_or_else(|| !should_disable_colors_from_env())
}

/// Apply color to a string only if colors are enabled for stderr output
pub fn maybe_color_stderr<F>(text: &str, color_fn: F) -> String
where
    F: FnOnce(&str) -> ColoredString,
{
    if colors_enabled() {
        color_fn(text).to_string()
    } else {
        text.to_string()
    }
}

pub fn maybe_dim_stderr(text: &str) -> String {
    use colored::Colorize;
    maybe_color_stderr(text, |s| s.bright_black())
}

/// Semantic color functions for different message types
pub mod colors {
    use super::maybe_color_stderr;
    use colored::Colorize;

    pub fn error_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.red().bold())
    }

    pub fn warning_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.yellow())
    }

    pub fn info_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.green())
    }

    pub fn debug_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.blue())
    }

    pub fn trace_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.magenta())
    }
}

/// Semantic symbols for different operation types and states
pub mod symbols {
    use super::colors_enabled;

    fn pick(fancy: &'static str, plain: &'static str) -> &'static str {
        if colors_enabled() {
            fancy
        } else {
            plain
        }
    }

    /// Symbol for starting a background removal stage
    pub fn background_removal_start() -> &'static str {
        pick("✂️ ", "[REMOVE]")
    }

    /// Symbol for starting an annotation stage
    pub fn annotation_start() -> &'static str {
        pick("🏷️ ", "[ANNOTATE]")
    }

    /// Symbol for splitting into train/validation
    pub fn split_start() -> &'static str {
        pick("🔀", "[SPLIT]")
    }

    pub fn operation_failed() -> &'static str {
        pick("❌", "[FAILED]")
    }

    pub fn resources_found() -> &'static str {
        pick("🎯", "")
    }

    pub fn completed_successfully() -> &'static str {
        pick("✅", "[SUCCESS]")
    }

    /// Symbol for partial success (some successes, some failures)
    pub fn completed_partially_successfully() -> &'static str {
        pick("⚠️ ", "[PARTIAL-SUCCESS]")
    }

    pub fn warning() -> &'static str {
        pick("⚠️ ", "")
    }

    pub fn progress() -> &'static str {
        pick("⏳", "")
    }

    pub fn manifest_written() -> &'static str {
        pick("📋", "")
    }

    pub fn skipped() -> &'static str {
        pick("⏭️ ", "[SKIP]")
    }

    /// Symbol for removing stale outputs
    pub fn cleanup() -> &'static str {
        pick("🧹", "[CLEANUP]")
    }
}

/// Progress bar utilities that respect TTY state
pub mod progress {
    use crate::progress::add_progress_bar;

    use super::colors_enabled;
    use indicatif::{ProgressBar, ProgressStyle};
    use std::io::{stderr, IsTerminal};

    /// Create a progress bar for batch processing, only if stderr is interactive
    pub fn create_batch_progress_bar(total: usize, stage: &str) -> Option<ProgressBar> {
        if total > 1 && stderr().is_terminal() {
            let pb = ProgressBar::new(total as u64);
            add_progress_bar(pb.clone());
            let template = if colors_enabled() {
                "[{elapsed_precise}] [{bar:30.green/black}] {pos}/{len} ({percent}%) {prefix} {msg}"
            } else {
                "[{elapsed_precise}] [{bar:30}] {pos}/{len} ({percent}%) {prefix} {msg}"
            };
            let style = ProgressStyle::default_bar()
                .template(template)
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            let style = if colors_enabled() {
                style.progress_chars("█▓▒░")
            } else {
                style.progress_chars("#> ")
            };

            pb.set_style(style);
            pb.set_prefix(stage.to_string());
            pb.enable_steady_tick(std::time::Duration::from_millis(100));

            Some(pb)
        } else {
            None
        }
    }
}

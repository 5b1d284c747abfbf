//! Run metadata written next to the corpus with `--metadata` (`assembly.toml`).
//!
//! Diagnostic only: timestamps and the command line differ between runs, so
//! this file is outside the reproducibility guarantees of the corpus itself.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::color_utils::{colors, symbols};
use crate::output_manager::write_atomically;

/// Execution context for a tool invocation
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExecutionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alphalabel_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_line: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alphalabel_env_vars: Option<BTreeMap<String, String>>,
}

impl ExecutionContext {
    /// Context for the current process
    pub fn current() -> Self {
        Self {
            timestamp: Some(Utc::now()),
            alphalabel_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            command_line: Some(std::env::args().collect()),
            elapsed_ms: None,
            alphalabel_env_vars: collect_alphalabel_env_vars(),
        }
    }
}

/// Counts of one assembly run
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyCounts {
    pub sources: usize,
    pub masked: usize,
    pub annotated: usize,
    pub failed: usize,
    pub train_planned: usize,
    pub val_planned: usize,
    pub train_written: usize,
    pub val_written: usize,
    pub complete: bool,
}

/// One failed item as recorded in the metadata
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FailureEntry {
    pub path: String,
    pub stage: String,
    pub kind: String,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AssemblyMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_classes: Vec<String>,
    pub execution: ExecutionContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<toml::Value>,
    pub counts: AssemblyCounts,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureEntry>,
}

/// Load metadata from a previous run, or `None` when absent or unreadable
pub fn load_metadata(path: &Path) -> Result<Option<AssemblyMetadata>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    match toml::from_str::<AssemblyMetadata>(&content) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(e) => {
            warn!(
                "{}Ignoring unreadable metadata in {}:\n{}",
                symbols::warning(),
                path.display(),
                colors::warning_level(&e.to_string())
            );
            Ok(None)
        }
    }
}

pub fn save_metadata(metadata: &AssemblyMetadata, path: &Path) -> Result<()> {
    let toml_content = toml::to_string_pretty(metadata).map_err(|e| {
        log::debug!("About to serialize metadata: {metadata:#?}");
        anyhow::anyhow!("Failed to serialize metadata to TOML: {e}")
    })?;
    write_atomically(path, toml_content.as_bytes())?;
    Ok(())
}

/// Collect all ALPHALABEL_* environment variables that are present and non-empty
pub fn collect_alphalabel_env_vars() -> Option<BTreeMap<String, String>> {
    let vars: BTreeMap<String, String> = std::env::vars()
        .filter(|(key, value)| key.starts_with("ALPHALABEL_") && !value.is_empty())
        .collect();
    if vars.is_empty() {
        None
    } else {
        Some(vars)
    }
}

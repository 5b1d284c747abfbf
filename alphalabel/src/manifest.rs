//! Corpus manifest (`data.yaml`).
//!
//! The corpus root is written under `path`, the key YOLO-style trainers read;
//! `root` is accepted when reading. `names` is an ordered index-to-name map.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::annotation::ClassCatalog;
use crate::output_manager::{write_atomically, CorpusLayout};
use crate::split::Split;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusManifest {
    /// Absolute corpus root
    #[serde(rename = "path", alias = "root")]
    pub root: PathBuf,
    pub train: String,
    pub val: String,
    pub names: BTreeMap<usize, String>,
}

impl CorpusManifest {
    /// Build the manifest for a corpus root. Relative roots are made absolute.
    pub fn new(root: &Path, catalog: &ClassCatalog) -> Result<Self> {
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };
        Ok(Self {
            root,
            train: CorpusLayout::relative_images_dir(Split::Train),
            val: CorpusLayout::relative_images_dir(Split::Val),
            names: catalog
                .labels()
                .map(|label| (label.index, label.name))
                .collect(),
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yml::to_string(self)?)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yml::from_str(contents)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let yaml = self.to_yaml()?;
        write_atomically(path, yaml.as_bytes())
            .with_context(|| format!("Failed to write manifest {}", path.display()))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))
    }

    /// Absolute image directory of a split
    pub fn images_dir(&self, split: Split) -> PathBuf {
        match split {
            Split::Train => self.root.join(&self.train),
            Split::Val => self.root.join(&self.val),
        }
    }

    pub fn class_name(&self, index: usize) -> Option<&str> {
        self.names.get(&index).map(String::as_str)
    }
}

//! Output path management for the masked mirror tree and the corpus layout.
//!
//! ```text
//! masked_root/{class}/{stem}.png
//! corpus_root/images/{train,val}/{class}_{stem}.<ext>
//! corpus_root/labels/{train,val}/{class}_{stem}.txt
//! corpus_root/data.yaml
//! ```
//!
//! Output names are namespaced by class so two classes sharing a source stem
//! never collide. Within a class, sources that share a stem (`a.png`,
//! `a.jpg`) get the extension appended (`a_png`, `a_jpg`).

use anyhow::Result;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::image_input::SUPPORTED_EXTENSIONS;
use crate::split::Split;

pub const MANIFEST_FILE_NAME: &str = "data.yaml";
pub const METADATA_FILE_NAME: &str = "assembly.toml";
pub const VISUALIZATION_DIR: &str = "visualization";

fn file_stem(path: &Path) -> &str {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
}

/// Output stem for every image of one class folder, unique within the folder.
///
/// A stem shared by several sources becomes `{stem}_{ext}`; should that still
/// clash (case-insensitively) with another name, a counter is appended.
/// Unshared stems are reserved first so they always keep their plain name.
pub fn output_stems(images: &[PathBuf]) -> BTreeMap<PathBuf, String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for image in images {
        *counts.entry(file_stem(image).to_lowercase()).or_default() += 1;
    }
    let is_shared = |image: &Path| counts[&file_stem(image).to_lowercase()] > 1;

    let mut used: HashSet<String> = images
        .iter()
        .filter(|image| !is_shared(image.as_path()))
        .map(|image| file_stem(image).to_lowercase())
        .collect();

    let mut stems = BTreeMap::new();
    for image in images {
        let stem = if is_shared(image.as_path()) {
            let base = format!("{}_{}", file_stem(image), image_extension(image));
            let mut candidate = base.clone();
            let mut n = 1;
            while !used.insert(candidate.to_lowercase()) {
                candidate = format!("{base}_{n}");
                n += 1;
            }
            candidate
        } else {
            file_stem(image).to_string()
        };
        stems.insert(image.clone(), stem);
    }
    stems
}

/// Masked counterpart of a source image in the mirror tree
pub fn masked_output_path(masked_root: &Path, class_name: &str, stem: &str) -> PathBuf {
    masked_root.join(class_name).join(format!("{stem}.png"))
}

/// `{class}_{stem}`, the shared stem of a corpus image and its label
pub fn corpus_stem(class_name: &str, stem: &str) -> String {
    format!("{class_name}_{stem}")
}

/// Lowercased extension of a path, defaulting to png
pub fn image_extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "png".to_string())
}

/// Path arithmetic for one corpus root
#[derive(Debug, Clone)]
pub struct CorpusLayout {
    root: PathBuf,
}

impl CorpusLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative image directory of a split, as written to the manifest
    pub fn relative_images_dir(split: Split) -> String {
        format!("images/{}", split.dir_name())
    }

    pub fn images_dir(&self, split: Split) -> PathBuf {
        self.root.join("images").join(split.dir_name())
    }

    pub fn labels_dir(&self, split: Split) -> PathBuf {
        self.root.join("labels").join(split.dir_name())
    }

    pub fn image_path(&self, split: Split, stem: &str, extension: &str) -> PathBuf {
        self.images_dir(split).join(format!("{stem}.{extension}"))
    }

    pub fn label_path(&self, split: Split, stem: &str) -> PathBuf {
        self.labels_dir(split).join(format!("{stem}.txt"))
    }

    /// Label file belonging to a corpus image
    pub fn label_for_image(&self, split: Split, image: &Path) -> PathBuf {
        self.label_path(split, file_stem(image))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE_NAME)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE_NAME)
    }

    pub fn visualization_dir(&self) -> PathBuf {
        self.root.join(VISUALIZATION_DIR)
    }

    /// Every image path a corpus stem could occupy in one split
    pub fn image_candidates(&self, split: Split, stem: &str) -> Vec<PathBuf> {
        SUPPORTED_EXTENSIONS
            .iter()
            .map(|ext| self.image_path(split, stem, ext))
            .collect()
    }

    /// Remove the entries of `stem` in `split`, except `keep`.
    ///
    /// The label goes too unless an image is kept. Returns the paths removed.
    pub fn discard_entries(
        &self,
        split: Split,
        stem: &str,
        keep: Option<&Path>,
    ) -> std::io::Result<Vec<PathBuf>> {
        let mut doomed: Vec<PathBuf> = self
            .image_candidates(split, stem)
            .into_iter()
            .filter(|p| Some(p.as_path()) != keep)
            .collect();
        if keep.is_none() {
            doomed.push(self.label_path(split, stem));
        }

        let mut removed = Vec::new();
        for path in doomed {
            match fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    /// Create the four split directories
    pub fn create_dirs(&self) -> Result<()> {
        for split in Split::all() {
            fs::create_dir_all(self.images_dir(split))?;
            fs::create_dir_all(self.labels_dir(split))?;
        }
        Ok(())
    }
}

/// Make a file path relative to a base directory, with forward slashes
pub fn make_path_relative(file_path: &Path, base_dir: &Path) -> String {
    match file_path.strip_prefix(base_dir) {
        Ok(rel_path) => rel_path.to_string_lossy().replace('\\', "/"),
        Err(_) => file_path.to_string_lossy().to_string(),
    }
}

/// Temporary sibling used for write-then-rename
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Write `contents` to `path` through a temporary sibling and a rename, so a
/// crash never leaves a truncated file under the final name.
pub fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = partial_path(path);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

/// True when both files exist with identical bytes
pub fn same_contents(a: &Path, b: &Path) -> std::io::Result<bool> {
    if !b.is_file() || fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    let mut left = Vec::new();
    let mut right = Vec::new();
    fs::File::open(a)?.read_to_end(&mut left)?;
    fs::File::open(b)?.read_to_end(&mut right)?;
    Ok(left == right)
}

/// Copy `from` to `to` through a temporary sibling and a rename
pub fn copy_atomically(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = partial_path(to);
    fs::copy(from, &tmp)?;
    fs::rename(&tmp, to)
}

//! Discovery of class folders and their images under a source root.
//!
//! Expected layout: `source_root/{class_name}/*.{png,jpg,jpeg,gif,bmp,webp}`.
//! Every listing is sorted so downstream shuffling never depends on the
//! platform's directory iteration order.

use anyhow::Result;
use log::warn;
use std::fs;
use std::path::{Path, PathBuf};

use crate::color_utils::symbols;
use crate::error::ConfigurationError;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

/// Check if a file has a supported image extension (case-insensitive)
pub fn is_supported_image_file(path: &Path) -> bool {
    if let Some(ext) = path.extension() {
        let ext_lower = ext.to_string_lossy().to_lowercase();
        SUPPORTED_EXTENSIONS.contains(&ext_lower.as_str())
    } else {
        false
    }
}

/// Find all image files in a directory (non-recursive), sorted by path
pub fn find_images_in_directory(dir_path: &Path) -> Result<Vec<PathBuf>> {
    let mut image_files = Vec::new();

    for entry in fs::read_dir(dir_path)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && is_supported_image_file(&path) {
            image_files.push(path);
        }
    }

    image_files.sort();
    Ok(image_files)
}

/// One class folder and the images found in it
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFolder {
    pub name: String,
    pub dir: PathBuf,
    pub images: Vec<PathBuf>,
}

/// Result of scanning a source root
#[derive(Debug, Clone, Default)]
pub struct SourceScan {
    /// Folders that exist, in alphabetical class order
    pub folders: Vec<ClassFolder>,
    /// Requested classes whose folder is absent
    pub missing: Vec<String>,
}

impl SourceScan {
    pub fn total_images(&self) -> usize {
        self.folders.iter().map(|f| f.images.len()).sum()
    }
}

/// List the class subdirectories of `source_root`, alphabetically
pub fn discover_class_names(source_root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(source_root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                names.push(name);
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Scan `source_root` for class folders.
///
/// With `requested` set, exactly those classes are looked up; a missing folder
/// is fatal in strict mode and reported in `SourceScan::missing` otherwise.
/// Without it, every subdirectory is a class. A missing source root is always
/// fatal.
pub fn scan_source_root(
    source_root: &Path,
    requested: Option<&[String]>,
    strict: bool,
) -> Result<SourceScan> {
    if !source_root.is_dir() {
        return Err(ConfigurationError::MissingSource(source_root.to_path_buf()).into());
    }

    let mut names: Vec<String> = match requested {
        Some(classes) => classes.to_vec(),
        None => discover_class_names(source_root)?,
    };
    names.sort();
    names.dedup();

    if names.is_empty() {
        return Err(ConfigurationError::NoClasses(source_root.to_path_buf()).into());
    }

    let mut scan = SourceScan::default();
    for name in names {
        let dir = source_root.join(&name);
        if !dir.is_dir() {
            if strict {
                return Err(ConfigurationError::MissingClass(dir).into());
            }
            warn!(
                "{}Class folder not found, continuing without it: {}",
                symbols::warning(),
                dir.display()
            );
            scan.missing.push(name);
            continue;
        }

        let images = find_images_in_directory(&dir)?;
        if images.is_empty() {
            warn!(
                "{}No images found in class folder: {}",
                symbols::warning(),
                dir.display()
            );
        }
        scan.folders.push(ClassFolder { name, dir, images });
    }

    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_is_supported_image_file() {
        for name in [
            "a.jpg", "a.jpeg", "a.png", "a.gif", "a.bmp", "a.webp", "A.PNG",
        ] {
            assert!(is_supported_image_file(Path::new(name)), "{name}");
        }
        assert!(!is_supported_image_file(Path::new("a.txt")));
        assert!(!is_supported_image_file(Path::new("a.tiff")));
        assert!(!is_supported_image_file(Path::new("a")));
    }

    #[test]
    fn test_find_images_sorted() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("c.png"), b"x").unwrap();
        fs::write(dir.join("a.jpg"), b"x").unwrap();
        fs::write(dir.join("b.webp"), b"x").unwrap();
        fs::write(dir.join("notes.txt"), b"x").unwrap();

        let images = find_images_in_directory(dir).unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.webp", "c.png"]);
    }

    #[test]
    fn test_scan_discovers_classes_alphabetically() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("healthy")).unwrap();
        fs::create_dir_all(root.join("diseased")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join("healthy/h1.png"), b"x").unwrap();
        fs::write(root.join("diseased/d1.jpg"), b"x").unwrap();
        fs::write(root.join("diseased/d2.jpg"), b"x").unwrap();

        let scan = scan_source_root(root, None, true).unwrap();
        let names: Vec<_> = scan.folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["diseased", "healthy"]);
        assert_eq!(scan.total_images(), 3);
        assert!(scan.missing.is_empty());
    }

    #[test]
    fn test_missing_source_root_is_fatal() {
        let temp_dir = tempdir().unwrap();
        let err = scan_source_root(&temp_dir.path().join("nope"), None, false).unwrap_err();
        assert!(err.to_string().contains("source directory does not exist"));
    }

    #[test]
    fn test_missing_requested_class_strict_vs_permissive() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("healthy")).unwrap();
        let requested = vec!["healthy".to_string(), "diseased".to_string()];

        let err = scan_source_root(root, Some(&requested), true).unwrap_err();
        assert!(err.to_string().contains("class folder does not exist"));

        let scan = scan_source_root(root, Some(&requested), false).unwrap();
        assert_eq!(scan.folders.len(), 1);
        assert_eq!(scan.missing, vec!["diseased".to_string()]);
    }

    #[test]
    fn test_empty_source_root_has_no_classes() {
        let temp_dir = tempdir().unwrap();
        let err = scan_source_root(temp_dir.path(), None, true).unwrap_err();
        assert!(err.to_string().contains("no class folders"));
    }
}

//! Sorted directory listings for dataset splits and landmark folders.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| {
            let name = name.to_ascii_lowercase();
            extensions.iter().any(|ext| name.ends_with(ext))
        })
        .unwrap_or(false)
}

fn list_sorted(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list directory {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, extensions) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Sorted compressed (`.gz`) or plain `.nii` volume files in `dir`.
pub fn list_volume_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    list_sorted(dir.as_ref(), &[".gz", ".nii"])
}

/// Sorted landmark files (`.txt`, `.csv`, `.pts`) in `dir`.
pub fn list_landmark_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    list_sorted(dir.as_ref(), &[".txt", ".csv", ".pts"])
}

/// The `fixed/` and `moving/` file lists of one data split, paired by
/// sorted position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitFiles {
    pub fixed: Vec<PathBuf>,
    pub moving: Vec<PathBuf>,
}

impl SplitFiles {
    /// List `root/fixed` and `root/moving`. Fails when the counts differ.
    pub fn from_dir<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let fixed = list_volume_files(root.join("fixed"))?;
        let moving = list_volume_files(root.join("moving"))?;
        if fixed.len() != moving.len() {
            anyhow::bail!(
                "{}: {} fixed volumes but {} moving volumes",
                root.display(),
                fixed.len(),
                moving.len()
            );
        }
        tracing::debug!(root = %root.display(), pairs = fixed.len(), "Listed split");
        Ok(Self { fixed, moving })
    }

    pub fn len(&self) -> usize {
        self.fixed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_listing_is_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        for name in ["b.nii.gz", "a.NII.GZ", "notes.md", "c.nii"] {
            touch(&dir.path().join(name));
        }
        let files = list_volume_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.NII.GZ", "b.nii.gz", "c.nii"]);
    }

    #[test]
    fn test_split_count_mismatch() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("fixed")).unwrap();
        std::fs::create_dir(dir.path().join("moving")).unwrap();
        touch(&dir.path().join("fixed/1.nii.gz"));
        touch(&dir.path().join("fixed/2.nii.gz"));
        touch(&dir.path().join("moving/1.nii.gz"));
        assert!(SplitFiles::from_dir(dir.path()).is_err());

        touch(&dir.path().join("moving/2.nii.gz"));
        let split = SplitFiles::from_dir(dir.path()).unwrap();
        assert_eq!(split.len(), 2);
    }

    #[test]
    fn test_landmark_listing() {
        let dir = tempdir().unwrap();
        for name in ["case2.txt", "case1.csv", "volume.nii.gz"] {
            touch(&dir.path().join(name));
        }
        let files = list_landmark_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("case1.csv"));
    }
}

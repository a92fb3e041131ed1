//! Blocking filesystem helpers; callers run them on the blocking pool

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// File count and total size under a directory
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryUsage {
    pub path: String,
    pub exists: bool,
    pub files: u64,
    pub bytes: u64,
}

pub fn directory_usage(root: &Path) -> io::Result<DirectoryUsage> {
    let mut usage = DirectoryUsage {
        path: root.display().to_string(),
        ..Default::default()
    };

    if !root.is_dir() {
        return Ok(usage);
    }

    usage.exists = true;
    for entry in regular_files(root) {
        usage.files += 1;
        usage.bytes += entry?.metadata()?.len();
    }

    Ok(usage)
}

/// Regular files under `root`; symlinks are neither followed nor returned
fn regular_files(root: &Path) -> impl Iterator<Item = walkdir::Result<DirEntry>> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter(|entry| entry.as_ref().map_or(true, |e| e.file_type().is_file()))
}

/// Regular files under `root` as sorted relative paths. Symlinks are skipped.
pub fn walk_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in regular_files(root) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        out.push(rel.to_path_buf());
    }

    out.sort();
    Ok(out)
}

/// Copy every regular file under `src` into `dst`, creating directories.
/// Returns the number of files copied; a missing `src` copies nothing.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<u64> {
    if !src.is_dir() {
        return Ok(0);
    }

    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for rel in walk_files(src)? {
        let target = dst.join(&rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src.join(&rel), &target)?;
        copied += 1;
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_and_usage() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        fs::write(tmp.path().join("a/b/one.pdf"), b"12345").unwrap();
        fs::write(tmp.path().join("two.txt"), b"abc").unwrap();

        let files = walk_files(tmp.path()).unwrap();
        assert_eq!(files, vec![PathBuf::from("a/b/one.pdf"), PathBuf::from("two.txt")]);

        let usage = directory_usage(tmp.path()).unwrap();
        assert!(usage.exists);
        assert_eq!(usage.files, 2);
        assert_eq!(usage.bytes, 8);
    }

    #[test]
    fn test_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope");

        assert!(!directory_usage(&missing).unwrap().exists);
        assert_eq!(copy_dir_recursive(&missing, &tmp.path().join("out")).unwrap(), 0);
    }

    #[test]
    fn test_copy_dir_recursive() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("2024/06")).unwrap();
        fs::write(src.path().join("2024/06/scan.png"), b"png").unwrap();

        let copied = copy_dir_recursive(src.path(), &dst.path().join("uploads")).unwrap();
        assert_eq!(copied, 1);
        assert_eq!(fs::read(dst.path().join("uploads/2024/06/scan.png")).unwrap(), b"png");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), b"outside").unwrap();
        fs::write(tmp.path().join("scan.pdf"), b"pdf").unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("linked_dir")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            tmp.path().join("linked_file.txt"),
        )
        .unwrap();

        assert_eq!(walk_files(tmp.path()).unwrap(), vec![PathBuf::from("scan.pdf")]);

        let usage = directory_usage(tmp.path()).unwrap();
        assert_eq!(usage.files, 1);
        assert_eq!(usage.bytes, 3);
    }
}

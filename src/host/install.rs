//! Installation discovery
//!
//! An installation is found by a marker file inside its `bin` directory;
//! the installation root is the marker's grandparent.

use crate::error::{Result, WardenError};
use std::path::{Path, PathBuf};
use tracing::info;

/// Marker of the product installation: the core agent launcher
pub fn product_marker() -> &'static str {
    if cfg!(windows) {
        "gs-agent.bat"
    } else {
        "gs-agent.sh"
    }
}

/// Marker of a JDK installation: the compiler
pub fn jdk_marker() -> &'static str {
    if cfg!(windows) {
        "javac.exe"
    } else {
        "javac"
    }
}

/// Search `search_root` for `marker` and return its grandparent directory
pub fn find_installation(search_root: &Path, marker: &str) -> Result<PathBuf> {
    for entry in walkdir::WalkDir::new(search_root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() || entry.file_name() != marker {
            continue;
        }
        if let Some(root) = entry.path().parent().and_then(Path::parent) {
            info!(marker = %marker, root = %root.display(), "Found installation");
            return Ok(root.to_path_buf());
        }
    }

    Err(WardenError::Provision(format!(
        "Could not find {} under {}",
        marker,
        search_root.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_find_installation_returns_grandparent() {
        let dir = tempdir().unwrap();
        let bin = dir.path().join("unpacked").join("gigaspaces-xap").join("bin");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join(product_marker()), "").unwrap();

        let root = find_installation(dir.path(), product_marker()).unwrap();
        assert_eq!(root, dir.path().join("unpacked").join("gigaspaces-xap"));
    }

    #[test]
    fn test_directory_named_like_marker_is_ignored() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("jdk").join("bin").join(jdk_marker())).unwrap();

        let err = find_installation(dir.path(), jdk_marker()).unwrap_err();
        assert!(matches!(err, WardenError::Provision(_)));
    }

    #[test]
    fn test_missing_marker_is_provision_error() {
        let dir = tempdir().unwrap();
        let err = find_installation(dir.path(), product_marker()).unwrap_err();
        assert!(matches!(err, WardenError::Provision(_)));
    }
}

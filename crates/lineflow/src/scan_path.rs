use crate::error::{ConnectorError, Result};
use std::path::{Path, PathBuf};

/// A validated source path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRoot {
    File(PathBuf),
    Directory(PathBuf),
}

impl SourceRoot {
    pub fn path(&self) -> &Path {
        match self {
            SourceRoot::File(path) | SourceRoot::Directory(path) => path,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, SourceRoot::Directory(_))
    }
}

pub fn expand_scan_path(path: &Path) -> PathBuf {
    if path.starts_with("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.strip_prefix("~").unwrap_or(path));
        }
    }
    path.to_path_buf()
}

pub fn canonicalize_scan_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Expand, canonicalize and classify `path`; it must exist.
pub fn resolve_source_root(path: &Path) -> Result<SourceRoot> {
    let expanded = expand_scan_path(path);
    let metadata = match std::fs::metadata(&expanded) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConnectorError::PathNotFound(expanded));
        }
        Err(e) => return Err(ConnectorError::Io(e)),
    };

    let canonical = canonicalize_scan_path(&expanded);
    if metadata.is_dir() {
        Ok(SourceRoot::Directory(canonical))
    } else {
        Ok(SourceRoot::File(canonical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn classifies_files_and_directories() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("lines.txt");
        std::fs::write(&file, "a\n").unwrap();

        let dir_root = resolve_source_root(temp.path()).unwrap();
        assert!(dir_root.is_dir());

        let file_root = resolve_source_root(&file).unwrap();
        assert!(!file_root.is_dir());
        assert!(file_root.path().is_absolute());
    }

    #[test]
    fn missing_path_is_reported() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        let err = resolve_source_root(&missing).unwrap_err();
        assert!(matches!(err, ConnectorError::PathNotFound(p) if p == missing));
    }
}

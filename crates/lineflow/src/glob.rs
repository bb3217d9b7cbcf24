//! File discovery: resolve a source root and pattern into an ordered file list.
//!
//! # Ordering
//!
//! Files are ordered by modification time ascending, ties broken by path. The
//! order is total, so two scans of unchanged inputs visit files identically.

use crate::error::{ConnectorError, Result};
use crate::patterns;
use crate::scan_path::SourceRoot;
use crate::types::FileStamp;
use globset::GlobMatcher;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A regular file that matched the pattern, with its stamp at listing time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub stamp: FileStamp,
}

/// Walk error details
#[derive(Debug, Clone)]
pub struct WalkError {
    pub path: String,
    pub message: String,
}

/// Result of one listing.
#[derive(Debug, Default)]
pub struct Listing {
    pub files: Vec<DiscoveredFile>,
    pub errors: Vec<WalkError>,
}

impl Listing {
    /// True when every directory entry was visited; removals are only trusted then.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GlobOptions {
    pub follow_symlinks: bool,
    pub include_hidden: bool,
}

impl Default for GlobOptions {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            include_hidden: true,
        }
    }
}

/// Pattern-filtered view of a source root.
#[derive(Debug, Clone)]
pub struct FileGlob {
    root: SourceRoot,
    matcher: GlobMatcher,
    options: GlobOptions,
}

impl FileGlob {
    /// Compile `pattern` for `root`. The pattern is validated even when the root is
    /// a single file and matching is skipped.
    pub fn new(root: SourceRoot, pattern: &str, options: GlobOptions) -> Result<Self> {
        let matcher = patterns::build_matcher(pattern)?;
        Ok(Self {
            root,
            matcher,
            options,
        })
    }

    pub fn root(&self) -> &SourceRoot {
        &self.root
    }

    /// List matching files in processing order.
    ///
    /// A single-file root that no longer exists yields an empty listing (the file
    /// was removed). A directory root that no longer exists is an error and the
    /// caller skips the scan.
    pub fn discover(&self) -> Result<Listing> {
        let mut listing = match &self.root {
            SourceRoot::File(path) => match std::fs::metadata(path) {
                Ok(metadata) if metadata.is_file() => Listing {
                    files: vec![DiscoveredFile {
                        path: path.clone(),
                        stamp: FileStamp::from_metadata(&metadata),
                    }],
                    errors: Vec::new(),
                },
                Ok(_) => Listing::default(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Listing::default(),
                Err(e) => Listing {
                    files: Vec::new(),
                    errors: vec![WalkError {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    }],
                },
            },
            SourceRoot::Directory(root) => {
                if !root.is_dir() {
                    return Err(ConnectorError::PathNotFound(root.clone()));
                }
                self.walk(root)
            }
        };

        order_files(&mut listing.files);
        Ok(listing)
    }

    fn walk(&self, root: &Path) -> Listing {
        let mut listing = Listing::default();
        let include_hidden = self.options.include_hidden;

        let walker = WalkDir::new(root)
            .follow_links(self.options.follow_symlinks)
            .into_iter()
            .filter_entry(move |entry| {
                include_hidden
                    || entry.depth() == 0
                    || !entry.file_name().to_string_lossy().starts_with('.')
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    listing.errors.push(WalkError {
                        path: e
                            .path()
                            .map(|p| p.display().to_string())
                            .unwrap_or_else(|| "unknown".to_string()),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let rel_path = entry
                .path()
                .strip_prefix(root)
                .map(normalize_path_to_forward_slashes)
                .unwrap_or_else(|_| normalize_path_to_forward_slashes(entry.path()));
            if !self.matcher.is_match(&rel_path) {
                continue;
            }

            match entry.metadata() {
                Ok(metadata) => listing.files.push(DiscoveredFile {
                    path: entry.path().to_path_buf(),
                    stamp: FileStamp::from_metadata(&metadata),
                }),
                // Vanished between readdir and stat: it simply isn't listed.
                Err(e) if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) => {}
                Err(e) => listing.errors.push(WalkError {
                    path: entry.path().display().to_string(),
                    message: e.to_string(),
                }),
            }
        }

        listing
    }
}

/// Sort by (modification time, path).
pub fn order_files(files: &mut [DiscoveredFile]) {
    files.sort_by(|a, b| {
        a.stamp
            .mtime_ns
            .cmp(&b.stamp.mtime_ns)
            .then_with(|| a.path.cmp(&b.path))
    });
}

fn normalize_path_to_forward_slashes(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan_path::resolve_source_root;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    fn write_with_mtime(dir: &Path, name: &str, secs: i64) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, "x\n").unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(secs, 0)).unwrap();
        path
    }

    fn glob(dir: &Path, pattern: &str) -> FileGlob {
        let root = resolve_source_root(dir).unwrap();
        FileGlob::new(root, pattern, GlobOptions::default()).unwrap()
    }

    fn names(listing: &Listing) -> Vec<String> {
        listing
            .files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn orders_by_mtime_then_path() {
        let temp = TempDir::new().unwrap();
        write_with_mtime(temp.path(), "c.txt", 1_000);
        write_with_mtime(temp.path(), "b.txt", 2_000);
        write_with_mtime(temp.path(), "a.txt", 2_000);
        write_with_mtime(temp.path(), "d.txt", 500);

        let listing = glob(temp.path(), "*").discover().unwrap();
        assert_eq!(names(&listing), vec!["d.txt", "c.txt", "a.txt", "b.txt"]);
    }

    #[test]
    fn reordering_mtimes_reorders_listing() {
        let temp = TempDir::new().unwrap();
        let first = write_with_mtime(temp.path(), "first.txt", 1_000);
        let second = write_with_mtime(temp.path(), "second.txt", 2_000);
        let glob = glob(temp.path(), "*");
        assert_eq!(names(&glob.discover().unwrap()), vec!["first.txt", "second.txt"]);

        set_file_mtime(&first, FileTime::from_unix_time(3_000, 0)).unwrap();
        set_file_mtime(&second, FileTime::from_unix_time(1_500, 0)).unwrap();
        assert_eq!(names(&glob.discover().unwrap()), vec!["second.txt", "first.txt"]);
    }

    #[test]
    fn pattern_filters_recursively() {
        let temp = TempDir::new().unwrap();
        write_with_mtime(temp.path(), "keep.txt", 1);
        write_with_mtime(temp.path(), "skip.csv", 2);
        write_with_mtime(temp.path(), "nested/deep.txt", 3);

        let listing = glob(temp.path(), "*.txt").discover().unwrap();
        assert_eq!(names(&listing), vec!["keep.txt", "deep.txt"]);
        assert!(listing.is_complete());
    }

    #[test]
    fn single_file_root_ignores_pattern() {
        let temp = TempDir::new().unwrap();
        let path = write_with_mtime(temp.path(), "lines.txt", 1);
        let root = resolve_source_root(&path).unwrap();
        let glob = FileGlob::new(root, "*.csv", GlobOptions::default()).unwrap();

        let listing = glob.discover().unwrap();
        assert_eq!(names(&listing), vec!["lines.txt"]);

        std::fs::remove_file(&path).unwrap();
        assert!(glob.discover().unwrap().files.is_empty());
    }

    #[test]
    fn hidden_files_can_be_excluded() {
        let temp = TempDir::new().unwrap();
        write_with_mtime(temp.path(), ".hidden.txt", 1);
        write_with_mtime(temp.path(), "shown.txt", 2);
        let root = resolve_source_root(temp.path()).unwrap();
        let options = GlobOptions {
            include_hidden: false,
            ..GlobOptions::default()
        };
        let listing = FileGlob::new(root, "*", options).unwrap().discover().unwrap();
        assert_eq!(names(&listing), vec!["shown.txt"]);
    }

    #[test]
    fn invalid_pattern_fails_even_for_single_file() {
        let temp = TempDir::new().unwrap();
        let path = write_with_mtime(temp.path(), "lines.txt", 1);
        let root = resolve_source_root(&path).unwrap();
        let err = FileGlob::new(root, "[oops", GlobOptions::default()).unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidPattern { .. }));
    }

    #[test]
    fn vanished_directory_root_is_an_error() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("src");
        std::fs::create_dir(&dir).unwrap();
        let glob = glob(&dir, "*");
        std::fs::remove_dir(&dir).unwrap();
        assert!(matches!(glob.discover(), Err(ConnectorError::PathNotFound(_))));
    }
}

//! Shell-style pattern normalization and matching helpers.

use crate::error::{ConnectorError, Result};
use globset::{GlobBuilder, GlobMatcher};

/// Pattern used when none is given: every file.
pub const MATCH_ALL: &str = "*";

/// Normalize a shell-style pattern for matching against relative paths.
///
/// Rules:
/// - Empty or "*" becomes "**/*" (match all)
/// - Leading slashes are stripped (relative matching)
/// - Patterns without a path separator get "**/" prefix, so they match file names at any depth
pub fn normalize_glob_pattern(raw: &str) -> String {
    let mut pattern = raw.trim().trim_start_matches('/').to_string();

    if pattern.is_empty() || pattern == "*" {
        pattern = "**/*".to_string();
    }

    if !pattern.contains('/') && !pattern.starts_with("**/") && pattern != "**/*" {
        pattern = format!("**/{}", pattern);
    }

    pattern
}

/// Compile a raw pattern. `*` and `?` never cross a path separator.
pub fn build_matcher(raw_pattern: &str) -> Result<GlobMatcher> {
    let normalized = normalize_glob_pattern(raw_pattern);
    GlobBuilder::new(&normalized)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| ConnectorError::InvalidPattern {
            pattern: raw_pattern.to_string(),
            message: e.kind().to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_basics() {
        assert_eq!(normalize_glob_pattern(""), "**/*");
        assert_eq!(normalize_glob_pattern("*"), "**/*");
        assert_eq!(normalize_glob_pattern("lines.txt"), "**/lines.txt");
        assert_eq!(normalize_glob_pattern("logs/*.txt"), "logs/*.txt");
        assert_eq!(normalize_glob_pattern("/logs/*.txt"), "logs/*.txt");
    }

    fn matches(raw_pattern: &str, rel_path: &str) -> Result<bool> {
        Ok(build_matcher(raw_pattern)?.is_match(rel_path))
    }

    #[test]
    fn matches_relative_paths() {
        assert!(matches("*.txt", "a.txt").unwrap());
        assert!(matches("*.txt", "nested/deeper/a.txt").unwrap());
        assert!(matches("logs/*.txt", "logs/a.txt").unwrap());
        assert!(!matches("logs/*.txt", "logs/sub/a.txt").unwrap());
        assert!(matches("part-?.log", "part-1.log").unwrap());
        assert!(matches("[ab].txt", "b.txt").unwrap());
        assert!(!matches("*.txt", "a.csv").unwrap());
        assert!(!matches("*.TXT", "a.txt").unwrap());
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        for raw in ["[abc", "{a,b", "a[z-"] {
            let err = build_matcher(raw).unwrap_err();
            assert!(
                matches!(err, ConnectorError::InvalidPattern { ref pattern, .. } if pattern == raw),
                "expected InvalidPattern for {raw}"
            );
        }
    }
}

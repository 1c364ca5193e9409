use globset::{Glob, GlobMatcher};
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub const DEFAULT_CLEANUP_PATTERN: &str = "*.bin";

/// Glob identifying stale artifacts of earlier runs by file name.
#[derive(Debug, Clone)]
pub struct CleanupPattern {
    raw: String,
    matcher: GlobMatcher,
}

impl CleanupPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let matcher = Glob::new(pattern)?.compile_matcher();
        Ok(CleanupPattern { raw: pattern.to_string(), matcher })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, file_name: &OsStr) -> bool {
        self.matcher.is_match(Path::new(file_name))
    }

    /// Entries directly inside `dir` whose name matches, sorted by path.
    pub fn stale_entries(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut stale = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if self.matches(&entry.file_name()) {
                stale.push(entry.path());
            }
        }
        stale.sort();
        Ok(stale)
    }
}

impl Default for CleanupPattern {
    fn default() -> Self {
        let glob = Glob::new(DEFAULT_CLEANUP_PATTERN).expect("default cleanup pattern is a valid glob");
        CleanupPattern { raw: DEFAULT_CLEANUP_PATTERN.to_string(), matcher: glob.compile_matcher() }
    }
}

impl fmt::Display for CleanupPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_by_extension() {
        let pattern = CleanupPattern::default();
        assert!(pattern.matches(OsStr::new("job-41.bin")));
        assert!(!pattern.matches(OsStr::new("job-41.pdf")));
        assert!(!pattern.matches(OsStr::new("bin")));
    }

    #[test]
    fn invalid_glob_is_rejected() {
        assert!(CleanupPattern::new("[*.bin").is_err());
    }

    #[test]
    fn lists_only_matching_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.bin"), b"x").unwrap();
        fs::write(dir.path().join("a.bin"), b"x").unwrap();
        fs::write(dir.path().join("keep.txt"), b"x").unwrap();

        let stale = CleanupPattern::default().stale_entries(dir.path()).unwrap();
        assert_eq!(stale, vec![dir.path().join("a.bin"), dir.path().join("b.bin")]);
    }
}

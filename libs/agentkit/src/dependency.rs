//! Source file sets the build depends on.

use glob::{MatchOptions, Pattern};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Directories never considered part of the sources.
pub const DEFAULT_EXCLUDED: &[&str] = &[".cache", ".git", "vendor"];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, thiserror::Error)]
#[error("invalid source pattern '{pattern}'")]
pub struct PatternError {
    pub pattern: String,
    #[source]
    pub source: glob::PatternError,
}

/// A root directory plus the glob patterns and excluded directories that
/// select the files a build (or code generation) depends on.
#[derive(Debug, Clone)]
pub struct DependencyDescriptor {
    root: PathBuf,
    patterns: Vec<Pattern>,
    excluded: Vec<String>,
}

impl DependencyDescriptor {
    /// # Errors
    /// `PatternError` when a pattern is not a valid glob.
    pub fn new<I, S>(root: impl Into<PathBuf>, patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                Pattern::new(p).map_err(|source| PatternError {
                    pattern: p.to_owned(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            root: root.into(),
            patterns,
            excluded: DEFAULT_EXCLUDED.iter().map(|s| (*s).to_owned()).collect(),
        })
    }

    /// Go sources, module files and protobuf definitions under `location`.
    ///
    /// # Errors
    /// Never fails for the built-in patterns; kept fallible for symmetry with [`Self::new`].
    pub fn go_service(location: impl Into<PathBuf>) -> Result<Self, PatternError> {
        Self::new(location, ["*.go", "go.mod", "go.sum", "*.proto"])
    }

    /// Protobuf definitions under `location`.
    ///
    /// # Errors
    /// See [`Self::go_service`].
    pub fn protos(location: impl Into<PathBuf>) -> Result<Self, PatternError> {
        Self::new(location, ["*.proto"])
    }

    #[must_use]
    pub fn with_excluded(mut self, dir: impl Into<String>) -> Self {
        self.excluded.push(dir.into());
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `true` when `path` lies under the root, outside excluded directories,
    /// and matches one of the patterns.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        if self.is_excluded(relative) {
            return false;
        }
        let file_name = relative.file_name().map(Path::new);
        self.patterns.iter().any(|p| {
            p.matches_path_with(relative, MATCH_OPTIONS)
                || file_name.is_some_and(|f| p.matches_path_with(f, MATCH_OPTIONS))
        })
    }

    fn is_excluded(&self, relative: &Path) -> bool {
        relative.components().any(|c| match c {
            Component::Normal(name) => self.excluded.iter().any(|e| name == e.as_str()),
            _ => false,
        })
    }

    /// Matching files, sorted.
    #[must_use]
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e.file_type().is_dir()
                    || !self.excluded.iter().any(|x| e.file_name() == x.as_str())
            })
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && self.matches(e.path()))
            .map(walkdir::DirEntry::into_path)
            .collect();
        files.sort();
        files
    }

    /// SHA-256 over the relative path and content of every matching file.
    ///
    /// # Errors
    /// Propagates read errors.
    pub fn fingerprint(&self) -> std::io::Result<String> {
        let mut hasher = Sha256::new();
        for file in self.files() {
            let relative = file.strip_prefix(&self.root).unwrap_or(&file);
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update([0]);
            hasher.update(std::fs::read(&file)?);
            hasher.update([0]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

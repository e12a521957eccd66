//! Artifact recording
//!
//! Combines discovery, exclusion and hashing into the artifact map stored
//! as a link's materials or products.

use std::path::PathBuf;

use steplink_metadata::ArtifactSet;

use super::hash::{hash_artifact, HashAlgorithm, DEFAULT_HASH_ALGORITHMS};
use super::pattern::PatternFilter;
use super::scanner::{ArtifactScanner, BaseDir};
use crate::error::{RecordError, RecordResult};

/// Validated recording settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Directory artifact keys are relative to; current directory if unset
    pub base_path: Option<PathBuf>,

    pub exclude_patterns: Vec<String>,

    pub hash_algorithms: Vec<HashAlgorithm>,

    /// Descend into symlinked directories
    pub follow_symlink_dirs: bool,

    /// Prefixes removed from recorded keys, first match wins
    pub lstrip_paths: Vec<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            base_path: None,
            exclude_patterns: Vec::new(),
            hash_algorithms: DEFAULT_HASH_ALGORITHMS.to_vec(),
            follow_symlink_dirs: false,
            lstrip_paths: Vec::new(),
        }
    }
}

impl RecorderConfig {
    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    pub fn with_exclude_patterns<S: Into<String>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.exclude_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_hash_algorithms(mut self, algorithms: Vec<HashAlgorithm>) -> Self {
        self.hash_algorithms = algorithms;
        self
    }

    pub fn with_follow_symlink_dirs(mut self, follow: bool) -> Self {
        self.follow_symlink_dirs = follow;
        self
    }

    pub fn with_lstrip_paths<S: Into<String>>(mut self, prefixes: impl IntoIterator<Item = S>) -> Self {
        self.lstrip_paths = prefixes.into_iter().map(Into::into).collect();
        self
    }
}

/// Records artifacts reachable from a list of roots
#[derive(Debug, Clone, Default)]
pub struct ArtifactRecorder {
    config: RecorderConfig,
}

impl ArtifactRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Hash every file reachable from `roots`.
    ///
    /// An empty root list yields an empty map without looking at the base
    /// path or the filesystem. Missing roots contribute nothing.
    pub fn record<S: AsRef<str>>(&self, roots: &[S]) -> RecordResult<ArtifactSet> {
        let mut artifacts = ArtifactSet::new();
        if roots.is_empty() {
            return Ok(artifacts);
        }

        if self.config.hash_algorithms.is_empty() {
            return Err(RecordError::validation(
                "at least one hash algorithm is required",
            ));
        }

        let filter = PatternFilter::new(&self.config.exclude_patterns)?;
        let base = BaseDir::resolve(self.config.base_path.as_deref())?;
        let scanned = ArtifactScanner::new(&base, &filter)
            .with_follow_symlink_dirs(self.config.follow_symlink_dirs)
            .scan(roots)?;

        tracing::debug!(
            base = %base.path().display(),
            roots = roots.len(),
            files = scanned.len(),
            "recording artifacts"
        );

        for artifact in scanned {
            let hashes = hash_artifact(&artifact.path, &self.config.hash_algorithms)?;
            let key = self.strip_prefix(&artifact.key)?;
            if artifacts.contains_key(&key) {
                return Err(RecordError::validation(format!(
                    "prefix stripping makes {} collide with another artifact as {}",
                    artifact.key, key
                )));
            }
            artifacts.insert(key, hashes);
        }

        Ok(artifacts)
    }

    fn strip_prefix(&self, key: &str) -> RecordResult<String> {
        for prefix in &self.config.lstrip_paths {
            if let Some(rest) = key.strip_prefix(prefix.as_str()) {
                let stripped = rest.trim_start_matches('/');
                if stripped.is_empty() {
                    return Err(RecordError::validation(format!(
                        "stripping {:?} leaves nothing of artifact {}",
                        prefix, key
                    )));
                }
                return Ok(stripped.to_string());
            }
        }
        Ok(key.to_string())
    }
}

/// Record `roots` with `config` in one call
pub fn record_artifacts<S: AsRef<str>>(roots: &[S], config: &RecorderConfig) -> RecordResult<ArtifactSet> {
    ArtifactRecorder::new(config.clone()).record(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("dist/sub")).unwrap();
        fs::write(dir.path().join("foo"), "foo").unwrap();
        fs::write(dir.path().join("dist/foo"), "dist foo").unwrap();
        fs::write(dir.path().join("dist/sub/bar"), "bar").unwrap();
        dir
    }

    #[test]
    fn test_empty_roots_ignore_config() {
        let config = RecorderConfig::default()
            .with_base_path("/path/does/not/exist")
            .with_hash_algorithms(Vec::new());
        let empty: [&str; 0] = [];
        assert!(record_artifacts(&empty, &config).unwrap().is_empty());
    }

    #[test]
    fn test_record_hashes_every_file() {
        let dir = create_tree();
        let config = RecorderConfig::default().with_base_path(dir.path());
        let artifacts = record_artifacts(&["."], &config).unwrap();

        let keys: Vec<&str> = artifacts.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["dist/foo", "dist/sub/bar", "foo"]);
        for record in artifacts.values() {
            assert_eq!(record.keys().collect::<Vec<_>>(), vec!["sha256"]);
        }
    }

    #[test]
    fn test_record_with_multiple_algorithms() {
        let dir = create_tree();
        let config = RecorderConfig::default()
            .with_base_path(dir.path())
            .with_hash_algorithms(vec![HashAlgorithm::Sha256, HashAlgorithm::Sha512]);
        let artifacts = record_artifacts(&["foo"], &config).unwrap();
        assert_eq!(artifacts["foo"].len(), 2);
    }

    #[test]
    fn test_lstrip_paths() {
        let dir = create_tree();
        let config = RecorderConfig::default()
            .with_base_path(dir.path())
            .with_lstrip_paths(["dist/sub/", "dist/"]);
        let artifacts = record_artifacts(&["dist"], &config).unwrap();

        let keys: Vec<&str> = artifacts.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["bar", "foo"]);
    }

    #[test]
    fn test_lstrip_collision_rejected() {
        let dir = create_tree();
        let config = RecorderConfig::default()
            .with_base_path(dir.path())
            .with_lstrip_paths(["dist/"]);
        let err = record_artifacts(&["foo", "dist"], &config).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_lstrip_whole_key_rejected() {
        let dir = create_tree();
        let config = RecorderConfig::default()
            .with_base_path(dir.path())
            .with_lstrip_paths(["foo"]);
        let err = record_artifacts(&["foo"], &config).unwrap_err();
        assert!(err.is_validation());

        // Same prefix on a longer key still strips
        let artifacts = record_artifacts(&["dist"], &config.with_lstrip_paths(["dist"])).unwrap();
        let keys: Vec<&str> = artifacts.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["foo", "sub/bar"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_is_io_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = create_tree();
        let locked = dir.path().join("dist/sub");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        let privileged = fs::read_dir(&locked).is_ok();

        let config = RecorderConfig::default().with_base_path(dir.path());
        let result = record_artifacts(&["."], &config);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        // Permission bits do not bind a privileged user
        if !privileged {
            assert!(result.unwrap_err().is_io());
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_io_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = create_tree();
        let locked = dir.path().join("dist/foo");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        let privileged = fs::File::open(&locked).is_ok();

        let config = RecorderConfig::default().with_base_path(dir.path());
        let result = record_artifacts(&["."], &config);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

        if !privileged {
            assert!(result.unwrap_err().is_io());
        }
    }

    /// Reading address zero of the process's own memory fails for every user
    #[cfg(target_os = "linux")]
    #[test]
    fn test_read_failure_mid_scan_is_io_error() {
        use std::os::unix::fs::symlink;

        let dir = create_tree();
        symlink("/proc/self/mem", dir.path().join("dist/mem")).unwrap();

        let config = RecorderConfig::default().with_base_path(dir.path());
        let err = record_artifacts(&["."], &config).unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn test_unterminated_class_pattern_is_literal() {
        let dir = create_tree();
        let config = RecorderConfig::default()
            .with_base_path(dir.path())
            .with_exclude_patterns(["[a-"]);
        assert_eq!(record_artifacts(&["."], &config).unwrap().len(), 3);
    }

    #[test]
    fn test_missing_base_path() {
        let dir = create_tree();
        let config = RecorderConfig::default().with_base_path(dir.path().join("nope"));
        assert!(record_artifacts(&["."], &config).unwrap_err().is_validation());
    }
}

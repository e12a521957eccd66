//! Artifact discovery
//!
//! Walks root inputs below a base directory and yields the concrete files
//! to record, keyed by their normalized path relative to that base.
//!
//! Symlink policy:
//! - symlinked files are recorded (their content is the target's content)
//! - dead symlinks are skipped
//! - symlinked directories are descended only with `follow_symlink_dirs`
//! - symlink loops are skipped instead of followed forever
//!
//! Names that are not valid UTF-8 cannot be keyed and fail the scan.

use std::collections::HashSet;
use std::env;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use super::pattern::PatternFilter;
use crate::error::{RecordError, RecordResult};

/// Directory that artifact keys are relative to.
///
/// Acquired per scan and released when dropped. Roots are joined onto it
/// explicitly, so the process working directory is never touched.
#[derive(Debug, Clone)]
pub struct BaseDir {
    path: PathBuf,
}

impl BaseDir {
    /// Resolve an optional base path against the current directory.
    ///
    /// An explicit base path must name an existing directory.
    pub fn resolve(base_path: Option<&Path>) -> RecordResult<Self> {
        let cwd = env::current_dir().map_err(|e| RecordError::io(".", e))?;

        let path = match base_path {
            None => cwd,
            Some(base) => {
                let joined = cwd.join(base);
                if !joined.is_dir() {
                    return Err(RecordError::validation(format!(
                        "base path {} is not an existing directory",
                        base.display()
                    )));
                }
                joined
            }
        };

        Ok(Self {
            path: normalize_absolute(&path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Normalized key of a root input, rejecting roots outside the base
    pub fn relative_key(&self, root: &str) -> RecordResult<String> {
        let root_path = Path::new(root);
        let relative = if root_path.is_absolute() {
            let absolute = normalize_absolute(root_path);
            absolute
                .strip_prefix(&self.path)
                .map(Path::to_path_buf)
                .map_err(|_| {
                    RecordError::validation(format!(
                        "artifact path {} is outside base path {}",
                        root,
                        self.path.display()
                    ))
                })?
        } else {
            root_path.to_path_buf()
        };

        let mut parts: Vec<String> = Vec::new();
        for component in relative.components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => parts.push(utf8_name(part, root_path)?.to_string()),
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(RecordError::validation(format!(
                            "artifact path {} escapes base path {}",
                            root,
                            self.path.display()
                        )));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {}
            }
        }

        if parts.is_empty() {
            Ok(".".to_string())
        } else {
            Ok(parts.join("/"))
        }
    }

    /// Filesystem location of a normalized key
    pub fn path_of(&self, key: &str) -> PathBuf {
        if key == "." {
            self.path.clone()
        } else {
            key.split('/').fold(self.path.clone(), |acc, part| acc.join(part))
        }
    }
}

/// Lexically remove `.` and `..` from an absolute path
fn normalize_absolute(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// A file selected for recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedArtifact {
    /// Normalized, `/`-separated path relative to the base directory
    pub key: String,

    /// Location to read the content from
    pub path: PathBuf,
}

/// Discovers artifact files below a base directory
#[derive(Debug)]
pub struct ArtifactScanner<'a> {
    base: &'a BaseDir,
    filter: &'a PatternFilter,
    follow_symlink_dirs: bool,
}

impl<'a> ArtifactScanner<'a> {
    pub fn new(base: &'a BaseDir, filter: &'a PatternFilter) -> Self {
        Self {
            base,
            filter,
            follow_symlink_dirs: false,
        }
    }

    /// Descend into symlinked directories
    pub fn with_follow_symlink_dirs(mut self, follow: bool) -> Self {
        self.follow_symlink_dirs = follow;
        self
    }

    /// Files reachable from `roots`, deduplicated, in discovery order
    pub fn scan<S: AsRef<str>>(&self, roots: &[S]) -> RecordResult<Vec<ScannedArtifact>> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        for root in roots {
            self.scan_root(root.as_ref(), &mut seen, &mut found)?;
        }

        Ok(found)
    }

    fn scan_root(
        &self,
        root: &str,
        seen: &mut HashSet<String>,
        found: &mut Vec<ScannedArtifact>,
    ) -> RecordResult<()> {
        let key = self.base.relative_key(root)?;
        if self.filter.is_excluded(&key) {
            tracing::debug!(root, "root excluded by pattern");
            return Ok(());
        }

        let path = self.base.path_of(&key);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(root, "root does not exist, skipping");
                return Ok(());
            }
            Err(e) => return Err(RecordError::io(path, e)),
        };

        if metadata.is_file() {
            push_unique(seen, found, key, path);
        } else if metadata.is_dir() {
            self.walk(&key, &path, seen, found)?;
        } else {
            tracing::debug!(root, "root is neither file nor directory, skipping");
        }

        Ok(())
    }

    fn walk(
        &self,
        root_key: &str,
        root_path: &Path,
        seen: &mut HashSet<String>,
        found: &mut Vec<ScannedArtifact>,
    ) -> RecordResult<()> {
        let walker = WalkDir::new(root_path)
            .follow_links(self.follow_symlink_dirs)
            .sort_by_file_name()
            .into_iter()
            // Excluded directories are pruned here, before they are opened
            .filter_entry(|entry| {
                // Unkeyable names pass through and fail below
                entry.depth() == 0
                    || entry_key(root_key, root_path, entry.path())
                        .map(|key| !self.filter.is_excluded(&key))
                        .unwrap_or(true)
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if is_skippable(&err) {
                        continue;
                    }
                    let path = err.path().unwrap_or(root_path).to_path_buf();
                    return Err(RecordError::io(path, io::Error::from(err)));
                }
            };

            if entry.depth() == 0 {
                continue;
            }
            let key = entry_key(root_key, root_path, entry.path())?;
            if entry.file_type().is_dir() {
                continue;
            }

            if let Some(path) = recordable_path(&entry) {
                push_unique(seen, found, key, path);
            }
        }

        Ok(())
    }
}

/// Location to hash for a walked entry, or `None` if it is not a file
fn recordable_path(entry: &DirEntry) -> Option<PathBuf> {
    let file_type = entry.file_type();
    if file_type.is_file() {
        return Some(entry.path().to_path_buf());
    }
    if !file_type.is_symlink() {
        return None;
    }

    match fs::metadata(entry.path()) {
        Ok(target) if target.is_file() => Some(entry.path().to_path_buf()),
        Ok(_) => {
            tracing::debug!(path = %entry.path().display(), "not following symlinked directory");
            None
        }
        Err(_) => {
            tracing::debug!(path = %entry.path().display(), "skipping dead symlink");
            None
        }
    }
}

/// Walk errors that stand for dead links or loops rather than failures
fn is_skippable(err: &walkdir::Error) -> bool {
    if err.loop_ancestor().is_some() {
        tracing::warn!(
            path = ?err.path(),
            "symlink loop detected, not descending"
        );
        return true;
    }

    let is_symlink = err
        .path()
        .and_then(|p| fs::symlink_metadata(p).ok())
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if is_symlink && err.depth() > 0 {
        tracing::debug!(path = ?err.path(), "skipping dead symlink");
        return true;
    }

    false
}

/// Key of a walked path: the root key joined with the path below the root
fn entry_key(root_key: &str, root_path: &Path, path: &Path) -> RecordResult<String> {
    let mut below: Vec<&str> = Vec::new();
    for component in path.strip_prefix(root_path).unwrap_or(path).components() {
        if let Component::Normal(part) = component {
            below.push(utf8_name(part, path)?);
        }
    }
    let below = below.join("/");

    Ok(if root_key == "." {
        below
    } else if below.is_empty() {
        root_key.to_string()
    } else {
        format!("{}/{}", root_key, below)
    })
}

/// A path component as UTF-8; lossy names could collide as keys
fn utf8_name<'p>(part: &'p OsStr, path: &Path) -> RecordResult<&'p str> {
    part.to_str().ok_or_else(|| {
        RecordError::validation(format!(
            "artifact path {} is not valid UTF-8",
            path.display()
        ))
    })
}

fn push_unique(
    seen: &mut HashSet<String>,
    found: &mut Vec<ScannedArtifact>,
    key: String,
    path: PathBuf,
) {
    if seen.insert(key.clone()) {
        found.push(ScannedArtifact { key, path });
    }
}

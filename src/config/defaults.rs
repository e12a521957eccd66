//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Built-in recording settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Base path for artifact keys (default: none, the current directory)
    pub base_path: Option<String>,

    /// Exclusion patterns (default: none)
    pub exclude_patterns: Vec<String>,

    /// Digest algorithms (default: sha256)
    pub hash_algorithms: Vec<String>,

    /// Descend into symlinked directories (default: false)
    pub follow_symlink_dirs: bool,

    /// Prefixes stripped from keys (default: none)
    pub lstrip_paths: Vec<String>,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            base_path: None,
            exclude_patterns: Vec::new(),
            hash_algorithms: vec!["sha256".to_string()],
            follow_symlink_dirs: false,
            lstrip_paths: Vec::new(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> Value {
        json!({
            "artifacts": {
                "base_path": self.base_path,
                "exclude_patterns": self.exclude_patterns,
                "hash_algorithms": self.hash_algorithms,
                "follow_symlink_dirs": self.follow_symlink_dirs,
                "lstrip_paths": self.lstrip_paths,
            }
        })
    }
}

//! Artifact recording
//!
//! Turns root inputs (files or directories below a base path) into the
//! artifact map of a link: discovery, exclusion, hashing.

mod hash;
mod pattern;
mod recorder;
mod scanner;

pub use hash::{hash_artifact, parse_algorithms, HashAlgorithm, DEFAULT_HASH_ALGORITHMS};
pub use pattern::{apply_exclude_patterns, patterns_from_value, PatternFilter};
pub use recorder::{record_artifacts, ArtifactRecorder, RecorderConfig};
pub use scanner::{ArtifactScanner, BaseDir, ScannedArtifact};

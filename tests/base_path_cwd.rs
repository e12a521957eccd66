//! Recording with a base path matches recording from inside that directory.
//!
//! This is the only test that changes the process working directory, so it
//! lives alone in its own test binary.

use std::collections::BTreeSet;
use std::env;
use std::fs;

use steplink::{record_artifacts, RecorderConfig};
use tempfile::TempDir;

#[test]
fn test_base_path_equals_cd() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("project/src")).unwrap();
    fs::write(dir.path().join("project/README"), "readme").unwrap();
    fs::write(dir.path().join("project/src/main.c"), "int main;").unwrap();
    let base = dir.path().join("project");

    let original = env::current_dir().unwrap();

    let with_base = record_artifacts(&["."], &RecorderConfig::default().with_base_path(&base))
        .unwrap();
    assert_eq!(env::current_dir().unwrap(), original);

    env::set_current_dir(&base).unwrap();
    let from_inside = record_artifacts(&["."], &RecorderConfig::default());
    env::set_current_dir(&original).unwrap();
    let from_inside = from_inside.unwrap();

    let keys = |set: &steplink::metadata::ArtifactSet| set.keys().cloned().collect::<BTreeSet<_>>();
    assert_eq!(keys(&with_base), keys(&from_inside));
    assert_eq!(with_base, from_inside);
    assert_eq!(env::current_dir().unwrap(), original);
}

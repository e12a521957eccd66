//! Two-phase recording against files in a metadata directory

use std::fs;

use steplink::metadata::{unfinished_link_filename, Key, Metablock};
use steplink::{record_start, record_stop, FsLinkStore, IdentityRequest, RecorderConfig};
use tempfile::TempDir;

struct Fixture {
    artifacts: TempDir,
    metadata: TempDir,
    config: RecorderConfig,
}

impl Fixture {
    fn new() -> Self {
        let artifacts = TempDir::new().unwrap();
        fs::write(artifacts.path().join("foo"), "foo").unwrap();
        fs::write(artifacts.path().join("bar"), "bar").unwrap();
        let config = RecorderConfig::default().with_base_path(artifacts.path());
        Self {
            artifacts,
            metadata: TempDir::new().unwrap(),
            config,
        }
    }

    fn store(&self) -> FsLinkStore {
        FsLinkStore::new(self.metadata.path())
    }
}

#[test]
fn test_start_stop_round_trip() {
    let fx = Fixture::new();
    let store = fx.store();
    let key = Key::generate_ed25519().unwrap();
    let request = IdentityRequest::key(key.clone());

    let started = record_start("build", &["foo"], &request, &fx.config, &store).unwrap();
    let unfinished = store.unfinished_path("build", &key.keyid);
    assert!(unfinished.exists());
    assert_eq!(
        unfinished.file_name().unwrap().to_str().unwrap(),
        format!(".build.{}.link-unfinished", &key.keyid[..8])
    );

    // The product only appears after start
    fs::write(fx.artifacts.path().join("baz"), "baz").unwrap();
    let finished = record_stop("build", &["baz"], &request, &fx.config, &store).unwrap();

    assert_eq!(finished.signed.materials, started.signed.materials);
    assert!(finished.signed.materials.contains_key("foo"));
    assert_eq!(
        finished.signed.products.keys().collect::<Vec<_>>(),
        vec!["baz"]
    );
    assert!(finished.verify_signature(&key).unwrap());

    assert!(!unfinished.exists());
    let finished_path = store.finished_path("build", &key.keyid);
    assert_eq!(
        finished_path.file_name().unwrap().to_str().unwrap(),
        format!("build.{}.link", &key.keyid[..8])
    );
    assert_eq!(Metablock::load(&finished_path).unwrap(), finished);
}

#[test]
fn test_stop_with_other_key_keeps_unfinished() {
    let fx = Fixture::new();
    let store = fx.store();
    let key1 = Key::generate_ed25519().unwrap();
    let key2 = Key::generate_ed25519().unwrap();

    record_start("build", &["foo"], &IdentityRequest::key(key1.clone()), &fx.config, &store)
        .unwrap();

    // Make key1's unfinished link look like key2's
    let renamed = store.unfinished_path("build", &key2.keyid);
    fs::rename(store.unfinished_path("build", &key1.keyid), &renamed).unwrap();
    let before = fs::read(&renamed).unwrap();

    let err = record_stop("build", &["bar"], &IdentityRequest::key(key2.clone()), &fx.config, &store)
        .unwrap_err();

    assert!(err.is_signature_verification());
    assert_eq!(fs::read(&renamed).unwrap(), before);
    assert!(!store.finished_path("build", &key2.keyid).exists());
}

#[test]
fn test_stop_without_start_is_io_error() {
    let fx = Fixture::new();
    let store = fx.store();
    let key = Key::generate_ed25519().unwrap();

    let err = record_stop("build", &["bar"], &IdentityRequest::key(key.clone()), &fx.config, &store)
        .unwrap_err();

    assert!(err.is_io());
    assert!(!store.finished_path("build", &key.keyid).exists());
}

#[test]
fn test_no_identity_writes_nothing() {
    let fx = Fixture::new();
    let store = fx.store();
    let request = IdentityRequest::default();

    assert!(record_start("build", &["foo"], &request, &fx.config, &store)
        .unwrap_err()
        .is_validation());
    assert!(record_stop("build", &["bar"], &request, &fx.config, &store)
        .unwrap_err()
        .is_validation());
    assert_eq!(fs::read_dir(fx.metadata.path()).unwrap().count(), 0);
}

#[test]
fn test_second_start_overwrites() {
    let fx = Fixture::new();
    let store = fx.store();
    let key = Key::generate_ed25519().unwrap();
    let request = IdentityRequest::key(key.clone());

    record_start("build", &["foo"], &request, &fx.config, &store).unwrap();
    let second = record_start("build", &["bar"], &request, &fx.config, &store).unwrap();

    let path = fx
        .metadata
        .path()
        .join(unfinished_link_filename("build", &key.keyid));
    assert_eq!(Metablock::load(&path).unwrap(), second);
}

//! Building, signing and storing links for one step

mod builder;
mod signing;

pub use builder::{capture_environment, LinkBuilder, Step};
pub use signing::{sign_link, IdentityRequest, SigningIdentity};

use steplink_metadata::Metablock;

use crate::error::RecordResult;
use crate::store::LinkStore;

/// Record a step in one go: build its link, sign it and store it.
///
/// Unsigned links are returned but not stored, since their file name
/// depends on the signer.
pub fn run_step(
    builder: &LinkBuilder,
    step: &Step,
    identity: Option<&SigningIdentity>,
    store: &dyn LinkStore,
) -> RecordResult<Metablock> {
    let link = builder.build(step)?;
    let metablock = sign_link(link, identity)?;

    if let Some(identity) = identity {
        store.save_finished(&metablock, identity.keyid())?;
    }

    Ok(metablock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::RecorderConfig;
    use crate::store::MemoryLinkStore;
    use std::fs;
    use steplink_metadata::Key;
    use tempfile::TempDir;

    #[test]
    fn test_run_step_signed_is_stored() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("foo"), "foo").unwrap();
        let builder = LinkBuilder::new(RecorderConfig::default().with_base_path(dir.path()));
        let identity = SigningIdentity::from_key(Key::generate_ed25519().unwrap()).unwrap();
        let store = MemoryLinkStore::new();

        let metablock = run_step(
            &builder,
            &Step::new("build").with_materials(["foo"]),
            Some(&identity),
            &store,
        )
        .unwrap();

        assert!(identity.verify(&metablock).unwrap());
        assert_eq!(store.finished("build", identity.keyid()), Some(metablock));
    }

    #[test]
    fn test_run_step_unsigned_not_stored() {
        let dir = TempDir::new().unwrap();
        let builder = LinkBuilder::new(RecorderConfig::default().with_base_path(dir.path()));
        let store = MemoryLinkStore::new();

        let metablock = run_step(&builder, &Step::new("build"), None, &store).unwrap();
        assert!(metablock.signatures.is_empty());
    }
}

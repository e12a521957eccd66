//! steplink metadata
//!
//! Link payloads, the signed envelope that carries them, Ed25519 keys and
//! `gpg`-backed OpenPGP identities.

pub mod error;
pub mod gpg;
pub mod key;
pub mod link;
pub mod metablock;

pub use error::{MetadataError, MetadataResult};
pub use gpg::GpgClient;
pub use key::{compute_keyid, Key, KeyValue, KEYTYPE_ED25519, SCHEME_ED25519};
pub use link::{
    link_filename, short_keyid, unfinished_link_filename, ArtifactSet, Byproducts, Environment,
    HashRecord, Link, LINK_TYPE,
};
pub use metablock::{Metablock, Signature};

//! Signing identities and the signing gate
//!
//! A link is signed by at most one identity per call: an Ed25519 key held
//! in memory, or an OpenPGP key held by `gpg`.

use std::path::PathBuf;

use steplink_metadata::{GpgClient, Key, Link, Metablock};

use crate::error::{RecordError, RecordResult};

/// A credential able to sign and verify links
#[derive(Debug, Clone)]
pub enum SigningIdentity {
    /// Ed25519 key with its private part
    Key(Key),

    /// OpenPGP key, identified by its full fingerprint
    Gpg { keyid: String, client: GpgClient },
}

impl SigningIdentity {
    /// Wrap a key, rejecting public-only or malformed keys
    pub fn from_key(key: Key) -> RecordResult<Self> {
        key.check_private()?;
        Ok(Self::Key(key))
    }

    /// Keyid used in signatures and link file names
    pub fn keyid(&self) -> &str {
        match self {
            Self::Key(key) => &key.keyid,
            Self::Gpg { keyid, .. } => keyid,
        }
    }

    /// Append this identity's signature to `metablock`
    pub fn sign(&self, metablock: &mut Metablock) -> RecordResult<()> {
        match self {
            Self::Key(key) => metablock.sign(key)?,
            Self::Gpg { keyid, client } => metablock.sign_gpg(client, keyid)?,
        };
        Ok(())
    }

    /// Whether `metablock` carries a valid signature by this identity
    pub fn verify(&self, metablock: &Metablock) -> RecordResult<bool> {
        let valid = match self {
            Self::Key(key) => metablock.verify_signature(key)?,
            Self::Gpg { keyid, client } => metablock.verify_gpg_signature(client, keyid)?,
        };
        Ok(valid)
    }
}

/// Identity options as a caller supplies them
#[derive(Debug, Clone, Default)]
pub struct IdentityRequest {
    pub signing_key: Option<Key>,

    /// Explicit OpenPGP key id; takes precedence over `gpg_use_default`
    pub gpg_keyid: Option<String>,

    /// Sign with the keyring's default secret key
    pub gpg_use_default: bool,

    /// Keyring directory passed to `gpg --homedir`
    pub gpg_home: Option<PathBuf>,
}

impl IdentityRequest {
    pub fn key(key: Key) -> Self {
        Self {
            signing_key: Some(key),
            ..Self::default()
        }
    }

    pub fn gpg(keyid: impl Into<String>) -> Self {
        Self {
            gpg_keyid: Some(keyid.into()),
            ..Self::default()
        }
    }

    pub fn gpg_default() -> Self {
        Self {
            gpg_use_default: true,
            ..Self::default()
        }
    }

    pub fn with_gpg_home(mut self, gpg_home: impl Into<PathBuf>) -> Self {
        self.gpg_home = Some(gpg_home.into());
        self
    }

    fn wants_gpg(&self) -> bool {
        self.gpg_keyid.is_some() || self.gpg_use_default
    }

    /// The requested identity, or `None` if none was requested
    pub fn resolve(&self) -> RecordResult<Option<SigningIdentity>> {
        if self.signing_key.is_some() && self.wants_gpg() {
            return Err(RecordError::validation(
                "specify either a signing key or a gpg identity, not both",
            ));
        }

        if let Some(key) = &self.signing_key {
            return SigningIdentity::from_key(key.clone()).map(Some);
        }

        if !self.wants_gpg() {
            return Ok(None);
        }

        let client = match &self.gpg_home {
            Some(home) => GpgClient::new().with_homedir(home),
            None => GpgClient::new(),
        };
        let keyid = client.resolve_keyid(self.gpg_keyid.as_deref())?;
        tracing::debug!(%keyid, "resolved gpg identity");

        Ok(Some(SigningIdentity::Gpg { keyid, client }))
    }

    /// Like [`resolve`](Self::resolve), but an identity is mandatory
    pub fn require(&self) -> RecordResult<SigningIdentity> {
        self.resolve()?.ok_or_else(|| {
            RecordError::validation("a signing key or a gpg identity is required")
        })
    }
}

/// Wrap `link` in a metablock, signed by `identity` when one is given
pub fn sign_link(link: Link, identity: Option<&SigningIdentity>) -> RecordResult<Metablock> {
    let mut metablock = Metablock::new(link);
    if let Some(identity) = identity {
        identity.sign(&mut metablock)?;
    }
    Ok(metablock)
}

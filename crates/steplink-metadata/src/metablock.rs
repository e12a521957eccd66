//! Signed link envelope
//!
//! A [`Metablock`] pairs a link payload with zero or more signatures. Each
//! signature covers the JCS (RFC 8785) canonical JSON of the payload, so
//! the on-disk formatting of a record never affects verification.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MetadataError, MetadataResult};
use crate::gpg::GpgClient;
use crate::key::Key;
use crate::link::Link;

/// One signature over the canonical payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Ed25519 keyid or OpenPGP fingerprint of the signer
    pub keyid: String,

    /// Hex-encoded signature bytes
    pub sig: String,

    /// Extra signed headers, kept when reading records from other tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_headers: Option<String>,
}

/// Link payload plus signatures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metablock {
    pub signed: Link,

    #[serde(default)]
    pub signatures: Vec<Signature>,
}

impl Metablock {
    /// Wrap an unsigned payload
    pub fn new(signed: Link) -> Self {
        Self {
            signed,
            signatures: Vec::new(),
        }
    }

    /// Exact bytes that signatures cover
    pub fn canonical_payload(&self) -> MetadataResult<Vec<u8>> {
        serde_json_canonicalizer::to_vec(&self.signed)
            .map_err(|e| MetadataError::Canonicalization(e.to_string()))
    }

    /// Sign the payload with an Ed25519 private key
    pub fn sign(&mut self, key: &Key) -> MetadataResult<&Signature> {
        key.check_private()?;
        let payload = self.canonical_payload()?;
        let sig = key.sign_bytes(&payload)?;
        Ok(self.push_signature(Signature {
            keyid: key.keyid.clone(),
            sig,
            other_headers: None,
        }))
    }

    /// Sign the payload with an OpenPGP key held by `gpg`
    pub fn sign_gpg(&mut self, gpg: &GpgClient, keyid: &str) -> MetadataResult<&Signature> {
        let payload = self.canonical_payload()?;
        let sig = gpg.sign(&payload, keyid)?;
        Ok(self.push_signature(Signature {
            keyid: keyid.to_ascii_lowercase(),
            sig,
            other_headers: None,
        }))
    }

    fn push_signature(&mut self, signature: Signature) -> &Signature {
        self.signatures.push(signature);
        let last = self.signatures.len() - 1;
        &self.signatures[last]
    }

    /// Signature made by `keyid`, if any
    pub fn signature_by(&self, keyid: &str) -> Option<&Signature> {
        self.signatures
            .iter()
            .find(|s| s.keyid.eq_ignore_ascii_case(keyid))
    }

    /// Whether a signature by `key` exists and covers the current payload
    pub fn verify_signature(&self, key: &Key) -> MetadataResult<bool> {
        let Some(signature) = self.signature_by(&key.keyid) else {
            return Ok(false);
        };
        let payload = self.canonical_payload()?;
        key.verify_bytes(&payload, &signature.sig)
    }

    /// Whether a signature by the OpenPGP key `keyid` exists and verifies
    pub fn verify_gpg_signature(&self, gpg: &GpgClient, keyid: &str) -> MetadataResult<bool> {
        let Some(signature) = self.signature_by(keyid) else {
            return Ok(false);
        };
        let payload = self.canonical_payload()?;
        gpg.verify(&payload, &signature.sig, keyid)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load a record from disk
    pub fn load(path: &Path) -> MetadataResult<Self> {
        let json = fs::read_to_string(path).map_err(|e| MetadataError::io(path, e))?;
        Ok(Self::from_json(&json)?)
    }

    /// Write a record to disk via write-then-rename
    pub fn dump(&self, path: &Path) -> MetadataResult<()> {
        let json = self.to_json()?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

        fs::write(&temp_path, json).map_err(|e| MetadataError::io(&temp_path, e))?;
        fs::rename(&temp_path, path).map_err(|e| MetadataError::io(path, e))
    }
}

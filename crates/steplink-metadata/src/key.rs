//! Ed25519 signing keys
//!
//! Keys travel as JSON records `{keyid, keytype, scheme, keyval}` with hex
//! encoded key material. The keyid is the SHA-256 of the canonical JSON of
//! the public part, so it identifies the key independent of the file it
//! was loaded from.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MetadataError, MetadataResult};

/// Key type identifier
pub const KEYTYPE_ED25519: &str = "ed25519";

/// Signature scheme identifier
pub const SCHEME_ED25519: &str = "ed25519";

/// Hex-encoded key material
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub public: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<String>,
}

/// A signing or verification key record
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub keyid: String,
    pub keytype: String,
    pub scheme: String,
    pub keyval: KeyValue,
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("keyid", &self.keyid)
            .field("keytype", &self.keytype)
            .field("scheme", &self.scheme)
            .field("public", &self.keyval.public)
            .field("private", &self.keyval.private.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Public part hashed into the keyid
#[derive(Serialize)]
struct KeyIdInput<'a> {
    keytype: &'a str,
    scheme: &'a str,
    keyval: PublicKeyValue<'a>,
}

#[derive(Serialize)]
struct PublicKeyValue<'a> {
    public: &'a str,
}

/// Compute the keyid for a public key
pub fn compute_keyid(keytype: &str, scheme: &str, public_hex: &str) -> MetadataResult<String> {
    let input = KeyIdInput {
        keytype,
        scheme,
        keyval: PublicKeyValue { public: public_hex },
    };
    let canonical = serde_json_canonicalizer::to_vec(&input)
        .map_err(|e| MetadataError::Canonicalization(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

impl Key {
    /// Generate a fresh Ed25519 private key
    pub fn generate_ed25519() -> MetadataResult<Self> {
        let signing_key = SigningKey::generate(&mut rand::thread_rng());
        Self::from_signing_key(&signing_key)
    }

    /// Wrap an existing Ed25519 signing key
    pub fn from_signing_key(signing_key: &SigningKey) -> MetadataResult<Self> {
        let public = hex::encode(signing_key.verifying_key().as_bytes());
        let keyid = compute_keyid(KEYTYPE_ED25519, SCHEME_ED25519, &public)?;

        Ok(Self {
            keyid,
            keytype: KEYTYPE_ED25519.to_string(),
            scheme: SCHEME_ED25519.to_string(),
            keyval: KeyValue {
                public,
                private: Some(hex::encode(signing_key.to_bytes())),
            },
        })
    }

    /// Copy of this key without private material
    pub fn public_only(&self) -> Self {
        Self {
            keyval: KeyValue {
                public: self.keyval.public.clone(),
                private: None,
            },
            ..self.clone()
        }
    }

    pub fn is_private(&self) -> bool {
        self.keyval.private.is_some()
    }

    /// Check type, scheme and keyid consistency of the public part
    pub fn check_format(&self) -> MetadataResult<()> {
        if self.keytype != KEYTYPE_ED25519 || self.scheme != SCHEME_ED25519 {
            return Err(MetadataError::KeyFormat(format!(
                "unsupported key type/scheme {}/{}",
                self.keytype, self.scheme
            )));
        }

        let expected = compute_keyid(&self.keytype, &self.scheme, &self.keyval.public)?;
        if expected != self.keyid {
            return Err(MetadataError::KeyFormat(format!(
                "keyid {} does not match public key (expected {})",
                self.keyid, expected
            )));
        }

        self.verifying_key().map(|_| ())
    }

    /// Check that this key can sign: well formed, private part present and
    /// belonging to the public part.
    pub fn check_private(&self) -> MetadataResult<()> {
        self.check_format()?;
        let signing_key = self.signing_key()?;
        if hex::encode(signing_key.verifying_key().as_bytes()) != self.keyval.public {
            return Err(MetadataError::KeyFormat(
                "private key does not match public key".to_string(),
            ));
        }
        Ok(())
    }

    /// Decode the private part
    pub fn signing_key(&self) -> MetadataResult<SigningKey> {
        let private = self.keyval.private.as_deref().ok_or_else(|| {
            MetadataError::KeyFormat(format!("key {} has no private part", self.keyid))
        })?;
        let bytes: [u8; 32] = decode_fixed(private, "private key")?;
        Ok(SigningKey::from_bytes(&bytes))
    }

    /// Decode the public part
    pub fn verifying_key(&self) -> MetadataResult<VerifyingKey> {
        let bytes: [u8; 32] = decode_fixed(&self.keyval.public, "public key")?;
        VerifyingKey::from_bytes(&bytes).map_err(|e| MetadataError::KeyFormat(e.to_string()))
    }

    /// Sign bytes, returning the hex-encoded signature
    pub fn sign_bytes(&self, payload: &[u8]) -> MetadataResult<String> {
        let signing_key = self.signing_key()?;
        Ok(hex::encode(signing_key.sign(payload).to_bytes()))
    }

    /// Verify a hex-encoded signature over bytes
    pub fn verify_bytes(&self, payload: &[u8], sig_hex: &str) -> MetadataResult<bool> {
        let verifying_key = self.verifying_key()?;
        let sig_bytes = hex::decode(sig_hex)?;
        let signature = match Ed25519Signature::from_slice(&sig_bytes) {
            Ok(signature) => signature,
            Err(_) => return Ok(false),
        };
        Ok(verifying_key.verify(payload, &signature).is_ok())
    }

    /// Parse a key record from JSON
    pub fn from_json(json: &str) -> MetadataResult<Self> {
        let key: Self = serde_json::from_str(json)
            .map_err(|e| MetadataError::KeyFormat(format!("not a key record: {}", e)))?;
        key.check_format()?;
        Ok(key)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load a key record from a file
    pub fn from_file(path: &Path) -> MetadataResult<Self> {
        let json = fs::read_to_string(path).map_err(|e| MetadataError::io(path, e))?;
        Self::from_json(&json)
    }

    /// Write the key record to a file.
    ///
    /// On unix a file holding private material is readable by its owner only.
    pub fn write_to_file(&self, path: &Path) -> MetadataResult<()> {
        let json = self.to_json()?;
        let mut file = open_key_file(path, self.is_private()).map_err(|e| MetadataError::io(path, e))?;
        file.write_all(json.as_bytes())
            .map_err(|e| MetadataError::io(path, e))
    }
}

#[cfg(unix)]
fn open_key_file(path: &Path, private: bool) -> io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mode = if private { 0o600 } else { 0o644 };
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;

    // mode() only applies when the file is created
    if private {
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    Ok(file)
}

#[cfg(not(unix))]
fn open_key_file(path: &Path, _private: bool) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

fn decode_fixed<const N: usize>(encoded: &str, what: &str) -> MetadataResult<[u8; N]> {
    let bytes = hex::decode(encoded)
        .map_err(|e| MetadataError::KeyFormat(format!("{} is not hex: {}", what, e)))?;
    bytes
        .try_into()
        .map_err(|_| MetadataError::KeyFormat(format!("{} must be {} bytes", what, N)))
}

//! Content hashing for artifacts

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use steplink_metadata::HashRecord;

use crate::error::{RecordError, RecordResult};

/// Read size for streaming file content into the hashers
const CHUNK_SIZE: usize = 64 * 1024;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

/// Algorithms used when the configuration names none
pub const DEFAULT_HASH_ALGORITHMS: &[HashAlgorithm] = &[HashAlgorithm::Sha256];

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    fn hasher(&self) -> Hasher {
        match self {
            Self::Sha224 => Hasher::Sha224(Sha224::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
            Self::Sha384 => Hasher::Sha384(Sha384::new()),
            Self::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(RecordError::validation(format!(
                "unsupported hash algorithm {:?}",
                other
            ))),
        }
    }
}

enum Hasher {
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha224(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Sha224(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha384(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hash the full content of the file at `path` with every algorithm.
pub fn hash_artifact(path: &Path, algorithms: &[HashAlgorithm]) -> RecordResult<HashRecord> {
    if algorithms.is_empty() {
        return Err(RecordError::validation(
            "at least one hash algorithm is required",
        ));
    }

    let file = File::open(path).map_err(|e| RecordError::io(path, e))?;
    hash_reader(file, algorithms).map_err(|e| RecordError::io(path, e))
}

/// Hash everything readable from `reader`, one bounded chunk at a time
pub(crate) fn hash_reader<R: Read>(mut reader: R, algorithms: &[HashAlgorithm]) -> io::Result<HashRecord> {
    let mut hashers: Vec<(HashAlgorithm, Hasher)> =
        algorithms.iter().map(|alg| (*alg, alg.hasher())).collect();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        for (_, hasher) in hashers.iter_mut() {
            hasher.update(&buffer[..n]);
        }
    }

    Ok(hashers
        .into_iter()
        .map(|(alg, hasher)| (alg.name().to_string(), hasher.finalize_hex()))
        .collect())
}

/// Parse algorithm names, rejecting unknown ones and empty lists
pub fn parse_algorithms<S: AsRef<str>>(names: &[S]) -> RecordResult<Vec<HashAlgorithm>> {
    if names.is_empty() {
        return Err(RecordError::validation(
            "at least one hash algorithm is required",
        ));
    }
    let mut algorithms = Vec::with_capacity(names.len());
    for name in names {
        let alg: HashAlgorithm = name.as_ref().parse()?;
        if !algorithms.contains(&alg) {
            algorithms.push(alg);
        }
    }
    Ok(algorithms)
}

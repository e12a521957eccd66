//! OpenPGP signing through the `gpg` executable
//!
//! Key material never leaves the user's keyring: signing and verification
//! shell out to `gpg` and only the detached signature is stored, hex
//! encoded, in the link's signature list.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::NamedTempFile;

use crate::error::{MetadataError, MetadataResult};

/// Default executable name
pub const GPG_PROGRAM: &str = "gpg";

/// Handle to a `gpg` installation and keyring
#[derive(Debug, Clone)]
pub struct GpgClient {
    program: String,
    homedir: Option<PathBuf>,
}

impl Default for GpgClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GpgClient {
    pub fn new() -> Self {
        Self {
            program: GPG_PROGRAM.to_string(),
            homedir: None,
        }
    }

    /// Use a keyring other than the user's default
    pub fn with_homedir(mut self, homedir: impl Into<PathBuf>) -> Self {
        self.homedir = Some(homedir.into());
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(ref homedir) = self.homedir {
            command.arg("--homedir").arg(homedir);
        }
        command.arg("--batch").arg("--no-tty");
        command
    }

    fn output(&self, command: &mut Command) -> MetadataResult<Output> {
        command
            .output()
            .map_err(|e| MetadataError::Gpg(format!("failed to run {}: {}", self.program, e)))
    }

    /// Full lowercase fingerprint of `keyid`, or of the default secret key
    pub fn resolve_keyid(&self, keyid: Option<&str>) -> MetadataResult<String> {
        let mut command = self.command();
        command
            .arg("--with-colons")
            .arg("--fixed-list-mode")
            .arg("--list-secret-keys");
        if let Some(keyid) = keyid {
            command.arg(keyid);
        }

        let output = self.output(&mut command)?;
        if !output.status.success() {
            return Err(MetadataError::Gpg(format!(
                "no secret key found for {}: {}",
                keyid.unwrap_or("default identity"),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_secret_key_fingerprint(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            MetadataError::Gpg(format!(
                "no secret key fingerprint listed for {}",
                keyid.unwrap_or("default identity")
            ))
        })
    }

    /// Detached signature over `payload`, hex encoded
    pub fn sign(&self, payload: &[u8], keyid: &str) -> MetadataResult<String> {
        let payload_file = write_temp(payload)?;

        let mut command = self.command();
        command
            .arg("--local-user")
            .arg(keyid)
            .arg("--digest-algo")
            .arg("SHA256")
            .arg("--output")
            .arg("-")
            .arg("--detach-sign")
            .arg(payload_file.path());

        let output = self.output(&mut command)?;
        if !output.status.success() || output.stdout.is_empty() {
            return Err(MetadataError::Gpg(format!(
                "signing with {} failed: {}",
                keyid,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(hex::encode(output.stdout))
    }

    /// Check a hex encoded detached signature over `payload` made by `keyid`
    pub fn verify(&self, payload: &[u8], sig_hex: &str, keyid: &str) -> MetadataResult<bool> {
        let sig_bytes = hex::decode(sig_hex)?;
        let sig_file = write_temp(&sig_bytes)?;
        let payload_file = write_temp(payload)?;

        let mut command = self.command();
        command
            .arg("--status-fd")
            .arg("1")
            .arg("--verify")
            .arg(sig_file.path())
            .arg(payload_file.path());

        let output = self.output(&mut command)?;
        if !output.status.success() {
            tracing::debug!(
                keyid,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "gpg rejected signature"
            );
            return Ok(false);
        }

        let status = String::from_utf8_lossy(&output.stdout);
        Ok(parse_valid_signers(&status)
            .iter()
            .any(|fpr| fingerprint_matches(fpr, keyid)))
    }
}

fn write_temp(bytes: &[u8]) -> MetadataResult<NamedTempFile> {
    let mut file = NamedTempFile::new().map_err(|e| MetadataError::io(Path::new("<tempfile>"), e))?;
    let path = file.path().to_path_buf();
    file.write_all(bytes).map_err(|e| MetadataError::io(&path, e))?;
    file.flush().map_err(|e| MetadataError::io(&path, e))?;
    Ok(file)
}

/// First fingerprint that belongs to a `sec` record in `--with-colons` output
fn parse_secret_key_fingerprint(listing: &str) -> Option<String> {
    let mut in_secret_key = false;
    for line in listing.lines() {
        let mut fields = line.split(':');
        match fields.next() {
            Some("sec") => in_secret_key = true,
            Some("ssb") | Some("sub") => in_secret_key = false,
            Some("fpr") if in_secret_key => {
                let fpr = line.split(':').nth(9).filter(|f| !f.is_empty())?;
                return Some(fpr.to_ascii_lowercase());
            }
            _ => {}
        }
    }
    None
}

/// Signing-key and primary-key fingerprints from `VALIDSIG` status lines
fn parse_valid_signers(status: &str) -> Vec<String> {
    let mut signers = Vec::new();
    for line in status.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("[GNUPG:]") || fields.next() != Some("VALIDSIG") {
            continue;
        }
        let fields: Vec<&str> = fields.collect();
        if let Some(fpr) = fields.first() {
            signers.push(fpr.to_ascii_lowercase());
        }
        // Field 10 (0-based 9 after the keyword) is the primary key fingerprint
        if let Some(primary) = fields.get(9) {
            signers.push(primary.to_ascii_lowercase());
        }
    }
    signers
}

/// Long or short key ids match the tail of a fingerprint
fn fingerprint_matches(fingerprint: &str, keyid: &str) -> bool {
    let keyid = keyid.trim_start_matches("0x").to_ascii_lowercase();
    !keyid.is_empty() && fingerprint.ends_with(&keyid)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
sec:u:255:22:8465A1E2E0FB2B40:1600000000:::u:::scESC:::+:::ed25519:::0:
fpr:::::::::8288EF560ED3795F9DF2C0DB56193089B285DA58:
uid:u::::1600000000::8B5F5B9F5D4F1C2A3B4C5D6E7F8091A2B3C4D5E6::Alice <alice@example.com>::::::::::0:
ssb:u:255:18:6D4B9C8E4A3F2B10:1600000000::::::e:::+:::cv25519::
fpr:::::::::C5A0ABE6EC19D0D65F85E2C39BE9DF5131D924E9:
";

    #[test]
    fn test_parse_secret_key_fingerprint() {
        assert_eq!(
            parse_secret_key_fingerprint(LISTING).as_deref(),
            Some("8288ef560ed3795f9df2c0db56193089b285da58")
        );
    }

    #[test]
    fn test_parse_secret_key_fingerprint_empty() {
        assert_eq!(parse_secret_key_fingerprint(""), None);
        assert_eq!(
            parse_secret_key_fingerprint("fpr:::::::::ABCDEF:\n"),
            None,
            "fingerprints outside a sec record are ignored"
        );
    }

    #[test]
    fn test_parse_valid_signers() {
        let status = "\
[GNUPG:] NEWSIG
[GNUPG:] GOODSIG 56193089B285DA58 Alice <alice@example.com>
[GNUPG:] VALIDSIG 8288EF560ED3795F9DF2C0DB56193089B285DA58 2024-01-01 1704067200 0 4 0 22 8 00 8288EF560ED3795F9DF2C0DB56193089B285DA58
[GNUPG:] TRUST_ULTIMATE 0 pgp
";
        let signers = parse_valid_signers(status);
        assert_eq!(signers.len(), 2);
        assert_eq!(signers[0], "8288ef560ed3795f9df2c0db56193089b285da58");
    }

    #[test]
    fn test_fingerprint_matches() {
        let fpr = "8288ef560ed3795f9df2c0db56193089b285da58";
        assert!(fingerprint_matches(fpr, fpr));
        assert!(fingerprint_matches(fpr, "56193089B285DA58"));
        assert!(fingerprint_matches(fpr, "0x56193089B285DA58"));
        assert!(!fingerprint_matches(fpr, "deadbeef"));
        assert!(!fingerprint_matches(fpr, ""));
    }

    #[test]
    fn test_missing_program_is_gpg_error() {
        let client = GpgClient::new().with_program("steplink-no-such-gpg-binary");
        let err = client.resolve_keyid(None).unwrap_err();
        assert!(matches!(err, MetadataError::Gpg(_)));
    }
}

//! Link payload: the unsigned evidence for one supply-chain step.
//!
//! A link binds the artifacts a step consumed (materials) to the artifacts
//! it left behind (products), together with the command that ran, its
//! captured output and a coarse description of the environment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `_type` value of every link payload
pub const LINK_TYPE: &str = "link";

/// Number of keyid characters used in link file names
pub const SHORT_KEYID_LEN: usize = 8;

/// Algorithm name -> lowercase hex digest of an artifact's content
pub type HashRecord = BTreeMap<String, String>;

/// Artifact path -> hash record
pub type ArtifactSet = BTreeMap<String, HashRecord>;

/// Environment variables copied into [`Environment::variables`] when set.
///
/// Only locale and reproducibility knobs; anything else may hold secrets.
pub const ENV_VARIABLE_ALLOWLIST: &[&str] = &["LANG", "LC_ALL", "TZ", "SOURCE_DATE_EPOCH"];

/// Captured process output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Byproducts {
    #[serde(default)]
    pub stdout: String,

    #[serde(default)]
    pub stderr: String,

    /// Exit code, absent when no process ran or it was killed by a signal
    #[serde(
        rename = "return-value",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub return_value: Option<i32>,
}

/// Advisory description of where a step ran
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Working directory at recording time
    pub workdir: String,

    /// `<os>-<arch>` of the recording host
    pub platform: String,

    /// Allowlisted environment variables that were set
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl Environment {
    /// Build an environment record from an explicit working directory and
    /// a snapshot of environment variables.
    pub fn new<I, K, V>(workdir: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let variables = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| ENV_VARIABLE_ALLOWLIST.contains(&k.as_str()))
            .collect();

        Self {
            workdir: workdir.into(),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            variables,
        }
    }
}

/// Unsigned link payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(rename = "_type")]
    pub link_type: String,

    /// Step name
    pub name: String,

    /// Literal argument vector that was executed (empty if none)
    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub materials: ArtifactSet,

    #[serde(default)]
    pub products: ArtifactSet,

    #[serde(default)]
    pub byproducts: Byproducts,

    #[serde(default)]
    pub environment: Environment,
}

impl Link {
    /// Create an empty link for a step
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            link_type: LINK_TYPE.to_string(),
            name: name.into(),
            command: Vec::new(),
            materials: ArtifactSet::new(),
            products: ArtifactSet::new(),
            byproducts: Byproducts::default(),
            environment: Environment::default(),
        }
    }

    pub fn with_materials(mut self, materials: ArtifactSet) -> Self {
        self.materials = materials;
        self
    }

    pub fn with_products(mut self, products: ArtifactSet) -> Self {
        self.products = products;
        self
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn with_byproducts(mut self, byproducts: Byproducts) -> Self {
        self.byproducts = byproducts;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }
}

/// First [`SHORT_KEYID_LEN`] characters of a keyid
pub fn short_keyid(keyid: &str) -> &str {
    match keyid.char_indices().nth(SHORT_KEYID_LEN) {
        Some((idx, _)) => &keyid[..idx],
        None => keyid,
    }
}

/// File name of a finished link: `<step>.<keyid[:8]>.link`
pub fn link_filename(step_name: &str, keyid: &str) -> String {
    format!("{}.{}.link", step_name, short_keyid(keyid))
}

/// File name of an unfinished link: `.<step>.<keyid[:8]>.link-unfinished`
pub fn unfinished_link_filename(step_name: &str, keyid: &str) -> String {
    format!(".{}.{}.link-unfinished", step_name, short_keyid(keyid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filenames() {
        let keyid = "2f89b9272acfc8f4a0a0f094d789fdb0ba798b0fe41f2f5f417c12f0085ff498";
        assert_eq!(link_filename("package", keyid), "package.2f89b927.link");
        assert_eq!(
            unfinished_link_filename("package", keyid),
            ".package.2f89b927.link-unfinished"
        );
    }

    #[test]
    fn test_short_keyid_shorter_than_prefix() {
        assert_eq!(short_keyid("abc"), "abc");
        assert_eq!(short_keyid(""), "");
    }

    #[test]
    fn test_byproducts_return_value_key() {
        let byproducts = Byproducts {
            stdout: "out".to_string(),
            stderr: String::new(),
            return_value: Some(0),
        };
        let value = serde_json::to_value(&byproducts).unwrap();
        assert_eq!(value["return-value"], 0);

        let empty = serde_json::to_value(Byproducts::default()).unwrap();
        assert!(empty.get("return-value").is_none());
    }

    #[test]
    fn test_environment_allowlist() {
        let env = Environment::new(
            "/work",
            vec![("LANG", "C.UTF-8"), ("AWS_SECRET_ACCESS_KEY", "hunter2")],
        );
        assert_eq!(env.workdir, "/work");
        assert_eq!(env.variables.get("LANG").map(String::as_str), Some("C.UTF-8"));
        assert!(!env.variables.contains_key("AWS_SECRET_ACCESS_KEY"));
        assert!(env.platform.contains('-'));
    }

    #[test]
    fn test_link_type_field() {
        let link = Link::new("build");
        let value = serde_json::to_value(&link).unwrap();
        assert_eq!(value["_type"], LINK_TYPE);
        assert_eq!(value["name"], "build");
    }
}

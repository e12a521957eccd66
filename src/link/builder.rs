//! Link construction for a single step

use std::env;

use steplink_metadata::{ArtifactSet, Environment, Link};

use crate::artifact::{ArtifactRecorder, RecorderConfig};
use crate::error::{RecordError, RecordResult};
use crate::runner::{CommandRunner, StreamPolicy};

/// What a step consumes, runs and produces
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub material_roots: Vec<String>,
    pub product_roots: Vec<String>,
    pub command: Vec<String>,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_materials<S: Into<String>>(mut self, roots: impl IntoIterator<Item = S>) -> Self {
        self.material_roots = roots.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_products<S: Into<String>>(mut self, roots: impl IntoIterator<Item = S>) -> Self {
        self.product_roots = roots.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_command<S: Into<String>>(mut self, command: impl IntoIterator<Item = S>) -> Self {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }
}

/// Snapshot of the working directory, platform and allowlisted variables
pub fn capture_environment() -> RecordResult<Environment> {
    let workdir = env::current_dir().map_err(|e| RecordError::io(".", e))?;
    Ok(Environment::new(workdir.to_string_lossy(), env::vars()))
}

/// Builds unsigned link payloads
#[derive(Debug, Clone, Default)]
pub struct LinkBuilder {
    recorder: ArtifactRecorder,
    runner: CommandRunner,
}

impl LinkBuilder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            recorder: ArtifactRecorder::new(config),
            runner: CommandRunner::default(),
        }
    }

    pub fn with_stream_policy(mut self, policy: StreamPolicy) -> Self {
        self.runner = CommandRunner::new(policy);
        self
    }

    pub fn with_record_streams(self, record_streams: bool) -> Self {
        self.with_stream_policy(StreamPolicy::from_record_streams(record_streams))
    }

    pub fn recorder(&self) -> &ArtifactRecorder {
        &self.recorder
    }

    pub fn record_materials<S: AsRef<str>>(&self, roots: &[S]) -> RecordResult<ArtifactSet> {
        self.recorder.record(roots)
    }

    pub fn record_products<S: AsRef<str>>(&self, roots: &[S]) -> RecordResult<ArtifactSet> {
        self.recorder.record(roots)
    }

    /// Record materials, run the command, then record products.
    ///
    /// Products are scanned only after the command exits, so files the
    /// command removed show up as materials but not as products.
    pub fn build(&self, step: &Step) -> RecordResult<Link> {
        let environment = capture_environment()?;

        tracing::info!(step = %step.name, "recording materials");
        let materials = self.record_materials(&step.material_roots)?;

        let byproducts = self.runner.run(&step.command)?;

        tracing::info!(step = %step.name, "recording products");
        let products = self.record_products(&step.product_roots)?;

        Ok(Link::new(step.name.as_str())
            .with_materials(materials)
            .with_command(step.command.clone())
            .with_byproducts(byproducts)
            .with_products(products)
            .with_environment(environment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_step_builder() {
        let step = Step::new("package")
            .with_materials(["src"])
            .with_products(["dist"])
            .with_command(["tar", "czf", "dist/pkg.tgz", "src"]);
        assert_eq!(step.name, "package");
        assert_eq!(step.material_roots, vec!["src"]);
        assert_eq!(step.product_roots, vec!["dist"]);
        assert_eq!(step.command.len(), 4);
    }

    #[test]
    fn test_build_without_command() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("foo"), "foo").unwrap();
        let builder = LinkBuilder::new(RecorderConfig::default().with_base_path(dir.path()));

        let link = builder
            .build(&Step::new("noop").with_materials(["foo"]).with_products(["foo"]))
            .unwrap();

        assert_eq!(link.name, "noop");
        assert!(link.command.is_empty());
        assert_eq!(link.materials, link.products);
        assert_eq!(link.byproducts.return_value, None);
    }

    #[test]
    fn test_environment_workdir_is_cwd() {
        let environment = capture_environment().unwrap();
        let cwd = env::current_dir().unwrap();
        assert_eq!(environment.workdir, cwd.to_string_lossy());
        assert!(!environment.platform.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_products_recorded_after_command() {
        let dir = TempDir::new().unwrap();
        let victim = dir.path().join("victim");
        fs::write(&victim, "gone soon").unwrap();
        let builder = LinkBuilder::new(RecorderConfig::default().with_base_path(dir.path()));

        let step = Step::new("clean")
            .with_materials(["."])
            .with_products(["."])
            .with_command(["rm", victim.to_str().unwrap()]);
        let link = builder.build(&step).unwrap();

        assert!(link.materials.contains_key("victim"));
        assert!(!link.products.contains_key("victim"));
        assert_eq!(link.byproducts.return_value, Some(0));
    }

    #[test]
    fn test_spawn_failure_fails_whole_step() {
        let dir = TempDir::new().unwrap();
        let builder = LinkBuilder::new(RecorderConfig::default().with_base_path(dir.path()));
        let err = builder
            .build(&Step::new("broken").with_command(["steplink-test-no-such-program"]))
            .unwrap_err();
        assert!(matches!(err, RecordError::ProcessSpawn { .. }));
    }
}

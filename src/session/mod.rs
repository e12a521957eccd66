//! Two-phase step recording
//!
//! `start` records materials and stores a signed, unfinished link.
//! `stop` checks that the same identity signed that link, records
//! products and replaces it with the finished link.
//!
//! ```text
//! NotStarted ──start──▶ Started ──stop──▶ Finished
//!                          │
//!                          └──identity mismatch──▶ Aborted
//! ```
//!
//! A second `start` for the same step and identity overwrites the stored
//! unfinished link without warning.

use std::fmt;

use steplink_metadata::{Link, Metablock};

use crate::artifact::RecorderConfig;
use crate::error::{RecordError, RecordResult};
use crate::link::{capture_environment, sign_link, IdentityRequest, LinkBuilder, SigningIdentity};
use crate::store::LinkStore;

/// Phase of a recording session, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NotStarted,
    Started,
    Finished,
    Aborted,
}

impl SessionPhase {
    /// Check if transition from this phase to target is valid
    pub fn can_transition_to(&self, target: SessionPhase) -> bool {
        match (self, target) {
            (SessionPhase::NotStarted, SessionPhase::Started) => true,

            // Restarting replaces the unfinished link
            (SessionPhase::Started, SessionPhase::Started) => true,
            (SessionPhase::Started, SessionPhase::Finished) => true,
            (SessionPhase::Started, SessionPhase::Aborted) => true,

            // Terminal phases cannot transition
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Finished | SessionPhase::Aborted)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::NotStarted => "not started",
            SessionPhase::Started => "started",
            SessionPhase::Finished => "finished",
            SessionPhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Session state, holding the link each phase is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,

    /// Signed link with materials only
    Started(Metablock),

    /// Signed link with materials and products
    Finished(Metablock),

    /// The unfinished link was not signed by this session's identity
    Aborted,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::NotStarted => SessionPhase::NotStarted,
            SessionState::Started(_) => SessionPhase::Started,
            SessionState::Finished(_) => SessionPhase::Finished,
            SessionState::Aborted => SessionPhase::Aborted,
        }
    }
}

/// Start/stop recording of one step by one identity
pub struct RecordSession<'a> {
    step_name: String,
    identity: SigningIdentity,
    builder: LinkBuilder,
    store: &'a dyn LinkStore,
    state: SessionState,
}

impl<'a> RecordSession<'a> {
    pub fn new(
        step_name: impl Into<String>,
        identity: SigningIdentity,
        config: RecorderConfig,
        store: &'a dyn LinkStore,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            identity,
            builder: LinkBuilder::new(config),
            store,
            state: SessionState::NotStarted,
        }
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    fn check_transition(&self, target: SessionPhase) -> RecordResult<()> {
        let from = self.phase();
        if from.can_transition_to(target) {
            Ok(())
        } else {
            Err(RecordError::InvalidTransition { from, to: target })
        }
    }

    /// Record materials and store the signed, unfinished link
    pub fn start<S: AsRef<str>>(&mut self, material_roots: &[S]) -> RecordResult<Metablock> {
        self.check_transition(SessionPhase::Started)?;

        let environment = capture_environment()?;
        let materials = self.builder.record_materials(material_roots)?;
        let link = Link::new(self.step_name.as_str())
            .with_materials(materials)
            .with_environment(environment);
        let metablock = sign_link(link, Some(&self.identity))?;

        self.store.save_unfinished(&metablock, self.identity.keyid())?;
        tracing::info!(step = %self.step_name, keyid = %self.identity.keyid(), "recording started");

        self.state = SessionState::Started(metablock.clone());
        Ok(metablock)
    }

    /// Verify the unfinished link, record products and store the
    /// finished link.
    ///
    /// A session that was not started in this process picks up the
    /// unfinished link from the store.
    pub fn stop<S: AsRef<str>>(&mut self, product_roots: &[S]) -> RecordResult<Metablock> {
        if self.phase() == SessionPhase::NotStarted {
            let unfinished = self
                .store
                .load_unfinished(&self.step_name, self.identity.keyid())?;
            self.state = SessionState::Started(unfinished);
        }

        let unfinished = match &self.state {
            SessionState::Started(metablock) => metablock.clone(),
            other => {
                return Err(RecordError::InvalidTransition {
                    from: other.phase(),
                    to: SessionPhase::Finished,
                })
            }
        };

        let verified = match self.identity.verify(&unfinished) {
            Ok(verified) => verified,
            Err(err) => {
                tracing::debug!(error = %err, "unfinished link signature unreadable");
                false
            }
        };
        if !verified {
            self.state = SessionState::Aborted;
            return Err(RecordError::SignatureVerification(format!(
                "unfinished link for step {:?} is not signed by {}",
                self.step_name,
                self.identity.keyid()
            )));
        }

        let products = self.builder.record_products(product_roots)?;
        let link = unfinished.signed.with_products(products);
        let finished = sign_link(link, Some(&self.identity))?;

        let keyid = self.identity.keyid();
        self.store.save_finished(&finished, keyid)?;
        self.store.remove_unfinished(&self.step_name, keyid)?;
        tracing::info!(step = %self.step_name, %keyid, "recording finished");

        self.state = SessionState::Finished(finished.clone());
        Ok(finished)
    }
}

/// Start recording `step_name` with the requested identity
pub fn record_start<S: AsRef<str>>(
    step_name: &str,
    material_roots: &[S],
    identity: &IdentityRequest,
    config: &RecorderConfig,
    store: &dyn LinkStore,
) -> RecordResult<Metablock> {
    let identity = identity.require()?;
    let mut session = RecordSession::new(step_name, identity, config.clone(), store);
    session.start(material_roots)
}

/// Finish recording `step_name` with the requested identity
pub fn record_stop<S: AsRef<str>>(
    step_name: &str,
    product_roots: &[S],
    identity: &IdentityRequest,
    config: &RecorderConfig,
    store: &dyn LinkStore,
) -> RecordResult<Metablock> {
    let identity = identity.require()?;
    let mut session = RecordSession::new(step_name, identity, config.clone(), store);
    session.stop(product_roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLinkStore;
    use std::fs;
    use steplink_metadata::Key;
    use tempfile::TempDir;

    fn identity() -> SigningIdentity {
        SigningIdentity::from_key(Key::generate_ed25519().unwrap()).unwrap()
    }

    fn tree() -> (TempDir, RecorderConfig) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("material"), "in").unwrap();
        fs::write(dir.path().join("product"), "out").unwrap();
        let config = RecorderConfig::default().with_base_path(dir.path());
        (dir, config)
    }

    #[test]
    fn test_phase_transitions() {
        assert!(SessionPhase::NotStarted.can_transition_to(SessionPhase::Started));
        assert!(SessionPhase::Started.can_transition_to(SessionPhase::Finished));
        assert!(SessionPhase::Started.can_transition_to(SessionPhase::Aborted));
        assert!(!SessionPhase::NotStarted.can_transition_to(SessionPhase::Finished));
        assert!(!SessionPhase::Finished.can_transition_to(SessionPhase::Started));
        assert!(!SessionPhase::Aborted.can_transition_to(SessionPhase::Finished));
        assert!(SessionPhase::Aborted.is_terminal());
    }

    #[test]
    fn test_start_then_stop_in_memory() {
        let (_dir, config) = tree();
        let store = MemoryLinkStore::new();
        let identity = identity();
        let keyid = identity.keyid().to_string();
        let mut session = RecordSession::new("build", identity, config, &store);

        let started = session.start(&["material"]).unwrap();
        assert_eq!(session.phase(), SessionPhase::Started);
        assert!(started.signed.products.is_empty());
        assert!(started.signed.command.is_empty());
        assert!(store.unfinished("build", &keyid).is_some());

        let finished = session.stop(&["product"]).unwrap();
        assert_eq!(session.phase(), SessionPhase::Finished);
        assert_eq!(finished.signed.materials, started.signed.materials);
        assert!(finished.signed.products.contains_key("product"));
        assert_eq!(finished.signatures.len(), 1);
        assert!(session.identity().verify(&finished).unwrap());

        assert!(store.unfinished("build", &keyid).is_none());
        assert_eq!(store.finished("build", &keyid), Some(finished));
    }

    #[test]
    fn test_stop_loads_from_store() {
        let (_dir, config) = tree();
        let store = MemoryLinkStore::new();
        let identity = identity();

        let started = RecordSession::new("build", identity.clone(), config.clone(), &store)
            .start(&["material"])
            .unwrap();

        let mut session = RecordSession::new("build", identity, config, &store);
        let finished = session.stop(&["product"]).unwrap();
        assert_eq!(finished.signed.materials, started.signed.materials);
        assert_eq!(finished.signed.environment, started.signed.environment);
    }

    #[test]
    fn test_stop_without_start_is_io_error() {
        let (_dir, config) = tree();
        let store = MemoryLinkStore::new();
        let mut session = RecordSession::new("build", identity(), config, &store);

        let err = session.stop(&["product"]).unwrap_err();
        assert!(err.is_io());
        assert_eq!(session.phase(), SessionPhase::NotStarted);
    }

    #[test]
    fn test_identity_mismatch_aborts() {
        let (_dir, config) = tree();
        let store = MemoryLinkStore::new();
        let first = identity();
        let second = identity();

        let started = RecordSession::new("build", first, config.clone(), &store)
            .start(&["material"])
            .unwrap();
        // Present the first identity's link under the second identity's name
        store.insert_unfinished("build", second.keyid(), started.clone());

        let keyid = second.keyid().to_string();
        let mut session = RecordSession::new("build", second, config, &store);
        let err = session.stop(&["product"]).unwrap_err();

        assert!(err.is_signature_verification());
        assert_eq!(session.phase(), SessionPhase::Aborted);
        assert_eq!(store.unfinished("build", &keyid), Some(started));
        assert!(store.finished("build", &keyid).is_none());
    }

    #[test]
    fn test_terminal_session_rejects_more_work() {
        let (_dir, config) = tree();
        let store = MemoryLinkStore::new();
        let mut session = RecordSession::new("build", identity(), config, &store);

        session.start(&["material"]).unwrap();
        session.stop(&["product"]).unwrap();

        let err = session.start(&["material"]).unwrap_err();
        assert!(matches!(err, RecordError::InvalidTransition { .. }));
        let err = session.stop(&["product"]).unwrap_err();
        assert!(matches!(err, RecordError::InvalidTransition { .. }));
    }

    #[test]
    fn test_restart_overwrites_unfinished() {
        let (dir, config) = tree();
        let store = MemoryLinkStore::new();
        let identity = identity();
        let keyid = identity.keyid().to_string();
        let mut session = RecordSession::new("build", identity, config, &store);

        session.start(&["material"]).unwrap();
        fs::write(dir.path().join("material"), "changed").unwrap();
        let restarted = session.start(&["material"]).unwrap();

        assert_eq!(store.unfinished("build", &keyid), Some(restarted));
    }

    #[test]
    fn test_free_functions_require_identity() {
        let (_dir, config) = tree();
        let store = MemoryLinkStore::new();
        let request = IdentityRequest::default();

        let err = record_start("build", &["material"], &request, &config, &store).unwrap_err();
        assert!(err.is_validation());
        let err = record_stop("build", &["product"], &request, &config, &store).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_free_functions_round_trip() {
        let (_dir, config) = tree();
        let store = MemoryLinkStore::new();
        let key = Key::generate_ed25519().unwrap();
        let request = IdentityRequest::key(key.clone());

        record_start("build", &["material"], &request, &config, &store).unwrap();
        let finished = record_stop("build", &["product"], &request, &config, &store).unwrap();

        assert!(finished.verify_signature(&key).unwrap());
        assert!(store.unfinished("build", &key.keyid).is_none());
    }
}

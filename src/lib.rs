//! steplink - signed evidence for supply-chain steps
//!
//! Records which files a build step consumed (materials) and produced
//! (products), the command it ran and that command's output, and signs
//! the result as a link. Steps can be recorded in one call
//! ([`run_step`]) or around work the caller does itself
//! ([`record_start`] / [`record_stop`]).

pub mod artifact;
pub mod config;
pub mod error;
pub mod link;
pub mod runner;
pub mod session;
pub mod store;

pub use artifact::{
    apply_exclude_patterns, record_artifacts, ArtifactRecorder, HashAlgorithm, PatternFilter,
    RecorderConfig,
};
pub use config::{Settings, SettingsLoader};
pub use error::{RecordError, RecordResult};
pub use link::{run_step, sign_link, IdentityRequest, LinkBuilder, SigningIdentity, Step};
pub use runner::{CommandRunner, StreamPolicy};
pub use session::{record_start, record_stop, RecordSession, SessionPhase, SessionState};
pub use store::{FsLinkStore, LinkStore, MemoryLinkStore};

pub use steplink_metadata as metadata;

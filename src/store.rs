//! Persistence for signed links
//!
//! Records are keyed by step name and signer keyid. File names follow the
//! interoperable layout: `<step>.<keyid8>.link` for finished records and
//! `.<step>.<keyid8>.link-unfinished` for records of a started session.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use steplink_metadata::{link_filename, unfinished_link_filename, Metablock};

use crate::error::{RecordError, RecordResult};

/// Where signed links are kept
pub trait LinkStore {
    /// Write the unfinished record of a started session, replacing any
    /// previous one for the same step and signer
    fn save_unfinished(&self, metablock: &Metablock, keyid: &str) -> RecordResult<()>;

    /// Read an unfinished record; a missing record is an I/O error
    fn load_unfinished(&self, step_name: &str, keyid: &str) -> RecordResult<Metablock>;

    fn remove_unfinished(&self, step_name: &str, keyid: &str) -> RecordResult<()>;

    fn save_finished(&self, metablock: &Metablock, keyid: &str) -> RecordResult<()>;
}

/// Links stored as JSON files in a metadata directory
#[derive(Debug, Clone)]
pub struct FsLinkStore {
    dir: PathBuf,
}

impl Default for FsLinkStore {
    fn default() -> Self {
        Self::new(".")
    }
}

impl FsLinkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn finished_path(&self, step_name: &str, keyid: &str) -> PathBuf {
        self.dir.join(link_filename(step_name, keyid))
    }

    pub fn unfinished_path(&self, step_name: &str, keyid: &str) -> PathBuf {
        self.dir.join(unfinished_link_filename(step_name, keyid))
    }
}

impl LinkStore for FsLinkStore {
    fn save_unfinished(&self, metablock: &Metablock, keyid: &str) -> RecordResult<()> {
        let path = self.unfinished_path(&metablock.signed.name, keyid);
        if path.exists() {
            tracing::debug!(path = %path.display(), "replacing unfinished link");
        }
        metablock.dump(&path)?;
        Ok(())
    }

    fn load_unfinished(&self, step_name: &str, keyid: &str) -> RecordResult<Metablock> {
        Ok(Metablock::load(&self.unfinished_path(step_name, keyid))?)
    }

    fn remove_unfinished(&self, step_name: &str, keyid: &str) -> RecordResult<()> {
        let path = self.unfinished_path(step_name, keyid);
        fs::remove_file(&path).map_err(|e| RecordError::io(path, e))
    }

    fn save_finished(&self, metablock: &Metablock, keyid: &str) -> RecordResult<()> {
        let path = self.finished_path(&metablock.signed.name, keyid);
        metablock.dump(&path)?;
        tracing::info!(path = %path.display(), "wrote link");
        Ok(())
    }
}

/// Links kept in memory, keyed by the file names they would have on disk
#[derive(Debug, Default)]
pub struct MemoryLinkStore {
    unfinished: RefCell<BTreeMap<String, Metablock>>,
    finished: RefCell<BTreeMap<String, Metablock>>,
}

impl MemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unfinished(&self, step_name: &str, keyid: &str) -> Option<Metablock> {
        self.unfinished
            .borrow()
            .get(&unfinished_link_filename(step_name, keyid))
            .cloned()
    }

    pub fn finished(&self, step_name: &str, keyid: &str) -> Option<Metablock> {
        self.finished
            .borrow()
            .get(&link_filename(step_name, keyid))
            .cloned()
    }

    /// Store an unfinished record under an arbitrary signer's name
    pub fn insert_unfinished(&self, step_name: &str, keyid: &str, metablock: Metablock) {
        self.unfinished
            .borrow_mut()
            .insert(unfinished_link_filename(step_name, keyid), metablock);
    }
}

fn not_found(name: String) -> RecordError {
    RecordError::io(name, io::Error::from(io::ErrorKind::NotFound))
}

impl LinkStore for MemoryLinkStore {
    fn save_unfinished(&self, metablock: &Metablock, keyid: &str) -> RecordResult<()> {
        self.insert_unfinished(&metablock.signed.name, keyid, metablock.clone());
        Ok(())
    }

    fn load_unfinished(&self, step_name: &str, keyid: &str) -> RecordResult<Metablock> {
        self.unfinished(step_name, keyid)
            .ok_or_else(|| not_found(unfinished_link_filename(step_name, keyid)))
    }

    fn remove_unfinished(&self, step_name: &str, keyid: &str) -> RecordResult<()> {
        let name = unfinished_link_filename(step_name, keyid);
        match self.unfinished.borrow_mut().remove(&name) {
            Some(_) => Ok(()),
            None => Err(not_found(name)),
        }
    }

    fn save_finished(&self, metablock: &Metablock, keyid: &str) -> RecordResult<()> {
        self.finished
            .borrow_mut()
            .insert(link_filename(&metablock.signed.name, keyid), metablock.clone());
        Ok(())
    }
}

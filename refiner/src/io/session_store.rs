//! Durable session record (`.refiner/session.json`).
//!
//! Every mutation is a full read-modify-write of the record: the store is the
//! only place the change log and run log live, and nothing holds a copy across
//! operations. Entries are append-only.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::types::{ChangeEntry, RunEntry, Session};

/// Format used for every persisted timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time in [`TIMESTAMP_FORMAT`].
pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Persistence seam for the session record.
///
/// Implementors only provide `load` and `save`; the provided methods perform
/// one read-modify-write each.
pub trait SessionStore {
    /// Load the record. An absent or unreadable record yields defaults.
    fn load(&self) -> Result<Session>;

    /// Persist the record in full.
    fn save(&self, session: &Session) -> Result<()>;

    fn append_change(&self, entry: ChangeEntry) -> Result<()> {
        let mut session = self.load()?;
        debug!(
            file_path = %entry.file_path,
            action = %entry.action,
            "appending change entry"
        );
        session.change_log.push(entry);
        self.save(&session)
    }

    fn append_run(&self, entry: RunEntry) -> Result<()> {
        let mut session = self.load()?;
        debug!(test = entry.test.as_str(), "appending run entry");
        session.run_log.push(entry);
        self.save(&session)
    }

    fn latest_change(&self) -> Result<Option<ChangeEntry>> {
        Ok(self.load()?.change_log.pop())
    }

    fn latest_run(&self) -> Result<Option<RunEntry>> {
        Ok(self.load()?.run_log.pop())
    }

    /// Replace the cached file listing.
    fn sync_known_files(&self, files: BTreeSet<String>) -> Result<()> {
        let mut session = self.load()?;
        if session.known_files == files {
            return Ok(());
        }
        debug!(count = files.len(), "syncing known files");
        session.known_files = files;
        self.save(&session)
    }

    fn set_objective(&self, objective: &str, expected_result: &str) -> Result<()> {
        let mut session = self.load()?;
        session.objective = objective.to_string();
        session.expected_result = expected_result.to_string();
        self.save(&session)
    }

    /// Replace the record with an empty one.
    fn reset(&self) -> Result<()> {
        self.save(&Session::default())
    }
}

/// Session record stored as pretty JSON with sorted keys.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn recreate(&self) -> Session {
        let session = Session::default();
        if let Err(err) = self.save(&session) {
            warn!(
                path = %self.path.display(),
                err = %err,
                "failed to recreate session record"
            );
        }
        session
    }
}

impl SessionStore for JsonFileStore {
    fn load(&self) -> Result<Session> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "session record missing, creating defaults");
                return Ok(self.recreate());
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    err = %err,
                    "session record unreadable, recreating with defaults"
                );
                return Ok(self.recreate());
            }
        };
        match serde_json::from_str::<Session>(&contents) {
            Ok(session) => Ok(session),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    err = %err,
                    "session record unreadable, recreating with defaults"
                );
                Ok(self.recreate())
            }
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(session).context("serialize session")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    session: RefCell<Session>,
}

impl MemoryStore {
    pub fn new(session: Session) -> Self {
        Self {
            session: RefCell::new(session),
        }
    }

    pub fn snapshot(&self) -> Session {
        self.session.borrow().clone()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<Session> {
        Ok(self.session.borrow().clone())
    }

    fn save(&self, session: &Session) -> Result<()> {
        *self.session.borrow_mut() = session.clone();
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("session path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp session {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace session {}", path.display()))?;
    Ok(())
}

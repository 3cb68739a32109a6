//! JSONL persistence for the action log.
//!
//! One serialized [`Action`] per line, appended in record order. Writers
//! take an exclusive lock and readers a shared one, so a watcher can tail
//! a file an agent is still appending to.
//!
//! Timestamps are written as RFC 3339 strings. Lines whose timestamp is a
//! number of seconds since the Unix epoch (integer or fractional) load as
//! well, so histories written by other recorders replay unchanged.

use std::borrow::Cow;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, info, warn};

use super::Action;
use crate::error::{LoopGuardError, Result};

/// Handle to an append-only action history file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFile {
    path: PathBuf,
}

impl HistoryFile {
    /// Creates a handle; nothing is touched on disk until the first append.
    #[must_use]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Returns the path of the history file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checks if the history file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Appends one action as a JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, locked, or written.
    pub fn append(&self, action: &Action) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        FileExt::lock_exclusive(&file).map_err(|e| self.lock_error(&e))?;

        let json = serde_json::to_string(action)?;
        let written = writeln!(file, "{}", json);
        let _ = FileExt::unlock(&file);
        written?;

        Ok(())
    }

    /// Loads every parseable action in file order.
    ///
    /// Lines that fail to parse are skipped. A missing file yields an
    /// empty history.
    ///
    /// # Errors
    ///
    /// Returns an error only if the file exists but cannot be read.
    pub fn load(&self) -> Result<Vec<Action>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        FileExt::lock_shared(&file).map_err(|e| self.lock_error(&e))?;

        let reader = BufReader::new(&file);
        let mut actions = Vec::new();
        let mut skipped = 0usize;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Action>(&line) {
                Ok(action) => actions.push(action),
                Err(e) => {
                    skipped += 1;
                    debug!(error = %e, "Skipping malformed history line");
                }
            }
        }
        let _ = FileExt::unlock(&file);

        if skipped > 0 {
            warn!(
                path = %self.path.display(),
                skipped,
                "Skipped malformed lines while loading action history"
            );
        }

        Ok(actions)
    }

    /// Reads complete lines appended after `offset`.
    ///
    /// Returns the parsed actions and the offset to resume from. A trailing
    /// line without a newline is left for the next read. If the file shrank
    /// below `offset` (it was cleared), reading restarts from the beginning.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn read_from(&self, offset: u64) -> Result<(Vec<Action>, u64)> {
        if !self.path.exists() {
            return Ok((Vec::new(), 0));
        }

        let mut file = File::open(&self.path)?;
        FileExt::lock_shared(&file).map_err(|e| self.lock_error(&e))?;

        let len = file.metadata()?.len();
        let start = if len < offset { 0 } else { offset };
        file.seek(SeekFrom::Start(start))?;

        let mut buf = String::new();
        let read = file.read_to_string(&mut buf);
        let _ = FileExt::unlock(&file);
        read?;

        let complete = match buf.rfind('\n') {
            Some(idx) => &buf[..=idx],
            None => "",
        };

        let actions = complete
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Action>(line) {
                Ok(action) => Some(action),
                Err(e) => {
                    debug!(error = %e, "Skipping malformed history line");
                    None
                }
            })
            .collect();

        Ok((actions, start + complete.len() as u64))
    }

    /// Deletes the history file if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be deleted.
    pub fn remove(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Moves the history aside as `<stem>_<unix-seconds>.<ext>`.
    ///
    /// Falls back to deleting the file when the rename fails. Returns the
    /// archive path, or `None` if there was nothing to archive or it had to
    /// be deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if neither the rename nor the delete succeeds.
    pub fn archive(&self) -> Result<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let stem = self
            .path
            .file_stem()
            .map_or(Cow::Borrowed("action_history"), |s| s.to_string_lossy());
        let ext = self
            .path
            .extension()
            .map_or(Cow::Borrowed("jsonl"), |e| e.to_string_lossy());
        let target = self
            .path
            .with_file_name(format!("{}_{}.{}", stem, Utc::now().timestamp(), ext));

        match fs::rename(&self.path, &target) {
            Ok(()) => {
                info!(archive = %target.display(), "Archived action history");
                Ok(Some(target))
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not archive action history, deleting it"
                );
                fs::remove_file(&self.path)
                    .map_err(|e| LoopGuardError::history(self.path.clone(), e.to_string()))?;
                Ok(None)
            }
        }
    }

    fn lock_error(&self, err: &std::io::Error) -> LoopGuardError {
        LoopGuardError::HistoryLock {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }
}

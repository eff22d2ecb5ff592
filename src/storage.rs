//! Storage layer for famtask
//!
//! Manages the JSON documents backing the file collaborators.
//!
//! # Directory Structure
//!
//! ```text
//! .famtask/                     # Data directory (storage.dir)
//!   tasks.json                  # Task documents (array, camelCase)
//!   tasks.json.lock             # Lock for read-modify-write cycles
//!   approvals.json              # Approval requests (array)
//!   approvals.json.lock
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS};

/// Storage manager for famtask state
#[derive(Debug, Clone)]
pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.data_dir.join("tasks.json")
    }

    pub fn approvals_file(&self) -> PathBuf {
        self.data_dir.join("approvals.json")
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Create the data directory and empty document files.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        for path in [self.tasks_file(), self.approvals_file()] {
            if !path.exists() {
                self.write_json(&path, &Vec::<serde_json::Value>::new())?;
            }
        }
        Ok(())
    }

    /// Whether `init` has run; `famtask init` reports it.
    pub fn is_initialized(&self) -> bool {
        self.tasks_file().exists()
    }

    // =========================================================================
    // File I/O helpers
    // =========================================================================

    /// Write JSON data atomically (write to temp, then rename)
    pub fn write_json<T: Serialize>(&self, path: &Path, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        lock::write_atomic(path, json.as_bytes())
    }

    /// Read JSON data, or the default value when the file is missing or empty
    pub fn read_json_or_default<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T> {
        if !path.exists() {
            return Ok(T::default());
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(T::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Read a document while holding its lock.
    pub fn read_locked<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T> {
        let _lock = FileLock::acquire(lock_path(path), DEFAULT_LOCK_TIMEOUT_MS)?;
        self.read_json_or_default(path)
    }

    /// Locked read-modify-write of a JSON document.
    ///
    /// The document is written back only when `f` succeeds.
    pub fn update_json<T, R, F>(&self, path: &Path, f: F) -> Result<R>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> Result<R>,
    {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let _lock = FileLock::acquire(lock_path(path), DEFAULT_LOCK_TIMEOUT_MS)?;

        let mut document: T = self.read_json_or_default(path)?;
        let result = f(&mut document)?;
        self.write_json(path, &document)?;

        Ok(result)
    }
}

fn lock_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.lock", path.display()))
}

//! User-facing notices raised by the store.
//!
//! The store never surfaces raw transport errors; it publishes a small set of
//! notices instead. Sinks can collect them in memory or emit JSON lines.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::ApprovalAction;

pub const NOTICE_SCHEMA_VERSION: &str = "famtask.notice.v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoticeKind {
    /// A dependent's change was turned into an approval request.
    ApprovalPending { action: ApprovalAction },
    /// A user-initiated operation failed.
    OperationFailed { operation: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub schema_version: &'static str,
    #[serde(flatten)]
    pub kind: NoticeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notice {
    pub fn approval_pending(action: ApprovalAction, task_id: &str) -> Self {
        Self::new(
            NoticeKind::ApprovalPending { action },
            Some(task_id),
            format!("Your {action} request was sent and is pending approval"),
        )
    }

    pub fn operation_failed(operation: &str, task_id: Option<&str>) -> Self {
        Self::new(
            NoticeKind::OperationFailed {
                operation: operation.to_string(),
            },
            task_id,
            format!("Could not {operation} the task. Please try again."),
        )
    }

    fn new(kind: NoticeKind, task_id: Option<&str>, message: String) -> Self {
        Self {
            schema_version: NOTICE_SCHEMA_VERSION,
            kind,
            task_id: task_id.map(str::to_string),
            message,
            timestamp: Utc::now(),
        }
    }
}

pub trait NoticeSink: Send + Sync {
    fn publish(&self, notice: Notice);
}

/// Keeps every notice for later inspection.
#[derive(Debug, Default)]
pub struct NoticeLog {
    notices: Mutex<Vec<Notice>>,
}

impl NoticeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn take(&self) -> Vec<Notice> {
        std::mem::take(
            &mut *self
                .notices
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

impl NoticeSink for NoticeLog {
    fn publish(&self, notice: Notice) {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notice);
    }
}

#[derive(Debug, Clone)]
pub enum NoticeDestination {
    Stdout,
    File(PathBuf),
}

impl NoticeDestination {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed == "-" {
                return Some(NoticeDestination::Stdout);
            }
            Some(NoticeDestination::File(PathBuf::from(trimmed)))
        })
    }

    pub fn open(&self) -> Result<JsonlNoticeSink> {
        match self {
            NoticeDestination::Stdout => Ok(JsonlNoticeSink::stdout()),
            NoticeDestination::File(path) => JsonlNoticeSink::file(path),
        }
    }
}

/// Writes each notice as one JSON line.
pub struct JsonlNoticeSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonlNoticeSink {
    pub fn stdout() -> Self {
        Self {
            writer: Mutex::new(Box::new(std::io::stdout())),
        }
    }

    pub fn file(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Mutex::new(Box::new(file)),
        })
    }

    pub fn emit(&self, notice: &Notice) -> Result<()> {
        let serialized = serde_json::to_vec(notice)?;
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(&serialized)?;
        writer.write_all(b"\n")?;
        writer.flush().map_err(Error::Io)?;
        Ok(())
    }
}

impl NoticeSink for JsonlNoticeSink {
    fn publish(&self, notice: Notice) {
        if let Err(err) = self.emit(&notice) {
            tracing::warn!(error = %err, "failed to write notice");
        }
    }
}

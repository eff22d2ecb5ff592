//! famtask - Family Task Lifecycle Engine
//!
//! This library holds the task lifecycle logic behind the famtask CLI:
//! recurrence, reminders, privacy-based visibility and approval gating for
//! dependents, all mediated by one task store.
//!
//! # Core Concepts
//!
//! - **Families**: every task belongs to exactly one family
//! - **Roles**: admins and parents mutate directly; dependents raise approvals
//! - **Privacy**: a private task is visible to its owner only
//! - **Rollforward**: completing a recurring task moves it to its next date
//! - **Reminders**: process-local alert handles, rebuilt on every start
//!
//! # Module Organization
//!
//! - `store`: The task store, owning state and every mutation
//! - `recurrence`: Next-occurrence calculation
//! - `permissions`: Visibility and edit rules, privacy conversion
//! - `notifications`: Reminder scheduling over an alert platform
//! - `repository`: Task repository boundary (memory and file backed)
//! - `approval`: Approval request service (memory and file backed)
//! - `session`: Active user provider and CLI session resolution
//! - `model`: Tasks, patches, approval requests, users
//! - `notices`: User-facing notices
//! - `clock`: Injectable time source
//! - `config`: Configuration loading from `.famtask.toml`
//! - `storage`: JSON document storage
//! - `lock`: Per-key in-flight locks, file locks and atomic writes
//! - `cli`: Command-line interface using clap
//! - `error`: Error types and result aliases

pub mod approval;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod lock;
pub mod model;
pub mod notices;
pub mod notifications;
pub mod output;
pub mod permissions;
pub mod recurrence;
pub mod repository;
pub mod session;
pub mod storage;
pub mod store;

pub use error::{Error, Result};
pub use store::{Outcome, Skip, TaskStore, Toggle};

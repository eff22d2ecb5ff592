//! Command-line interface for famtask
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command family is implemented in its own submodule.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::approval::{ApprovalService, FileApprovalService};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::User;
use crate::notices::{Notice, NoticeDestination, NoticeLog, NoticeSink, JsonlNoticeSink};
use crate::notifications::{MemoryPlatform, NotificationService, ReminderPolicy};
use crate::output::OutputOptions;
use crate::repository::{FileTaskRepository, Subscription};
use crate::session::{resolve_user, Session, SessionArgs};
use crate::storage::Storage;
use crate::store::{Outcome, Skip, TaskStore};

mod approvals;
mod init;
mod task;

/// famtask - family task lifecycle engine
///
/// Shared family tasks with recurrence, reminders, privacy and approvals
/// for dependents' changes.
#[derive(Parser, Debug)]
#[command(name = "famtask")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data root holding .famtask.toml (defaults to current directory)
    #[arg(long, global = true, env = "FAMTASK_DIR")]
    pub dir: Option<PathBuf>,

    /// Acting user id
    #[arg(long, global = true)]
    pub uid: Option<String>,

    /// Acting user's family
    #[arg(long, global = true)]
    pub family: Option<String>,

    /// Acting user's role: admin, parent, dependent
    #[arg(long, global = true)]
    pub role: Option<String>,

    /// Display name used on approval requests
    #[arg(long, global = true)]
    pub name: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Write user notices as JSON lines to a file, or "-" for stdout
    #[arg(long, global = true)]
    pub notices: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory and a default .famtask.toml
    Init,

    /// Add a task
    Add {
        /// Task title
        title: String,

        /// Due date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<String>,

        /// Due time (HH:MM)
        #[arg(long)]
        time: Option<String>,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value = "")]
        category: String,

        /// Recurrence: none, daily, weekly, custom_weekly, monthly, yearly
        #[arg(long, default_value = "none")]
        recurrence: String,

        /// Weekdays for custom_weekly, 0 = Sunday (e.g. "1,3,5")
        #[arg(long)]
        weekdays: Option<String>,

        /// Last date of the series (YYYY-MM-DD)
        #[arg(long)]
        until: Option<String>,

        /// Only visible to you
        #[arg(long)]
        private: bool,

        /// Subtask title (repeatable)
        #[arg(long = "subtask")]
        subtasks: Vec<String>,
    },

    /// List tasks
    List {
        /// Tasks due on this date (YYYY-MM-DD or "today")
        #[arg(long)]
        date: Option<String>,

        /// Include soft-deleted tasks
        #[arg(long)]
        all: bool,
    },

    /// Show one task
    Show {
        id: String,
    },

    /// Update fields of a task
    Update {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        category: Option<String>,

        /// New due date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,

        /// New due time (HH:MM)
        #[arg(long, conflicts_with = "clear_time")]
        time: Option<String>,

        /// Remove the due time
        #[arg(long)]
        clear_time: bool,

        #[arg(long)]
        recurrence: Option<String>,

        #[arg(long)]
        weekdays: Option<String>,

        /// New series end date (YYYY-MM-DD)
        #[arg(long, conflicts_with = "clear_until")]
        until: Option<String>,

        /// Remove the series end date
        #[arg(long)]
        clear_until: bool,

        /// Make the task private (you become its owner)
        #[arg(long, conflicts_with = "public")]
        private: bool,

        /// Make the task visible to the family
        #[arg(long)]
        public: bool,
    },

    /// Complete or reopen a task
    Toggle {
        id: String,
    },

    /// Complete or reopen a subtask
    Subtask {
        task_id: String,
        subtask_id: String,
    },

    /// Skip the current occurrence of a recurring task
    Skip {
        id: String,
    },

    /// Soft-delete a task
    Delete {
        id: String,
    },

    /// Completed tasks due before a date
    History {
        /// Cutoff date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        before: Option<String>,
    },

    /// Approval requests raised by dependents
    #[command(subcommand)]
    Approvals(ApprovalCommands),

    /// Compute the next occurrence of a recurrence rule
    NextDate {
        /// Current due date (YYYY-MM-DD)
        date: String,

        /// Recurrence: none, daily, weekly, custom_weekly, monthly, yearly
        recurrence: String,

        /// Weekdays for custom_weekly, 0 = Sunday (e.g. "1,3,5")
        #[arg(long)]
        weekdays: Option<String>,
    },

    /// Rebuild every reminder and print the alert plan
    Reminders,
}

/// Approval subcommands
#[derive(Subcommand, Debug)]
pub enum ApprovalCommands {
    /// List pending requests of the family
    List,

    /// Apply a pending request and mark it approved
    Approve { id: String },

    /// Mark a pending request rejected
    Reject { id: String },
}

/// Flags shared by every command.
#[derive(Debug, Clone)]
pub(crate) struct Globals {
    pub dir: Option<PathBuf>,
    pub uid: Option<String>,
    pub family: Option<String>,
    pub role: Option<String>,
    pub name: Option<String>,
    pub notices: Option<String>,
    pub json: bool,
    pub quiet: bool,
}

impl Globals {
    pub fn output(&self) -> OutputOptions {
        OutputOptions {
            json: self.json,
            quiet: self.quiet,
        }
    }

    pub fn root(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

/// Notices go to an in-memory log (rendered as warnings) and optionally to a
/// JSON lines destination.
pub(crate) struct CliNotices {
    log: NoticeLog,
    jsonl: Option<JsonlNoticeSink>,
}

impl CliNotices {
    fn open(destination: Option<&str>) -> Result<Self> {
        let jsonl = match NoticeDestination::parse(destination) {
            Some(destination) => Some(destination.open()?),
            None => None,
        };
        Ok(Self {
            log: NoticeLog::new(),
            jsonl,
        })
    }

    pub fn take(&self) -> Vec<Notice> {
        self.log.take()
    }
}

impl NoticeSink for CliNotices {
    fn publish(&self, notice: Notice) {
        if let Some(jsonl) = &self.jsonl {
            jsonl.publish(notice.clone());
        }
        self.log.publish(notice);
    }
}

/// A store wired to the file collaborators, loaded for the acting user.
pub(crate) struct StoreContext {
    pub store: TaskStore,
    pub user: User,
    pub approvals: Arc<dyn ApprovalService>,
    pub platform: Arc<MemoryPlatform>,
    pub notices: Arc<CliNotices>,
    _subscription: Subscription,
}

impl StoreContext {
    pub fn open(globals: &Globals) -> Result<Self> {
        let root = globals.root();
        let config = Config::load_from_root(&root);
        let storage = Storage::new(config.storage.resolve(&root));
        storage.init()?;

        let user = resolve_user(
            &SessionArgs {
                uid: globals.uid.as_deref(),
                family: globals.family.as_deref(),
                role: globals.role.as_deref(),
                name: globals.name.as_deref(),
            },
            &config.session,
        )?;
        if user.family().is_none() {
            return Err(Error::NoSession(
                "no family; pass --family, set FAMTASK_FAMILY or session.family_id".to_string(),
            ));
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let platform = Arc::new(MemoryPlatform::new());
        let notifications = Arc::new(NotificationService::new(
            platform.clone(),
            clock.clone(),
            ReminderPolicy::from_config(&config.notifications)?,
        ));
        let approvals: Arc<dyn ApprovalService> =
            Arc::new(FileApprovalService::new(storage.clone(), clock.clone()));
        let notices = Arc::new(CliNotices::open(globals.notices.as_deref())?);

        let store = TaskStore::builder(
            Arc::new(FileTaskRepository::new(storage, clock.clone())),
            approvals.clone(),
            notifications,
            Arc::new(Session::signed_in(user.clone())),
        )
        .notices(notices.clone())
        .clock(clock)
        .build();

        let subscription = store
            .initialize()?
            .ok_or_else(|| Error::NoSession("could not subscribe to family tasks".to_string()))?;

        Ok(Self {
            store,
            user,
            approvals,
            platform,
            notices,
            _subscription: subscription,
        })
    }
}

/// Map a store outcome to the CLI's error model. `Ok(None)` means the
/// change is waiting for approval.
pub(crate) fn settle<T>(outcome: Outcome<T>, task_id: &str) -> Result<Option<T>> {
    match outcome {
        Outcome::Applied(value) => Ok(Some(value)),
        Outcome::PendingApproval => Ok(None),
        Outcome::Skipped(Skip::NotFound) => Err(Error::TaskNotFound(task_id.to_string())),
        Outcome::Skipped(skip @ (Skip::NoUser | Skip::NoFamily)) => {
            Err(Error::NoSession(skip.to_string()))
        }
        Outcome::Skipped(Skip::NotPermitted) => {
            Err(Error::NotPermitted(Skip::NotPermitted.to_string()))
        }
        Outcome::Skipped(skip) => Err(Error::InvalidArgument(format!("{task_id}: {skip}"))),
        Outcome::Failed(err) => Err(err),
    }
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.dispatch())
    }

    async fn dispatch(self) -> Result<()> {
        let globals = Globals {
            dir: self.dir,
            uid: self.uid,
            family: self.family,
            role: self.role,
            name: self.name,
            notices: self.notices,
            json: self.json,
            quiet: self.quiet,
        };

        match self.command {
            Commands::Init => init::run(&globals),
            Commands::Add {
                title,
                date,
                time,
                description,
                category,
                recurrence,
                weekdays,
                until,
                private,
                subtasks,
            } => {
                task::run_add(
                    &globals,
                    task::AddOptions {
                        title,
                        date,
                        time,
                        description,
                        category,
                        recurrence,
                        weekdays,
                        until,
                        private,
                        subtasks,
                    },
                )
                .await
            }
            Commands::List { date, all } => {
                task::run_list(&globals, task::ListOptions { date, all }).await
            }
            Commands::Show { id } => task::run_show(&globals, &id).await,
            Commands::Update {
                id,
                title,
                description,
                category,
                date,
                time,
                clear_time,
                recurrence,
                weekdays,
                until,
                clear_until,
                private,
                public,
            } => {
                task::run_update(
                    &globals,
                    task::UpdateOptions {
                        id,
                        title,
                        description,
                        category,
                        date,
                        time,
                        clear_time,
                        recurrence,
                        weekdays,
                        until,
                        clear_until,
                        private,
                        public,
                    },
                )
                .await
            }
            Commands::Toggle { id } => task::run_toggle(&globals, &id).await,
            Commands::Subtask {
                task_id,
                subtask_id,
            } => task::run_subtask(&globals, &task_id, &subtask_id).await,
            Commands::Skip { id } => task::run_skip(&globals, &id).await,
            Commands::Delete { id } => task::run_delete(&globals, &id).await,
            Commands::History { before } => task::run_history(&globals, before).await,
            Commands::Approvals(cmd) => match cmd {
                ApprovalCommands::List => approvals::run_list(&globals).await,
                ApprovalCommands::Approve { id } => approvals::run_approve(&globals, &id).await,
                ApprovalCommands::Reject { id } => approvals::run_reject(&globals, &id).await,
            },
            Commands::NextDate {
                date,
                recurrence,
                weekdays,
            } => task::run_next_date(&globals, &date, &recurrence, weekdays.as_deref()),
            Commands::Reminders => task::run_reminders(&globals).await,
        }
    }
}

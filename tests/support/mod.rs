#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use assert_cmd::Command;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use famtask::approval::MemoryApprovalService;
use famtask::clock::FixedClock;
use famtask::model::{NewTask, Recurrence, Role, Subtask, Task, User};
use famtask::notices::NoticeLog;
use famtask::notifications::{MemoryPlatform, NotificationService, ReminderPolicy};
use famtask::repository::{MemoryTaskRepository, Subscription};
use famtask::session::Session;
use famtask::store::TaskStore;
use tempfile::TempDir;

pub const FAMILY: &str = "fam-1";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// 2024-06-10 08:00 UTC, a Monday.
pub fn default_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).unwrap()
}

pub fn user(uid: &str, role: Role) -> User {
    User::new(uid, FAMILY, role).with_name(uid.to_uppercase())
}

pub fn new_task(title: &str, due: NaiveDate) -> NewTask {
    NewTask::new(title, due)
}

pub fn weekly(title: &str, due: NaiveDate) -> NewTask {
    NewTask {
        recurrence: Recurrence::Weekly,
        ..NewTask::new(title, due)
    }
}

pub fn with_subtasks(mut task: NewTask, titles: &[&str]) -> NewTask {
    task.subtasks = titles.iter().map(|title| Subtask::new(*title)).collect();
    task
}

/// A store over in-memory collaborators with a fixed clock.
pub struct Harness {
    pub repo: Arc<MemoryTaskRepository>,
    pub approvals: Arc<MemoryApprovalService>,
    pub platform: Arc<MemoryPlatform>,
    pub clock: Arc<FixedClock>,
    pub session: Arc<Session>,
    pub notices: Arc<NoticeLog>,
    pub store: TaskStore,
    subscription: Option<Subscription>,
}

impl Harness {
    pub fn new(user: User) -> Self {
        Self::with_platform(Some(user), MemoryPlatform::new())
    }

    pub fn signed_out() -> Self {
        Self::with_platform(None, MemoryPlatform::new())
    }

    pub fn with_platform(user: Option<User>, platform: MemoryPlatform) -> Self {
        let clock = Arc::new(FixedClock::new(default_now()));
        let repo = Arc::new(MemoryTaskRepository::with_clock(clock.clone()));
        let approvals = Arc::new(MemoryApprovalService::with_clock(clock.clone()));
        let platform = Arc::new(platform);
        let session = Arc::new(Session::new());
        if let Some(user) = user {
            session.sign_in(user);
        }
        let notices = Arc::new(NoticeLog::new());
        let notifications = Arc::new(NotificationService::new(
            platform.clone(),
            clock.clone(),
            ReminderPolicy::default(),
        ));
        let store = TaskStore::builder(
            repo.clone(),
            approvals.clone(),
            notifications,
            session.clone(),
        )
        .notices(notices.clone())
        .clock(clock.clone())
        .build();

        Self {
            repo,
            approvals,
            platform,
            clock,
            session,
            notices,
            store,
            subscription: None,
        }
    }

    /// Subscribe the store to the repository.
    pub fn start(mut self) -> Self {
        self.subscription = self.store.initialize().expect("initialize");
        assert!(self.subscription.is_some(), "store should subscribe");
        self
    }

    /// Insert a stored task directly, bypassing the store.
    pub fn seed(&self, new_task: NewTask, id: &str, owner: &str) -> Task {
        let task = NewTask {
            family_id: FAMILY.to_string(),
            created_by: owner.to_string(),
            ..new_task
        }
        .into_task(id.to_string(), default_now());
        self.repo.seed(task.clone());
        task
    }

    pub fn stored(&self, id: &str) -> Task {
        self.repo
            .all()
            .into_iter()
            .find(|task| task.id == id)
            .expect("stored task")
    }

    pub fn stop(&mut self) {
        self.subscription.take();
    }
}

/// A temporary data root for CLI tests.
pub struct TestRoot {
    dir: TempDir,
}

impl TestRoot {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_config(&self, contents: &str) -> PathBuf {
        let path = self.dir.path().join(".famtask.toml");
        fs::write(&path, contents).expect("write config");
        path
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join(".famtask")
    }

    /// `famtask --dir <root>` with session variables cleared.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("famtask").expect("binary");
        cmd.arg("--dir")
            .arg(self.dir.path())
            .env_remove("FAMTASK_DIR")
            .env_remove("FAMTASK_UID")
            .env_remove("FAMTASK_FAMILY")
            .env_remove("FAMTASK_ROLE")
            .env_remove("FAMTASK_NAME")
            .env_remove("RUST_LOG");
        cmd
    }

    /// Same as `cmd`, acting as `uid` in `fam-1` with `role`.
    pub fn as_user(&self, uid: &str, role: &str) -> Command {
        let mut cmd = self.cmd();
        cmd.args(["--uid", uid, "--family", FAMILY, "--role", role]);
        cmd
    }

    /// Run a JSON command and return its `data` payload.
    pub fn json(&self, uid: &str, role: &str, args: &[&str]) -> serde_json::Value {
        let output = self
            .as_user(uid, role)
            .arg("--json")
            .args(args)
            .output()
            .expect("run famtask");
        assert!(
            output.status.success(),
            "famtask {args:?} failed: {}",
            String::from_utf8_lossy(&output.stdout)
        );
        let value: serde_json::Value =
            serde_json::from_slice(&output.stdout).expect("json output");
        assert_eq!(value["status"], "success");
        value["data"].clone()
    }
}

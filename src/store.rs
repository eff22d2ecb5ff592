//! The task store: owned state plus every task mutation.
//!
//! Mutations share one shape: read the acting user, check preconditions,
//! route dependents into an approval request, otherwise adjust local reminders
//! and write through the repository. Task edits reach `tasks` only through the
//! snapshot the repository pushes back; reminder handles are the exception
//! since they have no remote counterpart.
//!
//! State sits behind a std `Mutex` that is never held across an `.await`.
//! Every change is republished on a `watch` channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{FixedOffset, NaiveDate};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::approval::ApprovalService;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::lock::KeyedLock;
use crate::model::{
    ApprovalAction, ApprovalRequest, NewApprovalRequest, NewTask, NotificationHandle, Subtask,
    Task, TaskPatch, User,
};
use crate::notices::{Notice, NoticeLog, NoticeSink};
use crate::notifications::NotificationService;
use crate::permissions::{
    can_user_delete_task, can_user_edit_task, convert_task_to_private, convert_task_to_public,
    filter_visible_tasks,
};
use crate::repository::{SnapshotListener, Subscription, TaskRepository};
use crate::session::UserProvider;

pub type NotificationMap = HashMap<String, Vec<NotificationHandle>>;

/// Observable store state.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    /// Visible tasks of the family, soft-deleted ones included.
    pub tasks: Vec<Task>,
    pub notification_map: NotificationMap,
    pub is_loading: bool,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            notification_map: HashMap::new(),
            is_loading: true,
        }
    }
}

/// Why a mutation did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    NoUser,
    NoFamily,
    NotFound,
    SubtaskNotFound,
    Deleted,
    Locked,
    NotRecurring,
    SeriesEnded,
    EmptyPatch,
    AlreadyCompleted,
    NotPermitted,
}

impl Skip {
    pub fn as_str(&self) -> &'static str {
        match self {
            Skip::NoUser => "no signed-in user",
            Skip::NoFamily => "user has no family",
            Skip::NotFound => "task not found",
            Skip::SubtaskNotFound => "subtask not found",
            Skip::Deleted => "task is deleted",
            Skip::Locked => "task is already being toggled",
            Skip::NotRecurring => "task does not recur",
            Skip::SeriesEnded => "recurrence has ended",
            Skip::EmptyPatch => "nothing to change",
            Skip::AlreadyCompleted => "task is already completed",
            Skip::NotPermitted => "not permitted to change this task",
        }
    }
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a completion toggle did to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Completed,
    Reopened,
    /// Recurring task moved to its next due date.
    RolledForward(NaiveDate),
    /// Only the subtask list changed.
    SubtasksUpdated,
}

/// Result of a store mutation.
#[derive(Debug)]
#[must_use]
pub enum Outcome<T = ()> {
    Applied(T),
    /// A dependent's change was turned into an approval request.
    PendingApproval,
    Skipped(Skip),
    /// The repository or approval service failed; a notice was published.
    Failed(Error),
}

impl<T> Outcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    pub fn is_pending_approval(&self) -> bool {
        matches!(self, Outcome::PendingApproval)
    }

    pub fn skipped(&self) -> Option<Skip> {
        match self {
            Outcome::Skipped(skip) => Some(*skip),
            _ => None,
        }
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Applied(value) => Outcome::Applied(f(value)),
            Outcome::PendingApproval => Outcome::PendingApproval,
            Outcome::Skipped(skip) => Outcome::Skipped(skip),
            Outcome::Failed(err) => Outcome::Failed(err),
        }
    }
}

/// Reduce a pushed family snapshot to what `user` may see, carrying over the
/// locally known reminder handles.
pub fn derive_visible_tasks(
    snapshot: &[Task],
    user: Option<&User>,
    handles: &NotificationMap,
) -> Vec<Task> {
    filter_visible_tasks(snapshot, user)
        .into_iter()
        .map(|mut task| {
            task.notification_ids = handles.get(&task.id).cloned().unwrap_or_default();
            task
        })
        .collect()
}

fn adjust_privacy(task: &Task, patch: TaskPatch, actor_uid: &str) -> TaskPatch {
    match patch.is_private {
        Some(true) if !task.is_private => convert_task_to_private(patch, actor_uid),
        Some(false) if task.is_private => convert_task_to_public(patch),
        _ => patch,
    }
}

struct Inner {
    repo: Arc<dyn TaskRepository>,
    approvals: Arc<dyn ApprovalService>,
    notifications: Arc<NotificationService>,
    users: Arc<dyn UserProvider>,
    notices: Arc<dyn NoticeSink>,
    clock: Arc<dyn Clock>,
    utc_offset: FixedOffset,
    state: Mutex<StoreSnapshot>,
    watch: watch::Sender<StoreSnapshot>,
    toggle_lock: KeyedLock,
}

pub struct TaskStoreBuilder {
    repo: Arc<dyn TaskRepository>,
    approvals: Arc<dyn ApprovalService>,
    notifications: Arc<NotificationService>,
    users: Arc<dyn UserProvider>,
    notices: Option<Arc<dyn NoticeSink>>,
    clock: Option<Arc<dyn Clock>>,
    utc_offset: Option<FixedOffset>,
}

impl TaskStoreBuilder {
    pub fn notices(mut self, notices: Arc<dyn NoticeSink>) -> Self {
        self.notices = Some(notices);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Reference timezone for "today". Defaults to the reminder policy's.
    pub fn utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = Some(offset);
        self
    }

    pub fn build(self) -> TaskStore {
        let utc_offset = self
            .utc_offset
            .unwrap_or(self.notifications.policy().utc_offset);
        let (watch, _) = watch::channel(StoreSnapshot::default());
        TaskStore {
            inner: Arc::new(Inner {
                repo: self.repo,
                approvals: self.approvals,
                notifications: self.notifications,
                users: self.users,
                notices: self.notices.unwrap_or_else(|| Arc::new(NoticeLog::new())),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                utc_offset,
                state: Mutex::new(StoreSnapshot::default()),
                watch,
                toggle_lock: KeyedLock::new(),
            }),
        }
    }
}

/// Owned task state for one family session. Cheap to clone.
#[derive(Clone)]
pub struct TaskStore {
    inner: Arc<Inner>,
}

impl TaskStore {
    pub fn builder(
        repo: Arc<dyn TaskRepository>,
        approvals: Arc<dyn ApprovalService>,
        notifications: Arc<NotificationService>,
        users: Arc<dyn UserProvider>,
    ) -> TaskStoreBuilder {
        TaskStoreBuilder {
            repo,
            approvals,
            notifications,
            users,
            notices: None,
            clock: None,
            utc_offset: None,
        }
    }

    // =========================================================================
    // State
    // =========================================================================

    pub fn state(&self) -> StoreSnapshot {
        self.lock_state().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.inner.watch.subscribe()
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.users.current_user()
    }

    /// Today's date in the reference timezone.
    pub fn today(&self) -> NaiveDate {
        self.inner.clock.today(self.inner.utc_offset)
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreSnapshot> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update_state<R>(&self, f: impl FnOnce(&mut StoreSnapshot) -> R) -> R {
        let mut state = self.lock_state();
        let result = f(&mut state);
        self.inner.watch.send_replace(state.clone());
        result
    }

    fn apply_snapshot(&self, snapshot: &[Task]) {
        let user = self.current_user();
        self.update_state(|state| {
            state.tasks = derive_visible_tasks(snapshot, user.as_ref(), &state.notification_map);
            state.is_loading = false;
        });
        debug!(tasks = snapshot.len(), "applied repository snapshot");
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Subscribe to the current user's family. Returns `None` when nobody is
    /// signed in or the user has no family. Keep the guard alive for as long
    /// as updates should flow.
    pub fn initialize(&self) -> Result<Option<Subscription>> {
        let Some(user) = self.current_user() else {
            debug!("initialize skipped: no signed-in user");
            return Ok(None);
        };
        let Some(family_id) = user.family() else {
            debug!(uid = %user.uid, "initialize skipped: user has no family");
            return Ok(None);
        };

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let listener: SnapshotListener = Arc::new(move |snapshot: Vec<Task>| {
            if let Some(inner) = weak.upgrade() {
                TaskStore { inner }.apply_snapshot(&snapshot);
            }
        });
        let subscription = self.inner.repo.subscribe(family_id, listener)?;
        info!(family_id, uid = %user.uid, "subscribed to family tasks");
        Ok(Some(subscription))
    }

    /// Cold-start rebuild of every reminder from the current task list.
    pub async fn reschedule_all(&self) -> NotificationMap {
        let tasks = self.lock_state().tasks.clone();
        let map = self
            .inner
            .notifications
            .reschedule_all_notifications(&tasks)
            .await;
        self.update_state(|state| {
            for task in state.tasks.iter_mut() {
                task.notification_ids = map.get(&task.id).cloned().unwrap_or_default();
            }
            state.notification_map = map.clone();
        });
        info!(tasks = map.len(), "rebuilt reminder map");
        map
    }

    /// Tear down session state on logout or family switch.
    pub async fn reset(&self) {
        self.inner.notifications.cancel_all().await;
        self.update_state(|state| *state = StoreSnapshot::default());
        info!("store reset");
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub async fn add_task(&self, new_task: NewTask) -> Outcome<Task> {
        let Some(user) = self.current_user() else {
            return self.skip("add", None, Skip::NoUser);
        };
        let Some(family_id) = user.family() else {
            return self.skip("add", None, Skip::NoFamily);
        };
        let new_task = NewTask {
            family_id: family_id.to_string(),
            created_by: user.uid.clone(),
            ..new_task
        };

        let mut task = match self.inner.repo.create(new_task).await {
            Ok(task) => task,
            Err(err) => return self.fail("add", None, err),
        };
        task.notification_ids = self.schedule_reminders(&task).await;
        info!(task_id = %task.id, title = %task.title, "task added");
        Outcome::Applied(task)
    }

    pub async fn update_task(&self, id: &str, patch: TaskPatch) -> Outcome {
        let (user, task) = match self.lookup(id) {
            Ok(found) => found,
            Err(skip) => return self.skip("update", Some(id), skip),
        };
        if task.is_deleted() {
            return self.skip("update", Some(id), Skip::Deleted);
        }
        if user.role.is_privileged() && !can_user_edit_task(&task, Some(&user)) {
            return self.skip("update", Some(id), Skip::NotPermitted);
        }
        let patch = adjust_privacy(&task, patch, &user.uid);
        if patch.is_empty() {
            return self.skip("update", Some(id), Skip::EmptyPatch);
        }
        if let Err(err) = patch.validate() {
            return self.fail("update", Some(id), err);
        }
        if !user.role.is_privileged() {
            return self
                .request_approval(&user, &task, ApprovalAction::Update, patch)
                .await;
        }
        self.write_update(&task, patch).await
    }

    pub async fn delete_task(&self, id: &str) -> Outcome {
        let (user, task) = match self.lookup(id) {
            Ok(found) => found,
            Err(skip) => return self.skip("delete", Some(id), skip),
        };
        if task.is_deleted() {
            return self.skip("delete", Some(id), Skip::Deleted);
        }
        if user.role.is_privileged() && !can_user_delete_task(&task, Some(&user)) {
            return self.skip("delete", Some(id), Skip::NotPermitted);
        }
        if !user.role.is_privileged() {
            return self
                .request_approval(&user, &task, ApprovalAction::Delete, TaskPatch::default())
                .await;
        }
        self.write_delete(&task).await
    }

    /// Flip completion. Completing a recurring task rolls it forward instead.
    /// A second toggle on the same id while one is in flight is ignored.
    pub async fn toggle_task(&self, id: &str) -> Outcome<Toggle> {
        let Some(_guard) = self.inner.toggle_lock.try_acquire(id) else {
            return self.skip("toggle", Some(id), Skip::Locked);
        };
        let (user, task) = match self.lookup(id) {
            Ok(found) => found,
            Err(skip) => return self.skip("toggle", Some(id), skip),
        };
        if !user.role.is_privileged() {
            let patch = TaskPatch::completed(!task.completed);
            return self
                .request_approval(&user, &task, ApprovalAction::Update, patch)
                .await;
        }
        if task.is_deleted() {
            return self.skip("toggle", Some(id), Skip::Deleted);
        }
        self.write_toggle(&task, None).await
    }

    /// Flip one subtask. Completing the last open subtask of an open task
    /// completes the task itself.
    pub async fn toggle_subtask(&self, task_id: &str, subtask_id: &str) -> Outcome<Toggle> {
        let Some(_guard) = self.inner.toggle_lock.try_acquire(task_id) else {
            return self.skip("toggle subtask", Some(task_id), Skip::Locked);
        };
        let (user, task) = match self.lookup(task_id) {
            Ok(found) => found,
            Err(skip) => return self.skip("toggle subtask", Some(task_id), skip),
        };
        if task.is_deleted() {
            return self.skip("toggle subtask", Some(task_id), Skip::Deleted);
        }
        let Some(position) = task.subtasks.iter().position(|s| s.id == subtask_id) else {
            return self.skip("toggle subtask", Some(task_id), Skip::SubtaskNotFound);
        };

        let mut subtasks = task.subtasks.clone();
        subtasks[position].completed = !subtasks[position].completed;

        if !user.role.is_privileged() {
            return self
                .request_approval(
                    &user,
                    &task,
                    ApprovalAction::Update,
                    TaskPatch::subtasks(subtasks),
                )
                .await;
        }

        if !task.completed && subtasks.iter().all(|subtask| subtask.completed) {
            return self.write_toggle(&task, Some(subtasks)).await;
        }

        match self
            .inner
            .repo
            .update(task_id, &TaskPatch::subtasks(subtasks))
            .await
        {
            Ok(()) => Outcome::Applied(Toggle::SubtasksUpdated),
            Err(err) => self.fail("toggle subtask", Some(task_id), err),
        }
    }

    /// Abandon the current occurrence of a recurring task.
    pub async fn skip_task(&self, id: &str) -> Outcome<NaiveDate> {
        let (user, task) = match self.lookup(id) {
            Ok(found) => found,
            Err(skip) => return self.skip("skip", Some(id), skip),
        };
        if task.is_deleted() {
            return self.skip("skip", Some(id), Skip::Deleted);
        }
        if !task.is_recurring() {
            return self.skip("skip", Some(id), Skip::NotRecurring);
        }
        let Some(patch) = task.rollforward() else {
            return self.skip("skip", Some(id), Skip::SeriesEnded);
        };
        if !user.role.is_privileged() {
            return self
                .request_approval(&user, &task, ApprovalAction::Update, patch)
                .await;
        }
        self.write_rollforward("skip", &task, patch).await
    }

    /// Apply an approved request through the same paths a privileged user
    /// takes. The request's patch already carries its privacy adjustment.
    /// Edits and deletes also need the approver to hold edit or delete rights
    /// on the task; completion flips do not.
    pub async fn apply_approval(&self, request: &ApprovalRequest) -> Outcome {
        const OPERATION: &str = "apply approval";
        let (user, task) = match self.lookup(&request.task_id) {
            Ok(found) => found,
            Err(skip) => return self.skip(OPERATION, Some(&request.task_id), skip),
        };
        if !user.role.is_privileged() {
            return self.skip(OPERATION, Some(&task.id), Skip::NotPermitted);
        }
        if task.is_deleted() {
            return self.skip(OPERATION, Some(&task.id), Skip::Deleted);
        }
        info!(approval_id = %request.id, task_id = %task.id, action = %request.action, "applying approval");

        match request.action {
            ApprovalAction::Delete => {
                if !can_user_delete_task(&task, Some(&user)) {
                    return self.skip(OPERATION, Some(&task.id), Skip::NotPermitted);
                }
                self.write_delete(&task).await
            }
            ApprovalAction::Complete => {
                if task.completed {
                    return self.skip(OPERATION, Some(&task.id), Skip::AlreadyCompleted);
                }
                self.toggle_locked(&task).await.map(|_| ())
            }
            ApprovalAction::Update => {
                if request.data.is_empty() {
                    return self.skip(OPERATION, Some(&task.id), Skip::EmptyPatch);
                }
                if let Err(err) = request.data.validate() {
                    return self.fail(OPERATION, Some(&task.id), err);
                }
                // A requested completion flip keeps rollforward semantics.
                if request.data == TaskPatch::completed(!task.completed) {
                    return self.toggle_locked(&task).await.map(|_| ());
                }
                if !can_user_edit_task(&task, Some(&user)) {
                    return self.skip(OPERATION, Some(&task.id), Skip::NotPermitted);
                }
                self.write_update(&task, request.data.clone()).await
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Visible tasks that are not soft-deleted.
    pub fn get_tasks(&self) -> Vec<Task> {
        self.lock_state()
            .tasks
            .iter()
            .filter(|task| !task.is_deleted())
            .cloned()
            .collect()
    }

    pub fn get_task_by_id(&self, id: &str) -> Option<Task> {
        self.lock_state()
            .tasks
            .iter()
            .find(|task| task.id == id)
            .cloned()
    }

    /// Tasks due on `date`. For today this also includes the open backlog
    /// from earlier days.
    pub fn get_tasks_by_date(&self, date: NaiveDate) -> Vec<Task> {
        let today = self.today();
        self.lock_state()
            .tasks
            .iter()
            .filter(|task| {
                task.due_date == date
                    || (date == today
                        && task.due_date < today
                        && !task.completed
                        && !task.is_deleted())
            })
            .cloned()
            .collect()
    }

    /// Completed tasks of the family due before `before`, as the current user
    /// may see them.
    pub async fn old_completed_tasks(&self, before: NaiveDate) -> Result<Vec<Task>> {
        let Some(family_id) = self
            .current_user()
            .and_then(|user| user.family().map(str::to_string))
        else {
            return Ok(Vec::new());
        };
        let tasks = self
            .inner
            .repo
            .get_old_completed_tasks(&family_id, before)
            .await?;
        let user = self.current_user();
        Ok(filter_visible_tasks(&tasks, user.as_ref()))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn lookup(&self, id: &str) -> std::result::Result<(User, Task), Skip> {
        let user = self.current_user().ok_or(Skip::NoUser)?;
        let task = self.get_task_by_id(id).ok_or(Skip::NotFound)?;
        Ok((user, task))
    }

    async fn write_update(&self, task: &Task, patch: TaskPatch) -> Outcome {
        if patch.touches_schedule() {
            self.cancel_reminders(&task.id).await;
            let would_be = task.patched(&patch);
            if !would_be.completed {
                self.schedule_reminders(&would_be).await;
            }
        }
        match self.inner.repo.update(&task.id, &patch).await {
            Ok(()) => {
                info!(task_id = %task.id, "task updated");
                Outcome::Applied(())
            }
            Err(err) => self.fail("update", Some(&task.id), err),
        }
    }

    async fn write_delete(&self, task: &Task) -> Outcome {
        self.cancel_reminders(&task.id).await;
        match self.inner.repo.delete(&task.id).await {
            Ok(()) => {
                info!(task_id = %task.id, "task deleted");
                Outcome::Applied(())
            }
            Err(err) => self.fail("delete", Some(&task.id), err),
        }
    }

    async fn toggle_locked(&self, task: &Task) -> Outcome<Toggle> {
        let Some(_guard) = self.inner.toggle_lock.try_acquire(&task.id) else {
            return self.skip("toggle", Some(&task.id), Skip::Locked);
        };
        self.write_toggle(task, None).await
    }

    /// Completion logic shared by task and subtask toggles. `subtasks`, when
    /// given, replaces the task's list in the same write.
    async fn write_toggle(
        &self,
        task: &Task,
        subtasks: Option<Vec<Subtask>>,
    ) -> Outcome<Toggle> {
        let mut base = task.clone();
        if let Some(subtasks) = &subtasks {
            base.subtasks = subtasks.clone();
        }
        let completing = !base.completed;

        if completing {
            if let Some(patch) = base.rollforward() {
                return self
                    .write_rollforward("toggle", &base, patch)
                    .await
                    .map(Toggle::RolledForward);
            }
        }

        self.cancel_reminders(&task.id).await;
        let patch = TaskPatch {
            subtasks,
            ..TaskPatch::completed(completing)
        };
        if let Err(err) = self.inner.repo.update(&task.id, &patch).await {
            return self.fail("toggle", Some(&task.id), err);
        }

        if completing {
            info!(task_id = %task.id, "task completed");
            Outcome::Applied(Toggle::Completed)
        } else {
            self.schedule_reminders(&base.patched(&patch)).await;
            info!(task_id = %task.id, "task reopened");
            Outcome::Applied(Toggle::Reopened)
        }
    }

    async fn write_rollforward(
        &self,
        operation: &str,
        task: &Task,
        patch: TaskPatch,
    ) -> Outcome<NaiveDate> {
        let next = patch.due_date.unwrap_or(task.due_date);
        self.cancel_reminders(&task.id).await;
        if let Err(err) = self.inner.repo.update(&task.id, &patch).await {
            return self.fail(operation, Some(&task.id), err);
        }
        self.schedule_reminders(&task.patched(&patch)).await;
        info!(task_id = %task.id, from = %task.due_date, to = %next, "rolled task forward");
        Outcome::Applied(next)
    }

    async fn request_approval<T>(
        &self,
        user: &User,
        task: &Task,
        action: ApprovalAction,
        data: TaskPatch,
    ) -> Outcome<T> {
        let request = NewApprovalRequest {
            family_id: task.family_id.clone(),
            task_id: task.id.clone(),
            requested_by: user.uid.clone(),
            user_name: user.display_name().to_string(),
            action,
            data,
        };
        match self.inner.approvals.create_approval_request(request).await {
            Ok(created) => {
                info!(approval_id = %created.id, task_id = %task.id, %action, "approval requested");
                self.inner
                    .notices
                    .publish(Notice::approval_pending(action, &task.id));
                Outcome::PendingApproval
            }
            Err(err) => self.fail(action.as_str(), Some(&task.id), err),
        }
    }

    /// Drop the task's handle entry and cancel its reminders.
    async fn cancel_reminders(&self, task_id: &str) {
        let handles = self.update_state(|state| {
            if let Some(task) = state.tasks.iter_mut().find(|task| task.id == task_id) {
                task.notification_ids.clear();
            }
            state.notification_map.remove(task_id).unwrap_or_default()
        });
        if handles.is_empty() {
            return;
        }
        self.inner
            .notifications
            .cancel_task_notifications(Some(&handles))
            .await;
    }

    async fn schedule_reminders(&self, task: &Task) -> Vec<NotificationHandle> {
        let handles = self
            .inner
            .notifications
            .schedule_task_notifications(task)
            .await;
        self.update_state(|state| {
            if let Some(stored) = state.tasks.iter_mut().find(|stored| stored.id == task.id) {
                stored.notification_ids = handles.clone();
            }
            if handles.is_empty() {
                state.notification_map.remove(&task.id);
            } else {
                state
                    .notification_map
                    .insert(task.id.clone(), handles.clone());
            }
        });
        handles
    }

    fn skip<T>(&self, operation: &str, task_id: Option<&str>, reason: Skip) -> Outcome<T> {
        debug!(operation, task_id = ?task_id, %reason, "operation skipped");
        Outcome::Skipped(reason)
    }

    fn fail<T>(&self, operation: &str, task_id: Option<&str>, err: Error) -> Outcome<T> {
        error!(operation, task_id = ?task_id, error = %err, "task operation failed");
        self.inner
            .notices
            .publish(Notice::operation_failed(operation, task_id));
        Outcome::Failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use chrono::Utc;

    fn task(id: &str, owner: &str, private: bool) -> Task {
        let mut new_task = NewTask::new(id, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        new_task.family_id = "fam".to_string();
        new_task.created_by = owner.to_string();
        new_task.is_private = private;
        new_task.into_task(id.to_string(), Utc::now())
    }

    #[test]
    fn reducer_filters_and_merges_handles() {
        let snapshot = vec![
            task("public", "u2", false),
            task("mine", "u1", true),
            task("theirs", "u2", true),
        ];
        let mut handles = NotificationMap::new();
        handles.insert("mine".to_string(), vec![NotificationHandle::new("h1")]);

        let user = User::new("u1", "fam", Role::Parent);
        let visible = derive_visible_tasks(&snapshot, Some(&user), &handles);

        let ids: Vec<_> = visible.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids, vec!["public", "mine"]);
        assert!(visible[0].notification_ids.is_empty());
        assert_eq!(visible[1].notification_ids, vec![NotificationHandle::new("h1")]);
    }

    #[test]
    fn reducer_without_user_is_empty() {
        let snapshot = vec![task("public", "u2", false)];
        assert!(derive_visible_tasks(&snapshot, None, &NotificationMap::new()).is_empty());
    }

    #[test]
    fn privacy_flip_transfers_ownership_only_when_changing() {
        let public = task("t", "u2", false);
        let patch = TaskPatch {
            is_private: Some(true),
            ..TaskPatch::default()
        };
        let adjusted = adjust_privacy(&public, patch.clone(), "u1");
        assert_eq!(adjusted.created_by.as_deref(), Some("u1"));

        let already_private = task("t", "u2", true);
        assert_eq!(adjust_privacy(&already_private, patch, "u1").created_by, None);

        let to_public = TaskPatch {
            is_private: Some(false),
            ..TaskPatch::default()
        };
        let adjusted = adjust_privacy(&already_private, to_public, "u1");
        assert_eq!(adjusted.is_private, Some(false));
        assert_eq!(adjusted.created_by, None);
    }

    #[test]
    fn outcome_helpers() {
        let applied: Outcome<u8> = Outcome::Applied(3);
        assert!(applied.is_applied());
        assert_eq!(applied.map(|value| value * 2).applied(), Some(6));

        let skipped: Outcome = Outcome::Skipped(Skip::Locked);
        assert_eq!(skipped.skipped(), Some(Skip::Locked));
        assert!(!skipped.is_pending_approval());
        assert_eq!(Skip::Locked.to_string(), "task is already being toggled");
    }
}

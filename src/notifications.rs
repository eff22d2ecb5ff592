//! Local reminder scheduling tied to tasks.
//!
//! `NotificationService` turns a task into up to one reminder per configured
//! offset (due time, 1 hour before, 12 hours before by default) and hands them
//! to a `NotificationPlatform`. Handles are process-local: after a restart the
//! only trustworthy map is the one returned by `reschedule_all_notifications`.
//!
//! Scheduling is best effort. Failures are logged per reminder and never
//! propagate to the caller.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::NotificationsConfig;
use crate::error::{Error, Result};
use crate::model::{NotificationHandle, Task};

/// One alert to deliver at `fire_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reminder {
    pub task_id: String,
    pub title: String,
    pub body: String,
    pub fire_at: DateTime<Utc>,
}

/// Device-level alert scheduling.
#[async_trait]
pub trait NotificationPlatform: Send + Sync {
    /// `false` on runtimes without local alerts (e.g. web).
    fn supports_local_scheduling(&self) -> bool {
        true
    }

    async fn schedule(&self, reminder: Reminder) -> Result<NotificationHandle>;

    /// Unknown or already delivered handles are not an error.
    async fn cancel(&self, handle: &NotificationHandle) -> Result<()>;

    async fn cancel_all(&self) -> Result<()>;
}

/// When reminders fire relative to a task's due instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderPolicy {
    pub default_time: NaiveTime,
    pub offsets: Vec<Duration>,
    pub utc_offset: FixedOffset,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            default_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            offsets: vec![Duration::zero(), Duration::hours(1), Duration::hours(12)],
            utc_offset: Utc.fix(),
        }
    }
}

impl ReminderPolicy {
    pub fn from_config(config: &NotificationsConfig) -> Result<Self> {
        Ok(Self {
            default_time: config.default_time()?,
            offsets: config.reminder_offsets(),
            utc_offset: config.offset()?,
        })
    }

    /// The task's due instant in UTC.
    pub fn due_instant(&self, task: &Task) -> DateTime<Utc> {
        let local = task.due_at(self.default_time);
        self.utc_offset
            .from_local_datetime(&local)
            .single()
            .map(|due| due.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&local))
    }
}

pub struct NotificationService {
    platform: Arc<dyn NotificationPlatform>,
    clock: Arc<dyn Clock>,
    policy: ReminderPolicy,
}

impl NotificationService {
    pub fn new(
        platform: Arc<dyn NotificationPlatform>,
        clock: Arc<dyn Clock>,
        policy: ReminderPolicy,
    ) -> Self {
        Self {
            platform,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &ReminderPolicy {
        &self.policy
    }

    /// Soft-deleted tasks and finished one-off tasks get no reminders.
    /// Completed recurring tasks still do: their next occurrence is live.
    pub fn is_eligible(task: &Task) -> bool {
        if task.is_deleted() {
            return false;
        }
        !(task.completed && !task.is_recurring())
    }

    /// Reminders that would be scheduled for `task` right now. Triggers at or
    /// before the current instant are dropped.
    pub fn reminders_for(&self, task: &Task) -> Vec<Reminder> {
        if !Self::is_eligible(task) {
            return Vec::new();
        }
        let now = self.clock.now();
        let due = self.policy.due_instant(task);
        self.policy
            .offsets
            .iter()
            .filter_map(|offset| {
                let fire_at = due - *offset;
                if fire_at <= now {
                    return None;
                }
                Some(Reminder {
                    task_id: task.id.clone(),
                    title: reminder_title(*offset),
                    body: task.title.clone(),
                    fire_at,
                })
            })
            .collect()
    }

    pub async fn schedule_task_notifications(&self, task: &Task) -> Vec<NotificationHandle> {
        if !Self::is_eligible(task) || !self.platform.supports_local_scheduling() {
            return Vec::new();
        }

        let mut handles = Vec::new();
        for reminder in self.reminders_for(task) {
            let fire_at = reminder.fire_at;
            match self.platform.schedule(reminder).await {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    warn!(task_id = %task.id, %fire_at, error = %err, "failed to schedule reminder");
                }
            }
        }
        debug!(task_id = %task.id, scheduled = handles.len(), "scheduled reminders");
        handles
    }

    pub async fn cancel_task_notifications(&self, handles: Option<&[NotificationHandle]>) {
        let Some(handles) = handles else {
            return;
        };
        for handle in handles {
            if let Err(err) = self.platform.cancel(handle).await {
                warn!(%handle, error = %err, "failed to cancel reminder");
            }
        }
    }

    pub async fn cancel_all(&self) {
        if let Err(err) = self.platform.cancel_all().await {
            warn!(error = %err, "failed to cancel all reminders");
        }
    }

    /// Reset every alert and rebuild the handle map for `tasks`.
    ///
    /// Only tasks that received at least one handle appear in the map.
    pub async fn reschedule_all_notifications(
        &self,
        tasks: &[Task],
    ) -> HashMap<String, Vec<NotificationHandle>> {
        self.cancel_all().await;

        let mut map = HashMap::new();
        for task in tasks.iter().filter(|task| Self::is_eligible(task)) {
            let handles = self.schedule_task_notifications(task).await;
            if !handles.is_empty() {
                map.insert(task.id.clone(), handles);
            }
        }
        debug!(tasks = map.len(), "rescheduled all reminders");
        map
    }
}

fn reminder_title(offset: Duration) -> String {
    let minutes = offset.num_minutes();
    if minutes <= 0 {
        return "Task due now".to_string();
    }
    if minutes % 60 == 0 {
        let hours = minutes / 60;
        let unit = if hours == 1 { "hour" } else { "hours" };
        return format!("Task due in {hours} {unit}");
    }
    format!("Task due in {minutes} minutes")
}

/// In-process platform that keeps reminders in a map.
#[derive(Debug)]
pub struct MemoryPlatform {
    supported: bool,
    pending: Mutex<BTreeMap<NotificationHandle, Reminder>>,
    failing_tasks: Mutex<HashSet<String>>,
    cancel_all_calls: AtomicUsize,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self {
            supported: true,
            pending: Mutex::new(BTreeMap::new()),
            failing_tasks: Mutex::new(HashSet::new()),
            cancel_all_calls: AtomicUsize::new(0),
        }
    }

    /// A runtime without local alerts.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Make every `schedule` call for `task_id` fail.
    pub fn fail_for_task(&self, task_id: &str) {
        lock(&self.failing_tasks).insert(task_id.to_string());
    }

    /// Pending reminders ordered by fire time.
    pub fn pending(&self) -> Vec<Reminder> {
        let mut reminders: Vec<Reminder> = lock(&self.pending).values().cloned().collect();
        reminders.sort_by(|left, right| {
            left.fire_at
                .cmp(&right.fire_at)
                .then_with(|| left.task_id.cmp(&right.task_id))
        });
        reminders
    }

    pub fn pending_for(&self, task_id: &str) -> Vec<Reminder> {
        self.pending()
            .into_iter()
            .filter(|reminder| reminder.task_id == task_id)
            .collect()
    }

    pub fn is_scheduled(&self, handle: &NotificationHandle) -> bool {
        lock(&self.pending).contains_key(handle)
    }

    pub fn cancel_all_calls(&self) -> usize {
        self.cancel_all_calls.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl NotificationPlatform for MemoryPlatform {
    fn supports_local_scheduling(&self) -> bool {
        self.supported
    }

    async fn schedule(&self, reminder: Reminder) -> Result<NotificationHandle> {
        if lock(&self.failing_tasks).contains(&reminder.task_id) {
            return Err(Error::Scheduler(format!(
                "platform rejected reminder for {}",
                reminder.task_id
            )));
        }
        let handle = NotificationHandle::new(Uuid::new_v4().to_string());
        lock(&self.pending).insert(handle.clone(), reminder);
        Ok(handle)
    }

    async fn cancel(&self, handle: &NotificationHandle) -> Result<()> {
        lock(&self.pending).remove(handle);
        Ok(())
    }

    async fn cancel_all(&self) -> Result<()> {
        self.cancel_all_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.pending).clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::{NewTask, Recurrence};
    use chrono::NaiveDate;

    fn task(id: &str, due: (i32, u32, u32), time: Option<(u32, u32)>) -> Task {
        let mut new_task = NewTask::new(
            format!("Task {id}"),
            NaiveDate::from_ymd_opt(due.0, due.1, due.2).unwrap(),
        );
        new_task.family_id = "fam".to_string();
        new_task.created_by = "u1".to_string();
        new_task.due_time = time.and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0));
        new_task.into_task(id.to_string(), Utc::now())
    }

    fn service_at(
        now: DateTime<Utc>,
        platform: Arc<MemoryPlatform>,
        policy: ReminderPolicy,
    ) -> NotificationService {
        NotificationService::new(platform, Arc::new(FixedClock::new(now)), policy)
    }

    #[tokio::test]
    async fn schedules_three_reminders_before_due() {
        let platform = Arc::new(MemoryPlatform::new());
        let service = service_at(
            Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap(),
            Arc::clone(&platform),
            ReminderPolicy::default(),
        );
        let t = task("t1", (2024, 6, 10), Some((18, 0)));

        let handles = service.schedule_task_notifications(&t).await;
        assert_eq!(handles.len(), 3);

        let fire_times: Vec<_> = platform.pending().iter().map(|r| r.fire_at).collect();
        assert_eq!(
            fire_times,
            vec![
                Utc.with_ymd_and_hms(2024, 6, 10, 6, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 6, 10, 17, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 6, 10, 18, 0, 0).unwrap(),
            ]
        );
        assert_eq!(platform.pending()[1].title, "Task due in 1 hour");
        assert_eq!(platform.pending()[2].body, "Task t1");
    }

    #[tokio::test]
    async fn past_triggers_are_skipped() {
        let platform = Arc::new(MemoryPlatform::new());
        // 17:00 exactly: the 1-hour reminder is "at now" and must be skipped.
        let service = service_at(
            Utc.with_ymd_and_hms(2024, 6, 10, 17, 0, 0).unwrap(),
            Arc::clone(&platform),
            ReminderPolicy::default(),
        );
        let t = task("t1", (2024, 6, 10), Some((18, 0)));

        let handles = service.schedule_task_notifications(&t).await;
        assert_eq!(handles.len(), 1);
        assert!(platform
            .pending()
            .iter()
            .all(|r| r.fire_at > Utc.with_ymd_and_hms(2024, 6, 10, 17, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn default_time_and_reference_offset_apply() {
        let platform = Arc::new(MemoryPlatform::new());
        let policy = ReminderPolicy {
            offsets: vec![Duration::zero()],
            utc_offset: FixedOffset::west_opt(3 * 3600).unwrap(),
            ..ReminderPolicy::default()
        };
        let service = service_at(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            Arc::clone(&platform),
            policy,
        );
        let t = task("t1", (2024, 6, 10), None);

        service.schedule_task_notifications(&t).await;
        // 09:00 at -03:00 is 12:00 UTC.
        assert_eq!(
            platform.pending()[0].fire_at,
            Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn ineligible_tasks_get_nothing() {
        let platform = Arc::new(MemoryPlatform::new());
        let service = service_at(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            Arc::clone(&platform),
            ReminderPolicy::default(),
        );

        let mut deleted = task("t1", (2024, 6, 10), None);
        deleted.deleted_at = Some(Utc::now());
        let mut done = task("t2", (2024, 6, 10), None);
        done.completed = true;
        let mut done_recurring = task("t3", (2024, 6, 10), None);
        done_recurring.completed = true;
        done_recurring.recurrence = Recurrence::Daily;

        assert!(service.schedule_task_notifications(&deleted).await.is_empty());
        assert!(service.schedule_task_notifications(&done).await.is_empty());
        assert_eq!(service.schedule_task_notifications(&done_recurring).await.len(), 3);
        assert!(platform.pending_for("t1").is_empty());
        assert!(platform.pending_for("t2").is_empty());
    }

    #[tokio::test]
    async fn unsupported_platform_schedules_nothing() {
        let platform = Arc::new(MemoryPlatform::unsupported());
        let service = service_at(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            Arc::clone(&platform),
            ReminderPolicy::default(),
        );
        let handles = service
            .schedule_task_notifications(&task("t1", (2024, 6, 10), None))
            .await;
        assert!(handles.is_empty());
        assert!(platform.pending().is_empty());
    }

    #[tokio::test]
    async fn cancel_tolerates_unknown_and_missing_handles() {
        let platform = Arc::new(MemoryPlatform::new());
        let service = service_at(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            Arc::clone(&platform),
            ReminderPolicy::default(),
        );
        let handles = service
            .schedule_task_notifications(&task("t1", (2024, 6, 10), None))
            .await;

        service.cancel_task_notifications(None).await;
        service.cancel_task_notifications(Some(&[])).await;
        service
            .cancel_task_notifications(Some(&[NotificationHandle::new("ghost")]))
            .await;
        assert_eq!(platform.pending().len(), 3);

        service.cancel_task_notifications(Some(&handles)).await;
        assert!(platform.pending().is_empty());
    }

    #[tokio::test]
    async fn one_failing_task_does_not_block_others() {
        let platform = Arc::new(MemoryPlatform::new());
        platform.fail_for_task("bad");
        let service = service_at(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            Arc::clone(&platform),
            ReminderPolicy::default(),
        );
        let tasks = vec![
            task("bad", (2024, 6, 10), None),
            task("good", (2024, 6, 11), None),
        ];

        let map = service.reschedule_all_notifications(&tasks).await;
        assert!(!map.contains_key("bad"));
        assert_eq!(map.get("good").map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn reschedule_all_is_idempotent_in_membership() {
        let platform = Arc::new(MemoryPlatform::new());
        let service = service_at(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            Arc::clone(&platform),
            ReminderPolicy::default(),
        );
        let mut done = task("done", (2024, 6, 10), None);
        done.completed = true;
        let mut deleted = task("deleted", (2024, 6, 10), None);
        deleted.deleted_at = Some(Utc::now());
        let tasks = vec![
            task("a", (2024, 6, 10), None),
            task("b", (2024, 6, 12), Some((7, 30))),
            done,
            deleted,
        ];

        let first = service.reschedule_all_notifications(&tasks).await;
        assert_eq!(platform.cancel_all_calls(), 1);
        let second = service.reschedule_all_notifications(&tasks).await;
        assert_eq!(platform.cancel_all_calls(), 2);

        let first_ids: HashSet<_> = first.keys().cloned().collect();
        let second_ids: HashSet<_> = second.keys().cloned().collect();
        assert_eq!(first_ids, second_ids);
        assert_eq!(
            first_ids,
            HashSet::from(["a".to_string(), "b".to_string()])
        );
        // Only the second round's handles are live.
        assert_eq!(platform.pending().len(), 6);
        assert!(first["a"].iter().all(|handle| !platform.is_scheduled(handle)));
    }
}

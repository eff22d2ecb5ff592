//! Records shared by the engine: tasks, patches, approval requests, users.
//!
//! Remote documents use camelCase field names. `Task::notification_ids` is
//! local bookkeeping and never leaves the process.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::recurrence;

/// Opaque identifier for one scheduled local alert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationHandle(pub String);

impl NotificationHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Recurrence rule of a task.
///
/// Unrecognized values read from a document are kept as `Unknown` so a corrupt
/// rule degrades to "no movement" instead of failing the whole snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Weekly,
    CustomWeekly,
    Monthly,
    Yearly,
    Unknown(String),
}

impl Recurrence {
    pub fn as_str(&self) -> &str {
        match self {
            Recurrence::None => "none",
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::CustomWeekly => "custom_weekly",
            Recurrence::Monthly => "monthly",
            Recurrence::Yearly => "yearly",
            Recurrence::Unknown(raw) => raw.as_str(),
        }
    }

    fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Recurrence::None,
            "daily" => Recurrence::Daily,
            "weekly" => Recurrence::Weekly,
            "custom_weekly" => Recurrence::CustomWeekly,
            "monthly" => Recurrence::Monthly,
            "yearly" => Recurrence::Yearly,
            _ => Recurrence::Unknown(raw.to_string()),
        }
    }
}

impl From<String> for Recurrence {
    fn from(raw: String) -> Self {
        Recurrence::parse_lenient(&raw)
    }
}

impl From<Recurrence> for String {
    fn from(recurrence: Recurrence) -> Self {
        recurrence.as_str().to_string()
    }
}

impl FromStr for Recurrence {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match Recurrence::parse_lenient(raw) {
            Recurrence::Unknown(value) => Err(Error::InvalidArgument(format!(
                "unknown recurrence '{value}' (expected none|daily|weekly|custom_weekly|monthly|yearly)"
            ))),
            known => Ok(known),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Subtask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Ulid::new().to_string().to_lowercase(),
            title: title.into(),
            completed: false,
            category: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    pub due_date: NaiveDate,
    #[serde(default, with = "hhmm", skip_serializing_if = "Option::is_none")]
    pub due_time: Option<NaiveTime>,
    #[serde(default)]
    pub recurrence: Recurrence,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub week_days: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub family_id: String,
    pub created_by: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(skip)]
    pub notification_ids: Vec<NotificationHandle>,
}

impl Task {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_recurring(&self) -> bool {
        recurrence::should_recur(&self.recurrence)
    }

    /// Local wall-clock instant the task is due, using `default_time` when
    /// the task has no explicit time.
    pub fn due_at(&self, default_time: NaiveTime) -> NaiveDateTime {
        self.due_date.and_time(self.due_time.unwrap_or(default_time))
    }

    /// Next due date of the series, or `None` when the task does not recur or
    /// the series ends before the next occurrence.
    pub fn next_occurrence(&self) -> Option<NaiveDate> {
        if !self.is_recurring() {
            return None;
        }
        let next =
            recurrence::calculate_next_date(self.due_date, &self.recurrence, &self.week_days);
        match self.recurrence_end_date {
            Some(end) if next > end => None,
            _ => Some(next),
        }
    }

    /// Patch that rolls the task forward to its next occurrence: new due date,
    /// not completed, every subtask reset.
    pub fn rollforward(&self) -> Option<TaskPatch> {
        let next = self.next_occurrence()?;
        Some(TaskPatch {
            due_date: Some(next),
            completed: Some(false),
            subtasks: Some(reset_subtasks(&self.subtasks)),
            ..TaskPatch::default()
        })
    }

    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(category) = &patch.category {
            self.category = category.clone();
        }
        if let Some(subtasks) = &patch.subtasks {
            self.subtasks = subtasks.clone();
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(due_time) = patch.due_time {
            self.due_time = due_time;
        }
        if let Some(recurrence) = &patch.recurrence {
            self.recurrence = recurrence.clone();
        }
        if let Some(week_days) = &patch.week_days {
            self.week_days = week_days.clone();
        }
        if let Some(end) = patch.recurrence_end_date {
            self.recurrence_end_date = end;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(deleted_at) = patch.deleted_at {
            self.deleted_at = deleted_at;
        }
        if let Some(created_by) = &patch.created_by {
            self.created_by = created_by.clone();
        }
        if let Some(is_private) = patch.is_private {
            self.is_private = is_private;
        }
    }

    /// The task as it would look after `patch` is applied.
    pub fn patched(&self, patch: &TaskPatch) -> Task {
        let mut task = self.clone();
        task.apply_patch(patch);
        task
    }

    /// Shape checks applied to every document crossing the repository boundary.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidTask("task id cannot be empty".to_string()));
        }
        validate_content(&self.title, &self.family_id, &self.week_days)
    }
}

pub fn reset_subtasks(subtasks: &[Subtask]) -> Vec<Subtask> {
    subtasks
        .iter()
        .map(|subtask| Subtask {
            completed: false,
            ..subtask.clone()
        })
        .collect()
}

fn validate_content(title: &str, family_id: &str, week_days: &[u8]) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::InvalidTask("title cannot be empty".to_string()));
    }
    if family_id.trim().is_empty() {
        return Err(Error::InvalidTask("familyId is required".to_string()));
    }
    if let Some(day) = week_days.iter().find(|day| **day > 6) {
        return Err(Error::InvalidTask(format!(
            "weekDays entry {day} is out of range (0-6)"
        )));
    }
    Ok(())
}

/// Payload for creating a task; the repository assigns id and timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    pub due_date: NaiveDate,
    #[serde(default, with = "hhmm", skip_serializing_if = "Option::is_none")]
    pub due_time: Option<NaiveTime>,
    #[serde(default)]
    pub recurrence: Recurrence,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub week_days: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub family_id: String,
    #[serde(default)]
    pub created_by: String,
}

impl NewTask {
    pub fn new(title: impl Into<String>, due_date: NaiveDate) -> Self {
        Self {
            title: title.into(),
            due_date,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_content(&self.title, &self.family_id, &self.week_days)
    }

    /// Materialize the stored record. Recurrence-only fields are dropped when
    /// the task does not recur.
    pub fn into_task(self, id: String, now: DateTime<Utc>) -> Task {
        let recurring = recurrence::should_recur(&self.recurrence);
        Task {
            id,
            title: self.title.trim().to_string(),
            description: self.description,
            category: self.category,
            subtasks: self.subtasks,
            due_date: self.due_date,
            due_time: self.due_time,
            week_days: if recurring { self.week_days } else { Vec::new() },
            recurrence_end_date: if recurring {
                self.recurrence_end_date
            } else {
                None
            },
            recurrence: self.recurrence,
            completed: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            family_id: self.family_id,
            created_by: self.created_by,
            is_private: self.is_private,
            notification_ids: Vec::new(),
        }
    }
}

/// Partial task update. Clearable fields use a nested `Option`: the outer
/// level is "field present", the inner level is the new value or null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtasks: Option<Vec<Subtask>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, with = "hhmm_patch", skip_serializing_if = "Option::is_none")]
    pub due_time: Option<Option<NaiveTime>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week_days: Option<Vec<u8>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub recurrence_end_date: Option<Option<NaiveDate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub deleted_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_private: Option<bool>,
}

impl TaskPatch {
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    pub fn subtasks(subtasks: Vec<Subtask>) -> Self {
        Self {
            subtasks: Some(subtasks),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }

    /// Whether the patch can invalidate previously computed reminders.
    pub fn touches_schedule(&self) -> bool {
        self.due_date.is_some()
            || self.due_time.is_some()
            || self.title.is_some()
            || self.completed.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(Error::InvalidTask("title cannot be empty".to_string()));
            }
        }
        if let Some(days) = &self.week_days {
            if let Some(day) = days.iter().find(|day| **day > 6) {
                return Err(Error::InvalidTask(format!(
                    "weekDays entry {day} is out of range (0-6)"
                )));
            }
        }
        Ok(())
    }
}

fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// `HH:MM` wall-clock times.
pub(crate) mod hhmm {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<NaiveTime> {
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
            .ok()
    }

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(time) => serializer.serialize_str(&time.format("%H:%M").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveTime>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => parse(value)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid time '{value}', expected HH:MM"))),
        }
    }
}

mod hhmm_patch {
    use chrono::NaiveTime;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Option<NaiveTime>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(inner) => super::hhmm::serialize(inner, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<NaiveTime>>, D::Error> {
        super::hhmm::deserialize(deserializer).map(Some)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Update,
    Delete,
    Complete,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalAction::Update => "update",
            ApprovalAction::Delete => "delete",
            ApprovalAction::Complete => "complete",
        }
    }
}

impl fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: String,
    pub family_id: String,
    pub task_id: String,
    pub requested_by: String,
    pub user_name: String,
    pub action: ApprovalAction,
    #[serde(default)]
    pub data: TaskPatch,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewApprovalRequest {
    pub family_id: String,
    pub task_id: String,
    pub requested_by: String,
    pub user_name: String,
    pub action: ApprovalAction,
    pub data: TaskPatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Parent,
    Dependent,
}

impl Role {
    /// Admins and parents mutate directly; dependents go through approval.
    pub fn is_privileged(&self) -> bool {
        !matches!(self, Role::Dependent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Parent => "parent",
            Role::Dependent => "dependent",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "parent" => Ok(Role::Parent),
            "dependent" => Ok(Role::Dependent),
            other => Err(Error::InvalidArgument(format!(
                "unknown role '{other}' (expected admin|parent|dependent)"
            ))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated member acting on the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl User {
    pub fn new(uid: impl Into<String>, family_id: impl Into<String>, role: Role) -> Self {
        Self {
            uid: uid.into(),
            family_id: Some(family_id.into()),
            role,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn family(&self) -> Option<&str> {
        self.family_id
            .as_deref()
            .map(str::trim)
            .filter(|family| !family.is_empty())
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date")
    }

    fn sample_task() -> Task {
        let mut new_task = NewTask::new("Water plants", date("2024-06-10"));
        new_task.family_id = "fam-1".to_string();
        new_task.created_by = "u1".to_string();
        new_task.recurrence = Recurrence::Weekly;
        new_task.subtasks = vec![Subtask::new("Balcony"), Subtask::new("Kitchen")];
        new_task.into_task("t1".to_string(), Utc::now())
    }

    #[test]
    fn task_document_uses_camel_case_and_hides_handles() {
        let mut task = sample_task();
        task.due_time = NaiveTime::from_hms_opt(18, 30, 0);
        task.notification_ids = vec![NotificationHandle::new("n1")];

        let value = serde_json::to_value(&task).expect("serialize");
        assert_eq!(value["dueDate"], "2024-06-10");
        assert_eq!(value["dueTime"], "18:30");
        assert_eq!(value["familyId"], "fam-1");
        assert_eq!(value["recurrence"], "weekly");
        assert!(value.get("notificationIds").is_none());
        assert!(value.get("notification_ids").is_none());
    }

    #[test]
    fn unknown_recurrence_survives_decoding() {
        let value = json!({
            "id": "t1",
            "title": "Odd",
            "dueDate": "2024-06-10",
            "recurrence": "fortnightly",
            "createdAt": "2024-06-01T00:00:00Z",
            "updatedAt": "2024-06-01T00:00:00Z",
            "familyId": "fam-1",
            "createdBy": "u1"
        });
        let task: Task = serde_json::from_value(value).expect("decode");
        assert_eq!(task.recurrence, Recurrence::Unknown("fortnightly".to_string()));
        assert!(task.is_recurring());
    }

    #[test]
    fn patch_distinguishes_absent_from_null() {
        let cleared: TaskPatch =
            serde_json::from_value(json!({ "dueTime": null })).expect("decode");
        assert_eq!(cleared.due_time, Some(None));

        let absent: TaskPatch = serde_json::from_value(json!({})).expect("decode");
        assert_eq!(absent.due_time, None);
        assert!(absent.is_empty());

        let set: TaskPatch = serde_json::from_value(json!({ "dueTime": "07:15" })).expect("decode");
        assert_eq!(set.due_time, Some(NaiveTime::from_hms_opt(7, 15, 0)));
    }

    #[test]
    fn rollforward_resets_completion_and_subtasks() {
        let mut task = sample_task();
        task.completed = true;
        task.subtasks[0].completed = true;

        let patch = task.rollforward().expect("recurring");
        let rolled = task.patched(&patch);
        assert_eq!(rolled.due_date, date("2024-06-17"));
        assert!(!rolled.completed);
        assert!(rolled.subtasks.iter().all(|subtask| !subtask.completed));
    }

    #[test]
    fn series_ends_after_recurrence_end_date() {
        let mut task = sample_task();
        task.recurrence_end_date = Some(date("2024-06-15"));
        assert_eq!(task.next_occurrence(), None);
        assert!(task.rollforward().is_none());
    }

    #[test]
    fn new_task_requires_family_and_title() {
        let missing_family = NewTask::new("Laundry", date("2024-06-10"));
        assert!(matches!(missing_family.validate(), Err(Error::InvalidTask(_))));

        let mut blank_title = NewTask::new("   ", date("2024-06-10"));
        blank_title.family_id = "fam-1".to_string();
        assert!(matches!(blank_title.validate(), Err(Error::InvalidTask(_))));
    }

    #[test]
    fn non_recurring_tasks_drop_recurrence_fields() {
        let mut new_task = NewTask::new("Dentist", date("2024-06-10"));
        new_task.family_id = "fam-1".to_string();
        new_task.week_days = vec![1, 3];
        new_task.recurrence_end_date = Some(date("2024-12-31"));
        let task = new_task.into_task("t2".to_string(), Utc::now());
        assert!(task.week_days.is_empty());
        assert!(task.recurrence_end_date.is_none());
    }

    #[test]
    fn roles_parse_and_classify() {
        assert_eq!("Admin".parse::<Role>().expect("role"), Role::Admin);
        assert!(Role::Parent.is_privileged());
        assert!(!Role::Dependent.is_privileged());
        assert!("owner".parse::<Role>().is_err());
    }
}

//! famtask task command implementations.

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use super::{settle, Globals, StoreContext};
use crate::error::{Error, Result};
use crate::model::{hhmm, NewTask, Recurrence, Subtask, Task, TaskPatch};
use crate::notifications::Reminder;
use crate::output::{emit_success, HumanOutput};
use crate::recurrence::{calculate_next_date, should_recur};
use crate::store::Toggle;

pub struct AddOptions {
    pub title: String,
    pub date: Option<String>,
    pub time: Option<String>,
    pub description: String,
    pub category: String,
    pub recurrence: String,
    pub weekdays: Option<String>,
    pub until: Option<String>,
    pub private: bool,
    pub subtasks: Vec<String>,
}

pub struct ListOptions {
    pub date: Option<String>,
    pub all: bool,
}

pub struct UpdateOptions {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub clear_time: bool,
    pub recurrence: Option<String>,
    pub weekdays: Option<String>,
    pub until: Option<String>,
    pub clear_until: bool,
    pub private: bool,
    pub public: bool,
}

#[derive(Serialize)]
struct AddReport {
    task: Task,
    reminders: usize,
}

#[derive(Serialize)]
struct TaskListOutput {
    total: usize,
    tasks: Vec<Task>,
}

#[derive(Serialize)]
struct MutationReport {
    task_id: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    effect: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_date: Option<NaiveDate>,
}

#[derive(Serialize)]
struct NextDateReport {
    date: NaiveDate,
    recurrence: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    week_days: Vec<u8>,
    next: NaiveDate,
    recurs: bool,
}

#[derive(Serialize)]
struct RemindersReport {
    tasks: usize,
    reminders: Vec<Reminder>,
}

pub async fn run_add(globals: &Globals, options: AddOptions) -> Result<()> {
    let ctx = StoreContext::open(globals)?;
    let today = ctx.store.today();

    let due_date = match options.date.as_deref() {
        Some(raw) => parse_date("date", raw, today)?,
        None => today,
    };
    let mut new_task = NewTask::new(options.title, due_date);
    new_task.description = options.description;
    new_task.category = options.category;
    new_task.due_time = parse_time(options.time.as_deref())?;
    new_task.recurrence = options.recurrence.parse::<Recurrence>()?;
    new_task.week_days = parse_weekdays(options.weekdays.as_deref())?;
    new_task.recurrence_end_date = options
        .until
        .as_deref()
        .map(|raw| parse_date("until", raw, today))
        .transpose()?;
    new_task.is_private = options.private;
    new_task.subtasks = options.subtasks.into_iter().map(Subtask::new).collect();

    let task = settle(ctx.store.add_task(new_task).await, "new task")?.ok_or_else(|| {
        Error::OperationFailed("task creation unexpectedly required approval".to_string())
    })?;

    let mut human = HumanOutput::new(format!("famtask add: {}", task.title));
    push_task_summary(&mut human, &task);
    human.push_summary("reminders", task.notification_ids.len().to_string());
    human.push_next_step(format!("famtask toggle {}", task.id));

    let report = AddReport {
        reminders: task.notification_ids.len(),
        task,
    };
    emit_success(globals.output(), "add", &report, Some(&human))
}

pub async fn run_list(globals: &Globals, options: ListOptions) -> Result<()> {
    let ctx = StoreContext::open(globals)?;
    let today = ctx.store.today();

    let mut tasks = match options.date.as_deref() {
        Some(raw) => {
            let date = parse_date("date", raw, today)?;
            ctx.store.get_tasks_by_date(date)
        }
        None if options.all => ctx.store.state().tasks,
        None => ctx.store.get_tasks(),
    };
    tasks.sort_by_key(|task| (task.due_date, task.due_time));

    let mut human = HumanOutput::new("Tasks");
    human.push_summary("Total", tasks.len().to_string());
    for task in &tasks {
        human.push_detail(task_line(task));
    }

    let output = TaskListOutput {
        total: tasks.len(),
        tasks,
    };
    emit_success(globals.output(), "list", &output, Some(&human))
}

pub async fn run_show(globals: &Globals, id: &str) -> Result<()> {
    let ctx = StoreContext::open(globals)?;
    let task = ctx
        .store
        .get_task_by_id(id)
        .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;

    let mut human = HumanOutput::new(format!("Task {}", task.id));
    push_task_summary(&mut human, &task);
    if !task.description.is_empty() {
        human.push_summary("description", task.description.clone());
    }
    for subtask in &task.subtasks {
        let mark = if subtask.completed { "x" } else { " " };
        human.push_detail(format!("[{mark}] {} {}", subtask.id, subtask.title));
    }
    if let Some(next) = task.next_occurrence() {
        human.push_summary("next occurrence", next.to_string());
    }

    emit_success(globals.output(), "show", &task, Some(&human))
}

pub async fn run_update(globals: &Globals, options: UpdateOptions) -> Result<()> {
    let ctx = StoreContext::open(globals)?;
    let today = ctx.store.today();

    let patch = TaskPatch {
        title: options.title,
        description: options.description,
        category: options.category,
        due_date: options
            .date
            .as_deref()
            .map(|raw| parse_date("date", raw, today))
            .transpose()?,
        due_time: if options.clear_time {
            Some(None)
        } else {
            parse_time(options.time.as_deref())?.map(Some)
        },
        recurrence: options
            .recurrence
            .as_deref()
            .map(str::parse::<Recurrence>)
            .transpose()?,
        week_days: match options.weekdays.as_deref() {
            Some(raw) => Some(parse_weekdays(Some(raw))?),
            None => None,
        },
        recurrence_end_date: if options.clear_until {
            Some(None)
        } else {
            options
                .until
                .as_deref()
                .map(|raw| parse_date("until", raw, today).map(Some))
                .transpose()?
        },
        is_private: if options.private {
            Some(true)
        } else if options.public {
            Some(false)
        } else {
            None
        },
        ..TaskPatch::default()
    };

    let applied = settle(ctx.store.update_task(&options.id, patch).await, &options.id)?;
    emit_mutation(
        &ctx,
        globals,
        "update",
        &options.id,
        applied.map(|()| ("updated", None)),
    )
}

pub async fn run_toggle(globals: &Globals, id: &str) -> Result<()> {
    let ctx = StoreContext::open(globals)?;
    let applied = settle(ctx.store.toggle_task(id).await, id)?;
    emit_mutation(&ctx, globals, "toggle", id, applied.map(toggle_effect))
}

pub async fn run_subtask(globals: &Globals, task_id: &str, subtask_id: &str) -> Result<()> {
    let ctx = StoreContext::open(globals)?;
    let applied = settle(ctx.store.toggle_subtask(task_id, subtask_id).await, task_id)?;
    emit_mutation(&ctx, globals, "subtask", task_id, applied.map(toggle_effect))
}

pub async fn run_skip(globals: &Globals, id: &str) -> Result<()> {
    let ctx = StoreContext::open(globals)?;
    let applied = settle(ctx.store.skip_task(id).await, id)?;
    emit_mutation(
        &ctx,
        globals,
        "skip",
        id,
        applied.map(|next| ("skipped", Some(next))),
    )
}

pub async fn run_delete(globals: &Globals, id: &str) -> Result<()> {
    let ctx = StoreContext::open(globals)?;
    let applied = settle(ctx.store.delete_task(id).await, id)?;
    emit_mutation(&ctx, globals, "delete", id, applied.map(|()| ("deleted", None)))
}

pub async fn run_history(globals: &Globals, before: Option<String>) -> Result<()> {
    let ctx = StoreContext::open(globals)?;
    let today = ctx.store.today();
    let before = match before.as_deref() {
        Some(raw) => parse_date("before", raw, today)?,
        None => today,
    };

    let mut tasks = ctx.store.old_completed_tasks(before).await?;
    tasks.sort_by_key(|task| std::cmp::Reverse(task.due_date));

    let mut human = HumanOutput::new(format!("Completed before {before}"));
    human.push_summary("Total", tasks.len().to_string());
    for task in &tasks {
        human.push_detail(task_line(task));
    }

    let output = TaskListOutput {
        total: tasks.len(),
        tasks,
    };
    emit_success(globals.output(), "history", &output, Some(&human))
}

pub fn run_next_date(
    globals: &Globals,
    date: &str,
    recurrence: &str,
    weekdays: Option<&str>,
) -> Result<()> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| Error::InvalidArgument(format!("invalid date '{date}', expected YYYY-MM-DD")))?;
    let recurrence = recurrence.parse::<Recurrence>()?;
    let week_days = parse_weekdays(weekdays)?;
    let next = calculate_next_date(date, &recurrence, &week_days);

    let mut human = HumanOutput::new(format!("famtask next-date: {next}"));
    human.push_summary("from", date.to_string());
    human.push_summary("recurrence", recurrence.to_string());
    if !week_days.is_empty() {
        human.push_summary("weekdays", join_days(&week_days));
    }

    let report = NextDateReport {
        date,
        recurs: should_recur(&recurrence),
        recurrence: recurrence.to_string(),
        week_days,
        next,
    };
    emit_success(globals.output(), "next-date", &report, Some(&human))
}

pub async fn run_reminders(globals: &Globals) -> Result<()> {
    let ctx = StoreContext::open(globals)?;
    let map = ctx.store.reschedule_all().await;
    let reminders = ctx.platform.pending();

    let mut human = HumanOutput::new("Reminders");
    human.push_summary("tasks", map.len().to_string());
    human.push_summary("alerts", reminders.len().to_string());
    for reminder in &reminders {
        human.push_detail(format!(
            "{} {} {}: {}",
            reminder.fire_at.to_rfc3339(),
            reminder.task_id,
            reminder.title,
            reminder.body
        ));
    }

    let report = RemindersReport {
        tasks: map.len(),
        reminders,
    };
    emit_success(globals.output(), "reminders", &report, Some(&human))
}

fn toggle_effect(toggle: Toggle) -> (&'static str, Option<NaiveDate>) {
    match toggle {
        Toggle::Completed => ("completed", None),
        Toggle::Reopened => ("reopened", None),
        Toggle::RolledForward(next) => ("rolled_forward", Some(next)),
        Toggle::SubtasksUpdated => ("subtasks_updated", None),
    }
}

/// Report an applied or approval-pending change. `applied` is `None` when the
/// change went to approval.
fn emit_mutation(
    ctx: &StoreContext,
    globals: &Globals,
    command: &str,
    task_id: &str,
    applied: Option<(&'static str, Option<NaiveDate>)>,
) -> Result<()> {
    let (effect, due_date) = match applied {
        Some((effect, due_date)) => (Some(effect), due_date),
        None => (None, None),
    };
    let report = MutationReport {
        task_id: task_id.to_string(),
        status: if effect.is_some() {
            "applied"
        } else {
            "pending_approval"
        },
        effect,
        due_date,
    };

    let header = match effect {
        Some(effect) => format!("famtask {command}: {task_id} {}", effect.replace('_', " ")),
        None => format!("famtask {command}: {task_id} pending approval"),
    };
    let mut human = HumanOutput::new(header);
    if let Some(due_date) = due_date {
        human.push_summary("next due", due_date.to_string());
    }
    for notice in ctx.notices.take() {
        human.push_warning(notice.message);
    }
    if effect.is_none() {
        human.push_next_step("an admin or parent reviews it with: famtask approvals list");
    }

    emit_success(globals.output(), command, &report, Some(&human))
}

fn push_task_summary(human: &mut HumanOutput, task: &Task) {
    human.push_summary("id", task.id.clone());
    human.push_summary("title", task.title.clone());
    let due = match task.due_time {
        Some(time) => format!("{} {}", task.due_date, time.format("%H:%M")),
        None => task.due_date.to_string(),
    };
    human.push_summary("due", due);
    if task.is_recurring() {
        let mut rule = task.recurrence.to_string();
        if !task.week_days.is_empty() {
            rule.push_str(&format!(" ({})", join_days(&task.week_days)));
        }
        if let Some(end) = task.recurrence_end_date {
            rule.push_str(&format!(" until {end}"));
        }
        human.push_summary("recurrence", rule);
    }
    if !task.category.is_empty() {
        human.push_summary("category", task.category.clone());
    }
    human.push_summary("completed", task.completed.to_string());
    if task.is_private {
        human.push_summary("private", format!("owner {}", task.created_by));
    }
    if let Some(deleted_at) = task.deleted_at {
        human.push_summary("deleted", deleted_at.to_rfc3339());
    }
}

fn task_line(task: &Task) -> String {
    let mark = if task.completed { "x" } else { " " };
    let mut line = format!("[{mark}] {}", task.due_date);
    if let Some(time) = task.due_time {
        line.push_str(&format!(" {}", time.format("%H:%M")));
    }
    line.push_str(&format!(" {} {}", task.id, task.title));
    if task.is_recurring() {
        line.push_str(&format!(" ({})", task.recurrence));
    }
    if !task.subtasks.is_empty() {
        let done = task.subtasks.iter().filter(|s| s.completed).count();
        line.push_str(&format!(" [{done}/{} subtasks]", task.subtasks.len()));
    }
    if task.is_private {
        line.push_str(" [private]");
    }
    if task.is_deleted() {
        line.push_str(" [deleted]");
    }
    line
}

fn join_days(days: &[u8]) -> String {
    days.iter()
        .map(|day| day.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// `YYYY-MM-DD`, or `today` in the reference timezone.
fn parse_date(flag: &str, raw: &str, today: NaiveDate) -> Result<NaiveDate> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("today") {
        return Ok(today);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        Error::InvalidArgument(format!("invalid --{flag} '{raw}', expected YYYY-MM-DD"))
    })
}

fn parse_time(raw: Option<&str>) -> Result<Option<NaiveTime>> {
    match raw {
        None => Ok(None),
        Some(raw) => hhmm::parse(raw)
            .map(Some)
            .ok_or_else(|| Error::InvalidArgument(format!("invalid --time '{raw}', expected HH:MM"))),
    }
}

/// Comma separated weekday indices, 0 = Sunday.
fn parse_weekdays(raw: Option<&str>) -> Result<Vec<u8>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let mut days = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let day: u8 = part.parse().map_err(|_| {
            Error::InvalidArgument(format!("invalid weekday '{part}', expected 0-6"))
        })?;
        if day > 6 {
            return Err(Error::InvalidArgument(format!(
                "invalid weekday '{part}', expected 0-6"
            )));
        }
        if !days.contains(&day) {
            days.push(day);
        }
    }
    days.sort_unstable();
    Ok(days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekdays_parse_sorted_and_deduplicated() {
        assert_eq!(parse_weekdays(Some("5, 1,3,1")).unwrap(), vec![1, 3, 5]);
        assert!(parse_weekdays(Some("7")).is_err());
        assert!(parse_weekdays(Some("mon")).is_err());
        assert!(parse_weekdays(None).unwrap().is_empty());
    }

    #[test]
    fn dates_accept_today() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        assert_eq!(parse_date("date", "today", today).unwrap(), today);
        assert_eq!(
            parse_date("date", "2024-02-29", today).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert!(parse_date("date", "10/06/2024", today).is_err());
    }

    #[test]
    fn times_parse_hh_mm() {
        assert_eq!(
            parse_time(Some("07:30")).unwrap(),
            NaiveTime::from_hms_opt(7, 30, 0)
        );
        assert!(parse_time(Some("25:00")).is_err());
    }
}

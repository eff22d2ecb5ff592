//! Visibility and permission rules over tasks.
//!
//! Privacy is per owner: a private task is visible to its `created_by` only.
//! Making a task private hands ownership to whoever made it private.

use crate::model::{Role, Task, TaskPatch, User};

pub fn can_user_view_task(task: &Task, user: Option<&User>) -> bool {
    let Some(user) = user else {
        return false;
    };
    if !same_family(task, user) {
        return false;
    }
    if task.is_private {
        return task.created_by == user.uid;
    }
    true
}

pub fn can_user_edit_task(task: &Task, user: Option<&User>) -> bool {
    can_mutate(task, user)
}

pub fn can_user_delete_task(task: &Task, user: Option<&User>) -> bool {
    can_mutate(task, user)
}

fn can_mutate(task: &Task, user: Option<&User>) -> bool {
    let Some(user) = user else {
        return false;
    };
    if task.created_by == user.uid {
        return true;
    }
    !task.is_private && user.role == Role::Admin && same_family(task, user)
}

fn same_family(task: &Task, user: &User) -> bool {
    user.family() == Some(task.family_id.as_str())
}

/// Tasks of the user's family that the user may see, in input order.
pub fn filter_visible_tasks(tasks: &[Task], user: Option<&User>) -> Vec<Task> {
    if user.is_none() {
        return Vec::new();
    }
    tasks
        .iter()
        .filter(|task| can_user_view_task(task, user))
        .cloned()
        .collect()
}

pub fn convert_task_to_private(patch: TaskPatch, new_owner_uid: &str) -> TaskPatch {
    TaskPatch {
        is_private: Some(true),
        created_by: Some(new_owner_uid.to_string()),
        ..patch
    }
}

pub fn convert_task_to_public(patch: TaskPatch) -> TaskPatch {
    TaskPatch {
        is_private: Some(false),
        ..patch
    }
}

//! famtask approvals command implementations.

use serde::Serialize;

use super::{settle, Globals, StoreContext};
use crate::error::{Error, Result};
use crate::model::{ApprovalRequest, ApprovalStatus};
use crate::output::{emit_success, HumanOutput};

#[derive(Serialize)]
struct ApprovalListOutput {
    total: usize,
    requests: Vec<ApprovalRequest>,
}

pub async fn run_list(globals: &Globals) -> Result<()> {
    let ctx = StoreContext::open(globals)?;
    let family_id = family_of(&ctx)?;
    let requests = ctx.approvals.pending_approvals(&family_id).await?;

    let mut human = HumanOutput::new("Pending approvals");
    human.push_summary("Total", requests.len().to_string());
    for request in &requests {
        let title = ctx
            .store
            .get_task_by_id(&request.task_id)
            .map(|task| task.title)
            .unwrap_or_else(|| request.task_id.clone());
        human.push_detail(format!(
            "{} {} wants to {} \"{}\"",
            request.id, request.user_name, request.action, title
        ));
    }
    if !requests.is_empty() {
        human.push_next_step("famtask approvals approve <id>");
    }

    let output = ApprovalListOutput {
        total: requests.len(),
        requests,
    };
    emit_success(globals.output(), "approvals list", &output, Some(&human))
}

pub async fn run_approve(globals: &Globals, id: &str) -> Result<()> {
    let ctx = StoreContext::open(globals)?;
    let request = pending_request(&ctx, id).await?;

    settle(ctx.store.apply_approval(&request).await, &request.task_id)?;
    let resolved = ctx.approvals.resolve(id, ApprovalStatus::Approved).await?;

    let mut human = HumanOutput::new(format!("famtask approvals approve: {id}"));
    human.push_summary("task", resolved.task_id.clone());
    human.push_summary("action", resolved.action.to_string());
    human.push_summary("requested by", resolved.user_name.clone());
    for notice in ctx.notices.take() {
        human.push_warning(notice.message);
    }
    emit_success(globals.output(), "approvals approve", &resolved, Some(&human))
}

pub async fn run_reject(globals: &Globals, id: &str) -> Result<()> {
    let ctx = StoreContext::open(globals)?;
    pending_request(&ctx, id).await?;
    let resolved = ctx.approvals.resolve(id, ApprovalStatus::Rejected).await?;

    let mut human = HumanOutput::new(format!("famtask approvals reject: {id}"));
    human.push_summary("task", resolved.task_id.clone());
    human.push_summary("action", resolved.action.to_string());
    emit_success(globals.output(), "approvals reject", &resolved, Some(&human))
}

fn family_of(ctx: &StoreContext) -> Result<String> {
    ctx.user
        .family()
        .map(str::to_string)
        .ok_or_else(|| Error::NoSession("user has no family".to_string()))
}

/// A pending request of the acting user's family, resolvable by them.
async fn pending_request(ctx: &StoreContext, id: &str) -> Result<ApprovalRequest> {
    if !ctx.user.role.is_privileged() {
        return Err(Error::NotPermitted(format!(
            "role {} cannot resolve approval requests",
            ctx.user.role
        )));
    }
    let family_id = family_of(ctx)?;
    let request = ctx
        .approvals
        .get(id)
        .await?
        .filter(|request| request.family_id == family_id)
        .ok_or_else(|| Error::ApprovalNotFound(id.to_string()))?;
    if request.status != ApprovalStatus::Pending {
        return Err(Error::InvalidArgument(format!(
            "approval request {id} is already resolved"
        )));
    }
    Ok(request)
}

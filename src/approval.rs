//! Approval requests raised for dependents' changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::model::{ApprovalRequest, ApprovalStatus, NewApprovalRequest};
use crate::storage::Storage;

#[async_trait]
pub trait ApprovalService: Send + Sync {
    async fn create_approval_request(&self, request: NewApprovalRequest)
        -> Result<ApprovalRequest>;

    /// Pending requests of a family, oldest first.
    async fn pending_approvals(&self, family_id: &str) -> Result<Vec<ApprovalRequest>>;

    async fn get(&self, id: &str) -> Result<Option<ApprovalRequest>>;

    /// Mark a pending request approved or rejected.
    async fn resolve(&self, id: &str, status: ApprovalStatus) -> Result<ApprovalRequest>;
}

fn materialize(request: NewApprovalRequest, now: DateTime<Utc>) -> ApprovalRequest {
    ApprovalRequest {
        id: Ulid::new().to_string().to_lowercase(),
        family_id: request.family_id,
        task_id: request.task_id,
        requested_by: request.requested_by,
        user_name: request.user_name,
        action: request.action,
        data: request.data,
        status: ApprovalStatus::Pending,
        created_at: now,
    }
}

fn resolve_in(
    requests: &mut [ApprovalRequest],
    id: &str,
    status: ApprovalStatus,
) -> Result<ApprovalRequest> {
    if status == ApprovalStatus::Pending {
        return Err(Error::InvalidArgument(
            "a request can only be resolved to approved or rejected".to_string(),
        ));
    }
    let request = requests
        .iter_mut()
        .find(|request| request.id == id)
        .ok_or_else(|| Error::ApprovalNotFound(id.to_string()))?;
    if request.status != ApprovalStatus::Pending {
        return Err(Error::InvalidArgument(format!(
            "approval request {id} is already resolved"
        )));
    }
    request.status = status;
    debug!(approval_id = id, ?status, "resolved approval request");
    Ok(request.clone())
}

fn pending_in(requests: &[ApprovalRequest], family_id: &str) -> Vec<ApprovalRequest> {
    let mut pending: Vec<_> = requests
        .iter()
        .filter(|request| request.family_id == family_id && request.status == ApprovalStatus::Pending)
        .cloned()
        .collect();
    pending.sort_by_key(|request| request.created_at);
    pending
}

pub struct MemoryApprovalService {
    clock: Arc<dyn Clock>,
    requests: Mutex<Vec<ApprovalRequest>>,
    fail: AtomicBool,
}

impl Default for MemoryApprovalService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryApprovalService {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            requests: Mutex::default(),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every request ever created, in order.
    pub fn requests(&self) -> Vec<ApprovalRequest> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ApprovalRequest>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ApprovalService for MemoryApprovalService {
    async fn create_approval_request(
        &self,
        request: NewApprovalRequest,
    ) -> Result<ApprovalRequest> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Repository("approval service unavailable".to_string()));
        }
        let created = materialize(request, self.clock.now());
        self.lock().push(created.clone());
        Ok(created)
    }

    async fn pending_approvals(&self, family_id: &str) -> Result<Vec<ApprovalRequest>> {
        Ok(pending_in(&self.lock(), family_id))
    }

    async fn get(&self, id: &str) -> Result<Option<ApprovalRequest>> {
        Ok(self.lock().iter().find(|request| request.id == id).cloned())
    }

    async fn resolve(&self, id: &str, status: ApprovalStatus) -> Result<ApprovalRequest> {
        resolve_in(&mut self.lock(), id, status)
    }
}

/// Approval requests kept in `approvals.json`.
pub struct FileApprovalService {
    storage: Storage,
    clock: Arc<dyn Clock>,
}

impl FileApprovalService {
    pub fn new(storage: Storage, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    fn load(&self) -> Result<Vec<ApprovalRequest>> {
        self.storage.read_locked(&self.storage.approvals_file())
    }
}

#[async_trait]
impl ApprovalService for FileApprovalService {
    async fn create_approval_request(
        &self,
        request: NewApprovalRequest,
    ) -> Result<ApprovalRequest> {
        let created = materialize(request, self.clock.now());
        self.storage.update_json(
            &self.storage.approvals_file(),
            |requests: &mut Vec<ApprovalRequest>| {
                requests.push(created.clone());
                Ok(())
            },
        )?;
        Ok(created)
    }

    async fn pending_approvals(&self, family_id: &str) -> Result<Vec<ApprovalRequest>> {
        Ok(pending_in(&self.load()?, family_id))
    }

    async fn get(&self, id: &str) -> Result<Option<ApprovalRequest>> {
        Ok(self.load()?.into_iter().find(|request| request.id == id))
    }

    async fn resolve(&self, id: &str, status: ApprovalStatus) -> Result<ApprovalRequest> {
        self.storage.update_json(
            &self.storage.approvals_file(),
            |requests: &mut Vec<ApprovalRequest>| resolve_in(requests, id, status),
        )
    }
}

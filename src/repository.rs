//! Remote task repository boundary.
//!
//! A `TaskRepository` owns the authoritative task collection. Subscribers
//! receive the full snapshot of their family right away and again after every
//! mutation touching that family. Raw documents are decoded and validated
//! here so the store only ever sees typed `Task` values.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::model::{NewTask, Task, TaskPatch};
use crate::storage::Storage;

/// Receives family snapshots.
pub type SnapshotListener = Arc<dyn Fn(Vec<Task>) + Send + Sync>;

/// Live subscription; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Persist a new task; the repository assigns id and timestamps.
    async fn create(&self, task: NewTask) -> Result<Task>;

    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<()>;

    /// Soft delete: sets `deletedAt`.
    async fn delete(&self, id: &str) -> Result<()>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Task>>;

    fn subscribe(&self, family_id: &str, listener: SnapshotListener) -> Result<Subscription>;

    /// Completed, non-deleted tasks of the family due before `before`.
    async fn get_old_completed_tasks(&self, family_id: &str, before: NaiveDate)
        -> Result<Vec<Task>>;
}

/// Decode one stored document into a validated task.
pub fn decode_task(document: serde_json::Value) -> Result<Task> {
    let task: Task = serde_json::from_value(document)
        .map_err(|err| Error::InvalidTask(format!("malformed task document: {err}")))?;
    task.validate()?;
    Ok(task)
}

/// Decode a batch of documents, dropping the ones that fail validation.
pub fn decode_documents(documents: &[serde_json::Value]) -> Vec<Task> {
    documents
        .iter()
        .filter_map(|document| match decode_task(document.clone()) {
            Ok(task) => Some(task),
            Err(err) => {
                let id = document.get("id").and_then(|id| id.as_str()).unwrap_or("?");
                warn!(task_id = id, error = %err, "skipping invalid task document");
                None
            }
        })
        .collect()
}

fn new_task_id() -> String {
    Ulid::new().to_string().to_lowercase()
}

fn is_old_completed(task: &Task, family_id: &str, before: NaiveDate) -> bool {
    task.family_id == family_id && task.completed && !task.is_deleted() && task.due_date < before
}

fn family_snapshot(tasks: &[Task], family_id: &str) -> Vec<Task> {
    tasks
        .iter()
        .filter(|task| task.family_id == family_id)
        .cloned()
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registered snapshot listeners, keyed by subscription id.
#[derive(Clone, Default)]
struct ListenerSet {
    inner: Arc<Mutex<ListenerState>>,
}

#[derive(Default)]
struct ListenerState {
    next_id: u64,
    listeners: HashMap<u64, (String, SnapshotListener)>,
}

impl ListenerSet {
    fn register(&self, family_id: &str, listener: SnapshotListener) -> Subscription {
        let id = {
            let mut state = lock(&self.inner);
            state.next_id += 1;
            let id = state.next_id;
            state.listeners.insert(id, (family_id.to_string(), listener));
            id
        };
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner).listeners.remove(&id);
            }
        })
    }

    fn listeners_for(&self, family_id: &str) -> Vec<SnapshotListener> {
        lock(&self.inner)
            .listeners
            .values()
            .filter(|(family, _)| family == family_id)
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn len(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    /// Deliver `snapshot` to the family's listeners. Must be called without
    /// holding any repository lock.
    fn emit(&self, family_id: &str, snapshot: Vec<Task>) {
        let listeners = self.listeners_for(family_id);
        debug!(family_id, listeners = listeners.len(), tasks = snapshot.len(), "emitting snapshot");
        for listener in listeners {
            listener(snapshot.clone());
        }
    }
}

/// In-memory repository for tests and embedding.
pub struct MemoryTaskRepository {
    clock: Arc<dyn Clock>,
    tasks: Mutex<Vec<Task>>,
    listeners: ListenerSet,
    updates: Mutex<Vec<(String, TaskPatch)>>,
    creates: AtomicUsize,
    deletes: AtomicUsize,
    fail_writes: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
}

impl Default for MemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Stamp `createdAt`, `updatedAt` and `deletedAt` from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tasks: Mutex::default(),
            listeners: ListenerSet::default(),
            updates: Mutex::default(),
            creates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
            write_delay: Mutex::default(),
        }
    }

    /// Insert an already materialized task and notify its family.
    pub fn seed(&self, task: Task) {
        let family_id = task.family_id.clone();
        let snapshot = {
            let mut tasks = lock(&self.tasks);
            tasks.retain(|existing| existing.id != task.id);
            tasks.push(task);
            family_snapshot(&tasks, &family_id)
        };
        self.listeners.emit(&family_id, snapshot);
    }

    /// Make every following write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Suspend every write for `delay` before applying it.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *lock(&self.write_delay) = delay;
    }

    /// Every successful `update` call, in order.
    pub fn updates(&self) -> Vec<(String, TaskPatch)> {
        lock(&self.updates).clone()
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn mutation_count(&self) -> usize {
        self.create_count() + self.delete_count() + lock(&self.updates).len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn all(&self) -> Vec<Task> {
        lock(&self.tasks).clone()
    }

    async fn before_write(&self) -> Result<()> {
        let delay = *lock(&self.write_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Repository("task collection unavailable".to_string()));
        }
        Ok(())
    }

    fn mutate<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        let (family_id, snapshot) = {
            let mut tasks = lock(&self.tasks);
            let task = tasks
                .iter_mut()
                .find(|task| task.id == id)
                .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
            f(task)?;
            task.updated_at = self.clock.now();
            let family_id = task.family_id.clone();
            let snapshot = family_snapshot(&tasks, &family_id);
            (family_id, snapshot)
        };
        self.listeners.emit(&family_id, snapshot);
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn create(&self, task: NewTask) -> Result<Task> {
        self.before_write().await?;
        task.validate()?;
        let created = task.into_task(new_task_id(), self.clock.now());
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.seed(created.clone());
        Ok(created)
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<()> {
        self.before_write().await?;
        patch.validate()?;
        self.mutate(id, |task| {
            task.apply_patch(patch);
            Ok(())
        })?;
        lock(&self.updates).push((id.to_string(), patch.clone()));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.before_write().await?;
        let now = self.clock.now();
        self.mutate(id, |task| {
            task.deleted_at = Some(now);
            Ok(())
        })?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Task>> {
        Ok(lock(&self.tasks).iter().find(|task| task.id == id).cloned())
    }

    fn subscribe(&self, family_id: &str, listener: SnapshotListener) -> Result<Subscription> {
        let subscription = self.listeners.register(family_id, Arc::clone(&listener));
        let snapshot = family_snapshot(&lock(&self.tasks), family_id);
        listener(snapshot);
        Ok(subscription)
    }

    async fn get_old_completed_tasks(
        &self,
        family_id: &str,
        before: NaiveDate,
    ) -> Result<Vec<Task>> {
        Ok(lock(&self.tasks)
            .iter()
            .filter(|task| is_old_completed(task, family_id, before))
            .cloned()
            .collect())
    }
}

/// Repository backed by `tasks.json` in the data directory.
///
/// Cross-process writes are serialized with a file lock; subscribers in this
/// process are notified after each write.
pub struct FileTaskRepository {
    storage: Storage,
    clock: Arc<dyn Clock>,
    listeners: ListenerSet,
}

impl FileTaskRepository {
    pub fn new(storage: Storage, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            listeners: ListenerSet::default(),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn load(&self) -> Result<Vec<Task>> {
        let documents: Vec<serde_json::Value> =
            self.storage.read_locked(&self.storage.tasks_file())?;
        Ok(decode_documents(&documents))
    }

    fn mutate<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        let now = self.clock.now();
        let (family_id, snapshot) = self.storage.update_json(
            &self.storage.tasks_file(),
            |documents: &mut Vec<serde_json::Value>| {
                let position = documents
                    .iter()
                    .position(|document| document.get("id").and_then(|v| v.as_str()) == Some(id))
                    .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
                let mut task = decode_task(documents[position].clone()).map_err(|err| {
                    Error::Repository(format!("stored task {id} is unreadable: {err}"))
                })?;
                f(&mut task)?;
                task.updated_at = now;
                documents[position] = serde_json::to_value(&task)?;
                let family_id = task.family_id.clone();
                let snapshot = family_snapshot(&decode_documents(documents), &family_id);
                Ok((family_id, snapshot))
            },
        )?;
        self.listeners.emit(&family_id, snapshot);
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for FileTaskRepository {
    async fn create(&self, task: NewTask) -> Result<Task> {
        task.validate()?;
        let created = task.into_task(new_task_id(), self.clock.now());
        let family_id = created.family_id.clone();
        let snapshot = self.storage.update_json(
            &self.storage.tasks_file(),
            |documents: &mut Vec<serde_json::Value>| {
                documents.push(serde_json::to_value(&created)?);
                Ok(family_snapshot(&decode_documents(documents), &family_id))
            },
        )?;
        self.listeners.emit(&family_id, snapshot);
        Ok(created)
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<()> {
        patch.validate()?;
        self.mutate(id, |task| {
            task.apply_patch(patch);
            Ok(())
        })
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let now = self.clock.now();
        self.mutate(id, |task| {
            task.deleted_at = Some(now);
            Ok(())
        })
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.load()?.into_iter().find(|task| task.id == id))
    }

    fn subscribe(&self, family_id: &str, listener: SnapshotListener) -> Result<Subscription> {
        let snapshot = family_snapshot(&self.load()?, family_id);
        let subscription = self.listeners.register(family_id, Arc::clone(&listener));
        listener(snapshot);
        Ok(subscription)
    }

    async fn get_old_completed_tasks(
        &self,
        family_id: &str,
        before: NaiveDate,
    ) -> Result<Vec<Task>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|task| is_old_completed(task, family_id, before))
            .collect())
    }
}

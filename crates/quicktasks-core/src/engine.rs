//! In-memory list and task state with optimistic persistence.
//!
//! Every mutation lands in memory first and is then handed to whichever
//! store the current mode makes authoritative. A failed write is logged and
//! the in-memory state is kept as it is.

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::filter::{TaskFilter, filtered_tasks};
use crate::identity::IdentityState;
use crate::migration::{MigrationCoordinator, MigrationReport};
use crate::mode::{Effect, IdentityEvent, Mode, ModeResolver, Transition};
use crate::store::{ListStore, OwnerStores, StoreKind, ensure_lists};
use crate::task::{Task, TaskCounts, TaskList, now_millis};

pub const DEFAULT_LIST_NAME: &str = "My Tasks";
pub const NEW_LIST_NAME: &str = "Untitled";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Name of the list synthesized when a store has none.
    pub default_list_name: String,
    /// Name used by `create_list` when given a blank one.
    pub new_list_name: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_list_name: DEFAULT_LIST_NAME.to_string(),
            new_list_name: NEW_LIST_NAME.to_string(),
        }
    }
}

/// Why an operation was refused. Refusals never change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    Undetermined,
    EmptyName,
    EmptyTitle,
    LastList,
    NoActiveList,
    UnknownList,
    UnknownTask,
}

impl Display for Refusal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undetermined => write!(f, "not signed in and not in guest mode"),
            Self::EmptyName => write!(f, "list name cannot be empty"),
            Self::EmptyTitle => write!(f, "task title cannot be empty"),
            Self::LastList => write!(f, "the last remaining list cannot be deleted"),
            Self::NoActiveList => write!(f, "no list is selected"),
            Self::UnknownList => write!(f, "list not found"),
            Self::UnknownTask => write!(f, "task not found"),
        }
    }
}

impl Error for Refusal {}

fn refused<T>(refusal: Refusal) -> Result<T, Refusal> {
    debug!(%refusal, "operation refused");
    Err(refusal)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSummary {
    pub list: TaskList,
    pub counts: TaskCounts,
}

/// Counts a remote write as in flight for as long as it is alive.
struct SavingGuard(Option<Arc<AtomicUsize>>);

impl SavingGuard {
    fn new(kind: StoreKind, counter: &Arc<AtomicUsize>) -> Self {
        if kind != StoreKind::Remote {
            return Self(None);
        }
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Some(counter.clone()))
    }
}

impl Drop for SavingGuard {
    fn drop(&mut self) {
        if let Some(counter) = self.0.take() {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Dispatched writes, applied one after another in dispatch order: each
/// write awaits the one issued before it, so two writes never target the
/// same record at once. The tail handle is detached rather than aborted when
/// the tracker is dropped.
struct WriteTracker {
    runtime: Handle,
    tail: Option<JoinHandle<()>>,
    remote_in_flight: Arc<AtomicUsize>,
}

impl WriteTracker {
    fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tail: None,
            remote_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn spawn<F>(&mut self, kind: StoreKind, op: &'static str, write: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let guard = SavingGuard::new(kind, &self.remote_in_flight);
        let previous = self.tail.take();
        self.tail = Some(self.runtime.spawn(async move {
            let _guard = guard;
            if let Some(previous) = previous
                && let Err(err) = previous.await
            {
                error!(error = %err, "earlier write task aborted");
            }
            if let Err(err) = write.await {
                error!(op, %kind, error = %format!("{err:#}"), "durable write failed; keeping in-memory state");
            }
        }));
    }

    async fn settle(&mut self) {
        if let Some(tail) = self.tail.take()
            && let Err(err) = tail.await
        {
            error!(error = %err, "write task aborted");
        }
    }

    fn remote_in_flight(&self) -> usize {
        self.remote_in_flight.load(Ordering::SeqCst)
    }
}

/// Owns the in-memory lists and tasks of the current mode.
///
/// Durable writes run on the tokio runtime that was current when the engine
/// was built; the synchronous operations may be called from anywhere while
/// that runtime is alive.
///
/// # Panics
///
/// `Engine::new` panics when called outside a tokio runtime.
pub struct Engine {
    settings: EngineSettings,
    resolver: ModeResolver,
    local: Arc<dyn ListStore>,
    remote: Arc<dyn OwnerStores>,
    store: Option<Arc<dyn ListStore>>,
    lists: Vec<TaskList>,
    counts: HashMap<String, TaskCounts>,
    active_list: Option<String>,
    tasks: Vec<Task>,
    filter: TaskFilter,
    writes: WriteTracker,
    last_migration: Option<MigrationReport>,
}

impl Engine {
    pub fn new(
        local: Arc<dyn ListStore>,
        remote: Arc<dyn OwnerStores>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            settings,
            resolver: ModeResolver::new(),
            local,
            remote,
            store: None,
            lists: Vec::new(),
            counts: HashMap::new(),
            active_list: None,
            tasks: Vec::new(),
            filter: TaskFilter::All,
            writes: WriteTracker::new(Handle::current()),
            last_migration: None,
        }
    }

    pub fn mode(&self) -> &Mode {
        self.resolver.mode()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn lists(&self) -> &[TaskList] {
        &self.lists
    }

    pub fn active_list_id(&self) -> Option<&str> {
        self.active_list.as_deref()
    }

    pub fn active_list(&self) -> Option<&TaskList> {
        let id = self.active_list.as_deref()?;
        self.lists.iter().find(|list| list.id == id)
    }

    /// Tasks of the active list in insertion order, newest first.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn filter(&self) -> TaskFilter {
        self.filter
    }

    pub fn filtered_tasks(&self) -> Vec<Task> {
        filtered_tasks(&self.tasks, self.filter)
    }

    pub fn counts(&self) -> TaskCounts {
        TaskCounts::of(&self.tasks)
    }

    pub fn active_count(&self) -> usize {
        self.counts().active
    }

    pub fn completed_count(&self) -> usize {
        self.counts().completed
    }

    pub fn list_summaries(&self) -> Vec<ListSummary> {
        self.lists
            .iter()
            .map(|list| ListSummary {
                list: list.clone(),
                counts: self.counts.get(&list.id).copied().unwrap_or_default(),
            })
            .collect()
    }

    /// True while at least one remote write has not completed.
    pub fn is_saving(&self) -> bool {
        self.writes.remote_in_flight() > 0
    }

    pub fn last_migration(&self) -> Option<&MigrationReport> {
        self.last_migration.as_ref()
    }

    /// Waits for every dispatched write to finish.
    pub async fn settle(&mut self) {
        self.writes.settle().await;
    }

    pub async fn sync_identity(&mut self, state: &IdentityState) -> Option<Transition> {
        let event = state.as_event()?;
        self.apply_identity(event).await
    }

    pub async fn continue_as_guest(&mut self) -> Option<Transition> {
        self.apply_identity(IdentityEvent::ContinueAsGuest).await
    }

    #[instrument(skip(self))]
    pub async fn apply_identity(&mut self, event: IdentityEvent) -> Option<Transition> {
        let transition = self.resolver.apply(event)?;

        match transition.effect {
            Effect::Reset => {
                self.reset();
                self.store = None;
            }
            Effect::Load => {
                self.reset();
                self.store = self.store_for(&transition.to);
                self.load_lists().await;
            }
            Effect::Migrate => {
                self.writes.settle().await;
                self.reset();
                self.store = self.store_for(&transition.to);
                if let Some(remote) = self.store.clone() {
                    let report = MigrationCoordinator::new(
                        self.local.clone(),
                        remote,
                        self.settings.default_list_name.clone(),
                    )
                    .run(now_millis())
                    .await;
                    self.last_migration = Some(report);
                }
                self.load_lists().await;
            }
        }

        Some(transition)
    }

    /// Replaces the lists with the store's, creating a default list when
    /// there is none. Failure leaves an empty collection.
    pub async fn load_lists(&mut self) -> &[TaskList] {
        let Some(store) = self.store.clone() else {
            self.lists.clear();
            return &self.lists;
        };
        self.writes.settle().await;

        self.lists =
            match ensure_lists(store.as_ref(), &self.settings.default_list_name, now_millis())
                .await
            {
                Ok(lists) => lists,
                Err(err) => {
                    error!(kind = %store.kind(), error = %format!("{err:#}"), "failed loading lists");
                    Vec::new()
                }
            };

        self.counts.clear();
        for list in &self.lists {
            match store.list_tasks(&list.id).await {
                Ok(tasks) => {
                    self.counts.insert(list.id.clone(), TaskCounts::of(&tasks));
                }
                Err(err) => {
                    error!(list_id = %list.id, error = %format!("{err:#}"), "failed counting tasks");
                }
            }
        }

        match self.active_list.clone() {
            Some(id) if self.lists.iter().any(|list| list.id == id) => {
                self.counts.insert(id, TaskCounts::of(&self.tasks));
            }
            Some(_) => self.close_list(),
            None => {}
        }

        debug!(count = self.lists.len(), "lists loaded");
        &self.lists
    }

    /// Replaces the in-memory tasks with the store's tasks for `list_id`.
    /// Failure leaves an empty collection.
    pub async fn load_tasks(&mut self, list_id: &str) -> &[Task] {
        let Some(store) = self.store.clone() else {
            self.tasks.clear();
            return &self.tasks;
        };
        self.writes.settle().await;

        self.tasks = match store.list_tasks(list_id).await {
            Ok(tasks) => tasks,
            Err(err) => {
                error!(kind = %store.kind(), error = %format!("{err:#}"), "failed loading tasks");
                Vec::new()
            }
        };
        self.counts
            .insert(list_id.to_string(), TaskCounts::of(&self.tasks));

        debug!(count = self.tasks.len(), "tasks loaded");
        &self.tasks
    }

    #[instrument(skip(self))]
    pub async fn select_list(&mut self, list_id: &str) -> Result<(), Refusal> {
        self.writable()?;
        if !self.lists.iter().any(|list| list.id == list_id) {
            return refused(Refusal::UnknownList);
        }

        self.active_list = Some(list_id.to_string());
        self.filter = TaskFilter::All;
        self.load_tasks(list_id).await;
        Ok(())
    }

    /// Back to the list overview.
    pub fn close_list(&mut self) {
        self.active_list = None;
        self.tasks.clear();
        self.filter = TaskFilter::All;
    }

    /// Creates a list and makes it the active one in the same step.
    #[instrument(skip(self))]
    pub fn create_list(&mut self, name: &str) -> Result<TaskList, Refusal> {
        self.writable()?;
        let name = match name.trim() {
            "" => self.settings.new_list_name.clone(),
            trimmed => trimmed.to_string(),
        };

        let list = TaskList::new(name, now_millis());
        self.lists.push(list.clone());
        self.counts.insert(list.id.clone(), TaskCounts::default());
        self.active_list = Some(list.id.clone());
        self.tasks.clear();
        self.filter = TaskFilter::All;
        info!(list_id = %list.id, name = %list.name, "list created");

        let saved = list.clone();
        self.persist("save_list", move |store| async move {
            store.save_list(&saved).await
        });
        Ok(list)
    }

    #[instrument(skip(self))]
    pub fn rename_list(&mut self, list_id: &str, name: &str) -> Result<(), Refusal> {
        self.writable()?;
        let name = name.trim();
        if name.is_empty() {
            return refused(Refusal::EmptyName);
        }
        let Some(list) = self.lists.iter_mut().find(|list| list.id == list_id) else {
            return refused(Refusal::UnknownList);
        };

        list.name = name.to_string();
        let saved = list.clone();
        self.persist("save_list", move |store| async move {
            store.save_list(&saved).await
        });
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete_list(&mut self, list_id: &str) -> Result<(), Refusal> {
        self.writable()?;
        let Some(idx) = self.lists.iter().position(|list| list.id == list_id) else {
            return refused(Refusal::UnknownList);
        };
        if self.lists.len() <= 1 {
            return refused(Refusal::LastList);
        }

        self.lists.remove(idx);
        self.counts.remove(list_id);
        if self.active_list.as_deref() == Some(list_id) {
            self.close_list();
        }
        info!(list_id, "list deleted");

        let list_id = list_id.to_string();
        self.persist("delete_list", move |store| async move {
            store.delete_list(&list_id).await
        });
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn add_task(&mut self, title: &str) -> Result<Task, Refusal> {
        self.writable()?;
        let list_id = self.active_list_for_write()?;
        let title = title.trim();
        if title.is_empty() {
            return refused(Refusal::EmptyTitle);
        }

        let task = Task::new(title.to_string(), now_millis());
        self.tasks.insert(0, task.clone());
        self.refresh_active_counts();
        debug!(task_id = %task.id, "task added");

        let saved = task.clone();
        self.persist("save_task", move |store| async move {
            store.save_task(&list_id, &saved).await
        });
        Ok(task)
    }

    #[instrument(skip(self))]
    pub fn toggle_complete(&mut self, task_id: &str, completed: bool) -> Result<(), Refusal> {
        self.writable()?;
        let list_id = self.active_list_for_write()?;
        let Some(task) = self.tasks.iter_mut().find(|task| task.id == task_id) else {
            return refused(Refusal::UnknownTask);
        };
        if !task.set_completed(completed, now_millis()) {
            return Ok(());
        }

        let saved = task.clone();
        self.refresh_active_counts();
        self.persist("save_task", move |store| async move {
            store.save_task(&list_id, &saved).await
        });
        Ok(())
    }

    /// Replaces the title only. Turning an emptied title into a delete is
    /// left to the caller.
    #[instrument(skip(self))]
    pub fn rename_task(&mut self, task_id: &str, title: &str) -> Result<(), Refusal> {
        self.writable()?;
        let list_id = self.active_list_for_write()?;
        let Some(task) = self.tasks.iter_mut().find(|task| task.id == task_id) else {
            return refused(Refusal::UnknownTask);
        };
        if task.title == title {
            return Ok(());
        }

        task.title = title.to_string();
        let saved = task.clone();
        self.persist("save_task", move |store| async move {
            store.save_task(&list_id, &saved).await
        });
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn remove_task(&mut self, task_id: &str) -> Result<(), Refusal> {
        self.writable()?;
        let list_id = self.active_list_for_write()?;
        let Some(idx) = self.tasks.iter().position(|task| task.id == task_id) else {
            return refused(Refusal::UnknownTask);
        };

        self.tasks.remove(idx);
        self.refresh_active_counts();

        let task_id = task_id.to_string();
        self.persist("delete_task", move |store| async move {
            store.delete_task(&list_id, &task_id).await
        });
        Ok(())
    }

    /// Drops every completed task at once, then deletes them from the store
    /// one after another. Returns how many were removed.
    #[instrument(skip(self))]
    pub async fn clear_completed(&mut self) -> Result<usize, Refusal> {
        self.writable()?;
        let list_id = self.active_list_for_write()?;
        let (removed, kept): (Vec<Task>, Vec<Task>) =
            std::mem::take(&mut self.tasks)
                .into_iter()
                .partition(|task| task.completed);
        self.tasks = kept;
        self.refresh_active_counts();

        let Some(store) = self.store.clone() else {
            return Ok(removed.len());
        };
        // Earlier saves of these tasks must land before their deletes.
        self.writes.settle().await;
        let _saving = SavingGuard::new(store.kind(), &self.writes.remote_in_flight);
        let mut failures = 0usize;
        for task in &removed {
            if let Err(err) = store.delete_task(&list_id, &task.id).await {
                error!(task_id = %task.id, error = %format!("{err:#}"), "failed deleting completed task");
                failures += 1;
            }
        }

        info!(removed = removed.len(), failures, "cleared completed tasks");
        Ok(removed.len())
    }

    pub fn set_filter(&mut self, filter: TaskFilter) {
        self.filter = filter;
    }

    fn writable(&self) -> Result<(), Refusal> {
        if self.store.is_none() {
            return refused(Refusal::Undetermined);
        }
        Ok(())
    }

    fn active_list_for_write(&self) -> Result<String, Refusal> {
        match &self.active_list {
            Some(id) => Ok(id.clone()),
            None => refused(Refusal::NoActiveList),
        }
    }

    fn refresh_active_counts(&mut self) {
        if let Some(id) = &self.active_list {
            self.counts.insert(id.clone(), TaskCounts::of(&self.tasks));
        }
    }

    fn store_for(&self, mode: &Mode) -> Option<Arc<dyn ListStore>> {
        match mode {
            Mode::Undetermined => None,
            Mode::Guest => Some(self.local.clone()),
            Mode::Authenticated(owner) => Some(self.remote.for_owner(owner)),
        }
    }

    fn reset(&mut self) {
        self.lists.clear();
        self.counts.clear();
        self.close_list();
    }

    fn persist<F, Fut>(&mut self, op: &'static str, write: F)
    where
        F: FnOnce(Arc<dyn ListStore>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let Some(store) = self.store.clone() else {
            return;
        };
        let kind = store.kind();
        self.writes.spawn(kind, op, write(store));
    }
}

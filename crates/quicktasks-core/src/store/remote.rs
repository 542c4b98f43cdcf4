use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ListStore, OwnerStores, StoreKind};
use crate::task::{Task, TaskList};

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Value,
}

/// Network-backed document database addressed by collection path and
/// document id. Deleting a document leaves its sub-collections alone.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_documents(&self, collection: &str) -> anyhow::Result<Vec<Document>>;

    async fn set_document(&self, collection: &str, id: &str, fields: Value) -> anyhow::Result<()>;

    async fn delete_document(&self, collection: &str, id: &str) -> anyhow::Result<()>;
}

pub fn lists_collection(owner_id: &str) -> String {
    format!("owners/{owner_id}/lists")
}

pub fn tasks_collection(owner_id: &str, list_id: &str) -> String {
    format!("owners/{owner_id}/lists/{list_id}/tasks")
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFields {
    name: String,
    created_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskFields {
    title: String,
    completed: bool,
    created_at: i64,
    #[serde(default)]
    completed_at: Option<i64>,
}

/// Signed-in store: one owner's lists and tasks in a [`DocumentStore`].
pub struct RemoteListStore {
    docs: Arc<dyn DocumentStore>,
    owner_id: String,
}

impl RemoteListStore {
    pub fn new(docs: Arc<dyn DocumentStore>, owner_id: impl Into<String>) -> Self {
        Self {
            docs,
            owner_id: owner_id.into(),
        }
    }
}

#[async_trait]
impl ListStore for RemoteListStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Remote
    }

    #[tracing::instrument(skip(self), fields(owner_id = %self.owner_id))]
    async fn list_lists(&self) -> anyhow::Result<Vec<TaskList>> {
        let collection = lists_collection(&self.owner_id);
        let docs = self
            .docs
            .list_documents(&collection)
            .await
            .with_context(|| format!("failed listing {collection}"))?;

        let mut lists: Vec<TaskList> = docs
            .into_iter()
            .filter_map(|doc| match serde_json::from_value::<ListFields>(doc.fields) {
                Ok(fields) => Some(TaskList {
                    id: doc.id,
                    name: fields.name,
                    created_at: fields.created_at,
                }),
                Err(err) => {
                    warn!(list_id = %doc.id, error = %err, "skipping malformed list document");
                    None
                }
            })
            .collect();
        lists.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        debug!(count = lists.len(), "loaded remote lists");
        Ok(lists)
    }

    #[tracing::instrument(skip(self, list), fields(owner_id = %self.owner_id, list_id = %list.id))]
    async fn save_list(&self, list: &TaskList) -> anyhow::Result<()> {
        let fields = serde_json::to_value(ListFields {
            name: list.name.clone(),
            created_at: list.created_at,
        })?;
        self.docs
            .set_document(&lists_collection(&self.owner_id), &list.id, fields)
            .await
    }

    #[tracing::instrument(skip(self), fields(owner_id = %self.owner_id))]
    async fn delete_list(&self, list_id: &str) -> anyhow::Result<()> {
        let collection = tasks_collection(&self.owner_id, list_id);
        let tasks = self
            .docs
            .list_documents(&collection)
            .await
            .with_context(|| format!("failed listing {collection}"))?;

        debug!(count = tasks.len(), "deleting tasks before list");
        for task in tasks {
            self.docs.delete_document(&collection, &task.id).await?;
        }

        self.docs
            .delete_document(&lists_collection(&self.owner_id), list_id)
            .await
    }

    #[tracing::instrument(skip(self), fields(owner_id = %self.owner_id))]
    async fn list_tasks(&self, list_id: &str) -> anyhow::Result<Vec<Task>> {
        let collection = tasks_collection(&self.owner_id, list_id);
        let docs = self
            .docs
            .list_documents(&collection)
            .await
            .with_context(|| format!("failed listing {collection}"))?;

        let mut tasks: Vec<Task> = docs
            .into_iter()
            .filter_map(|doc| match serde_json::from_value::<TaskFields>(doc.fields) {
                Ok(fields) => Some(Task {
                    id: doc.id,
                    title: fields.title,
                    completed: fields.completed,
                    created_at: fields.created_at,
                    // completedAt may be missing on completed documents.
                    completed_at: if fields.completed {
                        Some(fields.completed_at.unwrap_or(fields.created_at))
                    } else {
                        None
                    },
                }),
                Err(err) => {
                    warn!(task_id = %doc.id, error = %err, "skipping malformed task document");
                    None
                }
            })
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        debug!(count = tasks.len(), "loaded remote tasks");
        Ok(tasks)
    }

    #[tracing::instrument(skip(self, task), fields(owner_id = %self.owner_id, task_id = %task.id))]
    async fn save_task(&self, list_id: &str, task: &Task) -> anyhow::Result<()> {
        let fields = serde_json::to_value(TaskFields {
            title: task.title.clone(),
            completed: task.completed,
            created_at: task.created_at,
            completed_at: task.completed_at,
        })?;
        self.docs
            .set_document(&tasks_collection(&self.owner_id, list_id), &task.id, fields)
            .await
    }

    #[tracing::instrument(skip(self), fields(owner_id = %self.owner_id))]
    async fn delete_task(&self, list_id: &str, task_id: &str) -> anyhow::Result<()> {
        self.docs
            .delete_document(&tasks_collection(&self.owner_id, list_id), task_id)
            .await
    }
}

pub struct RemoteStores {
    docs: Arc<dyn DocumentStore>,
}

impl RemoteStores {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }
}

impl OwnerStores for RemoteStores {
    fn for_owner(&self, owner_id: &str) -> Arc<dyn ListStore> {
        Arc::new(RemoteListStore::new(self.docs.clone(), owner_id))
    }
}

/// In-process [`DocumentStore`] with switchable failures.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
    failing: Mutex<HashSet<String>>,
    offline: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write or delete of document `id` fail.
    pub fn fail_document(&self, id: &str) {
        self.failing.lock().insert(id.to_string());
    }

    pub fn heal_document(&self, id: &str) {
        self.failing.lock().remove(id);
    }

    /// While offline every call fails.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of successful writes and deletes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        self.collections
            .lock()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    fn check(&self, id: Option<&str>) -> anyhow::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(anyhow!("document store unavailable"));
        }
        if let Some(id) = id
            && self.failing.lock().contains(id)
        {
            return Err(anyhow!("write rejected for document {id}"));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list_documents(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
        self.check(None)?;
        Ok(self
            .collections
            .lock()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set_document(&self, collection: &str, id: &str, fields: Value) -> anyhow::Result<()> {
        self.check(Some(id))?;
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> anyhow::Result<()> {
        self.check(Some(id))?;
        if let Some(docs) = self.collections.lock().get_mut(collection) {
            docs.remove(id);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

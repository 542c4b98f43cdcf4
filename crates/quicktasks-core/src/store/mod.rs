//! Storage capability shared by the guest and signed-in backends.
//!
//! The engine only ever talks to [`ListStore`]; which implementation sits
//! behind it is decided by the current mode.

pub mod local;
pub mod remote;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::task::{Task, TaskList};

pub use local::{KeyValueStore, LocalListStore, MemoryKeyValueStore};
pub use remote::{Document, DocumentStore, MemoryDocumentStore, RemoteListStore, RemoteStores};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Local,
    Remote,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Local => f.write_str("local"),
            StoreKind::Remote => f.write_str("remote"),
        }
    }
}

#[async_trait]
pub trait ListStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    async fn list_lists(&self) -> anyhow::Result<Vec<TaskList>>;

    async fn save_list(&self, list: &TaskList) -> anyhow::Result<()>;

    /// Removes the list and every task under it.
    async fn delete_list(&self, list_id: &str) -> anyhow::Result<()>;

    async fn list_tasks(&self, list_id: &str) -> anyhow::Result<Vec<Task>>;

    async fn save_task(&self, list_id: &str, task: &Task) -> anyhow::Result<()>;

    async fn delete_task(&self, list_id: &str, task_id: &str) -> anyhow::Result<()>;
}

/// Hands out the remote store scoped to one owner.
pub trait OwnerStores: Send + Sync {
    fn for_owner(&self, owner_id: &str) -> Arc<dyn ListStore>;
}

/// Loads the store's lists, creating a default one when there are none.
#[tracing::instrument(skip(store), fields(kind = %store.kind()))]
pub async fn ensure_lists(
    store: &dyn ListStore,
    default_name: &str,
    now: i64,
) -> anyhow::Result<Vec<TaskList>> {
    let lists = store.list_lists().await?;
    if !lists.is_empty() {
        return Ok(lists);
    }

    let list = TaskList::new(default_name.to_string(), now);
    info!(list_id = %list.id, name = %list.name, "creating default list");
    store.save_list(&list).await?;
    Ok(vec![list])
}

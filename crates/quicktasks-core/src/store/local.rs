use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use super::{ListStore, StoreKind};
use crate::task::{Task, TaskList};

pub const TASKS_KEY: &str = "quicktasks_todos";
pub const LISTS_KEY: &str = "quicktasks_lists";

/// Synchronous string-keyed storage in the shape of a browser's
/// `localStorage`.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()>;

    fn remove_item(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> anyhow::Result<()> {
        self.items.lock().remove(key);
        Ok(())
    }
}

type TaskMap = BTreeMap<String, Vec<Task>>;

/// Guest-mode store: every list and task lives under two keys of a
/// [`KeyValueStore`], not namespaced by owner.
pub struct LocalListStore {
    kv: Arc<dyn KeyValueStore>,
    // Serializes read-modify-write cycles on the two keys.
    write_lock: Mutex<()>,
}

impl LocalListStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    fn read_lists(&self) -> Vec<TaskList> {
        read_key(self.kv.as_ref(), LISTS_KEY)
    }

    fn read_tasks(&self) -> TaskMap {
        read_key(self.kv.as_ref(), TASKS_KEY)
    }

    fn modify_lists(&self, f: impl FnOnce(&mut Vec<TaskList>)) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock();
        let mut lists = self.read_lists();
        f(&mut lists);
        write_key(self.kv.as_ref(), LISTS_KEY, &lists)
    }

    fn modify_tasks(&self, f: impl FnOnce(&mut TaskMap)) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock();
        let mut tasks = self.read_tasks();
        f(&mut tasks);
        write_key(self.kv.as_ref(), TASKS_KEY, &tasks)
    }
}

#[async_trait]
impl ListStore for LocalListStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Local
    }

    async fn list_lists(&self) -> anyhow::Result<Vec<TaskList>> {
        Ok(self.read_lists())
    }

    #[tracing::instrument(skip(self, list), fields(list_id = %list.id))]
    async fn save_list(&self, list: &TaskList) -> anyhow::Result<()> {
        self.modify_lists(|lists| {
            match lists.iter_mut().find(|existing| existing.id == list.id) {
                Some(existing) => *existing = list.clone(),
                None => lists.push(list.clone()),
            }
        })
    }

    #[tracing::instrument(skip(self))]
    async fn delete_list(&self, list_id: &str) -> anyhow::Result<()> {
        self.modify_tasks(|tasks| {
            tasks.remove(list_id);
        })?;
        self.modify_lists(|lists| lists.retain(|list| list.id != list_id))
    }

    async fn list_tasks(&self, list_id: &str) -> anyhow::Result<Vec<Task>> {
        Ok(self.read_tasks().remove(list_id).unwrap_or_default())
    }

    #[tracing::instrument(skip(self, task), fields(task_id = %task.id))]
    async fn save_task(&self, list_id: &str, task: &Task) -> anyhow::Result<()> {
        self.modify_tasks(|tasks| {
            let entries = tasks.entry(list_id.to_string()).or_default();
            match entries.iter_mut().find(|existing| existing.id == task.id) {
                Some(existing) => *existing = task.clone(),
                None => entries.insert(0, task.clone()),
            }
        })
    }

    #[tracing::instrument(skip(self))]
    async fn delete_task(&self, list_id: &str, task_id: &str) -> anyhow::Result<()> {
        self.modify_tasks(|tasks| {
            if let Some(entries) = tasks.get_mut(list_id) {
                entries.retain(|task| task.id != task_id);
            }
        })
    }
}

/// Missing keys and unreadable values both read as empty; a corrupt value
/// is logged and will be overwritten by the next write.
fn read_key<T: DeserializeOwned + Default>(kv: &dyn KeyValueStore, key: &str) -> T {
    let raw = match kv.get_item(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return T::default(),
        Err(err) => {
            error!(key, error = %err, "failed reading local storage");
            return T::default();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            error!(key, error = %err, "failed parsing local storage value");
            T::default()
        }
    }
}

fn write_key<T: Serialize>(kv: &dyn KeyValueStore, key: &str, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string(value)
        .with_context(|| format!("failed serializing {key}"))?;
    debug!(key, bytes = json.len(), "writing local storage");
    kv.set_item(key, &json)
        .with_context(|| format!("failed writing {key}"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{KeyValueStore, LISTS_KEY, LocalListStore, MemoryKeyValueStore, TASKS_KEY};
    use crate::store::ListStore;
    use crate::task::{Task, TaskList};

    fn store() -> (Arc<MemoryKeyValueStore>, LocalListStore) {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = LocalListStore::new(kv.clone());
        (kv, store)
    }

    #[tokio::test]
    async fn tasks_are_namespaced_by_list_newest_first() {
        let (_kv, store) = store();
        let first = Task::new("first".to_string(), 1);
        let second = Task::new("second".to_string(), 2);
        let other = Task::new("other".to_string(), 3);

        store.save_task("a", &first).await.expect("save first");
        store.save_task("a", &second).await.expect("save second");
        store.save_task("b", &other).await.expect("save other");

        let titles: Vec<String> = store
            .list_tasks("a")
            .await
            .expect("list a")
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, ["second", "first"]);
        assert_eq!(store.list_tasks("b").await.expect("list b").len(), 1);
    }

    #[tokio::test]
    async fn saving_an_existing_task_updates_in_place() {
        let (_kv, store) = store();
        let mut task = Task::new("draft".to_string(), 1);
        let newer = Task::new("newer".to_string(), 2);
        store.save_task("a", &task).await.expect("save");
        store.save_task("a", &newer).await.expect("save newer");

        task.title = "final".to_string();
        store.save_task("a", &task).await.expect("update");

        let tasks = store.list_tasks("a").await.expect("list");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].title, "final");
    }

    #[tokio::test]
    async fn deleting_a_list_drops_its_tasks() {
        let (kv, store) = store();
        let list = TaskList::new("Groceries".to_string(), 1);
        store.save_list(&list).await.expect("save list");
        store
            .save_task(&list.id, &Task::new("milk".to_string(), 2))
            .await
            .expect("save task");

        store.delete_list(&list.id).await.expect("delete list");

        assert!(store.list_lists().await.expect("lists").is_empty());
        assert!(store.list_tasks(&list.id).await.expect("tasks").is_empty());
        assert_eq!(
            kv.get_item(TASKS_KEY).expect("read").as_deref(),
            Some("{}")
        );
    }

    #[tokio::test]
    async fn corrupt_values_read_as_empty() {
        let (kv, store) = store();
        kv.set_item(LISTS_KEY, "not json").expect("seed");

        assert!(store.list_lists().await.expect("lists").is_empty());

        let list = TaskList::new("Fresh".to_string(), 1);
        store.save_list(&list).await.expect("save list");
        assert_eq!(store.list_lists().await.expect("lists"), vec![list]);
    }

    #[tokio::test]
    async fn stored_values_use_camel_case_json() {
        let (kv, store) = store();
        let mut list = TaskList::new("Inbox".to_string(), 1);
        list.id = "inbox".to_string();
        store.save_list(&list).await.expect("save list");

        let mut task = Task::new("t".to_string(), 2);
        task.id = "t1".to_string();
        store.save_task("inbox", &task).await.expect("save task");

        assert_eq!(
            kv.get_item(LISTS_KEY).expect("read").as_deref(),
            Some(r#"[{"id":"inbox","name":"Inbox","createdAt":1}]"#)
        );
        assert_eq!(
            kv.get_item(TASKS_KEY).expect("read").as_deref(),
            Some(r#"{"inbox":[{"id":"t1","title":"t","completed":false,"createdAt":2}]}"#)
        );
    }
}

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::store::{Document, DocumentStore, KeyValueStore};

/// On-disk home of both backends: `local/` holds the guest key-value
/// files, `remote/` the signed-in document tree.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub local_dir: PathBuf,
    pub remote_dir: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        let local_dir = data_dir.join("local");
        let remote_dir = data_dir.join("remote");

        for dir in [&data_dir, &local_dir, &remote_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        info!(
            data_dir = %data_dir.display(),
            local = %local_dir.display(),
            remote = %remote_dir.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            local_dir,
            remote_dir,
        })
    }

    pub fn key_value(&self) -> Arc<FileKeyValueStore> {
        Arc::new(FileKeyValueStore::new(&self.local_dir))
    }

    pub fn documents(&self) -> Arc<FileDocumentStore> {
        Arc::new(FileDocumentStore::new(&self.remote_dir))
    }
}

/// One file per key: `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        check_segment(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Some(raw))
    }

    fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        write_atomic(&path, value.as_bytes())
    }

    fn remove_item(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed removing {}", path.display()))?;
        }
        Ok(())
    }
}

/// Document tree on disk: `<root>/<collection>/<id>.json`.
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn collection_dir(&self, collection: &str) -> anyhow::Result<PathBuf> {
        let mut dir = self.root.clone();
        for segment in collection.split('/') {
            check_segment(segment)?;
            dir.push(segment);
        }
        Ok(dir)
    }

    fn document_path(&self, collection: &str, id: &str) -> anyhow::Result<PathBuf> {
        check_segment(id)?;
        Ok(self.collection_dir(collection)?.join(format!("{id}.json")))
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    #[tracing::instrument(skip(self))]
    async fn list_documents(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
        let dir = self.collection_dir(collection)?;
        tokio::task::spawn_blocking(move || read_documents(&dir)).await?
    }

    #[tracing::instrument(skip(self, fields))]
    async fn set_document(&self, collection: &str, id: &str, fields: Value) -> anyhow::Result<()> {
        let path = self.document_path(collection, id)?;
        let payload = serde_json::to_vec(&fields)?;
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            write_atomic(&path, &payload)
        })
        .await?
    }

    #[tracing::instrument(skip(self))]
    async fn delete_document(&self, collection: &str, id: &str) -> anyhow::Result<()> {
        let path = self.document_path(collection, id)?;
        tokio::task::spawn_blocking(move || {
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed removing {}", path.display()))?;
            }
            Ok::<(), anyhow::Error>(())
        })
        .await?
    }
}

fn check_segment(segment: &str) -> anyhow::Result<()> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\'])
    {
        return Err(anyhow!("invalid storage path segment: {segment:?}"));
    }
    Ok(())
}

fn read_documents(dir: &Path) -> anyhow::Result<Vec<Document>> {
    debug!(dir = %dir.display(), "reading collection");
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let fields: Value = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", path.display()))?;
        out.push(Document {
            id: id.to_string(),
            fields,
        });
    }

    out.sort_by(|a, b| a.id.cmp(&b.id));
    debug!(count = out.len(), "read collection");
    Ok(out)
}

#[tracing::instrument(skip(path, payload))]
fn write_atomic(path: &Path, payload: &[u8]) -> anyhow::Result<()> {
    debug!(file = %path.display(), bytes = payload.len(), "writing atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(payload)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::DataStore;
    use crate::store::{DocumentStore, KeyValueStore};

    #[test]
    fn key_value_files_survive_reopen() {
        let temp = tempdir().expect("tempdir");
        {
            let store = DataStore::open(temp.path()).expect("open datastore");
            store
                .key_value()
                .set_item("theme", "dark")
                .expect("set item");
        }

        let store = DataStore::open(temp.path()).expect("reopen datastore");
        let kv = store.key_value();
        assert_eq!(kv.get_item("theme").expect("get"), Some("dark".to_string()));

        kv.remove_item("theme").expect("remove");
        assert_eq!(kv.get_item("theme").expect("get"), None);
        kv.remove_item("theme").expect("removing twice is fine");
    }

    #[test]
    fn rejects_path_traversal_keys() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        assert!(store.key_value().set_item("../escape", "x").is_err());
    }

    #[tokio::test]
    async fn documents_round_trip_through_the_tree() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        let docs = store.documents();

        assert!(
            docs.list_documents("owners/ana/lists")
                .await
                .expect("empty collection")
                .is_empty()
        );

        docs.set_document("owners/ana/lists", "l1", json!({ "name": "Inbox", "createdAt": 1 }))
            .await
            .expect("set");
        docs.set_document("owners/ana/lists/l1/tasks", "t1", json!({ "title": "x" }))
            .await
            .expect("set nested");

        let lists = docs
            .list_documents("owners/ana/lists")
            .await
            .expect("list");
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].id, "l1");
        assert_eq!(lists[0].fields["name"], "Inbox");

        docs.delete_document("owners/ana/lists", "l1")
            .await
            .expect("delete");
        assert!(
            docs.list_documents("owners/ana/lists")
                .await
                .expect("list after delete")
                .is_empty()
        );
        assert_eq!(
            docs.list_documents("owners/ana/lists/l1/tasks")
                .await
                .expect("sub-collection survives")
                .len(),
            1
        );
    }
}

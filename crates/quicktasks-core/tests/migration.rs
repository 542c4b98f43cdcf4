use std::sync::Arc;

use quicktasks_core::engine::{Engine, EngineSettings};
use quicktasks_core::identity::IdentityState;
use quicktasks_core::migration::MigrationCoordinator;
use quicktasks_core::mode::{Effect, Mode};
use quicktasks_core::store::{
    KeyValueStore, ListStore, LocalListStore, MemoryDocumentStore, MemoryKeyValueStore,
    RemoteListStore, RemoteStores,
};
use quicktasks_core::task::{Task, TaskList};

struct Fixture {
    kv: Arc<MemoryKeyValueStore>,
    docs: Arc<MemoryDocumentStore>,
    engine: Engine,
}

impl Fixture {
    fn new() -> Self {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let docs = Arc::new(MemoryDocumentStore::new());
        let local: Arc<dyn KeyValueStore> = kv.clone();
        let engine = Engine::new(
            Arc::new(LocalListStore::new(local)),
            Arc::new(RemoteStores::new(docs.clone())),
            EngineSettings::default(),
        );
        Self { kv, docs, engine }
    }

    fn local(&self) -> LocalListStore {
        let kv: Arc<dyn KeyValueStore> = self.kv.clone();
        LocalListStore::new(kv)
    }

    fn remote(&self, owner: &str) -> RemoteListStore {
        RemoteListStore::new(self.docs.clone(), owner)
    }

    async fn sign_in(&mut self, owner: &str) -> Option<Effect> {
        self.engine
            .sync_identity(&IdentityState::SignedIn(owner.to_string()))
            .await
            .map(|transition| transition.effect)
    }
}

async fn local_task_count(store: &LocalListStore) -> usize {
    let mut total = 0;
    for list in store.list_lists().await.expect("local lists") {
        total += store.list_tasks(&list.id).await.expect("local tasks").len();
    }
    total
}

async fn remote_titles(store: &RemoteListStore, list_id: &str) -> Vec<String> {
    let mut titles: Vec<String> = store
        .list_tasks(list_id)
        .await
        .expect("remote tasks")
        .into_iter()
        .map(|task| task.title)
        .collect();
    titles.sort();
    titles
}

#[tokio::test]
async fn guest_tasks_move_into_the_owners_default_list() {
    let mut fx = Fixture::new();
    fx.engine.continue_as_guest().await.expect("guest");
    let list_id = fx.engine.lists()[0].id.clone();
    fx.engine.select_list(&list_id).await.expect("select");
    fx.engine.add_task("X").expect("add X");
    fx.engine.add_task("Y").expect("add Y");

    assert_eq!(fx.sign_in("ana").await, Some(Effect::Migrate));

    let report = fx.engine.last_migration().expect("report").clone();
    assert!(report.is_complete());
    assert!(report.local_cleared);
    assert_eq!(report.tasks_copied, 2);
    assert_eq!(report.lists_created, 0);

    assert_eq!(fx.engine.mode(), &Mode::Authenticated("ana".to_string()));
    assert_eq!(fx.engine.lists().len(), 1);
    assert_eq!(fx.engine.lists()[0].name, "My Tasks");

    let remote_list = fx.engine.lists()[0].id.clone();
    assert_eq!(remote_titles(&fx.remote("ana"), &remote_list).await, ["X", "Y"]);
    assert_eq!(local_task_count(&fx.local()).await, 0);
    assert!(fx.local().list_lists().await.expect("local lists").is_empty());

    fx.engine.select_list(&remote_list).await.expect("select remote");
    assert_eq!(fx.engine.counts().total, 2);
}

#[tokio::test]
async fn migrated_tasks_keep_their_ids_and_completion() {
    let mut fx = Fixture::new();
    fx.engine.continue_as_guest().await.expect("guest");
    let list_id = fx.engine.lists()[0].id.clone();
    fx.engine.select_list(&list_id).await.expect("select");
    let task = fx.engine.add_task("done already").expect("add");
    fx.engine.toggle_complete(&task.id, true).expect("complete");
    let local_copy = fx.engine.tasks()[0].clone();

    fx.sign_in("ana").await.expect("transition");

    let remote_list = fx.engine.lists()[0].id.clone();
    let remote_tasks = fx
        .remote("ana")
        .list_tasks(&remote_list)
        .await
        .expect("remote tasks");
    assert_eq!(remote_tasks, vec![local_copy]);
}

#[tokio::test]
async fn partial_failure_keeps_local_data_and_retries_cleanly() {
    let mut fx = Fixture::new();
    fx.engine.continue_as_guest().await.expect("guest");
    let list_id = fx.engine.lists()[0].id.clone();
    fx.engine.select_list(&list_id).await.expect("select");
    let x = fx.engine.add_task("X").expect("add X");
    fx.engine.add_task("Y").expect("add Y");

    fx.docs.fail_document(&x.id);
    assert_eq!(fx.sign_in("ana").await, Some(Effect::Migrate));

    let report = fx.engine.last_migration().expect("report").clone();
    assert_eq!(report.failures, 1);
    assert_eq!(report.tasks_copied, 1);
    assert!(!report.local_cleared);
    assert_eq!(local_task_count(&fx.local()).await, 2);

    let remote_list = fx.engine.lists()[0].id.clone();
    assert_eq!(remote_titles(&fx.remote("ana"), &remote_list).await, ["Y"]);

    fx.engine
        .sync_identity(&IdentityState::SignedOut)
        .await
        .expect("sign out");
    fx.engine.continue_as_guest().await.expect("guest again");
    let guest_list = fx.engine.lists()[0].id.clone();
    fx.engine.select_list(&guest_list).await.expect("select");
    assert_eq!(fx.engine.tasks().len(), 2);

    fx.docs.heal_document(&x.id);
    assert_eq!(fx.sign_in("ana").await, Some(Effect::Migrate));

    let retry = fx.engine.last_migration().expect("report").clone();
    assert!(retry.is_complete());
    assert!(retry.local_cleared);
    assert_eq!(fx.engine.lists().len(), 1);
    assert_eq!(remote_titles(&fx.remote("ana"), &remote_list).await, ["X", "Y"]);
    assert_eq!(local_task_count(&fx.local()).await, 0);
}

#[tokio::test]
async fn several_guest_lists_each_become_owner_lists() {
    let mut fx = Fixture::new();
    fx.engine.continue_as_guest().await.expect("guest");
    let inbox = fx.engine.lists()[0].id.clone();
    fx.engine.select_list(&inbox).await.expect("select");
    fx.engine.add_task("inbox item").expect("add");
    let work = fx.engine.create_list("Work").expect("create");
    fx.engine.add_task("report").expect("add");
    fx.engine.add_task("slides").expect("add");

    assert_eq!(fx.sign_in("ana").await, Some(Effect::Migrate));

    let report = fx.engine.last_migration().expect("report").clone();
    assert!(report.is_complete());
    assert_eq!(report.lists_created, 2);
    assert_eq!(report.tasks_copied, 3);

    let mut names: Vec<String> = fx
        .engine
        .lists()
        .iter()
        .map(|list| list.name.clone())
        .collect();
    names.sort();
    assert_eq!(names, ["My Tasks", "Work"]);
    assert!(fx.engine.lists().iter().any(|list| list.id == work.id));
    assert_eq!(
        remote_titles(&fx.remote("ana"), &work.id).await,
        ["report", "slides"]
    );

    let summaries = fx.engine.list_summaries();
    let total: usize = summaries.iter().map(|summary| summary.counts.total).sum();
    assert_eq!(total, 3);
}

#[tokio::test]
async fn clashing_list_ids_get_a_fresh_id() {
    let docs = Arc::new(MemoryDocumentStore::new());
    let kv = Arc::new(MemoryKeyValueStore::new());
    let local_kv: Arc<dyn KeyValueStore> = kv.clone();
    let local = Arc::new(LocalListStore::new(local_kv));
    let remote = Arc::new(RemoteListStore::new(docs.clone(), "ana"));

    let existing = TaskList {
        id: "shared".to_string(),
        name: "Existing".to_string(),
        created_at: 1,
    };
    remote.save_list(&existing).await.expect("seed remote");

    let clashing = TaskList {
        id: "shared".to_string(),
        name: "Guest".to_string(),
        created_at: 2,
    };
    let other = TaskList::new("Other".to_string(), 3);
    local.save_list(&clashing).await.expect("seed local");
    local.save_list(&other).await.expect("seed local");
    let mine = Task::new("mine".to_string(), 4);
    let stuck = Task::new("stuck".to_string(), 5);
    local.save_task(&clashing.id, &mine).await.expect("seed task");
    local.save_task(&clashing.id, &stuck).await.expect("seed task");

    docs.fail_document(&stuck.id);
    let report = MigrationCoordinator::new(local.clone(), remote.clone(), "My Tasks")
        .run(10)
        .await;
    assert_eq!(report.failures, 1);
    assert_eq!(report.lists_created, 2);
    assert!(!report.local_cleared);

    let first_pass = remote.list_lists().await.expect("remote lists");
    let guest_id = first_pass
        .iter()
        .find(|list| list.name == "Guest")
        .expect("guest list")
        .id
        .clone();
    assert_ne!(guest_id, "shared");

    docs.heal_document(&stuck.id);
    let retry = MigrationCoordinator::new(local.clone(), remote.clone(), "My Tasks")
        .run(10)
        .await;
    assert!(retry.is_complete());
    assert!(retry.local_cleared);
    assert_eq!(retry.lists_created, 0);

    let lists = remote.list_lists().await.expect("remote lists");
    assert_eq!(lists.len(), 3);
    let existing_after = lists
        .iter()
        .find(|list| list.id == "shared")
        .expect("existing list");
    assert_eq!(existing_after.name, "Existing");
    assert!(remote.list_tasks("shared").await.expect("tasks").is_empty());

    let guests: Vec<&TaskList> = lists.iter().filter(|list| list.name == "Guest").collect();
    assert_eq!(guests.len(), 1);
    assert_eq!(guests[0].id, guest_id);
    assert_eq!(remote_titles(&remote, &guest_id).await, ["mine", "stuck"]);
}

#[tokio::test]
async fn repeated_sign_in_does_not_migrate_again() {
    let mut fx = Fixture::new();
    fx.engine.continue_as_guest().await.expect("guest");
    let list_id = fx.engine.lists()[0].id.clone();
    fx.engine.select_list(&list_id).await.expect("select");
    fx.engine.add_task("X").expect("add");

    assert_eq!(fx.sign_in("ana").await, Some(Effect::Migrate));
    let writes = fx.docs.write_count();

    assert_eq!(fx.sign_in("ana").await, None);
    assert_eq!(fx.docs.write_count(), writes);
}

#[tokio::test]
async fn plain_sign_in_leaves_guest_data_alone() {
    let mut fx = Fixture::new();
    let local = fx.local();
    let list = TaskList::new("Guest".to_string(), 1);
    local.save_list(&list).await.expect("seed");
    local
        .save_task(&list.id, &Task::new("stays".to_string(), 2))
        .await
        .expect("seed");

    assert_eq!(fx.sign_in("ana").await, Some(Effect::Load));
    assert!(fx.engine.last_migration().is_none());
    assert_eq!(local_task_count(&fx.local()).await, 1);
    assert_eq!(fx.engine.lists().len(), 1);
    assert_eq!(fx.engine.lists()[0].name, "My Tasks");
}

//! One-shot copy of guest data into a newly signed-in owner's store.
//!
//! # Invariants
//! - Writes are issued one at a time and each is awaited before the next.
//! - The local store is cleared only when every write succeeded.
//! - Task ids are preserved and remote saves are upserts, so running the
//!   copy again after a partial failure does not duplicate anything. A guest
//!   list whose id is already taken remotely moves to an id derived from the
//!   list, which is the same on every run.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::store::{ListStore, ensure_lists};
use crate::task::{Task, TaskList};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub lists_created: usize,
    pub tasks_copied: usize,
    pub failures: usize,
    pub local_cleared: bool,
}

impl MigrationReport {
    pub fn is_complete(&self) -> bool {
        self.failures == 0
    }
}

pub struct MigrationCoordinator {
    local: Arc<dyn ListStore>,
    remote: Arc<dyn ListStore>,
    default_list_name: String,
}

impl MigrationCoordinator {
    pub fn new(
        local: Arc<dyn ListStore>,
        remote: Arc<dyn ListStore>,
        default_list_name: impl Into<String>,
    ) -> Self {
        Self {
            local,
            remote,
            default_list_name: default_list_name.into(),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self, now: i64) -> MigrationReport {
        let mut report = MigrationReport::default();

        let sources = match self.read_local(&mut report).await {
            Some(sources) => sources,
            None => return report,
        };
        let task_total: usize = sources.iter().map(|(_, tasks)| tasks.len()).sum();
        info!(lists = sources.len(), tasks = task_total, "starting guest migration");

        if task_total == 0 && sources.len() <= 1 {
            debug!("no guest data worth migrating");
        } else if sources.len() == 1 {
            self.merge_into_first_list(&sources[0].1, now, &mut report)
                .await;
        } else {
            self.copy_lists(&sources, &mut report).await;
        }

        if report.is_complete() {
            report.local_cleared = self.clear_local(&sources).await;
        } else {
            warn!(
                failures = report.failures,
                "guest migration incomplete; keeping local data for the next sign-in"
            );
        }

        info!(
            lists_created = report.lists_created,
            tasks_copied = report.tasks_copied,
            failures = report.failures,
            local_cleared = report.local_cleared,
            "guest migration finished"
        );
        report
    }

    async fn read_local(&self, report: &mut MigrationReport) -> Option<Vec<(TaskList, Vec<Task>)>> {
        let lists = match self.local.list_lists().await {
            Ok(lists) => lists,
            Err(err) => {
                error!(error = %format!("{err:#}"), "failed reading guest lists");
                report.failures += 1;
                return None;
            }
        };

        let mut sources = Vec::with_capacity(lists.len());
        for list in lists {
            match self.local.list_tasks(&list.id).await {
                Ok(tasks) => sources.push((list, tasks)),
                Err(err) => {
                    error!(list_id = %list.id, error = %format!("{err:#}"), "failed reading guest tasks");
                    report.failures += 1;
                }
            }
        }
        Some(sources)
    }

    /// Single guest list: its tasks join the owner's first list.
    async fn merge_into_first_list(&self, tasks: &[Task], now: i64, report: &mut MigrationReport) {
        let remote_lists =
            match ensure_lists(self.remote.as_ref(), &self.default_list_name, now).await {
                Ok(lists) => lists,
                Err(err) => {
                    error!(error = %format!("{err:#}"), "failed loading owner lists");
                    report.failures += 1;
                    return;
                }
            };
        let Some(destination) = remote_lists.first() else {
            report.failures += 1;
            return;
        };

        self.copy_tasks(&destination.id, tasks, report).await;
    }

    /// Several guest lists: each becomes an owner list of its own.
    async fn copy_lists(&self, sources: &[(TaskList, Vec<Task>)], report: &mut MigrationReport) {
        let remote_lists = match self.remote.list_lists().await {
            Ok(lists) => lists,
            Err(err) => {
                error!(error = %format!("{err:#}"), "failed loading owner lists");
                report.failures += 1;
                return;
            }
        };

        for (list, tasks) in sources {
            let destination = match remote_lists.iter().find(|remote| remote.id == list.id) {
                // Left behind by an earlier, partially failed migration.
                Some(existing) if existing.created_at == list.created_at => existing.clone(),
                Some(_) => TaskList {
                    id: relocated_id(list),
                    ..list.clone()
                },
                None => list.clone(),
            };

            let is_new = !remote_lists.iter().any(|remote| remote.id == destination.id);
            if is_new {
                if let Err(err) = self.remote.save_list(&destination).await {
                    error!(list_id = %destination.id, error = %format!("{err:#}"), "failed copying list");
                    report.failures += 1;
                    continue;
                }
                report.lists_created += 1;
            }

            self.copy_tasks(&destination.id, tasks, report).await;
        }
    }

    async fn copy_tasks(&self, list_id: &str, tasks: &[Task], report: &mut MigrationReport) {
        for task in tasks {
            match self.remote.save_task(list_id, task).await {
                Ok(()) => report.tasks_copied += 1,
                Err(err) => {
                    error!(
                        list_id,
                        task_id = %task.id,
                        error = %format!("{err:#}"),
                        "failed copying task"
                    );
                    report.failures += 1;
                }
            }
        }
    }

    async fn clear_local(&self, sources: &[(TaskList, Vec<Task>)]) -> bool {
        let mut cleared = true;
        for (list, _) in sources {
            if let Err(err) = self.local.delete_list(&list.id).await {
                error!(list_id = %list.id, error = %format!("{err:#}"), "failed clearing guest list");
                cleared = false;
            }
        }
        cleared
    }
}

/// Id for a guest list whose own id is taken on the remote side. Derived
/// from the list itself so every retry lands on the same remote list.
fn relocated_id(list: &TaskList) -> String {
    let seed = format!("{}:{}", list.id, list.created_at);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string()
}

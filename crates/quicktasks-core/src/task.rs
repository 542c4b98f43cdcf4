use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milliseconds since the Unix epoch, the unit every stored timestamp uses.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn mint_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    pub title: String,

    pub completed: bool,

    pub created_at: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

impl Task {
    pub fn new(title: String, now: i64) -> Self {
        Self {
            id: mint_id(),
            title,
            completed: false,
            created_at: now,
            completed_at: None,
        }
    }

    /// Sets `completed`, stamping or clearing `completed_at` with it.
    ///
    /// Returns `false` and leaves the task untouched when it is already in
    /// the requested state.
    pub fn set_completed(&mut self, completed: bool, now: i64) -> bool {
        if self.completed == completed {
            return false;
        }
        self.completed = completed;
        self.completed_at = completed.then_some(now);
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskList {
    pub id: String,

    pub name: String,

    pub created_at: i64,
}

impl TaskList {
    pub fn new(name: String, now: i64) -> Self {
        Self {
            id: mint_id(),
            name,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
}

impl TaskCounts {
    pub fn of(tasks: &[Task]) -> Self {
        let completed = tasks.iter().filter(|task| task.completed).count();
        Self {
            total: tasks.len(),
            active: tasks.len() - completed,
            completed,
        }
    }
}

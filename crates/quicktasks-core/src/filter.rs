use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

use crate::task::Task;

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
)]
pub enum TaskFilter {
  #[default]
  All,
  Active,
  Completed
}

impl TaskFilter {
  pub fn matches(
    self,
    task: &Task
  ) -> bool {
    match self {
      | TaskFilter::All => true,
      | TaskFilter::Active => {
        !task.completed
      }
      | TaskFilter::Completed => {
        task.completed
      }
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      | TaskFilter::All => "all",
      | TaskFilter::Active => "active",
      | TaskFilter::Completed => {
        "completed"
      }
    }
  }
}

impl fmt::Display for TaskFilter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" => Ok(TaskFilter::All),
      | "active" | "pending" => {
        Ok(TaskFilter::Active)
      }
      | "completed" | "done" => {
        Ok(TaskFilter::Completed)
      }
      | other => Err(anyhow!(
        "unknown filter: {other} \
         (expected all, active or \
         completed)"
      ))
    }
  }
}

/// Display order: incomplete tasks
/// first, newest `created_at` first;
/// then completed tasks, newest
/// `completed_at` first. Ties fall
/// back to the id so the order is
/// total.
pub fn view_order(
  a: &Task,
  b: &Task
) -> Ordering {
  match (a.completed, b.completed) {
    | (false, true) => Ordering::Less,
    | (true, false) => {
      Ordering::Greater
    }
    | (true, true) => b
      .completed_at
      .unwrap_or(0)
      .cmp(&a.completed_at.unwrap_or(0))
      .then_with(|| a.id.cmp(&b.id)),
    | (false, false) => b
      .created_at
      .cmp(&a.created_at)
      .then_with(|| a.id.cmp(&b.id))
  }
}

pub fn filtered_tasks(
  tasks: &[Task],
  filter: TaskFilter
) -> Vec<Task> {
  let mut out: Vec<Task> = tasks
    .iter()
    .filter(|task| filter.matches(task))
    .cloned()
    .collect();
  out.sort_by(view_order);
  out
}

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use crate::core::Result;
use crate::storage::OptionStore;

const TASK_PREFIX: &str = "task_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub payload: JsonValue,
}

/// Fire-and-forget hand-off of background work.
pub trait TaskQueue: Send + Sync {
    fn enqueue(&self, name: &str, payload: JsonValue) -> Result<()>;

    /// Next task in enqueue order, removed from the queue.
    fn pop(&self) -> Result<Option<Task>>;
}

/// In-process queue.
#[derive(Default)]
pub struct LocalTaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl LocalTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.tasks.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl TaskQueue for LocalTaskQueue {
    fn enqueue(&self, name: &str, payload: JsonValue) -> Result<()> {
        self.tasks.lock()?.push_back(Task {
            name: name.to_string(),
            payload,
        });
        Ok(())
    }

    fn pop(&self) -> Result<Option<Task>> {
        Ok(self.tasks.lock()?.pop_front())
    }
}

/// Queue kept in an [`OptionStore`], so a worker process can pick up tasks
/// enqueued by another process.
pub struct StoredTaskQueue {
    options: Arc<dyn OptionStore>,
}

impl StoredTaskQueue {
    pub fn new(options: Arc<dyn OptionStore>) -> Self {
        Self { options }
    }
}

impl TaskQueue for StoredTaskQueue {
    fn enqueue(&self, name: &str, payload: JsonValue) -> Result<()> {
        let now = Utc::now();
        let key = format!(
            "{}{:020}_{}",
            TASK_PREFIX,
            now.timestamp_nanos_opt().unwrap_or_default().max(0),
            name
        );
        debug!("Queued task {}", key);
        let task = Task {
            name: name.to_string(),
            payload,
        };
        self.options.set(&key, serde_json::to_value(&task)?, None)
    }

    fn pop(&self) -> Result<Option<Task>> {
        for key in self.options.keys(TASK_PREFIX)? {
            let Some(value) = self.options.get(&key)? else {
                continue;
            };
            // Another worker may have taken it in between.
            if self.options.delete(&key)? {
                return Ok(Some(serde_json::from_value(value)?));
            }
        }
        Ok(None)
    }
}

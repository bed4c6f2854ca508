use async_trait::async_trait;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::RwLock;

use super::TaskStorage;
use crate::schedule::types::Task;

/// Non-durable storage, handy for tests and throwaway instances.
#[derive(Default)]
pub struct InMemoryTaskStorage {
    records: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.records.read().ok()?.get(task_id).cloned()
    }
}

#[async_trait]
impl TaskStorage for InMemoryTaskStorage {
    async fn save(&self, task: &Task) -> Result<()> {
        let mut records = self.records.write().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        records.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn remove(&self, task_id: &str) -> Result<()> {
        let mut records = self.records.write().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        records.remove(task_id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Task>> {
        let records = self.records.read().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(records.values().cloned().collect())
    }
}

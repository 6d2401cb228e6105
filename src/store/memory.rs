//! 内存执行状态存储（默认实现，进程退出即丢失）

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ExecutionRecord, ExecutionStateStore, StoreError};

type Key = (String, String, u8);

#[derive(Debug, Default)]
pub struct InMemoryExecutionStateStore {
    records: RwLock<BTreeMap<Key, ExecutionRecord>>,
}

impl InMemoryExecutionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl ExecutionStateStore for InMemoryExecutionStateStore {
    async fn load(&self, conversation_id: &str) -> Result<Vec<ExecutionRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn upsert(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        record.check_stage()?;
        let key = (
            record.conversation_id.clone(),
            record.module.clone(),
            record.stage,
        );
        self.records.write().await.insert(key, record);
        Ok(())
    }

    async fn delete_module(&self, module: &str) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|(_, m, _), _| m != module);
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sample_record;

    #[tokio::test]
    async fn test_upsert_overwrites_same_key() {
        let store = InMemoryExecutionStateStore::new();
        store.upsert(sample_record("c", "m", 4, "calm")).await.unwrap();
        store.upsert(sample_record("c", "m", 4, "happy")).await.unwrap();
        store.upsert(sample_record("c", "m", 5, "tired")).await.unwrap();
        let records = store.load("c").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].variables["mood"], "happy");
        assert!(store.load("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_non_persisted_stage() {
        let store = InMemoryExecutionStateStore::new();
        let err = store.upsert(sample_record("c", "m", 2, "x")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidStage(2)));
    }

    #[tokio::test]
    async fn test_delete_module_across_conversations() {
        let store = InMemoryExecutionStateStore::new();
        store.upsert(sample_record("a", "m", 4, "x")).await.unwrap();
        store.upsert(sample_record("b", "m", 5, "y")).await.unwrap();
        store.upsert(sample_record("b", "keep", 4, "z")).await.unwrap();
        assert_eq!(store.delete_module("m").await.unwrap(), 2);
        assert_eq!(store.len().await, 1);
    }
}

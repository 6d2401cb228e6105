//! SQLite 执行状态存储
//!
//! rusqlite 是同步接口：连接放在 `std::sync::Mutex` 中，每次操作都移到 `spawn_blocking`。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{ExecutionMetadata, ExecutionRecord, ExecutionStateStore, StoreError};

pub struct SqliteExecutionStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteExecutionStateStore {
    /// 打开（不存在则创建）数据库文件并建表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Task(e.to_string()))?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS execution_state (
                conversation_id TEXT NOT NULL,
                module TEXT NOT NULL,
                stage INTEGER NOT NULL,
                variables TEXT NOT NULL,
                success INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                error TEXT,
                executed_at TEXT NOT NULL,
                PRIMARY KEY (conversation_id, module, stage)
            );
            CREATE INDEX IF NOT EXISTS idx_execution_state_module ON execution_state(module);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl ExecutionStateStore for SqliteExecutionStateStore {
    async fn load(&self, conversation_id: &str) -> Result<Vec<ExecutionRecord>, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT module, stage, variables, success, duration_ms, error, executed_at
                 FROM execution_state WHERE conversation_id = ?1 ORDER BY module, stage",
            )?;
            let rows = stmt.query_map(params![conversation_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u8>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, DateTime<Utc>>(6)?,
                ))
            })?;
            let mut records = Vec::new();
            for row in rows {
                let (module, stage, variables, success, duration_ms, error, executed_at) = row?;
                records.push(ExecutionRecord {
                    conversation_id: conversation_id.clone(),
                    module,
                    stage,
                    variables: serde_json::from_str(&variables)?,
                    metadata: ExecutionMetadata {
                        success,
                        duration_ms: duration_ms.max(0) as u64,
                        error,
                        executed_at,
                    },
                });
            }
            Ok(records)
        })
        .await
    }

    async fn upsert(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        record.check_stage()?;
        let variables = serde_json::to_string(&record.variables)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO execution_state
                    (conversation_id, module, stage, variables, success, duration_ms, error, executed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (conversation_id, module, stage) DO UPDATE SET
                    variables = excluded.variables,
                    success = excluded.success,
                    duration_ms = excluded.duration_ms,
                    error = excluded.error,
                    executed_at = excluded.executed_at",
                params![
                    record.conversation_id,
                    record.module,
                    record.stage,
                    variables,
                    record.metadata.success,
                    record.metadata.duration_ms as i64,
                    record.metadata.error,
                    record.metadata.executed_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_module(&self, module: &str) -> Result<usize, StoreError> {
        let module = module.to_string();
        self.with_conn(move |conn| {
            Ok(conn.execute("DELETE FROM execution_state WHERE module = ?1", params![module])?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sample_record;

    #[tokio::test]
    async fn test_double_upsert_leaves_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteExecutionStateStore::open(dir.path().join("state.db")).unwrap();
        store.upsert(sample_record("c", "m", 4, "calm")).await.unwrap();
        let mut second = sample_record("c", "m", 4, "happy");
        second.metadata.success = false;
        second.metadata.error = Some("RuntimeError: boom".into());
        store.upsert(second).await.unwrap();

        let records = store.load("c").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].variables["mood"], "happy");
        assert!(!records[0].metadata.success);
        assert_eq!(records[0].metadata.error.as_deref(), Some("RuntimeError: boom"));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        {
            let store = SqliteExecutionStateStore::open(&path).unwrap();
            store.upsert(sample_record("c", "m", 5, "calm")).await.unwrap();
        }
        let store = SqliteExecutionStateStore::open(&path).unwrap();
        let records = store.load("c").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stage, 5);
    }

    #[tokio::test]
    async fn test_delete_module() {
        let store = SqliteExecutionStateStore::open_in_memory().unwrap();
        store.upsert(sample_record("a", "m", 4, "x")).await.unwrap();
        store.upsert(sample_record("b", "m", 4, "y")).await.unwrap();
        store.upsert(sample_record("b", "n", 4, "z")).await.unwrap();
        assert_eq!(store.delete_module("m").await.unwrap(), 2);
        assert!(store.load("a").await.unwrap().is_empty());
        assert_eq!(store.load("b").await.unwrap().len(), 1);
    }
}

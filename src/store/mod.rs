//! 跨轮次执行状态
//!
//! 以 (conversation, module, stage) 为键保存第 4 / 5 阶段脚本最近一次的输出变量与执行元数据，
//! 下一轮第 1 阶段读取它们作为 `${var}` 的初值。写入是覆盖式 upsert，重试幂等。

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub use memory::InMemoryExecutionStateStore;
pub use sqlite::SqliteExecutionStateStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid stage {0} (only 4 and 5 are persisted)")]
    InvalidStage(u8),

    #[error("store task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub conversation_id: String,
    pub module: String,
    pub stage: u8,
    pub variables: BTreeMap<String, JsonValue>,
    pub metadata: ExecutionMetadata,
}

impl ExecutionRecord {
    pub(crate) fn check_stage(&self) -> Result<(), StoreError> {
        match self.stage {
            4 | 5 => Ok(()),
            other => Err(StoreError::InvalidStage(other)),
        }
    }
}

#[async_trait]
pub trait ExecutionStateStore: Send + Sync {
    /// 会话的全部记录，按 (module, stage) 排序
    async fn load(&self, conversation_id: &str) -> Result<Vec<ExecutionRecord>, StoreError>;

    async fn upsert(&self, record: ExecutionRecord) -> Result<(), StoreError>;

    /// 删除某模块在所有会话中的记录，返回删除条数
    async fn delete_module(&self, module: &str) -> Result<usize, StoreError>;
}

#[cfg(test)]
pub(crate) fn sample_record(conversation: &str, module: &str, stage: u8, mood: &str) -> ExecutionRecord {
    ExecutionRecord {
        conversation_id: conversation.to_string(),
        module: module.to_string(),
        stage,
        variables: BTreeMap::from([("mood".to_string(), JsonValue::from(mood))]),
        metadata: ExecutionMetadata {
            success: true,
            duration_ms: 3,
            error: None,
            executed_at: Utc::now(),
        },
    }
}

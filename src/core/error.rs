//! 引擎级错误
//!
//! 单个模块的脚本失败不会成为 EngineError：它们作为告警随解析结果返回。
//! 这里只包含会终止整次解析的错误。

use thiserror::Error;

use crate::llm::LlmError;
use crate::modules::ModuleError;
use crate::plugins::RegistryError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// 模块引用成环；cycle 为从首次出现到重复出现的完整路径
    #[error("circular module reference: {}", .cycle.join(" -> "))]
    CircularReference { cycle: Vec<String> },

    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// 第 2 阶段 AI 调用失败，主 AI 调用不应继续
    #[error("provider error in module '{module}': {message}")]
    Provider { module: String, message: String },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("execution state store error: {0}")]
    Store(#[from] StoreError),

    #[error("module error: {0}")]
    Module(#[from] ModuleError),

    #[error("capability registry error: {0}")]
    Registry(#[from] RegistryError),

    /// 内部传播用；对外 API 转换为 `Outcome::Cancelled`
    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_path() {
        let err = EngineError::CircularReference {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "circular module reference: a -> b -> a");
    }
}

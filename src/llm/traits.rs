//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient。脚本中的 ctx.generate / ctx.reflect 最终都落到 generate。
//! 取消由调用方负责：把 future 与 CancellationToken 放进 `tokio::select!`，丢弃 future 即放弃请求。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("empty response")]
    EmptyResponse,
}

/// 生成参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            max_tokens: None,
        }
    }
}

/// 一次生成请求：系统提示 + 用户提示
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_prompt: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub settings: GenerationSettings,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;

    /// 模型名（审计日志用）
    fn model_name(&self) -> &str {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = GenerationRequest::new("hi").with_system("sys");
        assert_eq!(req.prompt, "hi");
        assert_eq!(req.system_prompt.as_deref(), Some("sys"));
        assert_eq!(req.settings.temperature, Some(0.7));
        assert_eq!(req.settings.max_tokens, None);
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(LlmError::Timeout(60).to_string(), "request timed out after 60s");
    }
}

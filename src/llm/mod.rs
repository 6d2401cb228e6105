//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::{GenerationRequest, GenerationSettings, LlmClient, LlmError};

use crate::config::LlmSection;

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// 按 `[llm]` 配置创建客户端；未知 provider 回退到 mock 并告警
pub fn create_client(section: &LlmSection) -> Arc<dyn LlmClient> {
    let timeout = Duration::from_secs(section.timeouts.request);
    match section.provider.as_str() {
        "deepseek" => Arc::new(
            OpenAiClient::deepseek(section.model.as_deref(), section.base_url.as_deref())
                .with_request_timeout(timeout),
        ),
        "openai" => Arc::new(
            OpenAiClient::new(
                section.base_url.as_deref(),
                section.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL),
                None,
            )
            .with_request_timeout(timeout),
        ),
        "mock" => Arc::new(MockLlmClient::new()),
        other => {
            tracing::warn!(provider = other, "unknown LLM provider; using mock client");
            Arc::new(MockLlmClient::new())
        }
    }
}

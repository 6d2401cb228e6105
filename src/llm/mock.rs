//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 默认回显用户提示；可预置应答队列、人为延迟与失败，并记录收到的请求。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{GenerationRequest, LlmClient, LlmError};

#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    latency: Option<Duration>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序返回预置应答，用完后回到回显
    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut queue = self.replies.lock().unwrap_or_else(|e| e.into_inner());
            queue.extend(replies.into_iter().map(|r| Ok(r.into())));
        }
        self
    }

    pub fn with_failure(self, error: LlmError) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(error));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// 已收到的请求（按到达顺序）
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let scripted = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match scripted {
            Some(reply) => reply,
            None => Ok(format!("Echo from Mock: {}", request.prompt)),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

//! 对话上下文：一次解析所需的会话信息
//!
//! 持久化的人格 / 会话 / 消息由外部系统管理；这里只保留解析过程需要读取的快照。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" | "ai" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({ "role": self.role.as_str(), "content": self.content })
    }
}

/// 当前轮次的会话上下文
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: String,
    #[serde(default)]
    pub persona_name: Option<String>,
    /// 本轮之前的历史消息（不含本轮用户消息）
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub last_user_message: Option<String>,
    /// 第 4 / 5 阶段可见：主 AI 调用的回复
    #[serde(default)]
    pub ai_response: Option<String>,
    /// 调用方附加的键值，仅供能力函数读取
    #[serde(default)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl ConversationContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            ..Default::default()
        }
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.last_user_message = Some(message.into());
        self
    }

    pub fn with_persona(mut self, name: impl Into<String>) -> Self {
        self.persona_name = Some(name.into());
        self
    }

    pub fn with_history(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_ai_response(mut self, response: impl Into<String>) -> Self {
        self.ai_response = Some(response.into());
        self
    }

    /// 包含本轮用户消息在内的消息总数
    pub fn message_count(&self) -> usize {
        self.messages.len() + usize::from(self.last_user_message.is_some())
    }

    pub fn is_first_message(&self) -> bool {
        !self.messages.iter().any(|m| m.role == Role::User)
    }

    /// 最近 n 条消息（含本轮用户消息，旧到新）
    pub fn recent_messages(&self, n: usize) -> Vec<Message> {
        let mut all = self.messages.clone();
        if let Some(text) = &self.last_user_message {
            all.push(Message::user(text.clone()));
        }
        let skip = all.len().saturating_sub(n);
        all.split_off(skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_messages_include_current_turn() {
        let ctx = ConversationContext::new("c1")
            .with_history(vec![
                Message::user("hi"),
                Message::assistant("hello"),
            ])
            .with_user_message("how are you");
        let recent = ctx.recent_messages(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "hello");
        assert_eq!(recent[1].content, "how are you");
        assert_eq!(ctx.message_count(), 3);
        assert!(!ctx.is_first_message());
    }

    #[test]
    fn test_first_message() {
        let ctx = ConversationContext::new("c1").with_user_message("hello");
        assert!(ctx.is_first_message());
    }
}

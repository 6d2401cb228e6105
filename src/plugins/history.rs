//! 历史消息检索能力
//!
//! 消息持久化由外部系统负责；引擎只通过 [`MessageHistory`] 读取。

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::json;

use super::{CapabilityArgs, CapabilityError, CapabilityResult, Handler, Provider, RegistryBuilder, RegistryError};
use crate::conversation::{ConversationContext, Message, Role};

pub const PROVIDER: Provider = Provider {
    name: "history",
    register,
};

const DEFAULT_SEARCH_LIMIT: usize = 10;

/// 数据访问句柄
pub trait MessageHistory: Send + Sync {
    /// 会话的全部消息（旧到新）
    fn messages(&self, conversation_id: &str) -> Vec<Message>;
}

/// 内存实现，供测试与命令行使用
#[derive(Debug, Default)]
pub struct InMemoryMessageHistory {
    conversations: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryMessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, conversation_id: &str, message: Message) {
        self.conversations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
    }
}

impl MessageHistory for InMemoryMessageHistory {
    fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.conversations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

fn register(b: &mut RegistryBuilder) -> Result<(), RegistryError> {
    b.register(
        "search_messages",
        "Messages in this conversation containing the query (case-insensitive), newest first",
        Handler::Data(search_messages),
    )?;
    b.register(
        "count_messages_by_role",
        "Number of messages from 'user' or 'assistant'",
        Handler::Data(count_messages_by_role),
    )
}

/// 持久化历史，外加上下文中尚未落库的消息
fn all_messages(data: &dyn MessageHistory, ctx: &ConversationContext) -> Vec<Message> {
    let mut messages = data.messages(&ctx.conversation_id);
    if messages.is_empty() {
        messages = ctx.messages.clone();
    }
    if let Some(current) = &ctx.last_user_message {
        if messages.last().map(|m| &m.content) != Some(current) {
            messages.push(Message::user(current.clone()));
        }
    }
    messages
}

fn search_messages(
    data: &dyn MessageHistory,
    ctx: &ConversationContext,
    args: &CapabilityArgs,
) -> CapabilityResult {
    let query = args.str(0, "query")?.to_lowercase();
    let limit = args.opt_usize(1, "limit")?.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let found: Vec<_> = all_messages(data, ctx)
        .iter()
        .rev()
        .filter(|m| m.content.to_lowercase().contains(&query))
        .take(limit)
        .map(Message::to_json)
        .collect();
    Ok(json!(found))
}

fn count_messages_by_role(
    data: &dyn MessageHistory,
    ctx: &ConversationContext,
    args: &CapabilityArgs,
) -> CapabilityResult {
    let raw = args.str(0, "role")?;
    let role = Role::parse(raw)
        .ok_or_else(|| CapabilityError::InvalidArgument(format!("unknown role '{raw}'")))?;
    let count = all_messages(data, ctx).iter().filter(|m| m.role == role).count();
    Ok(json!(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> InMemoryMessageHistory {
        let h = InMemoryMessageHistory::new();
        h.append("c1", Message::user("I like tea"));
        h.append("c1", Message::assistant("Tea is nice"));
        h.append("c1", Message::user("and coffee"));
        h.append("c2", Message::user("tea elsewhere"));
        h
    }

    #[test]
    fn test_search_is_scoped_and_newest_first() {
        let h = history();
        let ctx = ConversationContext::new("c1");
        let args = CapabilityArgs::positional(vec![json!("TEA")]);
        let found = search_messages(&h, &ctx, &args).unwrap();
        assert_eq!(
            found,
            json!([
                {"role": "assistant", "content": "Tea is nice"},
                {"role": "user", "content": "I like tea"}
            ])
        );
    }

    #[test]
    fn test_count_by_role_includes_current_turn() {
        let h = history();
        let ctx = ConversationContext::new("c1").with_user_message("tea again?");
        let args = CapabilityArgs::positional(vec![json!("user")]);
        assert_eq!(count_messages_by_role(&h, &ctx, &args).unwrap(), json!(3));
        let bad = CapabilityArgs::positional(vec![json!("robot")]);
        assert!(count_messages_by_role(&h, &ctx, &bad).is_err());
    }
}

//! 会话上下文能力：读取当前轮次的对话信息

use serde_json::json;

use super::{CapabilityArgs, CapabilityResult, Handler, Provider, RegistryBuilder, RegistryError};
use crate::conversation::ConversationContext;

pub const PROVIDER: Provider = Provider {
    name: "conversation",
    register,
};

const DEFAULT_RECENT: usize = 5;

fn register(b: &mut RegistryBuilder) -> Result<(), RegistryError> {
    b.register(
        "get_last_user_message",
        "The user's message for this turn",
        Handler::Context(get_last_user_message),
    )?;
    b.register(
        "get_ai_response",
        "The main AI response (post-response stages only)",
        Handler::Context(get_ai_response),
    )?;
    b.register(
        "get_message_count",
        "Number of messages in the conversation including this turn",
        Handler::Context(get_message_count),
    )?;
    b.register(
        "get_recent_messages",
        "Last n messages as {role, content}, oldest first",
        Handler::Context(get_recent_messages),
    )?;
    b.register("get_conversation_id", "Current conversation id", Handler::Context(get_conversation_id))?;
    b.register(
        "is_first_message",
        "True when the user has not spoken before this turn",
        Handler::Context(is_first_message),
    )?;
    b.register("get_persona_name", "Active persona name", Handler::Context(get_persona_name))
}

fn get_last_user_message(ctx: &ConversationContext, _args: &CapabilityArgs) -> CapabilityResult {
    Ok(json!(ctx.last_user_message.as_deref().unwrap_or("")))
}

fn get_ai_response(ctx: &ConversationContext, _args: &CapabilityArgs) -> CapabilityResult {
    Ok(json!(ctx.ai_response.as_deref().unwrap_or("")))
}

fn get_message_count(ctx: &ConversationContext, _args: &CapabilityArgs) -> CapabilityResult {
    Ok(json!(ctx.message_count()))
}

fn get_recent_messages(ctx: &ConversationContext, args: &CapabilityArgs) -> CapabilityResult {
    let n = args.opt_usize(0, "n")?.unwrap_or(DEFAULT_RECENT);
    let recent: Vec<_> = ctx.recent_messages(n).iter().map(|m| m.to_json()).collect();
    Ok(json!(recent))
}

fn get_conversation_id(ctx: &ConversationContext, _args: &CapabilityArgs) -> CapabilityResult {
    Ok(json!(ctx.conversation_id))
}

fn is_first_message(ctx: &ConversationContext, _args: &CapabilityArgs) -> CapabilityResult {
    Ok(json!(ctx.is_first_message()))
}

fn get_persona_name(ctx: &ConversationContext, _args: &CapabilityArgs) -> CapabilityResult {
    Ok(json!(ctx.persona_name.as_deref().unwrap_or("")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Message;

    #[test]
    fn test_recent_messages_include_current_turn() {
        let ctx = ConversationContext::new("c1")
            .with_history(vec![
                Message::user("hi"),
                Message::assistant("hello"),
            ])
            .with_user_message("how are you");
        let args = CapabilityArgs::positional(vec![json!(2)]);
        let recent = get_recent_messages(&ctx, &args).unwrap();
        assert_eq!(
            recent,
            json!([
                {"role": "assistant", "content": "hello"},
                {"role": "user", "content": "how are you"}
            ])
        );
        assert_eq!(get_message_count(&ctx, &CapabilityArgs::default()).unwrap(), json!(3));
        assert_eq!(is_first_message(&ctx, &CapabilityArgs::default()).unwrap(), json!(false));
    }

    #[test]
    fn test_missing_fields_are_empty_strings() {
        let ctx = ConversationContext::new("c1");
        let args = CapabilityArgs::default();
        assert_eq!(get_ai_response(&ctx, &args).unwrap(), json!(""));
        assert_eq!(get_persona_name(&ctx, &args).unwrap(), json!(""));
        assert_eq!(get_conversation_id(&ctx, &args).unwrap(), json!("c1"));
    }
}

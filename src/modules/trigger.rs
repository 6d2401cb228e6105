//! 触发器匹配
//!
//! 规则按优先级：
//! 1. 空 / 缺省 / `*` 恒为真
//! 2. 含顶层 `|` 时拆分，任一分支命中即为真
//! 3. 分支能编译为正则时，对最后一条用户消息做不区分大小写的搜索
//! 4. 否则做不区分大小写的子串包含

use regex::RegexBuilder;

use crate::conversation::ConversationContext;

/// 正则编译大小上限
const TRIGGER_REGEX_SIZE_LIMIT: usize = 1 << 20;

pub fn should_run(pattern: Option<&str>, context: &ConversationContext) -> bool {
    let pattern = match pattern.map(str::trim) {
        None | Some("") | Some("*") => return true,
        Some(p) => p,
    };
    let Some(message) = context.last_user_message.as_deref() else {
        return false;
    };
    split_top_level(pattern)
        .into_iter()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .any(|branch| branch == "*" || branch_matches(branch, message))
}

fn branch_matches(branch: &str, message: &str) -> bool {
    match RegexBuilder::new(branch)
        .case_insensitive(true)
        .size_limit(TRIGGER_REGEX_SIZE_LIMIT)
        .build()
    {
        Ok(re) => re.is_match(message),
        Err(_) => message.to_lowercase().contains(&branch.to_lowercase()),
    }
}

/// 按不在括号 / 字符类内、未被转义的 `|` 拆分
fn split_top_level(pattern: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_class = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in pattern.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => depth += 1,
            ')' if !in_class => depth -= 1,
            '|' if !in_class && depth <= 0 => {
                parts.push(&pattern[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&pattern[start..]);
    parts
}

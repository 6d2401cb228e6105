//! 模板占位符：`@module` 引用与 `${var}` 变量
//!
//! 两种占位符的标识符空间互不相交：`@` 后只接受模块名语法，`${}` 内是脚本变量名。
//! `\@name` 为转义，解析时保留原样，最终渲染时去掉反斜杠。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value as JsonValue;

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@([a-z][a-z0-9_]*)").expect("static regex"))
}

fn variable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"))
}

/// 文本中的一个模块引用（字节区间含 `@`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub start: usize,
    pub end: usize,
    pub name: String,
}

pub fn find_references(text: &str) -> Vec<Reference> {
    reference_re()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let before = text[..whole.start()].chars().next_back();
            if matches!(before, Some(c) if c == '\\' || c.is_alphanumeric() || c == '_') {
                return None;
            }
            let after = text[whole.end()..].chars().next();
            if matches!(after, Some(c) if c.is_alphanumeric()) {
                return None;
            }
            Some(Reference {
                start: whole.start(),
                end: whole.end(),
                name: caps[1].to_string(),
            })
        })
        .collect()
}

/// 变量值的文本形式：字符串原样输出，其余为 JSON；超长截断
pub fn render_value(value: &JsonValue, max_chars: usize) -> String {
    let text = match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() <= max_chars {
        text
    } else {
        text.chars().take(max_chars).collect()
    }
}

/// 替换变量池中存在的 `${var}`，其余保持原样
pub fn substitute_variables(
    text: &str,
    pool: &BTreeMap<String, JsonValue>,
    max_chars: usize,
) -> String {
    variable_re()
        .replace_all(text, |caps: &regex::Captures<'_>| match pool.get(&caps[1]) {
            Some(value) => render_value(value, max_chars),
            None => caps[0].to_string(),
        })
        .into_owned()
}

pub fn unescape_references(text: &str) -> String {
    text.replace("\\@", "@")
}

/// 最终渲染：先去掉模板文本里的引用转义，再替换变量（变量值原样保留）
pub fn finalize(text: &str, pool: &BTreeMap<String, JsonValue>, max_chars: usize) -> String {
    substitute_variables(&unescape_references(text), pool, max_chars)
}

//! 脚本静态分类：是否需要 AI 调用、使用了哪些能力、复杂度估算
//!
//! 优先走语法树；解析失败时退化为文本模式匹配，仍返回尽力而为的结果。

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ast::{walk_program, Expr, Stmt, StmtKind, Visitor};
use super::parser::parse;

/// 需要外部 AI 的 ctx 方法
const AI_METHODS: &[&str] = &["generate", "reflect"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Low,
    Medium,
    High,
}

impl Complexity {
    fn from_score(score: u32) -> Self {
        match score {
            0..=2 => Complexity::Low,
            3..=5 => Complexity::Medium,
            _ => Complexity::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Classification {
    pub requires_ai: bool,
    pub uses_generate: bool,
    pub uses_reflect: bool,
    pub complexity: Complexity,
    pub line_count: usize,
    pub function_call_count: usize,
    pub has_loops: bool,
    pub has_conditionals: bool,
    /// 除 generate / reflect 以外的 `ctx.*` 调用（去重、排序）
    pub capabilities: Vec<String>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Default)]
struct Detector {
    ctx_calls: BTreeSet<String>,
    calls: usize,
    loops: bool,
    conditionals: bool,
}

impl Visitor for Detector {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::For { .. } | StmtKind::While { .. } => self.loops = true,
            StmtKind::If { .. } => self.conditionals = true,
            _ => {}
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Call { func, .. } => {
                self.calls += 1;
                if let Expr::Attribute { value, attr } = func.as_ref() {
                    if matches!(value.as_ref(), Expr::Name(n) if n == "ctx") {
                        self.ctx_calls.insert(attr.clone());
                    }
                }
            }
            Expr::IfExp { .. } => self.conditionals = true,
            _ => {}
        }
    }
}

fn ctx_call_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bctx\.(\w+)\s*\(").expect("static regex"))
}

fn call_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Za-z_]\w*\s*\(").expect("static regex"))
}

fn loop_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(for|while)\b").expect("static regex"))
}

fn conditional_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(if|elif)\b|\bif\b.+\belse\b").expect("static regex"))
}

/// 去掉注释与空行后的行数
fn count_lines(source: &str) -> usize {
    source
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .count()
}

fn score(line_count: usize, calls: usize, loops: bool, conditionals: bool) -> u32 {
    let lines = u32::from(line_count > 20);
    let calls = match calls {
        0 => 0,
        1..=3 => 1,
        4..=8 => 2,
        _ => 3,
    };
    lines + calls + if loops { 2 } else { 0 } + u32::from(conditionals)
}

fn text_fallback(source: &str) -> Detector {
    Detector {
        ctx_calls: ctx_call_pattern()
            .captures_iter(source)
            .map(|c| c[1].to_string())
            .collect(),
        calls: call_pattern()
            .find_iter(source)
            .filter(|m| {
                let word = m.as_str().trim_end_matches(|c: char| c == '(' || c.is_whitespace());
                !super::parser::is_keyword(word)
            })
            .count(),
        loops: loop_pattern().is_match(source),
        conditionals: conditional_pattern().is_match(source),
    }
}

pub fn classify(source: &str) -> Classification {
    let line_count = count_lines(source);
    let (detector, error) = match parse(source) {
        Ok(program) => {
            let mut d = Detector::default();
            walk_program(&program, &mut d);
            (d, None)
        }
        Err(e) => (text_fallback(source), Some(e.to_string())),
    };

    let uses_generate = detector.ctx_calls.contains("generate");
    let uses_reflect = detector.ctx_calls.contains("reflect");
    let capabilities = detector
        .ctx_calls
        .iter()
        .filter(|c| !AI_METHODS.contains(&c.as_str()))
        .cloned()
        .collect();

    Classification {
        requires_ai: uses_generate || uses_reflect,
        uses_generate,
        uses_reflect,
        complexity: Complexity::from_score(score(
            line_count,
            detector.calls,
            detector.loops,
            detector.conditionals,
        )),
        line_count,
        function_call_count: detector.calls,
        has_loops: detector.loops,
        has_conditionals: detector.conditionals,
        capabilities,
        ok: error.is_none(),
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_requires_ai() {
        let c = classify("summary = ctx.generate('summarize: ' + ctx.get_last_user_message())");
        assert!(c.ok);
        assert!(c.requires_ai);
        assert!(c.uses_generate);
        assert!(!c.uses_reflect);
        assert_eq!(c.capabilities, vec!["get_last_user_message".to_string()]);
    }

    #[test]
    fn test_plain_capability_is_not_ai() {
        let c = classify("now = ctx.get_current_time()");
        assert!(!c.requires_ai);
        assert_eq!(c.complexity, Complexity::Low);
        assert_eq!(c.function_call_count, 1);
    }

    #[test]
    fn test_syntax_error_falls_back_to_text_search() {
        let c = classify("if True\n    x = ctx.reflect('who am i')");
        assert!(!c.ok);
        assert!(c.error.is_some());
        assert!(c.requires_ai);
        assert!(c.uses_reflect);
        assert!(c.has_conditionals);
    }

    #[test]
    fn test_complexity_scoring() {
        let src = "total = 0\nfor i in range(10):\n    if i % 2 == 0:\n        total += i\nlabel = str(total).upper()";
        let c = classify(src);
        assert!(c.has_loops);
        assert!(c.has_conditionals);
        // range + str + upper = 1 分，循环 2 分，条件 1 分
        assert_eq!(c.complexity, Complexity::Medium);

        let mut long = String::new();
        for i in 0..25 {
            long.push_str(&format!("v{i} = len(str({i}))\n"));
        }
        long.push_str("while False:\n    pass\nif True:\n    pass\n");
        assert_eq!(classify(&long).complexity, Complexity::High);
    }
}

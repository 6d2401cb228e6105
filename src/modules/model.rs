//! 模块定义
//!
//! 模块是提示词的可复用单元：静态文本，或带脚本的内容模板。
//! 脚本体变化时重新分类，分类结果决定 requires_ai 与阶段。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{assign_stage, ExecutionContext, Stage};
use crate::script::{classify, Classification};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModuleError {
    #[error("invalid module name '{0}': must match ^[a-z][a-z0-9_]*$")]
    InvalidName(String),

    #[error("module not found: {0}")]
    NotFound(String),

    #[error("module already exists: {0}")]
    Duplicate(String),

    #[error("failed to load module file {path}: {message}")]
    Load { path: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    #[default]
    Static,
    Scripted,
}

fn name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("static regex"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub kind: ModuleKind,
    /// 静态文本，或脚本模块的内容模板（可含 `@引用` 与 `${变量}`）
    pub content: String,
    script: Option<String>,
    pub trigger: Option<String>,
    pub execution_context: ExecutionContext,
    /// 越小越先执行（第 4 / 5 阶段）
    pub priority: i32,
    pub active: bool,
    pub description: Option<String>,
    classification: Option<Classification>,
}

impl Module {
    pub fn validate_name(name: &str) -> Result<(), ModuleError> {
        if name_pattern().is_match(name) {
            Ok(())
        } else {
            Err(ModuleError::InvalidName(name.to_string()))
        }
    }

    pub fn new_static(name: &str, content: impl Into<String>) -> Result<Self, ModuleError> {
        Self::validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            kind: ModuleKind::Static,
            content: content.into(),
            script: None,
            trigger: None,
            execution_context: ExecutionContext::Immediate,
            priority: 0,
            active: true,
            description: None,
            classification: None,
        })
    }

    /// 脚本模块；content 为空时渲染结果为空串，脚本输出仍进入变量池
    pub fn new_scripted(
        name: &str,
        script: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Self, ModuleError> {
        let mut module = Self::new_static(name, content)?;
        module.kind = ModuleKind::Scripted;
        module.set_script(script);
        Ok(module)
    }

    pub fn with_trigger(mut self, pattern: impl Into<String>) -> Self {
        self.trigger = Some(pattern.into());
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.execution_context = context;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    /// 替换脚本体并重新分类
    pub fn set_script(&mut self, script: impl Into<String>) {
        let script = script.into();
        if self.script.as_deref() == Some(script.as_str()) && self.classification.is_some() {
            return;
        }
        self.classification = Some(classify(&script));
        self.script = Some(script);
        self.kind = ModuleKind::Scripted;
    }

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    pub fn requires_ai(&self) -> bool {
        self.classification.as_ref().is_some_and(|c| c.requires_ai)
    }

    /// 自动调度阶段；OnDemand 模块为 None
    pub fn stage(&self) -> Option<Stage> {
        assign_stage(self.execution_context, self.requires_ai())
    }

    /// 被 `@` 引用时应在哪个阶段执行：OnDemand 模块按 Immediate 处理
    pub fn reference_stage(&self) -> Stage {
        let context = match self.execution_context {
            ExecutionContext::OnDemand => ExecutionContext::Immediate,
            other => other,
        };
        assign_stage(context, self.requires_ai()).unwrap_or(Stage::One)
    }

    pub fn is_scripted(&self) -> bool {
        self.kind == ModuleKind::Scripted && self.script.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_grammar() {
        assert!(Module::validate_name("mood_tracker2").is_ok());
        for bad in ["", "2fast", "Upper", "has-dash", "_private", "sp ace"] {
            assert!(Module::validate_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_classification_follows_script_body() {
        let mut m = Module::new_scripted("m", "x = ctx.get_current_time()", "${x}").unwrap();
        assert!(!m.requires_ai());
        assert_eq!(m.stage(), Some(Stage::One));

        m.set_script("x = ctx.generate('hi')");
        assert!(m.requires_ai());
        assert_eq!(m.stage(), Some(Stage::Two));

        let m = m.with_context(ExecutionContext::PostResponse);
        assert_eq!(m.stage(), Some(Stage::Five));
    }

    #[test]
    fn test_on_demand_is_not_scheduled() {
        let m = Module::new_scripted("m", "x = 1", "")
            .unwrap()
            .with_context(ExecutionContext::OnDemand);
        assert_eq!(m.stage(), None);
        assert_eq!(m.reference_stage(), Stage::One);
    }
}

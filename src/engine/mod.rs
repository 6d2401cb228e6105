//! 分阶段解析引擎
//!
//! - **template**: `@module` / `${var}` 占位符扫描与最终渲染
//! - **resolver**: 单次解析过程（引用展开、环检测、按阶段决定是否执行脚本）
//! - **host**: 脚本中 `ctx` 对象的宿主实现（变量池、能力、generate / reflect）
//! - **reflection**: 反思守卫
//! - **orchestrator**: 对外 API，第 1/2 阶段与第 4/5 阶段

pub mod host;
pub mod orchestrator;
pub mod reflection;
pub mod resolver;
pub mod template;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value as JsonValue;

pub use orchestrator::{Engine, EngineBuilder};
pub use reflection::{ReflectionAuditEntry, ReflectionError, ReflectionGuard, ReflectionKind, ReflectionScope};

pub type VariablePool = BTreeMap<String, JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    UnknownModule,
    /// 引用了尚未到执行阶段的模块
    DeferredDependency,
    ScriptCompile,
    ScriptRuntime,
    ScriptTimeout,
    OutputCoerced,
    ReflectionBlocked,
    Provider,
    Store,
}

/// 非致命问题，随解析结果返回
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub module: Option<String>,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, module: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            module: module.map(String::from),
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(m) => write!(f, "[{:?}] @{}: {}", self.kind, m, self.message),
            None => write!(f, "[{:?}] {}", self.kind, self.message),
        }
    }
}

/// 第 1/2 阶段结果：交给主 AI 调用的系统提示词
#[derive(Debug, Clone, Serialize)]
pub struct PromptResolution {
    pub resolved_prompt: String,
    pub variable_pool: VariablePool,
    pub warnings: Vec<Warning>,
    pub reflection_audit: Vec<ReflectionAuditEntry>,
}

/// 第 4/5 阶段中单个模块的执行情况
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleExecution {
    pub module: String,
    pub stage: u8,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// 是否写入了执行状态
    pub persisted: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PostResponseReport {
    pub outputs_by_module: BTreeMap<String, VariablePool>,
    pub executions: Vec<ModuleExecution>,
    pub warnings: Vec<Warning>,
    pub reflection_audit: Vec<ReflectionAuditEntry>,
}

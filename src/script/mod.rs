//! 模块脚本沙箱
//!
//! 受限方言（Python 风格、缩进敏感）的完整执行链：
//! - **layout / grammar / parser**: 缩进预处理、nom 行文法，组装成语法树
//! - **interpreter**: 树遍历解释器，语句级检查截止时间与取消令牌
//! - **policy**: 属性访问、迭代、导入三类策略钩子
//! - **stdlib / methods**: 允许导入的标准库子集与内置类型方法
//! - **sandbox**: 对外入口，负责超时、输出提取与阻塞线程调度
//! - **classifier**: 静态分析脚本是否需要 AI 调用并估算复杂度

pub mod ast;
pub mod classifier;
mod grammar;
pub mod interpreter;
pub mod layout;
mod methods;
pub mod parser;
pub mod policy;
pub mod sandbox;
mod stdlib;
pub mod value;

use thiserror::Error;

pub use classifier::{classify, Classification, Complexity};
pub use interpreter::{HostError, NullHost, ScriptHost};
pub use policy::{RestrictedPolicy, SandboxPolicy};
pub use sandbox::{run_script, ScriptLimits, ScriptRun};
pub use value::Value;

/// 脚本执行错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    /// 语法错误：脚本未执行
    #[error("compile error at line {line}: {message}")]
    Compile { line: usize, message: String },

    /// 运行期异常：已产生的输出保留
    #[error("runtime error at line {line}: {message}")]
    Runtime { line: usize, message: String },

    #[error("script timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("script cancelled")]
    Cancelled,

    /// AI 提供方失败（网络、鉴权等），不可被脚本 try/except 捕获
    #[error("provider error: {message}")]
    Provider { message: String },
}

impl ScriptError {
    /// 稳定的错误类别名（写入执行元数据与告警）
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptError::Compile { .. } => "compile",
            ScriptError::Runtime { .. } => "runtime",
            ScriptError::Timeout { .. } => "timeout",
            ScriptError::Cancelled => "cancelled",
            ScriptError::Provider { .. } => "provider",
        }
    }
}

//! Hive - 动态系统提示引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **conversation**: 一次解析所需的会话上下文
//! - **core**: 引擎错误、阶段与流水线状态、会话监管
//! - **engine**: 模板解析、脚本宿主、反思守卫与分阶段编排
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **modules**: 模块定义、触发器、仓库与目录加载
//! - **plugins**: 脚本可调用的能力注册表
//! - **script**: 受限脚本方言的解释器、沙箱与静态分类
//! - **store**: 跨轮次执行状态（内存 / SQLite）

pub mod config;
pub mod conversation;
pub mod core;
pub mod engine;
pub mod llm;
pub mod modules;
pub mod observability;
pub mod plugins;
pub mod script;
pub mod store;

pub use crate::core::{EngineError, Outcome, SessionSupervisor};
pub use engine::{Engine, PostResponseReport, PromptResolution};

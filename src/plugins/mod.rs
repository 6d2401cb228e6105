//! 能力注册表
//!
//! 脚本通过 `ctx.<name>(...)` 调用的宿主函数表。启动时按固定的提供方列表逐个调用注册钩子构建，
//! 之后只读，可被任意数量的会话并发使用。
//!
//! 能力函数按需要的注入参数分为三类（见 [`Handler`]）；[`CapabilityRegistry::invoke`] 统一负责注入，
//! 脚本侧调用方式完全一致。

pub mod conversation;
pub mod history;
pub mod text;
pub mod time;

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::conversation::ConversationContext;

pub use history::{InMemoryMessageHistory, MessageHistory};

/// 注册期错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("capability already registered: {name} (provider {provider})")]
    AlreadyRegistered { name: String, provider: String },

    #[error("invalid capability name: {0}")]
    InvalidName(String),

    #[error("capability name is reserved by the engine: {0}")]
    Reserved(String),
}

/// 由引擎宿主直接分派的方法名，能力不得占用
pub const RESERVED_NAMES: &[&str] = &[
    "get_variable",
    "set_variable",
    "get_all_variables",
    "generate",
    "reflect",
    "can_reflect",
    "enter_reflection",
    "exit_reflection",
    "get_reflection_depth",
    "get_reflection_audit_trail",
];

/// 调用期错误；对脚本而言都是可捕获的运行时错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapabilityError {
    #[error("unknown capability: {0}")]
    Unknown(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Failed(String),
}

pub type CapabilityResult = Result<JsonValue, CapabilityError>;

/// 能力函数及其所需注入
#[derive(Clone, Copy)]
pub enum Handler {
    Plain(fn(&CapabilityArgs) -> CapabilityResult),
    /// 需要当前脚本上下文
    Context(fn(&ConversationContext, &CapabilityArgs) -> CapabilityResult),
    /// 需要数据访问句柄与脚本上下文
    Data(fn(&dyn MessageHistory, &ConversationContext, &CapabilityArgs) -> CapabilityResult),
}

pub struct Capability {
    pub name: &'static str,
    pub description: &'static str,
    pub provider: &'static str,
    handler: Handler,
}

/// 供创作界面展示
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityInfo {
    pub name: String,
    pub description: String,
    pub provider: String,
}

/// 一次调用的参数（脚本传入的位置参数与关键字参数，均为 JSON）
#[derive(Debug, Clone, Default)]
pub struct CapabilityArgs {
    positional: Vec<JsonValue>,
    named: Map<String, JsonValue>,
}

impl CapabilityArgs {
    pub fn new(positional: Vec<JsonValue>, named: Map<String, JsonValue>) -> Self {
        Self { positional, named }
    }

    pub fn positional(values: Vec<JsonValue>) -> Self {
        Self::new(values, Map::new())
    }

    pub fn get(&self, idx: usize, key: &str) -> Option<&JsonValue> {
        self.positional
            .get(idx)
            .or_else(|| self.named.get(key))
            .filter(|v| !v.is_null())
    }

    pub fn str(&self, idx: usize, key: &str) -> Result<&str, CapabilityError> {
        self.opt_str(idx, key)?
            .ok_or_else(|| CapabilityError::InvalidArgument(format!("missing argument '{key}'")))
    }

    pub fn opt_str(&self, idx: usize, key: &str) -> Result<Option<&str>, CapabilityError> {
        match self.get(idx, key) {
            None => Ok(None),
            Some(JsonValue::String(s)) => Ok(Some(s)),
            Some(other) => Err(CapabilityError::InvalidArgument(format!(
                "argument '{key}' must be a string, got {other}"
            ))),
        }
    }

    pub fn opt_usize(&self, idx: usize, key: &str) -> Result<Option<usize>, CapabilityError> {
        match self.get(idx, key) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .map(|n| Some(n as usize))
                .ok_or_else(|| {
                    CapabilityError::InvalidArgument(format!(
                        "argument '{key}' must be a non-negative integer, got {v}"
                    ))
                }),
        }
    }
}

/// 调用环境：由引擎在每次调用时显式提供
pub struct CallEnv<'a> {
    pub module: &'a str,
    pub context: &'a ConversationContext,
    pub data: &'a dyn MessageHistory,
}

/// 注册期构建器；每个提供方在自己的钩子里调用 `register`
pub struct RegistryBuilder {
    provider: &'static str,
    entries: BTreeMap<&'static str, Capability>,
}

impl RegistryBuilder {
    fn new() -> Self {
        Self {
            provider: "",
            entries: BTreeMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: &'static str,
        description: &'static str,
        handler: Handler,
    ) -> Result<(), RegistryError> {
        crate::modules::Module::validate_name(name)
            .map_err(|_| RegistryError::InvalidName(name.to_string()))?;
        if RESERVED_NAMES.contains(&name) {
            return Err(RegistryError::Reserved(name.to_string()));
        }
        if let Some(existing) = self.entries.get(name) {
            return Err(RegistryError::AlreadyRegistered {
                name: name.to_string(),
                provider: existing.provider.to_string(),
            });
        }
        self.entries.insert(
            name,
            Capability {
                name,
                description,
                provider: self.provider,
                handler,
            },
        );
        Ok(())
    }
}

/// 能力提供方：名称 + 注册钩子
#[derive(Clone, Copy)]
pub struct Provider {
    pub name: &'static str,
    pub register: fn(&mut RegistryBuilder) -> Result<(), RegistryError>,
}

/// 进程级注册表使用的固定提供方列表
pub const PROVIDERS: &[Provider] = &[
    time::PROVIDER,
    conversation::PROVIDER,
    history::PROVIDER,
    text::PROVIDER,
];

pub struct CapabilityRegistry {
    entries: BTreeMap<&'static str, Capability>,
}

impl CapabilityRegistry {
    pub fn from_providers(providers: &[Provider]) -> Result<Self, RegistryError> {
        let mut builder = RegistryBuilder::new();
        for provider in providers {
            builder.provider = provider.name;
            (provider.register)(&mut builder)?;
        }
        tracing::debug!(
            capabilities = builder.entries.len(),
            providers = providers.len(),
            "capability registry built"
        );
        Ok(Self {
            entries: builder.entries,
        })
    }

    /// 进程级注册表；并发首次访问只会构建一次
    pub fn global() -> Result<Arc<CapabilityRegistry>, RegistryError> {
        static GLOBAL: OnceLock<Result<Arc<CapabilityRegistry>, RegistryError>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| CapabilityRegistry::from_providers(PROVIDERS).map(Arc::new))
            .clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn list(&self) -> Vec<CapabilityInfo> {
        self.entries
            .values()
            .map(|c| CapabilityInfo {
                name: c.name.to_string(),
                description: c.description.to_string(),
                provider: c.provider.to_string(),
            })
            .collect()
    }

    /// 调用能力并注入所需参数；每次调用输出一条审计日志
    pub fn invoke(&self, name: &str, args: &CapabilityArgs, env: &CallEnv<'_>) -> CapabilityResult {
        let capability = self
            .entries
            .get(name)
            .ok_or_else(|| CapabilityError::Unknown(name.to_string()))?;
        let start = Instant::now();
        let result = match capability.handler {
            Handler::Plain(f) => f(args),
            Handler::Context(f) => f(env.context, args),
            Handler::Data(f) => f(env.data, env.context, args),
        };
        let audit = serde_json::json!({
            "event": "capability_audit",
            "capability": name,
            "provider": capability.provider,
            "module": env.module,
            "ok": result.is_ok(),
            "outcome": if result.is_ok() { "ok" } else { "error" },
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "capability");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo(args: &CapabilityArgs) -> CapabilityResult {
        Ok(args.get(0, "value").cloned().unwrap_or(JsonValue::Null))
    }

    fn persona(ctx: &ConversationContext, _args: &CapabilityArgs) -> CapabilityResult {
        Ok(json!(ctx.persona_name))
    }

    fn register_a(b: &mut RegistryBuilder) -> Result<(), RegistryError> {
        b.register("echo", "echo back", Handler::Plain(echo))?;
        b.register("persona", "persona name", Handler::Context(persona))
    }

    fn register_b(b: &mut RegistryBuilder) -> Result<(), RegistryError> {
        b.register("echo", "second echo", Handler::Plain(echo))
    }

    #[test]
    fn test_reregistration_is_load_error() {
        let providers = [
            Provider { name: "a", register: register_a },
            Provider { name: "b", register: register_b },
        ];
        let err = CapabilityRegistry::from_providers(&providers).err().unwrap();
        assert_eq!(
            err,
            RegistryError::AlreadyRegistered {
                name: "echo".into(),
                provider: "a".into()
            }
        );
    }

    fn register_shadowing(b: &mut RegistryBuilder) -> Result<(), RegistryError> {
        b.register("generate", "local generate", Handler::Plain(echo))
    }

    #[test]
    fn test_reserved_name_is_load_error() {
        let providers = [Provider { name: "rogue", register: register_shadowing }];
        let err = CapabilityRegistry::from_providers(&providers).err().unwrap();
        assert_eq!(err, RegistryError::Reserved("generate".into()));
        assert!(CapabilityRegistry::global()
            .unwrap()
            .list()
            .iter()
            .all(|c| !RESERVED_NAMES.contains(&c.name.as_str())));
    }

    #[test]
    fn test_invoke_injects_context() {
        let registry =
            CapabilityRegistry::from_providers(&[Provider { name: "a", register: register_a }])
                .unwrap();
        let ctx = ConversationContext::new("c1").with_persona("Ada");
        let history = InMemoryMessageHistory::new();
        let env = CallEnv {
            module: "m",
            context: &ctx,
            data: &history,
        };
        let args = CapabilityArgs::default();
        assert_eq!(registry.invoke("persona", &args, &env).unwrap(), json!("Ada"));
        let args = CapabilityArgs::positional(vec![json!(3)]);
        assert_eq!(registry.invoke("echo", &args, &env).unwrap(), json!(3));
        assert!(matches!(
            registry.invoke("nope", &args, &env),
            Err(CapabilityError::Unknown(_))
        ));
    }

    #[test]
    fn test_global_registry_has_builtin_providers() {
        let registry = CapabilityRegistry::global().unwrap();
        for name in [
            "get_current_time",
            "get_last_user_message",
            "search_messages",
            "word_count",
        ] {
            assert!(registry.contains(name), "{name}");
        }
        let again = CapabilityRegistry::global().unwrap();
        assert!(Arc::ptr_eq(&registry, &again));
    }
}

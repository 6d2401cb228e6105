//! 脚本宿主：脚本中 `ctx.<method>(...)` 的实现
//!
//! 宿主运行在 `spawn_blocking` 线程上。AI 调用与嵌套渲染通过运行时句柄 `block_on`，
//! 并与会话令牌、脚本截止时间赛跑；取消时立即放弃进行中的调用。

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value as JsonValue};
use tokio::runtime::Handle;

use super::reflection::{ReflectionKind, ReflectionScope};
use super::resolver::{Pass, PassState};
use super::{Engine, Warning, WarningKind};
use crate::core::{EngineError, ExecutionContext, Stage};
use crate::llm::{GenerationRequest, GenerationSettings};
use crate::modules::Module;
use crate::plugins::{CallEnv, CapabilityArgs, CapabilityError};
use crate::script::sandbox::execute;
use crate::script::{HostError, ScriptHost, ScriptLimits, ScriptRun};

fn invalid(e: CapabilityError) -> HostError {
    HostError::Runtime(e.to_string())
}

pub(crate) struct EngineHost {
    engine: Engine,
    module: String,
    stage: Stage,
    state: Arc<PassState>,
    handle: Handle,
    deadline: Instant,
    /// enter_reflection 压入、尚未 exit 的帧；宿主销毁时一并弹出
    manual: Vec<ReflectionScope>,
}

impl EngineHost {
    pub(crate) fn new(
        engine: Engine,
        module: &str,
        stage: Stage,
        state: Arc<PassState>,
        handle: Handle,
        timeout: Duration,
    ) -> Self {
        Self {
            engine,
            module: module.to_string(),
            stage,
            state,
            handle,
            deadline: Instant::now() + timeout,
            manual: Vec::new(),
        }
    }

    /// 在阻塞线程上等待 future，取消或超过脚本截止时间时提前返回
    fn block_on_bounded<T, F>(&self, fut: F) -> Result<T, HostError>
    where
        F: Future<Output = Result<T, HostError>>,
    {
        let cancel = self.state.cancel.clone();
        let deadline = tokio::time::Instant::from_std(self.deadline);
        self.handle.block_on(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(HostError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => Err(HostError::Timeout),
                r = fut => r,
            }
        })
    }

    fn require_ai(&self, method: &str) -> Result<(), HostError> {
        if self.stage.allows_ai() {
            Ok(())
        } else {
            Err(HostError::Runtime(format!(
                "ctx.{method} is not available in {}",
                self.stage
            )))
        }
    }

    /// None 表示对提示词快照的反思
    fn timing_of(&self, target: Option<&str>) -> Result<ExecutionContext, HostError> {
        let Some(name) = target else {
            return Ok(ExecutionContext::OnDemand);
        };
        let repo = Arc::clone(self.engine.repository());
        self.handle
            .block_on(async move { repo.get(name).await })
            .map(|m| m.execution_context)
            .ok_or_else(|| HostError::Runtime(format!("unknown module '{name}'")))
    }

    fn ai_call(&self, kind: &str, request: GenerationRequest) -> Result<JsonValue, HostError> {
        let llm = Arc::clone(self.engine.llm());
        let started = Instant::now();
        let result = self.block_on_bounded(async {
            llm.generate(&request)
                .await
                .map_err(|e| HostError::Provider(e.to_string()))
        });
        let outcome = match &result {
            Ok(_) => "ok",
            Err(HostError::Cancelled) => "cancelled",
            Err(HostError::Timeout) => "timeout",
            Err(_) => "error",
        };
        let audit = json!({
            "event": "ai_audit",
            "kind": kind,
            "module": self.module,
            "model": llm.model_name(),
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": started.elapsed().as_millis() as u64,
            "prompt_chars": request.prompt.chars().count(),
        });
        tracing::info!(audit = %audit.to_string(), "ai call");
        result.map(JsonValue::String)
    }

    fn generate(&self, args: &CapabilityArgs) -> Result<JsonValue, HostError> {
        self.require_ai("generate")?;
        let prompt = args.str(0, "prompt").map_err(invalid)?;
        let mut request = GenerationRequest::new(prompt);
        if let Some(system) = args.opt_str(1, "system").map_err(invalid)? {
            request = request.with_system(system);
        }
        let defaults = GenerationSettings::default();
        let temperature = match args.get(2, "temperature") {
            Some(t) => Some(t.as_f64().ok_or_else(|| {
                HostError::Runtime(format!("temperature must be a number, got {t}"))
            })? as f32),
            None => defaults.temperature,
        };
        let max_tokens = args
            .opt_usize(3, "max_tokens")
            .map_err(invalid)?
            .map(|n| n.min(u32::MAX as usize) as u32)
            .or(defaults.max_tokens);
        request = request.with_settings(GenerationSettings {
            temperature,
            max_tokens,
        });
        self.state
            .guard
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(&self.module, ReflectionKind::Generate);
        self.ai_call("generate", request)
    }

    fn reflect(&self, args: &CapabilityArgs) -> Result<JsonValue, HostError> {
        self.require_ai("reflect")?;
        let prompt = args.str(0, "prompt").map_err(invalid)?;
        let target = args.opt_str(1, "module").map_err(invalid)?;
        let timing = self.timing_of(target)?;

        let scope = match ReflectionScope::reflect(
            &self.state.guard,
            &self.module,
            target,
            timing,
            ReflectionKind::Reflect,
        ) {
            Ok(scope) => scope,
            Err(e) => {
                self.state.warn(Warning::new(
                    WarningKind::ReflectionBlocked,
                    Some(&self.module),
                    e.to_string(),
                ));
                return Ok(json!(format!("[reflection blocked: {e}]")));
            }
        };

        let system = match target {
            None => self.state.snapshot(),
            Some(name) => {
                let engine = self.engine.clone();
                let state = Arc::clone(&self.state);
                let stage = self.stage;
                let name = name.to_string();
                self.block_on_bounded(async move {
                    let mut pass = Pass::new(engine, state, stage);
                    pass.render_target(&name).await.map_err(|e| match e {
                        EngineError::Cancelled => HostError::Cancelled,
                        EngineError::Provider { message, .. } => HostError::Provider(message),
                        other => HostError::Runtime(format!("reflection on '{name}' failed: {other}")),
                    })
                })?
            }
        };

        let request = GenerationRequest::new(prompt).with_system(system);
        let result = self.ai_call("reflect", request);
        drop(scope);
        result
    }

    fn enter_reflection(&mut self, args: &CapabilityArgs) -> Result<JsonValue, HostError> {
        let target = args.opt_str(0, "module").map_err(invalid)?;
        let timing = self.timing_of(target)?;
        match ReflectionScope::reflect(
            &self.state.guard,
            &self.module,
            target,
            timing,
            ReflectionKind::Enter,
        ) {
            Ok(scope) => {
                self.manual.push(scope);
                Ok(json!(true))
            }
            Err(e) => {
                tracing::debug!(module = %self.module, reason = %e, "enter_reflection refused");
                Ok(json!(false))
            }
        }
    }

    fn capability(&self, method: &str, args: &CapabilityArgs) -> Result<JsonValue, HostError> {
        let env = CallEnv {
            module: &self.module,
            context: &self.state.context,
            data: self.engine.history().as_ref(),
        };
        self.engine
            .registry()
            .invoke(method, args, &env)
            .map_err(|e| match e {
                CapabilityError::Unknown(name) => {
                    HostError::Runtime(format!("ctx.{name} is not a known capability"))
                }
                other => HostError::Runtime(other.to_string()),
            })
    }
}

impl ScriptHost for EngineHost {
    fn call(
        &mut self,
        method: &str,
        args: Vec<JsonValue>,
        kwargs: Map<String, JsonValue>,
    ) -> Result<JsonValue, HostError> {
        let args = CapabilityArgs::new(args, kwargs);
        // 与 plugins::RESERVED_NAMES 保持一致
        match method {
            "get_variable" => {
                let name = args.str(0, "name").map_err(invalid)?;
                Ok(self
                    .state
                    .get_variable(name)
                    .or_else(|| args.get(1, "default").cloned())
                    .unwrap_or(JsonValue::Null))
            }
            "set_variable" => {
                let name = args.str(0, "name").map_err(invalid)?;
                let value = args.get(1, "value").cloned().unwrap_or(JsonValue::Null);
                self.state.set_variable(name, value);
                Ok(JsonValue::Null)
            }
            "get_all_variables" => Ok(JsonValue::Object(self.state.pool().into_iter().collect())),
            "generate" => self.generate(&args),
            "reflect" => self.reflect(&args),
            "can_reflect" => {
                let target = args.opt_str(0, "module").map_err(invalid)?;
                let timing = self.timing_of(target)?;
                let guard = self.state.guard.lock().unwrap_or_else(|e| e.into_inner());
                Ok(json!(guard.can_reflect(target, timing)))
            }
            "enter_reflection" => self.enter_reflection(&args),
            "exit_reflection" => Ok(json!(self.manual.pop().is_some())),
            "get_reflection_depth" => {
                let guard = self.state.guard.lock().unwrap_or_else(|e| e.into_inner());
                Ok(json!(guard.depth()))
            }
            "get_reflection_audit_trail" => serde_json::to_value(self.state.audit_trail())
                .map_err(|e| HostError::Runtime(e.to_string())),
            other => self.capability(other, &args),
        }
    }
}

/// 在阻塞线程上执行模块脚本；执行期间模块名位于反思栈上
pub(crate) async fn run_module_script(
    engine: &Engine,
    module: &Module,
    stage: Stage,
    state: &Arc<PassState>,
) -> ScriptRun {
    let Some(script) = module.script() else {
        return ScriptRun::default();
    };
    let settings = engine.settings();
    let limits = ScriptLimits {
        timeout: settings.script_timeout(module.requires_ai()),
        max_loop_iterations: settings.max_loop_iterations,
    };
    let host = EngineHost::new(
        engine.clone(),
        &module.name,
        stage,
        Arc::clone(state),
        Handle::current(),
        limits.timeout,
    );
    let _root = ReflectionScope::module(&state.guard, &module.name);
    tracing::debug!(module = %module.name, %stage, "running module script");
    let run = execute(script.to_string(), host, limits, state.cancel.clone()).await;
    match &run.error {
        None => tracing::debug!(module = %module.name, duration_ms = run.duration_ms, "module script finished"),
        Some(e) if run.is_cancelled() => {
            tracing::info!(module = %module.name, "module script cancelled: {}", e)
        }
        Some(e) => tracing::debug!(module = %module.name, kind = e.kind(), "module script failed: {}", e),
    }
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationContext;
    use crate::llm::{LlmError, MockLlmClient};
    use crate::modules::InMemoryModuleRepository;
    use tokio_util::sync::CancellationToken;

    async fn engine_with(modules: Vec<Module>, llm: MockLlmClient) -> Engine {
        let repo = InMemoryModuleRepository::with_modules(modules).await.unwrap();
        Engine::builder(Arc::new(repo), Arc::new(llm)).build().unwrap()
    }

    fn state(timing: ExecutionContext) -> Arc<PassState> {
        PassState::new(
            ConversationContext::new("c1").with_user_message("tell me a joke"),
            CancellationToken::new(),
            3,
            timing,
        )
    }

    fn module(name: &str, script: &str) -> Module {
        Module::new_scripted(name, script, "").unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_variables_and_capabilities() {
        let engine = engine_with(vec![], MockLlmClient::new()).await;
        let state = state(ExecutionContext::Immediate);
        state.set_variable("seen", json!(2));
        let m = module(
            "reader",
            "n = ctx.get_variable('seen') + 1\nctx.set_variable('shared', 'yes')\nmsg = ctx.get_last_user_message()\nmissing = ctx.get_variable('nope', 'dflt')",
        );
        let run = run_module_script(&engine, &m, Stage::One, &state).await;
        assert!(run.succeeded(), "{:?}", run.error);
        assert_eq!(run.outputs["n"], json!(3));
        assert_eq!(run.outputs["msg"], json!("tell me a joke"));
        assert_eq!(run.outputs["missing"], json!("dflt"));
        assert_eq!(state.get_variable("shared"), Some(json!("yes")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generate_uses_llm_and_records_audit() {
        let llm = MockLlmClient::new().with_replies(["a pun"]);
        let engine = engine_with(vec![], llm).await;
        let state = state(ExecutionContext::Immediate);
        let m = module("joker", "joke = ctx.generate('make a pun', temperature=0.2)");
        let run = run_module_script(&engine, &m, Stage::Two, &state).await;
        assert!(run.succeeded(), "{:?}", run.error);
        assert_eq!(run.outputs["joke"], json!("a pun"));
        let trail = state.audit_trail();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].kind, ReflectionKind::Generate);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generate_refused_outside_ai_stage() {
        let engine = engine_with(vec![], MockLlmClient::new()).await;
        let state = state(ExecutionContext::Immediate);
        let m = module("joker", "joke = ctx.generate('x')");
        let run = run_module_script(&engine, &m, Stage::One, &state).await;
        assert_eq!(run.error.map(|e| e.kind()), Some("runtime"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_provider_error_is_not_catchable() {
        let llm = MockLlmClient::new().with_failure(LlmError::Request("503".into()));
        let engine = engine_with(vec![], llm).await;
        let state = state(ExecutionContext::PostResponse);
        let m = module(
            "fragile",
            "before = 1\ntry:\n    x = ctx.generate('x')\nexcept Exception:\n    x = 'caught'",
        );
        let run = run_module_script(&engine, &m, Stage::Five, &state).await;
        assert_eq!(run.error.as_ref().map(|e| e.kind()), Some("provider"));
        assert_eq!(run.outputs.get("before"), Some(&json!(1)));
        assert!(!run.outputs.contains_key("x"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reflect_on_self_is_blocked_safely() {
        let engine = engine_with(
            vec![module("mood", "x = 1")
                .with_context(ExecutionContext::PostResponse)],
            MockLlmClient::new(),
        )
        .await;
        let state = state(ExecutionContext::PostResponse);
        let m = module("mood", "r = ctx.reflect('why?', module='mood')")
            .with_context(ExecutionContext::PostResponse);
        let run = run_module_script(&engine, &m, Stage::Five, &state).await;
        assert!(run.succeeded(), "{:?}", run.error);
        assert!(run.outputs["r"].as_str().unwrap().starts_with("[reflection blocked:"));
        assert_eq!(state.take_warnings()[0].kind, WarningKind::ReflectionBlocked);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reflect_on_module_renders_it_as_system_prompt() {
        let llm = MockLlmClient::new().with_replies(["insight"]);
        let engine = engine_with(
            vec![Module::new_static("persona", "You are terse.")
                .unwrap()
                .with_context(ExecutionContext::OnDemand)],
            llm,
        )
        .await;
        let state = state(ExecutionContext::PostResponse);
        let m = module("critic", "r = ctx.reflect('how did I do?', module='persona')\nd = ctx.get_reflection_depth()")
            .with_context(ExecutionContext::PostResponse);
        let run = run_module_script(&engine, &m, Stage::Five, &state).await;
        assert!(run.succeeded(), "{:?}", run.error);
        assert_eq!(run.outputs["r"], json!("insight"));
        assert_eq!(run.outputs["d"], json!(0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_manual_reflection_frames() {
        let engine = engine_with(vec![], MockLlmClient::new()).await;
        let state = state(ExecutionContext::PostResponse);
        let m = module(
            "deep",
            "a = ctx.enter_reflection()\nb = ctx.enter_reflection()\nc = ctx.enter_reflection()\nd = ctx.can_reflect()\ne = ctx.enter_reflection()\ndepth = ctx.get_reflection_depth()\nctx.exit_reflection()\nafter = ctx.get_reflection_depth()",
        )
        .with_context(ExecutionContext::PostResponse);
        let run = run_module_script(&engine, &m, Stage::Four, &state).await;
        assert!(run.succeeded(), "{:?}", run.error);
        for key in ["a", "b", "c"] {
            assert_eq!(run.outputs[key], json!(true));
        }
        assert_eq!(run.outputs["d"], json!(false));
        assert_eq!(run.outputs["e"], json!(false));
        assert_eq!(run.outputs["depth"], json!(3));
        assert_eq!(run.outputs["after"], json!(2));
        // 宿主销毁后剩余帧全部弹出
        assert_eq!(state.guard.lock().unwrap().depth(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_during_ai_call() {
        let llm = MockLlmClient::new().with_latency(Duration::from_secs(5));
        let engine = engine_with(vec![], llm).await;
        let state = state(ExecutionContext::Immediate);
        let token = state.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        });
        let started = Instant::now();
        let m = module("slow", "x = ctx.generate('x')");
        let run = run_module_script(&engine, &m, Stage::Two, &state).await;
        assert!(run.is_cancelled());
        assert!(started.elapsed() < Duration::from_millis(150));
    }
}

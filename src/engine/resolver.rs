//! 单次解析过程
//!
//! 一个 [`Pass`] 对应一次对外调用（第 1/2 阶段或第 4/5 阶段）。引用按深度优先展开：
//! 模块内容中的 `@` 引用在拼接前先递归解析。解析栈上重复出现的模块名即为环，整次解析失败。
//!
//! 脚本模块只在自己的阶段执行；更晚阶段的模块在顶层保留 `@name` 原样留给后续阶段，
//! 在其他模块内部被引用时解析为空并告警。PostResponse 模块在第 1/2 阶段只渲染内容，
//! 其 `${var}` 由上一轮的执行状态提供。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use super::host::run_module_script;
use super::reflection::{ReflectionGuard, SharedGuard};
use super::template::{finalize, find_references};
use super::{Engine, VariablePool, Warning, WarningKind};
use crate::conversation::ConversationContext;
use crate::core::{EngineError, ExecutionContext, Stage};
use crate::modules::{should_run, Module, ModuleFilter};
use crate::script::{ScriptError, ScriptRun};

/// 一次解析中在各模块、各脚本线程之间共享的状态
pub(crate) struct PassState {
    pub(crate) context: Arc<ConversationContext>,
    pub(crate) cancel: CancellationToken,
    pub(crate) guard: SharedGuard,
    pool: Mutex<VariablePool>,
    warnings: Mutex<Vec<Warning>>,
    /// reflect 不指定模块时使用的系统提示词
    snapshot: Mutex<String>,
}

impl PassState {
    pub(crate) fn new(
        context: ConversationContext,
        cancel: CancellationToken,
        max_depth: usize,
        timing: ExecutionContext,
    ) -> Arc<Self> {
        Arc::new(Self {
            context: Arc::new(context),
            cancel,
            guard: ReflectionGuard::shared(max_depth, timing),
            pool: Mutex::new(VariablePool::new()),
            warnings: Mutex::new(Vec::new()),
            snapshot: Mutex::new(String::new()),
        })
    }

    pub(crate) fn warn(&self, warning: Warning) {
        tracing::warn!(
            kind = ?warning.kind,
            module = warning.module.as_deref().unwrap_or("-"),
            "{}",
            warning.message
        );
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(warning);
    }

    pub(crate) fn take_warnings(&self) -> Vec<Warning> {
        std::mem::take(&mut *self.warnings.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub(crate) fn pool(&self) -> VariablePool {
        self.pool.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn get_variable(&self, name: &str) -> Option<JsonValue> {
        self.pool
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub(crate) fn set_variable(&self, name: &str, value: JsonValue) {
        self.pool
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value);
    }

    pub(crate) fn merge(&self, outputs: &VariablePool) {
        let mut pool = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        for (k, v) in outputs {
            pool.insert(k.clone(), v.clone());
        }
    }

    pub(crate) fn snapshot(&self) -> String {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn set_snapshot(&self, text: String) {
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = text;
    }

    pub(crate) fn audit_trail(&self) -> Vec<super::ReflectionAuditEntry> {
        self.guard
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .audit_trail()
            .to_vec()
    }
}

/// 被引用模块的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    /// 只展开内容
    Render,
    /// 先执行脚本再展开内容
    Run,
    /// 属于更晚的阶段
    Defer,
}

pub(crate) struct Pass {
    engine: Engine,
    state: Arc<PassState>,
    stage: Stage,
    stack: Vec<String>,
    cache: HashMap<String, String>,
    executed: HashSet<String>,
}

impl Pass {
    pub(crate) fn new(engine: Engine, state: Arc<PassState>, stage: Stage) -> Self {
        Self {
            engine,
            state,
            stage,
            stack: Vec::new(),
            cache: HashMap::new(),
            executed: HashSet::new(),
        }
    }

    pub(crate) fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    /// 展开文本中的全部模块引用（不替换变量）
    pub(crate) fn resolve_text<'a>(
        &'a mut self,
        text: &'a str,
    ) -> BoxFuture<'a, Result<String, EngineError>> {
        Box::pin(async move {
            let refs = find_references(text);
            if refs.is_empty() {
                return Ok(text.to_string());
            }
            let mut out = String::with_capacity(text.len());
            let mut last = 0;
            for r in refs {
                out.push_str(&text[last..r.start]);
                match self.resolve_reference(&r.name).await? {
                    Some(content) => out.push_str(&content),
                    None => out.push_str(&text[r.start..r.end]),
                }
                last = r.end;
            }
            out.push_str(&text[last..]);
            Ok(out)
        })
    }

    /// None 表示保留 `@name` 原样
    fn resolve_reference<'a>(
        &'a mut self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, EngineError>> {
        Box::pin(async move {
            if let Some(pos) = self.stack.iter().position(|n| n == name) {
                let mut cycle = self.stack[pos..].to_vec();
                cycle.push(name.to_string());
                return Err(EngineError::CircularReference { cycle });
            }
            if let Some(hit) = self.cache.get(name) {
                return Ok(Some(hit.clone()));
            }

            let Some(module) = self.engine.repository().get(name).await else {
                self.state.warn(Warning::new(
                    WarningKind::UnknownModule,
                    Some(name),
                    format!("module '@{name}' does not exist"),
                ));
                self.cache.insert(name.to_string(), String::new());
                return Ok(Some(String::new()));
            };

            if !module.active || !should_run(module.trigger.as_deref(), &self.state.context) {
                tracing::debug!(module = name, "module inactive or trigger not matched");
                self.cache.insert(name.to_string(), String::new());
                return Ok(Some(String::new()));
            }

            match self.plan(&module) {
                Plan::Defer if self.stack.is_empty() => return Ok(None),
                Plan::Defer => {
                    let parent = self.stack.last().cloned();
                    self.state.warn(Warning::new(
                        WarningKind::DeferredDependency,
                        parent.as_deref(),
                        format!(
                            "'@{name}' runs in {} and is not available in {}",
                            module.reference_stage(),
                            self.stage
                        ),
                    ));
                    return Ok(Some(String::new()));
                }
                Plan::Run => self.run(&module).await?,
                Plan::Render => {}
            }

            let rendered = self.render_content(&module).await?;
            self.cache.insert(name.to_string(), rendered.clone());
            Ok(Some(rendered))
        })
    }

    async fn render_content(&mut self, module: &Module) -> Result<String, EngineError> {
        self.stack.push(module.name.clone());
        let rendered = self.resolve_text(&module.content).await;
        self.stack.pop();
        rendered
    }

    fn plan(&self, module: &Module) -> Plan {
        if !module.is_scripted() || self.executed.contains(&module.name) {
            return Plan::Render;
        }
        if module.execution_context == ExecutionContext::PostResponse
            && self.stage.timing() == ExecutionContext::Immediate
        {
            return Plan::Render;
        }
        if module.reference_stage() <= self.stage {
            Plan::Run
        } else {
            Plan::Defer
        }
    }

    /// 执行模块脚本并把结果并入变量池
    pub(crate) async fn run(&mut self, module: &Module) -> Result<(), EngineError> {
        if self.state.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.executed.insert(module.name.clone());
        let run = run_module_script(&self.engine, module, self.stage, &self.state).await;
        absorb(&self.state, &module.name, self.stage, &run)
    }

    /// 按优先级执行 `text` 可达的、属于当前阶段的脚本模块；随后的渲染只展开其内容
    pub(crate) async fn run_scheduled(&mut self, text: &str) -> Result<(), EngineError> {
        let reachable: HashSet<String> = collect_reachable(&self.engine, text, &self.state, false)
            .await?
            .into_iter()
            .collect();
        if reachable.is_empty() {
            return Ok(());
        }
        let scheduled: Vec<Module> = self
            .engine
            .repository()
            .list(&ModuleFilter::stage(self.stage))
            .await
            .into_iter()
            .filter(|m| m.is_scripted() && reachable.contains(&m.name))
            .collect();
        tracing::debug!(stage = %self.stage, modules = scheduled.len(), "running scheduled modules");
        for module in &scheduled {
            if !self.executed.contains(&module.name) {
                self.run(module).await?;
            }
        }
        Ok(())
    }

    /// 反思用：执行目标模块（不论阶段）并返回完全渲染的内容
    pub(crate) async fn render_target(&mut self, name: &str) -> Result<String, EngineError> {
        let module = self
            .engine
            .repository()
            .get(name)
            .await
            .ok_or_else(|| EngineError::UnknownModule(name.to_string()))?;
        if module.is_scripted() {
            self.run(&module).await?;
        }
        let rendered = self.render_content(&module).await?;
        Ok(finalize(
            &rendered,
            &self.state.pool(),
            self.engine.settings().max_output_chars,
        ))
    }
}

/// 按错误类别处理脚本结果：运行期错误保留部分输出，编译错误与超时丢弃，
/// 第 2 阶段的提供方错误终止整次解析
pub(crate) fn absorb(
    state: &PassState,
    module: &str,
    stage: Stage,
    run: &ScriptRun,
) -> Result<(), EngineError> {
    for w in &run.warnings {
        state.warn(Warning::new(WarningKind::OutputCoerced, Some(module), w.clone()));
    }
    match &run.error {
        None => state.merge(&run.outputs),
        Some(ScriptError::Cancelled) => return Err(EngineError::Cancelled),
        Some(e @ ScriptError::Compile { .. }) => {
            state.warn(Warning::new(WarningKind::ScriptCompile, Some(module), e.to_string()))
        }
        Some(e @ ScriptError::Timeout { .. }) => {
            state.warn(Warning::new(WarningKind::ScriptTimeout, Some(module), e.to_string()))
        }
        Some(e @ ScriptError::Runtime { .. }) => {
            state.merge(&run.outputs);
            state.warn(Warning::new(WarningKind::ScriptRuntime, Some(module), e.to_string()));
        }
        Some(ScriptError::Provider { message }) => {
            if stage == Stage::Two {
                return Err(EngineError::Provider {
                    module: module.to_string(),
                    message: message.clone(),
                });
            }
            state.merge(&run.outputs);
            state.warn(Warning::new(WarningKind::Provider, Some(module), message.clone()));
        }
    }
    Ok(())
}

/// 收集模板可达的模块名（深度优先、去重），跳过未激活或触发器未命中的模块及其子树
///
/// `warn_unknown` 为 false 时不对未知模块告警（随后的渲染会告警）
pub(crate) async fn collect_reachable(
    engine: &Engine,
    template: &str,
    state: &PassState,
    warn_unknown: bool,
) -> Result<Vec<String>, EngineError> {
    let mut walk = Walk {
        engine,
        state,
        warn_unknown,
        stack: Vec::new(),
        seen: HashSet::new(),
        order: Vec::new(),
    };
    walk.visit(template).await?;
    Ok(walk.order)
}

struct Walk<'e> {
    engine: &'e Engine,
    state: &'e PassState,
    warn_unknown: bool,
    stack: Vec<String>,
    seen: HashSet<String>,
    order: Vec<String>,
}

impl Walk<'_> {
    fn visit<'a>(&'a mut self, text: &'a str) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            for r in find_references(text) {
                if let Some(pos) = self.stack.iter().position(|n| n == &r.name) {
                    let mut cycle = self.stack[pos..].to_vec();
                    cycle.push(r.name.clone());
                    return Err(EngineError::CircularReference { cycle });
                }
                if !self.seen.insert(r.name.clone()) {
                    continue;
                }
                let Some(module) = self.engine.repository().get(&r.name).await else {
                    if self.warn_unknown {
                        self.state.warn(Warning::new(
                            WarningKind::UnknownModule,
                            Some(&r.name),
                            format!("module '@{}' does not exist", r.name),
                        ));
                    }
                    continue;
                };
                if !module.active || !should_run(module.trigger.as_deref(), &self.state.context) {
                    continue;
                }
                self.order.push(module.name.clone());
                self.stack.push(module.name.clone());
                let nested = self.visit(&module.content).await;
                self.stack.pop();
                nested?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::modules::InMemoryModuleRepository;
    use crate::script::ScriptError;
    use serde_json::json;

    async fn engine(modules: Vec<Module>) -> Engine {
        let repo = InMemoryModuleRepository::with_modules(modules).await.unwrap();
        Engine::builder(Arc::new(repo), Arc::new(MockLlmClient::new()))
            .build()
            .unwrap()
    }

    fn state() -> Arc<PassState> {
        PassState::new(
            ConversationContext::new("c").with_user_message("hello"),
            CancellationToken::new(),
            3,
            ExecutionContext::Immediate,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_nested_static_modules_expand_depth_first() {
        let engine = engine(vec![
            Module::new_static("outer", "[@inner|@inner]").unwrap(),
            Module::new_static("inner", "<@leaf>").unwrap(),
            Module::new_static("leaf", "x").unwrap(),
        ])
        .await;
        let mut pass = Pass::new(engine, state(), Stage::One);
        assert_eq!(pass.resolve_text("@outer!").await.unwrap(), "[<x>|<x>]!");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transitive_cycle_names_path() {
        let engine = engine(vec![
            Module::new_static("a", "@b").unwrap(),
            Module::new_static("b", "@c").unwrap(),
            Module::new_static("c", "@a").unwrap(),
        ])
        .await;
        let mut pass = Pass::new(engine, state(), Stage::One);
        match pass.resolve_text("start @a").await {
            Err(EngineError::CircularReference { cycle }) => {
                assert_eq!(cycle, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_module_warns_and_resolves_empty() {
        let engine = engine(vec![]).await;
        let state = state();
        let mut pass = Pass::new(engine, state.clone(), Stage::One);
        assert_eq!(pass.resolve_text("a@ghost b").await.unwrap(), "a@ghost b");
        assert_eq!(pass.resolve_text("a @ghost b").await.unwrap(), "a  b");
        let warnings = state.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::UnknownModule);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_later_stage_reference_deferred() {
        let engine = engine(vec![
            Module::new_scripted("muse", "idea = ctx.generate('x')", "${idea}").unwrap(),
            Module::new_static("wrapper", "w(@muse)").unwrap(),
        ])
        .await;
        let state = state();
        let mut pass = Pass::new(engine, state.clone(), Stage::One);
        assert_eq!(
            pass.resolve_text("@muse / @wrapper").await.unwrap(),
            "@muse / w()"
        );
        let warnings = state.take_warnings();
        assert_eq!(warnings[0].kind, WarningKind::DeferredDependency);
        assert_eq!(warnings[0].module.as_deref(), Some("wrapper"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_trigger_miss_resolves_empty() {
        let engine = engine(vec![Module::new_static("weather", "umbrella")
            .unwrap()
            .with_trigger("rain|snow")])
        .await;
        let mut pass = Pass::new(engine, state(), Stage::One);
        assert_eq!(pass.resolve_text("[@weather]").await.unwrap(), "[]");
    }

    #[test]
    fn test_absorb_rules() {
        let state = state();
        let outputs = VariablePool::from([("a".to_string(), json!(1))]);

        let runtime = ScriptRun {
            outputs: outputs.clone(),
            error: Some(ScriptError::Runtime { line: 2, message: "boom".into() }),
            ..Default::default()
        };
        absorb(&state, "m", Stage::One, &runtime).unwrap();
        assert_eq!(state.get_variable("a"), Some(json!(1)));

        let timeout = ScriptRun {
            outputs: VariablePool::from([("b".to_string(), json!(2))]),
            error: Some(ScriptError::Timeout { timeout_ms: 10 }),
            ..Default::default()
        };
        absorb(&state, "m", Stage::One, &timeout).unwrap();
        assert_eq!(state.get_variable("b"), None);

        let provider = ScriptRun {
            error: Some(ScriptError::Provider { message: "503".into() }),
            ..Default::default()
        };
        assert!(matches!(
            absorb(&state, "m", Stage::Two, &provider),
            Err(EngineError::Provider { .. })
        ));
        assert!(absorb(&state, "m", Stage::Five, &provider).is_ok());
    }
}

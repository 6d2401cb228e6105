//! 分阶段编排器
//!
//! 第 1/2 阶段生成主 AI 调用使用的系统提示词；第 3 阶段由调用方完成；
//! 第 4/5 阶段在拿到 AI 回复后执行 PostResponse 模块并写入执行状态。
//! 每个模块开始前与每次 AI 调用时检查会话令牌，取消时返回 [`Outcome::Cancelled`]。

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::host::run_module_script;
use super::resolver::{absorb, collect_reachable, Pass, PassState};
use super::template::finalize;
use super::{ModuleExecution, PostResponseReport, PromptResolution, Warning, WarningKind};
use crate::config::EngineSection;
use crate::conversation::ConversationContext;
use crate::core::{EngineError, ExecutionContext, Outcome, PipelineState, Stage};
use crate::llm::LlmClient;
use crate::modules::{Module, ModuleFilter, ModuleRepository};
use crate::plugins::{CapabilityInfo, CapabilityRegistry, InMemoryMessageHistory, MessageHistory};
use crate::script::{classify, Classification, ScriptError, ScriptRun};
use crate::store::{
    ExecutionMetadata, ExecutionRecord, ExecutionStateStore, InMemoryExecutionStateStore,
};

/// 把内部的取消错误转换为区分出来的结局
fn lift<T>(result: Result<T, EngineError>) -> Result<Outcome<T>, EngineError> {
    match result {
        Ok(v) => Ok(Outcome::Completed(v)),
        Err(EngineError::Cancelled) => Ok(Outcome::Cancelled),
        Err(e) => Err(e),
    }
}

struct EngineInner {
    repository: Arc<dyn ModuleRepository>,
    registry: Arc<CapabilityRegistry>,
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn ExecutionStateStore>,
    history: Arc<dyn MessageHistory>,
    settings: EngineSection,
}

/// 引擎句柄；克隆开销为一次 Arc 计数
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

pub struct EngineBuilder {
    repository: Arc<dyn ModuleRepository>,
    llm: Arc<dyn LlmClient>,
    store: Option<Arc<dyn ExecutionStateStore>>,
    history: Option<Arc<dyn MessageHistory>>,
    registry: Option<Arc<CapabilityRegistry>>,
    settings: EngineSection,
}

impl EngineBuilder {
    pub fn with_store(mut self, store: Arc<dyn ExecutionStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn MessageHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// 默认使用进程级注册表
    pub fn with_registry(mut self, registry: Arc<CapabilityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_settings(mut self, settings: EngineSection) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let registry = match self.registry {
            Some(r) => r,
            None => CapabilityRegistry::global()?,
        };
        Ok(Engine {
            inner: Arc::new(EngineInner {
                repository: self.repository,
                registry,
                llm: self.llm,
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(InMemoryExecutionStateStore::new())),
                history: self
                    .history
                    .unwrap_or_else(|| Arc::new(InMemoryMessageHistory::new())),
                settings: self.settings,
            }),
        })
    }
}

impl Engine {
    pub fn builder(repository: Arc<dyn ModuleRepository>, llm: Arc<dyn LlmClient>) -> EngineBuilder {
        EngineBuilder {
            repository,
            llm,
            store: None,
            history: None,
            registry: None,
            settings: EngineSection::default(),
        }
    }

    pub fn repository(&self) -> &Arc<dyn ModuleRepository> {
        &self.inner.repository
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.inner.registry
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.inner.llm
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStateStore> {
        &self.inner.store
    }

    pub fn history(&self) -> &Arc<dyn MessageHistory> {
        &self.inner.history
    }

    pub fn settings(&self) -> &EngineSection {
        &self.inner.settings
    }

    fn new_state(
        &self,
        context: ConversationContext,
        cancel: CancellationToken,
        timing: ExecutionContext,
    ) -> Arc<PassState> {
        PassState::new(context, cancel, self.inner.settings.max_reflection_depth, timing)
    }

    /// 上一轮第 4/5 阶段的输出变量作为初值；第 5 阶段覆盖第 4 阶段的同名变量
    async fn seed_prior_state(&self, state: &PassState) {
        let conversation_id = &state.context.conversation_id;
        match self.inner.store.load(conversation_id).await {
            Ok(mut records) => {
                records.sort_by(|a, b| (a.stage, &a.module).cmp(&(b.stage, &b.module)));
                for record in &records {
                    state.merge(&record.variables);
                }
                tracing::debug!(conversation = %conversation_id, records = records.len(), "prior execution state loaded");
            }
            Err(e) => state.warn(Warning::new(
                WarningKind::Store,
                None,
                format!("failed to load execution state: {e}"),
            )),
        }
    }

    /// 第 1、2 阶段：解析模板，返回交给主 AI 调用的系统提示词
    pub async fn resolve_stages_1_and_2(
        &self,
        template: &str,
        context: &ConversationContext,
        cancel: CancellationToken,
    ) -> Result<Outcome<PromptResolution>, EngineError> {
        let state = self.new_state(context.clone(), cancel, ExecutionContext::Immediate);
        let result = self.run_immediate_stages(template, &state).await;
        if let Err(EngineError::Cancelled) = &result {
            tracing::info!(
                conversation = %context.conversation_id,
                state = ?PipelineState::Stage1.cancel(),
                "prompt resolution cancelled"
            );
        }
        lift(result)
    }

    async fn run_immediate_stages(
        &self,
        template: &str,
        state: &Arc<PassState>,
    ) -> Result<PromptResolution, EngineError> {
        let max_chars = self.inner.settings.max_output_chars;
        let conversation = state.context.conversation_id.clone();
        self.seed_prior_state(state).await;

        let mut pipeline = PipelineState::Stage1;
        tracing::info!(conversation = %conversation, state = ?pipeline, "stage started");
        let mut pass = Pass::new(self.clone(), Arc::clone(state), Stage::One);
        pass.run_scheduled(template).await?;
        let stage1 = pass.resolve_text(template).await?;

        if state.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        state.set_snapshot(finalize(&stage1, &state.pool(), max_chars));
        pipeline = pipeline.next().unwrap_or(PipelineState::Done);
        tracing::info!(conversation = %conversation, state = ?pipeline, "stage started");
        pass.set_stage(Stage::Two);
        pass.run_scheduled(&stage1).await?;
        let stage2 = pass.resolve_text(&stage1).await?;

        let variable_pool = state.pool();
        let resolved_prompt = finalize(&stage2, &variable_pool, max_chars);
        pipeline = pipeline.next().unwrap_or(PipelineState::Done);
        tracing::info!(
            conversation = %conversation,
            state = ?pipeline,
            prompt_chars = resolved_prompt.chars().count(),
            "system prompt resolved"
        );
        Ok(PromptResolution {
            resolved_prompt,
            variable_pool,
            warnings: state.take_warnings(),
            reflection_audit: state.audit_trail(),
        })
    }

    /// 第 4、5 阶段：执行模板可达的 PostResponse 模块并写入执行状态
    pub async fn execute_stages_4_and_5(
        &self,
        template: &str,
        ai_response: &str,
        context: &ConversationContext,
        cancel: CancellationToken,
    ) -> Result<Outcome<PostResponseReport>, EngineError> {
        let context = context.clone().with_ai_response(ai_response);
        let state = self.new_state(context, cancel, ExecutionContext::PostResponse);
        let mut report = PostResponseReport::default();
        let result = self.run_post_response_stages(template, &state, &mut report).await;
        report.warnings = state.take_warnings();
        report.reflection_audit = state.audit_trail();
        if let Err(EngineError::Cancelled) = &result {
            tracing::info!(
                conversation = %state.context.conversation_id,
                completed = report.executions.len(),
                "post-response stages cancelled"
            );
        }
        lift(result.map(|()| report))
    }

    async fn run_post_response_stages(
        &self,
        template: &str,
        state: &Arc<PassState>,
        report: &mut PostResponseReport,
    ) -> Result<(), EngineError> {
        self.seed_prior_state(state).await;
        let reachable: HashSet<String> = collect_reachable(self, template, state, true)
            .await?
            .into_iter()
            .collect();

        for (stage, pipeline) in [
            (Stage::Four, PipelineState::Stage4),
            (Stage::Five, PipelineState::Stage5),
        ] {
            if state.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let modules: Vec<Module> = self
                .inner
                .repository
                .list(&ModuleFilter::stage(stage))
                .await
                .into_iter()
                .filter(|m| m.is_scripted() && reachable.contains(&m.name))
                .collect();
            tracing::info!(
                conversation = %state.context.conversation_id,
                state = ?pipeline,
                modules = modules.len(),
                "stage started"
            );
            for module in modules {
                if state.cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                let execution = self.execute_post_response_module(&module, stage, state, report).await?;
                report.executions.push(execution);
            }
        }
        tracing::info!(
            conversation = %state.context.conversation_id,
            state = ?PipelineState::Done,
            executed = report.executions.len(),
            "post-response stages finished"
        );
        Ok(())
    }

    async fn execute_post_response_module(
        &self,
        module: &Module,
        stage: Stage,
        state: &Arc<PassState>,
        report: &mut PostResponseReport,
    ) -> Result<ModuleExecution, EngineError> {
        let run = run_module_script(self, module, stage, state).await;
        absorb(state, &module.name, stage, &run)?;

        // 编译错误与超时不写入；运行期 / 提供方错误写入部分输出
        let persist = matches!(
            run.error,
            None | Some(ScriptError::Runtime { .. }) | Some(ScriptError::Provider { .. })
        );
        let error = run.error.as_ref().map(|e| e.to_string());
        let mut persisted = false;
        if persist {
            let record = ExecutionRecord {
                conversation_id: state.context.conversation_id.clone(),
                module: module.name.clone(),
                stage: stage.number(),
                variables: run.outputs.clone(),
                metadata: ExecutionMetadata {
                    success: run.error.is_none(),
                    duration_ms: run.duration_ms,
                    error: error.clone(),
                    executed_at: chrono::Utc::now(),
                },
            };
            match self.inner.store.upsert(record).await {
                Ok(()) => persisted = true,
                Err(e) => state.warn(Warning::new(
                    WarningKind::Store,
                    Some(&module.name),
                    format!("failed to persist execution state: {e}"),
                )),
            }
        }
        report
            .outputs_by_module
            .insert(module.name.clone(), run.outputs.clone());
        Ok(ModuleExecution {
            module: module.name.clone(),
            stage: stage.number(),
            success: run.error.is_none(),
            duration_ms: run.duration_ms,
            error,
            persisted,
        })
    }

    /// 在后台执行第 4/5 阶段（不阻塞回复的投递）
    pub fn spawn_post_response(
        &self,
        template: String,
        ai_response: String,
        context: ConversationContext,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<Outcome<PostResponseReport>, EngineError>> {
        let engine = self.clone();
        tokio::spawn(async move {
            engine
                .execute_stages_4_and_5(&template, &ai_response, &context, cancel)
                .await
        })
    }

    /// 供模块编辑界面在保存前使用
    pub fn classify_script(&self, script: &str) -> Classification {
        classify(script)
    }

    /// 沙箱试运行：不读写执行状态
    pub async fn test_script(
        &self,
        script: &str,
        sample: &ConversationContext,
        cancel: CancellationToken,
    ) -> Result<ScriptRun, EngineError> {
        let module = Module::new_scripted("script_test", script, "")?;
        let stage = if module.requires_ai() {
            Stage::Two
        } else {
            Stage::One
        };
        let state = self.new_state(sample.clone(), cancel, ExecutionContext::OnDemand);
        let mut run = run_module_script(self, &module, stage, &state).await;
        run.warnings
            .extend(state.take_warnings().into_iter().map(|w| w.to_string()));
        Ok(run)
    }

    /// 删除模块，并级联删除其执行状态
    pub async fn delete_module(&self, name: &str) -> Result<Module, EngineError> {
        let module = self.inner.repository.remove(name).await?;
        let removed = self.inner.store.delete_module(name).await?;
        tracing::info!(module = name, state_records = removed, "module deleted");
        Ok(module)
    }

    pub fn list_capabilities(&self) -> Vec<CapabilityInfo> {
        self.inner.registry.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::modules::InMemoryModuleRepository;
    use crate::store::sample_record;
    use serde_json::json;

    async fn setup(modules: Vec<Module>, llm: MockLlmClient) -> (Engine, Arc<InMemoryExecutionStateStore>) {
        let repo = InMemoryModuleRepository::with_modules(modules).await.unwrap();
        let store = Arc::new(InMemoryExecutionStateStore::new());
        let engine = Engine::builder(Arc::new(repo), Arc::new(llm))
            .with_store(store.clone())
            .build()
            .unwrap();
        (engine, store)
    }

    fn ctx() -> ConversationContext {
        ConversationContext::new("c1").with_user_message("hi there")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_script_output_substituted() {
        let (engine, _) = setup(
            vec![Module::new_scripted("greet", "result = \"hi\"", "${result} ${missing}").unwrap()],
            MockLlmClient::new(),
        )
        .await;
        let out = engine
            .resolve_stages_1_and_2("@greet", &ctx(), CancellationToken::new())
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(out.resolved_prompt, "hi ${missing}");
        assert_eq!(out.variable_pool["result"], json!("hi"));
        assert!(out.warnings.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_substituted_value_keeps_escaped_reference() {
        let (engine, _) = setup(
            vec![Module::new_scripted("paths", r"path = 'C:\\@home'", "${path}").unwrap()],
            MockLlmClient::new(),
        )
        .await;
        let out = engine
            .resolve_stages_1_and_2("@paths", &ctx(), CancellationToken::new())
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(out.resolved_prompt, r"C:\@home");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stage_two_sees_stage_one_variables() {
        let llm = MockLlmClient::new().with_replies(["be cheerful"]);
        let (engine, _) = setup(
            vec![
                Module::new_scripted("clock", "hour = 9", "It is ${hour}h.").unwrap(),
                Module::new_scripted(
                    "tone",
                    "advice = ctx.generate('hour is ' + str(ctx.get_variable('hour')))",
                    "Tone: ${advice}",
                )
                .unwrap(),
            ],
            llm,
        )
        .await;
        let out = engine
            .resolve_stages_1_and_2("@clock @tone \\@clock", &ctx(), CancellationToken::new())
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(out.resolved_prompt, "It is 9h. Tone: be cheerful @clock");
        assert_eq!(out.reflection_audit.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cycle_is_fatal() {
        let (engine, _) = setup(
            vec![Module::new_static("loop_a", "@loop_a").unwrap()],
            MockLlmClient::new(),
        )
        .await;
        let err = engine
            .resolve_stages_1_and_2("@loop_a", &ctx(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("loop_a -> loop_a"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stage_two_provider_error_aborts() {
        let llm = MockLlmClient::new().with_failure(crate::llm::LlmError::Request("down".into()));
        let (engine, _) = setup(
            vec![Module::new_scripted("muse", "x = ctx.generate('y')", "${x}").unwrap()],
            llm,
        )
        .await;
        let err = engine
            .resolve_stages_1_and_2("@muse", &ctx(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Provider { ref module, .. } if module == "muse"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_prior_turn_state_feeds_stage_one() {
        let (engine, store) = setup(
            vec![Module::new_scripted("mood", "mood = 'calm'", "Mood: ${mood}")
                .unwrap()
                .with_context(ExecutionContext::PostResponse)],
            MockLlmClient::new(),
        )
        .await;
        store.upsert(sample_record("c1", "mood", 4, "happy")).await.unwrap();
        let out = engine
            .resolve_stages_1_and_2("@mood", &ctx(), CancellationToken::new())
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(out.resolved_prompt, "Mood: happy");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_post_response_persistence_rules() {
        let (engine, store) = setup(
            vec![
                Module::new_scripted("ok_mod", "summary = ctx.get_ai_response()", "")
                    .unwrap()
                    .with_context(ExecutionContext::PostResponse)
                    .with_priority(2),
                Module::new_scripted("half", "a = 1\nb = [][1]", "")
                    .unwrap()
                    .with_context(ExecutionContext::PostResponse)
                    .with_priority(1),
                Module::new_scripted("broken", "x = (", "")
                    .unwrap()
                    .with_context(ExecutionContext::PostResponse),
                Module::new_scripted("unused", "u = 1", "")
                    .unwrap()
                    .with_context(ExecutionContext::PostResponse),
            ],
            MockLlmClient::new(),
        )
        .await;
        let report = engine
            .execute_stages_4_and_5("@ok_mod @half @broken", "the answer", &ctx(), CancellationToken::new())
            .await
            .unwrap()
            .completed()
            .unwrap();

        let order: Vec<&str> = report.executions.iter().map(|e| e.module.as_str()).collect();
        assert_eq!(order, vec!["broken", "half", "ok_mod"]);
        assert_eq!(report.outputs_by_module["ok_mod"]["summary"], json!("the answer"));

        let records = store.load("c1").await.unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.module.as_str()).collect();
        assert_eq!(names, vec!["half", "ok_mod"]);
        let half = &records[0];
        assert!(!half.metadata.success);
        assert_eq!(half.variables["a"], json!(1));
        assert!(report.executions.iter().any(|e| e.module == "broken" && !e.persisted));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancelled_before_start_writes_nothing() {
        let (engine, store) = setup(
            vec![Module::new_scripted("mood", "mood = 'calm'", "")
                .unwrap()
                .with_context(ExecutionContext::PostResponse)],
            MockLlmClient::new(),
        )
        .await;
        let token = CancellationToken::new();
        token.cancel();
        let outcome = engine
            .execute_stages_4_and_5("@mood", "r", &ctx(), token)
            .await
            .unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_static_post_response_module_not_executed() {
        let (engine, store) = setup(
            vec![Module::new_static("note", "remember this")
                .unwrap()
                .with_context(ExecutionContext::PostResponse)],
            MockLlmClient::new(),
        )
        .await;
        let report = engine
            .execute_stages_4_and_5("@note", "r", &ctx(), CancellationToken::new())
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert!(report.executions.is_empty());
        assert!(report.outputs_by_module.is_empty());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stage_one_runs_by_priority_not_template_order() {
        let (engine, _) = setup(
            vec![
                Module::new_scripted("a", "seen = ctx.get_variable('b_out')", "[${seen}]")
                    .unwrap()
                    .with_priority(5),
                Module::new_scripted("b", "b_out = 'from b'", "")
                    .unwrap()
                    .with_priority(1),
            ],
            MockLlmClient::new(),
        )
        .await;
        let out = engine
            .resolve_stages_1_and_2("@a @b", &ctx(), CancellationToken::new())
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(out.resolved_prompt, "[from b] ");
        assert_eq!(out.variable_pool["seen"], json!("from b"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_module_cascades() {
        let (engine, store) = setup(
            vec![Module::new_static("gone", "x").unwrap()],
            MockLlmClient::new(),
        )
        .await;
        store.upsert(sample_record("c1", "gone", 4, "x")).await.unwrap();
        engine.delete_module("gone").await.unwrap();
        assert_eq!(store.len().await, 0);
        assert!(engine.repository().get("gone").await.is_none());
        assert!(engine.delete_module("gone").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_script_dry_run() {
        let (engine, store) = setup(vec![], MockLlmClient::new()).await;
        let run = engine
            .test_script("who = ctx.get_last_user_message()", &ctx(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.outputs["who"], json!("hi there"));
        assert_eq!(store.len().await, 0);
        assert!(!engine.classify_script("x = ctx.get_current_time()").requires_ai);
    }
}

//! 端到端流水线测试：第 1/2 阶段 → 主 AI 回复 → 第 4/5 阶段 → 下一轮

use std::sync::Arc;
use std::time::{Duration, Instant};

use hive::conversation::ConversationContext;
use hive::core::ExecutionContext;
use hive::llm::MockLlmClient;
use hive::modules::{InMemoryModuleRepository, Module};
use hive::store::{ExecutionStateStore, InMemoryExecutionStateStore, SqliteExecutionStateStore};
use hive::{Engine, Outcome, SessionSupervisor};

const TEMPLATE: &str = "@greet @muse @mood @recap";

fn modules() -> Vec<Module> {
    vec![
        Module::new_scripted("greet", "who = 'friend'", "Hello ${who}.").unwrap(),
        Module::new_scripted("muse", "line = ctx.generate('inspire me')", "Muse: ${line}").unwrap(),
        Module::new_scripted(
            "mood",
            "mood = 'curious' if '?' in ctx.get_ai_response() else 'calm'",
            "Mood: ${mood}",
        )
        .unwrap()
        .with_context(ExecutionContext::PostResponse),
        Module::new_scripted("recap", "recap = ctx.generate('summarise the reply')", "Recap: ${recap}")
            .unwrap()
            .with_context(ExecutionContext::PostResponse),
    ]
}

async fn engine_with(llm: MockLlmClient, store: Arc<dyn ExecutionStateStore>) -> Engine {
    let repo = InMemoryModuleRepository::with_modules(modules()).await.unwrap();
    Engine::builder(Arc::new(repo), Arc::new(llm))
        .with_store(store)
        .build()
        .unwrap()
}

fn turn(message: &str) -> ConversationContext {
    ConversationContext::new("conv-1").with_user_message(message)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_turn_feeds_next_turn() {
    let llm = MockLlmClient::new().with_replies(["sparkle", "short recap", "again"]);
    let store = Arc::new(InMemoryExecutionStateStore::new());
    let engine = engine_with(llm, store.clone()).await;
    let supervisor = SessionSupervisor::new();

    let session = supervisor.begin("conv-1");
    let first = engine
        .resolve_stages_1_and_2(TEMPLATE, &turn("hello"), session.token.clone())
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(
        first.resolved_prompt,
        "Hello friend. Muse: sparkle Mood: ${mood} Recap: ${recap}"
    );

    let report = engine
        .spawn_post_response(
            TEMPLATE.to_string(),
            "Why not?".to_string(),
            turn("hello"),
            session.token.clone(),
        )
        .await
        .unwrap()
        .unwrap()
        .completed()
        .unwrap();
    supervisor.finish(&session);

    let order: Vec<(&str, u8)> = report
        .executions
        .iter()
        .map(|e| (e.module.as_str(), e.stage))
        .collect();
    assert_eq!(order, vec![("mood", 4), ("recap", 5)]);
    assert!(report.executions.iter().all(|e| e.success && e.persisted));
    assert_eq!(store.len().await, 2);

    let session = supervisor.begin("conv-1");
    let second = engine
        .resolve_stages_1_and_2(TEMPLATE, &turn("and now?"), session.token.clone())
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(
        second.resolved_prompt,
        "Hello friend. Muse: again Mood: curious Recap: short recap"
    );
    assert_eq!(supervisor.active_sessions(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_new_message_cancels_running_resolution() {
    let llm = MockLlmClient::new().with_latency(Duration::from_secs(5));
    let store = Arc::new(InMemoryExecutionStateStore::new());
    let engine = engine_with(llm, store.clone()).await;
    let supervisor = Arc::new(SessionSupervisor::new());

    let first = supervisor.begin("conv-1");
    let running = {
        let engine = engine.clone();
        let token = first.token.clone();
        tokio::spawn(async move {
            engine
                .resolve_stages_1_and_2("@muse", &turn("slow"), token)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let _second = supervisor.begin("conv-1");
    let outcome = running.await.unwrap().unwrap();
    assert!(matches!(outcome, Outcome::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(store.len().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sqlite_state_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    {
        let store = Arc::new(SqliteExecutionStateStore::open(&path).unwrap());
        let engine = engine_with(MockLlmClient::new().with_replies(["done"]), store).await;
        engine
            .execute_stages_4_and_5("@mood @recap", "Really?", &turn("hi"), Default::default())
            .await
            .unwrap()
            .completed()
            .unwrap();
    }

    let store = Arc::new(SqliteExecutionStateStore::open(&path).unwrap());
    let records = store.load("conv-1").await.unwrap();
    assert_eq!(records.len(), 2);

    let engine = engine_with(MockLlmClient::new(), store).await;
    let out = engine
        .resolve_stages_1_and_2("@mood / @recap", &turn("again"), Default::default())
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(out.resolved_prompt, "Mood: curious / Recap: done");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_during_stage_five_keeps_stage_four_record() {
    let llm = MockLlmClient::new().with_latency(Duration::from_secs(5));
    let store = Arc::new(InMemoryExecutionStateStore::new());
    let engine = engine_with(llm, store.clone()).await;
    let supervisor = SessionSupervisor::new();

    let session = supervisor.begin("conv-1");
    let running = engine.spawn_post_response(
        "@mood @recap".to_string(),
        "Anything else?".to_string(),
        turn("hi"),
        session.token.clone(),
    );
    // mood（第 4 阶段）很快完成，recap 的 generate 仍在等待
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    session.token.cancel();
    let outcome = running.await.unwrap().unwrap();
    assert!(matches!(outcome, Outcome::Cancelled));
    assert!(started.elapsed() < Duration::from_millis(150));

    let records = store.load("conv-1").await.unwrap();
    let stored: Vec<(&str, u8)> = records
        .iter()
        .map(|r| (r.module.as_str(), r.stage))
        .collect();
    assert_eq!(stored, vec![("mood", 4)]);
}

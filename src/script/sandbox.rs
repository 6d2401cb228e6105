//! 沙箱入口：编译、受限执行、输出提取
//!
//! 解释器内部使用 `Rc`，因此整个执行过程被限制在一个阻塞线程内；
//! 异步调用方通过 [`execute`] 在 `spawn_blocking` 上运行，并与取消令牌赛跑。

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use super::interpreter::{Interpreter, ScriptHost};
use super::parser::parse;
use super::policy::{RestrictedPolicy, SandboxPolicy};
use super::value::OutputValue;
use super::ScriptError;

/// 阻塞线程在超时后仍未返回时的额外等待
const JOIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy)]
pub struct ScriptLimits {
    pub timeout: Duration,
    pub max_loop_iterations: u64,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_loop_iterations: 100_000,
        }
    }
}

/// 一次脚本执行的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScriptRun {
    /// 顶层非下划线绑定（超时或取消时为空）
    pub outputs: BTreeMap<String, JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_error")]
    pub error: Option<ScriptError>,
    pub duration_ms: u64,
    /// `print` 输出
    pub printed: Vec<String>,
    /// 被转为字符串的输出变量等非致命问题
    pub warnings: Vec<String>,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<ScriptError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_str(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl ScriptRun {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, Some(ScriptError::Cancelled))
    }

    fn failed(error: ScriptError, started: Instant) -> Self {
        Self {
            error: Some(error),
            duration_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        }
    }
}

/// 同步执行（调用方已处于阻塞上下文）
pub fn run_script(
    source: &str,
    host: &mut dyn ScriptHost,
    policy: &dyn SandboxPolicy,
    timeout: Duration,
    cancel: CancellationToken,
) -> ScriptRun {
    let started = Instant::now();
    let program = match parse(source) {
        Ok(p) => p,
        Err(e) => return ScriptRun::failed(e, started),
    };

    let mut interp = Interpreter::new(host, policy, cancel, timeout);
    let result = interp.run(&program);
    let printed = interp.take_printed();
    for line in &printed {
        tracing::debug!(line = %line, "script print");
    }

    let mut run = ScriptRun {
        printed,
        ..Default::default()
    };
    match result {
        Ok(()) => extract_outputs(interp.globals(), &mut run),
        Err(e @ ScriptError::Runtime { .. }) | Err(e @ ScriptError::Provider { .. }) => {
            extract_outputs(interp.globals(), &mut run);
            run.error = Some(e);
        }
        Err(e) => run.error = Some(e),
    }
    run.duration_ms = started.elapsed().as_millis() as u64;
    run
}

fn extract_outputs(
    globals: &std::collections::HashMap<String, super::Value>,
    run: &mut ScriptRun,
) {
    for (name, value) in globals {
        if name.starts_with('_') {
            continue;
        }
        match value.to_output() {
            OutputValue::Json(json) => {
                run.outputs.insert(name.clone(), json);
            }
            OutputValue::Coerced(json) => {
                run.warnings.push(format!(
                    "output '{}' of type {} is not JSON serializable; stored as string",
                    name,
                    value.type_name()
                ));
                run.outputs.insert(name.clone(), json);
            }
            OutputValue::Skip => {}
        }
    }
}

/// 在阻塞线程上执行脚本
///
/// 令牌取消时立即返回 `Cancelled`，不等待阻塞线程退出（它会在下一条语句处自行停止）。
pub async fn execute<H>(
    source: String,
    mut host: H,
    limits: ScriptLimits,
    cancel: CancellationToken,
) -> ScriptRun
where
    H: ScriptHost + Send + 'static,
{
    let started = Instant::now();
    let token = cancel.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let policy = RestrictedPolicy::new(limits.max_loop_iterations);
        run_script(&source, &mut host, &policy, limits.timeout, token)
    });

    tokio::select! {
        joined = handle => match joined {
            Ok(run) => run,
            Err(e) => ScriptRun::failed(
                ScriptError::Runtime { line: 0, message: format!("script worker failed: {e}") },
                started,
            ),
        },
        _ = cancel.cancelled() => ScriptRun::failed(ScriptError::Cancelled, started),
        _ = tokio::time::sleep(limits.timeout + JOIN_GRACE) => ScriptRun::failed(
            ScriptError::Timeout { timeout_ms: limits.timeout.as_millis() as u64 },
            started,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::interpreter::{HostError, NullHost};
    use serde_json::json;

    fn run(src: &str) -> ScriptRun {
        let policy = RestrictedPolicy::default();
        run_script(
            src,
            &mut NullHost,
            &policy,
            Duration::from_secs(5),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_outputs_exclude_private_and_callables() {
        let r = run("result = 'hi'\n_hidden = 1\nimport math\ndef f():\n    pass\nn = [1, 2]");
        assert!(r.succeeded());
        assert_eq!(r.outputs.len(), 2);
        assert_eq!(r.outputs["result"], json!("hi"));
        assert_eq!(r.outputs["n"], json!([1, 2]));
    }

    #[test]
    fn test_runtime_error_keeps_partial_outputs() {
        let r = run("before = 1\nx = [][3]\nafter = 2");
        assert_eq!(r.outputs.get("before"), Some(&json!(1)));
        assert!(!r.outputs.contains_key("after"));
        let err = r.error.unwrap();
        assert_eq!(err.kind(), "runtime");
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn test_compile_error_runs_nothing() {
        let r = run("x = 1\nif x\n    y = 2");
        assert!(r.outputs.is_empty());
        assert_eq!(r.error.map(|e| e.kind()), Some("compile"));
    }

    #[test]
    fn test_timeout_discards_outputs() {
        let policy = RestrictedPolicy::new(u64::MAX);
        let r = run_script(
            "x = 1\nwhile True:\n    x += 1",
            &mut NullHost,
            &policy,
            Duration::from_millis(30),
            CancellationToken::new(),
        );
        assert!(r.outputs.is_empty());
        assert_eq!(r.error.map(|e| e.kind()), Some("timeout"));
    }

    #[test]
    fn test_non_json_output_is_coerced_with_warning() {
        let r = run("from datetime import datetime\nwhen = datetime(2024, 5, 1, 8, 30)");
        assert_eq!(r.outputs["when"], json!("2024-05-01 08:30:00"));
        assert_eq!(r.warnings.len(), 1);
    }

    #[test]
    fn test_print_is_captured() {
        let r = run("print('a', 1)\nprint('b')");
        assert_eq!(r.printed, vec!["a 1".to_string(), "b".to_string()]);
    }

    struct SlowHost;

    impl ScriptHost for SlowHost {
        fn call(
            &mut self,
            _method: &str,
            _args: Vec<JsonValue>,
            _kwargs: serde_json::Map<String, JsonValue>,
        ) -> Result<JsonValue, HostError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(json!("late"))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_execute_returns_promptly_on_cancel() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let started = Instant::now();
        let r = execute(
            "x = ctx.slow()".to_string(),
            SlowHost,
            ScriptLimits::default(),
            token,
        )
        .await;
        assert!(r.is_cancelled());
        assert!(started.elapsed() < Duration::from_millis(150));
    }
}

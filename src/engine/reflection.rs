//! 反思守卫：限制一次解析过程中嵌套 AI 自省的深度并检测循环
//!
//! 栈上有两类帧：脚本执行时压入的模块根帧，以及 reflect / enter_reflection 压入的反思帧。
//! 深度只统计反思帧；循环检测扫描全部帧。帧通过 [`ReflectionScope`] 的 Drop 按 id 移除，
//! 嵌套调用失败或提前返回时同样会移除。

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::core::ExecutionContext;

pub const DEFAULT_MAX_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReflectionError {
    #[error("reflection depth limit {max} reached")]
    DepthExceeded { max: usize },

    #[error("circular reflection: module '{0}' is already executing")]
    Circular(String),

    #[error("immediate module '{0}' cannot be reflected from an immediate stage")]
    ImmediateNesting(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionKind {
    Generate,
    Reflect,
    Enter,
}

/// 审计记录：只用于诊断，不参与判定
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReflectionAuditEntry {
    pub module: String,
    pub depth: usize,
    pub kind: ReflectionKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Frame {
    id: u64,
    module: String,
    reflection: bool,
}

#[derive(Debug)]
pub struct ReflectionGuard {
    max_depth: usize,
    /// 当前阶段的执行时机
    stage_timing: ExecutionContext,
    stack: Vec<Frame>,
    next_id: u64,
    audit: Vec<ReflectionAuditEntry>,
}

pub type SharedGuard = Arc<Mutex<ReflectionGuard>>;

impl ReflectionGuard {
    pub fn new(max_depth: usize, stage_timing: ExecutionContext) -> Self {
        Self {
            max_depth,
            stage_timing,
            stack: Vec::new(),
            next_id: 0,
            audit: Vec::new(),
        }
    }

    pub fn shared(max_depth: usize, stage_timing: ExecutionContext) -> SharedGuard {
        Arc::new(Mutex::new(Self::new(max_depth, stage_timing)))
    }

    pub fn depth(&self) -> usize {
        self.stack.iter().filter(|f| f.reflection).count()
    }

    /// target 为 None 表示对当前提示词快照的自省（不针对具体模块）
    pub fn check(&self, target: Option<&str>, timing: ExecutionContext) -> Result<(), ReflectionError> {
        if self.depth() >= self.max_depth {
            return Err(ReflectionError::DepthExceeded {
                max: self.max_depth,
            });
        }
        if let Some(module) = target {
            if self.stack.iter().any(|f| f.module == module) {
                return Err(ReflectionError::Circular(module.to_string()));
            }
            if self.stage_timing == ExecutionContext::Immediate
                && timing == ExecutionContext::Immediate
            {
                return Err(ReflectionError::ImmediateNesting(module.to_string()));
            }
        }
        Ok(())
    }

    pub fn can_reflect(&self, target: Option<&str>, timing: ExecutionContext) -> bool {
        self.check(target, timing).is_ok()
    }

    pub fn record(&mut self, module: &str, kind: ReflectionKind) {
        self.audit.push(ReflectionAuditEntry {
            module: module.to_string(),
            depth: self.depth(),
            kind,
            timestamp: Utc::now(),
        });
    }

    pub fn audit_trail(&self) -> &[ReflectionAuditEntry] {
        &self.audit
    }

    fn push(&mut self, module: &str, reflection: bool) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.stack.push(Frame {
            id,
            module: module.to_string(),
            reflection,
        });
        id
    }

    fn remove(&mut self, id: u64) {
        self.stack.retain(|f| f.id != id);
    }
}

fn lock(shared: &SharedGuard) -> std::sync::MutexGuard<'_, ReflectionGuard> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// 栈帧的作用域；Drop 时移除该帧
#[derive(Debug)]
pub struct ReflectionScope {
    guard: SharedGuard,
    id: u64,
}

impl ReflectionScope {
    /// 模块脚本开始执行时压入根帧（不计入深度，不做检查）
    pub fn module(shared: &SharedGuard, module: &str) -> Self {
        let id = lock(shared).push(module, false);
        Self {
            guard: Arc::clone(shared),
            id,
        }
    }

    /// 检查后压入反思帧并记录审计
    pub fn reflect(
        shared: &SharedGuard,
        caller: &str,
        target: Option<&str>,
        timing: ExecutionContext,
        kind: ReflectionKind,
    ) -> Result<Self, ReflectionError> {
        let mut guard = lock(shared);
        guard.check(target, timing)?;
        let module = target.unwrap_or(caller);
        let id = guard.push(module, true);
        guard.record(module, kind);
        Ok(Self {
            guard: Arc::clone(shared),
            id,
        })
    }
}

impl Drop for ReflectionScope {
    fn drop(&mut self) {
        lock(&self.guard).remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExecutionContext::*;

    #[test]
    fn test_three_nested_reflections_then_rejected() {
        let guard = ReflectionGuard::shared(DEFAULT_MAX_DEPTH, PostResponse);
        let _root = ReflectionScope::module(&guard, "root");
        let _a = ReflectionScope::reflect(&guard, "root", Some("a"), OnDemand, ReflectionKind::Reflect).unwrap();
        let _b = ReflectionScope::reflect(&guard, "a", Some("b"), OnDemand, ReflectionKind::Reflect).unwrap();
        let _c = ReflectionScope::reflect(&guard, "b", Some("c"), OnDemand, ReflectionKind::Reflect).unwrap();
        assert_eq!(lock(&guard).depth(), 3);
        assert!(!lock(&guard).can_reflect(Some("d"), OnDemand));
        let err = ReflectionScope::reflect(&guard, "c", Some("d"), OnDemand, ReflectionKind::Reflect).unwrap_err();
        assert_eq!(err, ReflectionError::DepthExceeded { max: 3 });
        assert_eq!(lock(&guard).audit_trail().len(), 3);
    }

    #[test]
    fn test_scope_drop_pops_frames() {
        let guard = ReflectionGuard::shared(DEFAULT_MAX_DEPTH, PostResponse);
        {
            let _a = ReflectionScope::reflect(&guard, "m", Some("a"), OnDemand, ReflectionKind::Reflect).unwrap();
            let result: Result<(), ()> = (|| {
                let _b = ReflectionScope::reflect(&guard, "a", Some("b"), OnDemand, ReflectionKind::Reflect)
                    .map_err(|_| ())?;
                Err(())
            })();
            assert!(result.is_err());
            assert_eq!(lock(&guard).depth(), 1);
        }
        assert_eq!(lock(&guard).depth(), 0);
    }

    #[test]
    fn test_self_recursion_is_circular() {
        let guard = ReflectionGuard::shared(DEFAULT_MAX_DEPTH, PostResponse);
        let _root = ReflectionScope::module(&guard, "mood");
        assert_eq!(
            lock(&guard).check(Some("mood"), PostResponse),
            Err(ReflectionError::Circular("mood".into()))
        );
        assert!(lock(&guard).can_reflect(None, OnDemand));
    }

    #[test]
    fn test_immediate_in_immediate_rejected() {
        let guard = ReflectionGuard::new(DEFAULT_MAX_DEPTH, Immediate);
        assert!(matches!(
            guard.check(Some("intro"), Immediate),
            Err(ReflectionError::ImmediateNesting(_))
        ));
        assert!(guard.check(Some("summary"), PostResponse).is_ok());
        assert!(guard.check(None, OnDemand).is_ok());
    }
}

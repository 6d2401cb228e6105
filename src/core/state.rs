//! 阶段与流水线状态
//!
//! 阶段分配是 (执行时机, 是否需要 AI) 的纯函数；流水线状态机只允许向前推进，
//! 任何阶段都可以进入吸收态 Cancelled。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 模块的执行时机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionContext {
    /// 主 AI 调用之前
    #[default]
    Immediate,
    /// 主 AI 回复之后
    PostResponse,
    /// 不自动调度，仅在被引用或反思时执行
    OnDemand,
}

impl ExecutionContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionContext::Immediate => "immediate",
            ExecutionContext::PostResponse => "post_response",
            ExecutionContext::OnDemand => "on_demand",
        }
    }
}

/// 自动调度的阶段（第 3 阶段为调用方的主 AI 调用，不在此列）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    One,
    Two,
    Four,
    Five,
}

impl Stage {
    pub fn number(&self) -> u8 {
        match self {
            Stage::One => 1,
            Stage::Two => 2,
            Stage::Four => 4,
            Stage::Five => 5,
        }
    }

    /// 该阶段所处的时机（反思守卫据此判断是否为 immediate 嵌套）
    pub fn timing(&self) -> ExecutionContext {
        match self {
            Stage::One | Stage::Two => ExecutionContext::Immediate,
            Stage::Four | Stage::Five => ExecutionContext::PostResponse,
        }
    }

    pub fn allows_ai(&self) -> bool {
        matches!(self, Stage::Two | Stage::Five)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {}", self.number())
    }
}

/// 阶段分配；OnDemand 返回 None
pub fn assign_stage(context: ExecutionContext, requires_ai: bool) -> Option<Stage> {
    match (context, requires_ai) {
        (ExecutionContext::Immediate, false) => Some(Stage::One),
        (ExecutionContext::Immediate, true) => Some(Stage::Two),
        (ExecutionContext::PostResponse, false) => Some(Stage::Four),
        (ExecutionContext::PostResponse, true) => Some(Stage::Five),
        (ExecutionContext::OnDemand, _) => None,
    }
}

/// 流水线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Stage1,
    Stage2,
    /// 等待调用方完成主 AI 调用
    AwaitingResponse,
    Stage4,
    Stage5,
    Done,
    Cancelled,
}

impl PipelineState {
    /// 合法的下一状态；Done / Cancelled 为终态
    pub fn next(self) -> Option<PipelineState> {
        match self {
            PipelineState::Stage1 => Some(PipelineState::Stage2),
            PipelineState::Stage2 => Some(PipelineState::AwaitingResponse),
            PipelineState::AwaitingResponse => Some(PipelineState::Stage4),
            PipelineState::Stage4 => Some(PipelineState::Stage5),
            PipelineState::Stage5 => Some(PipelineState::Done),
            PipelineState::Done | PipelineState::Cancelled => None,
        }
    }

    pub fn cancel(self) -> PipelineState {
        if self == PipelineState::Done {
            self
        } else {
            PipelineState::Cancelled
        }
    }
}

/// 对外 API 的结果：取消是区分出来的正常结局，不是错误
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            Outcome::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_assignment_is_total_and_disjoint() {
        let contexts = [ExecutionContext::Immediate, ExecutionContext::PostResponse];
        let mut seen = Vec::new();
        for ctx in contexts {
            for ai in [false, true] {
                let stage = assign_stage(ctx, ai).unwrap();
                assert!(!seen.contains(&stage));
                seen.push(stage);
            }
        }
        seen.sort();
        assert_eq!(seen, vec![Stage::One, Stage::Two, Stage::Four, Stage::Five]);
        assert_eq!(assign_stage(ExecutionContext::OnDemand, true), None);
        assert_eq!(assign_stage(ExecutionContext::OnDemand, false), None);
    }

    #[test]
    fn test_pipeline_moves_forward_only() {
        let mut state = PipelineState::Stage1;
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            state = next;
            visited.push(state);
        }
        assert_eq!(state, PipelineState::Done);
        assert_eq!(visited.len(), 6);
        assert_eq!(PipelineState::Stage4.cancel(), PipelineState::Cancelled);
        assert_eq!(PipelineState::Done.cancel(), PipelineState::Done);
        assert!(PipelineState::Cancelled.next().is_none());
    }
}

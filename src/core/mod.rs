//! 核心层：引擎错误、阶段与流水线状态、会话监管

pub mod error;
pub mod session_supervisor;
pub mod state;

pub use error::EngineError;
pub use session_supervisor::{SessionHandle, SessionSupervisor};
pub use state::{assign_stage, ExecutionContext, Outcome, PipelineState, Stage};

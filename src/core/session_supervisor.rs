//! 会话监管：每个对话同一时刻至多一个活动会话
//!
//! 新一轮用户消息到来时，先取消该对话仍在运行的上一个会话，再发放新的 CancellationToken。

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// 已发放的会话
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub conversation_id: String,
    pub session_id: u64,
    pub token: CancellationToken,
}

#[derive(Debug, Default)]
pub struct SessionSupervisor {
    sessions: Mutex<HashMap<String, (u64, CancellationToken)>>,
    next_id: Mutex<u64>,
    /// 进程级父 token（Ctrl+C 时取消全部会话）
    root: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始新会话；同一对话的旧会话被取消
    pub fn begin(&self, conversation_id: &str) -> SessionHandle {
        let session_id = {
            let mut next = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            *next
        };
        let token = self.root.child_token();
        let previous = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(conversation_id.to_string(), (session_id, token.clone()));
        if let Some((old_id, old)) = previous {
            tracing::info!(
                conversation = conversation_id,
                session = old_id,
                "superseded by new session; cancelling"
            );
            old.cancel();
        }
        SessionHandle {
            conversation_id: conversation_id.to_string(),
            session_id,
            token,
        }
    }

    /// 取消对话的当前会话；无活动会话时返回 false
    pub fn cancel(&self, conversation_id: &str) -> bool {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(conversation_id);
        match removed {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 会话正常结束；只移除仍属于该会话的登记
    pub fn finish(&self, handle: &SessionHandle) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions
            .get(&handle.conversation_id)
            .is_some_and(|(id, _)| *id == handle.session_id)
        {
            sessions.remove(&handle.conversation_id);
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 取消全部会话（用户 Ctrl+C）
    pub fn cancel_all(&self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_turn_cancels_previous_session() {
        let supervisor = SessionSupervisor::new();
        let first = supervisor.begin("c1");
        let second = supervisor.begin("c1");
        assert!(first.token.is_cancelled());
        assert!(!second.token.is_cancelled());
        assert_eq!(supervisor.active_sessions(), 1);
    }

    #[test]
    fn test_conversations_are_independent() {
        let supervisor = SessionSupervisor::new();
        let a = supervisor.begin("a");
        let b = supervisor.begin("b");
        assert!(supervisor.cancel("a"));
        assert!(a.token.is_cancelled());
        assert!(!b.token.is_cancelled());
        assert!(!supervisor.cancel("a"));
    }

    #[test]
    fn test_finish_ignores_superseded_handle() {
        let supervisor = SessionSupervisor::new();
        let old = supervisor.begin("c1");
        let _new = supervisor.begin("c1");
        supervisor.finish(&old);
        assert_eq!(supervisor.active_sessions(), 1);
    }

    #[test]
    fn test_cancel_all_reaches_children() {
        let supervisor = SessionSupervisor::new();
        let a = supervisor.begin("a");
        supervisor.cancel_all();
        assert!(a.token.is_cancelled());
    }
}

//! 任务生命周期事件：按发生顺序推送给观察者（终端、Web 前端等）
//!
//! 每个事件携带 session_id，多个并发任务的事件可由消费者按会话拆分。

use serde::Serialize;
use tokio::sync::mpsc;

/// 单条生命周期事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
pub struct AgentEvent {
    pub session_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    TaskReceived {
        task: String,
        working_dir: String,
    },
    StepStarted {
        step: usize,
        attempt: usize,
        iteration: usize,
    },
    CapabilitySelected {
        step: usize,
        capability: String,
        confidence: f32,
        reasoning: String,
        fallback: bool,
    },
    ResponseGenerated {
        step: usize,
        thinking: String,
        action: Option<String>,
        explanation: Option<String>,
        direct_answer: Option<String>,
        done: bool,
    },
    /// 需确认的动作（自动批准时同样发出）
    Warning {
        step: usize,
        action: String,
        reason: String,
        safer_alternative: Option<String>,
    },
    ActionBlocked {
        step: usize,
        action: String,
        reason: String,
    },
    ExecutionResult {
        step: usize,
        action: String,
        success: bool,
        exit_code: Option<i32>,
        timed_out: bool,
        duration_ms: u64,
        output: String,
    },
    StepFailed {
        step: usize,
        code: String,
        error: String,
        /// 是否将重试同一步
        retrying: bool,
    },
    TaskComplete {
        summary: String,
        answer: Option<String>,
    },
    TaskFailed {
        summary: String,
        error: String,
    },
    TaskCancelled {
        summary: String,
    },
    MaxIterationsReached {
        max_iterations: usize,
        summary: String,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::TaskReceived { .. } => "task_received",
            EventKind::StepStarted { .. } => "step_started",
            EventKind::CapabilitySelected { .. } => "capability_selected",
            EventKind::ResponseGenerated { .. } => "response_generated",
            EventKind::Warning { .. } => "warning",
            EventKind::ActionBlocked { .. } => "action_blocked",
            EventKind::ExecutionResult { .. } => "execution_result",
            EventKind::StepFailed { .. } => "step_failed",
            EventKind::TaskComplete { .. } => "task_complete",
            EventKind::TaskFailed { .. } => "task_failed",
            EventKind::TaskCancelled { .. } => "task_cancelled",
            EventKind::MaxIterationsReached { .. } => "max_iterations_reached",
        }
    }
}

/// 会话的事件出口；无订阅者或接收端已关闭时静默丢弃
#[derive(Debug, Clone)]
pub struct EventSink {
    session_id: String,
    tx: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl EventSink {
    pub fn new(session_id: impl Into<String>, tx: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self {
            session_id: session_id.into(),
            tx: Some(tx),
        }
    }

    /// 丢弃所有事件
    pub fn disabled(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            tx: None,
        }
    }

    /// 创建 sink 与对应的接收端
    pub fn channel(session_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(session_id, tx), rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn emit(&self, kind: EventKind) {
        tracing::debug!(session = %self.session_id, event = kind.name(), "lifecycle event");
        if let Some(tx) = &self.tx {
            let _ = tx.send(AgentEvent {
                session_id: self.session_id.clone(),
                kind,
            });
        }
    }
}

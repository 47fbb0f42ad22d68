//! Headless Agent 运行时
//!
//! 供终端、HTTP 等前端调用的无界面逻辑：
//! create_session 为每个任务流创建独立的 Session（记忆库、取消监管、事件出口、确认处理器），
//! process_task 在 Session 上跑一次 Agent 循环，把结果追加到任务历史并交给提示系统学习。
//! 组件（注册表、循环）在会话间共享且只读；任务历史与提示存储是仅在任务结束时写入的共享记录，
//! 除此之外会话之间没有共享的可变状态。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

pub use crate::core::{AgentBuilder, AgentComponents};
use crate::core::{AgentError, SessionSupervisor, TaskOutcome, TaskRecord};
use crate::memory::{MemoryBank, MemoryConfig};
use crate::react::{AgentEvent, EventSink, LoopSession, RunOptions};
use crate::safety::ConfirmationHandler;

/// 一个独立的任务流：自己的记忆库与循环状态，从不与其他会话共享
pub struct Session {
    id: String,
    memory: MemoryBank,
    supervisor: Arc<SessionSupervisor>,
    events: EventSink,
    confirm: Arc<dyn ConfirmationHandler>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        memory: MemoryConfig,
        events: EventSink,
        confirm: Arc<dyn ConfirmationHandler>,
    ) -> Result<Self, AgentError> {
        Ok(Self {
            id: id.into(),
            memory: MemoryBank::new(memory)?,
            supervisor: Arc::new(SessionSupervisor::new()),
            events,
            confirm,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn memory(&self) -> &MemoryBank {
        &self.memory
    }

    /// 可交给信号处理器等其他任务，用于取消当前任务
    pub fn supervisor(&self) -> Arc<SessionSupervisor> {
        Arc::clone(&self.supervisor)
    }

    pub fn cancel_task(&self) {
        self.supervisor.cancel_task();
    }
}

/// 创建会话与其事件接收端
pub fn create_session(
    components: &AgentComponents,
    confirm: Arc<dyn ConfirmationHandler>,
) -> Result<(Session, mpsc::UnboundedReceiver<AgentEvent>), AgentError> {
    let id = Uuid::new_v4().to_string();
    let (events, rx) = EventSink::channel(id.clone());
    let session = Session::new(id, components.memory.clone(), events, confirm)?;
    tracing::debug!(session = %session.id(), "session created");
    Ok((session, rx))
}

/// 按配置生成运行参数；命令行参数可覆盖工作目录与自动批准
pub fn run_options(
    components: &AgentComponents,
    working_dir: Option<PathBuf>,
    auto_approve: bool,
) -> RunOptions {
    let working_dir = working_dir.unwrap_or_else(|| components.working_dir());
    let options = RunOptions::from_config(&components.config.agent, working_dir);
    let auto_approve = options.auto_approve || auto_approve;
    options.with_auto_approve(auto_approve)
}

/// 在会话上运行一个任务：每个任务从空记忆开始，结束后写入任务历史
pub async fn process_task(
    components: &AgentComponents,
    session: &mut Session,
    task: &str,
    options: &RunOptions,
) -> TaskOutcome {
    session.memory.clear();
    let token = session.supervisor.begin_task();
    let loop_session = LoopSession::new(
        &mut session.memory,
        &session.events,
        session.confirm.as_ref(),
        token,
    );
    let outcome = components.agent_loop.run(task, options, loop_session).await;

    if let Some(history) = &components.history {
        if let Err(e) = history.append(TaskRecord::from(&outcome)) {
            tracing::warn!(error = %e, "failed to save task history");
        }
    }
    if let Some(hints) = &components.hints {
        hints
            .task_finished(&outcome, components.history.as_deref())
            .await;
    }
    outcome
}

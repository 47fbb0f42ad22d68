//! 核心层：错误与恢复、循环状态、会话监管、任务历史、组件构建

pub mod builder;
pub mod error;
pub mod history;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use builder::{AgentBuilder, AgentComponents};
pub use error::{AgentError, FailureClass, RecoveryAction};
pub use history::{HistoryPage, TaskHistory, TaskRecord};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use state::{LoopState, Step, StepOutcome, TaskOutcome, TaskStatus};

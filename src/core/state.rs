//! 循环状态、步骤与任务结果
//!
//! Step 在循环迭代开始时创建、观察记录后定稿，此后只读（追加式历史）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{AgentError, FailureClass};
use crate::executor::ExecutionResult;
use crate::safety::SafetyVerdict;

/// Agent 循环的非终止状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Planning,
    Selecting,
    Executing,
    Observing,
    Deciding,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopState::Planning => "planning",
            LoopState::Selecting => "selecting",
            LoopState::Executing => "executing",
            LoopState::Observing => "observing",
            LoopState::Deciding => "deciding",
        };
        f.write_str(s)
    }
}

/// 终止状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Cancelled,
    MaxIterationsReached,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::MaxIterationsReached => "max_iterations_reached",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单步的观察结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    /// 命令执行成功
    Succeeded,
    /// 直接回答，无动作
    Answered,
    /// 既无动作也无回答
    NoAction,
    Failed {
        code: String,
        message: String,
        class: Option<FailureClass>,
    },
    /// 被模式层拦截
    Blocked { reason: String },
    /// 用户跳过
    Skipped,
    /// 动作执行前观察到取消
    Cancelled,
}

impl StepOutcome {
    pub fn failed(error: &AgentError) -> Self {
        StepOutcome::Failed {
            code: error.code().to_string(),
            message: error.to_string(),
            class: error.failure_class(),
        }
    }

    /// 记忆条目中的结果标签
    pub fn tag(&self) -> &'static str {
        match self {
            StepOutcome::Succeeded => "success",
            StepOutcome::Answered => "answer",
            StepOutcome::NoAction => "no-action",
            StepOutcome::Failed { .. } => "failure",
            StepOutcome::Blocked { .. } => "blocked",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Cancelled => "cancelled",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StepOutcome::Failed { .. }
                | StepOutcome::Blocked { .. }
                | StepOutcome::Skipped
                | StepOutcome::Cancelled
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded | StepOutcome::Answered)
    }

    /// 记忆条目的基础重要度
    pub fn base_importance(&self) -> f32 {
        match self {
            StepOutcome::Blocked { .. } => 0.95,
            StepOutcome::Failed { .. } => 0.7,
            StepOutcome::Answered => 0.6,
            StepOutcome::Succeeded => 0.5,
            StepOutcome::Skipped | StepOutcome::Cancelled => 0.5,
            StepOutcome::NoAction => 0.2,
        }
    }

    /// 一行描述，用于事件与摘要
    pub fn describe(&self) -> String {
        match self {
            StepOutcome::Failed { message, .. } => message.clone(),
            StepOutcome::Blocked { reason } => format!("blocked: {reason}"),
            other => other.tag().to_string(),
        }
    }
}

/// 一次循环迭代（或其中一次重试）的定稿记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    /// 从 1 开始、无间隙
    pub number: usize,
    /// 本规划周期内第几次尝试（从 1 开始）
    pub attempt: usize,
    pub capability: String,
    pub thinking: String,
    pub explanation: Option<String>,
    /// 实际送去执行（或本应执行）的动作；用户编辑后为编辑后的文本
    pub action: Option<String>,
    /// 用户编辑前的原始动作
    pub original_action: Option<String>,
    pub direct_answer: Option<String>,
    pub verdict: Option<SafetyVerdict>,
    /// 警告经用户或自动批准后执行
    pub warned: bool,
    pub execution: Option<ExecutionResult>,
    /// 能力声明任务完成
    pub done: bool,
    pub outcome: StepOutcome,
    /// 注入本步 prompt 的提示
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Uuid>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Step {
    /// 观察文本：执行输出、直接回答或失败原因
    pub fn observation(&self, max_chars: usize) -> String {
        if let Some(exec) = &self.execution {
            return exec.truncated_output(max_chars);
        }
        if let Some(answer) = &self.direct_answer {
            return crate::executor::result::truncate_chars(answer, max_chars);
        }
        match &self.outcome {
            StepOutcome::NoAction => "(no action proposed)".to_string(),
            StepOutcome::Skipped => "(skipped by user)".to_string(),
            StepOutcome::Cancelled => "(cancelled before execution)".to_string(),
            other => other.describe(),
        }
    }
}

/// 任务结束后的汇总
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub session_id: String,
    pub task: String,
    pub status: TaskStatus,
    /// 已执行的规划周期数
    pub iterations: usize,
    pub steps: Vec<Step>,
    pub success_count: usize,
    pub failure_count: usize,
    pub last_error: Option<String>,
    /// 最后一次直接回答
    pub final_answer: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TaskOutcome {
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// 人类可读的终止摘要
    pub fn summary(&self) -> String {
        let counts = format!(
            "{} iteration(s), {} succeeded, {} failed",
            self.iterations, self.success_count, self.failure_count
        );
        match self.status {
            TaskStatus::Completed => format!("Task completed: {counts}."),
            TaskStatus::Cancelled => format!("Task cancelled: {counts}."),
            TaskStatus::MaxIterationsReached => {
                format!("Stopped at the iteration limit: {counts}.")
            }
            TaskStatus::Failed => format!(
                "Task failed: {counts}. Last error: {}",
                self.last_error.as_deref().unwrap_or("unknown")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: TaskStatus, last_error: Option<&str>) -> TaskOutcome {
        let now = Utc::now();
        TaskOutcome {
            task_id: Uuid::new_v4(),
            session_id: "s".into(),
            task: "t".into(),
            status,
            iterations: 3,
            steps: Vec::new(),
            success_count: 2,
            failure_count: 1,
            last_error: last_error.map(String::from),
            final_answer: None,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_failed_summary_includes_last_error() {
        let s = outcome(TaskStatus::Failed, Some("Command timed out after 5000ms")).summary();
        assert!(s.contains("3 iteration(s)"));
        assert!(s.contains("2 succeeded, 1 failed"));
        assert!(s.ends_with("Command timed out after 5000ms"));
    }

    #[test]
    fn test_completed_summary_has_no_error() {
        let s = outcome(TaskStatus::Completed, Some("ignored")).summary();
        assert!(s.starts_with("Task completed"));
        assert!(!s.contains("ignored"));
    }

    #[test]
    fn test_outcome_tags_and_importance() {
        let failed = StepOutcome::failed(&AgentError::Timeout(3));
        assert_eq!(failed.tag(), "failure");
        assert!(failed.is_failure());
        assert!(StepOutcome::Blocked { reason: "x".into() }.base_importance() > failed.base_importance());
        assert!(!StepOutcome::NoAction.is_failure());
        assert!(!StepOutcome::NoAction.is_success());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::MaxIterationsReached).unwrap();
        assert_eq!(json, "\"max_iterations_reached\"");
    }
}

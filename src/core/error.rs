//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 Retry / Continue / Abort。
//! `code()` 给出稳定的错误分类字符串（selection-error、safety-blocked 等），用于事件、历史与摘要。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 命令执行失败的分类：决定是否可重试
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// 暂时性失败（网络抖动、资源忙、超时），可重试
    Transient,
    /// 权限不足，重试无意义
    Permission,
    /// 命令本身错误（不存在、参数错误、非零退出）
    Logic,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Permission => "permission",
            FailureClass::Logic => "logic",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 没有可用能力（无注册、选择失败、能力返回格式错误）
    #[error("Selection error: {0}")]
    Selection(String),

    /// 被硬编码模式拦截，永不重试
    #[error("Blocked by safety gate: {0}")]
    SafetyBlocked(String),

    #[error("Execution failed ({class}): {detail}")]
    Execution { class: FailureClass, detail: String },

    /// 语言模型不可达（已按退避策略重试）
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Command timed out after {0}ms")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 错误分类字符串（对外稳定）
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Selection(_) => "selection-error",
            AgentError::SafetyBlocked(_) => "safety-blocked",
            AgentError::Execution { .. } => "execution-error",
            AgentError::ModelUnavailable(_) => "model-unavailable",
            AgentError::Timeout(_) => "timeout",
            AgentError::Cancelled => "cancelled",
            AgentError::Config(_) => "config-error",
        }
    }

    /// 仅超时与暂时性执行失败可重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Timeout(_)
                | AgentError::Execution {
                    class: FailureClass::Transient,
                    ..
                }
        )
    }

    /// 该错误是否直接导致整个任务失败
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::Selection(_) | AgentError::ModelUnavailable(_) | AgentError::Config(_)
        )
    }

    /// 执行失败的分类（超时视为暂时性）
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            AgentError::Execution { class, .. } => Some(*class),
            AgentError::Timeout(_) => Some(FailureClass::Transient),
            _ => None,
        }
    }
}

/// 恢复引擎根据失败步骤给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 携带错误上下文回到 Selecting 重试同一步
    Retry(String),
    /// 记录失败观察后进入下一轮 Planning
    Continue,
    /// 终止当前任务（Failed）
    Abort(AgentError),
}

//! 错误恢复引擎
//!
//! 根据失败步骤的 AgentError 与本规划周期内的尝试次数，返回 Retry / Continue / Abort。

use crate::core::{AgentError, RecoveryAction};

/// 按错误分类决定下一步：可重试错误在次数内回到 Selecting，其余记录失败后继续或终止
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// `attempt` 为刚失败的这次尝试的序号（从 1 开始），`max_retries` 为单步总尝试上限
    pub fn handle(&self, err: &AgentError, attempt: usize, max_retries: usize) -> RecoveryAction {
        if err.is_fatal() || matches!(err, AgentError::Cancelled) {
            return RecoveryAction::Abort(err.clone());
        }
        if err.is_retryable() {
            if attempt < max_retries {
                return RecoveryAction::Retry(format!(
                    "Attempt {attempt} of {max_retries} failed ({}): {err}",
                    err.code()
                ));
            }
            tracing::warn!(attempt, max_retries, error = %err, "retries exhausted");
            return RecoveryAction::Abort(err.clone());
        }
        // safety-blocked、权限与逻辑错误：记录失败观察，进入下一轮规划
        RecoveryAction::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FailureClass;

    fn exec(class: FailureClass) -> AgentError {
        AgentError::Execution {
            class,
            detail: "exit 1".into(),
        }
    }

    #[test]
    fn test_transient_retries_until_limit() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Timeout(5);
        match engine.handle(&err, 1, 3) {
            RecoveryAction::Retry(msg) => {
                assert!(msg.contains("timeout"));
                assert!(msg.contains("Attempt 1 of 3"));
            }
            other => panic!("expected retry, got {other:?}"),
        }
        assert!(matches!(engine.handle(&err, 2, 3), RecoveryAction::Retry(_)));
        assert!(matches!(
            engine.handle(&err, 3, 3),
            RecoveryAction::Abort(AgentError::Timeout(5))
        ));
    }

    #[test]
    fn test_zero_retries_aborts_immediately() {
        let engine = RecoveryEngine::new();
        assert!(matches!(
            engine.handle(&exec(FailureClass::Transient), 1, 1),
            RecoveryAction::Abort(_)
        ));
    }

    #[test]
    fn test_non_retryable_failures_continue() {
        let engine = RecoveryEngine::new();
        assert_eq!(engine.handle(&exec(FailureClass::Logic), 1, 3), RecoveryAction::Continue);
        assert_eq!(engine.handle(&exec(FailureClass::Permission), 1, 3), RecoveryAction::Continue);
        assert_eq!(
            engine.handle(&AgentError::SafetyBlocked("rm -rf /".into()), 1, 3),
            RecoveryAction::Continue
        );
    }

    #[test]
    fn test_fatal_errors_abort() {
        let engine = RecoveryEngine::new();
        for err in [
            AgentError::Selection("none".into()),
            AgentError::ModelUnavailable("down".into()),
            AgentError::Cancelled,
        ] {
            assert!(matches!(engine.handle(&err, 1, 3), RecoveryAction::Abort(_)));
        }
    }
}

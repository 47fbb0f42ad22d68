//! 会话监管：生命周期、中断管理
//!
//! 会话持有根 CancellationToken；每个任务开始时派生子 token，取消任务不影响会话，关闭会话会取消所有任务。
//! 取消是协作式的：循环在每次状态转换前检查，进行中的外部调用允许完成。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct SessionSupervisor {
    /// 会话关闭时触发
    root: CancellationToken,
    /// 当前任务的 token
    current: Mutex<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let current = Mutex::new(root.child_token());
        Self { root, current }
    }

    /// 为新任务派生一个未取消的子 token 并设为当前
    pub fn begin_task(&self) -> CancellationToken {
        let token = self.root.child_token();
        match self.current.lock() {
            Ok(mut current) => *current = token.clone(),
            Err(poisoned) => *poisoned.into_inner() = token.clone(),
        }
        token
    }

    /// 当前任务的 token
    pub fn task_token(&self) -> CancellationToken {
        match self.current.lock() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 取消当前任务（用户 Ctrl+C / stop 请求）
    pub fn cancel_task(&self) {
        tracing::info!("task cancellation requested");
        self.task_token().cancel();
    }

    /// 关闭会话：取消所有任务
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_task_does_not_end_session() {
        let sup = SessionSupervisor::new();
        let first = sup.begin_task();
        sup.cancel_task();
        assert!(first.is_cancelled());
        assert!(!sup.is_shut_down());

        let second = sup.begin_task();
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_shutdown_cancels_running_task() {
        let sup = SessionSupervisor::new();
        let token = sup.begin_task();
        sup.shutdown();
        assert!(token.is_cancelled());
        assert!(sup.begin_task().is_cancelled());
    }
}

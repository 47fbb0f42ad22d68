//! 命令执行结果与失败分类
//!
//! ExecutionResult 只描述发生了什么；是否重试由 Agent 循环（RecoveryEngine）决定。

use serde::{Deserialize, Serialize};

use crate::core::{AgentError, FailureClass};

/// 命令结束状态
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecStatus {
    /// 正常退出（含非零退出码；被信号终止时为 -1）
    Exited { code: i32 },
    /// 超时，子进程已被终止
    TimedOut { after_ms: u64 },
    /// 无法启动（shell 不存在、工作目录不存在等）
    SpawnFailed { reason: String },
}

/// 单次命令执行结果
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// 暂时性失败的 stderr 特征
const TRANSIENT_MARKERS: &[&str] = &[
    "temporarily unavailable",
    "resource busy",
    "connection refused",
    "connection reset",
    "timed out",
    "could not resolve",
    "network is unreachable",
    "try again",
    "too many open files",
];

const PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "operation not permitted",
    "access denied",
    "must be root",
];

impl ExecutionResult {
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Exited { code },
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration_ms: 0,
        }
    }

    pub fn timed_out(after_ms: u64) -> Self {
        Self {
            status: ExecStatus::TimedOut { after_ms },
            stdout: String::new(),
            stderr: format!("command timed out after {after_ms}ms"),
            duration_ms: after_ms,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn success(&self) -> bool {
        matches!(self.status, ExecStatus::Exited { code: 0 })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ExecStatus::Exited { code } => Some(code),
            _ => None,
        }
    }

    /// 合并输出：stdout + [stderr] 段；两者皆空时为 "(no output)"
    pub fn output(&self) -> String {
        let mut parts = Vec::new();
        if !self.stdout.trim().is_empty() {
            parts.push(self.stdout.trim_end().to_string());
        }
        if !self.stderr.trim().is_empty() {
            parts.push(format!("[stderr] {}", self.stderr.trim_end()));
        }
        if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        }
    }

    pub fn truncated_output(&self, max_chars: usize) -> String {
        truncate_chars(&self.output(), max_chars)
    }

    /// 失败分类；成功时返回 None
    pub fn failure_class(&self) -> Option<FailureClass> {
        match &self.status {
            ExecStatus::Exited { code: 0 } => None,
            ExecStatus::TimedOut { .. } => Some(FailureClass::Transient),
            ExecStatus::SpawnFailed { reason } => {
                let reason = reason.to_lowercase();
                if contains_any(&reason, PERMISSION_MARKERS) {
                    Some(FailureClass::Permission)
                } else if reason.contains("no such file") || reason.contains("not found") {
                    Some(FailureClass::Logic)
                } else {
                    Some(FailureClass::Transient)
                }
            }
            ExecStatus::Exited { code } => {
                let stderr = self.stderr.to_lowercase();
                if *code == 126 || contains_any(&stderr, PERMISSION_MARKERS) {
                    Some(FailureClass::Permission)
                } else if *code == 124 || contains_any(&stderr, TRANSIENT_MARKERS) {
                    Some(FailureClass::Transient)
                } else {
                    Some(FailureClass::Logic)
                }
            }
        }
    }

    /// 将失败结果转为 AgentError（timeout / execution-error）
    pub fn to_error(&self) -> Option<AgentError> {
        let class = self.failure_class()?;
        Some(match &self.status {
            ExecStatus::TimedOut { after_ms } => AgentError::Timeout(*after_ms),
            ExecStatus::SpawnFailed { reason } => AgentError::Execution {
                class,
                detail: reason.clone(),
            },
            ExecStatus::Exited { code } => AgentError::Execution {
                class,
                detail: format!("exit {}: {}", code, truncate_chars(self.stderr.trim(), 300)),
            },
        })
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// 按字符截断，超出时追加省略提示
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars).collect();
    format!("{head}\n...(output truncated)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_has_no_failure_class() {
        let r = ExecutionResult::exited(0, "a\n", "");
        assert!(r.success());
        assert_eq!(r.failure_class(), None);
        assert!(r.to_error().is_none());
    }

    #[test]
    fn test_classification() {
        let denied = ExecutionResult::exited(1, "", "cp: /etc/x: Permission denied");
        assert_eq!(denied.failure_class(), Some(FailureClass::Permission));
        assert_eq!(
            ExecutionResult::exited(126, "", "").failure_class(),
            Some(FailureClass::Permission)
        );

        let net = ExecutionResult::exited(6, "", "curl: (6) Could not resolve host: x");
        assert_eq!(net.failure_class(), Some(FailureClass::Transient));

        let missing = ExecutionResult::exited(127, "", "sh: foo: command not found");
        assert_eq!(missing.failure_class(), Some(FailureClass::Logic));

        let slow = ExecutionResult::timed_out(250);
        assert_eq!(slow.failure_class(), Some(FailureClass::Transient));
        assert!(matches!(slow.to_error(), Some(AgentError::Timeout(250))));
        assert!(slow.stderr.contains("after 250ms"));
    }

    #[test]
    fn test_output_merges_streams() {
        let r = ExecutionResult::exited(1, "out\n", "err\n");
        assert_eq!(r.output(), "out\n[stderr] err");
        assert_eq!(ExecutionResult::exited(0, "", "").output(), "(no output)");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        let s = "列出文件".repeat(10);
        let t = truncate_chars(&s, 5);
        assert!(t.starts_with("列出文件列"));
        assert!(t.ends_with("(output truncated)"));
    }
}

//! Shell 执行器：在指定工作目录中以 sh -c / cmd /C 运行一条命令
//!
//! 纯边界：不做重试，不做安全判断（由 SafetyGate 负责）；超时返回 TimedOut 而非错误。
//! Unix 上命令在独立进程组中运行，超时时整组终止（包括 sh 派生的子进程）。
//! 每次执行输出一条结构化审计日志（JSON）。

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use crate::executor::result::truncate_chars;
use crate::executor::{ExecStatus, ExecutionResult};

/// 执行环境抽象：Agent 循环只依赖此 trait，测试中可替换为假实现
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, action: &str, working_dir: &Path, timeout: Duration) -> ExecutionResult;
}

/// 真实 Shell 执行器
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
    max_output_chars: usize,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>, max_output_chars: usize) -> Self {
        Self {
            shell: shell.into(),
            max_output_chars: max_output_chars.max(64),
        }
    }

    fn build_command(&self, action: &str, working_dir: &Path) -> Command {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", action]);
            c
        } else {
            let mut c = Command::new(&self.shell);
            c.args(["-c", action]);
            c
        };
        cmd.current_dir(working_dir)
            .env("LANG", "en_US.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

impl ShellExecutor {
    fn finished(&self, output: std::process::Output) -> ExecutionResult {
        ExecutionResult {
            status: ExecStatus::Exited {
                code: output.status.code().unwrap_or(-1),
            },
            stdout: truncate_chars(&String::from_utf8_lossy(&output.stdout), self.max_output_chars),
            stderr: truncate_chars(&String::from_utf8_lossy(&output.stderr), self.max_output_chars),
            duration_ms: 0,
        }
    }
}

fn spawn_failed(stderr: String, reason: String) -> ExecutionResult {
    ExecutionResult {
        status: ExecStatus::SpawnFailed { reason },
        stdout: String::new(),
        stderr,
        duration_ms: 0,
    }
}

/// 终止以 pid 为组长的整个进程组
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: killpg 只读取参数；进程组由本次 spawn 通过 process_group(0) 创建
    let rc = unsafe { libc::killpg(pid, libc::SIGKILL) };
    if rc != 0 {
        tracing::debug!(pid, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new("sh", 4000)
    }
}

#[async_trait]
impl CommandRunner for ShellExecutor {
    async fn execute(&self, action: &str, working_dir: &Path, timeout: Duration) -> ExecutionResult {
        let start = Instant::now();
        let mut cmd = self.build_command(action, working_dir);

        let result = match cmd.spawn() {
            Err(e) => spawn_failed(format!("failed to start command: {e}"), e.to_string()),
            Ok(child) => {
                let pid = child.id();
                // 超时后 future 被丢弃，kill_on_drop 终止 sh，进程组中的其余进程另行终止
                match tokio::time::timeout(timeout, child.wait_with_output()).await {
                    Err(_) => {
                        kill_process_group(pid);
                        ExecutionResult::timed_out(timeout.as_millis() as u64)
                    }
                    Ok(Err(e)) => spawn_failed(format!("failed to wait for command: {e}"), e.to_string()),
                    Ok(Ok(output)) => self.finished(output),
                }
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let result = result.with_duration(duration_ms);

        let outcome = match &result.status {
            ExecStatus::Exited { code } => format!("exit {code}"),
            ExecStatus::TimedOut { .. } => "timeout".to_string(),
            ExecStatus::SpawnFailed { .. } => "spawn_failed".to_string(),
        };
        let audit = serde_json::json!({
            "event": "command_audit",
            "ok": result.success(),
            "outcome": outcome,
            "duration_ms": duration_ms,
            "working_dir": working_dir.display().to_string(),
            "action_preview": action_preview(action),
        });
        tracing::info!(audit = %audit, "command");

        result
    }
}

fn action_preview(action: &str) -> String {
    if action.chars().count() > 200 {
        format!("{}...", action.chars().take(200).collect::<String>())
    } else {
        action.to_string()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let exec = ShellExecutor::default();
        let r = exec.execute("ls", dir.path(), Duration::from_secs(10)).await;
        assert!(r.success());
        assert!(r.stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_captured() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ShellExecutor::default();
        let r = exec
            .execute("echo oops 1>&2; exit 3", dir.path(), Duration::from_secs(10))
            .await;
        assert_eq!(r.exit_code(), Some(3));
        assert!(r.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_timeout_is_a_status_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ShellExecutor::default();
        let r = exec.execute("sleep 5", dir.path(), Duration::from_millis(200)).await;
        assert!(matches!(r.status, ExecStatus::TimedOut { .. }));
        assert!(!r.success());
    }

    #[tokio::test]
    async fn test_timeout_reports_milliseconds() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ShellExecutor::default();
        let r = exec.execute("sleep 5", dir.path(), Duration::from_millis(300)).await;
        assert!(matches!(r.status, ExecStatus::TimedOut { after_ms: 300 }));
        assert!(r.stderr.contains("after 300ms"));
    }

    #[tokio::test]
    async fn test_timeout_kills_spawned_children() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ShellExecutor::default();
        let r = exec
            .execute(
                "(sleep 1; touch late.txt) & sh -c 'sleep 1; touch nested.txt'; wait",
                dir.path(),
                Duration::from_millis(200),
            )
            .await;
        assert!(matches!(r.status, ExecStatus::TimedOut { .. }));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("late.txt").exists());
        assert!(!dir.path().join("nested.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_working_dir_is_spawn_failure() {
        let exec = ShellExecutor::default();
        let r = exec
            .execute("ls", Path::new("/definitely/not/here"), Duration::from_secs(5))
            .await;
        assert!(matches!(r.status, ExecStatus::SpawnFailed { .. }));
    }
}

//! 用户确认：warn-needs-confirmation 的动作在执行前需要明确决定
//!
//! 决定：approve / skip / edit-and-approve / abort-task。非交互终端下默认 skip。
//! 任务输入与确认回答共用进程内唯一的 [`InputLines`]，读缓冲中多出的行不会丢失。

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub fn is_interactive() -> bool {
    io::stdin().is_terminal()
}

/// 用户对一个需确认动作的决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserDecision {
    Approve,
    Skip,
    /// 用编辑后的动作替换原动作（仍需通过模式层）
    EditAndApprove(String),
    AbortTask,
}

/// 确认请求
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub step: usize,
    pub action: String,
    pub reason: String,
    pub safer_alternative: Option<String>,
    pub explanation: Option<String>,
}

#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm(&self, request: &ConfirmationRequest) -> UserDecision;
}

type LineReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// 按行读取的共享输入（通常是 stdin），整个进程只创建一个
pub struct InputLines {
    lines: Mutex<Lines<LineReader>>,
}

impl InputLines {
    pub fn stdin() -> Arc<Self> {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }

    pub fn from_reader(reader: impl AsyncBufRead + Send + Unpin + 'static) -> Arc<Self> {
        let reader: LineReader = Box::new(reader);
        Arc::new(Self {
            lines: Mutex::new(reader.lines()),
        })
    }

    /// 下一行（去掉首尾空白）；输入结束或出错时为 None
    pub async fn next_line(&self) -> Option<String> {
        match self.lines.lock().await.next_line().await {
            Ok(line) => line.map(|l| l.trim().to_string()),
            Err(e) => {
                warn!(error = %e, "failed to read input");
                None
            }
        }
    }
}

/// 终端确认：打印动作与原因，读取 y / n / e / q
pub struct TerminalConfirmation {
    input: Arc<InputLines>,
    interactive: bool,
}

impl TerminalConfirmation {
    /// 交互与否按 stdin 是否为终端判断
    pub fn new(input: Arc<InputLines>) -> Self {
        Self {
            input,
            interactive: is_interactive(),
        }
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }
}

#[async_trait]
impl ConfirmationHandler for TerminalConfirmation {
    async fn confirm(&self, request: &ConfirmationRequest) -> UserDecision {
        if !self.interactive {
            warn!(action = %request.action, "non-interactive stdin: skipping action that needs confirmation");
            eprintln!(
                "[warning] `{}` needs confirmation but stdin is not a terminal; skipped. Use --auto to approve warnings.",
                request.action
            );
            return UserDecision::Skip;
        }

        println!();
        println!("[step {}] This command needs confirmation:", request.step);
        println!("  {}", request.action);
        if let Some(explanation) = &request.explanation {
            println!("  ({explanation})");
        }
        println!("  Risk: {}", request.reason);
        if let Some(alt) = &request.safer_alternative {
            println!("  Safer alternative: {alt}");
        }
        print!("Run it? [y]es / [n]o, skip / [e]dit / [q]uit task: ");
        let _ = io::stdout().flush();

        let Some(answer) = self.input.next_line().await else {
            debug!("stdin closed, aborting task");
            return UserDecision::AbortTask;
        };
        let decision = match answer.to_lowercase().as_str() {
            "y" | "yes" => UserDecision::Approve,
            "e" | "edit" => {
                print!("New command: ");
                let _ = io::stdout().flush();
                match self.input.next_line().await {
                    Some(edited) if !edited.is_empty() => UserDecision::EditAndApprove(edited),
                    _ => UserDecision::Skip,
                }
            }
            "q" | "quit" | "a" | "abort" => UserDecision::AbortTask,
            _ => UserDecision::Skip,
        };
        debug!(decision = ?decision, "user confirmation");
        decision
    }
}

/// 总是批准
pub struct AutoApprove;

#[async_trait]
impl ConfirmationHandler for AutoApprove {
    async fn confirm(&self, _request: &ConfirmationRequest) -> UserDecision {
        UserDecision::Approve
    }
}

/// 总是跳过
pub struct AutoDeny;

#[async_trait]
impl ConfirmationHandler for AutoDeny {
    async fn confirm(&self, _request: &ConfirmationRequest) -> UserDecision {
        UserDecision::Skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ConfirmationRequest {
        ConfirmationRequest {
            step: 1,
            action: "rm notes.txt".into(),
            reason: "deletes files".into(),
            safer_alternative: None,
            explanation: None,
        }
    }

    fn terminal(input: &'static str) -> TerminalConfirmation {
        TerminalConfirmation::new(InputLines::from_reader(input.as_bytes())).with_interactive(true)
    }

    #[tokio::test]
    async fn test_answers_are_read_from_one_buffer() {
        let confirm = terminal("y\nn\ne\nls -l\nq\n");
        assert_eq!(confirm.confirm(&request()).await, UserDecision::Approve);
        assert_eq!(confirm.confirm(&request()).await, UserDecision::Skip);
        assert_eq!(
            confirm.confirm(&request()).await,
            UserDecision::EditAndApprove("ls -l".into())
        );
        assert_eq!(confirm.confirm(&request()).await, UserDecision::AbortTask);
        // 输入结束
        assert_eq!(confirm.confirm(&request()).await, UserDecision::AbortTask);
    }

    #[tokio::test]
    async fn test_tasks_and_answers_share_input() {
        let input = InputLines::from_reader("list files\ny\nshow disk usage\n".as_bytes());
        let confirm = TerminalConfirmation::new(Arc::clone(&input)).with_interactive(true);
        assert_eq!(input.next_line().await.as_deref(), Some("list files"));
        assert_eq!(confirm.confirm(&request()).await, UserDecision::Approve);
        assert_eq!(input.next_line().await.as_deref(), Some("show disk usage"));
        assert_eq!(input.next_line().await, None);
    }

    #[tokio::test]
    async fn test_non_interactive_skips_without_reading() {
        let input = InputLines::from_reader("y\n".as_bytes());
        let confirm = TerminalConfirmation::new(Arc::clone(&input)).with_interactive(false);
        assert_eq!(confirm.confirm(&request()).await, UserDecision::Skip);
        assert_eq!(input.next_line().await.as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn test_auto_handlers() {
        assert_eq!(AutoApprove.confirm(&request()).await, UserDecision::Approve);
        assert_eq!(AutoDeny.confirm(&request()).await, UserDecision::Skip);
    }
}

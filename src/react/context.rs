//! 每步上下文：Planning 阶段从记忆库与工作记忆组装，只读地传给选择器与能力
//!
//! 能力本身无状态（注册表在会话间共享）；任务内的对话记录由循环按能力名保存在 [`Transcript`] 中，
//! 选定能力后随上下文传入。

use std::collections::HashMap;
use std::path::PathBuf;

use crate::executor::result::truncate_chars;
use crate::memory::{MemoryBank, MemoryEntry, MemoryQuery, MemorySummary, Message, WorkingMemory};

/// 上下文中单条结果的最大字符数
const RESULT_PREVIEW_CHARS: usize = 600;
/// 带入的最近摘要条数
const SUMMARY_LIMIT: usize = 3;
/// 每个能力保留的历史回复条数
pub const TRANSCRIPT_TURNS: usize = 4;

/// 单个任务内各能力的历史回复，有界；随任务创建、随任务丢弃
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    turns: HashMap<String, Vec<Message>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录能力在某一步的回复，超出上限时丢弃最旧的
    pub fn record(&mut self, capability: &str, step: usize, reply: impl Into<String>) {
        let messages = self.turns.entry(capability.to_lowercase()).or_default();
        messages.push(Message::user(format!("(step {step})")));
        messages.push(Message::assistant(reply.into()));
        let excess = messages.len().saturating_sub(TRANSCRIPT_TURNS * 2);
        messages.drain(..excess);
    }

    pub fn for_capability(&self, capability: &str) -> Vec<Message> {
        self.turns
            .get(&capability.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default)]
pub struct StepContext {
    pub task: String,
    pub step: usize,
    pub attempt: usize,
    pub working_dir: PathBuf,
    /// 最近的条目（按 step 升序）
    pub recent: Vec<MemoryEntry>,
    /// 与任务相关但不在 recent 中的条目
    pub relevant: Vec<MemoryEntry>,
    pub summaries: Vec<MemorySummary>,
    pub working: WorkingMemory,
    /// 上一次尝试的错误（重试时）
    pub retry_error: Option<String>,
    /// 选中能力在本任务内的历史回复（user/assistant 交替）
    pub transcript: Vec<Message>,
    /// 从先前任务学到、针对选中能力的提示
    pub hints: Vec<String>,
}

impl StepContext {
    pub fn new(task: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            task: task.into(),
            working_dir,
            ..Default::default()
        }
    }

    /// 从记忆库取最近 n 条、相关条目与最近摘要
    pub fn with_memory(mut self, bank: &MemoryBank, recent_entries: usize) -> Self {
        self.recent = bank.get_recent(recent_entries);
        let seen: Vec<_> = self.recent.iter().map(|e| e.id).collect();
        self.relevant = bank
            .get_relevant(&MemoryQuery::new(self.task.clone()))
            .into_iter()
            .filter(|e| !seen.contains(&e.id))
            .collect();
        let summaries = bank.get_summaries();
        let skip = summaries.len().saturating_sub(SUMMARY_LIMIT);
        self.summaries = summaries[skip..].to_vec();
        self
    }

    pub fn with_working(mut self, working: &WorkingMemory) -> Self {
        self.working = working.clone();
        self
    }

    pub fn at_step(mut self, step: usize, attempt: usize) -> Self {
        self.step = step;
        self.attempt = attempt;
        self
    }

    pub fn with_retry_error(mut self, error: Option<String>) -> Self {
        self.retry_error = error;
        self
    }

    pub fn with_transcript(mut self, transcript: Vec<Message>) -> Self {
        self.transcript = transcript;
        self
    }

    pub fn with_hints(mut self, hints: Vec<String>) -> Self {
        self.hints = hints;
        self
    }

    /// 上一条记录的结果
    pub fn last_result(&self) -> Option<&str> {
        self.recent.last().map(|e| e.result.as_str())
    }

    /// 拼入 prompt 的上下文段落
    pub fn to_prompt_section(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!("## Task\n{}\n\n", self.task));
        s.push_str(&format!("## Working directory\n{}\n\n", self.working_dir.display()));

        if !self.summaries.is_empty() {
            s.push_str("## Earlier steps (summarized)\n");
            for summary in &self.summaries {
                s.push_str(&format!("### {}\n", summary.title));
                if let Some(synopsis) = &summary.synopsis {
                    s.push_str(&format!("{synopsis}\n"));
                }
                s.push_str(&format!("{}\n", summary.content.trim_end()));
            }
            s.push('\n');
        }
        if !self.relevant.is_empty() {
            s.push_str("## Related earlier steps\n");
            for e in &self.relevant {
                s.push_str(&format!("- {}\n", e.outcome_line()));
            }
            s.push('\n');
        }
        if !self.recent.is_empty() {
            s.push_str("## Recent steps\n");
            for e in &self.recent {
                s.push_str(&format!("### Step {} ({})\n", e.step, e.capability));
                if let Some(action) = &e.action {
                    s.push_str(&format!("Command: {action}\n"));
                }
                s.push_str(&format!(
                    "Result:\n{}\n",
                    truncate_chars(e.result.trim_end(), RESULT_PREVIEW_CHARS)
                ));
            }
            s.push('\n');
        }

        if !self.hints.is_empty() {
            s.push_str("## Hints from earlier tasks\n");
            for hint in &self.hints {
                s.push_str(&format!("- {hint}\n"));
            }
            s.push('\n');
        }

        let working = self.working.to_prompt_section();
        if !working.is_empty() {
            s.push_str(&working);
        }
        if let Some(err) = &self.retry_error {
            s.push_str(&format!(
                "## Previous attempt failed (attempt {})\n{err}\nAdjust the approach to avoid the same error.\n\n",
                self.attempt.saturating_sub(1)
            ));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConfig;

    #[test]
    fn test_context_pulls_recent_and_summaries() {
        let mut bank = MemoryBank::new(MemoryConfig::default().with_max_entries(4).with_retain_recent(2)).unwrap();
        for i in 1..=5 {
            bank.add_entry(
                MemoryEntry::new(i, "command")
                    .with_action(Some(format!("echo {i}")))
                    .with_result(format!("out {i}"))
                    .with_tag("success"),
            );
        }
        let ctx = StepContext::new("print numbers", PathBuf::from("/tmp"))
            .with_memory(&bank, 2)
            .at_step(6, 1);
        assert_eq!(ctx.recent.iter().map(|e| e.step).collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(ctx.summaries.len(), 1);
        assert_eq!(ctx.last_result(), Some("out 5"));

        let prompt = ctx.to_prompt_section();
        assert!(prompt.contains("## Task\nprint numbers"));
        assert!(prompt.contains("Command: echo 5"));
        assert!(prompt.contains("Steps 1-2"));
    }

    #[test]
    fn test_transcript_is_bounded_per_capability() {
        let mut transcript = Transcript::new();
        for step in 1..=6 {
            transcript.record("command", step, format!("reply {step}"));
        }
        transcript.record("direct_llm", 7, "answer");

        let command = transcript.for_capability("Command");
        assert_eq!(command.len(), TRANSCRIPT_TURNS * 2);
        assert_eq!(command[0].content, "(step 3)");
        assert_eq!(command.last().map(|m| m.content.as_str()), Some("reply 6"));
        assert_eq!(transcript.for_capability("direct_llm").len(), 2);
        assert!(transcript.for_capability("git").is_empty());
    }

    #[test]
    fn test_hints_are_rendered_only_when_present() {
        let ctx = StepContext::new("t", PathBuf::from("."));
        assert!(!ctx.to_prompt_section().contains("## Hints"));
        let ctx = ctx.with_hints(vec!["[troubleshooting] Recurring timeout (4x): narrow the scope".into()]);
        assert!(ctx
            .to_prompt_section()
            .contains("## Hints from earlier tasks\n- [troubleshooting] Recurring timeout (4x)"));
    }

    #[test]
    fn test_retry_error_is_rendered() {
        let ctx = StepContext::new("t", PathBuf::from("."))
            .at_step(2, 2)
            .with_retry_error(Some("timeout".into()));
        assert!(ctx.to_prompt_section().contains("timeout"));
    }
}

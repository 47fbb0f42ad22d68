//! Mock LLM 客户端（用于测试与无 API Key 时的本地运行）
//!
//! 按规则路由回复：任一消息包含 needle 即命中该规则；规则可携带多条回复，依次返回，最后一条重复。
//! 未命中时返回默认回复。`fail_next` 预置的错误优先于任何回复被返回。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

struct Rule {
    needle: String,
    replies: Vec<String>,
    cursor: AtomicUsize,
}

impl Rule {
    fn next_reply(&self) -> String {
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        let idx = i.min(self.replies.len().saturating_sub(1));
        self.replies.get(idx).cloned().unwrap_or_default()
    }
}

pub struct MockLlmClient {
    rules: Vec<Rule>,
    default_reply: String,
    failures: Mutex<VecDeque<LlmError>>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default_reply: default_reply.into(),
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// 任一消息包含 needle 时返回 reply
    pub fn with_rule(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.with_sequence(needle, vec![reply.into()])
    }

    /// 命中 needle 时依次返回 replies，用尽后重复最后一条
    pub fn with_sequence(mut self, needle: impl Into<String>, replies: Vec<String>) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            replies,
            cursor: AtomicUsize::new(0),
        });
        self
    }

    /// 下一次调用返回该错误（可多次调用以排队）
    pub fn fail_next(self, error: LlmError) -> Self {
        if let Ok(mut q) = self.failures.lock() {
            q.push_back(error);
        }
        self
    }

    /// 累计调用次数（含失败）
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new(
            r#"{"thinking": "No language model is configured.", "direct_response": "No language model is configured; set OPENAI_API_KEY or DEEPSEEK_API_KEY to enable planning.", "is_complete": true}"#,
        )
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let queued = self.failures.lock().ok().and_then(|mut q| q.pop_front());
        if let Some(err) = queued {
            return Err(err);
        }

        let rule = self
            .rules
            .iter()
            .find(|r| messages.iter().any(|m| m.content.contains(&r.needle)));
        Ok(match rule {
            Some(rule) => rule.next_reply(),
            None => self.default_reply.clone(),
        })
    }
}

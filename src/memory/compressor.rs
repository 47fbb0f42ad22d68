//! 记忆摘要
//!
//! [`MemoryCompressor`]：同步、确定性的规则摘要，在 add_entry 返回前完成。保留全部标签、最高重要度，以及每条一行的结果描述。
//! [`SummaryWriter`]：可选的模型概要，在 Observing 阶段补写到已有摘要上；模型失败时只保留规则摘要。

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use schemars::JsonSchema;
use serde::Deserialize;
use uuid::Uuid;

use crate::executor::result::truncate_chars;
use crate::llm::{parse_reply, schema_json, LlmClient};
use crate::memory::{MemoryEntry, MemorySummary, Message};

const SYNOPSIS_PROMPT: &str = "You condense a block of executed steps from a shell automation assistant \
into a short synopsis. Keep the results and obstacles that later steps need; drop routine detail. \
Reply with a single JSON object matching this schema:";

/// 概要的默认最大字符数
const SYNOPSIS_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct MemoryCompressor {
    line_max_chars: usize,
}

impl MemoryCompressor {
    pub fn new(line_max_chars: usize) -> Self {
        Self {
            line_max_chars: line_max_chars.max(16),
        }
    }

    /// block 非空；按 step 顺序输出
    pub fn summarize(&self, block: &[MemoryEntry]) -> MemorySummary {
        let first_step = block.iter().map(|e| e.step).min().unwrap_or(0);
        let last_step = block.iter().map(|e| e.step).max().unwrap_or(0);
        let failed = block.iter().filter(|e| e.is_failure()).count();
        let ok = block.len() - failed;

        let tags: BTreeSet<String> = block.iter().flat_map(|e| e.tags.iter().cloned()).collect();
        let importance = block.iter().map(|e| e.importance).fold(0.0_f32, f32::max);

        let mut ordered: Vec<&MemoryEntry> = block.iter().collect();
        ordered.sort_by_key(|e| e.step);

        let mut content = format!("Summary of {} steps ({}-{})\n", block.len(), first_step, last_step);
        for e in ordered {
            content.push_str(&single_line(&e.outcome_line(), self.line_max_chars));
            content.push('\n');
        }
        if !tags.is_empty() {
            content.push_str(&format!(
                "Tags: {}\n",
                tags.iter().cloned().collect::<Vec<_>>().join(", ")
            ));
        }

        MemorySummary {
            id: Uuid::new_v4(),
            title: format!("Steps {first_step}-{last_step}: {ok} ok, {failed} failed"),
            content,
            source_ids: block.iter().map(|e| e.id).collect(),
            tags,
            importance,
            first_step,
            last_step,
            synopsis: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SynopsisReply {
    #[serde(alias = "summary", alias = "synopsis")]
    content: String,
}

/// 请模型为规则摘要写一段概要
pub struct SummaryWriter {
    llm: Arc<dyn LlmClient>,
    max_chars: usize,
}

impl SummaryWriter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            max_chars: SYNOPSIS_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(16);
        self
    }

    /// 模型不可达、回复格式错误或为空时返回 None
    pub async fn write(&self, summary: &MemorySummary) -> Option<String> {
        let system = format!("{SYNOPSIS_PROMPT}\n{}", schema_json::<SynopsisReply>());
        let user = format!(
            "## {}\n{}\nKeep it under {} characters.",
            summary.title,
            summary.content.trim_end(),
            self.max_chars
        );
        let reply = match self
            .llm
            .complete(&[Message::system(system), Message::user(user)])
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "model summary unavailable, keeping rule-based summary");
                return None;
            }
        };
        match parse_reply::<SynopsisReply>(&reply) {
            Ok(r) if !r.content.trim().is_empty() => {
                Some(single_line(r.content.trim(), self.max_chars))
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "model summary malformed, keeping rule-based summary");
                None
            }
        }
    }
}

fn single_line(s: &str, max_chars: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        truncate_chars(&flat, max_chars)
            .lines()
            .next()
            .map(|head| format!("{head}..."))
            .unwrap_or_default()
    }
}

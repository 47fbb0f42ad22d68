//! 完成判定：能力未声明 done 时，由模型根据任务与最近步骤判断任务是否已完成
//!
//! 回复格式错误或模型不可达一律视为未完成，由迭代上限兜底。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::Step;
use crate::llm::{parse_reply, schema_json, LlmClient};
use crate::memory::Message;

const COMPLETION_PROMPT: &str = "You judge whether a task is complete. \
Given the user's task and the steps executed so far with their results, decide whether the task \
has been fully accomplished. Answer `complete: false` if any required part is still missing. \
Reply with a single JSON object matching this schema:";

/// 判定时带入的最近步骤数
const STEPS_IN_PROMPT: usize = 6;
const OBSERVATION_CHARS: usize = 800;

#[derive(Debug, Deserialize, JsonSchema)]
struct CompletionReply {
    #[serde(alias = "is_complete", alias = "done")]
    complete: bool,
    #[serde(default)]
    reason: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionVerdict {
    pub complete: bool,
    pub reason: String,
}

pub struct CompletionChecker {
    llm: Arc<dyn LlmClient>,
}

impl CompletionChecker {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn check(&self, task: &str, steps: &[Step]) -> CompletionVerdict {
        let skip = steps.len().saturating_sub(STEPS_IN_PROMPT);
        let mut progress = String::new();
        for step in &steps[skip..] {
            progress.push_str(&format!(
                "### Step {} ({}, {})\n",
                step.number,
                step.capability,
                step.outcome.tag()
            ));
            if let Some(action) = &step.action {
                progress.push_str(&format!("Command: {action}\n"));
            }
            progress.push_str(&format!("Result:\n{}\n\n", step.observation(OBSERVATION_CHARS)));
        }
        let system = format!("{COMPLETION_PROMPT}\n{}", schema_json::<CompletionReply>());
        let user = format!("## Task\n{task}\n\n## Steps so far\n{progress}");

        let reply = match self
            .llm
            .complete(&[Message::system(system), Message::user(user)])
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "completion check unavailable, treating task as incomplete");
                return CompletionVerdict {
                    complete: false,
                    reason: format!("completion check unavailable: {e}"),
                };
            }
        };
        match parse_reply::<CompletionReply>(&reply) {
            Ok(r) => CompletionVerdict {
                complete: r.complete,
                reason: r.reason,
            },
            Err(e) => {
                tracing::warn!(error = %e, "malformed completion reply, treating task as incomplete");
                CompletionVerdict {
                    complete: false,
                    reason: e.to_string(),
                }
            }
        }
    }
}

//! 能力选择器
//!
//! 把全部能力描述（按名称排序）、任务与上下文交给模型，模型返回一个能力名、置信度与理由。
//! 名称未注册或置信度低于阈值时回退到默认能力；回复格式错误同样回退；模型不可达为 selection-error。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::AgentError;
use crate::llm::{parse_reply, schema_json, LlmClient, LlmError};
use crate::memory::Message;
use crate::react::StepContext;
use crate::skills::{Capability, CapabilityRegistry};

const SELECTOR_PROMPT: &str = "You are a capability selector. \
Given the task, the progress so far and the available capabilities, choose the ONE capability \
that should handle the next step. Use the exact capability name from the list. \
Reply with a single JSON object matching this schema:";

/// 模型回复
#[derive(Debug, Deserialize, JsonSchema)]
struct SelectionReply {
    /// 能力名
    #[serde(alias = "selected_skill", alias = "skill")]
    capability: String,
    /// [0, 1]
    confidence: f32,
    #[serde(default)]
    reasoning: String,
}

/// 选择结果
#[derive(Clone)]
pub struct SelectionResult {
    pub capability: Arc<dyn Capability>,
    pub confidence: f32,
    pub reasoning: String,
    /// 是否回退到了默认能力
    pub fallback: bool,
}

impl SelectionResult {
    pub fn name(&self) -> &str {
        &self.capability.descriptor().name
    }
}

impl std::fmt::Debug for SelectionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionResult")
            .field("capability", &self.name())
            .field("confidence", &self.confidence)
            .field("reasoning", &self.reasoning)
            .field("fallback", &self.fallback)
            .finish()
    }
}

pub struct CapabilitySelector {
    registry: Arc<CapabilityRegistry>,
    llm: Arc<dyn LlmClient>,
    min_confidence: f32,
}

impl CapabilitySelector {
    pub fn new(registry: Arc<CapabilityRegistry>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            registry,
            llm,
            min_confidence: 0.5,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence.clamp(0.0, 1.0);
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub async fn select(&self, task: &str, context: &StepContext) -> Result<SelectionResult, AgentError> {
        if self.registry.is_empty() {
            return Err(AgentError::Selection("no capabilities registered".into()));
        }
        if self.registry.len() == 1 {
            if let Some(only) = self.registry.all().next() {
                return Ok(SelectionResult {
                    capability: Arc::clone(only),
                    confidence: 1.0,
                    reasoning: "only capability registered".into(),
                    fallback: false,
                });
            }
        }

        let reply = match self.ask_model(task, context).await {
            Ok(reply) => reply,
            Err(LlmError::Malformed(msg)) => {
                tracing::warn!(error = %msg, "malformed selection reply, using default capability");
                return self.fallback(0.0, format!("malformed selection reply: {msg}"));
            }
            Err(e) => {
                return Err(AgentError::Selection(format!(
                    "model unavailable during selection: {e}"
                )))
            }
        };

        let confidence = reply.confidence.clamp(0.0, 1.0);
        match self.registry.get(&reply.capability) {
            Some(capability) if confidence >= self.min_confidence => Ok(SelectionResult {
                capability,
                confidence,
                reasoning: reply.reasoning,
                fallback: false,
            }),
            Some(_) => {
                tracing::info!(
                    capability = %reply.capability,
                    confidence,
                    min = self.min_confidence,
                    "selection confidence below threshold, using default capability"
                );
                self.fallback(confidence, reply.reasoning)
            }
            None => {
                tracing::warn!(capability = %reply.capability, "model chose an unknown capability");
                self.fallback(
                    confidence,
                    format!("unknown capability `{}`: {}", reply.capability, reply.reasoning),
                )
            }
        }
    }

    fn fallback(&self, confidence: f32, reasoning: String) -> Result<SelectionResult, AgentError> {
        let capability = self.registry.default_capability().ok_or_else(|| {
            AgentError::Selection(format!("no default capability to fall back to ({reasoning})"))
        })?;
        Ok(SelectionResult {
            capability,
            confidence,
            reasoning,
            fallback: true,
        })
    }

    async fn ask_model(&self, task: &str, context: &StepContext) -> Result<SelectionReply, LlmError> {
        let catalog = self
            .registry
            .descriptors()
            .iter()
            .map(|d| d.summary())
            .collect::<Vec<_>>()
            .join("\n");
        let system = format!(
            "{SELECTOR_PROMPT}\n{}\n\nAvailable capabilities:\n{catalog}",
            schema_json::<SelectionReply>()
        );
        let user = format!("Task: {task}\n\n{}", context.to_prompt_section());
        let reply = self
            .llm
            .complete(&[Message::system(system), Message::user(user)])
            .await?;
        tracing::debug!(reply = %reply, "selection reply");
        parse_reply::<SelectionReply>(&reply)
    }
}

//! 能力契约：描述、调用选项、结构化响应
//!
//! 能力（Capability）把任务与上下文转为一个待执行的动作或一个直接回答。
//! 响应字段兼容两套命名（command/action、direct_response/direct_answer、is_complete/task_complete/done）。

use std::path::PathBuf;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmError;
use crate::react::StepContext;

/// 能力的静态元数据，启动时注册，之后只读
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// 供选择器使用的一行描述
    pub fn summary(&self) -> String {
        if self.tags.is_empty() {
            format!("- {}: {}", self.name, self.description)
        } else {
            format!("- {}: {} (tags: {})", self.name, self.description, self.tags.join(", "))
        }
    }
}

/// 调用选项
#[derive(Clone, Debug, Default)]
pub struct CapabilityOptions {
    pub working_dir: PathBuf,
    pub step: usize,
    /// 本步第几次尝试（从 1 开始）
    pub attempt: usize,
}

/// 能力返回的一步响应
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CapabilityResponse {
    /// 对任务与上一步结果的分析
    #[serde(default)]
    pub thinking: String,
    /// 要执行的一条 shell 命令；直接回答时为空
    #[serde(default, alias = "command")]
    pub action: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    /// 不需要执行命令时的直接回答
    #[serde(default, alias = "direct_response")]
    pub direct_answer: Option<String>,
    /// 执行完本步后任务即完成
    #[serde(default, alias = "is_complete", alias = "task_complete")]
    pub done: bool,
    #[serde(default)]
    pub is_dangerous: bool,
    #[serde(default)]
    pub danger_reason: Option<String>,
    #[serde(default)]
    pub next_step: Option<String>,
    /// 上一条命令失败的原因分析
    #[serde(default)]
    pub error_analysis: Option<String>,
}

impl CapabilityResponse {
    pub fn action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Default::default()
        }
    }

    pub fn answer(answer: impl Into<String>) -> Self {
        Self {
            direct_answer: Some(answer.into()),
            ..Default::default()
        }
    }

    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = thinking.into();
        self
    }

    pub fn done(mut self) -> Self {
        self.done = true;
        self
    }

    pub fn dangerous(mut self, reason: impl Into<String>) -> Self {
        self.is_dangerous = true;
        self.danger_reason = Some(reason.into());
        self
    }

    /// 空白字符串字段归一化为 None
    pub fn normalized(mut self) -> Self {
        for field in [
            &mut self.action,
            &mut self.explanation,
            &mut self.direct_answer,
            &mut self.danger_reason,
            &mut self.next_step,
            &mut self.error_analysis,
        ] {
            if field.as_deref().is_some_and(|s| s.trim().is_empty()) {
                *field = None;
            }
        }
        if let Some(action) = self.action.as_mut() {
            *action = action.trim().to_string();
        }
        self
    }

    /// 能力声明的危险（is_dangerous 为真时）
    pub fn declared_danger(&self) -> Option<String> {
        self.is_dangerous
            .then(|| self.danger_reason.clone().unwrap_or_default())
    }
}

#[derive(Error, Debug, Clone)]
pub enum CapabilityError {
    #[error("model call failed: {0}")]
    Model(LlmError),

    #[error("malformed capability response: {0}")]
    Malformed(String),
}

impl From<LlmError> for CapabilityError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Malformed(msg) => CapabilityError::Malformed(msg),
            other => CapabilityError::Model(other),
        }
    }
}

/// 能力模块
///
/// 注册表在会话间共享，实现不得保存任务内状态；需要的历史都在 `StepContext` 中。
#[async_trait]
pub trait Capability: Send + Sync {
    fn descriptor(&self) -> &CapabilityDescriptor;

    async fn execute(
        &self,
        task: &str,
        context: &StepContext,
        options: &CapabilityOptions,
    ) -> Result<CapabilityResponse, CapabilityError>;
}

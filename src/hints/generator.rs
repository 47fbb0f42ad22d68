//! 把模式写成提示：有模型时请模型措辞，失败或未启用时使用规则模板

use std::sync::Arc;

use chrono::Utc;
use schemars::JsonSchema;
use serde::Deserialize;
use uuid::Uuid;

use crate::hints::{Hint, HintCategory, HintPattern};
use crate::llm::{parse_reply, schema_json, LlmClient};
use crate::memory::Message;

const WORDING_PROMPT: &str = "You write short, actionable hints for a shell automation assistant. \
Given a pattern observed across earlier executions, write a title of at most eight words and one or \
two sentences of guidance. Do not invent facts beyond the pattern. \
Reply with a single JSON object matching this schema:";

/// 提示正文的最大字符数
const CONTENT_CHARS: usize = 300;

#[derive(Debug, Deserialize, JsonSchema)]
struct HintWording {
    title: String,
    #[serde(alias = "hint")]
    content: String,
}

#[derive(Clone, Default)]
pub struct HintGenerator {
    llm: Option<Arc<dyn LlmClient>>,
}

impl HintGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, llm: Option<Arc<dyn LlmClient>>) -> Self {
        self.llm = llm;
        self
    }

    pub async fn generate(&self, patterns: &[HintPattern]) -> Vec<Hint> {
        let mut hints = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let (title, content) = match self.word(pattern).await {
                Some(wording) => wording,
                None => template(pattern),
            };
            hints.push(Hint::from_pattern(pattern, title, content));
        }
        hints
    }

    async fn word(&self, pattern: &HintPattern) -> Option<(String, String)> {
        let llm = self.llm.as_ref()?;
        let system = format!("{WORDING_PROMPT}\n{}", schema_json::<HintWording>());
        let user = format!(
            "Capability: {}\nKind: {}\nPattern: {}\nSeen {} times, success rate {:.0}%\nExamples:\n{}",
            pattern.capability,
            pattern.category,
            pattern.key,
            pattern.frequency,
            pattern.success_rate * 100.0,
            pattern
                .examples
                .iter()
                .map(|e| format!("- {e}"))
                .collect::<Vec<_>>()
                .join("\n")
        );
        let reply = llm
            .complete(&[Message::system(system), Message::user(user)])
            .await
            .map_err(|e| tracing::debug!(error = %e, "hint wording unavailable, using template"))
            .ok()?;
        let wording = parse_reply::<HintWording>(&reply)
            .map_err(|e| tracing::debug!(error = %e, "hint wording malformed, using template"))
            .ok()?;
        let title = wording.title.trim();
        let content = wording.content.trim();
        if title.is_empty() || content.is_empty() {
            return None;
        }
        Some((
            title.to_string(),
            crate::executor::result::truncate_chars(content, CONTENT_CHARS),
        ))
    }
}

/// 规则模板
pub fn template(pattern: &HintPattern) -> (String, String) {
    let percent = (pattern.success_rate * 100.0).round() as u32;
    match pattern.category {
        HintCategory::Success => (
            format!("Reliable: {}", pattern.key),
            format!(
                "`{}` succeeded in {percent}% of {} runs; prefer this form for similar steps.",
                pattern.key, pattern.frequency
            ),
        ),
        HintCategory::Failure => (
            format!("Unreliable: {}", pattern.key),
            format!(
                "`{}` failed in {}% of {} runs; check its preconditions or use another approach.",
                pattern.key,
                100 - percent.min(100),
                pattern.frequency
            ),
        ),
        HintCategory::Troubleshooting => {
            let advice = pattern
                .error_kind
                .map(|k| k.advice())
                .unwrap_or("Inspect the error output before retrying.");
            let seen = pattern.examples.first().map(String::as_str).unwrap_or_default();
            (
                format!("Recurring {} ({}x)", pattern.key, pattern.frequency),
                if seen.is_empty() {
                    advice.to_string()
                } else {
                    format!("{advice} Seen with: {seen}")
                },
            )
        }
    }
}

impl Hint {
    fn from_pattern(pattern: &HintPattern, title: String, content: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            capability: pattern.capability.clone(),
            category: pattern.category,
            key: pattern.key.clone(),
            title,
            content,
            frequency: pattern.frequency,
            success_rate: pattern.success_rate,
            confidence: pattern.confidence,
            examples: pattern.examples.clone(),
            usage_count: 0,
            effectiveness: 0.5,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hints::ErrorKind;
    use crate::llm::{LlmError, MockLlmClient};

    fn pattern(category: HintCategory) -> HintPattern {
        HintPattern {
            capability: "command".into(),
            category,
            key: "du -sh /PATH".into(),
            frequency: 8,
            success_rate: 1.0,
            confidence: 0.8,
            examples: vec!["du -sh /srv".into()],
            error_kind: None,
        }
    }

    #[test]
    fn test_templates() {
        let (title, content) = template(&pattern(HintCategory::Success));
        assert_eq!(title, "Reliable: du -sh /PATH");
        assert!(content.contains("100% of 8 runs"));

        let mut failing = pattern(HintCategory::Failure);
        failing.success_rate = 0.25;
        assert!(template(&failing).1.contains("failed in 75% of 8 runs"));

        let mut trouble = pattern(HintCategory::Troubleshooting);
        trouble.key = "permission_error".into();
        trouble.error_kind = Some(ErrorKind::Permission);
        let (title, content) = template(&trouble);
        assert_eq!(title, "Recurring permission_error (8x)");
        assert!(content.starts_with("Check ownership"));
        assert!(content.ends_with("Seen with: du -sh /srv"));
    }

    #[tokio::test]
    async fn test_model_wording_is_used() {
        let llm = Arc::new(MockLlmClient::new(
            r#"{"title": "Use du for sizes", "content": "du -sh works well for directory sizes."}"#,
        ));
        let hints = HintGenerator::new()
            .with_model(Some(llm))
            .generate(&[pattern(HintCategory::Success)])
            .await;
        assert_eq!(hints[0].title, "Use du for sizes");
        assert_eq!(hints[0].key, "du -sh /PATH");
        assert_eq!(hints[0].effectiveness, 0.5);
    }

    #[tokio::test]
    async fn test_model_failure_falls_back_to_template() {
        let llm = Arc::new(MockLlmClient::new("not json").fail_next(LlmError::Unavailable("down".into())));
        let generator = HintGenerator::new().with_model(Some(llm));
        let first = generator.generate(&[pattern(HintCategory::Success)]).await;
        assert_eq!(first[0].title, "Reliable: du -sh /PATH");
        let second = generator.generate(&[pattern(HintCategory::Success)]).await;
        assert_eq!(second[0].title, "Reliable: du -sh /PATH");
    }
}

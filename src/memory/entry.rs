//! 记忆条目与摘要
//!
//! MemoryEntry 由已完成的 Step 生成，只追加不修改；MemorySummary 替换一段连续的旧条目。

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 视为失败观察的结果标签
const FAILURE_TAGS: &[&str] = &["failure", "blocked", "skipped", "cancelled"];

/// 一条步骤记忆
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub step: usize,
    pub capability: String,
    /// 压缩后的思考过程
    pub thinking: String,
    pub action: Option<String>,
    /// 压缩后的执行结果或直接回答
    pub result: String,
    /// [0, 1]
    pub importance: f32,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(step: usize, capability: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            step,
            capability: capability.into(),
            thinking: String::new(),
            action: None,
            result: String::new(),
            importance: 0.5,
            tags: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = thinking.into();
        self
    }

    pub fn with_action(mut self, action: Option<String>) -> Self {
        self.action = action;
        self
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = result.into();
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into().trim().to_lowercase();
        if !tag.is_empty() {
            self.tags.insert(tag);
        }
        self
    }

    pub fn with_tags<I, S>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        tags.into_iter().fold(self, |e, t| e.with_tag(t))
    }

    pub fn is_failure(&self) -> bool {
        FAILURE_TAGS.iter().any(|t| self.tags.contains(*t))
    }

    /// 单行结果描述（取结果首行）
    pub fn outcome_line(&self) -> String {
        let status = if self.is_failure() { "FAILED" } else { "ok" };
        let action = self.action.as_deref().unwrap_or("(no action)");
        let first = self.result.lines().next().unwrap_or("").trim();
        format!("#{} [{}] {}: {} -> {}", self.step, self.capability, status, action, first)
    }
}

/// 一段旧条目的压缩替代
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemorySummary {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub source_ids: Vec<Uuid>,
    /// 源条目标签的并集
    pub tags: BTreeSet<String>,
    /// 源条目中的最高重要度
    pub importance: f32,
    pub first_step: usize,
    pub last_step: usize,
    /// 模型写的概要；规则 content 始终保留
    #[serde(default)]
    pub synopsis: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 检索请求
#[derive(Clone, Debug, Default)]
pub struct MemoryQuery {
    pub text: String,
    pub tags: Vec<String>,
    /// 未指定时使用 MemoryConfig::max_results
    pub max_results: Option<usize>,
}

impl MemoryQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn limit(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// 查询词集合：文本分词（小写、长度 > 1）∪ 显式标签
    pub fn terms(&self) -> BTreeSet<String> {
        self.text
            .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
            .map(|w| w.to_lowercase())
            .filter(|w| w.chars().count() > 1)
            .chain(self.tags.iter().map(|t| t.trim().to_lowercase()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_importance_is_clamped() {
        assert_eq!(MemoryEntry::new(1, "c").with_importance(3.0).importance, 1.0);
        assert_eq!(MemoryEntry::new(1, "c").with_importance(-1.0).importance, 0.0);
    }

    #[test]
    fn test_tags_are_normalized() {
        let e = MemoryEntry::new(1, "c").with_tags(["Success", " ls ", ""]);
        assert_eq!(e.tags.iter().cloned().collect::<Vec<_>>(), vec!["ls", "success"]);
        assert!(!e.is_failure());
        assert!(MemoryEntry::new(2, "c").with_tag("blocked").is_failure());
    }

    #[test]
    fn test_query_terms() {
        let q = MemoryQuery::new("List the files, please").with_tags(["git"]);
        let terms = q.terms();
        assert!(terms.contains("list"));
        assert!(terms.contains("files"));
        assert!(terms.contains("git"));
    }
}

//! 有界记忆库：每个会话一个实例
//!
//! 未压缩条目数达到阈值时，在 add_entry 返回前把最旧的一段（阈值 - retain_recent 条）压缩为一条摘要。
//! 重要度高于 pinned_threshold 的条目不进入摘要，而是移入 pinned 区，始终单独可见。

use serde::Deserialize;
use uuid::Uuid;

use crate::core::AgentError;
use crate::memory::{MemoryCompressor, MemoryEntry, MemoryQuery, MemorySummary};

const RECENCY_WEIGHT: f32 = 0.2;
const TAG_WEIGHT: f32 = 0.5;
const IMPORTANCE_WEIGHT: f32 = 0.3;

/// [memory] 段
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// 未设置时等于 max_entries
    #[serde(default)]
    pub compression_threshold: Option<usize>,
    #[serde(default = "default_retain_recent")]
    pub retain_recent: usize,
    #[serde(default = "default_pinned_threshold")]
    pub pinned_threshold: f32,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_line_max_chars")]
    pub line_max_chars: usize,
    /// 压缩后是否请模型为摘要写概要（失败时只有规则摘要）
    #[serde(default)]
    pub model_summaries: bool,
}

fn default_max_entries() -> usize {
    20
}

fn default_retain_recent() -> usize {
    4
}

fn default_pinned_threshold() -> f32 {
    0.9
}

fn default_max_results() -> usize {
    5
}

fn default_line_max_chars() -> usize {
    160
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            compression_threshold: None,
            retain_recent: default_retain_recent(),
            pinned_threshold: default_pinned_threshold(),
            max_results: default_max_results(),
            line_max_chars: default_line_max_chars(),
            model_summaries: false,
        }
    }
}

impl MemoryConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_retain_recent(mut self, retain_recent: usize) -> Self {
        self.retain_recent = retain_recent;
        self
    }

    pub fn with_pinned_threshold(mut self, pinned_threshold: f32) -> Self {
        self.pinned_threshold = pinned_threshold;
        self
    }

    pub fn with_model_summaries(mut self, enable: bool) -> Self {
        self.model_summaries = enable;
        self
    }

    pub fn threshold(&self) -> usize {
        self.compression_threshold.unwrap_or(self.max_entries)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        let threshold = self.threshold();
        if self.max_entries == 0 {
            return Err(AgentError::Config("memory.max_entries must be > 0".into()));
        }
        if threshold > self.max_entries {
            return Err(AgentError::Config(format!(
                "memory.compression_threshold ({threshold}) exceeds max_entries ({})",
                self.max_entries
            )));
        }
        if self.retain_recent >= threshold {
            return Err(AgentError::Config(format!(
                "memory.retain_recent ({}) must be below compression_threshold ({threshold})",
                self.retain_recent
            )));
        }
        if !(0.0..=1.0).contains(&self.pinned_threshold) {
            return Err(AgentError::Config(format!(
                "memory.pinned_threshold ({}) must be within [0, 1]",
                self.pinned_threshold
            )));
        }
        Ok(())
    }
}

/// 记忆库统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub total_added: usize,
    pub uncompressed: usize,
    pub pinned: usize,
    pub summaries: usize,
    pub compressions: usize,
}

#[derive(Debug)]
pub struct MemoryBank {
    config: MemoryConfig,
    compressor: MemoryCompressor,
    entries: Vec<MemoryEntry>,
    pinned: Vec<MemoryEntry>,
    summaries: Vec<MemorySummary>,
    /// 等待模型概要的摘要
    pending: Vec<Uuid>,
    total_added: usize,
    compressions: usize,
}

impl MemoryBank {
    /// 配置非法时返回 Config 错误
    pub fn new(config: MemoryConfig) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self {
            compressor: MemoryCompressor::new(config.line_max_chars),
            config,
            entries: Vec::new(),
            pinned: Vec::new(),
            summaries: Vec::new(),
            pending: Vec::new(),
            total_added: 0,
            compressions: 0,
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn add_entry(&mut self, entry: MemoryEntry) {
        self.entries.push(entry);
        self.total_added += 1;
        if self.entries.len() >= self.config.threshold() {
            self.compress();
        }
    }

    fn compress(&mut self) {
        let block_len = self
            .config
            .threshold()
            .saturating_sub(self.config.retain_recent)
            .min(self.entries.len());
        if block_len == 0 {
            return;
        }
        let block: Vec<MemoryEntry> = self.entries.drain(..block_len).collect();
        let (pinned, rest): (Vec<_>, Vec<_>) = block
            .into_iter()
            .partition(|e| e.importance > self.config.pinned_threshold);

        let pinned_count = pinned.len();
        self.pinned.extend(pinned);
        if !rest.is_empty() {
            let summary = self.compressor.summarize(&rest);
            tracing::debug!(
                title = %summary.title,
                sources = summary.source_ids.len(),
                pinned = pinned_count,
                "memory compressed"
            );
            if self.config.model_summaries {
                self.pending.push(summary.id);
            }
            self.summaries.push(summary);
        }
        self.compressions += 1;
    }

    /// 所有单独可见的条目（pinned + 未压缩），按 step 升序
    fn visible(&self) -> Vec<&MemoryEntry> {
        let mut all: Vec<&MemoryEntry> = self.pinned.iter().chain(self.entries.iter()).collect();
        all.sort_by_key(|e| e.step);
        all
    }

    /// 最近 n 条（按 step 升序返回）
    pub fn get_recent(&self, n: usize) -> Vec<MemoryEntry> {
        let visible = self.visible();
        let skip = visible.len().saturating_sub(n);
        visible.into_iter().skip(skip).cloned().collect()
    }

    /// 按 近因 + 标签重合 + 重要度 打分，返回至多 max_results 条
    pub fn get_relevant(&self, query: &MemoryQuery) -> Vec<MemoryEntry> {
        let limit = query.max_results.unwrap_or(self.config.max_results);
        let visible = self.visible();
        if limit == 0 || visible.is_empty() {
            return Vec::new();
        }
        let terms = query.terms();
        let newest = visible.iter().map(|e| e.step).max().unwrap_or(0);

        let mut scored: Vec<(f32, &MemoryEntry)> = visible
            .into_iter()
            .map(|e| {
                let age = newest.saturating_sub(e.step) as f32;
                let recency = 1.0 / (1.0 + age);
                let overlap = if terms.is_empty() {
                    0.0
                } else {
                    e.tags.intersection(&terms).count() as f32 / terms.len() as f32
                };
                let score =
                    RECENCY_WEIGHT * recency + TAG_WEIGHT * overlap + IMPORTANCE_WEIGHT * e.importance;
                (score, e)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.step.cmp(&a.1.step))
        });
        scored.into_iter().take(limit).map(|(_, e)| e.clone()).collect()
    }

    pub fn get_summaries(&self) -> &[MemorySummary] {
        &self.summaries
    }

    /// 取出等待概要的摘要（每条只交出一次）
    pub fn take_pending_summaries(&mut self) -> Vec<MemorySummary> {
        let pending = std::mem::take(&mut self.pending);
        self.summaries
            .iter()
            .filter(|s| pending.contains(&s.id))
            .cloned()
            .collect()
    }

    /// 写入模型概要；摘要不存在时返回 false
    pub fn set_synopsis(&mut self, id: Uuid, synopsis: impl Into<String>) -> bool {
        match self.summaries.iter_mut().find(|s| s.id == id) {
            Some(summary) => {
                summary.synopsis = Some(synopsis.into());
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            total_added: self.total_added,
            uncompressed: self.entries.len(),
            pinned: self.pinned.len(),
            summaries: self.summaries.len(),
            compressions: self.compressions,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.pinned.clear();
        self.summaries.clear();
        self.pending.clear();
        self.total_added = 0;
        self.compressions = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(step: usize, importance: f32, tags: &[&str]) -> MemoryEntry {
        MemoryEntry::new(step, "command")
            .with_action(Some(format!("echo {step}")))
            .with_result(format!("{step}"))
            .with_importance(importance)
            .with_tags(tags.iter().copied())
    }

    #[test]
    fn test_validate_rejects_bad_combinations() {
        assert!(MemoryConfig::default().validate().is_ok());
        let bad = MemoryConfig {
            compression_threshold: Some(30),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(MemoryConfig::default().with_retain_recent(20).validate().is_err());
        assert!(MemoryConfig::default().with_pinned_threshold(1.5).validate().is_err());
        assert!(MemoryBank::new(MemoryConfig::default().with_max_entries(0)).is_err());
    }

    #[test]
    fn test_seven_entries_into_six_gives_one_summary() {
        let mut bank = MemoryBank::new(MemoryConfig::default().with_max_entries(6)).unwrap();
        for i in 1..=7 {
            bank.add_entry(entry(i, 0.2, &["success"]));
            assert!(bank.stats().uncompressed <= 6);
        }
        let stats = bank.stats();
        assert_eq!(stats.summaries, 1);
        assert_eq!(stats.total_added, 7);
        assert_eq!(stats.uncompressed, 5);
        let s = &bank.get_summaries()[0];
        assert_eq!((s.first_step, s.last_step), (1, 2));
    }

    #[test]
    fn test_bound_holds_for_many_sizes() {
        for m in 2..12 {
            let cfg = MemoryConfig::default().with_max_entries(m).with_retain_recent(1);
            let mut bank = MemoryBank::new(cfg).unwrap();
            for i in 1..=50 {
                bank.add_entry(entry(i, 0.3, &["x"]));
                assert!(bank.stats().uncompressed <= m, "m={m} i={i}");
            }
        }
    }

    #[test]
    fn test_pinned_entries_survive_compression() {
        let mut bank = MemoryBank::new(MemoryConfig::default().with_max_entries(4).with_retain_recent(1)).unwrap();
        bank.add_entry(entry(1, 0.95, &["blocked", "rm"]));
        bank.add_entry(entry(2, 0.2, &["success"]));
        bank.add_entry(entry(3, 0.2, &["success"]));
        bank.add_entry(entry(4, 0.2, &["success"]));

        let stats = bank.stats();
        assert_eq!(stats.pinned, 1);
        assert_eq!(stats.summaries, 1);
        assert_eq!(bank.get_summaries()[0].source_ids.len(), 2);
        let recent = bank.get_recent(10);
        assert_eq!(recent.first().map(|e| e.step), Some(1));
        assert!(recent.iter().any(|e| e.tags.contains("blocked")));
    }

    #[test]
    fn test_pending_summaries_only_when_enabled() {
        let cfg = MemoryConfig::default().with_max_entries(3).with_retain_recent(1);
        let mut plain = MemoryBank::new(cfg.clone()).unwrap();
        let mut refined = MemoryBank::new(cfg.with_model_summaries(true)).unwrap();
        for i in 1..=3 {
            plain.add_entry(entry(i, 0.3, &["success"]));
            refined.add_entry(entry(i, 0.3, &["success"]));
        }
        assert!(plain.take_pending_summaries().is_empty());

        let pending = refined.take_pending_summaries();
        assert_eq!(pending.len(), 1);
        assert!(refined.take_pending_summaries().is_empty());
        assert!(refined.set_synopsis(pending[0].id, "listed two directories"));
        assert!(!refined.set_synopsis(Uuid::new_v4(), "nope"));

        let summary = &refined.get_summaries()[0];
        assert_eq!(summary.synopsis.as_deref(), Some("listed two directories"));
        assert!(summary.content.contains("#1 [command] ok: echo 1 -> 1"));
        assert!(summary.tags.contains("success"));
    }

    #[test]
    fn test_recent_is_ordered_tail() {
        let mut bank = MemoryBank::new(MemoryConfig::default()).unwrap();
        for i in 1..=5 {
            bank.add_entry(entry(i, 0.5, &[]));
        }
        let steps: Vec<usize> = bank.get_recent(3).iter().map(|e| e.step).collect();
        assert_eq!(steps, vec![3, 4, 5]);
    }

    #[test]
    fn test_relevant_prefers_tag_overlap() {
        let mut bank = MemoryBank::new(MemoryConfig::default()).unwrap();
        bank.add_entry(entry(1, 0.5, &["git", "success"]));
        bank.add_entry(entry(2, 0.5, &["ls", "success"]));
        bank.add_entry(entry(3, 0.5, &["cat", "success"]));

        let hits = bank.get_relevant(&MemoryQuery::new("git status").limit(1));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].step, 1);

        let capped = bank.get_relevant(&MemoryQuery::new("anything").limit(2));
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].step, 3);
    }

    #[test]
    fn test_clear_resets() {
        let mut bank = MemoryBank::new(MemoryConfig::default().with_max_entries(3).with_retain_recent(1)).unwrap();
        for i in 1..=5 {
            bank.add_entry(entry(i, 0.5, &[]));
        }
        bank.clear();
        assert_eq!(bank.stats(), MemoryStats::default());
        assert!(bank.get_recent(5).is_empty());
    }
}

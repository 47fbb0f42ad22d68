//! 提示持久化
//!
//! 单文件 JSON；无路径时仅保存在内存中。同一 (能力, 类别, 键) 只保留一条，
//! 再次分析得到时更新统计但保留使用次数与有效度。所有会话通过 Arc 共享同一个 HintStore。

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hints::HintCategory;

/// 每个 (能力, 类别) 最多保留的提示数
const MAX_PER_CATEGORY: usize = 5;
/// 有效度更新步长
const FEEDBACK_RATE: f32 = 0.2;

/// 一条学到的提示
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hint {
    pub id: Uuid,
    pub capability: String,
    pub category: HintCategory,
    pub key: String,
    pub title: String,
    pub content: String,
    pub frequency: usize,
    pub success_rate: f32,
    pub confidence: f32,
    #[serde(default)]
    pub examples: Vec<String>,
    /// 被注入 prompt 的次数
    #[serde(default)]
    pub usage_count: usize,
    /// [0, 1]，随使用该提示的任务结果变化
    #[serde(default = "default_effectiveness")]
    pub effectiveness: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_effectiveness() -> f32 {
    0.5
}

impl Hint {
    /// prompt 中的一行
    pub fn prompt_line(&self) -> String {
        format!("[{}] {}: {}", self.category, self.title, self.content)
    }

    fn same_slot(&self, other: &Hint) -> bool {
        self.capability == other.capability && self.category == other.category && self.key == other.key
    }

    fn rank(&self) -> (f32, usize, f32) {
        (self.effectiveness, self.usage_count, self.confidence)
    }
}

fn by_rank(a: &Hint, b: &Hint) -> std::cmp::Ordering {
    b.rank()
        .partial_cmp(&a.rank())
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(b.updated_at.cmp(&a.updated_at))
}

/// 统计
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HintStats {
    pub total: usize,
    pub capabilities: usize,
    pub total_usage: usize,
}

#[derive(Debug)]
pub struct HintStore {
    path: Option<PathBuf>,
    hints: Mutex<Vec<Hint>>,
}

impl HintStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            hints: Mutex::new(Vec::new()),
        }
    }

    /// 从 JSON 文件加载；文件不存在时为空
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let hints = if path.exists() {
            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            if data.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&data)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
        } else {
            Vec::new()
        };
        Ok(Self {
            path: Some(path),
            hints: Mutex::new(hints),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Hint>> {
        match self.hints.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 插入或更新；返回写入条数
    pub fn upsert(&self, fresh: Vec<Hint>) -> usize {
        let mut hints = self.lock();
        let count = fresh.len();
        for hint in fresh {
            match hints.iter_mut().find(|h| h.same_slot(&hint)) {
                Some(existing) => {
                    existing.title = hint.title;
                    existing.content = hint.content;
                    existing.frequency = hint.frequency;
                    existing.success_rate = hint.success_rate;
                    existing.confidence = hint.confidence;
                    existing.examples = hint.examples;
                    existing.updated_at = hint.updated_at;
                }
                None => hints.push(hint),
            }
        }

        hints.sort_by(by_rank);
        let mut kept: Vec<(String, HintCategory, usize)> = Vec::new();
        hints.retain(|h| {
            match kept
                .iter_mut()
                .find(|(cap, cat, _)| *cap == h.capability && *cat == h.category)
            {
                Some((_, _, n)) if *n >= MAX_PER_CATEGORY => false,
                Some((_, _, n)) => {
                    *n += 1;
                    true
                }
                None => {
                    kept.push((h.capability.clone(), h.category, 1));
                    true
                }
            }
        });
        count
    }

    /// 某能力的提示，按有效度、使用次数、置信度排序
    pub fn for_capability(&self, capability: &str, max: usize) -> Vec<Hint> {
        let capability = capability.to_lowercase();
        let mut hints: Vec<Hint> = self
            .lock()
            .iter()
            .filter(|h| h.capability == capability)
            .cloned()
            .collect();
        hints.sort_by(by_rank);
        hints.truncate(max);
        hints
    }

    /// 记录一次任务对所用提示的反馈：计入使用次数，有效度向结果靠拢
    pub fn record_feedback(&self, used: &[Uuid], succeeded: bool) {
        let target = if succeeded { 1.0 } else { 0.0 };
        let mut hints = self.lock();
        for id in used {
            if let Some(hint) = hints.iter_mut().find(|h| h.id == *id) {
                hint.usage_count += 1;
                hint.effectiveness += FEEDBACK_RATE * (target - hint.effectiveness);
                hint.effectiveness = hint.effectiveness.clamp(0.0, 1.0);
            }
        }
    }

    /// 删除既过旧又低效的提示；返回删除条数
    pub fn cleanup(&self, max_age: Duration, min_effectiveness: f32) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut hints = self.lock();
        let before = hints.len();
        hints.retain(|h| h.updated_at >= cutoff || h.effectiveness >= min_effectiveness);
        before - hints.len()
    }

    pub fn all(&self) -> Vec<Hint> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> HintStats {
        let hints = self.lock();
        let mut capabilities: Vec<&str> = hints.iter().map(|h| h.capability.as_str()).collect();
        capabilities.sort_unstable();
        capabilities.dedup();
        HintStats {
            total: hints.len(),
            capabilities: capabilities.len(),
            total_usage: hints.iter().map(|h| h.usage_count).sum(),
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let hints = self.lock();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&*hints)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(capability: &str, key: &str) -> Hint {
        let now = Utc::now();
        Hint {
            id: Uuid::new_v4(),
            capability: capability.into(),
            category: HintCategory::Success,
            key: key.into(),
            title: format!("Reliable: {key}"),
            content: format!("`{key}` works"),
            frequency: 8,
            success_rate: 1.0,
            confidence: 0.8,
            examples: Vec::new(),
            usage_count: 0,
            effectiveness: 0.5,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_upsert_keeps_usage_and_effectiveness() {
        let store = HintStore::in_memory();
        let first = hint("command", "ls /PATH");
        let id = first.id;
        store.upsert(vec![first]);
        store.record_feedback(&[id], true);

        let mut again = hint("command", "ls /PATH");
        again.frequency = 12;
        store.upsert(vec![again]);

        let all = store.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].frequency, 12);
        assert_eq!(all[0].usage_count, 1);
        assert!((all[0].effectiveness - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_per_category_cap() {
        let store = HintStore::in_memory();
        store.upsert((0..8).map(|i| hint("command", &format!("cmd{i}"))).collect());
        store.upsert(vec![hint("git", "git status")]);
        assert_eq!(store.len(), MAX_PER_CATEGORY + 1);
        assert_eq!(
            store.stats(),
            HintStats {
                total: MAX_PER_CATEGORY + 1,
                capabilities: 2,
                total_usage: 0
            }
        );
    }

    #[test]
    fn test_for_capability_orders_by_effectiveness() {
        let store = HintStore::in_memory();
        let a = hint("command", "a");
        let b = hint("command", "b");
        let b_id = b.id;
        store.upsert(vec![a, b, hint("git", "c")]);
        store.record_feedback(&[b_id], true);

        let hints = store.for_capability("Command", 5);
        assert_eq!(hints.len(), 2);
        assert_eq!(hints[0].id, b_id);
        assert_eq!(store.for_capability("command", 1).len(), 1);
        assert!(store.for_capability("browser", 5).is_empty());
    }

    #[test]
    fn test_failures_lower_effectiveness_and_cleanup_drops_stale() {
        let store = HintStore::in_memory();
        let mut stale = hint("command", "old");
        stale.updated_at = Utc::now() - Duration::days(40);
        let stale_id = stale.id;
        store.upsert(vec![stale, hint("command", "fresh")]);
        for _ in 0..5 {
            store.record_feedback(&[stale_id], false);
        }
        assert!(store.all().iter().any(|h| h.id == stale_id && h.effectiveness < 0.3));

        assert_eq!(store.cleanup(Duration::days(30), 0.3), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_persists_and_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("hints.json");
        let store = HintStore::open(&path).unwrap();
        store.upsert(vec![hint("command", "ls /PATH")]);
        store.save().unwrap();

        let reloaded = HintStore::open(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.all()[0].key, "ls /PATH");
        assert!(HintStore::in_memory().save().is_ok());
    }
}

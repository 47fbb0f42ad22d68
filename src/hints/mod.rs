//! 自动提示：从已完成任务的步骤中学习，在后续任务中注入能力 prompt
//!
//! - **analyzer**: 命令归一化、错误分类、模式提取
//! - **generator**: 模式 -> 提示（模型措辞，失败时用规则模板）
//! - **store**: 去重、排序、有效度反馈与 JSON 持久化
//!
//! 任务结束后由 [`HintSystem::task_finished`] 更新；任务进行中只读取。

pub mod analyzer;
pub mod generator;
pub mod store;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::core::{Step, TaskHistory, TaskOutcome, TaskStatus};
use crate::llm::LlmClient;

pub use analyzer::{normalize_command, ErrorKind, HintAnalyzer, HintCategory, HintPattern};
pub use generator::HintGenerator;
pub use store::{Hint, HintStats, HintStore};

/// [hints] 段
#[derive(Debug, Clone, Deserialize)]
pub struct HintConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_hints_path")]
    pub path: PathBuf,
    /// 每步注入的提示条数上限
    #[serde(default = "default_max_per_capability")]
    pub max_per_capability: usize,
    /// 参与分析的步骤数下限
    #[serde(default = "default_min_history_steps")]
    pub min_history_steps: usize,
    /// 每完成 N 个任务分析一次
    #[serde(default = "default_analysis_interval")]
    pub analysis_interval: usize,
    /// 分析最近多少个任务的步骤
    #[serde(default = "default_analysis_window")]
    pub analysis_window: usize,
    #[serde(default = "default_min_frequency")]
    pub min_frequency: usize,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// 是否请模型为提示措辞
    #[serde(default)]
    pub model_wording: bool,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_min_effectiveness")]
    pub min_effectiveness: f32,
}

fn default_true() -> bool {
    true
}

fn default_hints_path() -> PathBuf {
    PathBuf::from("workspace/hints.json")
}

fn default_max_per_capability() -> usize {
    3
}

fn default_min_history_steps() -> usize {
    5
}

fn default_analysis_interval() -> usize {
    1
}

fn default_analysis_window() -> usize {
    20
}

fn default_min_frequency() -> usize {
    3
}

fn default_min_confidence() -> f32 {
    0.8
}

fn default_max_age_days() -> i64 {
    30
}

fn default_min_effectiveness() -> f32 {
    0.3
}

impl Default for HintConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_hints_path(),
            max_per_capability: default_max_per_capability(),
            min_history_steps: default_min_history_steps(),
            analysis_interval: default_analysis_interval(),
            analysis_window: default_analysis_window(),
            min_frequency: default_min_frequency(),
            min_confidence: default_min_confidence(),
            model_wording: false,
            max_age_days: default_max_age_days(),
            min_effectiveness: default_min_effectiveness(),
        }
    }
}

/// 学习与检索提示；所有会话共享一个实例
pub struct HintSystem {
    config: HintConfig,
    analyzer: HintAnalyzer,
    generator: HintGenerator,
    store: Arc<HintStore>,
    finished_tasks: AtomicUsize,
}

impl HintSystem {
    pub fn new(config: HintConfig, store: Arc<HintStore>) -> Self {
        Self {
            analyzer: HintAnalyzer::new(config.min_frequency, config.min_confidence),
            generator: HintGenerator::new(),
            config,
            store,
            finished_tasks: AtomicUsize::new(0),
        }
    }

    /// 为提示措辞的模型（仅在 model_wording 开启时生效）
    pub fn with_model(mut self, llm: Arc<dyn LlmClient>) -> Self {
        if self.config.model_wording {
            self.generator = HintGenerator::new().with_model(Some(llm));
        }
        self
    }

    pub fn store(&self) -> &Arc<HintStore> {
        &self.store
    }

    /// 注入某能力 prompt 的提示
    pub fn hints_for(&self, capability: &str) -> Vec<Hint> {
        self.store
            .for_capability(capability, self.config.max_per_capability)
    }

    /// 任务结束：对本任务用到的提示记反馈，按间隔分析最近任务并更新提示；返回新写入的提示数
    ///
    /// history 应已包含本任务的记录；为 None 时只分析本任务的步骤。
    pub async fn task_finished(&self, outcome: &TaskOutcome, history: Option<&TaskHistory>) -> usize {
        let used: Vec<Uuid> = outcome
            .steps
            .iter()
            .flat_map(|s| s.hints.iter().copied())
            .collect();
        let mut dirty = false;
        if !used.is_empty() && outcome.status != TaskStatus::Cancelled {
            self.store
                .record_feedback(&used, outcome.status == TaskStatus::Completed);
            dirty = true;
        }

        let finished = self.finished_tasks.fetch_add(1, Ordering::SeqCst) + 1;
        let mut learned = 0;
        if finished % self.config.analysis_interval.max(1) == 0 {
            let records = history
                .map(|h| h.recent(self.config.analysis_window))
                .unwrap_or_default();
            let mut steps: Vec<&Step> = records.iter().flat_map(|r| r.steps.iter()).collect();
            if records.iter().all(|r| r.id != outcome.task_id) {
                steps.extend(outcome.steps.iter());
            }

            if steps.len() >= self.config.min_history_steps {
                let patterns = self.analyzer.analyze(steps);
                tracing::debug!(patterns = patterns.len(), "execution history analyzed");
                if !patterns.is_empty() {
                    learned = self.store.upsert(self.generator.generate(&patterns).await);
                    dirty = true;
                }
            }
        }

        let removed = self.store.cleanup(
            chrono::Duration::days(self.config.max_age_days.max(1)),
            self.config.min_effectiveness,
        );
        if dirty || removed > 0 {
            if let Err(e) = self.store.save() {
                tracing::warn!(error = %e, "failed to save hints");
            }
        }
        if learned > 0 {
            tracing::info!(learned, total = self.store.len(), "hints updated");
        }
        learned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TaskOutcome, TaskRecord};
    use crate::hints::analyzer::tests::executed;
    use chrono::Utc;

    fn outcome(status: TaskStatus, steps: Vec<Step>) -> TaskOutcome {
        TaskOutcome {
            task_id: Uuid::new_v4(),
            session_id: "s".into(),
            task: "t".into(),
            status,
            iterations: steps.len(),
            success_count: 0,
            failure_count: 0,
            steps,
            last_error: None,
            final_answer: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    fn config() -> HintConfig {
        HintConfig {
            min_history_steps: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_learns_from_recent_history() {
        let system = HintSystem::new(config(), Arc::new(HintStore::in_memory()));
        let history = TaskHistory::in_memory(10);
        for i in 0..2 {
            let steps = (0..4)
                .map(|j| executed("command", &format!("df -h /mnt/d{i}{j}"), 0, ""))
                .collect();
            history
                .append(TaskRecord::from(&outcome(TaskStatus::Completed, steps)))
                .unwrap();
        }
        let last = outcome(TaskStatus::Completed, vec![executed("command", "uptime", 0, "")]);
        history.append(TaskRecord::from(&last)).unwrap();

        let learned = system.task_finished(&last, Some(&history)).await;
        assert_eq!(learned, 1);
        let hints = system.hints_for("command");
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].key, "df -h /PATH");
        assert!(hints[0].prompt_line().starts_with("[success] Reliable: df -h /PATH"));
    }

    #[tokio::test]
    async fn test_short_history_is_not_analyzed() {
        let system = HintSystem::new(config(), Arc::new(HintStore::in_memory()));
        let steps = (0..4).map(|_| executed("command", "ls /x", 0, "")).collect();
        assert_eq!(system.task_finished(&outcome(TaskStatus::Completed, steps), None).await, 0);
        assert!(system.store().is_empty());
    }

    #[tokio::test]
    async fn test_used_hints_get_feedback() {
        let system = HintSystem::new(
            HintConfig {
                min_history_steps: 1000,
                ..Default::default()
            },
            Arc::new(HintStore::in_memory()),
        );
        let generated = HintGenerator::new()
            .generate(&HintAnalyzer::new(1, 0.0).analyze(&[executed("command", "ls /x", 0, "")]))
            .await;
        let id = generated[0].id;
        system.store().upsert(generated);

        let mut step = executed("command", "ls /y", 1, "No such file or directory");
        step.hints = vec![id];
        system
            .task_finished(&outcome(TaskStatus::Failed, vec![step.clone()]), None)
            .await;
        let hint = &system.store().all()[0];
        assert_eq!(hint.usage_count, 1);
        assert!(hint.effectiveness < 0.5);

        system
            .task_finished(&outcome(TaskStatus::Cancelled, vec![step]), None)
            .await;
        assert_eq!(system.store().all()[0].usage_count, 1);
    }

    #[tokio::test]
    async fn test_analysis_interval() {
        let system = HintSystem::new(
            HintConfig {
                analysis_interval: 2,
                min_history_steps: 1,
                min_frequency: 1,
                min_confidence: 0.0,
                ..Default::default()
            },
            Arc::new(HintStore::in_memory()),
        );
        let task = || outcome(TaskStatus::Completed, vec![executed("command", "whoami", 0, "")]);
        assert_eq!(system.task_finished(&task(), None).await, 0);
        assert_eq!(system.task_finished(&task(), None).await, 1);
    }

    #[test]
    fn test_config_defaults() {
        let cfg: HintConfig = toml::from_str("").unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.max_per_capability, 3);
        assert_eq!(cfg.min_frequency, 3);
        assert!(!cfg.model_wording);
    }
}

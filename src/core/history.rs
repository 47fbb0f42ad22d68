//! 任务历史持久化
//!
//! 每个任务结束后追加一条 TaskRecord；单文件 JSON，只保留最近 `max_records` 条。
//! 无路径时仅保存在内存中。多个会话可通过 Arc 共享同一个 TaskHistory。

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{Step, TaskOutcome, TaskStatus};

/// 单个任务的持久化记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub session_id: String,
    pub task: String,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: f64,
    pub iterations: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub summary: String,
}

impl From<&TaskOutcome> for TaskRecord {
    fn from(outcome: &TaskOutcome) -> Self {
        Self {
            id: outcome.task_id,
            session_id: outcome.session_id.clone(),
            task: outcome.task.clone(),
            status: outcome.status,
            start_time: outcome.started_at,
            end_time: outcome.finished_at,
            duration_secs: outcome.duration_secs(),
            iterations: outcome.iterations,
            success_count: outcome.success_count,
            failure_count: outcome.failure_count,
            steps: outcome.steps.clone(),
            last_error: outcome.last_error.clone(),
            summary: outcome.summary(),
        }
    }
}

/// 分页结果（新的在前）
#[derive(Clone, Debug, Serialize)]
pub struct HistoryPage {
    pub tasks: Vec<TaskRecord>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

#[derive(Debug)]
pub struct TaskHistory {
    path: Option<PathBuf>,
    max_records: usize,
    records: Mutex<Vec<TaskRecord>>,
}

impl TaskHistory {
    /// 仅内存
    pub fn in_memory(max_records: usize) -> Self {
        Self {
            path: None,
            max_records: max_records.max(1),
            records: Mutex::new(Vec::new()),
        }
    }

    /// 从 JSON 文件加载；文件不存在时为空
    pub fn open(path: impl AsRef<Path>, max_records: usize) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
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
            max_records: max_records.max(1),
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TaskRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 追加一条记录并落盘；超出上限时丢弃最旧的
    pub fn append(&self, record: TaskRecord) -> anyhow::Result<()> {
        let mut records = self.lock();
        records.push(record);
        let excess = records.len().saturating_sub(self.max_records);
        if excess > 0 {
            records.drain(..excess);
        }
        self.save(&records)
    }

    pub fn get(&self, id: Uuid) -> Option<TaskRecord> {
        self.lock().iter().find(|r| r.id == id).cloned()
    }

    /// page 从 1 开始
    pub fn list(&self, page: usize, per_page: usize) -> HistoryPage {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let mut sorted = self.lock().clone();
        sorted.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        let total = sorted.len();
        let tasks = sorted
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();
        HistoryPage {
            tasks,
            total,
            page,
            per_page,
            total_pages: total.div_ceil(per_page),
        }
    }

    /// 最近 n 条（按追加顺序）
    pub fn recent(&self, n: usize) -> Vec<TaskRecord> {
        let records = self.lock();
        let skip = records.len().saturating_sub(n);
        records[skip..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 删除一条；不存在时返回 false
    pub fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.save(&records)?;
        Ok(true)
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        let mut records = self.lock();
        records.clear();
        self.save(&records)
    }

    fn save(&self, records: &[TaskRecord]) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(path, serde_json::to_string_pretty(records)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(task: &str, minutes_ago: i64) -> TaskRecord {
        let start = Utc::now() - Duration::minutes(minutes_ago);
        TaskRecord {
            id: Uuid::new_v4(),
            session_id: "s1".into(),
            task: task.into(),
            status: TaskStatus::Completed,
            start_time: start,
            end_time: start,
            duration_secs: 0.0,
            iterations: 1,
            success_count: 1,
            failure_count: 0,
            steps: Vec::new(),
            last_error: None,
            summary: String::new(),
        }
    }

    #[test]
    fn test_persists_and_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("history.json");
        let history = TaskHistory::open(&path, 10).unwrap();
        let r = record("list files", 1);
        let id = r.id;
        history.append(r).unwrap();

        let reloaded = TaskHistory::open(&path, 10).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get(id).map(|r| r.task), Some("list files".to_string()));
    }

    #[test]
    fn test_keeps_only_recent_records() {
        let history = TaskHistory::in_memory(3);
        for i in 0..5 {
            history.append(record(&format!("t{i}"), 10 - i)).unwrap();
        }
        let page = history.list(1, 10);
        assert_eq!(page.total, 3);
        assert_eq!(
            page.tasks.iter().map(|r| r.task.as_str()).collect::<Vec<_>>(),
            vec!["t4", "t3", "t2"]
        );
        let recent: Vec<String> = history.recent(2).into_iter().map(|r| r.task).collect();
        assert_eq!(recent, vec!["t3", "t4"]);
    }

    #[test]
    fn test_pagination_and_delete() {
        let history = TaskHistory::in_memory(100);
        let ids: Vec<Uuid> = (0..5)
            .map(|i| {
                let r = record(&format!("t{i}"), 10 - i);
                let id = r.id;
                history.append(r).unwrap();
                id
            })
            .collect();

        let second = history.list(2, 2);
        assert_eq!(second.total_pages, 3);
        assert_eq!(second.tasks[0].task, "t2");

        assert!(history.delete(ids[0]).unwrap());
        assert!(!history.delete(ids[0]).unwrap());
        assert_eq!(history.len(), 4);

        history.clear().unwrap();
        assert!(history.is_empty());
    }
}

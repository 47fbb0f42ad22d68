//! 执行历史分析：从已执行的步骤中提取可复用的模式
//!
//! 命令先归一化（路径、文件名、数字、URL 替换为占位符）再分组统计成功率；
//! 失败步骤按错误类别分组。频次与置信度都达到阈值的分组才产出模式。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::Step;

/// 示例最多保留条数
const MAX_EXAMPLES: usize = 3;
/// 错误示例中 stderr 的最大字符数
const ERROR_EXAMPLE_CHARS: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintCategory {
    /// 稳定成功的命令形式
    Success,
    /// 经常失败的命令形式
    Failure,
    /// 反复出现的错误类别
    Troubleshooting,
}

impl HintCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            HintCategory::Success => "success",
            HintCategory::Failure => "failure",
            HintCategory::Troubleshooting => "troubleshooting",
        }
    }
}

impl std::fmt::Display for HintCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 从 stderr 识别出的错误类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Permission,
    FileNotFound,
    CommandNotFound,
    Syntax,
    Timeout,
    Connection,
    InvalidInput,
    Memory,
}

impl ErrorKind {
    /// 按关键字识别；无法归类时返回 None
    pub fn classify(stderr: &str) -> Option<Self> {
        let text = stderr.to_lowercase();
        let kind = if text.contains("permission denied") || text.contains("operation not permitted") {
            ErrorKind::Permission
        } else if text.contains("no such file") || text.contains("file not found") {
            ErrorKind::FileNotFound
        } else if text.contains("command not found") {
            ErrorKind::CommandNotFound
        } else if text.contains("syntax error") {
            ErrorKind::Syntax
        } else if text.contains("timed out") || text.contains("timeout") {
            ErrorKind::Timeout
        } else if text.contains("connection refused") || text.contains("connection failed") {
            ErrorKind::Connection
        } else if text.contains("invalid") {
            ErrorKind::InvalidInput
        } else if text.contains("out of memory") || text.contains("cannot allocate memory") {
            ErrorKind::Memory
        } else {
            return None;
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Permission => "permission_error",
            ErrorKind::FileNotFound => "file_not_found",
            ErrorKind::CommandNotFound => "command_not_found",
            ErrorKind::Syntax => "syntax_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection_error",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Memory => "memory_error",
        }
    }

    /// 规则建议（模型不可用时的提示正文）
    pub fn advice(&self) -> &'static str {
        match self {
            ErrorKind::Permission => {
                "Check ownership and permissions first; only escalate privileges when the task requires it."
            }
            ErrorKind::FileNotFound => "Confirm the path exists (ls, find) before operating on it.",
            ErrorKind::CommandNotFound => {
                "Check that the program is installed (command -v) or use an available alternative."
            }
            ErrorKind::Syntax => "Quote arguments and simplify the pipeline; check shell syntax.",
            ErrorKind::Timeout => "Narrow the scope of long-running commands or add explicit limits.",
            ErrorKind::Connection => "Check that the service is running and reachable before retrying.",
            ErrorKind::InvalidInput => "Check the program's usage (--help) for valid options.",
            ErrorKind::Memory => "Process the data in smaller chunks or stream it.",
        }
    }
}

/// 一个达到阈值的模式
#[derive(Clone, Debug, PartialEq)]
pub struct HintPattern {
    pub capability: String,
    pub category: HintCategory,
    /// 去重键：归一化命令或错误类别名
    pub key: String,
    pub frequency: usize,
    pub success_rate: f32,
    pub confidence: f32,
    pub examples: Vec<String>,
    pub error_kind: Option<ErrorKind>,
}

fn normalizers() -> &'static [(Regex, &'static str)] {
    static NORMALIZERS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    NORMALIZERS.get_or_init(|| {
        [
            (r"https?://\S+", "URL"),
            (r"~\S*", "~/PATH"),
            (r"/\S*", "/PATH"),
            (r"[A-Za-z0-9_\-]+\.(?:txt|py|md|json|ya?ml|toml|rs|log|csv|sh)\b", "FILE.EXT"),
            (r"\b\d+\b", "NUM"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// 保留命令结构、抹去具体取值；空命令返回 None
pub fn normalize_command(command: &str) -> Option<String> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut normalized = trimmed.to_string();
    for (re, replacement) in normalizers() {
        normalized = re.replace_all(&normalized, *replacement).into_owned();
    }
    Some(normalized.split_whitespace().collect::<Vec<_>>().join(" "))
}

#[derive(Clone, Debug)]
pub struct HintAnalyzer {
    min_frequency: usize,
    min_confidence: f32,
    success_threshold: f32,
}

impl Default for HintAnalyzer {
    fn default() -> Self {
        Self::new(3, 0.8)
    }
}

impl HintAnalyzer {
    pub fn new(min_frequency: usize, min_confidence: f32) -> Self {
        Self {
            min_frequency: min_frequency.max(1),
            min_confidence: min_confidence.clamp(0.0, 1.0),
            success_threshold: 0.8,
        }
    }

    /// 只看实际执行过的步骤；结果按 (能力, 类别, 键) 排序
    pub fn analyze<'a>(&self, steps: impl IntoIterator<Item = &'a Step>) -> Vec<HintPattern> {
        let executed: Vec<&Step> = steps
            .into_iter()
            .filter(|s| s.action.is_some() && s.execution.is_some())
            .collect();

        let mut patterns = self.command_patterns(&executed);
        patterns.extend(self.error_patterns(&executed));
        patterns.retain(|p| p.frequency >= self.min_frequency && p.confidence >= self.min_confidence);
        patterns.sort_by(|a, b| {
            (a.capability.as_str(), a.category, a.key.as_str())
                .cmp(&(b.capability.as_str(), b.category, b.key.as_str()))
        });
        patterns
    }

    fn command_patterns(&self, steps: &[&Step]) -> Vec<HintPattern> {
        let mut groups: BTreeMap<(String, String), Vec<&Step>> = BTreeMap::new();
        for step in steps {
            let Some(key) = step.action.as_deref().and_then(normalize_command) else {
                continue;
            };
            groups
                .entry((step.capability.to_lowercase(), key))
                .or_default()
                .push(step);
        }

        groups
            .into_iter()
            .map(|((capability, key), group)| {
                let ok = group.iter().filter(|s| s.outcome.is_success()).count();
                let success_rate = ok as f32 / group.len() as f32;
                let category = if success_rate >= self.success_threshold {
                    HintCategory::Success
                } else {
                    HintCategory::Failure
                };
                HintPattern {
                    capability,
                    category,
                    key,
                    frequency: group.len(),
                    success_rate,
                    confidence: (group.len() as f32 / 10.0).min(1.0),
                    examples: distinct(group.iter().filter_map(|s| s.action.clone())),
                    error_kind: None,
                }
            })
            .collect()
    }

    fn error_patterns(&self, steps: &[&Step]) -> Vec<HintPattern> {
        let mut groups: BTreeMap<(String, ErrorKind), Vec<(&Step, String)>> = BTreeMap::new();
        for step in steps.iter().filter(|s| s.outcome.is_failure()) {
            let stderr = step
                .execution
                .as_ref()
                .map(|e| e.stderr.trim().to_string())
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| step.outcome.describe());
            if let Some(kind) = ErrorKind::classify(&stderr) {
                groups
                    .entry((step.capability.to_lowercase(), kind))
                    .or_default()
                    .push((step, stderr));
            }
        }

        groups
            .into_iter()
            .map(|((capability, kind), group)| HintPattern {
                capability,
                category: HintCategory::Troubleshooting,
                key: kind.as_str().to_string(),
                frequency: group.len(),
                success_rate: 0.0,
                confidence: (group.len() as f32 / 5.0).min(1.0),
                examples: distinct(group.iter().map(|(step, stderr)| {
                    let first = stderr.lines().next().unwrap_or_default();
                    format!(
                        "{} ({})",
                        step.action.as_deref().unwrap_or_default(),
                        crate::executor::result::truncate_chars(first, ERROR_EXAMPLE_CHARS)
                    )
                })),
                error_kind: Some(kind),
            })
            .collect()
    }
}

fn distinct(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
        if out.len() == MAX_EXAMPLES {
            break;
        }
    }
    out
}

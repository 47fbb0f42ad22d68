//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ASK_SHELL__*` 覆盖（双下划线表示嵌套，如 `ASK_SHELL__AGENT__MAX_RETRIES=5`）。
//! 所有字段都有默认值，空配置即可运行。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::hints::HintConfig;
use crate::llm::RetryConfig;
use crate::memory::MemoryConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub memory: MemoryConfig,
    pub safety: SafetySection,
    pub executor: ExecutorSection,
    pub capabilities: CapabilitiesSection,
    pub history: HistorySection,
    pub hints: HintConfig,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 命令执行的默认工作目录，未设置时用当前目录
    pub working_dir: Option<PathBuf>,
    /// 可选：覆盖内置 prompt 的目录（command.md / direct.md）
    pub system_prompt_dir: Option<PathBuf>,
}

/// [llm] 段：后端选择与重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai / deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub retry: LlmRetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            retry: LlmRetrySection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// [llm.retry] 段：模型不可达时的指数退避
#[derive(Debug, Clone, Deserialize)]
pub struct LlmRetrySection {
    #[serde(default = "default_llm_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_llm_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl LlmRetrySection {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
        }
    }
}

fn default_llm_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    4000
}

/// [agent] 段：循环上限与审批
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// 单步最多执行次数（含首次）
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default)]
    pub auto_approve: bool,
    /// 能力未声明完成时是否询问模型
    #[serde(default = "default_true")]
    pub completion_check: bool,
    /// Planning 阶段带入的记忆条数
    #[serde(default = "default_context_entries")]
    pub context_entries: usize,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_retries: default_max_retries(),
            auto_approve: false,
            completion_check: true,
            context_entries: default_context_entries(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

fn default_max_iterations() -> usize {
    10
}

fn default_max_retries() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_context_entries() -> usize {
    5
}

fn default_command_timeout_secs() -> u64 {
    60
}

/// [safety] 段
#[derive(Debug, Clone, Deserialize)]
pub struct SafetySection {
    /// 模式层通过后是否请模型评估风险
    #[serde(default = "default_true")]
    pub model_check: bool,
    /// 追加的拦截正则；内置模式不可移除
    #[serde(default)]
    pub extra_patterns: Vec<String>,
}

impl Default for SafetySection {
    fn default() -> Self {
        Self {
            model_check: true,
            extra_patterns: Vec::new(),
        }
    }
}

/// [executor] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_output_chars: default_max_output_chars(),
            shell: default_shell(),
        }
    }
}

fn default_max_output_chars() -> usize {
    4000
}

fn default_shell() -> String {
    "sh".to_string()
}

/// [capabilities] 段：能力描述目录与选择阈值
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilitiesSection {
    #[serde(default = "default_capabilities_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_capability")]
    pub default: String,
}

impl Default for CapabilitiesSection {
    fn default() -> Self {
        Self {
            dir: default_capabilities_dir(),
            min_confidence: default_min_confidence(),
            default: default_capability(),
        }
    }
}

fn default_capabilities_dir() -> PathBuf {
    PathBuf::from("config/capabilities")
}

fn default_min_confidence() -> f32 {
    0.5
}

fn default_capability() -> String {
    "command".to_string()
}

/// [history] 段：任务历史持久化
#[derive(Debug, Clone, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_history_path(),
            max_records: default_max_records(),
        }
    }
}

fn default_history_path() -> PathBuf {
    PathBuf::from("workspace/task_history.json")
}

fn default_max_records() -> usize {
    100
}

/// 从 config 目录加载配置，环境变量 ASK_SHELL__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ASK_SHELL__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ASK_SHELL")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("safety.extra_patterns"),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_has_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.agent.max_iterations, 10);
        assert_eq!(cfg.agent.max_retries, 3);
        assert!(!cfg.agent.auto_approve);
        assert_eq!(cfg.memory.max_entries, 20);
        assert_eq!(cfg.capabilities.default, "command");
        assert_eq!(cfg.history.max_records, 100);
        assert_eq!(cfg.llm.retry.max_attempts, 3);
        assert!(cfg.hints.enabled);
        assert!(!cfg.memory.model_summaries);
    }

    #[test]
    fn test_partial_sections_override() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [agent]
            max_retries = 5
            auto_approve = true

            [safety]
            extra_patterns = ["\\bgit\\s+clean\\s+-fdx\\b"]

            [hints]
            enabled = false
            max_per_capability = 1
            "#,
        )
        .unwrap();
        assert_eq!(cfg.agent.max_retries, 5);
        assert!(cfg.agent.auto_approve);
        assert_eq!(cfg.agent.max_iterations, 10);
        assert_eq!(cfg.safety.extra_patterns.len(), 1);
        assert!(!cfg.hints.enabled);
        assert_eq!(cfg.hints.max_per_capability, 1);
        assert_eq!(cfg.hints.min_frequency, 3);
    }

    #[test]
    fn test_retry_section_conversion() {
        let r = LlmRetrySection {
            max_attempts: 0,
            base_delay_ms: 500,
            max_delay_ms: 100,
        }
        .to_retry_config();
        assert_eq!(r.max_attempts, 1);
        assert_eq!(r.max_delay, Duration::from_millis(500));
    }
}

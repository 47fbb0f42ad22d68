//! Agent 构建器：统一的 Agent 初始化逻辑
//!
//! 从 AppConfig 构建 LLM、能力注册表、选择器、安全闸门、执行器、完成判定、任务历史与提示系统。
//! 注册表在此构建完成后冻结为 Arc，所有会话共享。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::config::AppConfig;
use crate::core::TaskHistory;
use crate::executor::{CommandRunner, ShellExecutor};
use crate::hints::{HintStore, HintSystem};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::memory::{MemoryConfig, SummaryWriter};
use crate::react::{AgentLoop, CompletionChecker};
use crate::safety::SafetyGate;
use crate::skills::{
    Capability, CapabilityLoader, CapabilityRegistry, CapabilitySelector, CommandCapability,
    DirectAnswerCapability,
};

/// 构建完成、可在会话间共享的组件
#[derive(Clone)]
pub struct AgentComponents {
    pub config: AppConfig,
    pub llm: Arc<dyn LlmClient>,
    pub registry: Arc<CapabilityRegistry>,
    pub agent_loop: Arc<AgentLoop>,
    pub history: Option<Arc<TaskHistory>>,
    /// 任务结束后由 process_task 更新
    pub hints: Option<Arc<HintSystem>>,
    /// 已校验的记忆配置，每个会话据此创建自己的 MemoryBank
    pub memory: MemoryConfig,
}

impl AgentComponents {
    /// 命令的默认工作目录：配置值或当前目录
    pub fn working_dir(&self) -> PathBuf {
        self.config
            .app
            .working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

pub struct AgentBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    runner: Option<Arc<dyn CommandRunner>>,
    capabilities: Vec<Arc<dyn Capability>>,
    builtin_capabilities: bool,
    history: Option<Arc<TaskHistory>>,
    hint_store: Option<Arc<HintStore>>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            runner: None,
            capabilities: Vec::new(),
            builtin_capabilities: true,
            history: None,
            hint_store: None,
        }
    }

    /// 替换按配置创建的 LLM 客户端
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 替换 Shell 执行器
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// 额外注册一个能力（同名时覆盖配置目录中的能力）
    pub fn with_capability(mut self, capability: Arc<dyn Capability>) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// 是否注册内置 command / direct_llm 与配置目录中的能力
    pub fn with_builtin_capabilities(mut self, enable: bool) -> Self {
        self.builtin_capabilities = enable;
        self
    }

    /// 使用给定的任务历史，不再按配置打开文件
    pub fn with_history(mut self, history: Arc<TaskHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// 使用给定的提示存储，不再按配置打开文件（仍受 hints.enabled 控制）
    pub fn with_hint_store(mut self, store: Arc<HintStore>) -> Self {
        self.hint_store = Some(store);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 校验记忆配置；非法时退回默认值
    pub fn memory_config(&self) -> MemoryConfig {
        match self.config.memory.validate() {
            Ok(()) => self.config.memory.clone(),
            Err(e) => {
                tracing::warn!(error = %e, "invalid [memory] config, using defaults");
                MemoryConfig::default()
            }
        }
    }

    /// 构建能力注册表：内置能力、配置目录中的能力、额外能力
    pub fn build_registry(&self, llm: &Arc<dyn LlmClient>) -> anyhow::Result<CapabilityRegistry> {
        let mut registry = CapabilityRegistry::new();

        if self.builtin_capabilities {
            let prompt_dir = self.config.app.system_prompt_dir.as_deref();
            registry.register(Arc::new(
                CommandCapability::new(Arc::clone(llm))
                    .with_prompt(read_prompt(prompt_dir, "command.md").unwrap_or_default()),
            ));
            registry.register(Arc::new(
                DirectAnswerCapability::new(Arc::clone(llm))
                    .with_prompt(read_prompt(prompt_dir, "direct.md").unwrap_or_default()),
            ));

            let loader = CapabilityLoader::resolve(&self.config.capabilities.dir);
            for capability in loader
                .load_all(llm)
                .with_context(|| format!("loading capabilities from {}", loader.dir().display()))?
            {
                registry.register(capability);
            }
        }
        for capability in &self.capabilities {
            registry.register(Arc::clone(capability));
        }

        let default = &self.config.capabilities.default;
        if !registry.set_default(default) {
            tracing::warn!(capability = %default, "default capability not registered");
            if !registry.set_default(&CommandCapability::default_descriptor().name) {
                if let Some(first) = registry.names().first().cloned() {
                    registry.set_default(&first);
                }
            }
        }
        tracing::info!(capabilities = ?registry.names(), "capability registry ready");
        Ok(registry)
    }

    pub fn build_gate(&self, llm: &Arc<dyn LlmClient>) -> anyhow::Result<SafetyGate> {
        let gate = SafetyGate::new(&self.config.safety.extra_patterns)
            .context("building safety gate")?;
        Ok(if self.config.safety.model_check {
            gate.with_model(Arc::clone(llm))
        } else {
            gate
        })
    }

    fn build_history(&self) -> Option<Arc<TaskHistory>> {
        if let Some(history) = &self.history {
            return Some(Arc::clone(history));
        }
        let cfg = &self.config.history;
        if !cfg.enabled {
            return None;
        }
        match TaskHistory::open(&cfg.path, cfg.max_records) {
            Ok(history) => Some(Arc::new(history)),
            Err(e) => {
                tracing::warn!(error = %e, "could not load task history, keeping it in memory");
                Some(Arc::new(TaskHistory::in_memory(cfg.max_records)))
            }
        }
    }

    fn build_hints(&self, llm: &Arc<dyn LlmClient>) -> Option<Arc<HintSystem>> {
        let cfg = &self.config.hints;
        if !cfg.enabled {
            return None;
        }
        let store = match &self.hint_store {
            Some(store) => Arc::clone(store),
            None => match HintStore::open(&cfg.path) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(error = %e, "could not load hints, keeping them in memory");
                    Arc::new(HintStore::in_memory())
                }
            },
        };
        Some(Arc::new(
            HintSystem::new(cfg.clone(), store).with_model(Arc::clone(llm)),
        ))
    }

    pub fn build(self) -> anyhow::Result<AgentComponents> {
        let llm = self
            .llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config));
        let registry = Arc::new(self.build_registry(&llm)?);
        let selector = Arc::new(
            CapabilitySelector::new(Arc::clone(&registry), Arc::clone(&llm))
                .with_min_confidence(self.config.capabilities.min_confidence),
        );
        let gate = Arc::new(self.build_gate(&llm)?);
        let runner = self.runner.clone().unwrap_or_else(|| {
            Arc::new(ShellExecutor::new(
                self.config.executor.shell.clone(),
                self.config.executor.max_output_chars,
            ))
        });
        let completion = self
            .config
            .agent
            .completion_check
            .then(|| Arc::new(CompletionChecker::new(Arc::clone(&llm))));
        let memory = self.memory_config();
        let summarizer = memory
            .model_summaries
            .then(|| Arc::new(SummaryWriter::new(Arc::clone(&llm))));
        let hints = self.build_hints(&llm);
        let agent_loop = Arc::new(
            AgentLoop::new(selector, gate, runner)
                .with_completion_checker(completion)
                .with_hints(hints.clone())
                .with_summarizer(summarizer)
                .with_context_entries(self.config.agent.context_entries),
        );

        Ok(AgentComponents {
            memory,
            hints,
            history: self.build_history(),
            llm,
            registry,
            agent_loop,
            config: self.config,
        })
    }
}

fn read_prompt(dir: Option<&Path>, file: &str) -> Option<String> {
    let path = dir?.join(file);
    std::fs::read_to_string(&path)
        .map_err(|e| tracing::debug!(path = %path.display(), error = %e, "no prompt override"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.capabilities.dir = PathBuf::from("/definitely/not/here");
        cfg.history.enabled = false;
        cfg.hints.enabled = false;
        cfg
    }

    #[test]
    fn test_builds_with_builtins() {
        let components = AgentBuilder::new(config())
            .with_llm(Arc::new(MockLlmClient::default()))
            .build()
            .unwrap();
        assert_eq!(components.registry.names(), vec!["command", "direct_llm"]);
        assert_eq!(
            components
                .registry
                .default_capability()
                .map(|c| c.descriptor().name.clone()),
            Some("command".to_string())
        );
        assert!(components.history.is_none());
        assert!(components.hints.is_none());
    }

    #[test]
    fn test_hints_use_given_store() {
        let mut cfg = config();
        cfg.hints.enabled = true;
        let store = Arc::new(HintStore::in_memory());
        let components = AgentBuilder::new(cfg)
            .with_llm(Arc::new(MockLlmClient::default()))
            .with_hint_store(Arc::clone(&store))
            .build()
            .unwrap();
        let hints = components.hints.expect("hints enabled");
        assert!(Arc::ptr_eq(hints.store(), &store));
    }

    #[test]
    fn test_unknown_default_falls_back_to_command() {
        let mut cfg = config();
        cfg.capabilities.default = "browser".into();
        let builder = AgentBuilder::new(cfg);
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::default());
        let registry = builder.build_registry(&llm).unwrap();
        assert_eq!(
            registry.default_capability().map(|c| c.descriptor().name.clone()),
            Some("command".to_string())
        );
    }

    #[test]
    fn test_invalid_memory_config_uses_defaults() {
        let mut cfg = config();
        cfg.memory.retain_recent = 50;
        let builder = AgentBuilder::new(cfg);
        assert_eq!(builder.memory_config().retain_recent, MemoryConfig::default().retain_recent);
    }

    #[test]
    fn test_bad_extra_pattern_is_an_error() {
        let mut cfg = config();
        cfg.safety.extra_patterns = vec!["(unclosed".into()];
        let result = AgentBuilder::new(cfg)
            .with_llm(Arc::new(MockLlmClient::default()))
            .build();
        assert!(result.is_err());
    }
}

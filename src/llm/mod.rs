//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、退避重试、结构化输出解析

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod structured;
pub mod traits;

use std::sync::Arc;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use structured::{extract_json_object, parse_reply, schema_json};
pub use traits::{LlmClient, LlmError, RetryConfig, RetryingLlmClient};

use crate::config::AppConfig;

/// 根据配置与环境变量选择 LLM 后端，并包上退避重试
///
/// provider=mock 或找不到任何 API Key 时退回 Mock（直接回答“未配置模型”）。
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let deepseek_key = std::env::var("DEEPSEEK_API_KEY").ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();

    let inner: Arc<dyn LlmClient> = match (provider.as_str(), deepseek_key, openai_key) {
        ("mock", _, _) => {
            tracing::info!("Using Mock LLM (configured)");
            Arc::new(MockLlmClient::default())
        }
        ("deepseek", Some(key), _) | ("deepseek", None, Some(key)) => {
            let client = create_deepseek_client(Some(&cfg.llm.model), &key);
            tracing::info!("Using DeepSeek LLM ({})", client.model());
            Arc::new(client)
        }
        (_, _, Some(key)) => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, &key))
        }
        (_, Some(key), None) => {
            let client = create_deepseek_client(Some(&cfg.llm.model), &key);
            tracing::info!("Only DEEPSEEK_API_KEY set, using DeepSeek LLM ({})", client.model());
            Arc::new(client)
        }
        _ => {
            tracing::warn!("No API key set, using Mock LLM");
            Arc::new(MockLlmClient::default())
        }
    };

    Arc::new(RetryingLlmClient::new(inner, cfg.llm.retry.to_retry_config()))
}

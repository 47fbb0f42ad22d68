//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient::complete。
//! RetryingLlmClient 为任意后端加上指数退避重试：不可达或限流时重试有限次，耗尽后返回 Unavailable（model-unavailable）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// 语言模型调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// 网络不可达、服务 5xx、重试耗尽
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// 请求本身有误（构造失败、参数非法），重试无意义
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// 结构化输出无法解析
    #[error("malformed model output: {0}")]
    Malformed(String),
}

impl LlmError {
    fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Unavailable(_) | LlmError::RateLimited { .. })
    }
}

/// LLM 客户端 trait：单次请求/响应
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 退避重试配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次失败后的等待时间（attempt 从 1 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// 带退避重试的客户端包装
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.complete(messages).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let mut delay = self.config.delay_for(attempt);
                    if let LlmError::RateLimited { retry_after_ms } = &e {
                        delay = delay.max(Duration::from_millis(*retry_after_ms)).min(self.config.max_delay);
                    }
                    tracing::warn!(attempt, max_attempts, error = %e, delay_ms = delay.as_millis() as u64, "LLM call failed, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    tracing::error!(attempts = attempt, error = %e, "LLM retries exhausted");
                    return Err(LlmError::Unavailable(format!(
                        "{e} (after {attempt} attempts)"
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

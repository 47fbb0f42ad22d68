//! DeepSeek API（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat (常规对话), deepseek-reasoner (思考模式)

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// 创建 DeepSeek 客户端；未指定模型或模型名不属于 DeepSeek 时用 deepseek-chat
pub fn create_deepseek_client(model: Option<&str>, api_key: &str) -> OpenAiClient {
    let model = match model {
        Some(m) if m.starts_with("deepseek") => m.to_string(),
        _ => std::env::var("DEEPSEEK_MODEL").unwrap_or_else(|_| DEEPSEEK_CHAT.to_string()),
    };
    OpenAiClient::new(Some(DEEPSEEK_BASE_URL), &model, api_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_selection() {
        let c = create_deepseek_client(Some(DEEPSEEK_REASONER), "sk-test");
        assert_eq!(c.model(), DEEPSEEK_REASONER);
        let c = create_deepseek_client(Some("gpt-4o-mini"), "sk-test");
        assert!(c.model().starts_with("deepseek"));
    }
}

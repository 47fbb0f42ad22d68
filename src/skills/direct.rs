//! 内置能力 `direct_llm`：不执行命令，直接由模型回答或处理文本

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{parse_reply, LlmClient};
use crate::memory::Message;
use crate::react::StepContext;
use crate::skills::{
    Capability, CapabilityDescriptor, CapabilityError, CapabilityOptions, CapabilityResponse,
};

const DIRECT_PROMPT: &str = "You are a helpful assistant answering directly. \
Use the task and the outputs of earlier steps to answer, summarize, translate or explain. \
Never propose shell commands. \
Reply with a JSON object: {\"thinking\": \"...\", \"direct_response\": \"the answer for the user\"}";

pub struct DirectAnswerCapability {
    descriptor: CapabilityDescriptor,
    llm: Arc<dyn LlmClient>,
    extra_prompt: Option<String>,
}

impl DirectAnswerCapability {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            descriptor: Self::default_descriptor(),
            llm,
            extra_prompt: None,
        }
    }

    pub fn default_descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new(
            "direct_llm",
            "Answers questions and processes text (summaries, translation, explanation of earlier output) \
             directly with the language model, without running any command.",
        )
        .with_tags(["answer", "text", "summarize", "translate", "explain"])
    }

    pub fn with_descriptor(mut self, descriptor: CapabilityDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.extra_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        self
    }
}

#[async_trait]
impl Capability for DirectAnswerCapability {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        _task: &str,
        context: &StepContext,
        _options: &CapabilityOptions,
    ) -> Result<CapabilityResponse, CapabilityError> {
        let mut system = DIRECT_PROMPT.to_string();
        if let Some(extra) = &self.extra_prompt {
            system.push_str("\n\n## Additional instructions\n");
            system.push_str(extra);
        }
        let messages = [Message::system(system), Message::user(context.to_prompt_section())];
        let reply = self.llm.complete(&messages).await?;

        // 结构化解析失败时整条回复作为纯文本回答（回答里常有 awk、JSON 示例等花括号）
        let mut response = match parse_reply::<CapabilityResponse>(&reply) {
            Ok(response) => response.normalized(),
            Err(e) => {
                tracing::debug!(error = %e, "direct reply is not structured, using it as text");
                CapabilityResponse::answer(reply.trim()).normalized()
            }
        };
        if response.direct_answer.is_none() {
            return Err(CapabilityError::Malformed("reply has no direct_response".into()));
        }
        // 直接回答从不携带命令
        response.action = None;
        response.done = true;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use std::path::PathBuf;

    async fn run(reply: &str) -> Result<CapabilityResponse, CapabilityError> {
        let cap = DirectAnswerCapability::new(Arc::new(MockLlmClient::new(reply)));
        let ctx = StepContext::new("what is 2+2", PathBuf::from("."));
        cap.execute("what is 2+2", &ctx, &CapabilityOptions::default()).await
    }

    #[tokio::test]
    async fn test_json_answer() {
        let r = run(r#"{"thinking": "math", "direct_response": "4"}"#).await.unwrap();
        assert_eq!(r.direct_answer.as_deref(), Some("4"));
        assert!(r.done);
    }

    #[tokio::test]
    async fn test_plain_text_answer() {
        let r = run("  The answer is 4.  ").await.unwrap();
        assert_eq!(r.direct_answer.as_deref(), Some("The answer is 4."));
    }

    #[tokio::test]
    async fn test_plain_text_with_braces_is_an_answer() {
        let reply = "Use awk '{print $1}' access.log | sort | uniq -c to count the hosts.";
        let r = run(reply).await.unwrap();
        assert_eq!(r.direct_answer.as_deref(), Some(reply));
        assert!(r.done);
    }

    #[tokio::test]
    async fn test_answer_containing_json_example() {
        let reply = r#"A config looks like {"name": "demo", "port": 8080 and so on."#;
        let r = run(reply).await.unwrap();
        assert_eq!(r.direct_answer.as_deref(), Some(reply));
    }

    #[tokio::test]
    async fn test_empty_reply_is_malformed() {
        assert!(matches!(run("   ").await, Err(CapabilityError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_commands_are_stripped() {
        let r = run(r#"{"command": "rm x", "direct_response": "done"}"#).await.unwrap();
        assert!(r.action.is_none());
    }

    #[tokio::test]
    async fn test_json_without_answer_is_malformed() {
        assert!(matches!(
            run(r#"{"thinking": "hmm"}"#).await,
            Err(CapabilityError::Malformed(_))
        ));
    }
}

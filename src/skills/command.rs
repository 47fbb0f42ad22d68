//! 内置能力 `command`：每步生成一条 shell 命令
//!
//! 无状态：本任务内自己的历史回复由循环保存，经 `StepContext::transcript` 传入。

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{parse_reply, schema_json, LlmClient};
use crate::memory::Message;
use crate::react::StepContext;
use crate::skills::{
    Capability, CapabilityDescriptor, CapabilityError, CapabilityOptions, CapabilityResponse,
};

const COMMAND_PROMPT: &str = "You are a shell command generator. \
The user describes a task; produce exactly ONE shell command that moves the task forward, \
then you will see its output in the next step.

Rules:
1. One command per step; never chain unrelated work.
2. The command must run as-is in a POSIX shell inside the working directory.
3. If the previous command failed, explain why in `error_analysis` and try a different approach.
4. Set `is_dangerous` to true (with `danger_reason`) for deletions, permission changes, sudo, writes under /etc, \
overwriting redirections, bulk operations and anything irreversible.
5. When the task is already accomplished by the output you have seen, leave `command` empty, \
put the final answer for the user in `direct_response` and set `is_complete` to true.
6. Set `is_complete` to true together with a command only when that command alone finishes the task.
7. If the remaining work is pure text processing (summarize, translate, explain), leave `command` empty.";

pub struct CommandCapability {
    descriptor: CapabilityDescriptor,
    llm: Arc<dyn LlmClient>,
    extra_prompt: Option<String>,
}

impl CommandCapability {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            descriptor: Self::default_descriptor(),
            llm,
            extra_prompt: None,
        }
    }

    pub fn default_descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new(
            "command",
            "Generates and runs one shell command per step to inspect or change the local system: \
             files, directories, processes, git, packages, network checks.",
        )
        .with_tags(["shell", "files", "system", "git"])
    }

    pub fn with_descriptor(mut self, descriptor: CapabilityDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// 追加到系统 prompt 末尾的专用说明
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.extra_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        self
    }

    fn system_prompt(&self) -> String {
        let mut s = format!(
            "{COMMAND_PROMPT}\n\nReply with a single JSON object matching this schema:\n{}",
            schema_json::<CapabilityResponse>()
        );
        if let Some(extra) = &self.extra_prompt {
            s.push_str("\n\n## Additional instructions\n");
            s.push_str(extra);
        }
        s
    }

}

#[async_trait]
impl Capability for CommandCapability {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        _task: &str,
        context: &StepContext,
        options: &CapabilityOptions,
    ) -> Result<CapabilityResponse, CapabilityError> {
        let mut messages = vec![Message::system(self.system_prompt())];
        messages.extend(context.transcript.iter().cloned());
        messages.push(Message::user(format!(
            "{}\nThis is step {} (attempt {}). Reply with JSON only.",
            context.to_prompt_section(),
            options.step,
            options.attempt
        )));

        let reply = self.llm.complete(&messages).await?;
        tracing::debug!(capability = %self.descriptor.name, reply = %reply, "capability reply");
        Ok(parse_reply::<CapabilityResponse>(&reply)?.normalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient};
    use crate::react::Transcript;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// 记录每次调用的完整 prompt
    struct RecordingLlm {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingLlm {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for RecordingLlm {
        async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
            let prompt = messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            self.prompts.lock().unwrap().push(prompt);
            Ok(self.reply.clone())
        }
    }

    fn ctx() -> StepContext {
        StepContext::new("list files", PathBuf::from(".")).at_step(1, 1)
    }

    fn opts() -> CapabilityOptions {
        CapabilityOptions {
            working_dir: PathBuf::from("."),
            step: 1,
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_parses_command_reply() {
        let llm = Arc::new(MockLlmClient::new(
            "```json\n{\"thinking\": \"look\", \"command\": \" ls -la \", \"explanation\": \"list\", \"is_dangerous\": false}\n```",
        ));
        let cap = CommandCapability::new(llm);
        let r = cap.execute("list files", &ctx(), &opts()).await.unwrap();
        assert_eq!(r.action.as_deref(), Some("ls -la"));
        assert_eq!(r.thinking, "look");
        assert!(!r.done);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_error() {
        let cap = CommandCapability::new(Arc::new(MockLlmClient::new("just run ls")));
        let err = cap.execute("x", &ctx(), &opts()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_transcript_comes_from_context_only() {
        let llm = Arc::new(RecordingLlm::new(r#"{"command": "pwd"}"#));
        let cap = CommandCapability::new(llm.clone());

        let mut task_a = Transcript::new();
        task_a.record("command", 1, r#"{"command": "cat /home/alice/secret"}"#);
        let ctx_a = ctx().with_transcript(task_a.for_capability("command"));
        cap.execute("task a", &ctx_a, &opts()).await.unwrap();
        cap.execute("task b", &ctx(), &opts()).await.unwrap();

        let prompts = llm.prompts();
        assert!(prompts[0].contains("/home/alice/secret"));
        assert!(!prompts[1].contains("/home/alice/secret"));
    }

    #[tokio::test]
    async fn test_fenced_block_inside_final_answer() {
        let reply = "{\"thinking\": \"done\", \"command\": \"\", \"direct_response\": \"Run:\\n```bash\\nls\\n```\", \"is_complete\": true}";
        let cap = CommandCapability::new(Arc::new(MockLlmClient::new(reply)));
        let r = cap.execute("x", &ctx(), &opts()).await.unwrap();
        assert_eq!(r.action, None);
        assert!(r.done);
        assert_eq!(r.direct_answer.as_deref(), Some("Run:\n```bash\nls\n```"));
    }

    #[test]
    fn test_prompt_contains_schema_and_extra() {
        let cap = CommandCapability::new(Arc::new(MockLlmClient::default())).with_prompt("Prefer git commands.");
        let prompt = cap.system_prompt();
        assert!(prompt.starts_with("You are a shell command generator"));
        assert!(prompt.contains("error_analysis"));
        assert!(prompt.contains("Prefer git commands."));
    }
}

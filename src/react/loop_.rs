//! Agent 主循环
//!
//! Planning -> Selecting -> Executing -> Observing -> Deciding，终止于 Completed / Failed / Cancelled / MaxIterationsReached。
//! 单任务内一次只有一个步骤在进行；只在模型调用与命令执行处挂起。
//! 取消是协作式的：每次状态转换前检查，已开始的外部调用允许完成，当前步骤定稿后结束任务。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AgentSection;
use crate::core::{
    AgentError, LoopState, RecoveryAction, RecoveryEngine, Step, StepOutcome, TaskOutcome,
    TaskStatus,
};
use crate::executor::result::truncate_chars;
use crate::executor::{CommandRunner, ExecStatus};
use crate::hints::{Hint, HintSystem};
use crate::llm::LlmError;
use crate::memory::{MemoryBank, MemoryEntry, SummaryWriter, WorkingMemory};
use crate::react::{CompletionChecker, EventKind, EventSink, StepContext, Transcript};
use crate::safety::{
    ConfirmationHandler, ConfirmationRequest, RiskHint, SafetyGate, SafetyVerdict, UserDecision,
};
use crate::skills::{CapabilityError, CapabilityOptions, CapabilityResponse, CapabilitySelector};

/// 事件与记忆中思考内容的最大字符数
const THINKING_CHARS: usize = 400;
/// 记忆条目中结果的最大字符数
const RESULT_CHARS: usize = 1000;
/// 事件中输出预览的最大字符数
const OUTPUT_PREVIEW_CHARS: usize = 2000;
/// 选择失败时步骤记录的能力名
const SELECTOR_NAME: &str = "selector";

/// 单次任务的运行参数
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub working_dir: PathBuf,
    /// warn 视为 allow（警告仍记录）；block 不受影响
    pub auto_approve: bool,
    pub max_iterations: usize,
    /// 单步总尝试次数上限
    pub max_retries: usize,
    pub command_timeout: Duration,
}

impl RunOptions {
    pub fn from_config(agent: &AgentSection, working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            auto_approve: agent.auto_approve,
            max_iterations: agent.max_iterations,
            max_retries: agent.max_retries.max(1),
            command_timeout: Duration::from_secs(agent.command_timeout_secs.max(1)),
        }
    }

    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&AgentSection::default(), PathBuf::from("."))
    }
}

/// 会话提供给单次运行的可变状态与出口
pub struct LoopSession<'a> {
    pub memory: &'a mut MemoryBank,
    pub events: &'a EventSink,
    pub confirm: &'a dyn ConfirmationHandler,
    pub cancel_token: CancellationToken,
}

impl<'a> LoopSession<'a> {
    pub fn new(
        memory: &'a mut MemoryBank,
        events: &'a EventSink,
        confirm: &'a dyn ConfirmationHandler,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            memory,
            events,
            confirm,
            cancel_token,
        }
    }

    fn cancelled(&self, state: LoopState) -> bool {
        let cancelled = self.cancel_token.is_cancelled();
        if cancelled {
            tracing::info!(state = %state, "cancellation observed");
        }
        cancelled
    }
}

/// 单个步骤（一次尝试）的产出
struct StepRun {
    step: Step,
    error: Option<AgentError>,
    /// 用户选择 abort-task
    abort_task: bool,
    /// 能力给出的合法响应（写入任务内对话记录）
    reply: Option<String>,
}

/// 一个规划周期的结束方式
enum Cycle {
    Next,
    Completed,
    Failed,
    Cancelled,
}

/// 运行中的计数与历史
struct Progress {
    steps: Vec<Step>,
    success_count: usize,
    failure_count: usize,
    last_error: Option<String>,
    final_answer: Option<String>,
    working: WorkingMemory,
    transcript: Transcript,
}

pub struct AgentLoop {
    selector: Arc<CapabilitySelector>,
    gate: Arc<SafetyGate>,
    runner: Arc<dyn CommandRunner>,
    completion: Option<Arc<CompletionChecker>>,
    hints: Option<Arc<HintSystem>>,
    summarizer: Option<Arc<SummaryWriter>>,
    recovery: RecoveryEngine,
    context_entries: usize,
}

impl AgentLoop {
    pub fn new(
        selector: Arc<CapabilitySelector>,
        gate: Arc<SafetyGate>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            selector,
            gate,
            runner,
            completion: None,
            hints: None,
            summarizer: None,
            recovery: RecoveryEngine::new(),
            context_entries: 5,
        }
    }

    /// 能力未声明 done 时使用的完成判定
    pub fn with_completion_checker(mut self, checker: Option<Arc<CompletionChecker>>) -> Self {
        self.completion = checker;
        self
    }

    /// 选定能力后注入其 prompt 的提示来源
    pub fn with_hints(mut self, hints: Option<Arc<HintSystem>>) -> Self {
        self.hints = hints;
        self
    }

    /// 记忆压缩后为摘要补写模型概要
    pub fn with_summarizer(mut self, summarizer: Option<Arc<SummaryWriter>>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Planning 阶段带入的最近记忆条数
    pub fn with_context_entries(mut self, n: usize) -> Self {
        self.context_entries = n.max(1);
        self
    }

    pub fn selector(&self) -> &Arc<CapabilitySelector> {
        &self.selector
    }

    pub async fn run(
        &self,
        task: &str,
        options: &RunOptions,
        mut session: LoopSession<'_>,
    ) -> TaskOutcome {
        let started_at = Utc::now();
        let task_id = Uuid::new_v4();
        let events = session.events;
        tracing::info!(task_id = %task_id, session = %events.session_id(), task = %task, "task received");
        events.emit(EventKind::TaskReceived {
            task: task.to_string(),
            working_dir: options.working_dir.display().to_string(),
        });

        let mut working = WorkingMemory::new();
        working.set_goal(task);
        let mut progress = Progress {
            steps: Vec::new(),
            success_count: 0,
            failure_count: 0,
            last_error: None,
            final_answer: None,
            working,
            transcript: Transcript::new(),
        };
        let mut iterations = 0usize;

        let status = loop {
            // Planning
            if session.cancelled(LoopState::Planning) {
                break TaskStatus::Cancelled;
            }
            if iterations >= options.max_iterations {
                break TaskStatus::MaxIterationsReached;
            }
            iterations += 1;
            tracing::debug!(iteration = iterations, "planning");

            match self
                .run_cycle(task, iterations, options, &mut session, &mut progress)
                .await
            {
                Cycle::Next => continue,
                Cycle::Completed => break TaskStatus::Completed,
                Cycle::Failed => break TaskStatus::Failed,
                Cycle::Cancelled => break TaskStatus::Cancelled,
            }
        };

        let outcome = TaskOutcome {
            task_id,
            session_id: events.session_id().to_string(),
            task: task.to_string(),
            status,
            iterations,
            steps: progress.steps,
            success_count: progress.success_count,
            failure_count: progress.failure_count,
            last_error: progress.last_error,
            final_answer: progress.final_answer,
            started_at,
            finished_at: Utc::now(),
        };
        let summary = outcome.summary();
        match status {
            TaskStatus::Completed => {
                tracing::info!(task_id = %task_id, "{summary}");
                events.emit(EventKind::TaskComplete {
                    summary,
                    answer: outcome.final_answer.clone(),
                });
            }
            TaskStatus::Failed => {
                tracing::error!(task_id = %task_id, "{summary}");
                events.emit(EventKind::TaskFailed {
                    summary,
                    error: outcome.last_error.clone().unwrap_or_default(),
                });
            }
            TaskStatus::Cancelled => {
                tracing::info!(task_id = %task_id, "{summary}");
                events.emit(EventKind::TaskCancelled { summary });
            }
            TaskStatus::MaxIterationsReached => {
                tracing::warn!(task_id = %task_id, "{summary}");
                events.emit(EventKind::MaxIterationsReached {
                    max_iterations: options.max_iterations,
                    summary,
                });
            }
        }
        outcome
    }

    /// 一个规划周期：首次尝试加上可重试失败后的重试
    async fn run_cycle(
        &self,
        task: &str,
        iteration: usize,
        options: &RunOptions,
        session: &mut LoopSession<'_>,
        progress: &mut Progress,
    ) -> Cycle {
        let mut attempt = 1usize;
        let mut retry_error: Option<String> = None;

        loop {
            if session.cancelled(LoopState::Selecting) {
                return Cycle::Cancelled;
            }
            let number = progress.steps.len() + 1;
            session.events.emit(EventKind::StepStarted {
                step: number,
                attempt,
                iteration,
            });
            let context = StepContext::new(task, options.working_dir.clone())
                .with_memory(&*session.memory, self.context_entries)
                .with_working(&progress.working)
                .at_step(number, attempt)
                .with_retry_error(retry_error.take());

            let StepRun {
                mut step,
                error,
                abort_task,
                reply,
            } = self
                .run_step(task, &context, &progress.transcript, options, session)
                .await;
            if let Some(reply) = reply {
                progress.transcript.record(&step.capability, step.number, reply);
            }

            // Observing 之前先决定恢复动作与是否完成，完成标记会影响记忆重要度
            let recovery = error
                .as_ref()
                .map(|e| self.recovery.handle(e, attempt, options.max_retries));
            let completes = if error.is_none()
                && !abort_task
                && !step.outcome.is_failure()
                && !session.cancelled(LoopState::Deciding)
            {
                self.decide_completion(task, &step, &progress.steps).await
            } else {
                false
            };
            step.finished_at = Utc::now();
            self.observe(&step, completes, session, progress);
            self.refine_summaries(session).await;

            if let Some(err) = &error {
                session.events.emit(EventKind::StepFailed {
                    step: step.number,
                    code: err.code().to_string(),
                    error: err.to_string(),
                    retrying: matches!(recovery, Some(RecoveryAction::Retry(_))),
                });
                progress.last_error = Some(err.to_string());
            }
            let cancelled_step = step.outcome == StepOutcome::Cancelled;
            progress.steps.push(step);

            if abort_task || cancelled_step {
                return Cycle::Cancelled;
            }
            match recovery {
                Some(RecoveryAction::Retry(msg)) => {
                    tracing::info!(attempt, max = options.max_retries, "retrying step: {msg}");
                    attempt += 1;
                    retry_error = Some(msg);
                    continue;
                }
                Some(RecoveryAction::Abort(err)) => {
                    progress.last_error = Some(err.to_string());
                    return Cycle::Failed;
                }
                Some(RecoveryAction::Continue) => return Cycle::Next,
                None => {}
            }
            return if completes { Cycle::Completed } else { Cycle::Next };
        }
    }

    /// Selecting + Executing：选择能力、生成响应、安全检查、执行
    async fn run_step(
        &self,
        task: &str,
        context: &StepContext,
        transcript: &Transcript,
        options: &RunOptions,
        session: &LoopSession<'_>,
    ) -> StepRun {
        let events = session.events;
        let mut step = Step {
            number: context.step,
            attempt: context.attempt,
            capability: SELECTOR_NAME.to_string(),
            thinking: String::new(),
            explanation: None,
            action: None,
            original_action: None,
            direct_answer: None,
            verdict: None,
            warned: false,
            execution: None,
            done: false,
            outcome: StepOutcome::NoAction,
            hints: Vec::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        // Selecting
        let selection = match self.selector.select(task, context).await {
            Ok(selection) => selection,
            Err(e) => return Self::failed(step, e),
        };
        step.capability = selection.name().to_string();
        tracing::info!(
            step = step.number,
            capability = %step.capability,
            confidence = selection.confidence,
            fallback = selection.fallback,
            "capability selected"
        );
        events.emit(EventKind::CapabilitySelected {
            step: step.number,
            capability: step.capability.clone(),
            confidence: selection.confidence,
            reasoning: selection.reasoning.clone(),
            fallback: selection.fallback,
        });
        if session.cancelled(LoopState::Executing) {
            return Self::cancelled(step);
        }

        // Executing：能力生成响应
        let capability_options = CapabilityOptions {
            working_dir: options.working_dir.clone(),
            step: step.number,
            attempt: step.attempt,
        };
        let hints: Vec<Hint> = self
            .hints
            .as_ref()
            .map(|h| h.hints_for(&step.capability))
            .unwrap_or_default();
        if !hints.is_empty() {
            tracing::debug!(step = step.number, count = hints.len(), "hints injected");
        }
        step.hints = hints.iter().map(|h| h.id).collect();
        let context = context
            .clone()
            .with_transcript(transcript.for_capability(&step.capability))
            .with_hints(hints.iter().map(Hint::prompt_line).collect());
        let response = match selection
            .capability
            .execute(task, &context, &capability_options)
            .await
        {
            Ok(response) => response.normalized(),
            Err(e) => {
                let error = capability_error(&step.capability, e);
                return Self::failed(step, error);
            }
        };
        Self::apply_response(&mut step, &response);
        let reply = serde_json::to_string(&response).ok();
        let mut run = self.run_action(step, response, task, options, session).await;
        run.reply = reply;
        run
    }

    /// 安全闸门 + 执行
    async fn run_action(
        &self,
        mut step: Step,
        response: CapabilityResponse,
        task: &str,
        options: &RunOptions,
        session: &LoopSession<'_>,
    ) -> StepRun {
        let events = session.events;
        events.emit(EventKind::ResponseGenerated {
            step: step.number,
            thinking: truncate_chars(&response.thinking, THINKING_CHARS),
            action: response.action.clone(),
            explanation: response.explanation.clone(),
            direct_answer: response.direct_answer.clone(),
            done: response.done,
        });

        let Some(proposed) = response.action.clone() else {
            step.outcome = if step.direct_answer.is_some() {
                StepOutcome::Answered
            } else {
                StepOutcome::NoAction
            };
            return StepRun::finished(step);
        };

        // 安全闸门
        let hint = RiskHint {
            task: task.to_string(),
            declared_danger: response.declared_danger(),
        };
        let verdict = self.gate.evaluate(&proposed, &hint).await;
        step.verdict = Some(verdict.clone());
        let action = match verdict {
            SafetyVerdict::Allow => proposed,
            SafetyVerdict::BlockHardcoded { reason } => {
                return Self::blocked(step, &proposed, reason, events);
            }
            SafetyVerdict::WarnNeedsConfirmation {
                reason,
                safer_alternative,
            } => {
                tracing::warn!(step = step.number, action = %proposed, reason = %reason, "action needs confirmation");
                events.emit(EventKind::Warning {
                    step: step.number,
                    action: proposed.clone(),
                    reason: reason.clone(),
                    safer_alternative: safer_alternative.clone(),
                });
                step.warned = true;
                if options.auto_approve {
                    proposed
                } else {
                    let request = ConfirmationRequest {
                        step: step.number,
                        action: proposed.clone(),
                        reason,
                        safer_alternative,
                        explanation: response.explanation.clone(),
                    };
                    match session.confirm.confirm(&request).await {
                        UserDecision::Approve => proposed,
                        UserDecision::Skip => {
                            tracing::info!(step = step.number, "action skipped by user");
                            step.outcome = StepOutcome::Skipped;
                            return StepRun::finished(step);
                        }
                        UserDecision::AbortTask => {
                            tracing::info!(step = step.number, "task aborted by user");
                            step.outcome = StepOutcome::Cancelled;
                            return StepRun {
                                step,
                                error: None,
                                abort_task: true,
                                reply: None,
                            };
                        }
                        UserDecision::EditAndApprove(edited) => {
                            let edited = edited.trim().to_string();
                            step.original_action = Some(proposed.clone());
                            step.action = Some(edited.clone());
                            // 编辑后的动作只重跑模式层
                            if let Some(reason) = self.gate.check_patterns(&edited) {
                                step.verdict = Some(SafetyVerdict::BlockHardcoded {
                                    reason: reason.clone(),
                                });
                                return Self::blocked(step, &edited, reason, events);
                            }
                            edited
                        }
                    }
                }
            }
        };

        if session.cancelled(LoopState::Executing) {
            return Self::cancelled(step);
        }

        let execution = self
            .runner
            .execute(&action, &options.working_dir, options.command_timeout)
            .await;
        events.emit(EventKind::ExecutionResult {
            step: step.number,
            action: action.clone(),
            success: execution.success(),
            exit_code: execution.exit_code(),
            timed_out: matches!(execution.status, ExecStatus::TimedOut { .. }),
            duration_ms: execution.duration_ms,
            output: execution.truncated_output(OUTPUT_PREVIEW_CHARS),
        });
        let error = execution.to_error();
        step.execution = Some(execution);
        match error {
            None => {
                step.outcome = StepOutcome::Succeeded;
                StepRun::finished(step)
            }
            Some(e) => Self::failed(step, e),
        }
    }

    fn apply_response(step: &mut Step, response: &CapabilityResponse) {
        step.thinking = response.thinking.clone();
        step.explanation = response.explanation.clone();
        step.action = response.action.clone();
        step.direct_answer = response.direct_answer.clone();
        step.done = response.done;
    }

    fn failed(mut step: Step, error: AgentError) -> StepRun {
        tracing::warn!(step = step.number, code = error.code(), error = %error, "step failed");
        step.outcome = StepOutcome::failed(&error);
        StepRun {
            step,
            error: Some(error),
            abort_task: false,
            reply: None,
        }
    }

    fn blocked(mut step: Step, action: &str, reason: String, events: &EventSink) -> StepRun {
        tracing::warn!(step = step.number, action = %action, reason = %reason, "action blocked");
        events.emit(EventKind::ActionBlocked {
            step: step.number,
            action: action.to_string(),
            reason: reason.clone(),
        });
        step.outcome = StepOutcome::Blocked {
            reason: reason.clone(),
        };
        StepRun {
            step,
            error: Some(AgentError::SafetyBlocked(reason)),
            abort_task: false,
            reply: None,
        }
    }

    fn cancelled(mut step: Step) -> StepRun {
        step.outcome = StepOutcome::Cancelled;
        StepRun::finished(step)
    }

    /// Deciding：能力声明 done 即完成，否则（启用时）询问完成判定
    async fn decide_completion(&self, task: &str, step: &Step, previous: &[Step]) -> bool {
        if step.done {
            return true;
        }
        let Some(checker) = &self.completion else {
            return false;
        };
        let mut steps = previous.to_vec();
        steps.push(step.clone());
        let verdict = checker.check(task, &steps).await;
        tracing::debug!(complete = verdict.complete, reason = %verdict.reason, "completion check");
        verdict.complete
    }

    /// 为本步压缩出的摘要请模型写概要；失败时保留规则摘要
    async fn refine_summaries(&self, session: &mut LoopSession<'_>) {
        let Some(writer) = &self.summarizer else {
            return;
        };
        for summary in session.memory.take_pending_summaries() {
            if let Some(synopsis) = writer.write(&summary).await {
                tracing::debug!(title = %summary.title, "summary refined by model");
                session.memory.set_synopsis(summary.id, synopsis);
            }
        }
    }

    /// Observing：写入记忆条目、更新计数与工作记忆
    fn observe(
        &self,
        step: &Step,
        completes: bool,
        session: &mut LoopSession<'_>,
        progress: &mut Progress,
    ) {
        let mut importance = step.outcome.base_importance();
        if step.warned {
            importance += 0.1;
        }
        if completes {
            importance += 0.1;
        }

        let mut entry = MemoryEntry::new(step.number, step.capability.clone())
            .with_thinking(truncate_chars(&step.thinking, THINKING_CHARS))
            .with_action(step.action.clone())
            .with_result(step.observation(RESULT_CHARS))
            .with_importance(importance)
            .with_tag(step.capability.clone())
            .with_tag(step.outcome.tag());
        if step.warned {
            entry = entry.with_tag("warned");
        }
        if let StepOutcome::Failed { class: Some(class), .. } = &step.outcome {
            entry = entry.with_tag(class.as_str());
        }
        if let Some(program) = step.action.as_deref().and_then(program_name) {
            entry = entry.with_tag(program);
        }
        session.memory.add_entry(entry);

        if step.outcome.is_success() {
            progress.success_count += 1;
        } else if step.outcome.is_failure() {
            progress.failure_count += 1;
        }
        if let Some(action) = &step.action {
            progress.working.add_attempt(action.clone());
        }
        if step.outcome.is_failure() {
            progress
                .working
                .add_failure(format!("step {}: {}", step.number, step.outcome.describe()));
        }
        if let Some(answer) = &step.direct_answer {
            progress.final_answer = Some(answer.clone());
        }
    }
}

impl StepRun {
    fn finished(step: Step) -> Self {
        Self {
            step,
            error: None,
            abort_task: false,
            reply: None,
        }
    }
}

/// 能力未给出合法响应：模型不可达为 model-unavailable，其余为 selection-error
fn capability_error(capability: &str, error: CapabilityError) -> AgentError {
    match error {
        CapabilityError::Model(LlmError::Unavailable(msg)) => AgentError::ModelUnavailable(msg),
        CapabilityError::Model(LlmError::RateLimited { retry_after_ms }) => {
            AgentError::ModelUnavailable(format!("rate limited (retry after {retry_after_ms}ms)"))
        }
        other => AgentError::Selection(format!(
            "capability `{capability}` produced no usable response: {other}"
        )),
    }
}

/// 动作的程序名（首个非环境变量赋值的词，去掉路径与 sudo）
fn program_name(action: &str) -> Option<String> {
    action
        .split_whitespace()
        .find(|word| !word.contains('=') && *word != "sudo")
        .map(|word| word.rsplit('/').next().unwrap_or(word))
        .map(|name| name.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-' && c != '_'))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_name() {
        assert_eq!(program_name("ls -la").as_deref(), Some("ls"));
        assert_eq!(program_name("sudo /usr/bin/apt update").as_deref(), Some("apt"));
        assert_eq!(program_name("LANG=C sort file").as_deref(), Some("sort"));
        assert_eq!(program_name("   ").as_deref(), None);
    }

    #[test]
    fn test_capability_errors_map_to_taxonomy() {
        let unavailable = capability_error(
            "command",
            CapabilityError::Model(LlmError::Unavailable("down".into())),
        );
        assert_eq!(unavailable.code(), "model-unavailable");
        let malformed = capability_error("command", CapabilityError::Malformed("no json".into()));
        assert_eq!(malformed.code(), "selection-error");
        assert!(malformed.to_string().contains("command"));
    }

    #[test]
    fn test_run_options_clamp_retries() {
        let opts = RunOptions::default().with_max_retries(0);
        assert_eq!(opts.max_retries, 1);
    }
}

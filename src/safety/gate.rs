//! 双层安全闸门
//!
//! 1. 模式层（PatternSet）：命中即 block-hardcoded，短路返回，不咨询模型
//! 2. 启发式/模型层：能力声明的危险、确定性风险规则、可选的模型风险评估；任一认为有风险即 warn
//!
//! 模型不可达或回复格式错误时升级为 warn，从不降级为 allow。

use std::sync::Arc;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::{parse_reply, schema_json, LlmClient};
use crate::memory::Message;
use crate::safety::PatternSet;

/// 单个动作的安全结论；只在产生它的步骤内有效
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "kebab-case")]
pub enum SafetyVerdict {
    Allow,
    BlockHardcoded {
        reason: String,
    },
    WarnNeedsConfirmation {
        reason: String,
        safer_alternative: Option<String>,
    },
}

impl SafetyVerdict {
    pub fn label(&self) -> &'static str {
        match self {
            SafetyVerdict::Allow => "allow",
            SafetyVerdict::BlockHardcoded { .. } => "block-hardcoded",
            SafetyVerdict::WarnNeedsConfirmation { .. } => "warn-needs-confirmation",
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, SafetyVerdict::BlockHardcoded { .. })
    }

    pub fn is_warn(&self) -> bool {
        matches!(self, SafetyVerdict::WarnNeedsConfirmation { .. })
    }
}

/// 评估时的附加上下文
#[derive(Clone, Debug, Default)]
pub struct RiskHint {
    pub task: String,
    /// 能力自己声明的危险原因
    pub declared_danger: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// 模型风险评估回复
#[derive(Debug, Deserialize, JsonSchema)]
struct RiskAssessment {
    risk: RiskLevel,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    safer_alternative: Option<String>,
}

const RISK_REVIEW_PROMPT: &str = "You are a shell command risk reviewer. \
Judge how risky it is to run the given command for the given task. \
Use `low` for read-only or easily reversible commands, `medium` when files may be modified or removed, \
`high` for privileged or hard-to-reverse changes and `critical` for anything that can destroy the system. \
Reply with a single JSON object matching this schema:";

const RISKY_CONSTRUCTS: &[(&str, &str)] = &[
    (r"\brm\b", "deletes files"),
    (r"\brmdir\b", "removes directories"),
    (r"\bsudo\b", "runs with elevated privileges"),
    (r"\bchmod\b", "changes permissions"),
    (r"\bchown\b", "changes ownership"),
    (r"(?:>|\btee\b[^|;&]*)\s*/etc/", "writes under /etc"),
    (r"\bfind\b[^;&|]*(?:-exec\s+rm\b|-delete\b)", "deletes files found by find"),
    (r"\bgit\s+push\b[^;&|]*(?:--force\b|\s-f\b)", "force-pushes git history"),
    (r"\bgit\s+reset\s+--hard\b", "discards local git changes"),
    (r"\bkill\s+-(?:9|kill)\b|\bkillall\b|\bpkill\b", "kills processes"),
    (r"\b(?:shutdown|reboot|halt|poweroff)\b", "stops or restarts the machine"),
    (r"\b(?:curl|wget)\b[^|;&]*\|\s*(?:sudo\s+)?(?:ba|z|da)?sh\b", "pipes a download into a shell"),
];

pub struct SafetyGate {
    patterns: PatternSet,
    heuristics: Vec<(Regex, &'static str)>,
    overwrite: Regex,
    llm: Option<Arc<dyn LlmClient>>,
}

impl SafetyGate {
    pub fn new(extra_patterns: &[String]) -> Result<Self, AgentError> {
        let heuristics = RISKY_CONSTRUCTS
            .iter()
            .map(|(src, why)| {
                Regex::new(&format!("(?i){src}"))
                    .map(|re| (re, *why))
                    .map_err(|e| AgentError::Config(format!("invalid heuristic `{src}`: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let overwrite = Regex::new(r"(?:^|[^>0-9&])>\s*([^\s;&|>]+)")
            .map_err(|e| AgentError::Config(e.to_string()))?;
        Ok(Self {
            patterns: PatternSet::new(extra_patterns)?,
            heuristics,
            overwrite,
            llm: None,
        })
    }

    /// 启用模型层
    pub fn with_model(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 仅模式层；用户编辑过的动作在执行前必须再过一遍
    pub fn check_patterns(&self, action: &str) -> Option<String> {
        self.patterns.check(action)
    }

    pub async fn evaluate(&self, action: &str, hint: &RiskHint) -> SafetyVerdict {
        if let Some(reason) = self.check_patterns(action) {
            tracing::warn!(action = %action, reason = %reason, "action blocked by hardcoded pattern");
            return SafetyVerdict::BlockHardcoded { reason };
        }

        let mut reasons = self.heuristic_reasons(action);
        if let Some(declared) = hint.declared_danger.as_deref() {
            let declared = declared.trim();
            reasons.insert(
                0,
                if declared.is_empty() {
                    "marked dangerous by the capability".to_string()
                } else {
                    declared.to_string()
                },
            );
        }

        let mut safer_alternative = None;
        if let Some(llm) = &self.llm {
            match self.assess_with_model(llm.as_ref(), action, &hint.task).await {
                Ok(assessment) if assessment.risk >= RiskLevel::Medium => {
                    let reason = if assessment.reason.trim().is_empty() {
                        format!("model rated risk {:?}", assessment.risk).to_lowercase()
                    } else {
                        assessment.reason
                    };
                    reasons.push(reason);
                    safer_alternative = assessment.safer_alternative.filter(|s| !s.trim().is_empty());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "risk assessment unavailable, escalating to warn");
                    reasons.push(format!("risk could not be assessed ({e})"));
                }
            }
        }

        if reasons.is_empty() {
            SafetyVerdict::Allow
        } else {
            SafetyVerdict::WarnNeedsConfirmation {
                reason: reasons.join("; "),
                safer_alternative,
            }
        }
    }

    fn heuristic_reasons(&self, action: &str) -> Vec<String> {
        let mut reasons: Vec<String> = self
            .heuristics
            .iter()
            .filter(|(re, _)| re.is_match(action))
            .map(|(_, why)| why.to_string())
            .collect();
        let overwrites = self
            .overwrite
            .captures_iter(action)
            .filter_map(|c| c.get(1))
            .any(|target| target.as_str() != "/dev/null");
        if overwrites {
            reasons.push("overwrites a file with `>`".to_string());
        }
        reasons.dedup();
        reasons
    }

    async fn assess_with_model(
        &self,
        llm: &dyn LlmClient,
        action: &str,
        task: &str,
    ) -> Result<RiskAssessment, crate::llm::LlmError> {
        let messages = [
            Message::system(format!(
                "{RISK_REVIEW_PROMPT}\n{}",
                schema_json::<RiskAssessment>()
            )),
            Message::user(format!("Task: {task}\nCommand: {action}")),
        ];
        let reply = llm.complete(&messages).await?;
        tracing::debug!(reply = %reply, "risk assessment reply");
        parse_reply::<RiskAssessment>(&reply)
    }
}

//! 安全层：硬编码模式、启发式/模型风险评估、用户确认

pub mod confirm;
pub mod gate;
pub mod patterns;

pub use confirm::{
    AutoApprove, AutoDeny, ConfirmationHandler, ConfirmationRequest, InputLines, TerminalConfirmation,
    UserDecision,
};
pub use gate::{RiskHint, SafetyGate, SafetyVerdict};
pub use patterns::PatternSet;

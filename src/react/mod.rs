//! 认知层：Agent 主循环、每步上下文、完成判定、生命周期事件

pub mod completion;
pub mod context;
pub mod events;
pub mod loop_;

pub use completion::{CompletionChecker, CompletionVerdict};
pub use context::{StepContext, Transcript};
pub use events::{AgentEvent, EventKind, EventSink};
pub use loop_::{AgentLoop, LoopSession, RunOptions};

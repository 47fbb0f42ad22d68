//! 能力系统
//!
//! 能力（Capability）把任务与上下文转为一条待执行动作或一个直接回答。
//! 内置 `command`（生成 shell 命令）与 `direct_llm`（直接回答）；
//! 配置目录中的描述在启动时绑定到内置处理器，注册表随后只读共享。

mod capability;
mod command;
mod direct;
mod loader;
mod registry;
mod selector;

pub use capability::{
    Capability, CapabilityDescriptor, CapabilityError, CapabilityOptions, CapabilityResponse,
};
pub use command::CommandCapability;
pub use direct::DirectAnswerCapability;
pub use loader::{CapabilityKind, CapabilityLoader, CapabilityMeta, CapabilitySpec};
pub use registry::CapabilityRegistry;
pub use selector::{CapabilitySelector, SelectionResult};

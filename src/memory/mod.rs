//! 记忆层：模型消息、有界记忆库（条目 + 规则摘要）、任务内工作记忆

pub mod bank;
pub mod compressor;
pub mod entry;
pub mod message;
pub mod working;

pub use bank::{MemoryBank, MemoryConfig, MemoryStats};
pub use compressor::{MemoryCompressor, SummaryWriter};
pub use entry::{MemoryEntry, MemoryQuery, MemorySummary};
pub use message::{Message, Role};
pub use working::WorkingMemory;

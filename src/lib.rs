//! Ask-Shell - 自然语言任务自动化智能体
//!
//! 模块划分：
//! - **agent**: 无头运行时（会话、单任务处理）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、循环状态、会话监管、任务历史、组件构建
//! - **executor**: 命令执行适配层
//! - **hints**: 从历史执行中学习提示，注入能力 prompt
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 有界记忆库与任务内工作记忆
//! - **observability**: 日志初始化
//! - **react**: Agent 主循环、上下文、完成判定、生命周期事件
//! - **safety**: 双层安全闸门与用户确认
//! - **skills**: 能力系统（注册表、选择器、内置能力、配置目录加载）

pub mod agent;
pub mod config;
pub mod core;
pub mod executor;
pub mod hints;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod safety;
pub mod skills;

pub use agent::{create_session, process_task, Session};
pub use core::{AgentBuilder, AgentComponents, TaskOutcome, TaskStatus};
pub use react::RunOptions;

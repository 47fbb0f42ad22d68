//! 执行适配层：运行命令、捕获输出、归一化错误

pub mod result;
pub mod shell;

pub use result::{ExecStatus, ExecutionResult};
pub use shell::{CommandRunner, ShellExecutor};

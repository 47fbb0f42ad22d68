//! Ask-Shell 命令行入口
//!
//! 带任务参数时运行一次后退出（Failed 时退出码非零）；否则逐行读取 stdin 中的任务，直到 exit / quit。
//! 生命周期事件按行打印；Ctrl+C 取消当前任务。

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use ask_shell::agent::{create_session, process_task, run_options};
use ask_shell::config::load_config;
use ask_shell::core::{AgentBuilder, TaskStatus};
use ask_shell::observability;
use ask_shell::react::{AgentEvent, EventKind};
use ask_shell::safety::{InputLines, TerminalConfirmation};

#[derive(Debug, Parser)]
#[command(name = "ask-shell")]
#[command(about = "Turn natural-language tasks into shell commands, safely", version)]
struct Args {
    /// 自动批准需确认的命令（硬编码拦截不受影响）
    #[arg(short, long, env = "ASK_SHELL_AUTO")]
    auto: bool,

    /// 命令执行的工作目录
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    /// 额外的配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 任务描述；省略时进入交互模式
    task: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    observability::init();

    let config = load_config(args.config.clone()).context("Failed to load config")?;
    let components = AgentBuilder::new(config)
        .build()
        .context("Failed to build agent")?;
    let options = run_options(&components, args.workdir.clone(), args.auto);

    // 任务与确认回答共用同一个 stdin 读缓冲
    let input = InputLines::stdin();
    let confirm = Arc::new(TerminalConfirmation::new(Arc::clone(&input)));
    let (mut session, events) =
        create_session(&components, confirm).context("Failed to create session")?;
    let printer = tokio::spawn(print_events(events));

    let supervisor = session.supervisor();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling current task...");
            supervisor.cancel_task();
        }
    });

    let task = args.task.join(" ");
    let code = if !task.trim().is_empty() {
        let outcome = process_task(&components, &mut session, task.trim(), &options).await;
        if outcome.status == TaskStatus::Failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    } else {
        let mut stdout = tokio::io::stdout();
        loop {
            stdout.write_all(b"ask-shell> ").await?;
            stdout.flush().await?;
            let Some(task) = input.next_line().await else {
                break;
            };
            if matches!(task.as_str(), "exit" | "quit") {
                break;
            }
            if task.is_empty() {
                continue;
            }
            process_task(&components, &mut session, &task, &options).await;
        }
        ExitCode::SUCCESS
    };

    session.supervisor().shutdown();
    drop(session);
    let _ = printer.await;
    Ok(code)
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<AgentEvent>) {
    while let Some(event) = rx.recv().await {
        match event.kind {
            EventKind::TaskReceived { task, working_dir } => {
                println!("Task: {task} (in {working_dir})");
            }
            EventKind::StepStarted { step, attempt, .. } if attempt > 1 => {
                println!("\n[step {step}] retry, attempt {attempt}");
            }
            EventKind::StepStarted { step, .. } => println!("\n[step {step}]"),
            EventKind::CapabilitySelected {
                capability,
                fallback,
                ..
            } => {
                let note = if fallback { " (default)" } else { "" };
                println!("  capability: {capability}{note}");
            }
            EventKind::ResponseGenerated {
                thinking,
                action,
                explanation,
                direct_answer,
                ..
            } => {
                if !thinking.is_empty() {
                    println!("  thinking: {thinking}");
                }
                if let Some(action) = action {
                    println!("  command: {action}");
                }
                if let Some(explanation) = explanation {
                    println!("  explanation: {explanation}");
                }
                if let Some(answer) = direct_answer {
                    println!("\n{answer}");
                }
            }
            EventKind::Warning {
                reason,
                safer_alternative,
                ..
            } => {
                println!("  warning: {reason}");
                if let Some(alt) = safer_alternative {
                    println!("  safer alternative: {alt}");
                }
            }
            EventKind::ActionBlocked { action, reason, .. } => {
                println!("  BLOCKED `{action}`: {reason}");
            }
            EventKind::ExecutionResult {
                success,
                exit_code,
                duration_ms,
                output,
                ..
            } => {
                let status = match (success, exit_code) {
                    (true, _) => "ok".to_string(),
                    (false, Some(code)) => format!("exit {code}"),
                    (false, None) => "failed".to_string(),
                };
                println!("  result ({status}, {duration_ms}ms):");
                for line in output.lines() {
                    println!("    {line}");
                }
            }
            EventKind::StepFailed {
                error, retrying, ..
            } => {
                let next = if retrying { ", retrying" } else { "" };
                println!("  error: {error}{next}");
            }
            EventKind::TaskComplete { summary, .. }
            | EventKind::TaskCancelled { summary }
            | EventKind::MaxIterationsReached { summary, .. } => println!("\n{summary}"),
            EventKind::TaskFailed { summary, .. } => eprintln!("\n{summary}"),
        }
    }
}

//! Bee Link 无头入口
//!
//! 初始化日志与内核，后台连接 Hub，然后从标准输入逐行读取用户消息。
//! 以 `/` 开头的行是命令：/new [标题]、/rename <标题>、/sessions、/status、/sync、/quit。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bee_link::config::load_config;
use bee_link::core::{CoreBuilder, CoreRuntime, ShutdownManager, ShutdownReason};
use bee_link::CoreEvent;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bee_link::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    let runtime = CoreBuilder::new(config)
        .build()
        .context("Failed to assemble core")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let coordinator = runtime.shutdown_coordinator(Arc::clone(&shutdown));

    if let Err(e) = runtime.start().await {
        tracing::warn!(error = %e, "Hub connection not started, running local-only");
    }

    let _printer = runtime.bus.subscribe(|event| match event {
        CoreEvent::ToolCallStarted { tool, args, .. } => println!("  ⚙ {tool} {args}"),
        CoreEvent::ToolCallResult { tool, success, .. } => {
            println!("  {} {tool}", if *success { "✓" } else { "✗" })
        }
        CoreEvent::ConnectionChanged { status, error } => match error {
            Some(e) => println!("[hub] {status}: {e}"),
            None => println!("[hub] {status}"),
        },
        CoreEvent::ModeChanged { mode, .. } => println!("[mode] {mode}"),
        CoreEvent::CoreError { code, message, .. } => eprintln!("[error:{code}] {message}"),
        _ => {}
    });

    let mut session_id = current_session(&runtime)?;
    println!("Session {session_id} · {}", runtime.status_text());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else {
            shutdown.shutdown(ShutdownReason::UserInitiated);
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
            match name {
                "quit" | "exit" => {
                    shutdown.shutdown(ShutdownReason::UserInitiated);
                    break;
                }
                "new" => {
                    let title = Some(rest.trim()).filter(|t| !t.is_empty());
                    match runtime.orchestrator.new_session(title) {
                        Ok(session) => {
                            session_id = session.local_id;
                            println!("Session {session_id} · {}", session.title);
                        }
                        Err(e) => eprintln!("{e}"),
                    }
                }
                "rename" => {
                    if let Err(e) = runtime.orchestrator.rename_session(&session_id, rest) {
                        eprintln!("{e}");
                    }
                }
                "sessions" => match runtime.orchestrator.list_sessions_for_sidebar() {
                    Ok(sessions) => {
                        for s in sessions {
                            let marker = if s.local_id == session_id { "*" } else { " " };
                            println!("{marker} {} {} [{}]", s.local_id, s.title, s.sync_status.as_str());
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                },
                "status" => println!("{}", runtime.status_text()),
                "sync" => {
                    let drained = runtime.sync.sync_all().await;
                    println!(
                        "sync {} · {} pending",
                        if drained { "done" } else { "skipped" },
                        runtime.orchestrator.pending_sync_count()
                    );
                }
                other => eprintln!("unknown command: /{other}"),
            }
            continue;
        }

        match runtime.orchestrator.send_message(&session_id, line).await {
            Ok(outcome) => println!("bee [{}]> {}", outcome.mode, outcome.message.content),
            Err(e) => eprintln!("turn failed: {e}"),
        }
    }

    coordinator.run_cleanup().await;
    Ok(())
}

/// 最近活动的会话；没有则新建
fn current_session(runtime: &CoreRuntime) -> anyhow::Result<String> {
    let sessions = runtime.orchestrator.list_sessions_for_sidebar()?;
    match sessions.into_iter().next() {
        Some(session) => Ok(session.local_id),
        None => Ok(runtime.orchestrator.new_session(None)?.local_id),
    }
}

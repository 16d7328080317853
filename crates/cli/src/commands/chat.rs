//! `pollbridge chat`: ask questions through the same task registry the
//! webhook uses, polling until each answer finishes.

use anyhow::Context;
use pollbridge_agent::GenerationTaskRegistry;
use pollbridge_config::ReadMode;
use pollbridge_gateway::Runtime;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const CONVERSATION_KEY: &str = "cli";

pub async fn run(config_path: Option<&Path>, message: Option<String>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let runtime = Runtime::from_config(config)
        .await
        .context("failed to build runtime")?;
    let mode = runtime.config.tasks.read_mode;

    if let Some(msg) = message {
        let answer = ask(&runtime.registry, mode, &msg, |text| {
            print!("{text}");
            let _ = std::io::stdout().flush();
        })
        .await;
        println!();
        runtime.shutdown().await;
        return answer.map(|_| ());
    }

    println!();
    println!("  pollbridge chat");
    println!("  Provider:     {}", runtime.config.default_provider);
    println!("  Model:        {}", runtime.model);
    println!("  Tool servers: {}", runtime.tools.handles().len());
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        print!("  Assistant > ");
        std::io::stdout().flush()?;
        if let Err(e) = ask(&runtime.registry, mode, line, |text| {
            print!("{text}");
            let _ = std::io::stdout().flush();
        })
        .await
        {
            eprintln!("  [Error] {e}");
        }
        println!();
        println!();
    }

    runtime.shutdown().await;
    Ok(())
}

/// Start a task and poll it to completion, handing each new piece of text
/// to `emit`. Returns the whole answer.
pub async fn ask(
    registry: &GenerationTaskRegistry,
    mode: ReadMode,
    question: &str,
    mut emit: impl FnMut(&str),
) -> anyhow::Result<String> {
    let task_id = registry.start(question, CONVERSATION_KEY);
    let mut answer = String::new();

    loop {
        let increment = registry
            .poll(&task_id)
            .with_context(|| format!("polling task {task_id}"))?;
        let fresh = new_text(mode, &answer, &increment.text);
        if !fresh.is_empty() {
            emit(fresh);
            answer.push_str(fresh);
        }
        if increment.finished {
            registry.remove(&task_id);
            return Ok(answer);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// The part of a poll result not yet shown. Accumulating polls repeat
/// everything so far; consuming polls carry only new text.
fn new_text<'a>(mode: ReadMode, shown: &str, polled: &'a str) -> &'a str {
    match mode {
        ReadMode::Consuming => polled,
        ReadMode::Accumulating => polled.strip_prefix(shown).unwrap_or(polled),
    }
}

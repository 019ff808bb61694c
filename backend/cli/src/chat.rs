//! Interactive chat REPL.
//!
//! Runs the orchestrator in-process and prompts for a decision whenever a
//! tool call awaits confirmation: `y` approves, `n` rejects, and a list such
//! as `a=5,b=3` approves with edited arguments.

use std::io::Write;

use anyhow::{bail, Result};
use futures::StreamExt;
use serde_json::{Map, Number, Value};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use confab_agent::{EventStream, Orchestrator};
use confab_core::{ConfabError, StreamEvent};

type Input = Lines<BufReader<Stdin>>;

#[derive(Debug, Clone, PartialEq)]
enum Decision {
    Approve(Map<String, Value>),
    Reject,
}

pub async fn run(orchestrator: Orchestrator, session: Option<String>) -> Result<()> {
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut session_id = session;

    println!(
        "Confab chat ({} provider). /stats, /clear, /quit.",
        orchestrator.provider_name()
    );

    loop {
        prompt("you> ")?;
        let Some(line) = input.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/quit" | "/exit" => break,
            "/stats" => {
                if let Some(id) = &session_id {
                    let stats = orchestrator.session_stats(id).await?;
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
                continue;
            }
            "/clear" => {
                if let Some(id) = session_id.take() {
                    let removed = orchestrator.clear_session(&id).await?;
                    println!("cleared {removed} messages");
                }
                continue;
            }
            _ => {}
        }

        let handle = match orchestrator.send_message(session_id.clone(), line).await {
            Ok(handle) => handle,
            Err(ConfabError::Busy { reason, .. }) => {
                println!("busy: {reason}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        session_id = Some(handle.session_id.clone());

        render_turn(&orchestrator, &handle.session_id, handle.events, &mut input).await?;
        orchestrator.wait_idle(&handle.session_id).await;
    }

    Ok(())
}

async fn render_turn(
    orchestrator: &Orchestrator,
    session_id: &str,
    mut events: EventStream,
    input: &mut Input,
) -> Result<()> {
    let mut mid_line = false;
    while let Some(frame) = events.next().await {
        match frame.event {
            StreamEvent::SessionInfo {
                compressed,
                degraded,
                ..
            } => {
                if degraded {
                    println!("[context truncated: summarization unavailable]");
                } else if compressed {
                    println!("[older history summarized]");
                }
            }
            StreamEvent::Message {
                content,
                is_complete,
                ..
            } => {
                if !mid_line && !content.is_empty() {
                    print!("bot> ");
                    mid_line = true;
                }
                print!("{content}");
                if is_complete && mid_line {
                    println!();
                    mid_line = false;
                }
                std::io::stdout().flush()?;
            }
            StreamEvent::ToolCall {
                name,
                args,
                awaiting_confirmation,
                ..
            } => {
                end_line(&mut mid_line);
                println!("[tool] {name} {args}");
                if awaiting_confirmation {
                    let decision = ask(input).await?;
                    let (confirmed, edits) = match decision {
                        Decision::Approve(edits) => (true, edits),
                        Decision::Reject => (false, Map::new()),
                    };
                    match orchestrator.confirm(session_id, confirmed, edits).await {
                        Ok(ack) => println!("[{}]", ack.decision),
                        Err(ConfabError::ConfirmationExpired(_)) => {
                            println!("[confirmation window closed; treated as rejected]")
                        }
                        Err(e) => println!("[{}: {e}]", e.code()),
                    }
                }
            }
            StreamEvent::ToolResult {
                name,
                result,
                is_error,
                ..
            } => {
                end_line(&mut mid_line);
                let label = if is_error { "failed" } else { "result" };
                println!("[tool] {name} {label}: {result}");
            }
            StreamEvent::Error { code, content, .. } => {
                end_line(&mut mid_line);
                println!("[error {code}] {content}");
            }
            StreamEvent::Complete { .. } | StreamEvent::StreamEnd { .. } => {}
        }
    }
    end_line(&mut mid_line);
    Ok(())
}

async fn ask(input: &mut Input) -> Result<Decision> {
    loop {
        prompt("approve? [y/n/a=5,b=3] ")?;
        let Some(line) = input.next_line().await? else {
            return Ok(Decision::Reject);
        };
        match parse_decision(&line) {
            Ok(decision) => return Ok(decision),
            Err(e) => println!("{e}"),
        }
    }
}

fn parse_decision(line: &str) -> Result<Decision> {
    let line = line.trim();
    match line.to_ascii_lowercase().as_str() {
        "y" | "yes" | "" => return Ok(Decision::Approve(Map::new())),
        "n" | "no" => return Ok(Decision::Reject),
        _ => {}
    }

    let mut edits = Map::new();
    for pair in line.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("expected y, n or key=value pairs, got '{pair}'");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("missing argument name in '{pair}'");
        }
        edits.insert(key.to_string(), parse_value(value.trim()));
    }
    Ok(Decision::Approve(edits))
}

fn parse_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

fn prompt(text: &str) -> Result<()> {
    print!("{text}");
    std::io::stdout().flush()?;
    Ok(())
}

fn end_line(mid_line: &mut bool) {
    if *mid_line {
        println!();
        *mid_line = false;
    }
}

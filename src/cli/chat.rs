//! Interactive line loop
//!
//! Plain lines are sent as user messages; lines starting with `/` are
//! commands. Answers are printed as their fragments arrive.

use std::error::Error;
use std::future::Future;
use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;

use crate::cli::session_list::list_sessions;
use crate::core::app::{ChatEngine, GenerationOutcome};
use crate::core::chat_stream::{ChatStreamService, StreamMessage, StreamParams};

#[derive(Debug, PartialEq, Eq)]
pub enum ChatCommand<'a> {
    Send(&'a str),
    New,
    Model(Option<&'a str>),
    Sessions,
    Switch(Option<&'a str>),
    Retry,
    Quit,
    Unknown(&'a str),
    Empty,
}

pub fn parse_line(line: &str) -> ChatCommand<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ChatCommand::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return ChatCommand::Send(trimmed);
    };

    let mut parts = command.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).filter(|arg| !arg.is_empty());
    match name {
        "new" => ChatCommand::New,
        "model" => ChatCommand::Model(arg),
        "sessions" => ChatCommand::Sessions,
        "switch" => ChatCommand::Switch(arg),
        "retry" => ChatCommand::Retry,
        "quit" | "exit" => ChatCommand::Quit,
        _ => ChatCommand::Unknown(name),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Line(String),
    Eof,
    Interrupted,
}

/// Waits for the next input line, or for `interrupt` to fire first.
pub async fn next_input<R, F>(lines: &mut Lines<R>, interrupt: F) -> std::io::Result<Input>
where
    R: AsyncBufRead + Unpin,
    F: Future,
{
    tokio::select! {
        _ = interrupt => Ok(Input::Interrupted),
        line = lines.next_line() => Ok(line?.map_or(Input::Eof, Input::Line)),
    }
}

pub async fn run_chat(engine: &mut ChatEngine) -> Result<(), Box<dyn Error>> {
    let (service, mut rx) = ChatStreamService::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print_header(engine);
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        // Once the stream loop has polled ctrl_c, SIGINT no longer ends the
        // process, so the prompt has to listen for it too.
        let line = match next_input(&mut lines, tokio::signal::ctrl_c()).await? {
            Input::Line(line) => line,
            Input::Eof => break,
            Input::Interrupted => {
                println!();
                break;
            }
        };
        match parse_line(&line) {
            ChatCommand::Empty => {}
            ChatCommand::Quit => break,
            ChatCommand::Send(text) => match engine.submit(text) {
                Ok(params) => stream_answer(engine, &service, &mut rx, params).await?,
                Err(e) => eprintln!("⚠️  {e}"),
            },
            ChatCommand::Retry => {
                let params = engine.retry_last();
                if params.is_none() && !last_answer_failed(engine) {
                    println!("Nothing to retry.");
                    continue;
                }
                stream_answer(engine, &service, &mut rx, params).await?;
            }
            ChatCommand::New => {
                engine.create_session();
                print_header(engine);
            }
            ChatCommand::Model(None) => {
                for model in engine.catalog().models() {
                    println!("  {} ({})", model.id, model.label);
                }
            }
            ChatCommand::Model(Some(id)) => {
                if engine.catalog().find(id).is_none() {
                    eprintln!("⚠️  Unknown model '{id}'");
                    continue;
                }
                match engine.switch_model(id) {
                    Ok(()) => println!("Now using {}.", engine.model_label(id)),
                    Err(e) => eprintln!("⚠️  {e}"),
                }
            }
            ChatCommand::Sessions => list_sessions(engine),
            ChatCommand::Switch(None) => eprintln!("⚠️  Usage: /switch <session id>"),
            ChatCommand::Switch(Some(id)) => match engine.select_session(id) {
                Ok(()) => {
                    print_header(engine);
                    print_transcript(engine);
                }
                Err(e) => eprintln!("⚠️  {e}"),
            },
            ChatCommand::Unknown(name) => eprintln!("⚠️  Unknown command '/{name}'"),
        }
    }
    Ok(())
}

fn last_answer_failed(engine: &ChatEngine) -> bool {
    engine
        .current_messages()
        .iter()
        .rev()
        .find(|m| m.is_assistant())
        .is_some_and(|m| m.failed)
}

/// Runs one generation to its end, echoing content as it grows. Ctrl+C
/// aborts it.
async fn stream_answer(
    engine: &mut ChatEngine,
    service: &ChatStreamService,
    rx: &mut mpsc::UnboundedReceiver<(StreamMessage, u64)>,
    params: Option<StreamParams>,
) -> Result<(), Box<dyn Error>> {
    let mut printed = 0;
    if let Some(params) = params {
        service.spawn_stream(params);
        while engine.is_generating() {
            tokio::select! {
                received = rx.recv() => {
                    let Some((message, stream_id)) = received else {
                        break;
                    };
                    let outcome = engine.apply_stream_message(message, stream_id);
                    printed = echo_new_content(engine, printed)?;
                    if outcome == Some(GenerationOutcome::Completed) {
                        println!();
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    engine.abort_generation();
                }
            }
        }
    }

    if let Some(answer) = engine.current_messages().last().filter(|m| m.failed) {
        if printed > 0 {
            println!();
        }
        let error = answer.error.as_deref().unwrap_or("Generation failed");
        if answer.was_cancelled {
            println!("[{error}]");
        } else {
            eprintln!("❌ {error} (type /retry to try again)");
        }
    }
    Ok(())
}

fn echo_new_content(engine: &ChatEngine, printed: usize) -> Result<usize, Box<dyn Error>> {
    let Some(answer) = engine.current_messages().last() else {
        return Ok(printed);
    };
    if let Some(fresh) = answer.content.get(printed..) {
        if !fresh.is_empty() {
            print!("{fresh}");
            std::io::stdout().flush()?;
        }
    }
    Ok(answer.content.len())
}

fn print_header(engine: &ChatEngine) {
    let session = engine.current_session_id().unwrap_or("-");
    let model = engine.current_model();
    println!("💬 Session {session} · {}", engine.model_label(model));
}

fn print_transcript(engine: &ChatEngine) {
    for message in engine.current_messages() {
        if message.is_user() {
            println!("> {}", message.content);
        } else if message.failed {
            let error = message.error.as_deref().unwrap_or("Generation failed");
            println!("{}[{error}]", message.content);
        } else {
            println!("{}", message.content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interrupt_at_prompt_ends_input() {
        let (reader, _writer) = tokio::io::duplex(64);
        let mut lines = BufReader::new(reader).lines();

        let input = next_input(&mut lines, std::future::ready(()))
            .await
            .expect("input");
        assert_eq!(input, Input::Interrupted);
    }

    #[tokio::test]
    async fn lines_arrive_until_eof() {
        let mut lines = BufReader::new(&b"hello\n/quit\n"[..]).lines();

        let first = next_input(&mut lines, std::future::pending::<()>()).await;
        assert_eq!(first.expect("input"), Input::Line("hello".to_string()));
        let second = next_input(&mut lines, std::future::pending::<()>()).await;
        assert_eq!(second.expect("input"), Input::Line("/quit".to_string()));
        let third = next_input(&mut lines, std::future::pending::<()>()).await;
        assert_eq!(third.expect("input"), Input::Eof);
    }
}

//! Command-line interface parsing and handling
//!
//! This module parses command-line arguments, wires the engine to its store
//! and dispatches to the chosen subcommand.

pub mod chat;
pub mod model_list;
pub mod session_list;

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::cli::chat::run_chat;
use crate::cli::model_list::list_models;
use crate::cli::session_list::list_sessions;
use crate::core::app::ChatEngine;
use crate::core::config::Config;
use crate::core::persistence::JsonFileStore;
use crate::utils::logging::init_tracing;

#[derive(Parser)]
#[command(name = "colloquy")]
#[command(about = "A line-oriented chat client for OpenAI-compatible APIs")]
#[command(
    long_about = "Colloquy keeps any number of chat sessions, each bound to a model, and streams \
answers as they are generated. Sessions are saved after every change and restored on the next \
start.\n\n\
Credentials:\n\
  Each model reads its API key from the environment variable listed by 'colloquy models'.\n\n\
Chat commands:\n\
  /new              Start a new session\n\
  /model <id>       Switch the current session's model\n\
  /sessions         List sessions\n\
  /switch <id>      Switch to another session\n\
  /retry            Retry the last failed answer\n\
  /quit             Leave\n\
  Ctrl+C            Abort the answer being generated"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Model for the current session
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Session state file (overrides the config and the platform default)
    #[arg(long, global = true, value_name = "FILE")]
    pub state: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start chatting (default)
    Chat,
    /// List the available models
    Models,
    /// List saved sessions
    Sessions,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("⚠️  {e}; using default settings");
            Config::default()
        }
    };
    init_tracing(
        config.log_level.as_deref().unwrap_or("warn"),
        args.log.as_deref(),
    )?;

    let state_path = resolve_state_path(args.state.as_deref(), &config)?;
    let mut engine = ChatEngine::from_config(&config, Box::new(JsonFileStore::new(state_path)))?;
    if !engine.is_saving() {
        eprintln!("⚠️  Saved chat state could not be read or preserved; changes in this run will not be saved");
    }

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            engine.ensure_session();
            if let Some(model) = args.model.as_deref() {
                if engine.catalog().find(model).is_none() {
                    return Err(format!(
                        "Unknown model '{model}'. Run 'colloquy models' to see what is available."
                    )
                    .into());
                }
                engine.switch_model(model)?;
            }
            run_chat(&mut engine).await
        }
        Commands::Models => {
            list_models(&engine);
            Ok(())
        }
        Commands::Sessions => {
            list_sessions(&engine);
            Ok(())
        }
    }
}

/// `--state`, then the config's `state_path`, then the platform data dir.
pub fn resolve_state_path(cli: Option<&Path>, config: &Config) -> Result<PathBuf, Box<dyn Error>> {
    cli.map(Path::to_path_buf)
        .or_else(|| config.state_path.clone())
        .or_else(JsonFileStore::default_path)
        .ok_or_else(|| "Failed to determine a data directory; pass --state <FILE>".into())
}

#[cfg(test)]
mod tests;

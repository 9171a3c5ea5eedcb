use super::chat::{parse_line, ChatCommand};
use super::model_list::model_line;
use super::*;
use crate::core::models::{ModelCatalog, StaticCredentials};
use tempfile::TempDir;

mod test_helpers {
    use super::*;

    pub(super) fn parse_args(argv: &[&str]) -> Args {
        Args::try_parse_from(argv)
            .unwrap_or_else(|err| panic!("argv={argv:?} should parse successfully: {err}"))
    }
}

use test_helpers::parse_args;

#[test]
fn chat_is_the_default_command() {
    let args = parse_args(&["colloquy"]);
    assert!(args.command.is_none());
    assert!(args.model.is_none());
    assert!(args.log.is_none());
}

#[test]
fn global_flags_parse_after_subcommands() {
    let argv = [
        "colloquy",
        "chat",
        "--model",
        "deepseek",
        "--log",
        "chat.log",
        "--state",
        "/tmp/state.json",
    ];
    let args = parse_args(&argv);
    assert_eq!(args.command, Some(Commands::Chat));
    assert_eq!(args.model.as_deref(), Some("deepseek"));
    assert_eq!(args.log, Some(PathBuf::from("chat.log")));
    assert_eq!(args.state, Some(PathBuf::from("/tmp/state.json")));

    assert_eq!(parse_args(&["colloquy", "models"]).command, Some(Commands::Models));
    assert_eq!(
        parse_args(&["colloquy", "-m", "gpt-4", "sessions"]).command,
        Some(Commands::Sessions)
    );
}

#[test]
fn unknown_subcommands_are_rejected() {
    assert!(Args::try_parse_from(["colloquy", "provider"]).is_err());
}

#[test]
fn state_path_prefers_cli_then_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let from_config = temp_dir.path().join("config-state.json");
    let from_cli = temp_dir.path().join("cli-state.json");
    let config = Config {
        state_path: Some(from_config.clone()),
        ..Config::default()
    };

    assert_eq!(
        resolve_state_path(Some(&from_cli), &config).expect("path"),
        from_cli
    );
    assert_eq!(resolve_state_path(None, &config).expect("path"), from_config);
}

#[test]
fn chat_lines_parse_into_commands() {
    assert_eq!(parse_line("  hello there "), ChatCommand::Send("hello there"));
    assert_eq!(parse_line("   "), ChatCommand::Empty);
    assert_eq!(parse_line("/new"), ChatCommand::New);
    assert_eq!(parse_line("/model deepseek"), ChatCommand::Model(Some("deepseek")));
    assert_eq!(parse_line("/model"), ChatCommand::Model(None));
    assert_eq!(parse_line("/switch  123 "), ChatCommand::Switch(Some("123")));
    assert_eq!(parse_line("/retry"), ChatCommand::Retry);
    assert_eq!(parse_line("/exit"), ChatCommand::Quit);
    assert_eq!(parse_line("/frobnicate now"), ChatCommand::Unknown("frobnicate"));
}

#[test]
fn model_lines_show_credential_status() {
    let catalog = ModelCatalog::builtin();
    let gpt4 = catalog.find("gpt-4").expect("builtin");
    let credentials = StaticCredentials::new().with("COLLOQUY_KEY_GPT_4", "sk-test");

    let line = model_line(gpt4, "gpt-4", &credentials);
    assert!(line.starts_with('▶'));
    assert!(line.contains("https://api.openai.com/v1/chat/completions"));
    assert!(line.ends_with('✅'));

    let deepseek = catalog.find("deepseek").expect("builtin");
    let line = model_line(deepseek, "gpt-4", &credentials);
    assert!(line.starts_with(' '));
    assert!(line.ends_with("❌ set COLLOQUY_KEY_DEEPSEEK"));
}

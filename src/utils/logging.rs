use std::error::Error;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset: our own crate at `level`, everything
/// else at `warn`.
pub fn default_directive(level: &str) -> String {
    format!("warn,colloquy={level}")
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(level)))
}

/// Install the global tracing subscriber.
///
/// Output goes to `log_file` (appending) when given, otherwise to stderr.
/// Calling this twice is harmless; the second subscriber is ignored.
pub fn init_tracing(level: &str, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_directive_scopes_level_to_crate() {
        assert_eq!(default_directive("debug"), "warn,colloquy=debug");
    }

    #[test]
    fn init_tracing_creates_log_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("colloquy.log");
        init_tracing("info", Some(&path)).expect("init");
        assert!(path.exists());
    }
}

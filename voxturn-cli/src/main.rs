//! Voxturn CLI: terminal front-end for the Voxturn voice assistant.
//!
//! Runs the voice loop over the microphone or a WAV file, a text chat that
//! bypasses transcription, and a few commands for inspecting the
//! tool-calling protocol and configuration.

mod commands;
mod listen;
mod repl;
mod wiring;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Voxturn: a spoken-dialogue assistant with tool calling
#[derive(Parser, Debug)]
#[command(name = "voxturn", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Listen on the microphone and answer spoken requests
    Listen {
        /// Play a WAV file through the voice loop instead of the microphone
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Type requests instead of speaking them
    Chat,
    /// Print the tool-calling instructions sent to the model
    Tools {
        /// Print the JSON schema of each tool instead
        #[arg(long)]
        json: bool,
    },
    /// Decode a model response and print the call and the spoken prose
    Decode {
        /// Response text to decode
        text: String,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default configuration to the workspace
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "voxturn", "voxturn")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "voxturn.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_flags() {
        let cli = Cli::try_parse_from(["voxturn", "-vv", "chat"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
        assert!(matches!(cli.command, Commands::Chat));
    }

    #[test]
    fn test_listen_file_argument() {
        let cli = Cli::try_parse_from(["voxturn", "listen", "--file", "hello.wav"]).unwrap();
        match cli.command {
            Commands::Listen { file } => assert_eq!(file, Some(PathBuf::from("hello.wav"))),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_decode_takes_text() {
        let cli = Cli::try_parse_from(["voxturn", "-c", "my.toml", "decode", "hi there"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("my.toml")));
        match cli.command {
            Commands::Decode { text } => assert_eq!(text, "hi there"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_command_is_required() {
        assert!(Cli::try_parse_from(["voxturn"]).is_err());
    }
}

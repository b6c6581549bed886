//! Subcommand handlers.

use std::path::Path;

use voxturn_core::config::AssistantConfig;
use voxturn_core::{Decoded, ToolCallCodec, ToolRegistry};

use crate::listen::run_listen;
use crate::repl::run_chat;
use crate::wiring::{InputMode, build_orchestrator, build_speech};
use crate::{Commands, ConfigAction};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Listen { file } => {
            let config = load(workspace, config_file)?;
            let orchestrator = build_orchestrator(&config, InputMode::Voice)?;
            let speech = build_speech(&config)?;
            run_listen(&config, orchestrator, speech, file.as_deref()).await?;
            Ok(())
        }
        Commands::Chat => {
            let config = load(workspace, config_file)?;
            let mut orchestrator = build_orchestrator(&config, InputMode::Text)?;
            let speech = build_speech(&config)?;
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            run_chat(&mut orchestrator, speech.as_ref(), stdin, true).await?;
            Ok(())
        }
        Commands::Tools { json } => {
            let config = load(workspace, config_file)?;
            println!("{}", render_tools(&config, json)?);
            Ok(())
        }
        Commands::Decode { text } => {
            let config = load(workspace, config_file)?;
            println!("{}", render_decode(&config, &text)?);
            Ok(())
        }
        Commands::Config { action } => handle_config(action, workspace, config_file),
    }
}

fn load(workspace: &Path, config_file: Option<&Path>) -> anyhow::Result<AssistantConfig> {
    voxturn_core::config::load_config(Some(workspace), config_file, None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

fn codec(config: &AssistantConfig) -> anyhow::Result<ToolCallCodec> {
    ToolCallCodec::new(config.tools.markers(), config.tools.repair.clone())
        .map_err(|e| anyhow::anyhow!("Invalid tool settings: {}", e))
}

fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for (descriptor, executor) in voxturn_tools::builtin_tools() {
        registry.register(descriptor, executor);
    }
    registry
}

/// The protocol fragment for the built-in tools, or their JSON schemas.
pub fn render_tools(config: &AssistantConfig, json: bool) -> anyhow::Result<String> {
    let registry = builtin_registry();
    if json {
        let schemas: Vec<_> = registry
            .descriptors()
            .iter()
            .map(|d| d.to_json_schema())
            .collect();
        return Ok(serde_json::to_string_pretty(&schemas)?);
    }
    Ok(codec(config)?.encode(&registry.descriptors()))
}

/// Human-readable decode result followed by the prose that would be spoken.
pub fn render_decode(config: &AssistantConfig, text: &str) -> anyhow::Result<String> {
    let split = codec(config)?.split(text);
    let mut out = match split.decoded {
        Decoded::Call(call) => format!(
            "Decision: call\nTool: {}\nParameters: {}",
            call.tool_name,
            serde_json::to_string(&call.parameters)?
        ),
        Decoded::NoCall => "Decision: no call".to_string(),
        Decoded::Malformed { reason } => format!("Decision: malformed ({reason})"),
    };
    out.push_str("\nProse: ");
    out.push_str(&split.prose);
    Ok(out)
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".voxturn");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&AssistantConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, config_file)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

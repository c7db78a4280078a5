use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::json;

use clawmate::characters::list_characters;
use clawmate::config::load_config;
use clawmate::dispatch::SelfieMode;
use clawmate::dispatch::registry::create_provider_registry;
use clawmate::pipeline::{GenerateSelfieOptions, generate_selfie};
use clawmate::router::build_provider_order;
use clawmate::transport::ReqwestTransport;

/// Exit status for a generation that fell back to the degrade message.
const EXIT_DEGRADED: i32 = 2;

#[derive(Parser)]
#[command(
    name = "clawmate",
    version,
    about = "Generate character selfies through pluggable image providers"
)]
struct Cli {
    /// Config file (JSON, or TOML by extension). Defaults to
    /// $CLAWMATE_CONFIG, then ./config/clawmate.config.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate one selfie and print the result as JSON.
    Generate(GenerateArgs),
    /// List configured providers, their kind and availability.
    Providers,
    /// List built-in and user characters.
    Characters,
}

#[derive(Args)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,

    #[arg(long)]
    character: Option<String>,

    #[arg(long)]
    provider: Option<String>,

    #[arg(long, value_parser = parse_mode)]
    mode: Option<SelfieMode>,

    #[arg(long)]
    event_source: Option<String>,
}

fn parse_mode(value: &str) -> Result<SelfieMode, String> {
    SelfieMode::parse(value).ok_or_else(|| format!("unknown mode {value:?} (expected direct or mirror)"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Generate(args) => {
            let result = generate_selfie(GenerateSelfieOptions {
                config_path: cli.config,
                cwd: Some(cwd),
                character_id: args.character,
                provider: args.provider,
                prompt: Some(args.prompt),
                mode: args.mode,
                event_source: args.event_source,
                ..GenerateSelfieOptions::default()
            })
            .await?;
            println!("{}", result.to_json_pretty());
            if !result.is_ok() {
                std::process::exit(EXIT_DEGRADED);
            }
        }
        Commands::Providers => {
            let loaded = load_config(cli.config.as_deref(), &cwd).await?;
            let registry = create_provider_registry(
                &loaded.config.providers,
                Some(Arc::new(ReqwestTransport::new())),
            );
            let providers: Vec<_> = registry
                .iter()
                .map(|(name, entry)| {
                    json!({
                        "name": name,
                        "kind": entry.kind.map(|k| k.as_str()),
                        "available": entry.adapter.available(),
                        "reason": entry.adapter.unavailable_reason(),
                    })
                })
                .collect();
            let order = match build_provider_order(None, &loaded.config, &registry.available_names()) {
                Ok(order) => json!(order),
                Err(e) => json!({ "code": e.code(), "error": e.to_string() }),
            };
            let report = json!({
                "config": loaded.path,
                "defaultProvider": loaded.config.default_provider,
                "providers": providers,
                "order": order,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Characters => {
            let loaded = load_config(cli.config.as_deref(), &cwd).await?;
            let characters = list_characters(
                &loaded.config.character_root,
                Some(&loaded.config.user_character_root),
                &cwd,
            )
            .await;
            let report = json!({
                "selected": loaded.config.selected_character,
                "characters": characters,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

use anyhow::Context;
use clap::{Parser, Subcommand};
use orpar_core::{LlmProvider, OrparPhase, PartialProfile};
use orpar_governance::{
    default_profiles, GovernanceEngineConfig, OverrideRequest, OverrideScope,
    ParameterGovernanceEngine, ParameterResolutionContext,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "orpar.toml";

#[derive(Parser, Debug)]
#[command(name = "orpar-gov", about = "ORPAR inference parameter governance")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the config file and print a summary
    Check,
    /// Print the parameters a model call would use
    Resolve {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        channel: String,
        #[arg(long)]
        phase: OrparPhase,
        #[arg(long)]
        task: Option<String>,
    },
    /// Dry-run an override request against the configured governance
    Request {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        channel: String,
        #[arg(long)]
        phase: OrparPhase,
        #[arg(long)]
        task: Option<String>,
        #[arg(long, default_value = "next_call")]
        scope: OverrideScope,
        #[arg(long, default_value = "operator dry run")]
        reason: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_output_tokens: Option<u32>,
        #[arg(long)]
        reasoning_tokens: Option<u32>,
    },
    /// Print the built-in phase profiles for a provider
    Defaults {
        #[arg(long, default_value = "claude")]
        provider: LlmProvider,
    },
}

/// Reads the config file. A missing default file means built-in defaults.
async fn load_config(path: &Path) -> anyhow::Result<GovernanceEngineConfig> {
    let source = match tokio::fs::read_to_string(path).await {
        Ok(source) => source,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && path == Path::new(DEFAULT_CONFIG) => {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(GovernanceEngineConfig::default());
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to read config file '{}'", path.display())
            })
        }
    };
    GovernanceEngineConfig::from_toml_str(&source)
        .with_context(|| format!("Invalid config file '{}'", path.display()))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = load_config(&cli.config).await?;

    match cli.command {
        Commands::Check => {
            info!(path = %cli.config.display(), "config is valid");
            print_json(&json!({
                "valid": true,
                "default_provider": config.default_provider,
                "agents": config.agents.len(),
                "channels": config.channels.len(),
                "system_governance": config.governance.system,
                "ttl": config.ttl,
            }))?;
        }
        Commands::Resolve {
            agent,
            channel,
            phase,
            task,
        } => {
            let engine = ParameterGovernanceEngine::new(config);
            let mut context = ParameterResolutionContext::new(agent, channel, phase);
            if let Some(task) = task {
                context = context.with_task(task);
            }
            print_json(&engine.preview(&context).profile)?;
        }
        Commands::Request {
            agent,
            channel,
            phase,
            task,
            scope,
            reason,
            model,
            temperature,
            max_output_tokens,
            reasoning_tokens,
        } => {
            let suggested = PartialProfile {
                model,
                temperature,
                max_output_tokens,
                reasoning_tokens,
            };
            if suggested.is_empty() {
                anyhow::bail!(
                    "suggest at least one of --model, --temperature, \
                     --max-output-tokens, --reasoning-tokens"
                );
            }
            let engine = ParameterGovernanceEngine::new(config);
            let decision = engine.request_override(
                &agent,
                &channel,
                task.as_deref(),
                phase,
                OverrideRequest::new(suggested, reason, scope),
            )?;
            print_json(&decision)?;
        }
        Commands::Defaults { provider } => {
            let profiles: serde_json::Map<String, serde_json::Value> = default_profiles(provider)
                .into_iter()
                .map(|(phase, profile)| Ok((phase.to_string(), serde_json::to_value(profile)?)))
                .collect::<Result<_, serde_json::Error>>()?;
            print_json(&json!({ "provider": provider, "phases": profiles }))?;
        }
    }

    Ok(())
}

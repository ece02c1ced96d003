//! chatrelay - streaming chat relay for a hosted LLM completions API
//!
//! Serves `POST /api/chat` and relays the upstream's streamed completion
//! back to the browser token by token.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatrelay::config::{Config, KeySource};

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "Streaming chat relay for a hosted LLM completions API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Path to configuration file (built-in defaults when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration and report where the API key comes from
    Check {
        /// Path to configuration file (built-in defaults when omitted)
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn load_config(path: Option<&str>) -> anyhow::Result<(Config, KeySource)> {
    let loaded = match path {
        Some(path) => {
            tracing::info!(config = %path, "Loading configuration");
            Config::from_file_with_env(path)?
        }
        None => {
            tracing::info!("No config file given, using defaults");
            Config::from_env()?
        }
    };
    Ok(loaded)
}

/// Lines printed by `chatrelay check`. Never includes the key itself.
fn check_report(config: &Config, key_source: &KeySource) -> Vec<String> {
    let system_prompt = if config.upstream.system_prompt().is_some() {
        "enabled"
    } else {
        "disabled"
    };
    vec![
        format!("listen:        {}", config.server.listen),
        format!("upstream:      {}", config.upstream.completions_url()),
        format!("model:         {}", config.upstream.model),
        format!("api key:       {}", key_source),
        format!("system prompt: {}", system_prompt),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatrelay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut config, key_source) = load_config(config.as_deref())?;

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }

            tracing::info!(
                model = %config.upstream.model,
                upstream = %config.upstream.completions_url(),
                key_source = %key_source,
                "Upstream configured"
            );

            chatrelay::proxy::run_server(config).await
        }

        Commands::Check { config } => {
            let (config, key_source) = load_config(config.as_deref())?;

            for line in check_report(&config, &key_source) {
                println!("{}", line);
            }

            if key_source == KeySource::None {
                tracing::warn!("Configuration is valid but no API key is available");
            }
            Ok(())
        }
    }
}

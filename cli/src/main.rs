use clap::Parser;

mod cli;

use cli::{Cli, Commands};
use gemini_relay_core::config::{load_config, resolve_config_path};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Config decides the log level, so it is read before logging exists
    let config_path = resolve_config_path(cli.config.clone())?;
    let config = load_config(config_path.as_deref())?;

    // Initialize logging; a set RUST_LOG replaces the configured level entirely
    let level = config.logging.level.as_str();
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::new("")
            .add_directive(format!("gemini_relay={}", level).parse()?)
            .add_directive(format!("gemini_relay_core={}", level).parse()?)
            .add_directive("tower_http=debug".parse()?),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &config_path {
        Some(path) => tracing::info!("Loaded config from {:?}", path),
        None => tracing::info!("No config file found, using defaults"),
    }

    match cli.command {
        Commands::Start { port } => {
            cli::commands::start::run(config, port).await?;
        }
        Commands::Status => {
            cli::commands::status::run(config, config_path).await?;
        }
    }

    Ok(())
}

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gemini-relay")]
#[command(author, version, about = "OpenAI-compatible API relay backed by Google Gemini")]
pub struct Cli {
    /// Path to config file (checked in order: local config.toml, ~/.config/gemini-relay/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the relay server
    Start {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show resolved configuration and whether the server is up
    Status,
}

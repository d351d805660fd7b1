//! MediaForge CLI - Command-line interface for multi-provider media generation

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{generate, providers};
use mediaforge_gen::ForgeConfig;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mediaforge")]
#[command(about = "Generate images and speech across AI providers with retry and fallback", long_about = None)]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Read configuration from this file instead of the layered defaults
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an image or a speech clip
    Generate(generate::GenerateArgs),

    /// List configured providers and their capabilities
    Providers {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&str>) -> Result<ForgeConfig> {
    match path {
        Some(p) => ForgeConfig::load_from_file(Path::new(p), |key| std::env::var(key).ok())
            .with_context(|| format!("loading config from {}", p)),
        None => ForgeConfig::load().context("loading layered config"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Generate(args) => generate::run(args, &config),
        Commands::Providers { format } => providers::run(&config, &format),
    }
}

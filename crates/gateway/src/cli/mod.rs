pub mod config;

use clap::{Parser, Subcommand};

/// noney: streaming generation server with resumable, human-reviewed agents.
#[derive(Debug, Parser)]
#[command(name = "noney", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load config from the path in `NOY_CONFIG` (default `config.toml`).
///
/// A missing file is not an error: every section has defaults.
pub fn load_config() -> anyhow::Result<(ny_domain::config::Config, String)> {
    let config_path = std::env::var("NOY_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = read_config(&config_path)?;
    Ok((config, config_path))
}

pub fn read_config(path: &str) -> anyhow::Result<ny_domain::config::Config> {
    use anyhow::Context;

    if !std::path::Path::new(path).exists() {
        tracing::warn!(path = %path, "config file not found, using defaults");
        return Ok(ny_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    toml::from_str(&raw).with_context(|| format!("parsing {path}"))
}

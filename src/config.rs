use anyhow::{Context, Result};
use bitcoin::Network;
use clap::Parser;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::fs;

fn parse_network(s: &str) -> Result<Network> {
    let normalized = s.trim().to_ascii_lowercase();
    let mapped = match normalized.as_str() {
        "mainnet" => "bitcoin",
        "testnet3" => "testnet",
        other => other,
    };
    Network::from_str(mapped).map_err(|_| {
        anyhow::anyhow!(
            "invalid value for network: expected mainnet | regtest | signet | testnet | testnet3 | testnet4"
        )
    })
}

fn default_db_path() -> String {
    "./db".to_string()
}

fn default_network() -> String {
    "mainnet".to_string()
}

fn normalize_optional_string(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    /// JSON file holding the decoded blocks to ingest, in ascending height order.
    #[serde(default)]
    pub blocks_file: Option<String>,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_network")]
    pub network: String,
    /// Suppresses the per-event operator log lines; summary lines still print.
    #[serde(default)]
    pub quiet: bool,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            blocks_file: None,
            db_path: default_db_path(),
            network: default_network(),
            quiet: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub blocks_file: Option<String>,
    pub db_path: String,
    pub network: Network,
    pub quiet: bool,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Path to JSON config file. Optional; flags below override its values.
    #[arg(long)]
    pub config_path: Option<String>,

    /// JSON file holding the decoded blocks to ingest.
    #[arg(long)]
    pub blocks_file: Option<String>,

    /// Directory for the index RocksDB.
    #[arg(long)]
    pub db_path: Option<String>,

    /// Bitcoin network for address rendering.
    #[arg(long)]
    pub network: Option<String>,

    /// Suppress per-event log lines.
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

fn load_config_file(path: &str) -> Result<ConfigFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {path}"))?;
    serde_json::from_str(&raw).context("failed to parse config JSON")
}

impl AppConfig {
    pub fn from_cli(cli: CliArgs) -> Result<Self> {
        let file = match &cli.config_path {
            Some(path) => load_config_file(path)?,
            None => ConfigFile::default(),
        };

        let network_str = cli.network.unwrap_or(file.network);
        let network = parse_network(&network_str)?;

        let cfg = Self {
            blocks_file: normalize_optional_string(cli.blocks_file.or(file.blocks_file)),
            db_path: cli.db_path.unwrap_or(file.db_path),
            network,
            quiet: cli.quiet || file.quiet,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let db_root = Path::new(&self.db_path);
        if !db_root.exists() {
            fs::create_dir_all(db_root)
                .map_err(|e| anyhow::anyhow!("failed to create db_path {}: {e}", self.db_path))?;
        } else if !db_root.is_dir() {
            anyhow::bail!("db_path is not a directory: {}", self.db_path);
        }

        if let Some(path) = &self.blocks_file {
            let f = Path::new(path);
            if !f.exists() {
                anyhow::bail!("blocks file does not exist: {path}");
            }
            if !f.is_file() {
                anyhow::bail!("blocks file is not a file: {path}");
            }
        }

        Ok(())
    }
}

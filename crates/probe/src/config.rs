use crate::accounts::AccountRegistry;
use clap::Parser;
use secp256k1::SecretKey;
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Error deserializing config file")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid JSON-RPC provider url '{0}'")]
    JrpcProvider(String),
    #[error("Invalid secret key for account '{0}'")]
    AccountKey(String),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub log_level: LevelFilter,
    pub jrpc_url: Url,
    pub network: String,
    pub deployments_dir: PathBuf,
    pub accounts: AccountRegistry,
}

impl Config {
    /// Loads all configuration options from CLI arguments and the TOML
    /// configuration file.
    pub fn parse() -> Result<Self, ConfigError> {
        let clap = Clap::parse();
        let config_file = ConfigFile::from_file(&clap.config_file)?;
        Self::from_clap_and_config_file(clap, config_file)
    }

    #[cfg(test)]
    fn parse_from(args: &[&str]) -> Result<Self, ConfigError> {
        let clap = Clap::parse_from(args);
        let config_file = ConfigFile::from_file(&clap.config_file)?;
        Self::from_clap_and_config_file(clap, config_file)
    }

    fn from_clap_and_config_file(clap: Clap, config_file: ConfigFile) -> Result<Self, ConfigError> {
        let jrpc_url = parse_jrpc_provider_url(&config_file.jrpc)?;

        let mut keys = HashMap::new();
        for (name, key) in config_file.accounts {
            let key = parse_account_key(&key).ok_or(ConfigError::AccountKey(name.clone()))?;
            keys.insert(name, key);
        }

        Ok(Self {
            log_level: clap.log_level,
            jrpc_url,
            network: config_file.network,
            deployments_dir: config_file.deployments_dir,
            accounts: AccountRegistry::new(keys),
        })
    }
}

/// Accepts either a literal URL or the name of an environment variable that
/// holds one.
fn parse_jrpc_provider_url(s: &str) -> Result<Url, ConfigError> {
    if let Ok(url) = Url::parse(s) {
        return Ok(url);
    }
    std::env::var(s)
        .ok()
        .and_then(|value| Url::parse(&value).ok())
        .ok_or_else(|| ConfigError::JrpcProvider(s.to_string()))
}

/// Accepts either a literal hex-encoded secret key (with or without a `0x`
/// prefix) or the name of an environment variable that holds one, so keys can
/// stay out of the config file.
fn parse_account_key(s: &str) -> Option<SecretKey> {
    let parse = |raw: &str| SecretKey::from_str(raw.trim_start_matches("0x")).ok();
    parse(s).or_else(|| std::env::var(s).ok().and_then(|value| parse(&value)))
}

#[derive(Parser, Debug, Clone)]
#[clap(name = "lottery-probe")]
#[clap(bin_name = "lottery-probe")]
#[clap(author, version, about, long_about = None)]
struct Clap {
    /// Only show log messages at or above this level. `INFO` by default.
    #[clap(short, long, default_value = "info")]
    log_level: LevelFilter,
    /// The filepath of the TOML configuration file.
    #[clap(long, default_value = "config.toml", parse(from_os_str))]
    config_file: PathBuf,
}

/// Represents the TOML config file
#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
struct ConfigFile {
    /// JSON-RPC provider for the queried chain, as a URL or an environment
    /// variable name.
    jrpc: String,
    /// Which subdirectory of `deployments_dir` holds the artifacts to use.
    network: String,
    #[serde(default = "serde_defaults::deployments_dir")]
    deployments_dir: PathBuf,
    /// Named accounts, mapping a name to a secret key (or an environment
    /// variable name).
    accounts: HashMap<String, String>,
}

impl ConfigFile {
    /// Tries to Create a [`ConfigFile`] from a TOML file.
    fn from_file(file_path: &Path) -> Result<Self, ConfigError> {
        let string = read_to_string(file_path)?;
        toml::from_str(&string).map_err(ConfigError::Toml)
    }
}

/// These should be expressed as constants once
/// https://github.com/serde-rs/serde/issues/368 is fixed.
mod serde_defaults {
    use std::path::PathBuf;

    pub fn deployments_dir() -> PathBuf {
        "deployments".into()
    }
}

//! Configuration management for the RGB++ resolver
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

use crate::ckb::ScriptHashType;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub metrics: MetricsConfig,
    pub bitcoin: BitcoinConfig,
    pub ckb: CkbConfig,
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub assets_api: AssetsApiConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BitcoinBackend {
    Mempool,
    Electrs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BitcoinConfig {
    pub backend: BitcoinBackend,
    pub urls: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CkbConfig {
    pub rpc_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Indexer pages scanned when looking for the spender of a dead cell
    #[serde(default = "default_spender_scan_pages")]
    pub spender_scan_pages: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplorerConfig {
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetsApiConfig {
    pub url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    pub max_batch_size: usize,
    pub btc_fetch_concurrency: usize,
    pub max_page_size: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            btc_fetch_concurrency: 8,
            max_page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct XudtScriptConfig {
    pub code_hash: String,
    pub hash_type: ScriptHashType,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokensConfig {
    #[serde(default)]
    pub xudt_scripts: Vec<XudtScriptConfig>,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_spender_scan_pages() -> u32 {
    4
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("RGBPP_RESOLVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse and validate settings from a TOML document
    pub fn from_toml(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.bitcoin.urls.is_empty() {
            anyhow::bail!("At least one bitcoin backend URL must be configured");
        }
        if self.ckb.rpc_url.is_empty() {
            anyhow::bail!("CKB RPC URL must be configured");
        }
        if self.resolver.max_batch_size == 0 {
            anyhow::bail!("resolver.max_batch_size must be positive");
        }
        if self.resolver.max_page_size == 0 {
            anyhow::bail!("resolver.max_page_size must be positive");
        }
        if self.resolver.btc_fetch_concurrency == 0 {
            anyhow::bail!("resolver.btc_fetch_concurrency must be positive");
        }
        if self.tokens.xudt_scripts.is_empty() {
            tracing::warn!("No xUDT script templates configured - token metadata disabled");
        }
        if self.assets_api.url.is_none() {
            tracing::warn!("No assets API configured - lookup by bitcoin txid disabled");
        }

        Ok(())
    }
}

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid regex");
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

//! Relayer configuration
//!
//! Loaded from an optional YAML/TOML file merged with `RELAYER__`-prefixed
//! environment variables (`RELAYER__DESTINATION__MNEMONIC`, ...). A `.env`
//! file, if present, is applied to the environment first.

use eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Deserializer};
use std::collections::{HashMap, HashSet};
use std::env;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::rpc_fallback::parse_rpc_urls;

/// Main configuration for the relayer
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub attestation: AttestationConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Absent means message state is held in memory only
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Source (EVM) chain configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Name used in logs, metrics and as the checkpoint key
    #[serde(default = "default_source_name")]
    pub name: String,
    /// Comma-separated RPC URLs; the first is primary, the rest are fallbacks
    pub rpc_url: String,
    /// MessageTransmitter contract address
    pub message_transmitter: String,
    #[serde(default = "default_finality_blocks")]
    pub finality_blocks: u64,
    /// First block to scan when no checkpoint exists; defaults to the current head
    #[serde(default)]
    pub start_block: Option<u64>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,
}

impl SourceConfig {
    /// All RPC URLs: primary followed by fallbacks.
    pub fn rpc_urls(&self) -> Vec<String> {
        parse_rpc_urls(&self.rpc_url)
    }
}

/// Destination (Noble) chain configuration
#[derive(Clone, Deserialize)]
pub struct DestinationConfig {
    pub lcd_url: String,
    #[serde(default = "default_dest_chain_id")]
    pub chain_id: String,
    /// CCTP domain of the destination chain
    #[serde(default = "default_dest_domain")]
    pub domain: u32,
    pub mnemonic: String,
    #[serde(default = "default_bech32_prefix")]
    pub bech32_prefix: String,
    #[serde(default = "default_derivation_path")]
    pub derivation_path: String,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_gas_price")]
    pub gas_price: f64,
    #[serde(default = "default_fee_denom")]
    pub fee_denom: String,
}

/// Custom Debug that redacts mnemonic to prevent accidental log leakage.
impl fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("lcd_url", &self.lcd_url)
            .field("chain_id", &self.chain_id)
            .field("domain", &self.domain)
            .field("mnemonic", &"<redacted>")
            .field("bech32_prefix", &self.bech32_prefix)
            .field("derivation_path", &self.derivation_path)
            .field("gas_limit", &self.gas_limit)
            .field("gas_price", &self.gas_price)
            .field("fee_denom", &self.fee_denom)
            .finish()
    }
}

/// Attestation service polling
#[derive(Debug, Clone, Deserialize)]
pub struct AttestationConfig {
    #[serde(default = "default_attestation_url")]
    pub base_url: String,
    /// Backoff floor between two attempts for the same message
    #[serde(default = "default_attestation_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_attestation_max_backoff")]
    pub max_backoff_ms: u64,
    /// 0 = poll until the attestation is ready
    #[serde(default = "default_attestation_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_attestation_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            base_url: default_attestation_url(),
            initial_backoff_ms: default_attestation_initial_backoff(),
            max_backoff_ms: default_attestation_max_backoff(),
            max_attempts: default_attestation_max_attempts(),
            max_concurrent: default_attestation_max_concurrent(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

/// Destination-chain submission retries
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_retries: u32,
    #[serde(default = "default_retry_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_retry_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_retry_attempts(),
            initial_backoff_ms: default_retry_initial_backoff(),
            max_backoff_ms: default_retry_max_backoff(),
        }
    }
}

/// Relay eligibility policy
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterConfig {
    /// Destination domain -> destination domain; a route is enabled when it maps to itself
    #[serde(default, deserialize_with = "domain_map")]
    pub enabled_routes: HashMap<u32, u32>,
    /// Destination domain -> bech32 address of our minter on that domain
    #[serde(default, deserialize_with = "domain_map")]
    pub minters: HashMap<u32, String>,
    #[serde(default)]
    pub filter_forwards_by_channel: bool,
    #[serde(default)]
    pub forwarding_channel_whitelist: HashSet<String>,
}

/// Queues and caches
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_completed_cache_size")]
    pub completed_cache_size: usize,
    #[serde(default = "default_completed_cache_ttl")]
    pub completed_cache_ttl_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            completed_cache_size: default_completed_cache_size(),
            completed_cache_ttl_secs: default_completed_cache_ttl(),
        }
    }
}

/// Database configuration
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Health/metrics server
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_bind")]
    pub bind_address: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_api_bind(),
            port: default_api_port(),
        }
    }
}

/// Config sources key maps by string; parse the keys as domains
fn domain_map<'de, D, K, V>(deserializer: D) -> std::result::Result<HashMap<K, V>, D::Error>
where
    D: Deserializer<'de>,
    K: FromStr + Eq + Hash,
    K::Err: fmt::Display,
    V: Deserialize<'de>,
{
    let raw = HashMap::<String, V>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(k, v)| {
            k.trim()
                .parse::<K>()
                .map(|k| (k, v))
                .map_err(|e| serde::de::Error::custom(format!("invalid domain '{}': {}", k, e)))
        })
        .collect()
}

/// Default functions
fn default_source_name() -> String {
    "ethereum".to_string()
}

fn default_finality_blocks() -> u64 {
    1
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_block_range() -> u64 {
    1000
}

fn default_reconnect_initial() -> u64 {
    1000
}

fn default_reconnect_max() -> u64 {
    60_000
}

fn default_dest_chain_id() -> String {
    "noble-1".to_string()
}

fn default_dest_domain() -> u32 {
    4
}

fn default_bech32_prefix() -> String {
    "noble".to_string()
}

fn default_derivation_path() -> String {
    "m/44'/118'/0'/0/0".to_string()
}

fn default_gas_limit() -> u64 {
    200_000
}

fn default_gas_price() -> f64 {
    0.1
}

fn default_fee_denom() -> String {
    "uusdc".to_string()
}

fn default_attestation_url() -> String {
    "https://iris-api.circle.com/attestations".to_string()
}

fn default_attestation_initial_backoff() -> u64 {
    2000
}

fn default_attestation_max_backoff() -> u64 {
    30_000
}

fn default_attestation_max_attempts() -> u32 {
    200
}

fn default_attestation_max_concurrent() -> usize {
    64
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_initial_backoff() -> u64 {
    2000
}

fn default_retry_max_backoff() -> u64 {
    60_000
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_completed_cache_size() -> usize {
    100_000
}

fn default_completed_cache_ttl() -> u64 {
    86_400
}

fn default_max_connections() -> u32 {
    10
}

fn default_api_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    9090
}

impl Config {
    /// Load configuration from `RELAYER_CONFIG` (default `config.yaml`) and the environment
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded .env from {:?}", path);
        }
        let path = env::var("RELAYER_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_file(&path)
    }

    /// Load from a specific file path; the file is optional
    pub fn load_from_file(path: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(path).required(false));
        Self::build(builder)
    }

    /// Parse configuration from an in-memory document, still applying environment overrides
    pub fn from_str_with_format(contents: &str, format: config::FileFormat) -> Result<Self> {
        let builder =
            config::Config::builder().add_source(config::File::from_str(contents, format));
        Self::build(builder)
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let raw = builder
            .add_source(
                config::Environment::with_prefix("RELAYER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("filters.forwarding_channel_whitelist"),
            )
            .build()
            .wrap_err("Failed to read configuration sources")?;

        let config: Config = raw
            .try_deserialize()
            .wrap_err("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.source.rpc_urls().is_empty() {
            return Err(eyre!("source.rpc_url cannot be empty"));
        }

        if self.source.message_transmitter.len() != 42
            || !self.source.message_transmitter.starts_with("0x")
        {
            return Err(eyre!(
                "source.message_transmitter must be a valid hex address (42 chars with 0x prefix)"
            ));
        }

        if self.source.max_block_range == 0 {
            return Err(eyre!("source.max_block_range must be greater than 0"));
        }

        if self.source.reconnect_initial_ms == 0
            || self.source.reconnect_initial_ms > self.source.reconnect_max_ms
        {
            return Err(eyre!(
                "source.reconnect_initial_ms must be > 0 and <= source.reconnect_max_ms"
            ));
        }

        if self.destination.lcd_url.is_empty() {
            return Err(eyre!("destination.lcd_url cannot be empty"));
        }

        if self.destination.chain_id.is_empty() {
            return Err(eyre!("destination.chain_id cannot be empty"));
        }

        let mnemonic_words: Vec<&str> = self.destination.mnemonic.split_whitespace().collect();
        if mnemonic_words.len() < 12 {
            return Err(eyre!("destination.mnemonic must have at least 12 words"));
        }

        if self.destination.gas_price < 0.0 {
            return Err(eyre!("destination.gas_price cannot be negative"));
        }

        if self.attestation.base_url.is_empty() {
            return Err(eyre!("attestation.base_url cannot be empty"));
        }

        if self.attestation.initial_backoff_ms == 0
            || self.attestation.initial_backoff_ms > self.attestation.max_backoff_ms
        {
            return Err(eyre!(
                "attestation.initial_backoff_ms must be > 0 and <= attestation.max_backoff_ms"
            ));
        }

        if self.attestation.max_concurrent == 0 {
            return Err(eyre!("attestation.max_concurrent must be greater than 0"));
        }

        if self.submission.initial_backoff_ms > self.submission.max_backoff_ms {
            return Err(eyre!(
                "submission.initial_backoff_ms cannot exceed submission.max_backoff_ms"
            ));
        }

        if self.pipeline.queue_capacity == 0 {
            return Err(eyre!("pipeline.queue_capacity must be greater than 0"));
        }

        // One pipeline relays to one destination domain; entries for any other are dead
        let destination = self.destination.domain;
        if let Some(domain) = self.filters.enabled_routes.keys().find(|d| **d != destination) {
            return Err(eyre!(
                "filters.enabled_routes.{} does not match destination.domain {}",
                domain,
                destination
            ));
        }
        if let Some(domain) = self.filters.minters.keys().find(|d| **d != destination) {
            return Err(eyre!(
                "filters.minters.{} does not match destination.domain {}",
                domain,
                destination
            ));
        }

        for (domain, minter) in &self.filters.minters {
            bech32::decode(minter).map_err(|e| {
                eyre!(
                    "filters.minters.{} is not a valid bech32 address ({}): {}",
                    domain,
                    minter,
                    e
                )
            })?;
        }

        if self.filters.filter_forwards_by_channel
            && self.filters.forwarding_channel_whitelist.is_empty()
        {
            warn!("filter_forwards_by_channel is enabled with an empty whitelist; every forward will be filtered");
        }

        if !self
            .filters
            .enabled_routes
            .contains_key(&self.destination.domain)
        {
            warn!(
                domain = self.destination.domain,
                "Destination domain has no enabled route; every message will be filtered"
            );
        }

        Ok(())
    }
}

//! Mark service configuration
//!
//! Static configuration comes from a YAML document (chains, assets, rebalance
//! routes, tuning knobs); deployment secrets and endpoints come from the
//! environment and override the file. `AppConfig::load` merges both.

use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::adapters::SupportedBridge;
use crate::amount::Amount;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level service configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub database_url: String,
    #[serde(default)]
    pub signer: SignerConfig,
    #[serde(default)]
    pub everclear_api_url: String,
    #[serde(default)]
    pub admin_token: String,
    #[serde(default = "defaults::listen_port")]
    pub listen_port: u16,

    /// Top-N chains the hub settles on with the least friction.
    #[serde(default)]
    pub supported_settlement_domains: Vec<u64>,
    #[serde(default)]
    pub supported_asset_symbols: Vec<String>,

    /// Maximum invoice age in seconds before it is considered stale; invoices
    /// younger than `min_invoice_age` are retried later.
    #[serde(default = "defaults::invoice_age")]
    pub invoice_age_secs: u64,
    #[serde(default = "defaults::min_invoice_age")]
    pub min_invoice_age_secs: u64,

    #[serde(default = "defaults::max_destinations")]
    pub max_destinations: usize,

    /// Consumer pool size; 0 means "CPU count".
    #[serde(default)]
    pub consumer_workers: usize,

    #[serde(default = "defaults::tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "defaults::poll_interval")]
    pub poll_interval_secs: u64,

    /// Chain id -> chain settings. BTreeMap keeps candidate iteration
    /// deterministic.
    #[serde(default)]
    pub chains: BTreeMap<u64, ChainConfig>,

    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    #[serde(default)]
    pub rebalance: RebalanceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "defaults::redis_host")]
    pub host: String,
    #[serde(default = "defaults::redis_port")]
    pub port: u16,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: defaults::redis_host(),
            port: defaults::redis_port(),
        }
    }
}

impl RedisConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SignerConfig {
    #[serde(default)]
    pub url: String,
    /// Mark's own address; sender of every intent and bridge transaction.
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    #[serde(default)]
    pub providers: Vec<String>,
    /// Hub spoke contract receiving new-intent transactions on this chain.
    #[serde(default)]
    pub spoke: String,
    #[serde(default)]
    pub assets: Vec<AssetConfig>,
    /// Wrap submitted transactions through a Safe-role policy module.
    #[serde(default)]
    pub safe_module: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssetConfig {
    pub symbol: String,
    /// Canonical hub identifier for the asset (keccak of the symbol).
    pub ticker_hash: String,
    pub address: String,
    pub decimals: u32,
    /// XERC20-only deployments cannot be purchased against.
    #[serde(default)]
    pub is_xerc20: bool,
}

/// One bridge preference on a route, with its slippage tolerance.
#[derive(Debug, Deserialize, Clone)]
pub struct BridgePreference {
    pub bridge: SupportedBridge,
    #[serde(default = "defaults::slippage_dbps")]
    pub slippage_dbps: u32,
}

/// A configured transfer lane. Routes with `maximum` set participate in
/// threshold rebalancing; every route is a candidate for on-demand
/// rebalancing toward its destination.
#[derive(Debug, Deserialize, Clone)]
pub struct RouteConfig {
    pub origin: u64,
    pub destination: u64,
    pub ticker_hash: String,
    /// Intermediate chain for two-leg bridges (origin -> via -> destination).
    #[serde(default)]
    pub via: Option<u64>,
    /// Threshold rebalancing triggers when the origin balance exceeds this.
    #[serde(default)]
    pub maximum: Option<Amount>,
    /// Balance left behind after a threshold rebalance; defaults to `maximum`.
    #[serde(default)]
    pub reserve: Option<Amount>,
    pub preferences: Vec<BridgePreference>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RebalanceConfig {
    /// Shortfalls below this canonical amount are not worth bridging.
    #[serde(default = "defaults::min_rebalance_amount")]
    pub min_rebalance_amount: Amount,
    /// Pending earmarks older than this expire.
    #[serde(default = "defaults::earmark_ttl")]
    pub earmark_ttl_secs: u64,
    /// Slippage rejections tolerated before an operation is cancelled.
    #[serde(default = "defaults::max_route_retries")]
    pub max_route_retries: u32,
    /// Upper bound on destination-readiness polling (attestation services).
    #[serde(default = "defaults::attestation_timeout")]
    pub attestation_timeout_secs: u64,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            min_rebalance_amount: defaults::min_rebalance_amount(),
            earmark_ttl_secs: defaults::earmark_ttl(),
            max_route_retries: defaults::max_route_retries(),
            attestation_timeout_secs: defaults::attestation_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_dir")]
    pub log_dir: String,
    #[serde(default = "defaults::log_file")]
    pub log_file: String,
    /// "hourly" | "daily" | "never"
    #[serde(default = "defaults::rotation")]
    pub rotation: String,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default)]
    pub use_json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: defaults::log_dir(),
            log_file: defaults::log_file(),
            rotation: defaults::rotation(),
            log_level: defaults::log_level(),
            use_json: false,
        }
    }
}

mod defaults {
    use crate::amount::Amount;

    pub fn listen_port() -> u16 {
        8080
    }
    pub fn redis_host() -> String {
        "127.0.0.1".to_string()
    }
    pub fn redis_port() -> u16 {
        6379
    }
    pub fn invoice_age() -> u64 {
        3600
    }
    pub fn min_invoice_age() -> u64 {
        5
    }
    pub fn max_destinations() -> usize {
        7
    }
    pub fn tick_interval() -> u64 {
        30
    }
    pub fn poll_interval() -> u64 {
        60
    }
    pub fn slippage_dbps() -> u32 {
        // 30 bps
        300
    }
    pub fn min_rebalance_amount() -> Amount {
        // 1 token in canonical units
        crate::amount::canonical(1)
    }
    pub fn earmark_ttl() -> u64 {
        24 * 3600
    }
    pub fn max_route_retries() -> u32 {
        5
    }
    pub fn attestation_timeout() -> u64 {
        30 * 60
    }
    pub fn log_dir() -> String {
        "logs".to_string()
    }
    pub fn log_file() -> String {
        "mark.log".to_string()
    }
    pub fn rotation() -> String {
        "daily".to_string()
    }
    pub fn log_level() -> String {
        "info".to_string()
    }
}

impl AppConfig {
    /// Load configuration from a YAML file, then apply environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment variables take precedence over the file so deployments can
    /// inject secrets without editing the YAML.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("REDIS_HOST") {
            self.redis.host = host;
        }
        if let Ok(port) = std::env::var("REDIS_PORT")
            && let Ok(port) = port.parse()
        {
            self.redis.port = port;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(url) = std::env::var("SIGNER_URL") {
            self.signer.url = url;
        }
        if let Ok(address) = std::env::var("SIGNER_ADDRESS") {
            self.signer.address = address;
        }
        if let Ok(url) = std::env::var("EVERCLEAR_API_URL") {
            self.everclear_api_url = url;
        }
        if let Ok(token) = std::env::var("ADMIN_TOKEN") {
            self.admin_token = token;
        }
        if let Ok(domains) = std::env::var("SUPPORTED_SETTLEMENT_DOMAINS") {
            self.supported_settlement_domains = domains
                .split(',')
                .filter_map(|d| d.trim().parse().ok())
                .collect();
        }
        if let Ok(symbols) = std::env::var("SUPPORTED_ASSET_SYMBOLS") {
            self.supported_asset_symbols = symbols
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(age) = std::env::var("INVOICE_AGE")
            && let Ok(age) = age.parse()
        {
            self.invoice_age_secs = age;
        }
        // Per-chain provider overrides: CHAIN_<id>_PROVIDERS=url1,url2
        for (id, chain) in self.chains.iter_mut() {
            if let Ok(providers) = std::env::var(format!("CHAIN_{id}_PROVIDERS")) {
                chain.providers = providers
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::Invalid("database_url is required".into()));
        }
        if self.everclear_api_url.is_empty() {
            return Err(ConfigError::Invalid("everclear_api_url is required".into()));
        }
        for route in &self.routes {
            if route.preferences.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "route {} -> {} has no bridge preferences",
                    route.origin, route.destination
                )));
            }
            if !self.chains.contains_key(&route.origin)
                || !self.chains.contains_key(&route.destination)
            {
                return Err(ConfigError::Invalid(format!(
                    "route {} -> {} references an unconfigured chain",
                    route.origin, route.destination
                )));
            }
        }
        Ok(())
    }

    /// Number of consumer workers; 0 in config means "CPU count".
    pub fn worker_count(&self) -> usize {
        if self.consumer_workers > 0 {
            self.consumer_workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }

    pub fn asset(&self, chain_id: u64, ticker_hash: &str) -> Option<&AssetConfig> {
        self.chains
            .get(&chain_id)?
            .assets
            .iter()
            .find(|a| a.ticker_hash.eq_ignore_ascii_case(ticker_hash))
    }

    /// Asset decimals on a chain; canonical 18 when unknown.
    pub fn asset_decimals(&self, chain_id: u64, ticker_hash: &str) -> u32 {
        self.asset(chain_id, ticker_hash)
            .map(|a| a.decimals)
            .unwrap_or(crate::amount::CANONICAL_DECIMALS)
    }

    /// All routes matching an origin/destination/ticker triple, in config
    /// order (the order is the operator's preference).
    pub fn find_routes(
        &self,
        origin: Option<u64>,
        destination: u64,
        ticker_hash: &str,
    ) -> Vec<&RouteConfig> {
        self.routes
            .iter()
            .filter(|r| {
                r.destination == destination
                    && r.ticker_hash.eq_ignore_ascii_case(ticker_hash)
                    && origin.is_none_or(|o| r.origin == o)
            })
            .collect()
    }
}

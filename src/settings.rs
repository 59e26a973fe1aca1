use config::{Config, ConfigError, File};
use ethers::types::Address;
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::adapters::{V3AdapterConfig, V4AdapterConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct Chain {
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

impl Default for Chain {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
        }
    }
}

/// Protocol addresses as they appear in Config.toml. Everything is kept as a
/// string here and parsed once through [`Contracts::parse`].
#[derive(Debug, Clone, Deserialize)]
pub struct Contracts {
    pub v3_factory: String,
    pub v3_quoter: String,
    pub v3_router: String,
    pub v4_state_view: String,
    pub v4_quoter: String,
    pub universal_router: String,
    pub permit2: String,
    pub multicall: String,
    pub weth: String,
}

/// Typed counterpart of [`Contracts`] after address validation.
#[derive(Debug, Clone, Copy)]
pub struct ChainContracts {
    pub v3_factory: Address,
    pub v3_quoter: Address,
    pub v3_router: Address,
    pub v4_state_view: Address,
    pub v4_quoter: Address,
    pub universal_router: Address,
    pub permit2: Address,
    pub multicall: Address,
    pub weth: Address,
}

fn parse_address(label: &str, raw: &str) -> Result<Address, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::Message(format!("invalid {} address '{}': {}", label, raw, e)))
}

impl Contracts {
    pub fn parse(&self) -> Result<ChainContracts, ConfigError> {
        Ok(ChainContracts {
            v3_factory: parse_address("v3_factory", &self.v3_factory)?,
            v3_quoter: parse_address("v3_quoter", &self.v3_quoter)?,
            v3_router: parse_address("v3_router", &self.v3_router)?,
            v4_state_view: parse_address("v4_state_view", &self.v4_state_view)?,
            v4_quoter: parse_address("v4_quoter", &self.v4_quoter)?,
            universal_router: parse_address("universal_router", &self.universal_router)?,
            permit2: parse_address("permit2", &self.permit2)?,
            multicall: parse_address("multicall", &self.multicall)?,
            weth: parse_address("weth", &self.weth)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rpc {
    pub http_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_quote_timeout_secs")]
    pub quote_timeout_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Trade {
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_true")]
    pub allow_approximate: bool,
    #[serde(default = "default_true")]
    pub auto_approve: bool,
    #[serde(default = "default_gas_buffer_pct")]
    pub gas_buffer_pct: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity: u64,
    #[serde(default = "default_native_gas_reserve_wei")]
    pub native_gas_reserve_wei: u64,
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
    #[serde(default = "default_permit2_validity_secs")]
    pub permit2_validity_secs: u64,
}

impl Default for Trade {
    fn default() -> Self {
        Self {
            slippage_bps: default_slippage_bps(),
            deadline_secs: default_deadline_secs(),
            debounce_ms: default_debounce_ms(),
            allow_approximate: default_true(),
            auto_approve: default_true(),
            gas_buffer_pct: default_gas_buffer_pct(),
            max_retries: default_max_retries(),
            min_liquidity: default_min_liquidity(),
            native_gas_reserve_wei: default_native_gas_reserve_wei(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            permit2_validity_secs: default_permit2_validity_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Routing {
    #[serde(default)]
    pub intermediates: Vec<String>,
    #[serde(default = "default_weight_output")]
    pub weight_output: f64,
    #[serde(default = "default_weight_impact")]
    pub weight_impact: f64,
    #[serde(default = "default_weight_gas")]
    pub weight_gas: f64,
    #[serde(default = "default_base_gas")]
    pub base_gas: u64,
    #[serde(default = "default_per_hop_gas")]
    pub per_hop_gas: u64,
    #[serde(default = "default_gas_price_gwei")]
    pub gas_price_gwei: f64,
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            intermediates: Vec::new(),
            weight_output: default_weight_output(),
            weight_impact: default_weight_impact(),
            weight_gas: default_weight_gas(),
            base_gas: default_base_gas(),
            per_hop_gas: default_per_hop_gas(),
            gas_price_gwei: default_gas_price_gwei(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub chain: Chain,
    pub contracts: Contracts,
    pub rpc: Rpc,
    #[serde(default)]
    pub trade: Trade,
    #[serde(default)]
    pub routing: Routing,
    #[serde(default)]
    pub log: LogSettings,
}

fn default_chain_id() -> u64 {
    1
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_quote_timeout_secs() -> u64 {
    8
}

fn default_batch_size() -> usize {
    100
}

fn default_slippage_bps() -> u32 {
    50
}

fn default_deadline_secs() -> u64 {
    20 * 60
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_gas_buffer_pct() -> u64 {
    20
}

fn default_max_retries() -> usize {
    3
}

fn default_min_liquidity() -> u64 {
    0
}

fn default_native_gas_reserve_wei() -> u64 {
    5_000_000_000_000_000
}

fn default_confirm_timeout_secs() -> u64 {
    180
}

fn default_permit2_validity_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_weight_output() -> f64 {
    0.7
}

fn default_weight_impact() -> f64 {
    0.2
}

fn default_weight_gas() -> f64 {
    0.1
}

fn default_base_gas() -> u64 {
    150_000
}

fn default_per_hop_gas() -> u64 {
    80_000
}

fn default_gas_price_gwei() -> f64 {
    30.0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Loads Config.toml from the working directory and applies ROUTER_*
    /// environment overrides on top.
    pub fn new() -> Result<Self, ConfigError> {
        let mut settings: Settings = Config::builder()
            .add_source(File::with_name("Config.toml"))
            .build()?
            .try_deserialize()?;

        if let Ok(url) = env::var("ROUTER_RPC_HTTP_URL") {
            settings.rpc.http_url = url;
        }
        if let Ok(chain_id) = env::var("ROUTER_CHAIN_ID") {
            settings.chain.chain_id = chain_id
                .parse()
                .map_err(|e| ConfigError::Message(format!("invalid ROUTER_CHAIN_ID: {}", e)))?;
        }
        if let Ok(level) = env::var("ROUTER_LOG_LEVEL") {
            settings.log.level = level;
        }
        if let Ok(bps) = env::var("ROUTER_SLIPPAGE_BPS") {
            settings.trade.slippage_bps = bps
                .parse()
                .map_err(|e| ConfigError::Message(format!("invalid ROUTER_SLIPPAGE_BPS: {}", e)))?;
        }

        Ok(settings)
    }

    pub fn quote_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.quote_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.request_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.trade.debounce_ms)
    }

    pub fn v3_adapter_config(&self, contracts: &ChainContracts) -> V3AdapterConfig {
        V3AdapterConfig {
            factory: contracts.v3_factory,
            quoter: contracts.v3_quoter,
            router: contracts.v3_router,
            weth: contracts.weth,
            min_liquidity: self.trade.min_liquidity as u128,
            quote_timeout: self.quote_timeout(),
        }
    }

    pub fn v4_adapter_config(&self, contracts: &ChainContracts) -> V4AdapterConfig {
        V4AdapterConfig {
            state_view: contracts.v4_state_view,
            quoter: contracts.v4_quoter,
            universal_router: contracts.universal_router,
            permit2: contracts.permit2,
            min_liquidity: self.trade.min_liquidity as u128,
            quote_timeout: self.quote_timeout(),
        }
    }

    pub fn intermediate_addresses(&self) -> Result<Vec<Address>, ConfigError> {
        self.routing
            .intermediates
            .iter()
            .map(|raw| parse_address("intermediate", raw))
            .collect()
    }
}

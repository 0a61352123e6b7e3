//! Exchange configuration types and loader
//!
//! The core consumes a small, fixed set of fields; everything is
//! serde-deserializable from YAML with conservative defaults so a partial
//! file still boots a usable simulator.

use serde::Deserialize;
use std::path::Path;

use crate::errors::ExchangeError;

/// Listener and publisher endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_udp_group")]
    pub udp_group: String,
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
}

/// One tradable symbol
///
/// `tick_size` and `lot_size` are informational; the core does not enforce
/// them.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolConfig {
    pub name: String,
    #[serde(default)]
    pub tick_size: f64,
    #[serde(default)]
    pub lot_size: u64,
    #[serde(default = "default_collar_pct")]
    pub price_collar_pct: f64,
}

/// Pre-trade risk limits
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_order_size")]
    pub max_order_size: u64,
    /// Whole-currency cap on per-client open notional
    #[serde(default = "default_max_notional")]
    pub max_notional_per_client: u64,
    #[serde(default = "default_max_rate")]
    pub max_orders_per_second: u32,
    #[serde(default)]
    pub price_collar_enabled: bool,
}

/// Arena and ring sizing
#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_pool_size")]
    pub order_pool_size: usize,
    /// Default ring capacity; must be a power of two
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Session housekeeping knobs
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Expected client heartbeat cadence; sessions idle past three intervals
    /// are closed
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,
    /// Consecutive malformed frames tolerated before the session is dropped
    #[serde(default = "default_max_protocol_errors")]
    pub max_protocol_errors: u32,
}

/// Complete exchange configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub symbols: Vec<SymbolConfig>,
    #[serde(default = "default_risk")]
    pub risk: RiskConfig,
    #[serde(default = "default_performance")]
    pub performance: PerformanceConfig,
    #[serde(default = "default_gateway")]
    pub gateway: GatewayConfig,
}

fn default_name() -> String {
    "tickmatch".to_string()
}
fn default_tcp_port() -> u16 {
    9090
}
fn default_udp_group() -> String {
    "239.0.0.1".to_string()
}
fn default_udp_port() -> u16 {
    9999
}
fn default_collar_pct() -> f64 {
    10.0
}
fn default_max_order_size() -> u64 {
    100_000
}
fn default_max_notional() -> u64 {
    10_000_000
}
fn default_max_rate() -> u32 {
    1_000
}
fn default_pool_size() -> usize {
    65_536
}
fn default_queue_capacity() -> usize {
    16_384
}
fn default_heartbeat_ms() -> u64 {
    5_000
}
fn default_max_protocol_errors() -> u32 {
    10
}
fn default_risk() -> RiskConfig {
    RiskConfig {
        max_order_size: default_max_order_size(),
        max_notional_per_client: default_max_notional(),
        max_orders_per_second: default_max_rate(),
        price_collar_enabled: false,
    }
}
fn default_performance() -> PerformanceConfig {
    PerformanceConfig {
        order_pool_size: default_pool_size(),
        queue_capacity: default_queue_capacity(),
    }
}
fn default_gateway() -> GatewayConfig {
    GatewayConfig {
        heartbeat_interval_ms: default_heartbeat_ms(),
        max_protocol_errors: default_max_protocol_errors(),
    }
}

impl Config {
    /// Load and validate a YAML config file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ExchangeError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity checks that would otherwise surface as startup panics deep in
    /// the pipeline
    pub fn validate(&self) -> Result<(), ExchangeError> {
        if self.symbols.is_empty() {
            return Err(ExchangeError::Config("no symbols configured".into()));
        }
        for symbol in &self.symbols {
            if symbol.name.is_empty() || symbol.name.len() > 8 {
                return Err(ExchangeError::Config(format!(
                    "symbol name '{}' must be 1..=8 bytes",
                    symbol.name
                )));
            }
        }
        if self.performance.order_pool_size == 0 {
            return Err(ExchangeError::Config("order_pool_size must be > 0".into()));
        }
        if !self.performance.queue_capacity.is_power_of_two() {
            return Err(ExchangeError::Config(format!(
                "queue_capacity {} is not a power of two",
                self.performance.queue_capacity
            )));
        }
        if self.risk.max_order_size == 0 {
            return Err(ExchangeError::Config("max_order_size must be > 0".into()));
        }
        Ok(())
    }
}

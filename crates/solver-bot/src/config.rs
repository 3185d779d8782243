//! Application configuration.
//!
//! Loaded from a TOML file; secrets come only from the environment (the
//! config names the variables, never the values).

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use solver_core::{TokenInfo, TokenKind, TokenTable};
use solver_hedger::HedgerConfig;
use solver_quoter::{QuoterConfig, SpreadConfig};
use solver_risk::RiskConfig;

/// One token table entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    /// Wire identifier including the standard prefix.
    pub id: String,
    pub symbol: String,
    pub decimals: u32,
    pub kind: TokenKind,
}

/// Perpetual venue endpoints and hedge parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueSection {
    /// Mainnet/testnet switch for the exchange endpoints.
    #[serde(default = "default_true")]
    pub mainnet: bool,
    #[serde(default = "default_info_url")]
    pub info_url: String,
    #[serde(default = "default_venue_ws_url")]
    pub ws_url: String,
    /// Trading account address on the venue.
    pub user_address: String,
    #[serde(default = "default_coin")]
    pub coin: String,
    #[serde(default = "default_hedge_slippage_bps")]
    pub hedge_slippage_bps: f64,
    #[serde(default = "default_max_orderbook_age_ms")]
    pub max_orderbook_age_ms: i64,
    /// Environment variable holding the venue agent key.
    #[serde(default = "default_venue_key_env")]
    pub key_env: String,
}

fn default_true() -> bool {
    true
}

fn default_info_url() -> String {
    "https://api.hyperliquid.xyz/info".to_string()
}

fn default_venue_ws_url() -> String {
    "wss://api.hyperliquid.xyz/ws".to_string()
}

fn default_coin() -> String {
    "BTC".to_string()
}

fn default_hedge_slippage_bps() -> f64 {
    10.0
}

fn default_max_orderbook_age_ms() -> i64 {
    10_000
}

fn default_venue_key_env() -> String {
    "VENUE_SECRET_KEY".to_string()
}

/// Settlement-chain endpoints and identities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSection {
    pub rpc_url: String,
    #[serde(default = "default_intents_contract")]
    pub intents_contract: String,
    pub solver_account_id: String,
    /// Environment variable holding the Ed25519 secret key.
    #[serde(default = "default_chain_key_env")]
    pub key_env: String,
}

fn default_intents_contract() -> String {
    "intents.near".to_string()
}

fn default_chain_key_env() -> String {
    "SOLVER_SECRET_KEY".to_string()
}

/// Relay endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    pub ws_url: String,
    #[serde(default = "default_quote_channel")]
    pub quote_channel: String,
    #[serde(default = "default_settlement_channel")]
    pub settlement_channel: String,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    /// Quote lifetime added on top of the request's minimum deadline.
    #[serde(default = "default_quote_ttl_ms")]
    pub quote_ttl_ms: i64,
}

fn default_quote_channel() -> String {
    "quote".to_string()
}

fn default_settlement_channel() -> String {
    "quote_status".to_string()
}

fn default_publish_timeout_ms() -> u64 {
    8_000
}

fn default_quote_ttl_ms() -> i64 {
    60_000
}

/// Spot feed for the dynamic spread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotSection {
    pub primary_url: String,
    #[serde(default)]
    pub fallback_url: Option<String>,
    #[serde(default = "default_spot_refresh_secs")]
    pub refresh_secs: u64,
}

fn default_spot_refresh_secs() -> u64 {
    10
}

/// Drift watchdog parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogSection {
    #[serde(default = "default_drift_threshold_btc")]
    pub drift_threshold_btc: f64,
    #[serde(default = "default_watchdog_interval_secs")]
    pub interval_secs: u64,
}

fn default_drift_threshold_btc() -> f64 {
    0.05
}

fn default_watchdog_interval_secs() -> u64 {
    600
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            drift_threshold_btc: default_drift_threshold_btc(),
            interval_secs: default_watchdog_interval_secs(),
        }
    }
}

/// Audit stream location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSection {
    pub data_dir: String,
    #[serde(default = "default_audit_buffer")]
    pub buffer_size: usize,
}

fn default_audit_buffer() -> usize {
    50
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            data_dir: "./data/audit".to_string(),
            buffer_size: default_audit_buffer(),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub venue: VenueSection,
    pub chain: ChainSection,
    pub relay: RelaySection,
    pub tokens: Vec<TokenEntry>,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub quoter: QuoterConfig,
    #[serde(default)]
    pub spread: SpreadConfig,
    #[serde(default)]
    pub spot: Option<SpotSection>,
    #[serde(default)]
    pub hedger: HedgerConfig,
    #[serde(default)]
    pub watchdog: WatchdogSection,
    #[serde(default)]
    pub audit: AuditSection,
}

impl AppConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("failed to read {path}: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("failed to parse {path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.spread.dynamic_enabled && self.spot.is_none() {
            return Err(AppError::Config(
                "dynamic spread enabled without a [spot] section".to_string(),
            ));
        }
        if self.quoter.min_trade_size_btc >= self.quoter.max_trade_size_btc {
            return Err(AppError::Config(
                "min_trade_size_btc must be below max_trade_size_btc".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the immutable token table.
    pub fn token_table(&self) -> AppResult<TokenTable> {
        let tokens = self
            .tokens
            .iter()
            .map(|entry| TokenInfo::new(&entry.id, &entry.symbol, entry.decimals, entry.kind))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TokenTable::new(tokens)?)
    }

    /// Read a secret from the environment variable named in the config.
    pub fn secret_from_env(var_name: &str) -> AppResult<String> {
        std::env::var(var_name)
            .map_err(|_| AppError::Config(format!("environment variable {var_name} not set")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [venue]
        user_address = "0x1234"

        [chain]
        rpc_url = "https://rpc.mainnet.near.org"
        solver_account_id = "solver.near"

        [relay]
        ws_url = "wss://solver-relay.example/ws"

        [[tokens]]
        id = "nep141:btc.omft.near"
        symbol = "BTC"
        decimals = 8
        kind = "btc"

        [[tokens]]
        id = "nep141:usdc.omft.near"
        symbol = "USDC"
        decimals = 6
        kind = "usd"
    "#;

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let config: AppConfig = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert!(config.venue.mainnet);
        assert_eq!(config.venue.coin, "BTC");
        assert_eq!(config.relay.quote_channel, "quote");
        assert_eq!(config.chain.intents_contract, "intents.near");
        assert_eq!(config.hedger.poll_interval_ms, 1_500);
        assert!(!config.spread.dynamic_enabled);

        let table = config.token_table().unwrap();
        assert!(table.get("nep141:btc.omft.near").is_some());
    }

    #[test]
    fn test_dynamic_spread_requires_spot_section() {
        let mut config: AppConfig = toml::from_str(MINIMAL).unwrap();
        config.spread.dynamic_enabled = true;
        assert!(config.validate().is_err());

        config.spot = Some(SpotSection {
            primary_url: "https://api.example/spot".to_string(),
            fallback_url: None,
            refresh_secs: 10,
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_size_bounds_validated() {
        let mut config: AppConfig = toml::from_str(MINIMAL).unwrap();
        config.quoter.min_trade_size_btc = 2.0;
        config.quoter.max_trade_size_btc = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config: AppConfig = toml::from_str(MINIMAL).unwrap();
        let rendered = toml::to_string(&config).unwrap();
        let back: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(back.chain.solver_account_id, "solver.near");
        assert_eq!(back.tokens.len(), 2);
    }
}

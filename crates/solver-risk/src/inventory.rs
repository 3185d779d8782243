//! Inventory manager: snapshot refresh and the quote-direction policy.

use crate::error::RiskResult;
use crate::snapshot::RiskSnapshot;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use solver_chain::ChainClient;
use solver_core::{now_ms, HedgeDirection, QuoteDirection, TokenTable};
use solver_venue::VenueClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Risk policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Cap on absolute perp/spot BTC exposure.
    pub max_btc_inventory: f64,
    /// Floor on USD stablecoin balance required to buy BTC.
    pub min_usd_reserve: f64,
    /// Smallest tradeable BTC size.
    pub min_trade_size_btc: f64,
    /// Quotes halt below this free venue margin, USD.
    pub min_margin_threshold: f64,
    /// Snapshot staleness cutoff.
    #[serde(default = "default_snapshot_max_age_ms")]
    pub snapshot_max_age_ms: i64,
    /// Refresh cadence.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

fn default_snapshot_max_age_ms() -> i64 {
    30_000
}

fn default_refresh_interval_ms() -> u64 {
    5_000
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_btc_inventory: 5.0,
            min_usd_reserve: 1_000.0,
            min_trade_size_btc: 0.0001,
            min_margin_threshold: 500.0,
            snapshot_max_age_ms: default_snapshot_max_age_ms(),
            refresh_interval_ms: default_refresh_interval_ms(),
        }
    }
}

/// Owner of the risk snapshot and the emergency flag.
///
/// The refresher task is the only snapshot writer; the hedger flips the
/// emergency flag through [`set_emergency`](Self::set_emergency) /
/// [`clear_emergency`](Self::clear_emergency). All read paths are
/// synchronous.
pub struct InventoryManager {
    config: RiskConfig,
    snapshot: RwLock<Option<RiskSnapshot>>,
    emergency: AtomicBool,
    refresh_inflight: AtomicBool,
}

impl InventoryManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            snapshot: RwLock::new(None),
            emergency: AtomicBool::new(false),
            refresh_inflight: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Latest snapshot, fresh or not.
    pub fn snapshot(&self) -> Option<RiskSnapshot> {
        *self.snapshot.read()
    }

    /// Replace the snapshot wholesale.
    ///
    /// Called by the refresher; exposed so tests and startup code can
    /// install a known state.
    pub fn install_snapshot(&self, snapshot: RiskSnapshot) {
        *self.snapshot.write() = Some(snapshot);
    }

    /// Whether emergency mode is active.
    pub fn emergency_mode(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    /// Enter emergency mode: new BTC purchases stop, existing inventory
    /// may still be sold down.
    pub fn set_emergency(&self, reason: &str) {
        if !self.emergency.swap(true, Ordering::SeqCst) {
            warn!(reason, "EMERGENCY MODE ENGAGED");
        }
    }

    /// Leave emergency mode (after a successful hedge).
    pub fn clear_emergency(&self) {
        if self.emergency.swap(false, Ordering::SeqCst) {
            info!("Emergency mode cleared");
        }
    }

    /// Derive the allowed quote direction from the cached snapshot.
    pub fn get_quote_direction(&self) -> QuoteDirection {
        if self.emergency_mode() {
            return QuoteDirection::SellOnly;
        }

        let snapshot = match self.snapshot() {
            Some(s) if s.is_fresh(self.config.snapshot_max_age_ms) => s,
            _ => return QuoteDirection::None,
        };

        if snapshot.margin_usd < self.config.min_margin_threshold {
            return QuoteDirection::None;
        }

        let can_buy = snapshot.usd_on_chain > self.config.min_usd_reserve
            && snapshot.btc_on_chain < self.config.max_btc_inventory;
        let can_sell = snapshot.btc_on_chain > self.config.min_trade_size_btc;

        match (can_buy, can_sell) {
            (true, true) => QuoteDirection::Both,
            (true, false) => QuoteDirection::BuyOnly,
            (false, true) => QuoteDirection::SellOnly,
            (false, false) => QuoteDirection::None,
        }
    }

    /// Whether the projected perpetual position after a hedge of `size`
    /// stays within the inventory cap.
    pub fn check_position_capacity(&self, direction: HedgeDirection, size: f64) -> bool {
        let snapshot = match self.snapshot() {
            Some(s) => s,
            None => return false,
        };
        let projected = match direction {
            HedgeDirection::Short => snapshot.perp_btc - size,
            HedgeDirection::Long => snapshot.perp_btc + size,
        };
        projected.abs() <= self.config.max_btc_inventory
    }

    /// Cached hourly funding rate.
    pub fn get_funding_rate(&self) -> Option<f64> {
        self.snapshot().map(|s| s.funding_rate_hourly)
    }

    /// Compose a fresh snapshot from venue and chain state.
    ///
    /// Venue fetches and per-token balances run in parallel; the result
    /// is written atomically. Overlapping calls are rejected by a
    /// single-flight flag.
    pub async fn refresh_snapshot(
        &self,
        venue: &VenueClient,
        chain: &Arc<ChainClient>,
        tokens: &TokenTable,
    ) -> RiskResult<RiskSnapshot> {
        if self
            .refresh_inflight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(crate::error::RiskError::RefreshInFlight);
        }

        let result = self.refresh_inner(venue, chain, tokens).await;
        self.refresh_inflight.store(false, Ordering::SeqCst);
        result
    }

    async fn refresh_inner(
        &self,
        venue: &VenueClient,
        chain: &Arc<ChainClient>,
        tokens: &TokenTable,
    ) -> RiskResult<RiskSnapshot> {
        let (account, funding, btc_on_chain, usd_on_chain) = tokio::join!(
            venue.clearinghouse_state(),
            venue.funding_rate_hourly(),
            sum_balances(chain, tokens.btc_tokens()),
            sum_balances(chain, tokens.usd_tokens()),
        );

        let account = account?;
        let funding_rate_hourly = funding?;

        let snapshot = RiskSnapshot {
            updated_at_ms: now_ms(),
            margin_usd: account.free_margin_usd(),
            perp_btc: account.perp_btc,
            funding_rate_hourly,
            btc_on_chain,
            usd_on_chain,
        };

        self.install_snapshot(snapshot);
        debug!(
            margin_usd = snapshot.margin_usd,
            perp_btc = snapshot.perp_btc,
            funding = snapshot.funding_rate_hourly,
            btc_on_chain = snapshot.btc_on_chain,
            usd_on_chain = snapshot.usd_on_chain,
            "Risk snapshot refreshed"
        );
        Ok(snapshot)
    }
}

async fn sum_balances(
    chain: &Arc<ChainClient>,
    tokens: impl Iterator<Item = &solver_core::TokenInfo>,
) -> f64 {
    let mut total = 0.0;
    for token in tokens {
        let raw = chain.get_balance(&token.wire_id).await;
        match token.from_base_units(&raw.to_string()) {
            Ok(amount) => total += amount,
            Err(e) => warn!(token = %token.symbol, ?e, "Unconvertible balance"),
        }
    }
    total
}

/// Periodic snapshot refresher. Errors are swallowed: a failed cycle
/// simply lets the snapshot age out, which halts quoting by itself.
pub async fn run_refresher(
    manager: Arc<InventoryManager>,
    venue: Arc<VenueClient>,
    chain: Arc<ChainClient>,
    tokens: Arc<TokenTable>,
    shutdown: CancellationToken,
) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(manager.config.refresh_interval_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("Risk refresher shutting down");
                return;
            }
            _ = interval.tick() => {
                if let Err(e) = manager.refresh_snapshot(&venue, &chain, &tokens).await {
                    warn!(?e, "Snapshot refresh failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> InventoryManager {
        InventoryManager::new(RiskConfig {
            max_btc_inventory: 5.0,
            min_usd_reserve: 1_000.0,
            min_trade_size_btc: 0.001,
            min_margin_threshold: 500.0,
            snapshot_max_age_ms: 30_000,
            refresh_interval_ms: 5_000,
        })
    }

    fn healthy_snapshot() -> RiskSnapshot {
        RiskSnapshot {
            updated_at_ms: now_ms(),
            margin_usd: 10_000.0,
            perp_btc: -0.5,
            funding_rate_hourly: 0.00001,
            btc_on_chain: 1.0,
            usd_on_chain: 50_000.0,
        }
    }

    #[test]
    fn test_no_snapshot_means_no_quotes() {
        let m = manager();
        assert_eq!(m.get_quote_direction(), QuoteDirection::None);
    }

    #[test]
    fn test_stale_snapshot_means_no_quotes() {
        let m = manager();
        m.install_snapshot(RiskSnapshot {
            updated_at_ms: now_ms() - 60_000,
            ..healthy_snapshot()
        });
        assert_eq!(m.get_quote_direction(), QuoteDirection::None);
    }

    #[test]
    fn test_healthy_state_quotes_both() {
        let m = manager();
        m.install_snapshot(healthy_snapshot());
        assert_eq!(m.get_quote_direction(), QuoteDirection::Both);
    }

    #[test]
    fn test_low_margin_halts() {
        let m = manager();
        m.install_snapshot(RiskSnapshot {
            margin_usd: 100.0,
            ..healthy_snapshot()
        });
        assert_eq!(m.get_quote_direction(), QuoteDirection::None);
    }

    #[test]
    fn test_no_usd_reserve_blocks_buys() {
        let m = manager();
        m.install_snapshot(RiskSnapshot {
            usd_on_chain: 500.0,
            ..healthy_snapshot()
        });
        assert_eq!(m.get_quote_direction(), QuoteDirection::SellOnly);
    }

    #[test]
    fn test_no_btc_inventory_blocks_sells() {
        let m = manager();
        m.install_snapshot(RiskSnapshot {
            btc_on_chain: 0.0,
            ..healthy_snapshot()
        });
        assert_eq!(m.get_quote_direction(), QuoteDirection::BuyOnly);
    }

    #[test]
    fn test_btc_cap_blocks_buys() {
        let m = manager();
        m.install_snapshot(RiskSnapshot {
            btc_on_chain: 6.0,
            ..healthy_snapshot()
        });
        assert_eq!(m.get_quote_direction(), QuoteDirection::SellOnly);
    }

    #[test]
    fn test_emergency_overrides_everything() {
        let m = manager();
        m.install_snapshot(healthy_snapshot());
        m.set_emergency("test");
        assert_eq!(m.get_quote_direction(), QuoteDirection::SellOnly);
        assert!(m.emergency_mode());

        m.clear_emergency();
        assert_eq!(m.get_quote_direction(), QuoteDirection::Both);
    }

    #[test]
    fn test_position_capacity_short() {
        let m = manager();
        m.install_snapshot(RiskSnapshot {
            perp_btc: -4.999,
            ..healthy_snapshot()
        });
        // Projected -5.009 breaches the 5.0 cap
        assert!(!m.check_position_capacity(HedgeDirection::Short, 0.01));
        // Going long reduces the short, always allowed here
        assert!(m.check_position_capacity(HedgeDirection::Long, 0.01));
    }

    #[test]
    fn test_position_capacity_long() {
        let m = manager();
        m.install_snapshot(RiskSnapshot {
            perp_btc: 4.5,
            ..healthy_snapshot()
        });
        assert!(m.check_position_capacity(HedgeDirection::Long, 0.5));
        assert!(!m.check_position_capacity(HedgeDirection::Long, 0.51));
    }

    #[test]
    fn test_capacity_without_snapshot_denies() {
        let m = manager();
        assert!(!m.check_position_capacity(HedgeDirection::Short, 0.01));
    }

    #[test]
    fn test_funding_rate_from_snapshot() {
        let m = manager();
        assert!(m.get_funding_rate().is_none());
        m.install_snapshot(healthy_snapshot());
        assert_eq!(m.get_funding_rate(), Some(0.00001));
    }
}

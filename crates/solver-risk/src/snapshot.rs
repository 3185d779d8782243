//! The atomic risk snapshot.

use solver_core::now_ms;

/// All risk-relevant state from one refresh cycle.
///
/// Produced atomically: every field comes from the same cycle, and the
/// whole object is replaced rather than mutated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskSnapshot {
    /// When this snapshot was composed, ms since epoch.
    pub updated_at_ms: i64,
    /// Free venue margin, USD.
    pub margin_usd: f64,
    /// Signed BTC perpetual position (positive = long).
    pub perp_btc: f64,
    /// Hourly funding rate, decimal.
    pub funding_rate_hourly: f64,
    /// On-chain BTC inventory across the BTC-pegged set.
    pub btc_on_chain: f64,
    /// On-chain USD inventory across the USD-pegged set.
    pub usd_on_chain: f64,
}

impl RiskSnapshot {
    /// Age relative to `now`.
    pub fn age_ms(&self, now: i64) -> i64 {
        now - self.updated_at_ms
    }

    /// Whether the snapshot is young enough to quote from.
    pub fn is_fresh(&self, max_age_ms: i64) -> bool {
        self.age_ms(now_ms()) <= max_age_ms
    }
}

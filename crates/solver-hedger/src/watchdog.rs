//! Delta-drift watchdog.
//!
//! Periodic sanity check: on-chain spot BTC plus the perpetual position
//! should net out near zero. Drift beyond the threshold is alerted, not
//! corrected. Each pass also logs a status summary and the quoter's
//! rejection histogram, then resets the counters.

use serde::Serialize;
use solver_core::QuoteDirection;
use solver_quoter::QuoterStats;
use solver_risk::{InventoryManager, RiskSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Watchdog configuration.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Net-delta alert trigger, BTC.
    pub drift_threshold_btc: f64,
    /// Check cadence.
    pub interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            drift_threshold_btc: 0.05,
            interval: Duration::from_secs(600),
        }
    }
}

/// Solver status summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolverStatus {
    Ready,
    Idle,
    LowMargin,
    Emergency,
}

impl std::fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "READY"),
            Self::Idle => write!(f, "IDLE"),
            Self::LowMargin => write!(f, "LOW_MARGIN"),
            Self::Emergency => write!(f, "EMERGENCY"),
        }
    }
}

/// One watchdog pass, surfaced for the position audit stream.
#[derive(Debug, Clone)]
pub struct WatchdogReport {
    pub snapshot: Option<RiskSnapshot>,
    pub net_delta_btc: f64,
    pub drift_alert: bool,
    pub status: SolverStatus,
}

fn derive_status(inventory: &InventoryManager) -> SolverStatus {
    if inventory.emergency_mode() {
        return SolverStatus::Emergency;
    }
    match inventory.snapshot() {
        Some(snapshot) if snapshot.margin_usd < inventory.config().min_margin_threshold => {
            SolverStatus::LowMargin
        }
        _ => match inventory.get_quote_direction() {
            QuoteDirection::None => SolverStatus::Idle,
            _ => SolverStatus::Ready,
        },
    }
}

/// One check: compute drift and status, log, and reset the counters.
pub fn run_check(
    config: &WatchdogConfig,
    inventory: &InventoryManager,
    stats: &QuoterStats,
) -> WatchdogReport {
    let snapshot = inventory.snapshot();
    let net_delta_btc = snapshot
        .map(|s| s.btc_on_chain + s.perp_btc)
        .unwrap_or(0.0);
    let drift_alert = net_delta_btc.abs() > config.drift_threshold_btc;
    let status = derive_status(inventory);

    if drift_alert {
        warn!(
            net_delta_btc,
            threshold = config.drift_threshold_btc,
            "DRIFT ALERT: spot + perp exposure out of band"
        );
    }

    let counters = stats.snapshot_and_reset();
    info!(
        status = ?status,
        net_delta_btc,
        received = counters.received,
        generated = counters.generated,
        rejections = ?counters
            .rejections
            .iter()
            .filter(|(_, n)| *n > 0)
            .collect::<Vec<_>>(),
        "Watchdog summary"
    );

    WatchdogReport {
        snapshot,
        net_delta_btc,
        drift_alert,
        status,
    }
}

/// Periodic watchdog loop; each report is also handed to the position
/// audit stream.
pub async fn run_watchdog(
    config: WatchdogConfig,
    inventory: Arc<InventoryManager>,
    stats: Arc<QuoterStats>,
    reports: mpsc::UnboundedSender<WatchdogReport>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The immediate first tick would report before any snapshot exists.
    interval.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("Watchdog shutting down");
                return;
            }
            _ = interval.tick() => {
                let report = run_check(&config, &inventory, &stats);
                if reports.send(report).is_err() {
                    warn!("Watchdog report receiver dropped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solver_core::{now_ms, RejectReason};
    use solver_risk::RiskConfig;

    fn inventory_with(snapshot: RiskSnapshot) -> InventoryManager {
        let inventory = InventoryManager::new(RiskConfig::default());
        inventory.install_snapshot(snapshot);
        inventory
    }

    fn snapshot(btc_on_chain: f64, perp_btc: f64) -> RiskSnapshot {
        RiskSnapshot {
            updated_at_ms: now_ms(),
            margin_usd: 10_000.0,
            perp_btc,
            funding_rate_hourly: 0.0,
            btc_on_chain,
            usd_on_chain: 50_000.0,
        }
    }

    #[test]
    fn test_flat_book_no_alert() {
        let config = WatchdogConfig::default();
        let inventory = inventory_with(snapshot(1.0, -1.0));
        let stats = QuoterStats::new();

        let report = run_check(&config, &inventory, &stats);
        assert!(!report.drift_alert);
        assert!(report.net_delta_btc.abs() < 1e-12);
        assert_eq!(report.status, SolverStatus::Ready);
    }

    #[test]
    fn test_drift_beyond_threshold_alerts() {
        let config = WatchdogConfig {
            drift_threshold_btc: 0.05,
            ..WatchdogConfig::default()
        };
        let inventory = inventory_with(snapshot(1.0, -0.9));
        let stats = QuoterStats::new();

        let report = run_check(&config, &inventory, &stats);
        assert!(report.drift_alert);
        assert!((report.net_delta_btc - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_status_low_margin() {
        let inventory = inventory_with(RiskSnapshot {
            margin_usd: 100.0,
            ..snapshot(1.0, -1.0)
        });
        let stats = QuoterStats::new();
        let report = run_check(&WatchdogConfig::default(), &inventory, &stats);
        assert_eq!(report.status, SolverStatus::LowMargin);
    }

    #[test]
    fn test_status_emergency_wins() {
        let inventory = inventory_with(snapshot(1.0, -1.0));
        inventory.set_emergency("test");
        let stats = QuoterStats::new();
        let report = run_check(&WatchdogConfig::default(), &inventory, &stats);
        assert_eq!(report.status, SolverStatus::Emergency);
    }

    #[test]
    fn test_status_idle_without_snapshot() {
        let inventory = InventoryManager::new(RiskConfig::default());
        let stats = QuoterStats::new();
        let report = run_check(&WatchdogConfig::default(), &inventory, &stats);
        assert_eq!(report.status, SolverStatus::Idle);
        assert!(!report.drift_alert);
    }

    #[test]
    fn test_counters_reset_after_check() {
        let inventory = inventory_with(snapshot(1.0, -1.0));
        let stats = QuoterStats::new();
        stats.record_received();
        stats.record_rejection(RejectReason::OrderbookStale);

        run_check(&WatchdogConfig::default(), &inventory, &stats);
        let after = stats.snapshot();
        assert_eq!(after.received, 0);
        assert_eq!(after.total_rejections(), 0);
    }
}

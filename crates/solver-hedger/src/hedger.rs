//! The settlement -> hedge pipeline.
//!
//! Settlement is observed on two independent, idempotent paths: relay
//! notifications matched by quote hash, and chain polling over the
//! pending nonces. Whichever path fires first removes the record from
//! both indexes and marks the nonce hedged; the other path then
//! short-circuits. Hedge failures engage emergency mode and leave the
//! venue position untouched.

use crate::tracker::{BoundedSet, PendingQuote, QuoteTracker};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use solver_chain::{ChainClient, ChainResult};
use solver_core::{now_ms, HedgeDirection};
use solver_risk::InventoryManager;
use solver_venue::{BoxFuture, HedgeFill, VenueClient, VenueResult};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Hedged-nonce guard capacity; the oldest fifth is evicted past this.
const HEDGED_SET_CAP: usize = 500;
/// Competing-solver log dedup window.
const COMPETING_CACHE_CAP: usize = 200;

/// Which detection path observed a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementSource {
    Event,
    Poll,
}

/// Lifecycle events emitted for the audit stream.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    SettlementDetected {
        nonce_b64: String,
        quote_hash: String,
        source: SettlementSource,
        /// Set when the hedge was skipped (e.g. "hedging_disabled").
        reason: Option<&'static str>,
    },
    HedgeExecuted {
        nonce_b64: String,
        quote_hash: String,
        direction: HedgeDirection,
        size: f64,
        price: f64,
        /// `sign * (hedge_price - quoted_price) * size`; present when the
        /// quoted price is known.
        pnl_estimate: Option<f64>,
    },
    HedgeFailed {
        nonce_b64: String,
        quote_hash: String,
        direction: HedgeDirection,
        size: f64,
        error: String,
    },
    QuoteExpired {
        nonce_b64: String,
        quote_hash: String,
    },
}

/// Narrow venue seam: the one operation that mutates perp exposure.
pub trait HedgeVenue: Send + Sync {
    fn execute_hedge(
        &self,
        direction: HedgeDirection,
        size: f64,
    ) -> BoxFuture<'_, VenueResult<HedgeFill>>;
}

impl HedgeVenue for VenueClient {
    fn execute_hedge(
        &self,
        direction: HedgeDirection,
        size: f64,
    ) -> BoxFuture<'_, VenueResult<HedgeFill>> {
        Box::pin(async move { VenueClient::execute_hedge(self, direction, size).await })
    }
}

/// Narrow chain seam: nonce consumption checks for the polling path.
pub trait NonceView: Send + Sync {
    fn was_nonce_used(&self, nonce: [u8; 32]) -> BoxFuture<'_, ChainResult<bool>>;
}

impl NonceView for ChainClient {
    fn was_nonce_used(&self, nonce: [u8; 32]) -> BoxFuture<'_, ChainResult<bool>> {
        Box::pin(async move { ChainClient::was_nonce_used(self, &nonce).await })
    }
}

/// Hedger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgerConfig {
    /// Polling-fallback cadence.
    pub poll_interval_ms: u64,
    /// Nonces checked per batch.
    pub batch_size: usize,
    /// Pause between batches, to stay under the RPC rate limit.
    pub batch_pause_ms: u64,
    /// Safety window past the quote deadline before a record expires.
    pub expiry_grace_ms: i64,
    /// Consecutive failed poll batches before emergency mode.
    pub max_consecutive_rpc_failures: u32,
    /// Circuit breaker: skip venue orders entirely when false.
    pub hedging_enabled: bool,
}

impl Default for HedgerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_500,
            batch_size: 5,
            batch_pause_ms: 50,
            expiry_grace_ms: 30_000,
            max_consecutive_rpc_failures: 5,
            hedging_enabled: true,
        }
    }
}

/// Settlement detector and hedge executor.
pub struct Hedger {
    config: HedgerConfig,
    tracker: QuoteTracker,
    hedged: Mutex<BoundedSet>,
    competing_seen: Mutex<BoundedSet>,
    venue: Arc<dyn HedgeVenue>,
    chain: Arc<dyn NonceView>,
    inventory: Arc<InventoryManager>,
    events: mpsc::UnboundedSender<LifecycleEvent>,
    consecutive_rpc_failures: AtomicU32,
}

impl Hedger {
    pub fn new(
        config: HedgerConfig,
        venue: Arc<dyn HedgeVenue>,
        chain: Arc<dyn NonceView>,
        inventory: Arc<InventoryManager>,
        events: mpsc::UnboundedSender<LifecycleEvent>,
    ) -> Self {
        Self {
            config,
            tracker: QuoteTracker::new(),
            hedged: Mutex::new(BoundedSet::new(HEDGED_SET_CAP, 5)),
            competing_seen: Mutex::new(BoundedSet::new(COMPETING_CACHE_CAP, COMPETING_CACHE_CAP)),
            venue,
            chain,
            inventory,
            events,
            consecutive_rpc_failures: AtomicU32::new(0),
        }
    }

    /// Track a quote. Call only after the publish acknowledgement: a
    /// settlement notification arriving before tracking is treated as a
    /// competing solver's win, which is harmless.
    pub fn track_quote(&self, quote: PendingQuote) {
        debug!(
            nonce = %quote.nonce_b64,
            quote_hash = %quote.quote_hash,
            direction = %quote.hedge_direction,
            size = quote.btc_size,
            "Tracking published quote"
        );
        self.tracker.track(quote);
    }

    /// Number of quotes awaiting settlement.
    pub fn pending_count(&self) -> usize {
        self.tracker.len()
    }

    /// Event-driven path: a settlement notification from the relay.
    pub async fn on_settlement_event(&self, quote_hash: &str, intent_hash: &str) {
        match self.tracker.remove_by_hash(quote_hash) {
            Some(record) => self.settle(record, SettlementSource::Event).await,
            None => {
                // Not ours. Log once per intent hash; duplicates are
                // common when the relay fans out.
                if self.competing_seen.lock().insert(intent_hash) {
                    info!(quote_hash, intent_hash, "Settlement for another solver");
                }
            }
        }
    }

    /// Shared settle sequence: mark hedged exactly once, then execute.
    async fn settle(&self, record: Arc<PendingQuote>, source: SettlementSource) {
        if !self.hedged.lock().insert(&record.nonce_b64) {
            debug!(nonce = %record.nonce_b64, ?source, "Nonce already hedged");
            return;
        }

        if !self.config.hedging_enabled {
            warn!(
                nonce = %record.nonce_b64,
                ?source,
                "Settlement detected with hedging disabled"
            );
            self.emit(LifecycleEvent::SettlementDetected {
                nonce_b64: record.nonce_b64.clone(),
                quote_hash: record.quote_hash.clone(),
                source,
                reason: Some("hedging_disabled"),
            });
            return;
        }

        self.emit(LifecycleEvent::SettlementDetected {
            nonce_b64: record.nonce_b64.clone(),
            quote_hash: record.quote_hash.clone(),
            source,
            reason: None,
        });

        match self
            .venue
            .execute_hedge(record.hedge_direction, record.btc_size)
            .await
        {
            Ok(fill) => {
                let pnl_estimate = record
                    .quoted_price
                    .map(|quoted| {
                        record.hedge_direction.pnl_sign() * (fill.avg_price - quoted) * record.btc_size
                    });
                info!(
                    nonce = %record.nonce_b64,
                    direction = %record.hedge_direction,
                    size = record.btc_size,
                    price = fill.avg_price,
                    pnl_estimate,
                    "HEDGE_EXECUTED"
                );
                self.emit(LifecycleEvent::HedgeExecuted {
                    nonce_b64: record.nonce_b64.clone(),
                    quote_hash: record.quote_hash.clone(),
                    direction: record.hedge_direction,
                    size: record.btc_size,
                    price: fill.avg_price,
                    pnl_estimate,
                });
                self.inventory.clear_emergency();
            }
            Err(e) => {
                // The unhedged exposure is operator territory; no
                // corrective trade is attempted.
                error!(
                    nonce = %record.nonce_b64,
                    direction = %record.hedge_direction,
                    size = record.btc_size,
                    ?e,
                    "HEDGE_FAILED"
                );
                self.inventory.set_emergency("hedge failure");
                self.emit(LifecycleEvent::HedgeFailed {
                    nonce_b64: record.nonce_b64.clone(),
                    quote_hash: record.quote_hash.clone(),
                    direction: record.hedge_direction,
                    size: record.btc_size,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Polling fallback. Runs until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Hedger poll loop shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.sweep_expired();
                    self.poll_cycle().await;
                }
            }
        }
    }

    /// Expiry runs before every poll cycle; expired records never
    /// generate hedges.
    fn sweep_expired(&self) {
        for record in self
            .tracker
            .sweep_expired(now_ms(), self.config.expiry_grace_ms)
        {
            info!(
                nonce = %record.nonce_b64,
                quote_hash = %record.quote_hash,
                "QUOTE_EXPIRED"
            );
            self.emit(LifecycleEvent::QuoteExpired {
                nonce_b64: record.nonce_b64.clone(),
                quote_hash: record.quote_hash.clone(),
            });
        }
    }

    /// One polling pass over the pending nonces, in rate-limited batches.
    pub async fn poll_cycle(&self) {
        let pending = self.tracker.pending();
        if pending.is_empty() {
            return;
        }

        let mut first = true;
        for batch in pending.chunks(self.config.batch_size.max(1)) {
            if !first {
                tokio::time::sleep(Duration::from_millis(self.config.batch_pause_ms)).await;
            }
            first = false;

            let mut batch_ok = true;
            for record in batch {
                match self.chain.was_nonce_used(record.nonce).await {
                    Ok(true) => {
                        if let Some(record) = self.tracker.remove_by_nonce(&record.nonce_b64) {
                            self.settle(record, SettlementSource::Poll).await;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(nonce = %record.nonce_b64, ?e, "Nonce check failed");
                        batch_ok = false;
                    }
                }
            }

            self.note_batch_outcome(batch_ok);
        }
    }

    fn note_batch_outcome(&self, batch_ok: bool) {
        if batch_ok {
            self.consecutive_rpc_failures.store(0, Ordering::SeqCst);
            return;
        }
        let failures = self.consecutive_rpc_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.config.max_consecutive_rpc_failures {
            self.inventory.set_emergency("consecutive rpc failures");
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        if self.events.send(event).is_err() {
            warn!("Lifecycle event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solver_risk::{RiskConfig, RiskSnapshot};
    use solver_venue::VenueError;
    use std::collections::HashSet;

    struct MockVenue {
        hedges: Mutex<Vec<(HedgeDirection, f64)>>,
        failing: std::sync::atomic::AtomicBool,
    }

    impl MockVenue {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                hedges: Mutex::new(Vec::new()),
                failing: std::sync::atomic::AtomicBool::new(false),
            })
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn hedge_count(&self) -> usize {
            self.hedges.lock().len()
        }
    }

    impl HedgeVenue for MockVenue {
        fn execute_hedge(
            &self,
            direction: HedgeDirection,
            size: f64,
        ) -> BoxFuture<'_, VenueResult<HedgeFill>> {
            Box::pin(async move {
                if self.failing.load(Ordering::SeqCst) {
                    return Err(VenueError::OrderRejected("mock".to_string()));
                }
                self.hedges.lock().push((direction, size));
                Ok(HedgeFill {
                    direction,
                    size,
                    avg_price: 100_050.0,
                    order_id: 7,
                })
            })
        }
    }

    struct MockChain {
        used: Mutex<HashSet<[u8; 32]>>,
        failing: std::sync::atomic::AtomicBool,
    }

    impl MockChain {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                used: Mutex::new(HashSet::new()),
                failing: std::sync::atomic::AtomicBool::new(false),
            })
        }

        fn mark_used(&self, nonce: [u8; 32]) {
            self.used.lock().insert(nonce);
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    impl NonceView for MockChain {
        fn was_nonce_used(&self, nonce: [u8; 32]) -> BoxFuture<'_, ChainResult<bool>> {
            Box::pin(async move {
                if self.failing.load(Ordering::SeqCst) {
                    return Err(solver_chain::ChainError::Rpc("mock".to_string()));
                }
                Ok(self.used.lock().contains(&nonce))
            })
        }
    }

    struct Fixture {
        hedger: Arc<Hedger>,
        venue: Arc<MockVenue>,
        chain: Arc<MockChain>,
        inventory: Arc<InventoryManager>,
        events: mpsc::UnboundedReceiver<LifecycleEvent>,
    }

    fn fixture_with(config: HedgerConfig) -> Fixture {
        let venue = MockVenue::new();
        let chain = MockChain::new();
        let inventory = Arc::new(InventoryManager::new(RiskConfig::default()));
        inventory.install_snapshot(RiskSnapshot {
            updated_at_ms: now_ms(),
            margin_usd: 10_000.0,
            perp_btc: 0.0,
            funding_rate_hourly: 0.0,
            btc_on_chain: 1.0,
            usd_on_chain: 50_000.0,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let hedger = Arc::new(Hedger::new(
            config,
            venue.clone(),
            chain.clone(),
            inventory.clone(),
            tx,
        ));
        Fixture {
            hedger,
            venue,
            chain,
            inventory,
            events: rx,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(HedgerConfig::default())
    }

    fn quote(nonce_byte: u8, hash: &str) -> PendingQuote {
        PendingQuote {
            nonce: [nonce_byte; 32],
            nonce_b64: format!("nonce-{nonce_byte}"),
            quote_hash: hash.to_string(),
            hedge_direction: HedgeDirection::Short,
            btc_size: 0.01,
            deadline_ms: now_ms() + 60_000,
            first_seen_ms: now_ms(),
            quoted_price: Some(100_000.0),
            spread_bps: Some(30.0),
        }
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_event_path_hedges_once() {
        let mut f = fixture();
        f.hedger.track_quote(quote(1, "H1"));

        f.hedger.on_settlement_event("H1", "I1").await;

        assert_eq!(f.venue.hedge_count(), 1);
        assert_eq!(f.hedger.pending_count(), 0);
        let events = drain(&mut f.events);
        assert!(matches!(events[0], LifecycleEvent::SettlementDetected { .. }));
        assert!(matches!(events[1], LifecycleEvent::HedgeExecuted { .. }));
    }

    #[tokio::test]
    async fn test_pnl_estimate_short() {
        let mut f = fixture();
        f.hedger.track_quote(quote(1, "H1"));
        f.hedger.on_settlement_event("H1", "I1").await;

        let events = drain(&mut f.events);
        match &events[1] {
            LifecycleEvent::HedgeExecuted { pnl_estimate, .. } => {
                // SHORT: +(100050 - 100000) * 0.01 = +0.5
                assert!((pnl_estimate.unwrap() - 0.5).abs() < 1e-9);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_double_settlement_single_hedge() {
        // Event and poll observe the same settlement in the same tick.
        let mut f = fixture();
        f.hedger.track_quote(quote(1, "H1"));
        f.chain.mark_used([1u8; 32]);

        f.hedger.on_settlement_event("H1", "I1").await;
        f.hedger.poll_cycle().await;

        assert_eq!(f.venue.hedge_count(), 1);
        let hedge_executions = drain(&mut f.events)
            .iter()
            .filter(|e| matches!(e, LifecycleEvent::HedgeExecuted { .. }))
            .count();
        assert_eq!(hedge_executions, 1);
    }

    #[tokio::test]
    async fn test_poll_path_detects_settlement() {
        let mut f = fixture();
        f.hedger.track_quote(quote(2, "H2"));
        f.chain.mark_used([2u8; 32]);

        f.hedger.poll_cycle().await;

        assert_eq!(f.venue.hedge_count(), 1);
        assert_eq!(f.hedger.pending_count(), 0);
        let events = drain(&mut f.events);
        assert!(matches!(
            events[0],
            LifecycleEvent::SettlementDetected {
                source: SettlementSource::Poll,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unsettled_nonces_stay_tracked() {
        let f = fixture();
        f.hedger.track_quote(quote(3, "H3"));
        f.hedger.poll_cycle().await;
        assert_eq!(f.venue.hedge_count(), 0);
        assert_eq!(f.hedger.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_competing_solver_logged_once_no_hedge() {
        let f = fixture();
        f.hedger.on_settlement_event("H-other", "I-other").await;
        f.hedger.on_settlement_event("H-other", "I-other").await;

        assert_eq!(f.venue.hedge_count(), 0);
        assert_eq!(f.hedger.competing_seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_hedge_failure_trips_emergency_and_success_clears() {
        let mut f = fixture();
        f.venue.set_failing(true);
        f.hedger.track_quote(quote(1, "H1"));
        f.hedger.on_settlement_event("H1", "I1").await;

        assert!(f.inventory.emergency_mode());
        let events = drain(&mut f.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, LifecycleEvent::HedgeFailed { .. })));

        // The next successful hedge clears emergency mode.
        f.venue.set_failing(false);
        f.hedger.track_quote(quote(2, "H2"));
        f.hedger.on_settlement_event("H2", "I2").await;
        assert!(!f.inventory.emergency_mode());
    }

    #[tokio::test]
    async fn test_expired_quote_never_hedges() {
        let mut f = fixture();
        let mut expired = quote(4, "H4");
        expired.deadline_ms = now_ms() - 40_000;
        f.hedger.track_quote(expired);
        f.chain.mark_used([4u8; 32]);

        f.hedger.sweep_expired();
        f.hedger.poll_cycle().await;

        assert_eq!(f.venue.hedge_count(), 0);
        let events = drain(&mut f.events);
        assert!(matches!(events[0], LifecycleEvent::QuoteExpired { .. }));
        // A late settlement event for the expired quote is treated as
        // someone else's.
        f.hedger.on_settlement_event("H4", "I4").await;
        assert_eq!(f.venue.hedge_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_hedging_marks_without_order() {
        let mut f = fixture_with(HedgerConfig {
            hedging_enabled: false,
            ..HedgerConfig::default()
        });
        f.hedger.track_quote(quote(5, "H5"));
        f.chain.mark_used([5u8; 32]);

        f.hedger.poll_cycle().await;

        assert_eq!(f.venue.hedge_count(), 0);
        let events = drain(&mut f.events);
        match &events[0] {
            LifecycleEvent::SettlementDetected { reason, .. } => {
                assert_eq!(*reason, Some("hedging_disabled"));
            }
            other => panic!("unexpected: {other:?}"),
        }

        // Reprocessing is blocked by the hedged mark.
        f.hedger.on_settlement_event("H5", "I5").await;
        assert_eq!(f.venue.hedge_count(), 0);
    }

    #[tokio::test]
    async fn test_consecutive_rpc_failures_trip_emergency() {
        let f = fixture();
        f.hedger.track_quote(quote(6, "H6"));
        f.chain.set_failing(true);

        for _ in 0..4 {
            f.hedger.poll_cycle().await;
            assert!(!f.inventory.emergency_mode());
        }
        f.hedger.poll_cycle().await;
        assert!(f.inventory.emergency_mode());

        // A clean batch resets the counter (emergency itself clears only
        // on a successful hedge).
        f.chain.set_failing(false);
        f.hedger.poll_cycle().await;
        assert_eq!(
            f.hedger.consecutive_rpc_failures.load(Ordering::SeqCst),
            0
        );
    }
}

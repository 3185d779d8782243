//! Pending-quote tracking.
//!
//! Each tracked quote lives in two indexes, `by_nonce` and
//! `by_quote_hash`, pointing at the same record. Any removal takes the
//! record out of both indexes under one lock, so the indexes can never
//! disagree.

use parking_lot::Mutex;
use solver_core::HedgeDirection;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// A published quote awaiting settlement or expiry.
#[derive(Debug, Clone)]
pub struct PendingQuote {
    /// Raw 32-byte nonce, needed for chain polling.
    pub nonce: [u8; 32],
    /// Base64 nonce, the tracking key.
    pub nonce_b64: String,
    /// Relay-addressable digest of the signed intent.
    pub quote_hash: String,
    pub hedge_direction: HedgeDirection,
    pub btc_size: f64,
    /// Quote deadline, absolute ms.
    pub deadline_ms: i64,
    /// When tracking began, absolute ms.
    pub first_seen_ms: i64,
    /// Final per-BTC price, for realized-P&L estimates.
    pub quoted_price: Option<f64>,
    pub spread_bps: Option<f64>,
}

#[derive(Default)]
struct Indexes {
    by_nonce: HashMap<String, Arc<PendingQuote>>,
    by_hash: HashMap<String, Arc<PendingQuote>>,
}

/// Dual-index store of pending quotes.
#[derive(Default)]
pub struct QuoteTracker {
    inner: Mutex<Indexes>,
}

impl QuoteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a quote into both indexes.
    pub fn track(&self, quote: PendingQuote) {
        let record = Arc::new(quote);
        let mut guard = self.inner.lock();
        guard
            .by_nonce
            .insert(record.nonce_b64.clone(), Arc::clone(&record));
        guard.by_hash.insert(record.quote_hash.clone(), record);
    }

    /// Remove by quote hash; the nonce index entry goes with it.
    pub fn remove_by_hash(&self, quote_hash: &str) -> Option<Arc<PendingQuote>> {
        let mut guard = self.inner.lock();
        let record = guard.by_hash.remove(quote_hash)?;
        guard.by_nonce.remove(&record.nonce_b64);
        Some(record)
    }

    /// Remove by nonce; the hash index entry goes with it.
    pub fn remove_by_nonce(&self, nonce_b64: &str) -> Option<Arc<PendingQuote>> {
        let mut guard = self.inner.lock();
        let record = guard.by_nonce.remove(nonce_b64)?;
        guard.by_hash.remove(&record.quote_hash);
        Some(record)
    }

    /// Whether a quote hash is currently tracked.
    pub fn contains_hash(&self, quote_hash: &str) -> bool {
        self.inner.lock().by_hash.contains_key(quote_hash)
    }

    /// Snapshot of all pending records, oldest first.
    pub fn pending(&self) -> Vec<Arc<PendingQuote>> {
        let guard = self.inner.lock();
        let mut records: Vec<_> = guard.by_nonce.values().cloned().collect();
        records.sort_by_key(|r| r.first_seen_ms);
        records
    }

    /// Remove and return every record past `deadline + grace`.
    pub fn sweep_expired(&self, now_ms: i64, grace_ms: i64) -> Vec<Arc<PendingQuote>> {
        let mut guard = self.inner.lock();
        let expired: Vec<String> = guard
            .by_nonce
            .values()
            .filter(|r| now_ms > r.deadline_ms + grace_ms)
            .map(|r| r.nonce_b64.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|nonce| {
                let record = guard.by_nonce.remove(&nonce)?;
                guard.by_hash.remove(&record.quote_hash);
                Some(record)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_nonce.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn index_sizes(&self) -> (usize, usize) {
        let guard = self.inner.lock();
        (guard.by_nonce.len(), guard.by_hash.len())
    }
}

/// Insertion-ordered set with a capacity cap.
///
/// When the cap is exceeded, the oldest `cap / evict_divisor` entries are
/// dropped in one sweep. Used for the hedged-nonce idempotency guard and
/// the competing-solver log dedup.
pub struct BoundedSet {
    set: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
    evict_divisor: usize,
}

impl BoundedSet {
    pub fn new(cap: usize, evict_divisor: usize) -> Self {
        Self {
            set: HashSet::with_capacity(cap),
            order: VecDeque::with_capacity(cap),
            cap,
            evict_divisor: evict_divisor.max(1),
        }
    }

    /// Insert a key. Returns `false` if it was already present.
    pub fn insert(&mut self, key: &str) -> bool {
        if !self.set.insert(key.to_string()) {
            return false;
        }
        self.order.push_back(key.to_string());

        if self.set.len() > self.cap {
            let evict = (self.cap / self.evict_divisor).max(1);
            for _ in 0..evict {
                if let Some(old) = self.order.pop_front() {
                    self.set.remove(&old);
                }
            }
        }
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.set.contains(key)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

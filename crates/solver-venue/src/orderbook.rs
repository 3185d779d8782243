//! L2 order book snapshot with VWAP evaluation.
//!
//! The book is a whole-object replacement under a read-write lock: the
//! stream task writes complete snapshots, readers always observe a
//! coherent book and are never blocked by in-flight I/O.

use crate::error::{VenueError, VenueResult};
use parking_lot::RwLock;
use solver_core::{now_ms, BookSide};
use std::sync::Arc;

/// Residual tolerance when walking levels; absorbs float drift on the
/// last partial level.
const VWAP_RESIDUAL_TOLERANCE: f64 = 1e-6;

/// One price level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Last-known L2 snapshot.
///
/// Bids are sorted descending, asks ascending; the first pair is best
/// bid / best ask. `best_bid <= best_ask` whenever both sides are
/// non-empty.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub last_update_ms: i64,
}

impl OrderBook {
    /// Age of the snapshot relative to `now`.
    pub fn age_ms(&self, now: i64) -> i64 {
        now - self.last_update_ms
    }

    fn side(&self, side: BookSide) -> &[BookLevel] {
        match side {
            BookSide::Bid => &self.bids,
            BookSide::Ask => &self.asks,
        }
    }

    /// Volume-weighted average price for `size` walked across the levels
    /// of `side` in price order.
    ///
    /// Consumes `min(level_size, remaining)` at each level. Freshness is
    /// not checked here; see [`SharedOrderBook::vwap`].
    pub fn vwap(&self, side: BookSide, size: f64) -> VenueResult<f64> {
        let levels = self.side(side);
        if levels.is_empty() {
            return Err(VenueError::BookEmpty);
        }
        if size <= 0.0 || !size.is_finite() {
            return Err(VenueError::InsufficientLiquidity {
                requested: size,
                available: 0.0,
            });
        }

        let mut remaining = size;
        let mut notional = 0.0;
        for level in levels {
            let take = level.size.min(remaining);
            notional += take * level.price;
            remaining -= take;
            if remaining <= VWAP_RESIDUAL_TOLERANCE {
                return Ok(notional / size);
            }
        }

        Err(VenueError::InsufficientLiquidity {
            requested: size,
            available: size - remaining,
        })
    }

    /// Best bid price, if any.
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    /// Best ask price, if any.
    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Mid price from the first level on each side.
    pub fn mid(&self) -> Option<f64> {
        Some((self.best_bid()? + self.best_ask()?) / 2.0)
    }

    /// Absolute top-of-book spread.
    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask()? - self.best_bid()?)
    }
}

/// Shared handle over the process-long order book singleton.
#[derive(Clone)]
pub struct SharedOrderBook {
    inner: Arc<RwLock<OrderBook>>,
    max_age_ms: i64,
}

impl SharedOrderBook {
    /// Create an empty book with the given staleness cutoff.
    pub fn new(max_age_ms: i64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(OrderBook::default())),
            max_age_ms,
        }
    }

    /// Replace the snapshot wholesale.
    pub fn replace(&self, book: OrderBook) {
        *self.inner.write() = book;
    }

    /// Timestamp of the last update, ms since epoch (0 before the first
    /// frame).
    pub fn last_update_ms(&self) -> i64 {
        self.inner.read().last_update_ms
    }

    /// Age of the current snapshot.
    pub fn age_ms(&self) -> i64 {
        self.inner.read().age_ms(now_ms())
    }

    /// Whether the snapshot is within the staleness cutoff.
    pub fn is_fresh(&self) -> bool {
        let guard = self.inner.read();
        guard.last_update_ms > 0 && guard.age_ms(now_ms()) <= self.max_age_ms
    }

    /// VWAP with the freshness gate applied.
    pub fn vwap(&self, side: BookSide, size: f64) -> VenueResult<f64> {
        let guard = self.inner.read();
        let age = guard.age_ms(now_ms());
        if guard.last_update_ms == 0 || age > self.max_age_ms {
            return Err(VenueError::BookStale { age_ms: age });
        }
        guard.vwap(side, size)
    }

    /// Best bid and ask from the first level on each side.
    pub fn best_bid_ask(&self) -> Option<(f64, f64)> {
        let guard = self.inner.read();
        Some((guard.best_bid()?, guard.best_ask()?))
    }

    /// Mid price, if both sides are present.
    pub fn mid(&self) -> Option<f64> {
        self.inner.read().mid()
    }

    /// Run a closure against the current snapshot.
    pub fn with_book<T>(&self, f: impl FnOnce(&OrderBook) -> T) -> T {
        f(&self.inner.read())
    }
}

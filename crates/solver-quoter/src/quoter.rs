//! The synchronous pricing path.
//!
//! A request flows through one fixed decision sequence: book freshness,
//! pair validation, size and reference-price computation, size bounds,
//! the direction / capacity / funding gates, spread application, and
//! conservative rounding of the resulting amount. The path never
//! suspends; everything it reads is already cached.

use crate::spread::SpreadModel;
use crate::stats::QuoterStats;
use serde::{Deserialize, Serialize};
use solver_core::{
    BookSide, QuoteRequest, QuoteResult, RejectReason, Rounding, TokenInfo, TokenTable,
};
use solver_risk::InventoryManager;
use solver_venue::{SharedOrderBook, VenueError};
use std::sync::Arc;
use tracing::debug;

/// Probe size used to seed the iterative VWAP refinement when the
/// counterparty specified the USD side.
const PROBE_SIZE_BTC: f64 = 0.001;

/// Quoter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoterConfig {
    pub min_trade_size_btc: f64,
    pub max_trade_size_btc: f64,
    /// Most-negative acceptable hourly funding rate, decimal. Quotes
    /// that would open a short are rejected when funding is worse.
    pub max_negative_funding_rate: f64,
}

impl Default for QuoterConfig {
    fn default() -> Self {
        Self {
            min_trade_size_btc: 0.001,
            max_trade_size_btc: 1.0,
            max_negative_funding_rate: -0.0005,
        }
    }
}

/// The pricing engine.
pub struct Quoter {
    config: QuoterConfig,
    book: SharedOrderBook,
    inventory: Arc<InventoryManager>,
    tokens: Arc<TokenTable>,
    spread: SpreadModel,
    stats: Arc<QuoterStats>,
}

impl Quoter {
    pub fn new(
        config: QuoterConfig,
        book: SharedOrderBook,
        inventory: Arc<InventoryManager>,
        tokens: Arc<TokenTable>,
        spread: SpreadModel,
    ) -> Self {
        Self {
            config,
            book,
            inventory,
            tokens,
            spread,
            stats: Arc::new(QuoterStats::new()),
        }
    }

    /// Per-process quoting counters.
    pub fn stats(&self) -> &QuoterStats {
        &self.stats
    }

    /// Shared handle to the counters, read by the drift watchdog.
    pub fn stats_handle(&self) -> Arc<QuoterStats> {
        Arc::clone(&self.stats)
    }

    /// Price a request. Synchronous, no I/O.
    pub fn get_quote(&self, request: &QuoteRequest) -> Result<QuoteResult, RejectReason> {
        self.stats.record_received();
        match self.price(request) {
            Ok(quote) => {
                self.stats.record_generated();
                Ok(quote)
            }
            Err(reason) => {
                self.stats.record_rejection(reason);
                debug!(quote_id = %request.quote_id, reason = %reason, "Quote rejected");
                Err(reason)
            }
        }
    }

    fn price(&self, request: &QuoteRequest) -> Result<QuoteResult, RejectReason> {
        if !self.book.is_fresh() {
            return Err(RejectReason::OrderbookStale);
        }

        let (btc, usd, buying) = self
            .tokens
            .classify_pair(&request.token_in, &request.token_out)
            .ok_or(RejectReason::InvalidTokenPair)?;

        let (amount_raw, is_exact_out) = match (&request.amount_in, &request.amount_out) {
            (Some(amount), None) => (amount.as_str(), false),
            (None, Some(amount)) => (amount.as_str(), true),
            _ => return Err(RejectReason::SizeOutOfBounds),
        };

        // We quote against the side we will hedge into: buying BTC gets
        // shorted into the bids, selling BTC gets longed off the asks.
        let side = if buying { BookSide::Bid } else { BookSide::Ask };

        // The specified amount is on the BTC side for exact-in buys and
        // exact-out sells; otherwise the size must be estimated from the
        // USD amount and refined against the book.
        let btc_specified = buying != is_exact_out;

        let (btc_size_est, reference, usd_amount) = if btc_specified {
            let size = btc
                .from_base_units(amount_raw)
                .map_err(|_| RejectReason::SizeOutOfBounds)?;
            self.check_size_bounds(size)?;
            (size, self.vwap(side, size)?, None)
        } else {
            let usd_amount = usd
                .from_base_units(amount_raw)
                .map_err(|_| RejectReason::SizeOutOfBounds)?;
            let probe_px = self.vwap(side, PROBE_SIZE_BTC)?;
            let estimated = usd_amount / probe_px;
            self.check_size_bounds(estimated)?;
            // Re-query at the estimated size: deep-book VWAP is not
            // linear in size, so the probe price alone would misprice
            // large requests.
            let refined = self.vwap(side, estimated)?;
            (usd_amount / refined, refined, Some(usd_amount))
        };

        self.check_size_bounds(btc_size_est)?;
        if !reference.is_finite() || reference <= 0.0 {
            return Err(RejectReason::NoReferencePrice);
        }

        let direction = self.inventory.get_quote_direction();
        let allowed = if buying {
            direction.allows_buy()
        } else {
            direction.allows_sell()
        };
        if !allowed {
            return Err(RejectReason::DirectionNotAllowed);
        }

        let hedge_direction = if buying {
            solver_core::HedgeDirection::Short
        } else {
            solver_core::HedgeDirection::Long
        };
        if !self
            .inventory
            .check_position_capacity(hedge_direction, btc_size_est)
        {
            return Err(RejectReason::PositionCapacityExceeded);
        }

        // Shorts pay negative funding; only the buy side cares.
        if buying {
            let funding = self.inventory.get_funding_rate().unwrap_or(0.0);
            if funding < self.config.max_negative_funding_rate {
                return Err(RejectReason::FundingRateTooNegative);
            }
        }

        let spread_bps = self.spread.effective_spread_bps(buying);
        let spread = spread_bps / 10_000.0;
        let final_price = if buying {
            reference * (1.0 - spread)
        } else {
            reference * (1.0 + spread)
        };

        let (amount, btc_size) =
            self.quantize_amount(buying, is_exact_out, btc, usd, btc_size_est, usd_amount, final_price)?;

        Ok(QuoteResult {
            amount,
            btc_size,
            we_are_buying_btc: buying,
            btc_token_id: btc.wire_id.clone(),
            usd_token_id: usd.wire_id.clone(),
            is_exact_out,
            quoted_price: final_price,
            spread_bps,
        })
    }

    /// Compute the unknown side and round it in the solver's favor:
    /// floor what the counterparty receives, ceil what they pay. The
    /// returned `btc_size` is quantized to the emitted amount so the
    /// hedge matches the signed intent exactly.
    #[allow(clippy::too_many_arguments)]
    fn quantize_amount(
        &self,
        buying: bool,
        is_exact_out: bool,
        btc: &TokenInfo,
        usd: &TokenInfo,
        btc_size_est: f64,
        usd_amount: Option<f64>,
        final_price: f64,
    ) -> Result<(String, f64), RejectReason> {
        let result = match (buying, is_exact_out) {
            // Exact-in buy: they send BTC, we owe USD.
            (true, false) => {
                let usd_out = btc_size_est * final_price;
                (
                    usd.to_base_units(usd_out, Rounding::Floor)
                        .map_err(|_| RejectReason::NoReferencePrice)?,
                    btc_size_est,
                )
            }
            // Exact-in sell: they send USD, we owe BTC.
            (false, false) => {
                let usd_amount = usd_amount.expect("usd amount present for usd-specified mode");
                let amount = btc
                    .to_base_units(usd_amount / final_price, Rounding::Floor)
                    .map_err(|_| RejectReason::NoReferencePrice)?;
                let quantized = btc
                    .from_base_units(&amount)
                    .map_err(|_| RejectReason::NoReferencePrice)?;
                (amount, quantized)
            }
            // Exact-out sell: they fixed the BTC they receive, we charge USD.
            (false, true) => {
                let usd_in = btc_size_est * final_price;
                (
                    usd.to_base_units(usd_in, Rounding::Ceil)
                        .map_err(|_| RejectReason::NoReferencePrice)?,
                    btc_size_est,
                )
            }
            // Exact-out buy: they fixed the USD they receive, we charge BTC.
            (true, true) => {
                let usd_amount = usd_amount.expect("usd amount present for usd-specified mode");
                let amount = btc
                    .to_base_units(usd_amount / final_price, Rounding::Ceil)
                    .map_err(|_| RejectReason::NoReferencePrice)?;
                let quantized = btc
                    .from_base_units(&amount)
                    .map_err(|_| RejectReason::NoReferencePrice)?;
                (amount, quantized)
            }
        };
        Ok(result)
    }

    fn check_size_bounds(&self, size: f64) -> Result<(), RejectReason> {
        if !size.is_finite()
            || size < self.config.min_trade_size_btc
            || size > self.config.max_trade_size_btc
        {
            return Err(RejectReason::SizeOutOfBounds);
        }
        Ok(())
    }

    fn vwap(&self, side: BookSide, size: f64) -> Result<f64, RejectReason> {
        self.book.vwap(side, size).map_err(|e| match e {
            VenueError::BookStale { .. } => RejectReason::OrderbookStale,
            VenueError::BookEmpty => RejectReason::NoReferencePrice,
            VenueError::InsufficientLiquidity { .. } => RejectReason::InsufficientLiquidity,
            _ => RejectReason::NoReferencePrice,
        })
    }
}

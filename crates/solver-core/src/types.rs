//! Shared trading enums and the quoting boundary types.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Order-book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    Bid,
    Ask,
}

impl std::fmt::Display for BookSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bid => write!(f, "bid"),
            Self::Ask => write!(f, "ask"),
        }
    }
}

/// Direction of the perpetual hedge opened after settlement.
///
/// Buying BTC from the counterparty is hedged with a SHORT; selling BTC
/// is hedged with a LONG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HedgeDirection {
    Short,
    Long,
}

impl HedgeDirection {
    /// Sign convention used in P&L estimates: +1 for SHORT, -1 for LONG.
    pub fn pnl_sign(&self) -> f64 {
        match self {
            Self::Short => 1.0,
            Self::Long => -1.0,
        }
    }
}

impl std::fmt::Display for HedgeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Short => write!(f, "SHORT"),
            Self::Long => write!(f, "LONG"),
        }
    }
}

/// Which quote directions the current risk state allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteDirection {
    BuyOnly,
    SellOnly,
    Both,
    None,
}

impl QuoteDirection {
    /// Whether buying BTC from the counterparty is allowed.
    pub fn allows_buy(&self) -> bool {
        matches!(self, Self::BuyOnly | Self::Both)
    }

    /// Whether selling BTC to the counterparty is allowed.
    pub fn allows_sell(&self) -> bool {
        matches!(self, Self::SellOnly | Self::Both)
    }
}

impl std::fmt::Display for QuoteDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BuyOnly => write!(f, "BUY_ONLY"),
            Self::SellOnly => write!(f, "SELL_ONLY"),
            Self::Both => write!(f, "BOTH"),
            Self::None => write!(f, "NONE"),
        }
    }
}

/// Why a quote request produced no quote.
///
/// Every variant maps to "no quote" at the bus boundary; the enum exists
/// for counters and operator diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    OrderbookStale,
    InvalidTokenPair,
    SizeOutOfBounds,
    InsufficientLiquidity,
    DirectionNotAllowed,
    PositionCapacityExceeded,
    FundingRateTooNegative,
    NoReferencePrice,
}

impl RejectReason {
    /// All variants, in counter display order.
    pub const ALL: [RejectReason; 8] = [
        Self::OrderbookStale,
        Self::InvalidTokenPair,
        Self::SizeOutOfBounds,
        Self::InsufficientLiquidity,
        Self::DirectionNotAllowed,
        Self::PositionCapacityExceeded,
        Self::FundingRateTooNegative,
        Self::NoReferencePrice,
    ];

    /// Stable snake_case tag used in logs and counters.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderbookStale => "orderbook_stale",
            Self::InvalidTokenPair => "invalid_token_pair",
            Self::SizeOutOfBounds => "size_out_of_bounds",
            Self::InsufficientLiquidity => "insufficient_liquidity",
            Self::DirectionNotAllowed => "direction_not_allowed",
            Self::PositionCapacityExceeded => "position_capacity_exceeded",
            Self::FundingRateTooNegative => "funding_rate_too_negative",
            Self::NoReferencePrice => "no_reference_price",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An incoming quote request, already lifted off the wire.
///
/// Exactly one of `amount_in` / `amount_out` is populated; both are
/// base-unit integer strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub quote_id: String,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Option<String>,
    pub amount_out: Option<String>,
    /// Earliest acceptable quote deadline, absolute ms.
    pub min_deadline_ms: i64,
}

impl QuoteRequest {
    /// Whether the counterparty fixed the output amount.
    pub fn is_exact_out(&self) -> bool {
        self.amount_out.is_some()
    }
}

/// A priced quote, ready for signing and publication.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteResult {
    /// The computed side, base units: `amount_out` for exact-in requests,
    /// `amount_in` for exact-out requests.
    pub amount: String,
    /// BTC quantity carried through to the hedger without recomputation.
    pub btc_size: f64,
    pub we_are_buying_btc: bool,
    /// Wire identifiers of the pair.
    pub btc_token_id: String,
    pub usd_token_id: String,
    pub is_exact_out: bool,
    /// Final per-BTC price after spread, for hedge P&L estimation.
    pub quoted_price: f64,
    /// Spread actually applied, bips.
    pub spread_bps: f64,
}

impl QuoteResult {
    /// Perpetual hedge direction implied by the trade.
    pub fn hedge_direction(&self) -> HedgeDirection {
        if self.we_are_buying_btc {
            HedgeDirection::Short
        } else {
            HedgeDirection::Long
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_predicates() {
        assert!(QuoteDirection::Both.allows_buy());
        assert!(QuoteDirection::Both.allows_sell());
        assert!(QuoteDirection::BuyOnly.allows_buy());
        assert!(!QuoteDirection::BuyOnly.allows_sell());
        assert!(!QuoteDirection::None.allows_buy());
        assert!(!QuoteDirection::None.allows_sell());
    }

    #[test]
    fn test_reject_reason_tags() {
        assert_eq!(RejectReason::OrderbookStale.to_string(), "orderbook_stale");
        assert_eq!(RejectReason::ALL.len(), 8);
        // Tags are unique
        let mut tags: Vec<_> = RejectReason::ALL.iter().map(|r| r.as_str()).collect();
        tags.sort();
        tags.dedup();
        assert_eq!(tags.len(), 8);
    }

    #[test]
    fn test_hedge_direction_from_quote() {
        let quote = QuoteResult {
            amount: "1".to_string(),
            btc_size: 0.01,
            we_are_buying_btc: true,
            btc_token_id: "nep141:btc.omft.near".to_string(),
            usd_token_id: "nep141:usdc.omft.near".to_string(),
            is_exact_out: false,
            quoted_price: 100_000.0,
            spread_bps: 30.0,
        };
        assert_eq!(quote.hedge_direction(), HedgeDirection::Short);
        assert_eq!(quote.hedge_direction().pnl_sign(), 1.0);
    }
}

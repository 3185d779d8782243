//! Token registry for the BTC/USD quoting pair.
//!
//! The table is immutable after startup. Tokens fall into two disjoint
//! sets (BTC-pegged and USD-pegged); a quote request is valid only if it
//! pairs one token from each set. All amount conversions go through the
//! pre-computed `pow10` so the hot path never recomputes powers.

use crate::error::{CoreError, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Rounding direction for base-unit conversion.
///
/// The solver always rounds in its own favor: `Floor` when computing what
/// the counterparty receives, `Ceil` when computing what it pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Floor,
    Ceil,
}

/// Which side of the pair a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Btc,
    Usd,
}

/// Per-token metadata.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    /// Full wire identifier including the `nepNNN:` prefix.
    pub wire_id: String,
    /// Identifier with the standard prefix stripped (internal key).
    pub token_id: String,
    /// Display symbol (e.g. "BTC", "USDC").
    pub symbol: String,
    /// Base-unit decimals.
    pub decimals: u32,
    /// Pre-computed `10^decimals`.
    pub pow10: Decimal,
    /// BTC-pegged or USD-pegged.
    pub kind: TokenKind,
}

impl TokenInfo {
    /// Build metadata from a wire identifier.
    pub fn new(wire_id: &str, symbol: &str, decimals: u32, kind: TokenKind) -> Result<Self> {
        if decimals > 24 {
            return Err(CoreError::InvalidConfig(format!(
                "token {symbol} has unsupported decimals {decimals}"
            )));
        }
        let pow10 = Decimal::from_i128_with_scale(10i128.pow(decimals), 0);
        Ok(Self {
            wire_id: wire_id.to_string(),
            token_id: strip_token_prefix(wire_id).to_string(),
            symbol: symbol.to_string(),
            decimals,
            pow10,
            kind,
        })
    }

    /// Convert a decimal token amount to a base-unit integer string.
    ///
    /// The f64 value is lifted into `Decimal` before scaling so tokens
    /// with large `decimals` do not lose integer precision.
    pub fn to_base_units(&self, amount: f64, rounding: Rounding) -> Result<String> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(CoreError::InvalidAmount(format!(
                "{} {}",
                amount, self.symbol
            )));
        }
        let value = Decimal::from_f64_retain(amount)
            .ok_or_else(|| CoreError::InvalidAmount(format!("{} {}", amount, self.symbol)))?
            * self.pow10;
        // Absorb float noise below a millionth of a base unit so values
        // that are integers mathematically do not straddle the floor/ceil
        // boundary.
        let snapped = value.round_dp(6);
        let quantized = match rounding {
            Rounding::Floor => snapped.floor(),
            Rounding::Ceil => snapped.ceil(),
        };
        Ok(quantized.normalize().to_string())
    }

    /// Parse a base-unit integer string into a decimal token amount.
    pub fn from_base_units(&self, raw: &str) -> Result<f64> {
        let units: Decimal = raw
            .trim()
            .parse()
            .map_err(|_| CoreError::InvalidAmount(format!("{raw} {}", self.symbol)))?;
        if units.is_sign_negative() {
            return Err(CoreError::InvalidAmount(format!("{raw} {}", self.symbol)));
        }
        (units / self.pow10)
            .to_f64()
            .ok_or_else(|| CoreError::InvalidAmount(format!("{raw} {}", self.symbol)))
    }
}

/// Strip the `nepNNN:` multi-token standard prefix from a wire identifier.
///
/// Identifiers without a recognizable prefix are returned unchanged.
pub fn strip_token_prefix(wire_id: &str) -> &str {
    if let Some((prefix, rest)) = wire_id.split_once(':') {
        if let Some(digits) = prefix.strip_prefix("nep") {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                return rest;
            }
        }
    }
    wire_id
}

/// Immutable token registry keyed by stripped identifier.
#[derive(Debug, Clone)]
pub struct TokenTable {
    tokens: HashMap<String, TokenInfo>,
    btc_ids: Vec<String>,
    usd_ids: Vec<String>,
}

impl TokenTable {
    /// Build the table, validating that the two sets are disjoint and
    /// both non-empty.
    pub fn new(tokens: Vec<TokenInfo>) -> Result<Self> {
        let mut map = HashMap::with_capacity(tokens.len());
        let mut btc_ids = Vec::new();
        let mut usd_ids = Vec::new();

        for token in tokens {
            match token.kind {
                TokenKind::Btc => btc_ids.push(token.token_id.clone()),
                TokenKind::Usd => usd_ids.push(token.token_id.clone()),
            }
            if map.insert(token.token_id.clone(), token).is_some() {
                return Err(CoreError::InvalidConfig(
                    "duplicate token identifier in table".to_string(),
                ));
            }
        }

        if btc_ids.is_empty() || usd_ids.is_empty() {
            return Err(CoreError::InvalidConfig(
                "token table needs at least one BTC and one USD token".to_string(),
            ));
        }

        Ok(Self {
            tokens: map,
            btc_ids,
            usd_ids,
        })
    }

    /// Look up a token by wire identifier (prefix tolerated).
    pub fn get(&self, wire_id: &str) -> Option<&TokenInfo> {
        self.tokens.get(strip_token_prefix(wire_id))
    }

    /// Classify a request pair.
    ///
    /// Returns `(btc, usd, we_are_buying_btc)` when exactly one token is
    /// BTC-pegged and the other USD-pegged; `None` otherwise.
    /// `we_are_buying_btc` holds iff BTC is the incoming token.
    pub fn classify_pair(
        &self,
        token_in: &str,
        token_out: &str,
    ) -> Option<(&TokenInfo, &TokenInfo, bool)> {
        let a = self.get(token_in)?;
        let b = self.get(token_out)?;
        match (a.kind, b.kind) {
            (TokenKind::Btc, TokenKind::Usd) => Some((a, b, true)),
            (TokenKind::Usd, TokenKind::Btc) => Some((b, a, false)),
            _ => None,
        }
    }

    /// All BTC-pegged tokens.
    pub fn btc_tokens(&self) -> impl Iterator<Item = &TokenInfo> {
        self.btc_ids.iter().filter_map(|id| self.tokens.get(id))
    }

    /// All USD-pegged tokens.
    pub fn usd_tokens(&self) -> impl Iterator<Item = &TokenInfo> {
        self.usd_ids.iter().filter_map(|id| self.tokens.get(id))
    }
}

//! Venue client: account-state caches and hedge execution.
//!
//! Account state (margin + perpetual position) is fetched in one
//! `clearinghouseState` call and cached atomically with a 10 s TTL; the
//! funding rate is cached separately at 60 s. Book reads go through
//! [`SharedOrderBook`] and are never blocked by an in-flight HTTP call.
//!
//! `execute_hedge` is the only code path that mutates live perpetual
//! exposure.

use crate::error::{VenueError, VenueResult};
use crate::gateway::{DynOrderGateway, IocOrder};
use crate::orderbook::SharedOrderBook;
use parking_lot::Mutex;
use serde::Deserialize;
use solver_core::{BookSide, HedgeDirection};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default timeout for info requests.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Venue configuration.
#[derive(Debug, Clone)]
pub struct VenueConfig {
    /// Info endpoint URL (e.g. "https://api.hyperliquid.xyz/info").
    pub info_url: String,
    /// Trading account address queried for clearinghouse state.
    pub user_address: String,
    /// Coin symbol of the hedging market.
    pub coin: String,
    /// Protective slippage applied to the hedge limit price, bips.
    pub hedge_slippage_bps: f64,
    /// Venue price precision, decimal places (1 for BTC).
    pub price_decimals: u32,
    /// Account-state cache TTL.
    pub account_cache_ttl_ms: u64,
    /// Funding-rate cache TTL.
    pub funding_cache_ttl_ms: u64,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            info_url: "https://api.hyperliquid.xyz/info".to_string(),
            user_address: String::new(),
            coin: "BTC".to_string(),
            hedge_slippage_bps: 10.0,
            price_decimals: 1,
            account_cache_ttl_ms: 10_000,
            funding_cache_ttl_ms: 60_000,
        }
    }
}

/// Atomically cached account state from one refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountState {
    /// Total account value, USD.
    pub account_value_usd: f64,
    /// Margin currently in use, USD.
    pub margin_used_usd: f64,
    /// Signed BTC perpetual position (positive = long).
    pub perp_btc: f64,
}

impl AccountState {
    /// Free margin available for new positions.
    pub fn free_margin_usd(&self) -> f64 {
        self.account_value_usd - self.margin_used_usd
    }
}

/// Executed hedge report.
#[derive(Debug, Clone, PartialEq)]
pub struct HedgeFill {
    pub direction: HedgeDirection,
    pub size: f64,
    pub avg_price: f64,
    pub order_id: u64,
}

#[derive(Debug, Deserialize)]
struct MarginSummary {
    #[serde(rename = "accountValue")]
    account_value: String,
    #[serde(rename = "totalMarginUsed")]
    total_margin_used: String,
}

#[derive(Debug, Deserialize)]
struct PositionData {
    coin: String,
    szi: String,
}

#[derive(Debug, Deserialize)]
struct AssetPosition {
    position: PositionData,
}

#[derive(Debug, Deserialize)]
struct ClearinghouseState {
    #[serde(rename = "marginSummary")]
    margin_summary: MarginSummary,
    #[serde(rename = "assetPositions", default)]
    asset_positions: Vec<AssetPosition>,
}

/// Perpetual venue client.
pub struct VenueClient {
    config: VenueConfig,
    http: reqwest::Client,
    book: SharedOrderBook,
    gateway: DynOrderGateway,
    account_cache: Mutex<Option<(Instant, AccountState)>>,
    funding_cache: Mutex<Option<(Instant, f64)>>,
}

impl VenueClient {
    /// Create a new venue client.
    pub fn new(
        config: VenueConfig,
        book: SharedOrderBook,
        gateway: DynOrderGateway,
    ) -> VenueResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| VenueError::Http(format!("http client init: {e}")))?;
        Ok(Self {
            config,
            http,
            book,
            gateway,
            account_cache: Mutex::new(None),
            funding_cache: Mutex::new(None),
        })
    }

    /// Shared order book handle.
    pub fn order_book(&self) -> &SharedOrderBook {
        &self.book
    }

    /// Coin symbol of the hedging market.
    pub fn coin(&self) -> &str {
        &self.config.coin
    }

    async fn info_request(&self, body: serde_json::Value) -> VenueResult<serde_json::Value> {
        let response = self
            .http
            .post(&self.config.info_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VenueError::Http(format!("info request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VenueError::Http(format!("info HTTP {status}: {text}")));
        }
        response
            .json()
            .await
            .map_err(|e| VenueError::Http(format!("info body: {e}")))
    }

    /// Account value, used margin, and the BTC perpetual position in one
    /// call, cached atomically.
    pub async fn clearinghouse_state(&self) -> VenueResult<AccountState> {
        let ttl = Duration::from_millis(self.config.account_cache_ttl_ms);
        if let Some((at, state)) = *self.account_cache.lock() {
            if at.elapsed() < ttl {
                return Ok(state);
            }
        }

        let body = serde_json::json!({
            "type": "clearinghouseState",
            "user": self.config.user_address,
        });
        let raw = self.info_request(body).await?;
        let parsed: ClearinghouseState = serde_json::from_value(raw)?;

        let account_value_usd = parse_venue_number(&parsed.margin_summary.account_value)?;
        let margin_used_usd = parse_venue_number(&parsed.margin_summary.total_margin_used)?;
        let perp_btc = parsed
            .asset_positions
            .iter()
            .find(|p| p.position.coin == self.config.coin)
            .map(|p| parse_venue_number(&p.position.szi))
            .transpose()?
            .unwrap_or(0.0);

        let state = AccountState {
            account_value_usd,
            margin_used_usd,
            perp_btc,
        };
        *self.account_cache.lock() = Some((Instant::now(), state));
        debug!(
            account_value = account_value_usd,
            margin_used = margin_used_usd,
            perp_btc,
            "Refreshed clearinghouse state"
        );
        Ok(state)
    }

    /// Current hourly funding rate for the hedging market, cached at its
    /// own TTL.
    pub async fn funding_rate_hourly(&self) -> VenueResult<f64> {
        let ttl = Duration::from_millis(self.config.funding_cache_ttl_ms);
        if let Some((at, rate)) = *self.funding_cache.lock() {
            if at.elapsed() < ttl {
                return Ok(rate);
            }
        }

        let raw = self
            .info_request(serde_json::json!({"type": "metaAndAssetCtxs"}))
            .await?;

        let rate = extract_funding_rate(&raw, &self.config.coin).ok_or_else(|| {
            VenueError::Http(format!("funding rate for {} not found", self.config.coin))
        })?;

        *self.funding_cache.lock() = Some((Instant::now(), rate));
        Ok(rate)
    }

    /// Drop the cached account state so the next read refetches.
    pub fn invalidate_account_cache(&self) {
        *self.account_cache.lock() = None;
    }

    /// Execute an IOC hedge of `size` BTC in `direction`.
    ///
    /// The limit price is the taker-side VWAP for the required size,
    /// adjusted by the protective slippage in the hostile direction and
    /// rounded to the venue tick. Fails if the book is stale or the venue
    /// rejects the order; the account cache is invalidated on success.
    pub async fn execute_hedge(
        &self,
        direction: HedgeDirection,
        size: f64,
    ) -> VenueResult<HedgeFill> {
        // SHORT sells into the bids, LONG lifts the asks.
        let (taker_side, is_buy) = match direction {
            HedgeDirection::Short => (BookSide::Bid, false),
            HedgeDirection::Long => (BookSide::Ask, true),
        };

        let reference = self.book.vwap(taker_side, size)?;
        let slippage = self.config.hedge_slippage_bps / 10_000.0;
        let raw_limit = if is_buy {
            reference * (1.0 + slippage)
        } else {
            reference * (1.0 - slippage)
        };
        let limit_px = round_to_tick(raw_limit, self.config.price_decimals, is_buy);

        let fill = self
            .gateway
            .submit_ioc(IocOrder {
                coin: self.config.coin.clone(),
                is_buy,
                limit_px,
                size,
            })
            .await?;

        if fill.filled_size + 1e-9 < size {
            warn!(
                requested = size,
                filled = fill.filled_size,
                "IOC hedge partially filled"
            );
        }

        self.invalidate_account_cache();
        info!(
            %direction,
            size,
            limit_px,
            avg_price = fill.avg_price,
            oid = fill.order_id,
            "Hedge order filled"
        );

        Ok(HedgeFill {
            direction,
            size: fill.filled_size,
            avg_price: fill.avg_price,
            order_id: fill.order_id,
        })
    }
}

fn parse_venue_number(raw: &str) -> VenueResult<f64> {
    raw.parse()
        .map_err(|_| VenueError::Http(format!("unparseable venue number: {raw}")))
}

/// Round a price to the venue tick, keeping the protective direction:
/// down for sells, up for buys.
fn round_to_tick(price: f64, decimals: u32, is_buy: bool) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    let scaled = price * scale;
    let ticked = if is_buy { scaled.ceil() } else { scaled.floor() };
    ticked / scale
}

/// Pull the hourly funding rate for `coin` out of a `metaAndAssetCtxs`
/// response: `[{"universe": [{"name": ...}, ...]}, [{"funding": ...}, ...]]`.
fn extract_funding_rate(raw: &serde_json::Value, coin: &str) -> Option<f64> {
    let universe = raw.get(0)?.get("universe")?.as_array()?;
    let contexts = raw.get(1)?.as_array()?;
    let index = universe
        .iter()
        .position(|entry| entry.get("name").and_then(|n| n.as_str()) == Some(coin))?;
    contexts
        .get(index)?
        .get("funding")?
        .as_str()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockOrderGateway;
    use crate::orderbook::{BookLevel, OrderBook};
    use solver_core::now_ms;
    use std::sync::Arc;

    fn fresh_book() -> SharedOrderBook {
        let shared = SharedOrderBook::new(10_000);
        shared.replace(OrderBook {
            bids: vec![BookLevel {
                price: 100_000.0,
                size: 5.0,
            }],
            asks: vec![BookLevel {
                price: 100_100.0,
                size: 5.0,
            }],
            last_update_ms: now_ms(),
        });
        shared
    }

    fn client(gateway: Arc<MockOrderGateway>, book: SharedOrderBook) -> VenueClient {
        VenueClient::new(
            VenueConfig {
                hedge_slippage_bps: 10.0,
                ..VenueConfig::default()
            },
            book,
            gateway,
        )
        .unwrap()
    }

    #[test]
    fn test_round_to_tick() {
        assert_eq!(round_to_tick(100_123.456, 1, false), 100_123.4);
        assert_eq!(round_to_tick(100_123.411, 1, true), 100_123.5);
        // An on-tick price is unchanged
        assert_eq!(round_to_tick(100_123.5, 1, true), 100_123.5);
    }

    #[test]
    fn test_extract_funding_rate() {
        let raw = serde_json::json!([
            {"universe": [{"name": "BTC"}, {"name": "ETH"}]},
            [{"funding": "0.0000125"}, {"funding": "-0.0001"}]
        ]);
        assert_eq!(extract_funding_rate(&raw, "BTC"), Some(0.0000125));
        assert_eq!(extract_funding_rate(&raw, "ETH"), Some(-0.0001));
        assert_eq!(extract_funding_rate(&raw, "SOL"), None);
    }

    #[tokio::test]
    async fn test_hedge_short_hits_bids_with_protective_limit() {
        let gateway = Arc::new(MockOrderGateway::new());
        let venue = client(gateway.clone(), fresh_book());

        let fill = venue
            .execute_hedge(HedgeDirection::Short, 0.01)
            .await
            .unwrap();
        assert_eq!(fill.direction, HedgeDirection::Short);
        assert_eq!(fill.size, 0.01);

        let orders = gateway.submitted();
        assert_eq!(orders.len(), 1);
        assert!(!orders[0].is_buy);
        // 100000 * (1 - 0.001) = 99900, floored to tick
        assert_eq!(orders[0].limit_px, 99_900.0);
    }

    #[tokio::test]
    async fn test_hedge_long_lifts_asks() {
        let gateway = Arc::new(MockOrderGateway::new());
        let venue = client(gateway.clone(), fresh_book());

        venue
            .execute_hedge(HedgeDirection::Long, 0.02)
            .await
            .unwrap();

        let orders = gateway.submitted();
        assert!(orders[0].is_buy);
        // 100100 * 1.001 = 100200.1, ceiled to tick
        assert!((orders[0].limit_px - 100_200.1).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_hedge_fails_on_stale_book() {
        let gateway = Arc::new(MockOrderGateway::new());
        let book = SharedOrderBook::new(10_000);
        let venue = client(gateway.clone(), book);

        let err = venue
            .execute_hedge(HedgeDirection::Short, 0.01)
            .await
            .unwrap_err();
        assert!(matches!(err, VenueError::BookStale { .. }));
        assert!(gateway.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_hedge_propagates_rejection() {
        let gateway = Arc::new(MockOrderGateway::new());
        gateway.set_failing(true);
        let venue = client(gateway.clone(), fresh_book());

        let err = venue
            .execute_hedge(HedgeDirection::Long, 0.01)
            .await
            .unwrap_err();
        assert!(matches!(err, VenueError::OrderRejected(_)));
    }
}

//! Spread model: static target or basis-adjusted dynamic spread.
//!
//! The dynamic mode reads an external spot price and tightens the spread
//! by the favorable part of the perp-spot basis. Basis may only tighten,
//! never widen: the effective spread is clamped to `[0, base]` and
//! capped at the configured maximum. When disabled or the spot price is
//! unavailable, the static target applies.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use solver_venue::SharedOrderBook;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Spread configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadConfig {
    /// Static spread, bips.
    pub target_spread_bps: f64,
    /// Enable the basis-adjusted mode.
    #[serde(default)]
    pub dynamic_enabled: bool,
    /// Dynamic-mode base spread, bips.
    pub base_spread_bps: f64,
    /// Hard cap on the effective spread, bips.
    pub max_spread_bps: f64,
}

impl Default for SpreadConfig {
    fn default() -> Self {
        Self {
            target_spread_bps: 30.0,
            dynamic_enabled: false,
            base_spread_bps: 30.0,
            max_spread_bps: 60.0,
        }
    }
}

/// External spot-price cache, refreshed by [`run_spot_refresher`].
pub struct SpotPriceFeed {
    value: RwLock<Option<(Instant, f64)>>,
    /// Price is unusable after three missed refresh cycles.
    max_age: Duration,
}

impl SpotPriceFeed {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            value: RwLock::new(None),
            max_age: refresh_interval * 3,
        }
    }

    /// Latest spot price, if fresh.
    pub fn get(&self) -> Option<f64> {
        let guard = self.value.read();
        let (at, price) = (*guard)?;
        (at.elapsed() <= self.max_age).then_some(price)
    }

    /// Store a freshly fetched price.
    pub fn store(&self, price: f64) {
        *self.value.write() = Some((Instant::now(), price));
    }
}

/// Pull a spot price out of the common ticker response shapes.
fn extract_spot_price(value: &serde_json::Value) -> Option<f64> {
    let candidate = value
        .get("price")
        .or_else(|| value.get("data").and_then(|d| d.get("amount")))
        .or_else(|| value.get("last"))
        .or_else(|| value.get("amount"))?;
    match candidate {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
    .filter(|p| p.is_finite() && *p > 0.0)
}

async fn fetch_spot(http: &reqwest::Client, url: &str) -> Option<f64> {
    let response = http.get(url).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    let body: serde_json::Value = response.json().await.ok()?;
    extract_spot_price(&body)
}

/// Periodic spot-price refresher with a primary and a fallback endpoint.
pub async fn run_spot_refresher(
    feed: Arc<SpotPriceFeed>,
    primary_url: String,
    fallback_url: Option<String>,
    refresh_interval: Duration,
    shutdown: CancellationToken,
) {
    let http = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!(?e, "Spot feed disabled: http client init failed");
            return;
        }
    };

    let mut interval = tokio::time::interval(refresh_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("Spot refresher shutting down");
                return;
            }
            _ = interval.tick() => {
                let price = match fetch_spot(&http, &primary_url).await {
                    Some(p) => Some(p),
                    None => match &fallback_url {
                        Some(url) => {
                            debug!("Primary spot source failed, trying fallback");
                            fetch_spot(&http, url).await
                        }
                        None => None,
                    },
                };
                match price {
                    Some(p) => feed.store(p),
                    None => warn!("Spot price unavailable from all sources"),
                }
            }
        }
    }
}

/// Effective-spread calculator.
pub struct SpreadModel {
    config: SpreadConfig,
    book: SharedOrderBook,
    spot: Option<Arc<SpotPriceFeed>>,
}

impl SpreadModel {
    pub fn new(config: SpreadConfig, book: SharedOrderBook, spot: Option<Arc<SpotPriceFeed>>) -> Self {
        Self { config, book, spot }
    }

    /// Spread in bips for the given trade direction.
    pub fn effective_spread_bps(&self, we_are_buying_btc: bool) -> f64 {
        if !self.config.dynamic_enabled {
            return self.config.target_spread_bps;
        }
        let spot = match self.spot.as_ref().and_then(|f| f.get()) {
            Some(s) => s,
            None => return self.config.target_spread_bps,
        };
        let perp_mid = match self.book.mid() {
            Some(m) => m,
            None => return self.config.target_spread_bps,
        };

        let basis_bps = (perp_mid - spot) / spot * 10_000.0;
        // Shorting profits from a positive basis, longing from a negative one.
        let favorable = if we_are_buying_btc {
            basis_bps.max(0.0)
        } else {
            (-basis_bps).max(0.0)
        };

        (self.config.base_spread_bps - favorable)
            .clamp(0.0, self.config.base_spread_bps)
            .min(self.config.max_spread_bps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solver_core::now_ms;
    use solver_venue::{BookLevel, OrderBook};

    fn book_with_mid(mid: f64) -> SharedOrderBook {
        let book = SharedOrderBook::new(10_000);
        book.replace(OrderBook {
            bids: vec![BookLevel {
                price: mid - 50.0,
                size: 1.0,
            }],
            asks: vec![BookLevel {
                price: mid + 50.0,
                size: 1.0,
            }],
            last_update_ms: now_ms(),
        });
        book
    }

    fn feed_with(price: f64) -> Arc<SpotPriceFeed> {
        let feed = Arc::new(SpotPriceFeed::new(Duration::from_secs(10)));
        feed.store(price);
        feed
    }

    fn config() -> SpreadConfig {
        SpreadConfig {
            target_spread_bps: 30.0,
            dynamic_enabled: true,
            base_spread_bps: 30.0,
            max_spread_bps: 60.0,
        }
    }

    #[test]
    fn test_static_mode() {
        let model = SpreadModel::new(
            SpreadConfig {
                dynamic_enabled: false,
                ..config()
            },
            book_with_mid(100_000.0),
            Some(feed_with(100_000.0)),
        );
        assert_eq!(model.effective_spread_bps(true), 30.0);
        assert_eq!(model.effective_spread_bps(false), 30.0);
    }

    #[test]
    fn test_missing_spot_falls_back_to_target() {
        let feed = Arc::new(SpotPriceFeed::new(Duration::from_secs(10)));
        let model = SpreadModel::new(config(), book_with_mid(100_000.0), Some(feed));
        assert_eq!(model.effective_spread_bps(true), 30.0);
    }

    #[test]
    fn test_positive_basis_tightens_buys() {
        // Perp 10 bps above spot: favorable when shorting (buying BTC).
        let spot = 100_000.0;
        let mid = spot * (1.0 + 0.0010);
        let model = SpreadModel::new(config(), book_with_mid(mid), Some(feed_with(spot)));

        let buy_spread = model.effective_spread_bps(true);
        assert!((buy_spread - 20.0).abs() < 0.01);

        // Selling sees no favorable basis: full base spread.
        assert_eq!(model.effective_spread_bps(false), 30.0);
    }

    #[test]
    fn test_negative_basis_tightens_sells() {
        let spot = 100_000.0;
        let mid = spot * (1.0 - 0.0010);
        let model = SpreadModel::new(config(), book_with_mid(mid), Some(feed_with(spot)));

        let sell_spread = model.effective_spread_bps(false);
        assert!((sell_spread - 20.0).abs() < 0.01);
        assert_eq!(model.effective_spread_bps(true), 30.0);
    }

    #[test]
    fn test_spread_never_negative() {
        // Basis far larger than the base spread: clamp at zero.
        let spot = 100_000.0;
        let mid = spot * (1.0 + 0.01); // 100 bps basis
        let model = SpreadModel::new(config(), book_with_mid(mid), Some(feed_with(spot)));
        assert_eq!(model.effective_spread_bps(true), 0.0);
    }

    #[test]
    fn test_extract_spot_price_shapes() {
        assert_eq!(
            extract_spot_price(&serde_json::json!({"price": "100000.5"})),
            Some(100_000.5)
        );
        assert_eq!(
            extract_spot_price(&serde_json::json!({"data": {"amount": "99123.0"}})),
            Some(99_123.0)
        );
        assert_eq!(
            extract_spot_price(&serde_json::json!({"last": 98000.0})),
            Some(98_000.0)
        );
        assert_eq!(extract_spot_price(&serde_json::json!({"foo": 1})), None);
        assert_eq!(extract_spot_price(&serde_json::json!({"price": "-5"})), None);
    }

    #[test]
    fn test_feed_staleness() {
        let feed = SpotPriceFeed {
            value: RwLock::new(Some((
                Instant::now() - Duration::from_secs(31),
                100_000.0,
            ))),
            max_age: Duration::from_secs(30),
        };
        assert_eq!(feed.get(), None);
    }
}

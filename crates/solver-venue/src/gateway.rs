//! Order gateway trait for hedge submission.
//!
//! Abstracts the venue's exchange endpoint behind a narrow trait so the
//! hedging path can be exercised without network access. The production
//! implementation wraps the venue SDK's exchange client.

use crate::error::{VenueError, VenueResult};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{info, warn};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// An Immediate-Or-Cancel limit order, already priced and tick-rounded.
#[derive(Debug, Clone, PartialEq)]
pub struct IocOrder {
    /// Coin symbol on the venue (e.g. "BTC").
    pub coin: String,
    pub is_buy: bool,
    pub limit_px: f64,
    pub size: f64,
}

/// Fill report for a submitted IOC order.
#[derive(Debug, Clone, PartialEq)]
pub struct IocFill {
    pub order_id: u64,
    pub filled_size: f64,
    pub avg_price: f64,
}

/// Narrow interface to the venue's order endpoint.
///
/// An order that cannot fill immediately is a failure at this boundary:
/// the IOC time-in-force bounds its lifetime on the venue, and an
/// unfilled hedge leaves the solver exposed.
pub trait OrderGateway: Send + Sync {
    /// Submit an IOC limit order and wait for the venue's verdict.
    fn submit_ioc(&self, order: IocOrder) -> BoxFuture<'_, VenueResult<IocFill>>;
}

/// Arc wrapper for gateway trait objects.
pub type DynOrderGateway = Arc<dyn OrderGateway>;

/// Production gateway over the Hyperliquid exchange client.
pub struct HyperliquidGateway {
    exchange: hyperliquid_rust_sdk::ExchangeClient,
}

impl HyperliquidGateway {
    /// Connect the exchange client.
    ///
    /// `mainnet` selects the endpoint set; the wallet must be an agent
    /// key authorized for the trading account.
    pub async fn connect(
        wallet: ethers::signers::LocalWallet,
        mainnet: bool,
    ) -> VenueResult<Self> {
        let base_url = if mainnet {
            hyperliquid_rust_sdk::BaseUrl::Mainnet
        } else {
            hyperliquid_rust_sdk::BaseUrl::Testnet
        };
        let exchange =
            hyperliquid_rust_sdk::ExchangeClient::new(None, wallet, Some(base_url), None, None)
                .await
                .map_err(|e| VenueError::Http(format!("exchange client init: {e}")))?;
        Ok(Self { exchange })
    }
}

impl OrderGateway for HyperliquidGateway {
    fn submit_ioc(&self, order: IocOrder) -> BoxFuture<'_, VenueResult<IocFill>> {
        Box::pin(async move {
            use hyperliquid_rust_sdk::{
                ClientLimit, ClientOrder, ClientOrderRequest, ExchangeDataStatus,
                ExchangeResponseStatus,
            };

            let request = ClientOrderRequest {
                asset: order.coin.clone(),
                is_buy: order.is_buy,
                reduce_only: false,
                limit_px: order.limit_px,
                sz: order.size,
                cloid: None,
                order_type: ClientOrder::Limit(ClientLimit {
                    tif: "Ioc".to_string(),
                }),
            };

            info!(
                coin = %order.coin,
                is_buy = order.is_buy,
                limit_px = order.limit_px,
                size = order.size,
                "Submitting IOC order"
            );

            let response = self
                .exchange
                .order(request, None)
                .await
                .map_err(|e| VenueError::Http(format!("order submit: {e}")))?;

            let data = match response {
                ExchangeResponseStatus::Ok(data) => data,
                ExchangeResponseStatus::Err(message) => {
                    return Err(VenueError::OrderRejected(message));
                }
            };

            let statuses = data
                .data
                .map(|d| d.statuses)
                .unwrap_or_default();

            for status in statuses {
                match status {
                    ExchangeDataStatus::Filled(fill) => {
                        let filled_size: f64 = fill.total_sz.parse().unwrap_or(0.0);
                        let avg_price: f64 = fill.avg_px.parse().unwrap_or(0.0);
                        return Ok(IocFill {
                            order_id: fill.oid,
                            filled_size,
                            avg_price,
                        });
                    }
                    ExchangeDataStatus::Error(message) => {
                        return Err(VenueError::OrderRejected(message));
                    }
                    other => {
                        // Resting should not happen for IOC; treat as no fill.
                        warn!(?other, "Unexpected IOC order status");
                    }
                }
            }

            Err(VenueError::OrderRejected(
                "ioc order returned no fill".to_string(),
            ))
        })
    }
}

/// Mock gateway for tests.
pub struct MockOrderGateway {
    orders: parking_lot::Mutex<Vec<IocOrder>>,
    fail_next: std::sync::atomic::AtomicBool,
    fill_price: parking_lot::Mutex<f64>,
}

impl Default for MockOrderGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOrderGateway {
    pub fn new() -> Self {
        Self {
            orders: parking_lot::Mutex::new(Vec::new()),
            fail_next: std::sync::atomic::AtomicBool::new(false),
            fill_price: parking_lot::Mutex::new(0.0),
        }
    }

    /// Make subsequent submissions fail with `OrderRejected`.
    pub fn set_failing(&self, failing: bool) {
        self.fail_next
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Override the reported fill price (defaults to the order's limit).
    pub fn set_fill_price(&self, price: f64) {
        *self.fill_price.lock() = price;
    }

    /// Orders recorded so far.
    pub fn submitted(&self) -> Vec<IocOrder> {
        self.orders.lock().clone()
    }
}

impl OrderGateway for MockOrderGateway {
    fn submit_ioc(&self, order: IocOrder) -> BoxFuture<'_, VenueResult<IocFill>> {
        Box::pin(async move {
            if self.fail_next.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(VenueError::OrderRejected("mock rejection".to_string()));
            }
            let override_px = *self.fill_price.lock();
            let avg_price = if override_px > 0.0 {
                override_px
            } else {
                order.limit_px
            };
            let fill = IocFill {
                order_id: 1,
                filled_size: order.size,
                avg_price,
            };
            self.orders.lock().push(order);
            Ok(fill)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_gateway_records_orders() {
        let gateway = MockOrderGateway::new();
        let fill = gateway
            .submit_ioc(IocOrder {
                coin: "BTC".to_string(),
                is_buy: false,
                limit_px: 99_500.0,
                size: 0.01,
            })
            .await
            .unwrap();

        assert_eq!(fill.filled_size, 0.01);
        assert_eq!(fill.avg_price, 99_500.0);
        assert_eq!(gateway.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_gateway_failure_mode() {
        let gateway = MockOrderGateway::new();
        gateway.set_failing(true);
        let err = gateway
            .submit_ioc(IocOrder {
                coin: "BTC".to_string(),
                is_buy: true,
                limit_px: 100_500.0,
                size: 0.01,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, VenueError::OrderRejected(_)));
        assert!(gateway.submitted().is_empty());
    }
}

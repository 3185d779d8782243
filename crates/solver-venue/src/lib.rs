//! Perpetual-venue integration: live L2 order book, account state, and
//! IOC hedge execution.
//!
//! Responsibilities:
//! - Maintain the last-known L2 snapshot with a freshness timestamp and
//!   expose VWAP for a requested size on either side
//! - Stream L2 updates over WebSocket with an idle watchdog and serialized
//!   resubscription
//! - Cache clearinghouse state (10 s) and funding rate (60 s) per field
//! - Submit Immediate-Or-Cancel hedge orders behind a narrow gateway trait

pub mod client;
pub mod error;
pub mod gateway;
pub mod orderbook;
pub mod stream;

pub use client::{AccountState, HedgeFill, VenueClient, VenueConfig};
pub use error::{VenueError, VenueResult};
pub use gateway::{
    BoxFuture, DynOrderGateway, HyperliquidGateway, IocFill, IocOrder, MockOrderGateway,
    OrderGateway,
};
pub use orderbook::{BookLevel, OrderBook, SharedOrderBook};
pub use stream::{wait_ready, L2Stream};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

//! The quoting hot path.
//!
//! [`Quoter::get_quote`] is fully synchronous and performs no I/O: it
//! prices a request against the cached order book, gates it on the risk
//! snapshot, applies the spread, and rounds the resulting amounts in the
//! solver's favor. Every failure maps to a [`RejectReason`] counted in
//! the per-process statistics.
//!
//! [`RejectReason`]: solver_core::RejectReason

pub mod quoter;
pub mod spread;
pub mod stats;

pub use quoter::{Quoter, QuoterConfig};
pub use spread::{run_spot_refresher, SpotPriceFeed, SpreadConfig, SpreadModel};
pub use stats::{QuoterStats, StatsSnapshot};

//! Settlement detection and hedge execution.
//!
//! Published quotes are tracked by nonce and by quote hash until they
//! settle or expire. Settlement is observed on two independent paths
//! (relay notifications and chain polling) and each nonce is hedged at
//! most once regardless of which path fires first. A hedge failure trips
//! the process-wide emergency mode.

pub mod hedger;
pub mod tracker;
pub mod watchdog;

pub use hedger::{
    HedgeVenue, Hedger, HedgerConfig, LifecycleEvent, NonceView, SettlementSource,
};
pub use tracker::{BoundedSet, PendingQuote, QuoteTracker};
pub use watchdog::{run_check, run_watchdog, SolverStatus, WatchdogConfig, WatchdogReport};

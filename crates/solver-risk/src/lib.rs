//! Risk state: the atomic snapshot and the quote-direction policy.
//!
//! A background refresher aggregates venue and chain state into one
//! [`RiskSnapshot`] every few seconds; the quote hot path reads the
//! cached snapshot synchronously and never waits on I/O. A stale
//! snapshot naturally halts quoting.

pub mod error;
pub mod inventory;
pub mod snapshot;

pub use error::{RiskError, RiskResult};
pub use inventory::{run_refresher, InventoryManager, RiskConfig};
pub use snapshot::RiskSnapshot;

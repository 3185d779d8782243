//! Append-only JSONL audit streams.
//!
//! Three streams: trade lifecycle events, position snapshots, and quote
//! phase traces. JSON Lines keeps each record independent, so an
//! interrupted write corrupts at most one line. Every record carries an
//! ISO-8601 `timestamp` and a `type` tag.

pub mod error;
pub mod records;
pub mod writer;

pub use error::{PersistenceError, PersistenceResult};
pub use records::{iso_timestamp, PositionRecord, QuoteTraceRecord, TradeRecord};
pub use writer::JsonlWriter;

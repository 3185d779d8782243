//! Core domain types for the delta-neutral RFQ solver.
//!
//! This crate provides the fundamental types used throughout the solver:
//! - `TokenTable`: immutable BTC/USD token registry with decimal metadata
//! - `QuoteRequest` / `QuoteResult`: the quoting boundary types
//! - `HedgeDirection`, `QuoteDirection`, `RejectReason`: trading enums
//! - Base-unit amount conversion with explicit rounding direction

pub mod error;
pub mod token;
pub mod types;

pub use error::{CoreError, Result};
pub use token::{strip_token_prefix, Rounding, TokenInfo, TokenKind, TokenTable};
pub use types::{
    now_ms, BookSide, HedgeDirection, QuoteDirection, QuoteRequest, QuoteResult, RejectReason,
};

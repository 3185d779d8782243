//! RFQ relay session.
//!
//! A long-lived message session against the solver bus: subscribes to
//! the quote-request and settlement channels, correlates publish
//! submissions with their acknowledgements by id, and reconnects with
//! exponential backoff. One session per process.

pub mod error;
pub mod message;
pub mod session;

pub use error::{RelayError, RelayResult};
pub use message::{
    classify_frame, InboundFrame, QuoteOutput, QuoteResponsePayload, QuoteRequestData, RpcRequest,
    SettlementData, SignedData, SignedPayload, SOLVER_LOST_CODE,
};
pub use session::{ChannelKind, RelayConfig, RelayEvent, RelaySession};

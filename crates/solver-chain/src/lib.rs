//! Settlement-chain integration.
//!
//! Provides:
//! - view calls against the intents contract (multi-token balances,
//!   nonce consumption checks) with a stale-while-revalidate balance cache
//! - synchronous Ed25519 signing over 32-byte digests with a pre-loaded key
//! - the domain-separated digest and message layout for signed intents

pub mod client;
pub mod error;
pub mod intent;
pub mod signer;

pub use client::{ChainClient, ChainConfig};
pub use error::{ChainError, ChainResult};
pub use intent::{
    encode_nonce, generate_nonce, quote_hash, signing_digest, IntentMessage, TokenDiff,
};
pub use signer::IntentSigner;

//! Signed-intent payload construction.
//!
//! The digest is a domain-separated SHA-256 over a fixed 4-byte standard
//! tag followed by the Borsh serialization of the payload
//! `{message, nonce, recipient, callback_url}`. The message itself is a
//! JSON document committing the solver to a token delta.

use base64::Engine;
use borsh::BorshSerialize;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Standard number of the signing scheme.
const STANDARD_NUMBER: u32 = 413;
/// Payload discriminant: `2^30 + standard`, little-endian on the wire.
const PAYLOAD_TAG: u32 = (1 << 30) + STANDARD_NUMBER;

#[derive(BorshSerialize)]
struct SignPayload<'a> {
    message: &'a str,
    nonce: [u8; 32],
    recipient: &'a str,
    callback_url: Option<&'a str>,
}

/// Compute the 32-byte signing digest for an intent message.
pub fn signing_digest(message: &str, recipient: &str, nonce: [u8; 32]) -> [u8; 32] {
    let payload = SignPayload {
        message,
        nonce,
        recipient,
        callback_url: None,
    };

    let mut buffer = Vec::with_capacity(message.len() + recipient.len() + 64);
    PAYLOAD_TAG
        .serialize(&mut buffer)
        .expect("writing to Vec cannot fail");
    payload
        .serialize(&mut buffer)
        .expect("writing to Vec cannot fail");

    Sha256::digest(&buffer).into()
}

/// Generate a fresh 32-byte random nonce.
///
/// Collision probability is negligible; no uniqueness check is performed
/// at tracking time.
pub fn generate_nonce() -> [u8; 32] {
    let mut nonce = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut nonce);
    nonce
}

/// Base64 display form of a nonce, as carried on the wire.
pub fn encode_nonce(nonce: &[u8; 32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(nonce)
}

/// Deterministic digest of a signed intent, used by the relay to address
/// settlement notifications.
pub fn quote_hash(digest: &[u8; 32], signature: &[u8; 64]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(digest);
    hasher.update(signature);
    bs58::encode(hasher.finalize()).into_string()
}

/// One `token_diff` intent: positive delta on the received token,
/// negative on the sent token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDiff {
    pub intent: String,
    /// Token wire id -> signed base-unit delta string.
    pub diff: std::collections::BTreeMap<String, String>,
}

impl TokenDiff {
    /// Build the market-making diff: receive `amount_in` of `token_in`,
    /// send `amount_out` of `token_out`. Wire identifiers keep their
    /// standard prefix here.
    pub fn market_make(
        token_in: &str,
        amount_in: &str,
        token_out: &str,
        amount_out: &str,
    ) -> Self {
        let mut diff = std::collections::BTreeMap::new();
        diff.insert(token_in.to_string(), amount_in.to_string());
        diff.insert(token_out.to_string(), format!("-{amount_out}"));
        Self {
            intent: "token_diff".to_string(),
            diff,
        }
    }
}

/// The JSON message embedded in the signed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentMessage {
    pub signer_id: String,
    /// ISO-8601 deadline.
    pub deadline: String,
    pub intents: Vec<TokenDiff>,
}

impl IntentMessage {
    /// Build a single-diff message with a millisecond deadline.
    pub fn new(signer_id: &str, deadline_ms: i64, diff: TokenDiff) -> Self {
        let deadline = chrono::DateTime::from_timestamp_millis(deadline_ms)
            .unwrap_or_else(chrono::Utc::now)
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        Self {
            signer_id: signer_id.to_string(),
            deadline,
            intents: vec![diff],
        }
    }

    /// Serialize to the exact string that gets signed.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("intent message serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable() {
        let nonce = [3u8; 32];
        let a = signing_digest("hello", "intents.near", nonce);
        let b = signing_digest("hello", "intents.near", nonce);
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_separates_inputs() {
        let nonce = [3u8; 32];
        let base = signing_digest("hello", "intents.near", nonce);
        assert_ne!(base, signing_digest("hellp", "intents.near", nonce));
        assert_ne!(base, signing_digest("hello", "other.near", nonce));
        assert_ne!(base, signing_digest("hello", "intents.near", [4u8; 32]));
    }

    #[test]
    fn test_nonce_encoding_round_trip() {
        let nonce = generate_nonce();
        let encoded = encode_nonce(&nonce);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .unwrap();
        assert_eq!(decoded, nonce);
    }

    #[test]
    fn test_quote_hash_changes_with_signature() {
        let digest = [1u8; 32];
        let a = quote_hash(&digest, &[2u8; 64]);
        let b = quote_hash(&digest, &[3u8; 64]);
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_token_diff_sums_to_zero_shape() {
        let diff = TokenDiff::market_make(
            "nep141:btc.omft.near",
            "1000000",
            "nep141:usdc.omft.near",
            "997000000",
        );
        assert_eq!(diff.intent, "token_diff");
        assert_eq!(diff.diff["nep141:btc.omft.near"], "1000000");
        assert_eq!(diff.diff["nep141:usdc.omft.near"], "-997000000");
        // Received side positive, sent side negative in equal magnitude
        // modulo each token's own unit count.
        assert!(!diff.diff["nep141:btc.omft.near"].starts_with('-'));
        assert!(diff.diff["nep141:usdc.omft.near"].starts_with('-'));
    }

    #[test]
    fn test_intent_message_deadline_iso8601() {
        let diff = TokenDiff::market_make("nep141:a", "1", "nep141:b", "2");
        let message = IntentMessage::new("solver.near", 1_700_000_000_000, diff);
        assert_eq!(message.signer_id, "solver.near");
        assert!(message.deadline.starts_with("2023-11-14T"));
        assert!(message.deadline.ends_with('Z'));

        let json = message.to_json();
        assert!(json.contains("\"intents\""));
        assert!(json.contains("token_diff"));
    }
}

//! Ed25519 intent signing.
//!
//! The key is loaded once at startup from its text encoding
//! (`ed25519:<base58>`); signing is synchronous CPU work and safe to call
//! from the quote hot path.

use crate::error::{ChainError, ChainResult};
use ed25519_dalek::{Signer, SigningKey};
use zeroize::Zeroizing;

/// Pre-loaded Ed25519 signer.
///
/// Never log key material; only the public key has a text form.
pub struct IntentSigner {
    key: SigningKey,
    public_key: String,
}

impl IntentSigner {
    /// Parse a secret key in the chain's text encoding.
    ///
    /// Accepts both 64-byte expanded keypairs and bare 32-byte seeds.
    pub fn from_encoded(encoded: &str) -> ChainResult<Self> {
        let stripped = encoded
            .trim()
            .strip_prefix("ed25519:")
            .ok_or_else(|| ChainError::InvalidKey("missing ed25519: prefix".to_string()))?;

        let decoded = Zeroizing::new(
            bs58::decode(stripped)
                .into_vec()
                .map_err(|e| ChainError::InvalidKey(format!("base58 decode: {e}")))?,
        );

        let seed: [u8; 32] = match decoded.len() {
            32 => decoded[..].try_into().expect("length checked"),
            64 => decoded[..32].try_into().expect("length checked"),
            other => {
                return Err(ChainError::InvalidKey(format!(
                    "unexpected key length {other}"
                )))
            }
        };

        let key = SigningKey::from_bytes(&seed);
        let public_key = format!(
            "ed25519:{}",
            bs58::encode(key.verifying_key().as_bytes()).into_string()
        );
        Ok(Self { key, public_key })
    }

    /// Sign a 32-byte digest. Output is the 64-byte Ed25519 signature.
    pub fn sign(&self, digest: &[u8; 32]) -> [u8; 64] {
        self.key.sign(digest).to_bytes()
    }

    /// Text form of the public key, computed once at init.
    pub fn public_key_string(&self) -> &str {
        &self.public_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;

    fn test_signer() -> IntentSigner {
        let seed = [7u8; 32];
        let encoded = format!("ed25519:{}", bs58::encode(seed).into_string());
        IntentSigner::from_encoded(&encoded).unwrap()
    }

    #[test]
    fn test_sign_verifies() {
        let signer = test_signer();
        let digest = [42u8; 32];
        let signature = signer.sign(&digest);

        let key = SigningKey::from_bytes(&[7u8; 32]);
        let sig = ed25519_dalek::Signature::from_bytes(&signature);
        assert!(key.verifying_key().verify(&digest, &sig).is_ok());
    }

    #[test]
    fn test_signing_is_deterministic() {
        let signer = test_signer();
        let digest = [1u8; 32];
        assert_eq!(signer.sign(&digest), signer.sign(&digest));
    }

    #[test]
    fn test_public_key_encoding() {
        let signer = test_signer();
        let text = signer.public_key_string();
        assert!(text.starts_with("ed25519:"));
        let decoded = bs58::decode(text.strip_prefix("ed25519:").unwrap())
            .into_vec()
            .unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn test_expanded_keypair_accepted() {
        let seed = [9u8; 32];
        let key = SigningKey::from_bytes(&seed);
        let mut expanded = Vec::with_capacity(64);
        expanded.extend_from_slice(&seed);
        expanded.extend_from_slice(key.verifying_key().as_bytes());
        let encoded = format!("ed25519:{}", bs58::encode(&expanded).into_string());

        let signer = IntentSigner::from_encoded(&encoded).unwrap();
        assert_eq!(
            signer.public_key_string(),
            format!(
                "ed25519:{}",
                bs58::encode(key.verifying_key().as_bytes()).into_string()
            )
        );
    }

    #[test]
    fn test_malformed_keys_rejected() {
        assert!(IntentSigner::from_encoded("secp256k1:abc").is_err());
        assert!(IntentSigner::from_encoded("ed25519:!!!").is_err());
        assert!(IntentSigner::from_encoded(&format!(
            "ed25519:{}",
            bs58::encode([1u8; 16]).into_string()
        ))
        .is_err());
    }
}

//! Settlement-chain view client.
//!
//! Balances come from the intents contract's multi-token view with a
//! stale-while-revalidate cache per token: entries younger than the
//! revalidate threshold are served directly, older entries trigger a
//! background refresh, and entries past the hard TTL are refetched
//! inline. Balance failures degrade to zero (upstream treats that as
//! "cannot quote"); nonce checks propagate their errors so the hedger
//! can count consecutive failures.

use crate::error::{ChainError, ChainResult};
use crate::intent::encode_nonce;
use crate::signer::IntentSigner;
use base64::Engine;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Hard TTL for cached balances.
const BALANCE_TTL: Duration = Duration::from_secs(10);
/// Age after which a cached balance is refreshed in the background.
const BALANCE_REVALIDATE: Duration = Duration::from_secs(7);
/// Default timeout for RPC requests.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Chain configuration.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,
    /// Intents contract account holding multi-token balances and nonces.
    pub intents_contract: String,
    /// The solver's own account id (signer and balance owner).
    pub solver_account_id: String,
}

struct BalanceEntry {
    fetched_at: Instant,
    value: u128,
    refreshing: Arc<AtomicBool>,
}

#[derive(Deserialize)]
struct RpcEnvelope {
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct CallResult {
    result: Vec<u8>,
}

/// Settlement-chain client.
pub struct ChainClient {
    config: ChainConfig,
    http: reqwest::Client,
    signer: IntentSigner,
    balances: Arc<DashMap<String, BalanceEntry>>,
}

impl ChainClient {
    /// Create a client with a pre-loaded signing key.
    pub fn new(config: ChainConfig, signer: IntentSigner) -> ChainResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ChainError::Rpc(format!("http client init: {e}")))?;
        Ok(Self {
            config,
            http,
            signer,
            balances: Arc::new(DashMap::new()),
        })
    }

    /// The solver's account id on the settlement chain.
    pub fn account_id(&self) -> &str {
        &self.config.solver_account_id
    }

    /// Sign a 32-byte digest with the pre-loaded Ed25519 key.
    /// Synchronous CPU work, callable from the quote hot path.
    pub fn sign(&self, digest: &[u8; 32]) -> [u8; 64] {
        self.signer.sign(digest)
    }

    /// Text form of the solver's public key.
    pub fn public_key_string(&self) -> &str {
        self.signer.public_key_string()
    }

    async fn view_call(
        http: &reqwest::Client,
        rpc_url: &str,
        contract: &str,
        method: &str,
        args: &serde_json::Value,
    ) -> ChainResult<serde_json::Value> {
        let args_base64 =
            base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(args)?);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "solver",
            "method": "query",
            "params": {
                "request_type": "call_function",
                "finality": "final",
                "account_id": contract,
                "method_name": method,
                "args_base64": args_base64,
            },
        });

        let response = http
            .post(rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Rpc(format!("{method}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChainError::Rpc(format!("{method}: HTTP {status}: {text}")));
        }

        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|e| ChainError::Rpc(format!("{method}: body: {e}")))?;

        if let Some(error) = envelope.error {
            return Err(ChainError::View(format!("{method}: {error}")));
        }
        let result = envelope
            .result
            .ok_or_else(|| ChainError::View(format!("{method}: empty result")))?;
        let call: CallResult = serde_json::from_value(result)?;
        Ok(serde_json::from_slice(&call.result)?)
    }

    async fn fetch_balance(&self, wire_id: &str) -> ChainResult<u128> {
        let args = serde_json::json!({
            "account_id": self.config.solver_account_id,
            "token_id": wire_id,
        });
        let value = Self::view_call(
            &self.http,
            &self.config.rpc_url,
            &self.config.intents_contract,
            "mt_balance_of",
            &args,
        )
        .await?;

        let raw = value
            .as_str()
            .ok_or_else(|| ChainError::View("mt_balance_of: non-string balance".to_string()))?;
        raw.parse()
            .map_err(|_| ChainError::View(format!("mt_balance_of: bad integer {raw}")))
    }

    /// Balance of the intents contract for one token, in base units.
    ///
    /// Failures return 0 with a warning; the quoter then simply finds no
    /// inventory to quote against.
    pub async fn get_balance(self: &Arc<Self>, wire_id: &str) -> u128 {
        if let Some(entry) = self.balances.get(wire_id) {
            let age = entry.fetched_at.elapsed();
            if age < BALANCE_TTL {
                if age >= BALANCE_REVALIDATE {
                    self.spawn_revalidate(wire_id, entry.refreshing.clone());
                }
                return entry.value;
            }
        }

        match self.fetch_balance(wire_id).await {
            Ok(value) => {
                self.store_balance(wire_id, value);
                value
            }
            Err(e) => {
                warn!(token = wire_id, ?e, "Balance read failed, treating as 0");
                0
            }
        }
    }

    fn store_balance(&self, wire_id: &str, value: u128) {
        let refreshing = self
            .balances
            .get(wire_id)
            .map(|e| e.refreshing.clone())
            .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
        self.balances.insert(
            wire_id.to_string(),
            BalanceEntry {
                fetched_at: Instant::now(),
                value,
                refreshing,
            },
        );
    }

    fn spawn_revalidate(self: &Arc<Self>, wire_id: &str, refreshing: Arc<AtomicBool>) {
        if refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return; // refresh already in flight for this key
        }
        let client = Arc::clone(self);
        let token = wire_id.to_string();
        tokio::spawn(async move {
            match client.fetch_balance(&token).await {
                Ok(value) => {
                    client.store_balance(&token, value);
                    debug!(token = %token, value, "Balance revalidated");
                }
                Err(e) => {
                    // Keep the stale value; the hard TTL will force a
                    // blocking refetch soon enough.
                    warn!(token = %token, ?e, "Background balance refresh failed");
                }
            }
            refreshing.store(false, Ordering::SeqCst);
        });
    }

    /// Whether an intent nonce has been consumed on-chain.
    /// Transient failures propagate to the caller.
    pub async fn was_nonce_used(&self, nonce: &[u8; 32]) -> ChainResult<bool> {
        let args = serde_json::json!({
            "account_id": self.config.solver_account_id,
            "nonce": encode_nonce(nonce),
        });
        let value = Self::view_call(
            &self.http,
            &self.config.rpc_url,
            &self.config.intents_contract,
            "is_nonce_used",
            &args,
        )
        .await?;
        value
            .as_bool()
            .ok_or_else(|| ChainError::View("is_nonce_used: non-boolean result".to_string()))
    }

    /// Drop all cached balances (test hook and operator tooling).
    pub fn clear_balance_cache(&self) {
        self.balances.clear();
    }
}

//! Application orchestration.
//!
//! Builds every component, runs the startup sequence (L2 stream ready,
//! venue gateway connected, initial risk snapshot), then drives the main
//! event loop: quote requests through the synchronous quoter, publishes
//! through the relay, settlements into the hedger, lifecycle events into
//! the audit streams.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use parking_lot::Mutex;
use solver_chain::{
    encode_nonce, generate_nonce, quote_hash, signing_digest, ChainClient, ChainConfig,
    IntentMessage, IntentSigner, TokenDiff,
};
use solver_core::{now_ms, QuoteRequest, QuoteResult, TokenTable};
use solver_hedger::{
    run_watchdog, Hedger, LifecycleEvent, PendingQuote, WatchdogConfig, WatchdogReport,
};
use solver_persistence::{JsonlWriter, PositionRecord, QuoteTraceRecord, TradeRecord};
use solver_quoter::{run_spot_refresher, Quoter, SpotPriceFeed, SpreadModel};
use solver_relay::{
    QuoteOutput, QuoteResponsePayload, RelayConfig, RelayError, RelayEvent, RelaySession,
    SignedData, SignedPayload,
};
use solver_risk::{run_refresher, InventoryManager};
use solver_venue::{
    wait_ready, HyperliquidGateway, L2Stream, SharedOrderBook, VenueClient, VenueConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long to wait for the first L2 frame at startup.
const STREAM_READY_TIMEOUT: Duration = Duration::from_secs(30);
/// Venue gateway connection attempts before giving up.
const GATEWAY_CONNECT_ATTEMPTS: u32 = 3;

type SharedWriter<T> = Arc<Mutex<JsonlWriter<T>>>;

/// The assembled solver.
pub struct Application {
    config: AppConfig,
    tokens: Arc<TokenTable>,
    shutdown: CancellationToken,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let tokens = Arc::new(config.token_table()?);
        Ok(Self {
            config,
            tokens,
            shutdown: CancellationToken::new(),
        })
    }

    /// Run until ctrl-c. Startup failures return an error and the
    /// process exits non-zero.
    pub async fn run(self) -> AppResult<()> {
        solver_venue::init_crypto();

        // Chain client with the pre-loaded signing key.
        let chain_key = AppConfig::secret_from_env(&self.config.chain.key_env)?;
        let signer = IntentSigner::from_encoded(&chain_key)?;
        info!(public_key = signer.public_key_string(), "Loaded solver key");
        let chain = Arc::new(ChainClient::new(
            ChainConfig {
                rpc_url: self.config.chain.rpc_url.clone(),
                intents_contract: self.config.chain.intents_contract.clone(),
                solver_account_id: self.config.chain.solver_account_id.clone(),
            },
            signer,
        )?);

        // Order book + L2 stream; init completes on the first frame.
        let book = SharedOrderBook::new(self.config.venue.max_orderbook_age_ms);
        let (stream, ready) = L2Stream::new(
            self.config.venue.ws_url.clone(),
            self.config.venue.coin.clone(),
            book.clone(),
            self.shutdown.clone(),
        );
        tokio::spawn(stream.run());
        wait_ready(ready, STREAM_READY_TIMEOUT)
            .await
            .map_err(|e| AppError::Startup(format!("L2 stream never became ready: {e}")))?;
        info!("Order book live");

        // Venue order gateway, with retries.
        let venue_key = AppConfig::secret_from_env(&self.config.venue.key_env)?;
        let wallet: alloy::signers::local::PrivateKeySigner = venue_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| AppError::Startup(format!("invalid venue key: {e}")))?;
        let gateway = connect_gateway(wallet, self.config.venue.mainnet).await?;

        let venue = Arc::new(VenueClient::new(
            VenueConfig {
                info_url: self.config.venue.info_url.clone(),
                user_address: self.config.venue.user_address.clone(),
                coin: self.config.venue.coin.clone(),
                hedge_slippage_bps: self.config.venue.hedge_slippage_bps,
                ..VenueConfig::default()
            },
            book.clone(),
            gateway,
        )?);

        // Risk state; the first snapshot must succeed before quoting.
        let inventory = Arc::new(InventoryManager::new(self.config.risk.clone()));
        inventory
            .refresh_snapshot(&venue, &chain, &self.tokens)
            .await
            .map_err(|e| AppError::Startup(format!("initial risk snapshot failed: {e}")))?;
        info!("Initial risk snapshot installed");
        tokio::spawn(run_refresher(
            inventory.clone(),
            venue.clone(),
            chain.clone(),
            self.tokens.clone(),
            self.shutdown.clone(),
        ));

        // Optional spot feed for the dynamic spread.
        let spot_feed = match (&self.config.spot, self.config.spread.dynamic_enabled) {
            (Some(section), true) => {
                let feed = Arc::new(SpotPriceFeed::new(Duration::from_secs(section.refresh_secs)));
                tokio::spawn(run_spot_refresher(
                    feed.clone(),
                    section.primary_url.clone(),
                    section.fallback_url.clone(),
                    Duration::from_secs(section.refresh_secs),
                    self.shutdown.clone(),
                ));
                Some(feed)
            }
            _ => None,
        };

        let quoter = Arc::new(Quoter::new(
            self.config.quoter.clone(),
            book.clone(),
            inventory.clone(),
            self.tokens.clone(),
            SpreadModel::new(self.config.spread.clone(), book.clone(), spot_feed),
        ));

        // Hedger with its lifecycle event stream.
        let (lifecycle_tx, mut lifecycle_rx) = mpsc::unbounded_channel();
        let hedger = Arc::new(Hedger::new(
            self.config.hedger.clone(),
            venue.clone(),
            chain.clone(),
            inventory.clone(),
            lifecycle_tx,
        ));
        tokio::spawn(hedger.clone().run(self.shutdown.clone()));

        // Drift watchdog.
        let (watchdog_tx, mut watchdog_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_watchdog(
            WatchdogConfig {
                drift_threshold_btc: self.config.watchdog.drift_threshold_btc,
                interval: Duration::from_secs(self.config.watchdog.interval_secs),
            },
            inventory.clone(),
            quoter.stats_handle(),
            watchdog_tx,
            self.shutdown.clone(),
        ));

        // Audit streams.
        let audit = &self.config.audit;
        let trades: SharedWriter<TradeRecord> = Arc::new(Mutex::new(JsonlWriter::new(
            &audit.data_dir,
            "trades",
            audit.buffer_size,
        )));
        let positions: SharedWriter<PositionRecord> = Arc::new(Mutex::new(JsonlWriter::new(
            &audit.data_dir,
            "positions",
            audit.buffer_size,
        )));
        let traces: SharedWriter<QuoteTraceRecord> = Arc::new(Mutex::new(JsonlWriter::new(
            &audit.data_dir,
            "quotes",
            audit.buffer_size,
        )));

        // Relay session.
        let (event_tx, mut event_rx) = mpsc::channel(256);
        let relay = Arc::new(RelaySession::new(
            RelayConfig {
                ws_url: self.config.relay.ws_url.clone(),
                quote_channel: self.config.relay.quote_channel.clone(),
                settlement_channel: self.config.relay.settlement_channel.clone(),
                publish_timeout_ms: self.config.relay.publish_timeout_ms,
                ..RelayConfig::default()
            },
            event_tx,
            self.shutdown.clone(),
        ));
        tokio::spawn(relay.clone().run());

        info!("Entering main event loop");
        loop {
            tokio::select! {
                Some(event) = event_rx.recv() => match event {
                    RelayEvent::QuoteRequest(data) => {
                        let request: QuoteRequest = data.into();
                        self.handle_quote_request(
                            request,
                            &quoter,
                            &chain,
                            &relay,
                            &hedger,
                            &traces,
                        );
                    }
                    RelayEvent::Settlement(settlement) => {
                        let hedger = hedger.clone();
                        tokio::spawn(async move {
                            hedger
                                .on_settlement_event(
                                    &settlement.quote_hash,
                                    &settlement.intent_hash,
                                )
                                .await;
                        });
                    }
                },

                Some(event) = lifecycle_rx.recv() => {
                    if let Err(e) = trades.lock().append(trade_record_from(&event)) {
                        warn!(?e, "Failed to append trade record");
                    }
                }

                Some(report) = watchdog_rx.recv() => {
                    if let Err(e) = positions.lock().append(position_record_from(&report)) {
                        warn!(?e, "Failed to append position record");
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown.cancel();
        for result in [
            trades.lock().close(),
            positions.lock().close(),
            traces.lock().close(),
        ] {
            if let Err(e) = result {
                warn!(?e, "Audit stream close failed");
            }
        }
        info!("Solver stopped");
        Ok(())
    }

    /// Price synchronously, then sign/publish/track in a spawned task so
    /// a slow relay ack never blocks the next request.
    fn handle_quote_request(
        &self,
        request: QuoteRequest,
        quoter: &Arc<Quoter>,
        chain: &Arc<ChainClient>,
        relay: &Arc<RelaySession>,
        hedger: &Arc<Hedger>,
        traces: &SharedWriter<QuoteTraceRecord>,
    ) {
        append_trace(traces, QuoteTraceRecord::new("QUOTE_RECEIVED", &request.quote_id));

        let quote = match quoter.get_quote(&request) {
            Ok(quote) => quote,
            Err(reason) => {
                let mut record = QuoteTraceRecord::new("QUOTE_REJECTED", &request.quote_id);
                record.reason = Some(reason.as_str().to_string());
                append_trace(traces, record);
                return;
            }
        };

        let mut record = QuoteTraceRecord::new("QUOTE_GENERATED", &request.quote_id);
        record.amount = Some(quote.amount.clone());
        record.btc_size = Some(quote.btc_size);
        record.quoted_price = Some(quote.quoted_price);
        record.spread_bps = Some(quote.spread_bps);
        append_trace(traces, record);

        let signed = sign_quote(
            chain,
            &request,
            &quote,
            self.config.relay.quote_ttl_ms,
        );

        let relay = relay.clone();
        let hedger = hedger.clone();
        let traces = traces.clone();
        tokio::spawn(async move {
            let params = serde_json::json!([signed.payload]);
            match relay.publish("quote_response", params).await {
                Ok(_ack) => {
                    // Tracking strictly follows the publish ack; an
                    // earlier settlement event would have found nothing,
                    // which reads as another solver's win.
                    hedger.track_quote(signed.pending);
                    append_trace(
                        &traces,
                        QuoteTraceRecord::new("QUOTE_PUBLISHED", &signed.quote_id),
                    );
                }
                Err(RelayError::SolverLost) => {
                    append_trace(
                        &traces,
                        QuoteTraceRecord::new("SOLVER_LOST", &signed.quote_id),
                    );
                }
                Err(e) => {
                    warn!(?e, quote_id = %signed.quote_id, "Quote publish failed");
                    let mut record = QuoteTraceRecord::new("PUBLISH_FAILED", &signed.quote_id);
                    record.reason = Some(e.to_string());
                    append_trace(&traces, record);
                }
            }
        });
    }
}

/// A signed quote ready for publication.
struct SignedQuote {
    quote_id: String,
    payload: QuoteResponsePayload,
    pending: PendingQuote,
}

/// Build the intent message, sign it, and prepare both the relay payload
/// and the hedger's pending record. Synchronous CPU work.
fn sign_quote(
    chain: &ChainClient,
    request: &QuoteRequest,
    quote: &QuoteResult,
    quote_ttl_ms: i64,
) -> SignedQuote {
    let (amount_in, amount_out) = if quote.is_exact_out {
        (
            quote.amount.clone(),
            request.amount_out.clone().unwrap_or_default(),
        )
    } else {
        (
            request.amount_in.clone().unwrap_or_default(),
            quote.amount.clone(),
        )
    };

    let deadline_ms = request.min_deadline_ms.max(now_ms() + quote_ttl_ms);
    let diff = TokenDiff::market_make(
        &request.token_in,
        &amount_in,
        &request.token_out,
        &amount_out,
    );
    let message = IntentMessage::new(chain.account_id(), deadline_ms, diff).to_json();

    let nonce = generate_nonce();
    let recipient = chain.account_id().to_string();
    let digest = signing_digest(&message, &recipient, nonce);
    let signature = chain.sign(&digest);
    let hash = quote_hash(&digest, &signature);

    let payload = QuoteResponsePayload {
        quote_id: request.quote_id.clone(),
        quote_output: if quote.is_exact_out {
            QuoteOutput {
                amount_out: None,
                amount_in: Some(quote.amount.clone()),
            }
        } else {
            QuoteOutput {
                amount_out: Some(quote.amount.clone()),
                amount_in: None,
            }
        },
        signed_data: SignedData {
            standard: "nep413".to_string(),
            payload: SignedPayload {
                message,
                nonce: encode_nonce(&nonce),
                recipient,
            },
            signature: format!("ed25519:{}", bs58::encode(signature).into_string()),
            public_key: chain.public_key_string().to_string(),
        },
    };

    let pending = PendingQuote {
        nonce,
        nonce_b64: encode_nonce(&nonce),
        quote_hash: hash,
        hedge_direction: quote.hedge_direction(),
        btc_size: quote.btc_size,
        deadline_ms,
        first_seen_ms: now_ms(),
        quoted_price: Some(quote.quoted_price),
        spread_bps: Some(quote.spread_bps),
    };

    SignedQuote {
        quote_id: request.quote_id.clone(),
        payload,
        pending,
    }
}

async fn connect_gateway(
    wallet: alloy::signers::local::PrivateKeySigner,
    mainnet: bool,
) -> AppResult<Arc<HyperliquidGateway>> {
    let mut last_error = None;
    for attempt in 1..=GATEWAY_CONNECT_ATTEMPTS {
        match HyperliquidGateway::connect(wallet.clone(), mainnet).await {
            Ok(gateway) => return Ok(Arc::new(gateway)),
            Err(e) => {
                error!(attempt, ?e, "Venue gateway connect failed");
                last_error = Some(e);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
    Err(AppError::Startup(format!(
        "venue gateway unreachable after {GATEWAY_CONNECT_ATTEMPTS} attempts: {}",
        last_error.expect("at least one attempt failed")
    )))
}

fn append_trace(traces: &SharedWriter<QuoteTraceRecord>, record: QuoteTraceRecord) {
    if let Err(e) = traces.lock().append(record) {
        warn!(?e, "Failed to append quote trace");
    }
}

/// Map a hedger lifecycle event onto the trade audit stream.
fn trade_record_from(event: &LifecycleEvent) -> TradeRecord {
    match event {
        LifecycleEvent::SettlementDetected {
            nonce_b64,
            quote_hash,
            reason,
            ..
        } => {
            let mut record = TradeRecord::new("SETTLEMENT_DETECTED", nonce_b64, quote_hash);
            record.reason = reason.map(|r| r.to_string());
            record
        }
        LifecycleEvent::HedgeExecuted {
            nonce_b64,
            quote_hash,
            direction,
            size,
            price,
            pnl_estimate,
        } => {
            let mut record = TradeRecord::new("HEDGE_EXECUTED", nonce_b64, quote_hash);
            record.direction = Some(direction.to_string());
            record.size_btc = Some(*size);
            record.price = Some(*price);
            record.pnl_estimate_usd = *pnl_estimate;
            record
        }
        LifecycleEvent::HedgeFailed {
            nonce_b64,
            quote_hash,
            direction,
            size,
            error,
        } => {
            let mut record = TradeRecord::new("HEDGE_FAILED", nonce_b64, quote_hash);
            record.direction = Some(direction.to_string());
            record.size_btc = Some(*size);
            record.error = Some(error.clone());
            record
        }
        LifecycleEvent::QuoteExpired {
            nonce_b64,
            quote_hash,
        } => TradeRecord::new("QUOTE_EXPIRED", nonce_b64, quote_hash),
    }
}

/// Map a watchdog report onto the position audit stream.
fn position_record_from(report: &WatchdogReport) -> PositionRecord {
    let mut record = PositionRecord::new(
        &report.status.to_string(),
        report.net_delta_btc,
        report.drift_alert,
    );
    if let Some(snapshot) = report.snapshot {
        record.margin_usd = Some(snapshot.margin_usd);
        record.perp_btc = Some(snapshot.perp_btc);
        record.btc_on_chain = Some(snapshot.btc_on_chain);
        record.usd_on_chain = Some(snapshot.usd_on_chain);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use solver_core::HedgeDirection;
    use solver_hedger::SolverStatus;
    use solver_risk::RiskSnapshot;

    fn chain_fixture() -> ChainClient {
        let signer = IntentSigner::from_encoded(&format!(
            "ed25519:{}",
            bs58::encode([11u8; 32]).into_string()
        ))
        .unwrap();
        ChainClient::new(
            ChainConfig {
                rpc_url: "http://127.0.0.1:1/rpc".to_string(),
                intents_contract: "intents.near".to_string(),
                solver_account_id: "solver.near".to_string(),
            },
            signer,
        )
        .unwrap()
    }

    fn quote_fixture() -> (QuoteRequest, QuoteResult) {
        let request = QuoteRequest {
            quote_id: "q-1".to_string(),
            token_in: "nep141:btc.omft.near".to_string(),
            token_out: "nep141:usdc.omft.near".to_string(),
            amount_in: Some("1000000".to_string()),
            amount_out: None,
            min_deadline_ms: now_ms() + 120_000,
        };
        let quote = QuoteResult {
            amount: "997000000".to_string(),
            btc_size: 0.01,
            we_are_buying_btc: true,
            btc_token_id: "nep141:btc.omft.near".to_string(),
            usd_token_id: "nep141:usdc.omft.near".to_string(),
            is_exact_out: false,
            quoted_price: 99_700.0,
            spread_bps: 30.0,
        };
        (request, quote)
    }

    #[test]
    fn test_sign_quote_builds_consistent_payload() {
        let chain = chain_fixture();
        let (request, quote) = quote_fixture();

        let signed = sign_quote(&chain, &request, &quote, 60_000);

        assert_eq!(signed.quote_id, "q-1");
        assert_eq!(
            signed.payload.quote_output.amount_out.as_deref(),
            Some("997000000")
        );
        assert!(signed.payload.quote_output.amount_in.is_none());
        assert_eq!(signed.payload.signed_data.standard, "nep413");
        assert!(signed.payload.signed_data.signature.starts_with("ed25519:"));
        assert_eq!(
            signed.payload.signed_data.public_key,
            chain.public_key_string()
        );

        // The message commits to both sides of the diff.
        let message: serde_json::Value =
            serde_json::from_str(&signed.payload.signed_data.payload.message).unwrap();
        assert_eq!(message["signer_id"], "solver.near");
        assert_eq!(
            message["intents"][0]["diff"]["nep141:btc.omft.near"],
            "1000000"
        );
        assert_eq!(
            message["intents"][0]["diff"]["nep141:usdc.omft.near"],
            "-997000000"
        );

        // Pending record mirrors the quote.
        assert_eq!(signed.pending.hedge_direction, HedgeDirection::Short);
        assert_eq!(signed.pending.btc_size, 0.01);
        assert_eq!(signed.pending.nonce_b64, encode_nonce(&signed.pending.nonce));
        // The requested minimum deadline dominates the default TTL here.
        assert_eq!(signed.pending.deadline_ms, request.min_deadline_ms);
    }

    #[test]
    fn test_sign_quote_exact_out_uses_amount_in() {
        let chain = chain_fixture();
        let (mut request, mut quote) = quote_fixture();
        request.amount_in = None;
        request.amount_out = Some("1000000000".to_string());
        request.min_deadline_ms = 0;
        quote.is_exact_out = true;
        quote.amount = "1003009".to_string();

        let signed = sign_quote(&chain, &request, &quote, 60_000);

        assert_eq!(
            signed.payload.quote_output.amount_in.as_deref(),
            Some("1003009")
        );
        assert!(signed.payload.quote_output.amount_out.is_none());
        // TTL applies when the request carries no usable minimum.
        assert!(signed.pending.deadline_ms >= now_ms() + 59_000);
    }

    #[test]
    fn test_trade_record_mapping() {
        let record = trade_record_from(&LifecycleEvent::HedgeExecuted {
            nonce_b64: "n1".to_string(),
            quote_hash: "H1".to_string(),
            direction: HedgeDirection::Short,
            size: 0.01,
            price: 100_050.0,
            pnl_estimate: Some(0.5),
        });
        assert_eq!(record.event_type, "HEDGE_EXECUTED");
        assert_eq!(record.direction.as_deref(), Some("SHORT"));
        assert_eq!(record.pnl_estimate_usd, Some(0.5));

        let record = trade_record_from(&LifecycleEvent::QuoteExpired {
            nonce_b64: "n2".to_string(),
            quote_hash: "H2".to_string(),
        });
        assert_eq!(record.event_type, "QUOTE_EXPIRED");
        assert!(record.direction.is_none());
    }

    #[test]
    fn test_position_record_mapping() {
        let report = WatchdogReport {
            snapshot: Some(RiskSnapshot {
                updated_at_ms: now_ms(),
                margin_usd: 10_000.0,
                perp_btc: -1.0,
                funding_rate_hourly: 0.0,
                btc_on_chain: 1.02,
                usd_on_chain: 50_000.0,
            }),
            net_delta_btc: 0.02,
            drift_alert: false,
            status: SolverStatus::Ready,
        };
        let record = position_record_from(&report);
        assert_eq!(record.event_type, "POSITION_SNAPSHOT");
        assert_eq!(record.status, "READY");
        assert_eq!(record.perp_btc, Some(-1.0));
    }
}

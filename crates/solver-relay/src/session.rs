//! Relay session lifecycle.
//!
//! Connects, subscribes to the quote-request and settlement channels,
//! then routes inbound frames: subscription acks populate the
//! `subscription id -> channel` map, publish replies resolve their
//! waiters, events dispatch to the application. On close, every pending
//! waiter resolves with a connection-closed error and the session
//! reconnects with exponential backoff.

use crate::error::{RelayError, RelayResult};
use crate::message::{
    classify_frame, InboundFrame, QuoteRequestData, RpcRequest, SettlementData, SOLVER_LOST_CODE,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Which bus channel a subscription belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    QuoteRequests,
    Settlements,
}

/// Events surfaced to the application.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    QuoteRequest(QuoteRequestData),
    Settlement(SettlementData),
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bus WebSocket URL.
    pub ws_url: String,
    /// Quote-request channel name.
    pub quote_channel: String,
    /// Settlement-notification channel name.
    pub settlement_channel: String,
    /// How long a publish waits for its ack.
    pub publish_timeout_ms: u64,
    /// Backoff base delay.
    pub reconnect_base_delay_ms: u64,
    /// Backoff ceiling.
    pub reconnect_max_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            quote_channel: "quote".to_string(),
            settlement_channel: "quote_status".to_string(),
            publish_timeout_ms: 8_000,
            reconnect_base_delay_ms: 5_000,
            reconnect_max_delay_ms: 60_000,
        }
    }
}

type Waiter = oneshot::Sender<RelayResult<serde_json::Value>>;

/// Long-lived bus session. One per process.
pub struct RelaySession {
    config: RelayConfig,
    next_id: AtomicU64,
    /// Publish waiters by request id.
    pending_requests: Mutex<HashMap<u64, Waiter>>,
    /// Subscribe-request ids awaiting their ack.
    pending_subscribes: Mutex<HashMap<u64, ChannelKind>>,
    /// Subscription id -> channel, rebuilt on every connect.
    subscriptions: Mutex<HashMap<String, ChannelKind>>,
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<String>>,
    event_tx: mpsc::Sender<RelayEvent>,
    shutdown: CancellationToken,
}

impl RelaySession {
    pub fn new(
        config: RelayConfig,
        event_tx: mpsc::Sender<RelayEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(128);
        Self {
            config,
            next_id: AtomicU64::new(1),
            pending_requests: Mutex::new(HashMap::new()),
            pending_subscribes: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            event_tx,
            shutdown,
        }
    }

    /// Submit a request and wait for the matching reply.
    ///
    /// A relay error `-32098` means another solver won; it maps to
    /// [`RelayError::SolverLost`].
    pub async fn publish(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> RelayResult<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending_requests.lock().insert(id, tx);

        let frame = RpcRequest::new(id, method, params).to_text();
        if self.outbound_tx.send(frame).await.is_err() {
            self.pending_requests.lock().remove(&id);
            return Err(RelayError::ConnectionClosed);
        }

        let timeout = Duration::from_millis(self.config.publish_timeout_ms);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RelayError::ConnectionClosed),
            Err(_) => {
                self.pending_requests.lock().remove(&id);
                Err(RelayError::PublishTimeout)
            }
        }
    }

    /// Run the session until shutdown, reconnecting with exponential
    /// backoff `min(base * 2^(n-1), max)`. The attempt counter resets on
    /// every successful open.
    pub async fn run(self: Arc<Self>) {
        let mut attempt = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                info!("Relay session shutdown requested");
                return;
            }

            match self.run_connection(&mut attempt).await {
                Ok(()) => {
                    info!("Relay session closed cleanly");
                    return;
                }
                Err(e) => {
                    error!(?e, "Relay connection ended");
                }
            }

            self.fail_pending();
            self.subscriptions.lock().clear();
            self.pending_subscribes.lock().clear();

            attempt += 1;
            let delay = backoff_delay(
                attempt,
                self.config.reconnect_base_delay_ms,
                self.config.reconnect_max_delay_ms,
            );
            warn!(attempt, delay_ms = delay.as_millis(), "Relay reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown.cancelled() => return,
            }
        }
    }

    /// One connection lifecycle. Returns `Ok` only on shutdown.
    async fn run_connection(self: &Arc<Self>, attempt: &mut u32) -> RelayResult<()> {
        info!(url = %self.config.ws_url, "Connecting to relay");
        let (ws_stream, _response) = connect_async(&self.config.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();
        // A successful open starts the backoff schedule over.
        *attempt = 0;
        info!("Relay connected");

        // Subscribe to both channels, remembering which init id belongs
        // to which channel so the acks can be routed.
        for (channel, kind) in [
            (&self.config.quote_channel, ChannelKind::QuoteRequests),
            (&self.config.settlement_channel, ChannelKind::Settlements),
        ] {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.pending_subscribes.lock().insert(id, kind);
            write
                .send(Message::Text(RpcRequest::subscribe(id, channel).to_text()))
                .await?;
        }

        let mut outbound_rx = self.outbound_rx.lock().await;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("Closing relay session");
                    let _ = write.send(Message::Close(None)).await;
                    self.fail_pending();
                    return Ok(());
                }

                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(text) => write.send(Message::Text(text)).await?,
                        None => return Ok(()),
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            warn!(?frame, "Relay closed the connection");
                            return Err(RelayError::ConnectionClosed);
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(RelayError::ConnectionClosed),
                        _ => {}
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(?e, "Unparseable relay frame");
                return;
            }
        };

        match classify_frame(&value) {
            InboundFrame::Ack { id, result } => {
                if let Some(kind) = self.pending_subscribes.lock().remove(&id) {
                    if let Some(subscription) = result.as_str() {
                        info!(?kind, subscription, "Channel subscription confirmed");
                        self.subscriptions
                            .lock()
                            .insert(subscription.to_string(), kind);
                    } else {
                        warn!(?kind, ?result, "Subscription ack without id");
                    }
                    return;
                }
                if let Some(waiter) = self.pending_requests.lock().remove(&id) {
                    let _ = waiter.send(Ok(result));
                } else {
                    debug!(id, "Ack for unknown request id");
                }
            }

            InboundFrame::Error { id, code, message } => {
                self.pending_subscribes.lock().remove(&id);
                if let Some(waiter) = self.pending_requests.lock().remove(&id) {
                    let error = if code == SOLVER_LOST_CODE {
                        RelayError::SolverLost
                    } else {
                        RelayError::Relay { code, message }
                    };
                    let _ = waiter.send(Err(error));
                }
            }

            InboundFrame::Event { subscription, data } => {
                let kind = self.subscriptions.lock().get(&subscription).copied();
                match kind {
                    Some(ChannelKind::QuoteRequests) => {
                        match serde_json::from_value::<QuoteRequestData>(data) {
                            Ok(request) => {
                                if self
                                    .event_tx
                                    .send(RelayEvent::QuoteRequest(request))
                                    .await
                                    .is_err()
                                {
                                    warn!("Event receiver dropped");
                                }
                            }
                            Err(e) => warn!(?e, "Malformed quote request event"),
                        }
                    }
                    Some(ChannelKind::Settlements) => {
                        match serde_json::from_value::<SettlementData>(data) {
                            Ok(settlement) => {
                                if self
                                    .event_tx
                                    .send(RelayEvent::Settlement(settlement))
                                    .await
                                    .is_err()
                                {
                                    warn!("Event receiver dropped");
                                }
                            }
                            Err(e) => warn!(?e, "Malformed settlement event"),
                        }
                    }
                    None => debug!(subscription, "Event for unknown subscription"),
                }
            }

            InboundFrame::Unknown => {
                debug!("Dropping unclassified relay frame");
            }
        }
    }

    /// Resolve every pending waiter with a connection-closed error.
    fn fail_pending(&self) {
        let waiters: Vec<Waiter> = {
            let mut guard = self.pending_requests.lock();
            guard.drain().map(|(_, w)| w).collect()
        };
        for waiter in waiters {
            let _ = waiter.send(Err(RelayError::ConnectionClosed));
        }
    }
}

fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let delay = base_ms.saturating_mul(1u64 << exponent).min(max_ms);
    Duration::from_millis(delay)
}

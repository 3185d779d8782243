//! L2 order-book stream.
//!
//! One subscription to the venue's `l2Book` channel feeds the shared
//! book. A watchdog checks every 10 s that an update arrived within the
//! last 30 s; an idle stream is torn down and resubscribed, serialized
//! by a single in-flight flag. Initialization completes only after the
//! first frame lands.

use crate::error::{VenueError, VenueResult};
use crate::orderbook::{BookLevel, OrderBook, SharedOrderBook};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use solver_core::now_ms;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Watchdog check interval.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);
/// Stream is considered idle after this long without an update.
const IDLE_CUTOFF_MS: i64 = 30_000;
/// Delay between resubscription attempts.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct WireLevel {
    px: String,
    sz: String,
}

#[derive(Debug, Deserialize)]
struct L2Data {
    coin: String,
    /// `[bids, asks]`, bids best-first descending, asks ascending.
    levels: Vec<Vec<WireLevel>>,
}

#[derive(Debug, Deserialize)]
struct ChannelFrame {
    channel: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// L2 stream task.
pub struct L2Stream {
    ws_url: String,
    coin: String,
    book: SharedOrderBook,
    ready_tx: watch::Sender<bool>,
    resubscribe_inflight: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl L2Stream {
    /// Create the stream task and a readiness receiver that flips to
    /// `true` once the first frame has been applied.
    pub fn new(
        ws_url: impl Into<String>,
        coin: impl Into<String>,
        book: SharedOrderBook,
        shutdown: CancellationToken,
    ) -> (Self, watch::Receiver<bool>) {
        let (ready_tx, ready_rx) = watch::channel(false);
        (
            Self {
                ws_url: ws_url.into(),
                coin: coin.into(),
                book,
                ready_tx,
                resubscribe_inflight: Arc::new(AtomicBool::new(false)),
                shutdown,
            },
            ready_rx,
        )
    }

    /// Run the stream until shutdown, resubscribing whenever the
    /// connection drops or goes idle.
    pub async fn run(self) {
        loop {
            if self.shutdown.is_cancelled() {
                info!("L2 stream shutdown requested");
                return;
            }

            // Serialize resubscribes: one in flight at a time.
            if self
                .resubscribe_inflight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                continue;
            }

            let outcome = self.run_session().await;
            self.resubscribe_inflight.store(false, Ordering::SeqCst);

            match outcome {
                Ok(()) => return, // clean shutdown
                Err(e) => {
                    warn!(?e, "L2 session ended, resubscribing");
                }
            }

            tokio::select! {
                () = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                () = self.shutdown.cancelled() => return,
            }
        }
    }

    /// One connect-subscribe-read cycle. Returns `Ok` only on shutdown.
    async fn run_session(&self) -> VenueResult<()> {
        info!(url = %self.ws_url, coin = %self.coin, "Connecting L2 stream");
        let (ws_stream, _response) = connect_async(&self.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = serde_json::json!({
            "method": "subscribe",
            "subscription": {"type": "l2Book", "coin": self.coin},
        });
        write.send(Message::Text(subscribe.to_string())).await?;

        let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; consume it.
        watchdog.tick().await;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }

                _ = watchdog.tick() => {
                    let last = self.book.last_update_ms();
                    if last > 0 && now_ms() - last >= IDLE_CUTOFF_MS {
                        warn!(age_ms = now_ms() - last, "L2 stream idle, tearing down");
                        let _ = write.send(Message::Close(None)).await;
                        return Err(VenueError::Stream("idle stream".to_string()));
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_frame(&text) {
                                debug!(?e, "Ignoring unparseable frame");
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            warn!(?frame, "L2 stream closed by server");
                            return Err(VenueError::Stream("closed by server".to_string()));
                        }
                        Some(Err(e)) => {
                            error!(?e, "L2 stream read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("L2 stream ended");
                            return Err(VenueError::Stream("stream ended".to_string()));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) -> VenueResult<()> {
        let frame: ChannelFrame = serde_json::from_str(text)?;
        match frame.channel.as_str() {
            "l2Book" => {
                let data: L2Data = serde_json::from_value(frame.data)?;
                if data.coin != self.coin {
                    return Ok(());
                }
                self.apply_snapshot(&data)?;
            }
            "subscriptionResponse" => {
                debug!("L2 subscription acknowledged");
            }
            other => {
                debug!(channel = other, "Ignoring unrelated channel");
            }
        }
        Ok(())
    }

    fn apply_snapshot(&self, data: &L2Data) -> VenueResult<()> {
        let parse_side = |levels: &[WireLevel]| -> VenueResult<Vec<BookLevel>> {
            levels
                .iter()
                .map(|l| {
                    let price = l
                        .px
                        .parse()
                        .map_err(|_| VenueError::Stream(format!("bad px: {}", l.px)))?;
                    let size = l
                        .sz
                        .parse()
                        .map_err(|_| VenueError::Stream(format!("bad sz: {}", l.sz)))?;
                    Ok(BookLevel { price, size })
                })
                .collect()
        };

        let bids = data.levels.first().map(|s| parse_side(s)).transpose()?;
        let asks = data.levels.get(1).map(|s| parse_side(s)).transpose()?;

        self.book.replace(OrderBook {
            bids: bids.unwrap_or_default(),
            asks: asks.unwrap_or_default(),
            last_update_ms: now_ms(),
        });

        // Readiness flips once, on the first applied frame.
        if !*self.ready_tx.borrow() {
            let _ = self.ready_tx.send(true);
            info!(coin = %self.coin, "First L2 frame applied");
        }
        Ok(())
    }
}

/// Wait until the stream has applied its first frame, bounded by
/// `timeout`.
pub async fn wait_ready(
    mut ready_rx: watch::Receiver<bool>,
    timeout: Duration,
) -> VenueResult<()> {
    let wait = async {
        while !*ready_rx.borrow() {
            if ready_rx.changed().await.is_err() {
                return Err(VenueError::Stream("stream task dropped".to_string()));
            }
        }
        Ok(())
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| VenueError::NotInitialized)?
}

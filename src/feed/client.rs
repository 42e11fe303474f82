//! One long-lived authenticated WebSocket to the market-data provider
//! (spec.md §4.1). Owns reconnect/backoff, subscription batching, and frame
//! parsing; everything it decodes lands on the tick queue.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

use crate::config::settings::Settings;
use crate::hub::news::NewsSink;
use crate::model::Symbol;
use crate::queue::TickQueue;
use crate::subscriptions::UpstreamControl;
use crate::utils::errors::FeedError;

use super::protocol::{AuthFrame, Channel, InboundFrame, RawFrame, SubscribeFrame};

const SUBSCRIBE_BATCH_WINDOW: Duration = Duration::from_millis(50);

/// Reconnect if no frame (data or `Ping`) arrives within this window — the
/// provider pings more often than this when healthy (spec.md §4.1).
const PING_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Reconnecting,
    ShuttingDown,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct FeedClient {
    ws_url: String,
    key: String,
    secret: String,
    reconnect_min_ms: u64,
    reconnect_max_ms: u64,

    state: Mutex<FeedState>,
    conn: Mutex<Option<WsStream>>,
    tick_queue: TickQueue,
    news_sink: Arc<dyn NewsSink>,

    /// The current subscription set, re-sent as one batch after reconnect
    /// (spec.md §4.1, Scenario D).
    subscribed: Mutex<HashSet<(Symbol, Channel)>>,
    pending: Mutex<HashMap<Channel, (HashSet<Symbol>, HashSet<Symbol>)>>,
    flush_notify: Notify,
    shutdown_notify: Notify,

    pub malformed_frames: AtomicU64,
    pub reconnects: AtomicU64,
}

impl FeedClient {
    pub fn new(settings: &Settings, tick_queue: TickQueue, news_sink: Arc<dyn NewsSink>) -> Arc<Self> {
        Arc::new(Self {
            ws_url: settings.upstream_ws_url.clone(),
            key: settings.upstream_ws_key.clone(),
            secret: settings.upstream_ws_secret.clone(),
            reconnect_min_ms: settings.reconnect_min_ms,
            reconnect_max_ms: settings.reconnect_max_ms,
            state: Mutex::new(FeedState::Disconnected),
            conn: Mutex::new(None),
            tick_queue,
            news_sink,
            subscribed: Mutex::new(HashSet::new()),
            pending: Mutex::new(HashMap::new()),
            flush_notify: Notify::new(),
            shutdown_notify: Notify::new(),
            malformed_frames: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        })
    }

    pub async fn state(&self) -> FeedState {
        *self.state.lock().await
    }

    async fn set_state(&self, s: FeedState) {
        *self.state.lock().await = s;
    }

    /// Connect once, authenticate, then loop receiving frames until the
    /// socket errors or closes. Returns so the caller can decide to
    /// reconnect; never returns `Ok` while the process is meant to keep
    /// running.
    async fn connect_and_receive(&self) -> Result<(), FeedError> {
        self.set_state(FeedState::Connecting).await;
        let (mut ws, _) = connect_async(&self.ws_url).await?;

        self.set_state(FeedState::Authenticating).await;
        let auth = AuthFrame {
            action: "auth",
            key: &self.key,
            secret: &self.secret,
        };
        let payload = serde_json::to_string(&auth).map_err(|e| FeedError::MalformedFrame(e.to_string()))?;
        ws.send(Message::Text(payload.into())).await?;

        // The ack is the first frame; anything else at this point is
        // treated as a rejection since the provider always acks first.
        match ws.next().await {
            Some(Ok(Message::Text(txt))) if txt.to_lowercase().contains("error") => {
                return Err(FeedError::Unauthorized);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(FeedError::Transport(e)),
            None => return Err(FeedError::Unauthorized),
        }

        self.set_state(FeedState::Connected).await;
        *self.conn.lock().await = Some(ws);

        self.resubscribe_all().await;

        loop {
            let next = {
                let mut conn = self.conn.lock().await;
                match conn.as_mut() {
                    Some(ws) => tokio::time::timeout(PING_TIMEOUT, ws.next()).await,
                    None => return Ok(()),
                }
            };

            match next {
                Ok(Some(Ok(Message::Text(text)))) => self.handle_text(&text).await,
                Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => {}
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                    info!("feed: upstream closed connection");
                    return Ok(());
                }
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => return Err(FeedError::Transport(e)),
                Err(_elapsed) => {
                    warn!("feed: no frame within {PING_TIMEOUT:?}, treating as transport failure");
                    return Err(FeedError::PingTimeout);
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        match serde_json::from_str::<RawFrame>(text) {
            Ok(raw) => {
                let frame: InboundFrame = raw.into();
                if let InboundFrame::News(item) = frame {
                    self.news_sink.on_news(item).await;
                } else if let Some(event) = frame.into_market_event() {
                    self.tick_queue.push(event).await;
                }
            }
            Err(e) => {
                self.malformed_frames.fetch_add(1, Ordering::Relaxed);
                warn!("feed: malformed frame dropped: {e}");
            }
        }
    }

    async fn resubscribe_all(&self) {
        let subscribed = self.subscribed.lock().await;
        let mut by_channel: HashMap<Channel, Vec<String>> = HashMap::new();
        for (symbol, channel) in subscribed.iter() {
            by_channel.entry(*channel).or_default().push(symbol.as_str().to_owned());
        }
        drop(subscribed);
        for (channel, symbols) in by_channel {
            self.send_subscribe_frame(channel, symbols).await;
        }
    }

    async fn send_subscribe_frame(&self, channel: Channel, symbols: Vec<String>) {
        if symbols.is_empty() {
            return;
        }
        let frame = SubscribeFrame {
            action: "subscribe",
            channel: channel.as_str(),
            symbols,
        };
        let Ok(payload) = serde_json::to_string(&frame) else {
            return;
        };
        let mut conn = self.conn.lock().await;
        if let Some(ws) = conn.as_mut() {
            if let Err(e) = ws.send(Message::Text(payload.into())).await {
                error!("feed: failed to send subscribe frame: {e}");
            }
        }
    }

    async fn send_unsubscribe_frame(&self, channel: Channel, symbols: Vec<String>) {
        if symbols.is_empty() {
            return;
        }
        let frame = SubscribeFrame {
            action: "unsubscribe",
            channel: channel.as_str(),
            symbols,
        };
        let Ok(payload) = serde_json::to_string(&frame) else {
            return;
        };
        let mut conn = self.conn.lock().await;
        if let Some(ws) = conn.as_mut() {
            if let Err(e) = ws.send(Message::Text(payload.into())).await {
                error!("feed: failed to send unsubscribe frame: {e}");
            }
        }
    }

    /// Stop the reconnect supervisor and close the active connection
    /// (spec.md §5, graceful shutdown). Idempotent; safe to call even if
    /// the feed is mid-reconnect or already disconnected.
    pub async fn shutdown(&self) {
        self.set_state(FeedState::ShuttingDown).await;
        self.shutdown_notify.notify_waiters();

        match tokio::time::timeout(Duration::from_secs(2), self.conn.lock()).await {
            Ok(mut conn) => {
                if let Some(mut ws) = conn.take() {
                    if let Err(e) = ws.close(None).await {
                        warn!("feed: error closing upstream connection during shutdown: {e}");
                    }
                }
            }
            Err(_) => warn!("feed: connection lock busy during shutdown, leaving socket to drop"),
        }
    }

    /// Debounces subscribe/unsubscribe calls into one frame per channel
    /// every 50 ms (spec.md §4.1). Runs for the process lifetime.
    async fn batch_flush_loop(self: Arc<Self>) {
        loop {
            self.flush_notify.notified().await;
            tokio::time::sleep(SUBSCRIBE_BATCH_WINDOW).await;

            let batch = {
                let mut pending = self.pending.lock().await;
                if pending.is_empty() {
                    continue;
                }
                std::mem::take(&mut *pending)
            };

            for (channel, (adds, removes)) in batch {
                if !adds.is_empty() {
                    let mut subscribed = self.subscribed.lock().await;
                    for s in &adds {
                        subscribed.insert((s.clone(), channel));
                    }
                    drop(subscribed);
                    self.send_subscribe_frame(channel, adds.iter().map(|s| s.as_str().to_owned()).collect()).await;
                }
                if !removes.is_empty() {
                    let mut subscribed = self.subscribed.lock().await;
                    for s in &removes {
                        subscribed.remove(&(s.clone(), channel));
                    }
                    drop(subscribed);
                    self.send_unsubscribe_frame(channel, removes.iter().map(|s| s.as_str().to_owned()).collect()).await;
                }
            }
        }
    }

    /// The reconnect supervisor: runs `connect_and_receive` in a loop with
    /// exponential backoff and full jitter between attempts (spec.md §4.1).
    pub async fn run(self: Arc<Self>) {
        let flush_handle = tokio::spawn(self.clone().batch_flush_loop());

        loop {
            match self.connect_and_receive().await {
                Ok(()) => {
                    self.set_state(FeedState::Reconnecting).await;
                }
                Err(FeedError::Unauthorized) => {
                    error!("feed: upstream rejected authentication, stopping");
                    self.set_state(FeedState::ShuttingDown).await;
                    break;
                }
                Err(e) => {
                    warn!("feed: transport error, reconnecting: {e}");
                    self.set_state(FeedState::Reconnecting).await;
                }
            }

            if self.state().await == FeedState::ShuttingDown {
                break;
            }

            *self.conn.lock().await = None;
            self.reconnects.fetch_add(1, Ordering::Relaxed);

            let mut backoff = ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(self.reconnect_min_ms))
                .with_max_interval(Duration::from_millis(self.reconnect_max_ms))
                .with_max_elapsed_time(None)
                .build();
            if let Some(delay) = backoff.next_backoff() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.shutdown_notify.notified() => break,
                }
            }
        }

        flush_handle.abort();
    }
}

#[async_trait]
impl UpstreamControl for FeedClient {
    async fn subscribe(&self, symbol: &Symbol, channel: Channel) {
        let mut pending = self.pending.lock().await;
        let entry = pending.entry(channel).or_default();
        entry.1.remove(symbol);
        entry.0.insert(symbol.clone());
        drop(pending);
        self.flush_notify.notify_one();
    }

    async fn unsubscribe(&self, symbol: &Symbol, channel: Channel) {
        let mut pending = self.pending.lock().await;
        let entry = pending.entry(channel).or_default();
        entry.0.remove(symbol);
        entry.1.insert(symbol.clone());
        drop(pending);
        self.flush_notify.notify_one();
    }
}

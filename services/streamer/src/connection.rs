//! Vendor stream connection task
//!
//! Owns the socket for its whole life: connect, authenticate under a
//! watchdog, serve inbound frames, heartbeat, and reconnect after a fixed
//! delay on any failure — forever. Trade frames go into the tick buffer
//! without blocking; control commands (subscribe/unsubscribe) arrive from
//! the reconciler over a channel and are written to the socket here, so
//! only this task ever touches the sink.
//!
//! Authentication failure is not special-cased beyond detection: it tears
//! down the session like any other disconnect and the reconnect loop takes
//! over.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use candle_store::{keys, KvStore};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::buffer::TickProducer;
use crate::counters::Counters;
use crate::error::StreamError;
use crate::protocol::{decode_frame, InboundEvent, OutboundMessage};
use crate::subscriptions::ControlCommand;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connection and session tuning.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long the auth handshake may take before the watchdog closes
    /// the socket.
    pub auth_timeout: Duration,
    /// Fixed delay between reconnect attempts. No backoff cap: the
    /// process is meant to run forever.
    pub reconnect_delay: Duration,
    /// Application-level ping cadence.
    pub ping_interval: Duration,
    /// No inbound traffic for this long means the connection is dead.
    pub stale_timeout: Duration,
    /// Lifetime of the ingest liveness marker.
    pub heartbeat_marker_ttl: Duration,
    /// Minimum interval between liveness-marker refreshes.
    pub heartbeat_marker_refresh: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(10),
            ping_interval: Duration::from_secs(20),
            stale_timeout: Duration::from_secs(60),
            heartbeat_marker_ttl: Duration::from_secs(100),
            heartbeat_marker_refresh: Duration::from_secs(10),
        }
    }
}

/// Session state shared between the connection task and the reconciler.
///
/// The subscribed set needs a lock because the reconciler writes it while
/// the connection task clears it on disconnect.
#[derive(Debug, Default)]
pub struct SessionState {
    authenticated: AtomicBool,
    subscribed: Mutex<HashSet<String>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::Release);
    }

    /// Copy of the currently-subscribed symbol set.
    pub fn subscribed_snapshot(&self) -> HashSet<String> {
        self.subscribed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn add_subscribed(&self, symbols: impl IntoIterator<Item = String>) {
        let mut guard = self.subscribed.lock().unwrap_or_else(|e| e.into_inner());
        guard.extend(symbols);
    }

    pub fn remove_subscribed<'a>(&self, symbols: impl IntoIterator<Item = &'a String>) {
        let mut guard = self.subscribed.lock().unwrap_or_else(|e| e.into_inner());
        for symbol in symbols {
            guard.remove(symbol);
        }
    }

    /// Forget everything; the vendor drops subscriptions on disconnect, so
    /// the reconciler must re-send them after the next auth.
    pub fn clear_subscribed(&self) {
        self.subscribed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// The long-lived connection task.
pub struct Connection {
    url: String,
    key: String,
    secret: String,
    config: ConnectionConfig,
    session: Arc<SessionState>,
    producer: TickProducer,
    control_rx: mpsc::UnboundedReceiver<ControlCommand>,
    kv: Arc<dyn KvStore>,
    counters: Arc<Counters>,
    shutdown: watch::Receiver<bool>,
    last_marker_refresh: Option<Instant>,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: String,
        key: String,
        secret: String,
        config: ConnectionConfig,
        session: Arc<SessionState>,
        producer: TickProducer,
        control_rx: mpsc::UnboundedReceiver<ControlCommand>,
        kv: Arc<dyn KvStore>,
        counters: Arc<Counters>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            url,
            key,
            secret,
            config,
            session,
            producer,
            control_rx,
            kv,
            counters,
            shutdown,
            last_marker_refresh: None,
        }
    }

    /// Socket loop with keepalive and automatic reconnects. Runs until
    /// shutdown is signaled.
    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            info!(url = %self.url, "connecting to market data stream");
            match self.serve_session().await {
                Ok(()) => info!("stream session ended"),
                Err(err) => warn!(%err, "stream session failed"),
            }
            self.session.set_authenticated(false);
            self.session.clear_subscribed();

            if *self.shutdown.borrow() {
                break;
            }
            Counters::incr(&self.counters.reconnects);
            warn!(delay = ?self.config.reconnect_delay, "reconnecting");
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = shutdown.changed() => {}
            }
        }
        debug!("connection task stopped");
    }

    /// One socket session: connect, authenticate, serve until failure.
    async fn serve_session(&mut self) -> Result<(), StreamError> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        let auth = OutboundMessage::Auth {
            key: self.key.clone(),
            secret: self.secret.clone(),
        };
        sink.send(Message::Text(auth.to_json().into())).await?;
        let auth_deadline = Instant::now() + self.config.auth_timeout;

        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.reset(); // first tick after one full interval
        let mut last_activity = Instant::now();
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),

                // Auth watchdog: armed only until the ack arrives.
                _ = tokio::time::sleep_until(auth_deadline),
                    if !self.session.is_authenticated() =>
                {
                    error!(timeout = ?self.config.auth_timeout, "authentication timed out");
                    return Err(StreamError::AuthTimeout(self.config.auth_timeout));
                }

                _ = ping.tick() => {
                    if last_activity.elapsed() > self.config.stale_timeout {
                        return Err(StreamError::Stale(self.config.stale_timeout));
                    }
                    sink.send(Message::Ping(b"keepalive".to_vec().into())).await?;
                }

                cmd = self.control_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd, &mut sink).await?,
                        // Reconciler gone; the service is shutting down.
                        None => return Ok(()),
                    }
                }

                frame = stream.next() => {
                    match frame {
                        Some(Ok(message)) => {
                            last_activity = Instant::now();
                            self.handle_message(message, &mut sink).await?;
                        }
                        Some(Err(err)) => return Err(err.into()),
                        None => return Err(StreamError::Closed),
                    }
                }
            }
        }
    }

    async fn handle_command(
        &self,
        cmd: ControlCommand,
        sink: &mut WsSink,
    ) -> Result<(), StreamError> {
        if !self.session.is_authenticated() {
            debug!("dropping control command on unauthenticated session");
            return Ok(());
        }
        let msg = match cmd {
            ControlCommand::Subscribe(symbols) => {
                info!(?symbols, "subscribing");
                OutboundMessage::Subscribe { trades: symbols }
            }
            ControlCommand::Unsubscribe(symbols) => {
                info!(?symbols, "unsubscribing");
                OutboundMessage::Unsubscribe { trades: symbols }
            }
        };
        sink.send(Message::Text(msg.to_json().into())).await?;
        Ok(())
    }

    async fn handle_message(
        &mut self,
        message: Message,
        sink: &mut WsSink,
    ) -> Result<(), StreamError> {
        match message {
            Message::Text(raw) => self.handle_text(raw.as_str()).await,
            Message::Ping(payload) => {
                sink.send(Message::Pong(payload)).await?;
                Ok(())
            }
            Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => Ok(()),
            Message::Close(_) => Err(StreamError::Closed),
        }
    }

    async fn handle_text(&mut self, raw: &str) -> Result<(), StreamError> {
        let events = match decode_frame(raw) {
            Ok(events) => events,
            Err(err) => {
                // Malformed frames are logged and skipped, not fatal.
                warn!(%err, "undecodable frame");
                return Ok(());
            }
        };

        for event in events {
            match event {
                InboundEvent::Connected => debug!("stream hello received"),
                InboundEvent::AuthOk => {
                    self.session.set_authenticated(true);
                    info!("authenticated");
                }
                InboundEvent::AuthError(msg) => {
                    return Err(StreamError::AuthRejected(msg));
                }
                InboundEvent::SubscriptionAck { trades } => {
                    info!(?trades, "subscription acknowledged");
                }
                InboundEvent::Error { code, msg } => {
                    error!(?code, %msg, "vendor error");
                }
                InboundEvent::Trade(trade) => {
                    self.refresh_heartbeat_marker().await;
                    self.producer.push(trade);
                }
                InboundEvent::Unknown => debug!("unhandled frame kind"),
            }
        }
        Ok(())
    }

    /// Refresh the short-TTL liveness marker, throttled so the key-value
    /// backend is not hammered on every trade.
    async fn refresh_heartbeat_marker(&mut self) {
        let due = match self.last_marker_refresh {
            Some(last) => last.elapsed() >= self.config.heartbeat_marker_refresh,
            None => true,
        };
        if !due {
            return;
        }
        self.last_marker_refresh = Some(Instant::now());
        if let Err(err) = self
            .kv
            .put_ttl(&keys::ticks_received(), "1", self.config.heartbeat_marker_ttl)
            .await
        {
            debug!(%err, "liveness marker refresh failed");
        }
    }
}

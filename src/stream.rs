use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::{
    client::BackendClient,
    consts::{
        HEALTH_CHECK_INTERVAL_SECS, RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_DELAY_MS,
        STREAM_CONNECT_TIMEOUT_SECS,
    },
    core::truncate_message,
    events::EventBus,
};

struct SupervisorState {
    stop_tx: Option<watch::Sender<bool>>,
    reconnect_attempts: u32,
}

/// Owns the transport to the backend: the push-event connection with its
/// reconnect backoff, and the fixed-interval health poll. Connectivity
/// transitions surface once through a watch channel and a
/// `connection-changed` bus event, whichever side observed them.
pub struct ConnectionSupervisor {
    client: Arc<BackendClient>,
    bus: Arc<EventBus>,
    connected_tx: watch::Sender<bool>,
    state: Mutex<SupervisorState>,
}

impl ConnectionSupervisor {
    pub fn new(client: Arc<BackendClient>, bus: Arc<EventBus>) -> Arc<Self> {
        let (connected_tx, _) = watch::channel(false);
        Arc::new(Self {
            client,
            bus,
            connected_tx,
            state: Mutex::new(SupervisorState {
                stop_tx: None,
                reconnect_attempts: 0,
            }),
        })
    }

    pub fn is_connected(&self) -> bool {
        *self.connected_tx.borrow()
    }

    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    /// Start the push-event loop and the health poll as a pair. Idempotent
    /// while already running.
    pub fn start(self: &Arc<Self>) {
        let stop_rx = {
            let mut state = self.lock();
            if state.stop_tx.is_some() {
                return;
            }
            let (tx, rx) = watch::channel(false);
            state.stop_tx = Some(tx);
            state.reconnect_attempts = 0;
            rx
        };

        tracing::debug!("starting stream and health tasks");
        let this = Arc::clone(self);
        let health_stop = stop_rx.clone();
        tokio::spawn(async move { this.run_health_loop(health_stop).await });

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_stream_loop(stop_rx).await });
    }

    /// Stop both loops. The pending reconnect delay, if any, is abandoned
    /// with them, so a later `start` cannot race a stale reconnect chain.
    pub fn stop(&self) {
        if let Some(stop_tx) = self.lock().stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        self.set_connected(false);
    }

    fn set_connected(&self, connected: bool) {
        let changed = self.connected_tx.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
        if changed {
            tracing::info!(connected, "connection state changed");
            self.bus.emit(serde_json::json!({
                "type": "connection-changed",
                "connected": connected,
            }));
        }
    }

    async fn run_health_loop(&self, mut stop_rx: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return;
                    }
                }
                _ = interval.tick() => {
                    let healthy = self.client.get_health().await;
                    self.set_connected(healthy);
                }
            }
        }
    }

    async fn run_stream_loop(&self, mut stop_rx: watch::Receiver<bool>) {
        tracing::debug!("stream task started");

        loop {
            if *stop_rx.borrow() {
                break;
            }

            match self.stream_once(&mut stop_rx).await {
                Ok(()) => break,
                Err(err) => {
                    if *stop_rx.borrow() {
                        break;
                    }

                    tracing::debug!("stream loop error: {err}");
                    self.set_connected(false);
                    self.bus.emit(serde_json::json!({ "type": "ws-disconnected" }));

                    let attempts = {
                        let mut state = self.lock();
                        let attempts = state.reconnect_attempts;
                        state.reconnect_attempts = state.reconnect_attempts.saturating_add(1);
                        attempts
                    };
                    let delay = backoff_delay(attempts);
                    tracing::debug!(attempts, ?delay, "scheduling reconnect");

                    tokio::select! {
                        _ = stop_rx.changed() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.set_connected(false);
        tracing::debug!("stream task stopped");
    }

    async fn stream_once(&self, stop_rx: &mut watch::Receiver<bool>) -> Result<(), String> {
        let ws_url = build_events_ws_url(self.client.base_url())
            .ok_or_else(|| "invalid backend URL for event stream".to_string())?;

        let (mut ws_stream, _) = tokio::time::timeout(
            Duration::from_secs(STREAM_CONNECT_TIMEOUT_SECS),
            connect_async(ws_url),
        )
        .await
        .map_err(|_| {
            format!("stream connection timed out after {STREAM_CONNECT_TIMEOUT_SECS} seconds")
        })?
        .map_err(|error| format!("stream connection failed: {error}"))?;

        tracing::debug!("ws connected");
        self.lock().reconnect_attempts = 0;
        self.set_connected(true);
        self.bus.emit(serde_json::json!({ "type": "ws-connected" }));

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        let _ = ws_stream.close(None).await;
                        return Ok(());
                    }
                }
                incoming = ws_stream.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            self.handle_frame(text.as_ref());
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            ws_stream.send(WsMessage::Pong(payload)).await
                                .map_err(|error| format!("failed to send pong: {error}"))?;
                        }
                        Some(Ok(WsMessage::Close(_))) => {
                            return Err("stream closed by server".to_string());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(error)) => return Err(format!("stream read error: {error}")),
                        None => return Err("stream ended unexpectedly".to_string()),
                    }
                }
            }
        }
    }

    /// A frame that fails to parse is logged and dropped; the next frame is
    /// independent, so the connection stays up.
    fn handle_frame(&self, text: &str) {
        match serde_json::from_str::<Value>(text) {
            Ok(frame) if frame.is_object() => self.bus.emit(frame),
            Ok(_) => {
                tracing::debug!("dropping non-object frame: {}", truncate_message(text, 140));
            }
            Err(error) => {
                tracing::debug!(
                    "frame decode failed: {error} payload={}",
                    truncate_message(text, 140)
                );
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SupervisorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Delay before the (attempts+1)th reconnect: 1s doubling up to 30s.
pub(crate) fn backoff_delay(attempts: u32) -> Duration {
    let exponent = attempts.min(15);
    let millis = RECONNECT_BASE_DELAY_MS
        .saturating_mul(1u64 << exponent)
        .min(RECONNECT_MAX_DELAY_MS);
    Duration::from_millis(millis)
}

pub(crate) fn build_events_ws_url(base_url: &str) -> Option<String> {
    let mut url = reqwest::Url::parse(base_url).ok()?;
    match url.scheme() {
        "http" => url.set_scheme("ws").ok()?,
        "https" => url.set_scheme("wss").ok()?,
        _ => return None,
    }
    let mut path = url.path().trim_end_matches('/').to_string();
    path.push_str("/events");
    url.set_path(&path);
    Some(url.to_string())
}

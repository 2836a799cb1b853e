use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::{
    client::BackendClient,
    consts::{EVENT_CHANNEL_CAPACITY, POLL_FETCH_LIMIT},
    core::{quarantine_corrupt_file, write_json_atomic},
    error::PersistenceError,
    events::EventBus,
    model::{Message, MessageWire},
    settings::SettingsStore,
};

/// Push frame kind carrying a new chat message.
pub const NEW_MESSAGE_EVENT: &str = "message:new";

#[derive(Debug, Clone)]
pub enum TrackerEvent {
    NewMessage {
        user_id: String,
        dialog_id: String,
        message: Message,
    },
    UnreadChanged {
        user_id: String,
        count: usize,
    },
}

/// Per-contact buffer of unread messages, oldest first. The unread count is
/// derived from the buffer length, never stored separately.
#[derive(Debug, Default, Clone)]
pub struct UnreadEntry {
    pub dialog_id: Option<String>,
    pub messages: Vec<Message>,
}

impl UnreadEntry {
    pub fn count(&self) -> usize {
        self.messages.len()
    }
}

struct TrackerState {
    ledgers: HashMap<String, UnreadEntry>,
    watermarks: HashMap<String, i64>,
}

/// Reconciles the push channel and the poll snapshots into one unread ledger.
/// Both paths funnel through [`UnreadTracker::accept`], whose dedup check and
/// append happen in a single critical section, so the same message arriving
/// on both channels is counted once.
pub struct UnreadTracker {
    client: Arc<BackendClient>,
    store: Arc<SettingsStore>,
    watermark_path: PathBuf,
    state: Mutex<TrackerState>,
    events_tx: broadcast::Sender<TrackerEvent>,
}

impl UnreadTracker {
    pub fn new(
        client: Arc<BackendClient>,
        store: Arc<SettingsStore>,
        watermark_path: impl Into<PathBuf>,
    ) -> Arc<Self> {
        let watermark_path = watermark_path.into();
        let watermarks = load_watermarks(&watermark_path);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            client,
            store,
            watermark_path,
            state: Mutex::new(TrackerState {
                ledgers: HashMap::new(),
                watermarks,
            }),
            events_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events_tx.subscribe()
    }

    pub fn unread_count(&self, user_id: &str) -> usize {
        self.lock()
            .ledgers
            .get(user_id)
            .map(UnreadEntry::count)
            .unwrap_or(0)
    }

    /// Current unread counts for every contact with a ledger row.
    pub fn unread_counts(&self) -> HashMap<String, usize> {
        self.lock()
            .ledgers
            .iter()
            .map(|(user_id, entry)| (user_id.clone(), entry.count()))
            .collect()
    }

    pub fn watermark(&self, dialog_id: &str) -> Option<i64> {
        self.lock().watermarks.get(dialog_id).copied()
    }

    /// Ingest one push frame. Frames of other kinds, malformed payloads, and
    /// messages from senders outside the whitelist are all dropped here.
    pub fn ingest_push(&self, frame: &Value) {
        if frame.get("type").and_then(Value::as_str) != Some(NEW_MESSAGE_EVENT) {
            return;
        }
        let payload = frame.get("message").unwrap_or(frame);
        let wire = match serde_json::from_value::<MessageWire>(payload.clone()) {
            Ok(wire) => wire,
            Err(error) => {
                tracing::debug!(%error, "dropping malformed push message");
                return;
            }
        };
        let Some(message) = wire.normalize(None) else {
            tracing::debug!("dropping push message with unresolved sender or dialog");
            return;
        };

        // Only whitelisted senders are tracked; anything else is expected
        // traffic, not an error.
        if !self.store.is_whitelisted(&message.from_id) {
            return;
        }

        let user_id = message.from_id.clone();
        self.accept(&user_id, message);
    }

    /// Ingest one poll snapshot for a dialog. Without a stored watermark the
    /// dialog's history is unknown and nothing is accepted, deferring to push
    /// events to seed it; this keeps a freshly whitelisted contact from
    /// surfacing a burst of historical unreads.
    pub fn ingest_poll(&self, contact_id: &str, dialog_id: &str, messages: Vec<Message>) {
        let Some(watermark) = self.lock().watermarks.get(dialog_id).copied() else {
            return;
        };

        for message in messages {
            if message.id > watermark && message.from_id == contact_id {
                self.accept(contact_id, message);
            }
        }
    }

    /// The single dedup choke point for both ingestion paths. Returns whether
    /// the message was appended. Notifications are sent while the state lock
    /// is still held, so their order equals ledger mutation order even with
    /// the push and poll drivers on separate tasks.
    fn accept(&self, user_id: &str, message: Message) -> bool {
        let mut state = self.lock();
        let entry = state.ledgers.entry(user_id.to_string()).or_default();
        if entry.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        if entry.dialog_id.is_none() {
            entry.dialog_id = Some(message.dialog_id.clone());
        }
        entry.messages.push(message.clone());
        let count = entry.count();

        tracing::debug!(user_id, message_id = message.id, count, "message accepted");
        let _ = self.events_tx.send(TrackerEvent::NewMessage {
            user_id: user_id.to_string(),
            dialog_id: message.dialog_id.clone(),
            message,
        });
        let _ = self.events_tx.send(TrackerEvent::UnreadChanged {
            user_id: user_id.to_string(),
            count,
        });
        true
    }

    /// Clear a contact's unreads: advance the watermark of the last buffered
    /// message's dialog to its id, persist it before anything else can
    /// observe the cleared state, then best-effort tell the backend. A no-op
    /// when the contact has no ledger row. The persist and the zero-count
    /// notification both happen inside the state critical section, so no
    /// concurrent accept can slip its event between them.
    pub async fn mark_read(&self, user_id: &str) {
        let last_id = {
            let mut state = self.lock();
            let Some(entry) = state.ledgers.remove(user_id) else {
                return;
            };
            let Some(last) = entry.messages.last() else {
                return;
            };
            let last_id = last.id;
            let dialog_id = last.dialog_id.clone();
            let slot = state.watermarks.entry(dialog_id).or_insert(last_id);
            // Watermarks only ever advance.
            *slot = (*slot).max(last_id);

            if let Err(error) = write_json_atomic(&self.watermark_path, &state.watermarks) {
                tracing::warn!(%error, "failed to persist watermarks");
            }

            let _ = self.events_tx.send(TrackerEvent::UnreadChanged {
                user_id: user_id.to_string(),
                count: 0,
            });
            last_id
        };

        // Local state is already committed; a failed receipt is not retried.
        if !self.client.mark_read(last_id).await {
            tracing::debug!(user_id, last_id, "backend read receipt failed");
        }
    }

    /// Drop a contact's ledger row without touching watermarks, used when the
    /// contact leaves the whitelist.
    pub fn forget_contact(&self, user_id: &str) {
        let removed = self.lock().ledgers.remove(user_id).is_some();
        if removed {
            let _ = self.events_tx.send(TrackerEvent::UnreadChanged {
                user_id: user_id.to_string(),
                count: 0,
            });
        }
    }

    pub fn persist_watermarks(&self) -> Result<(), PersistenceError> {
        let watermarks = self.lock().watermarks.clone();
        write_json_atomic(&self.watermark_path, &watermarks)
    }

    /// One poll tick: fetch dialogs and feed every whitelisted peer's recent
    /// messages through the poll path.
    pub async fn poll_once(&self) {
        let dialogs = self.client.get_dialogs().await;
        for dialog in dialogs {
            let Some(peer_id) = dialog.peer_id() else {
                continue;
            };
            if !self.store.is_whitelisted(&peer_id) {
                continue;
            }

            let wires = self.client.get_messages(&dialog.id, POLL_FETCH_LIMIT).await;
            let messages = wires
                .into_iter()
                .filter_map(|wire| wire.normalize(Some(&dialog.id)))
                .collect();
            self.ingest_poll(&peer_id, &dialog.id, messages);
        }
    }

    /// Poll driver; the interval is re-read from the store every cycle so a
    /// settings change applies without a restart.
    pub async fn run_poll_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        loop {
            let interval = Duration::from_millis(self.store.settings().poll_interval_ms.max(100));
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    self.poll_once().await;
                }
            }
        }
    }

    /// Feed `message:new` bus frames into the tracker until shutdown.
    pub async fn run_push_loop(
        self: Arc<Self>,
        bus: Arc<EventBus>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut frames = bus.subscribe(NEW_MESSAGE_EVENT);
        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return;
                    }
                }
                frame = frames.recv() => {
                    match frame {
                        Ok(frame) => self.ingest_push(&frame),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "push consumer lagged; poll path will reconcile");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn load_watermarks(path: &Path) -> HashMap<String, i64> {
    if !path.exists() {
        return HashMap::new();
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) => {
            tracing::warn!(%error, ?path, "failed to read watermarks, starting empty");
            return HashMap::new();
        }
    };

    match serde_json::from_str::<HashMap<String, i64>>(&content) {
        Ok(watermarks) => watermarks,
        Err(error) => {
            tracing::warn!(%error, "watermark parse failed, starting empty");
            quarantine_corrupt_file(path);
            HashMap::new()
        }
    }
}

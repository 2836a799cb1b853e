use std::{collections::HashMap, sync::Mutex};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::consts::EVENT_CHANNEL_CAPACITY;

/// Fan-out for backend push frames: one catch-all channel plus a lazily
/// populated dispatch table of per-type channels, so consumers can subscribe
/// narrowly to the frame kinds they care about.
pub struct EventBus {
    any: broadcast::Sender<Value>,
    by_type: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (any, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            any,
            by_type: Mutex::new(HashMap::new()),
        }
    }

    /// Receive every frame regardless of type.
    pub fn subscribe_any(&self) -> broadcast::Receiver<Value> {
        self.any.subscribe()
    }

    /// Receive only frames whose `type` field equals `kind`.
    pub fn subscribe(&self, kind: &str) -> broadcast::Receiver<Value> {
        let mut table = match self.by_type.lock() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        table
            .entry(kind.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Emit a frame on the catch-all channel and, when it carries a `type`
    /// field, on that type's channel as well. A send with no live receivers
    /// is not an error.
    pub fn emit(&self, frame: Value) {
        if let Some(kind) = frame.get("type").and_then(Value::as_str) {
            let table = match self.by_type.lock() {
                Ok(table) => table,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(tx) = table.get(kind) {
                let _ = tx.send(frame.clone());
            }
        }
        let _ = self.any.send(frame);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

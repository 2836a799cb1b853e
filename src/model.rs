use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whitelisted backend user tracked for unread accounting.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContactEntry {
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    pub display_name: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserWire {
    pub id: Value,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DialogWire {
    pub id: String,
    /// Backend user on the other side of the dialog.
    #[serde(default, alias = "userId")]
    pub peer_id: Value,
    #[serde(default)]
    pub title: String,
}

impl DialogWire {
    pub fn peer_id(&self) -> Option<String> {
        id_value_to_string(&self.peer_id)
    }
}

/// Raw message as the backend ships it, over both HTTP and the event stream.
/// The sender may arrive as `fromId` or `senderId`, and ids may be JSON
/// numbers or strings; [`MessageWire::normalize`] resolves all of that once.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MessageWire {
    pub id: i64,
    #[serde(default)]
    pub dialog_id: Option<String>,
    #[serde(default)]
    pub from_id: Option<Value>,
    #[serde(default)]
    pub sender_id: Option<Value>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub date: Option<String>,
}

/// Normalized message used everywhere past the ingestion boundary.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub dialog_id: String,
    pub from_id: String,
    pub text: String,
    /// Display ordering only; acceptance decisions use `id`.
    pub date: String,
}

impl MessageWire {
    /// Resolve the duck-typed wire fields into a [`Message`]. Returns `None`
    /// when the sender or dialog cannot be determined, which callers treat
    /// as a malformed payload.
    pub fn normalize(self, fallback_dialog_id: Option<&str>) -> Option<Message> {
        let from_id = self
            .from_id
            .as_ref()
            .and_then(id_value_to_string)
            .or_else(|| self.sender_id.as_ref().and_then(id_value_to_string))?;
        let dialog_id = self
            .dialog_id
            .filter(|id| !id.is_empty())
            .or_else(|| fallback_dialog_id.map(str::to_string))?;

        Some(Message {
            id: self.id,
            dialog_id,
            from_id,
            text: self.text,
            date: self
                .date
                .unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
        })
    }
}

/// Backend ids show up as numbers in some payloads and strings in others.
pub(crate) fn id_value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_resolves_from_id() {
        let wire: MessageWire =
            serde_json::from_value(json!({"id": 7, "fromId": 42, "dialogId": "d1", "text": "hi"}))
                .unwrap();
        let msg = wire.normalize(None).unwrap();
        assert_eq!(msg.from_id, "42");
        assert_eq!(msg.dialog_id, "d1");
        assert_eq!(msg.id, 7);
    }

    #[test]
    fn normalize_falls_back_to_sender_id() {
        let wire: MessageWire =
            serde_json::from_value(json!({"id": 8, "senderId": "42", "text": "hi"})).unwrap();
        let msg = wire.normalize(Some("d1")).unwrap();
        assert_eq!(msg.from_id, "42");
        assert_eq!(msg.dialog_id, "d1");
    }

    #[test]
    fn normalize_rejects_missing_sender() {
        let wire: MessageWire =
            serde_json::from_value(json!({"id": 9, "dialogId": "d1"})).unwrap();
        assert!(wire.normalize(None).is_none());
    }

    #[test]
    fn normalize_rejects_unknown_dialog() {
        let wire: MessageWire =
            serde_json::from_value(json!({"id": 9, "fromId": 42})).unwrap();
        assert!(wire.normalize(None).is_none());
    }

    #[test]
    fn dialog_peer_id_accepts_numbers_and_strings() {
        let numeric: DialogWire =
            serde_json::from_value(json!({"id": "d1", "peerId": 42})).unwrap();
        assert_eq!(numeric.peer_id().as_deref(), Some("42"));

        let string: DialogWire =
            serde_json::from_value(json!({"id": "d2", "userId": "abc"})).unwrap();
        assert_eq!(string.peer_id().as_deref(), Some("abc"));
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use reqwest::Method;
use serde_json::Value;

use crate::{
    consts::{AVATAR_CACHE_MAX_AGE_SECS, AVATAR_MIN_BYTES, REQUEST_TIMEOUT_SECS},
    error::TransportError,
    model::{DialogWire, MessageWire, UserWire},
};

/// Decoded response payload: structured data when the backend says JSON,
/// raw bytes otherwise (profile photos).
#[derive(Debug)]
pub enum Body {
    Json(Value),
    Bytes(Vec<u8>),
}

/// Thin HTTP client for the backend. Requests are bounded by a 5s timeout
/// and never retried here; retry policy belongs to callers. The endpoint
/// wrappers swallow transport failures and hand back "no data" sentinels,
/// because an unreachable backend is an expected condition.
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    avatar_dir: PathBuf,
}

impl BackendClient {
    /// Build the client. Fails only when the TLS backend cannot initialize;
    /// there is no fallback client, since one built without the timeout
    /// would drop the request bound silently.
    pub fn new(
        base_url: impl Into<String>,
        avatar_dir: impl Into<PathBuf>,
    ) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            avatar_dir: avatar_dir.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue one bounded request. No retries at this layer.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Body, TransportError> {
        let url = format!("{}{path}", self.base_url);
        let mut builder = self.http.request(method, &url);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                TransportError::Timeout(REQUEST_TIMEOUT_SECS)
            } else {
                TransportError::Http(error)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("application/json"))
            .unwrap_or(false);

        if is_json {
            let value = response.json::<Value>().await?;
            Ok(Body::Json(value))
        } else {
            let bytes = response.bytes().await?;
            Ok(Body::Bytes(bytes.to_vec()))
        }
    }

    pub async fn get_health(&self) -> bool {
        match self.request(Method::GET, "/health", None).await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!(%error, "health check failed");
                false
            }
        }
    }

    pub async fn get_me(&self) -> Option<UserWire> {
        self.get_json("/me").await.and_then(decode("me"))
    }

    pub async fn get_dialogs(&self) -> Vec<DialogWire> {
        self.get_json("/dialogs")
            .await
            .and_then(decode("dialogs"))
            .unwrap_or_default()
    }

    pub async fn get_messages(&self, dialog_id: &str, limit: usize) -> Vec<MessageWire> {
        self.get_json(&format!("/dialogs/{dialog_id}/messages?limit={limit}"))
            .await
            .and_then(decode("messages"))
            .unwrap_or_default()
    }

    pub async fn send_message(&self, dialog_id: &str, text: &str) -> Option<MessageWire> {
        let body = serde_json::json!({ "text": text });
        match self
            .request(
                Method::POST,
                &format!("/dialogs/{dialog_id}/messages"),
                Some(&body),
            )
            .await
        {
            Ok(Body::Json(value)) => decode("sent message")(value),
            Ok(Body::Bytes(_)) => None,
            Err(error) => {
                tracing::debug!(%error, dialog_id, "send_message failed");
                None
            }
        }
    }

    /// Best-effort read receipt; the caller has already advanced its local
    /// watermark by the time this runs.
    pub async fn mark_read(&self, message_id: i64) -> bool {
        match self
            .request(Method::POST, &format!("/messages/{message_id}/read"), None)
            .await
        {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!(%error, message_id, "mark_read failed");
                false
            }
        }
    }

    /// Fetch a profile photo, served from a per-user disk cache when the
    /// cached copy is younger than 24 hours. Sub-100-byte responses mean
    /// "no photo" and are not cached.
    pub async fn get_profile_photo(&self, user_id: &str) -> Option<Vec<u8>> {
        let cache_path = self.avatar_cache_path(user_id);
        if cache_is_fresh(&cache_path, Duration::from_secs(AVATAR_CACHE_MAX_AGE_SECS)) {
            if let Ok(bytes) = fs::read(&cache_path) {
                if is_usable_photo(&bytes) {
                    return Some(bytes);
                }
            }
        }

        let bytes = match self
            .request(Method::GET, &format!("/profile/{user_id}/photo"), None)
            .await
        {
            Ok(Body::Bytes(bytes)) => bytes,
            Ok(Body::Json(_)) => return None,
            Err(error) => {
                tracing::debug!(%error, user_id, "profile photo fetch failed");
                return None;
            }
        };

        if !is_usable_photo(&bytes) {
            return None;
        }

        if let Some(parent) = cache_path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(error) = fs::write(&cache_path, &bytes) {
            tracing::debug!(%error, user_id, "failed to cache profile photo");
        }
        Some(bytes)
    }

    fn avatar_cache_path(&self, user_id: &str) -> PathBuf {
        // User ids are opaque; keep only filename-safe characters.
        let safe: String = user_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.avatar_dir.join(format!("{safe}.avatar"))
    }

    async fn get_json(&self, path: &str) -> Option<Value> {
        match self.request(Method::GET, path, None).await {
            Ok(Body::Json(value)) => Some(value),
            Ok(Body::Bytes(_)) => None,
            Err(error) => {
                tracing::debug!(%error, path, "backend request failed");
                None
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(what: &'static str) -> impl Fn(Value) -> Option<T> {
    move |value| match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(error) => {
            tracing::debug!(%error, what, "failed to decode backend payload");
            None
        }
    }
}

fn cache_is_fresh(path: &Path, max_age: Duration) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    match modified.elapsed() {
        Ok(age) => age < max_age,
        // Clock skew put the mtime in the future; treat as fresh.
        Err(_) => true,
    }
}

fn is_usable_photo(bytes: &[u8]) -> bool {
    bytes.len() >= AVATAR_MIN_BYTES
}

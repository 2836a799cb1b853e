use std::path::PathBuf;

/// Backend unreachable, slow, or unhappy. Callers of the thin endpoint
/// wrappers never see this directly; they get a "no data" sentinel instead.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned HTTP {0}")]
    Status(u16),
}

/// Watermark or settings write failure. In-memory state stays authoritative;
/// the next successful write self-heals the file.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

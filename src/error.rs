//! Error type shared by every layer of the crate.

use thiserror::Error;

/// All failure modes the crate can surface to a caller.
///
/// Stale index entries and batch-size overruns are deliberately *not*
/// variants here — they are non-fatal and are logged with `tracing::warn!`
/// and skipped rather than propagated.
#[derive(Debug, Error)]
pub enum Error {
    #[error("key element type is not supported by the tuple codec")]
    UnsupportedKeyElement,

    #[error("corrupt key bytes: {bytes:?}")]
    CorruptKey { bytes: Vec<u8> },

    #[error("truncated key or value bytes")]
    Truncated,

    #[error("unknown encoder tag {tag}{}", name.as_deref().map(|n| format!(" ({n})")).unwrap_or_default())]
    UnknownEncoderTag { tag: u8, name: Option<String> },

    #[error("encoder {name:?} already registered with a different implementation")]
    EncoderNameConflict { name: String },

    #[error("encoder tag space exhausted (tag must be <= 240)")]
    EncoderTagSpaceExhausted,

    #[error("integer exceeds 2^64-1")]
    VarIntOverflow,

    #[error("collection {0:?} is not registered on this store")]
    UnknownCollection(String),

    #[error("collection {0:?} already exists")]
    CollectionExists(String),

    #[error("record not found")]
    NotFound,

    #[error("engine error: {0}")]
    Engine(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("serialization error: {0}")]
    Serde(#[from] bincode::Error),
}

impl Error {
    pub fn engine<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Error::Engine(Box::new(err))
    }
}

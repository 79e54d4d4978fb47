//! Error taxonomy for fetches, durable writes and queued jobs.

use thiserror::Error;

/// Errors produced while fetching from the judge API or applying results.
///
/// The retry policy in both the fetch client and the sync queue keys off
/// [`SyncError::is_retryable`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
  /// Per-attempt deadline elapsed
  #[error("request timed out")]
  Timeout,

  /// Connection refused, reset, DNS failure and similar transport problems
  #[error("network error: {0}")]
  Network(String),

  /// HTTP 5xx from the judge API
  #[error("server error: HTTP {0}")]
  Server(u16),

  /// HTTP 4xx from the judge API
  #[error("client error: HTTP {0}")]
  Client(u16),

  /// Envelope carried a non-"OK" status
  #[error("API returned an error: {0}")]
  Api(String),

  /// The durable store could not be read or written
  #[error("durable store unavailable: {0}")]
  Store(String),

  /// Body did not match the expected shape
  #[error("invalid payload: {0}")]
  Decode(String),

  /// Cache backend unreachable. Never leaves the cache store.
  #[error("cache backend unavailable: {0}")]
  Cache(String),
}

impl SyncError {
  /// Whether the failure is transient and the operation may be attempted again.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      SyncError::Timeout | SyncError::Network(_) | SyncError::Server(_) | SyncError::Store(_)
    )
  }

  /// Classify a non-success HTTP status.
  pub fn from_status(status: u16) -> Self {
    if (400..500).contains(&status) {
      SyncError::Client(status)
    } else {
      SyncError::Server(status)
    }
  }
}

impl From<reqwest::Error> for SyncError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      SyncError::Timeout
    } else if let Some(status) = err.status() {
      SyncError::from_status(status.as_u16())
    } else if err.is_decode() {
      SyncError::Decode(err.to_string())
    } else {
      SyncError::Network(err.to_string())
    }
  }
}

impl From<serde_json::Error> for SyncError {
  fn from(err: serde_json::Error) -> Self {
    SyncError::Decode(err.to_string())
  }
}

impl From<rusqlite::Error> for SyncError {
  fn from(err: rusqlite::Error) -> Self {
    SyncError::Store(err.to_string())
  }
}

impl From<std::io::Error> for SyncError {
  fn from(err: std::io::Error) -> Self {
    SyncError::Store(err.to_string())
  }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

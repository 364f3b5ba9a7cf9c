//! Local persistence: a synchronous key/value cache for UI reads and a durable
//! SQLite-backed store that survives the cache being wiped.

mod durable;
mod fast;

pub use durable::{DurableBackend, DurableStore, SqliteBackend, SCHEMA_VERSION};
pub use fast::{FastCache, FileCache, MemoryCache};

use thiserror::Error;

/// FastCache keys.
pub mod keys {
  /// Current sketch blob.
  pub const CURRENT_SKETCH: &str = "graphSketch";
  /// Sketch library (JSON array).
  pub const LIBRARY: &str = "graphSketch.library";
  pub const AUTOSAVE: &str = "graphSketch.autosave";
  pub const LANGUAGE: &str = "graphSketch.lang";
  pub const SIZE_SCALE: &str = "graphSketch.sizeScale";
  pub const ADMIN_CONFIG: &str = "graphSketch.adminConfig.v1";
}

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
  /// The durable store could not be opened. Callers fall back to FastCache only.
  #[error("storage unavailable: {0}")]
  StorageUnavailable(String),
  /// A FastCache write did not fit.
  #[error("quota exceeded writing {key} ({needed} bytes, {available} available)")]
  QuotaExceeded {
    key: String,
    needed: usize,
    available: usize,
  },
  /// Malformed input to a store operation.
  #[error("invalid argument: {0}")]
  InvalidArgument(String),
  /// An imported file failed structural validation.
  #[error("Failed to import {target}: {reason}")]
  ImportValidation { target: &'static str, reason: String },
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("serde error: {0}")]
  Serde(#[from] serde_json::Error),
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  /// A blocking store task panicked or was cancelled.
  #[error("store task failed: {0}")]
  TaskJoin(String),
}

impl StoreError {
  pub fn invalid(msg: impl Into<String>) -> Self {
    StoreError::InvalidArgument(msg.into())
  }

  pub fn import(msg: impl Into<String>) -> Self {
    StoreError::ImportValidation {
      target: "sketch",
      reason: msg.into(),
    }
  }

  /// Re-label an import failure as coming from a library file.
  pub fn in_library_import(self) -> Self {
    match self {
      StoreError::ImportValidation { reason, .. } => StoreError::ImportValidation {
        target: "library",
        reason,
      },
      other => other,
    }
  }

  /// Whether this failure should be shown to the user as a toast rather than logged only.
  pub fn is_user_visible(&self) -> bool {
    matches!(
      self,
      StoreError::QuotaExceeded { .. } | StoreError::ImportValidation { .. }
    )
  }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

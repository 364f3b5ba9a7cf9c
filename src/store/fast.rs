//! Synchronous key/value cache backing every UI read.
//!
//! Values are opaque strings (usually JSON). Reads and writes never suspend, so
//! rendering never waits on I/O. Writes can fail with [`StoreError::QuotaExceeded`];
//! callers catch that at the call site and keep their in-memory state.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{StoreError, StoreResult};

/// Synchronous key/value store. Survives process restarts but not a wipe of its backing storage.
pub trait FastCache: Send + Sync {
  fn get(&self, key: &str) -> StoreResult<Option<String>>;
  fn set(&self, key: &str, value: &str) -> StoreResult<()>;
  fn remove(&self, key: &str) -> StoreResult<()>;
}

/// Shared quota accounting for both cache implementations.
#[derive(Debug, Default)]
struct Usage {
  sizes: HashMap<String, usize>,
  quota: Option<usize>,
}

impl Usage {
  fn check(&self, key: &str, value_len: usize) -> StoreResult<()> {
    let Some(quota) = self.quota else {
      return Ok(());
    };
    let used: usize = self
      .sizes
      .iter()
      .filter(|(k, _)| k.as_str() != key)
      .map(|(k, v)| k.len() + v)
      .sum();
    let needed = key.len() + value_len;
    if used + needed > quota {
      return Err(StoreError::QuotaExceeded {
        key: key.to_string(),
        needed,
        available: quota.saturating_sub(used),
      });
    }
    Ok(())
  }
}

/// In-memory cache, mainly for tests and for sessions where the disk is unusable.
#[derive(Debug, Default)]
pub struct MemoryCache {
  values: Mutex<HashMap<String, String>>,
  usage: Mutex<Usage>,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Limit total stored bytes (keys + values), like a browser storage quota.
  pub fn with_quota(self, bytes: usize) -> Self {
    if let Ok(mut usage) = self.usage.lock() {
      usage.quota = Some(bytes);
    }
    self
  }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
  StoreError::Io(std::io::Error::other(format!("Lock poisoned: {}", e)))
}

impl FastCache for MemoryCache {
  fn get(&self, key: &str) -> StoreResult<Option<String>> {
    let values = self.values.lock().map_err(poisoned)?;
    Ok(values.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> StoreResult<()> {
    let mut usage = self.usage.lock().map_err(poisoned)?;
    usage.check(key, value.len())?;
    let mut values = self.values.lock().map_err(poisoned)?;
    values.insert(key.to_string(), value.to_string());
    usage.sizes.insert(key.to_string(), value.len());
    Ok(())
  }

  fn remove(&self, key: &str) -> StoreResult<()> {
    let mut usage = self.usage.lock().map_err(poisoned)?;
    let mut values = self.values.lock().map_err(poisoned)?;
    values.remove(key);
    usage.sizes.remove(key);
    Ok(())
  }
}

/// Directory-backed cache: one file per key, named by the SHA-256 of the key.
pub struct FileCache {
  dir: PathBuf,
  usage: Mutex<Usage>,
}

impl FileCache {
  /// Open (creating if needed) a cache rooted at `dir`.
  pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
    let dir = dir.as_ref().to_path_buf();
    fs::create_dir_all(&dir)?;

    let mut usage = Usage::default();
    for entry in fs::read_dir(&dir)? {
      let entry = entry?;
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some("val") {
        continue;
      }
      if let (Some(stem), Ok(meta)) = (path.file_stem(), entry.metadata()) {
        usage
          .sizes
          .insert(stem.to_string_lossy().into_owned(), meta.len() as usize);
      }
    }

    Ok(Self {
      dir,
      usage: Mutex::new(usage),
    })
  }

  pub fn with_quota(self, bytes: usize) -> Self {
    if let Ok(mut usage) = self.usage.lock() {
      usage.quota = Some(bytes);
    }
    self
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn file_name(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
  }

  fn path_for(&self, key: &str) -> PathBuf {
    self.dir.join(format!("{}.val", Self::file_name(key)))
  }
}

impl FastCache for FileCache {
  fn get(&self, key: &str) -> StoreResult<Option<String>> {
    match fs::read_to_string(self.path_for(key)) {
      Ok(value) => Ok(Some(value)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  fn set(&self, key: &str, value: &str) -> StoreResult<()> {
    let name = Self::file_name(key);
    let mut usage = self.usage.lock().map_err(poisoned)?;
    usage.check(&name, value.len())?;

    let path = self.path_for(key);
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, value)?;
    fs::rename(&tmp, &path)?;

    usage.sizes.insert(name, value.len());
    Ok(())
  }

  fn remove(&self, key: &str) -> StoreResult<()> {
    let mut usage = self.usage.lock().map_err(poisoned)?;
    match fs::remove_file(self.path_for(key)) {
      Ok(()) => {}
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => return Err(e.into()),
    }
    usage.sizes.remove(&Self::file_name(key));
    Ok(())
  }
}

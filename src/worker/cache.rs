//! Named response caches, searched in creation order.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::net::Response;

type Entries = HashMap<String, Response>;

/// In-process cache storage shared by the controller and its background revalidations.
#[derive(Debug, Default)]
pub struct CacheStorage {
  caches: Mutex<Vec<(String, Entries)>>,
}

impl CacheStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Vec<(String, Entries)>> {
    match self.caches.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  /// Create the named cache if it does not exist yet.
  pub fn open(&self, name: &str) {
    let mut caches = self.lock();
    if !caches.iter().any(|(n, _)| n == name) {
      caches.push((name.to_string(), Entries::new()));
    }
  }

  pub fn has(&self, name: &str) -> bool {
    self.lock().iter().any(|(n, _)| n == name)
  }

  /// Names of every cache, oldest first.
  pub fn keys(&self) -> Vec<String> {
    self.lock().iter().map(|(n, _)| n.clone()).collect()
  }

  pub fn delete(&self, name: &str) -> bool {
    let mut caches = self.lock();
    let before = caches.len();
    caches.retain(|(n, _)| n != name);
    caches.len() != before
  }

  /// Store a response, opening the cache on first use.
  pub fn put(&self, name: &str, key: &str, response: Response) {
    let mut caches = self.lock();
    match caches.iter_mut().find(|(n, _)| n == name) {
      Some((_, entries)) => {
        entries.insert(key.to_string(), response);
      }
      None => {
        let mut entries = Entries::new();
        entries.insert(key.to_string(), response);
        caches.push((name.to_string(), entries));
      }
    }
  }

  /// Replace the whole content of a cache in one step.
  pub fn put_all(&self, name: &str, entries: Vec<(String, Response)>) {
    let mut caches = self.lock();
    let entries: Entries = entries.into_iter().collect();
    match caches.iter_mut().find(|(n, _)| n == name) {
      Some((_, existing)) => existing.extend(entries),
      None => caches.push((name.to_string(), entries)),
    }
  }

  /// First match for `key` across all caches.
  pub fn match_any(&self, key: &str) -> Option<Response> {
    self
      .lock()
      .iter()
      .find_map(|(_, entries)| entries.get(key).cloned())
  }

  pub fn match_in(&self, name: &str, key: &str) -> Option<Response> {
    self
      .lock()
      .iter()
      .find(|(n, _)| n == name)
      .and_then(|(_, entries)| entries.get(key).cloned())
  }

  pub fn len(&self, name: &str) -> usize {
    self
      .lock()
      .iter()
      .find(|(n, _)| n == name)
      .map_or(0, |(_, entries)| entries.len())
  }
}

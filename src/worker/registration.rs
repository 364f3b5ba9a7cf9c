//! Page side of the worker handshake.

use serde_json::json;
use tracing::{debug, info};

use super::{OfflineCacheController, WorkerError, WorkerState, SKIP_WAITING};
use crate::event::{AppEvent, EventSender};

/// Tracks which worker generation controls the page and asks for one reload
/// when that changes.
#[derive(Debug, Default)]
pub struct PageClient {
  controller: Option<String>,
  reloaded: bool,
  events: Option<EventSender>,
}

impl PageClient {
  pub fn new(events: Option<EventSender>) -> Self {
    Self {
      events,
      ..Self::default()
    }
  }

  /// Version of the controlling worker, if any.
  pub fn controller(&self) -> Option<&str> {
    self.controller.as_deref()
  }

  pub fn reload_requested(&self) -> bool {
    self.reloaded
  }

  /// Register `worker`: install it if new, and push a waiting worker to
  /// activate once it is installed over an existing controller.
  pub async fn register(&mut self, worker: &mut OfflineCacheController) -> Result<(), WorkerError> {
    if worker.state() == WorkerState::Waiting {
      self.request_skip_waiting(worker);
    }
    if worker.state() == WorkerState::Parsed {
      worker.install().await?;
      if worker.state() == WorkerState::Waiting && self.controller.is_some() {
        self.request_skip_waiting(worker);
      }
    }
    self.observe(worker);
    Ok(())
  }

  pub fn request_skip_waiting(&mut self, worker: &mut OfflineCacheController) {
    debug!("Asking worker {} to skip waiting", worker.settings().version);
    worker.handle_message(&json!({ "type": SKIP_WAITING }));
    self.observe(worker);
  }

  /// Pick up a controller change after the worker's state moved.
  pub fn observe(&mut self, worker: &OfflineCacheController) {
    if worker.state() != WorkerState::Active {
      return;
    }
    let version = &worker.settings().version;
    if self.controller.as_deref() == Some(version.as_str()) {
      return;
    }
    self.controller = Some(version.clone());
    self.controller_changed();
  }

  fn controller_changed(&mut self) {
    if self.reloaded {
      return;
    }
    self.reloaded = true;
    info!("Worker controller changed; reloading once");
    if let Some(events) = &self.events {
      events.send(AppEvent::ReloadRequested);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::EventHandler;
  use crate::worker::mock::MockNetwork;
  use crate::worker::{CacheStorage, WorkerSettings};
  use std::sync::Arc;

  fn worker(version: &str, caches: &Arc<CacheStorage>) -> OfflineCacheController {
    let settings = WorkerSettings::new(version, "https://sketch.example", "/").unwrap();
    let network = Arc::new(MockNetwork::with_shell(&settings, version));
    OfflineCacheController::new(settings, Arc::clone(caches), network).wait_for_clients()
  }

  #[tokio::test]
  async fn test_update_over_controller_skips_waiting_and_reloads_once() {
    let mut events = EventHandler::new();
    let mut page = PageClient::new(Some(events.sender()));
    let caches = Arc::new(CacheStorage::new());

    let mut first = worker("v11", &caches);
    page.register(&mut first).await.unwrap();
    // No controller yet, so the first worker waits for its clients.
    assert_eq!(first.state(), WorkerState::Waiting);
    first.clients_closed();
    page.observe(&first);
    assert_eq!(page.controller(), Some("v11"));
    assert!(page.reload_requested());

    let mut second = worker("v12", &caches);
    page.register(&mut second).await.unwrap();
    assert_eq!(second.state(), WorkerState::Active);
    assert_eq!(page.controller(), Some("v12"));

    let reloads = events
      .drain()
      .into_iter()
      .filter(|e| matches!(e, AppEvent::ReloadRequested))
      .count();
    assert_eq!(reloads, 1);
  }

  #[tokio::test]
  async fn test_already_waiting_worker_is_activated() {
    let caches = Arc::new(CacheStorage::new());
    let mut waiting = worker("v12", &caches);
    waiting.install().await.unwrap();
    assert_eq!(waiting.state(), WorkerState::Waiting);

    let mut page = PageClient::new(None);
    page.register(&mut waiting).await.unwrap();
    assert_eq!(waiting.state(), WorkerState::Active);
    assert_eq!(page.controller(), Some("v12"));
  }
}

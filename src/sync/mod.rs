//! Keeps FastCache and DurableStore eventually consistent.
//!
//! Every write lands in FastCache synchronously, then is queued for a single
//! background writer that mirrors it into DurableStore in submission order.
//! Mirror failures are logged and dropped. At startup, [`SyncBridge::restore_if_needed`]
//! repairs an emptied FastCache from DurableStore, never the other way round.

mod debounce;

pub use debounce::{Debouncer, DEFAULT_DELAY};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::event::{EventSender, ToastKind};
use crate::library::SketchLibrary;
use crate::sketch::{Sketch, SketchRecord};
use crate::store::{keys, DurableStore, FastCache, StoreError, StoreResult};

/// Stored library values at or below this length hold no records (`""`, `"[]"`).
const EMPTY_LIBRARY_MAX_LEN: usize = 2;

enum MirrorOp {
  SaveCurrent(Option<Sketch>),
  SaveSketch(SketchRecord),
  DeleteSketch(String),
  Flush(oneshot::Sender<()>),
}

/// What a restore pass copied back into FastCache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
  pub current_restored: bool,
  pub library_restored: bool,
}

pub struct SyncBridge {
  fast: Arc<dyn FastCache>,
  durable: Option<DurableStore>,
  mirror: Option<mpsc::UnboundedSender<MirrorOp>>,
  autosave: AtomicBool,
  debouncer: Debouncer,
  events: Option<EventSender>,
}

fn is_blank(raw: Option<&str>) -> bool {
  raw.map_or(true, |s| s.trim().is_empty())
}

fn library_is_empty(raw: Option<&str>) -> bool {
  raw.map_or(true, |s| s.trim().len() <= EMPTY_LIBRARY_MAX_LEN)
}

async fn run_mirror(store: DurableStore, mut rx: mpsc::UnboundedReceiver<MirrorOp>) {
  while let Some(op) = rx.recv().await {
    let (what, result) = match op {
      MirrorOp::SaveCurrent(sketch) => ("current sketch", store.save_current(sketch).await),
      MirrorOp::SaveSketch(record) => ("library record", store.save_sketch(record).await),
      MirrorOp::DeleteSketch(id) => ("library delete", store.delete_sketch(&id).await),
      MirrorOp::Flush(done) => {
        let _ = done.send(());
        continue;
      }
    };
    if let Err(e) = result {
      warn!("Durable mirror of {} failed: {}", what, e);
    }
  }
  debug!("Durable mirror stopped");
}

impl SyncBridge {
  /// Bridge over `fast`, mirroring into `durable` when present. With a durable
  /// store this spawns the mirror writer, so it must run inside a tokio runtime.
  pub fn new(fast: Arc<dyn FastCache>, durable: Option<DurableStore>) -> Self {
    let mirror = durable.clone().map(|store| {
      let (tx, rx) = mpsc::unbounded_channel();
      tokio::spawn(run_mirror(store, rx));
      tx
    });
    Self {
      fast,
      durable,
      mirror,
      autosave: AtomicBool::new(true),
      debouncer: Debouncer::default(),
      events: None,
    }
  }

  pub fn with_events(mut self, events: EventSender) -> Self {
    self.events = Some(events);
    self
  }

  pub fn with_debounce(mut self, delay: Duration) -> Self {
    self.debouncer = Debouncer::new(delay);
    self
  }

  pub fn fast(&self) -> &dyn FastCache {
    self.fast.as_ref()
  }

  pub fn durable(&self) -> Option<&DurableStore> {
    self.durable.as_ref()
  }

  pub fn autosave_enabled(&self) -> bool {
    self.autosave.load(Ordering::Relaxed)
  }

  pub fn set_autosave(&self, enabled: bool) {
    self.autosave.store(enabled, Ordering::Relaxed);
  }

  pub fn library(&self) -> SketchLibrary<'_> {
    SketchLibrary::new(self)
  }

  fn queue(&self, op: MirrorOp) {
    if let Some(tx) = &self.mirror {
      if tx.send(op).is_err() {
        warn!("Durable mirror is gone; write kept in FastCache only");
      }
    }
  }

  pub(crate) fn mirror_current(&self, sketch: Option<Sketch>) {
    self.queue(MirrorOp::SaveCurrent(sketch));
  }

  pub(crate) fn mirror_record(&self, record: SketchRecord) {
    self.queue(MirrorOp::SaveSketch(record));
  }

  pub(crate) fn mirror_delete(&self, id: &str) {
    self.queue(MirrorOp::DeleteSketch(id.to_string()));
  }

  /// Wait until every mirror write queued so far has been applied.
  pub async fn flush(&self) {
    let Some(tx) = &self.mirror else {
      return;
    };
    let (done_tx, done_rx) = oneshot::channel();
    if tx.send(MirrorOp::Flush(done_tx)).is_ok() {
      let _ = done_rx.await;
    }
  }

  /// Report a failed write: user-visible failures become toasts, the rest are logged.
  pub fn report(&self, context: &str, error: &StoreError) {
    match &self.events {
      Some(events) if error.is_user_visible() => {
        events.toast(ToastKind::Error, format!("{}: {}", context, error))
      }
      _ => warn!("{}: {}", context, error),
    }
  }

  /// Copy DurableStore's current sketch and library into FastCache where FastCache
  /// has nothing. Either source may fail without affecting the other.
  pub async fn restore_if_needed(&self) -> RestoreReport {
    let mut report = RestoreReport::default();
    let Some(store) = &self.durable else {
      return report;
    };

    let (current, library) = tokio::join!(store.load_current(), store.get_all_sketches());

    match current {
      Ok(Some(sketch)) => {
        report.current_restored = self.restore_key(keys::CURRENT_SKETCH, is_blank, &sketch);
      }
      Ok(None) => {}
      Err(e) => warn!("Could not read durable current sketch: {}", e),
    }

    match library {
      Ok(records) if !records.is_empty() => {
        report.library_restored = self.restore_key(keys::LIBRARY, library_is_empty, &records);
      }
      Ok(_) => {}
      Err(e) => warn!("Could not read durable library: {}", e),
    }

    if report.current_restored || report.library_restored {
      debug!("Restored FastCache from durable store: {:?}", report);
    }
    report
  }

  fn restore_key<T: serde::Serialize>(
    &self,
    key: &str,
    is_empty: fn(Option<&str>) -> bool,
    value: &T,
  ) -> bool {
    let existing = match self.fast.get(key) {
      Ok(existing) => existing,
      Err(e) => {
        warn!("Could not read {} from FastCache: {}", key, e);
        return false;
      }
    };
    if !is_empty(existing.as_deref()) {
      return false;
    }
    let result = serde_json::to_string(value)
      .map_err(StoreError::from)
      .and_then(|raw| self.fast.set(key, &raw));
    match result {
      Ok(()) => true,
      Err(e) => {
        self.report("Restoring from durable store failed", &e);
        false
      }
    }
  }

  /// Write the current sketch to FastCache now and queue its durable mirror.
  /// With autosave on, the sketch is also upserted into the library first, so a
  /// newly assigned id is part of the stored blob.
  pub fn persist(&self, sketch: &mut Sketch) -> StoreResult<()> {
    let library_result = if self.autosave_enabled() {
      self.library().upsert(sketch).map(|_| ())
    } else {
      Ok(())
    };

    let raw = serde_json::to_string(&*sketch)?;
    let fast_result = self.fast.set(keys::CURRENT_SKETCH, &raw);
    self.mirror_current(Some(sketch.clone()));

    fast_result.and(library_result)
  }

  /// Structural write: drop any pending coalesced write, then persist immediately.
  pub fn persist_now(&self, sketch: &mut Sketch) -> StoreResult<()> {
    self.debouncer.cancel();
    self.persist(sketch)
  }

  /// Coalesced write for rapid field edits. The sketch is read when the timer
  /// fires, so the newest state is what gets stored.
  pub fn persist_debounced(self: &Arc<Self>, sketch: &Arc<Mutex<Sketch>>) {
    let bridge = Arc::clone(self);
    let sketch = Arc::clone(sketch);
    self.debouncer.schedule(async move {
      let result = match sketch.lock() {
        Ok(mut sketch) => bridge.persist(&mut sketch),
        Err(e) => Err(StoreError::Io(std::io::Error::other(format!(
          "Lock poisoned: {}",
          e
        )))),
      };
      if let Err(e) = result {
        bridge.report("Saving sketch failed", &e);
      }
    });
  }

  pub fn has_pending_write(&self) -> bool {
    self.debouncer.is_pending()
  }

  /// Remove the current sketch from both stores.
  pub fn clear(&self) -> StoreResult<()> {
    self.debouncer.cancel();
    let result = self.fast.remove(keys::CURRENT_SKETCH);
    self.mirror_current(None);
    result
  }

  /// The current sketch as stored in FastCache, normalized. Unreadable blobs
  /// are logged and treated as absent.
  pub fn load_current(&self) -> Option<Sketch> {
    let raw = match self.fast.get(keys::CURRENT_SKETCH) {
      Ok(Some(raw)) if !raw.trim().is_empty() => raw,
      Ok(_) => return None,
      Err(e) => {
        warn!("Could not read current sketch: {}", e);
        return None;
      }
    };
    match serde_json::from_str::<Sketch>(&raw) {
      Ok(mut sketch) => {
        sketch.normalize();
        sketch.recompute_next_node_id_from_max();
        Some(sketch)
      }
      Err(e) => {
        warn!("Error loading sketch from storage: {}", e);
        None
      }
    }
  }
}

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::config::Config;
use crate::event::{AppEvent, EventHandler};
use crate::prefs::{Language, Preferences};
use crate::sketch::admin::AdminConfig;
use crate::sketch::{csv, io, DeleteOutcome, Sketch, SketchRecord};
use crate::store::{DurableStore, FastCache, FileCache};
use crate::sync::{RestoreReport, SyncBridge};

/// Main application state: the bridge over both stores and the sketch being edited.
pub struct App {
  config: Config,
  bridge: Arc<SyncBridge>,
  /// Shared with debounced writes, which read it when they fire
  sketch: Arc<Mutex<Sketch>>,
  admin: AdminConfig,
  prefs: Preferences,
  events: EventHandler,
  restore_report: RestoreReport,
}

fn today() -> String {
  chrono::Local::now().format("%Y-%m-%d").to_string()
}

impl App {
  /// Open the on-disk stores named by `config` and run the startup protocol.
  /// A durable store that fails to open degrades to FastCache-only.
  pub async fn bootstrap(config: Config) -> Result<Self> {
    let cache_dir = config.cache_dir()?;
    let fast = FileCache::open(&cache_dir)
      .map_err(|e| eyre!("Failed to open cache at {}: {}", cache_dir.display(), e))?;

    let db_path = config.database_path()?;
    let durable = match DurableStore::open(&db_path).await {
      Ok(store) => Some(store),
      Err(e) => {
        warn!(
          "Durable store unavailable at {}; running on FastCache only: {}",
          db_path.display(),
          e
        );
        None
      }
    };

    Self::with_stores(config, Arc::new(fast), durable).await
  }

  /// Startup protocol over already-open stores.
  pub async fn with_stores(
    config: Config,
    fast: Arc<dyn FastCache>,
    durable: Option<DurableStore>,
  ) -> Result<Self> {
    let events = EventHandler::new();
    let bridge = Arc::new(
      SyncBridge::new(fast, durable)
        .with_events(events.sender())
        .with_debounce(config.debounce()),
    );

    let restore_report = bridge.restore_if_needed().await;

    if let Err(e) = bridge.library().migrate_legacy_if_needed() {
      bridge.report("Migrating the saved sketch failed", &e);
    }

    let prefs = Preferences::load(bridge.fast(), config.default_preferences());
    bridge.set_autosave(prefs.autosave);
    let admin = AdminConfig::load(bridge.fast());

    let mut sketch = bridge.load_current().unwrap_or_else(|| Sketch::new(today()));
    if sketch.sketch_name.is_none() {
      if let Some(id) = sketch.sketch_id.clone() {
        sketch.sketch_name = bridge.library().get(&id).and_then(|r| r.name);
      }
    }
    info!(
      "Loaded sketch {} with {} nodes",
      sketch.sketch_id.as_deref().unwrap_or("(unsaved)"),
      sketch.nodes.len()
    );

    Ok(Self {
      config,
      bridge,
      sketch: Arc::new(Mutex::new(sketch)),
      admin,
      prefs,
      events,
      restore_report,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn bridge(&self) -> &SyncBridge {
    &self.bridge
  }

  pub fn admin(&self) -> &AdminConfig {
    &self.admin
  }

  pub fn preferences(&self) -> Preferences {
    self.prefs
  }

  pub fn restore_report(&self) -> RestoreReport {
    self.restore_report
  }

  fn lock(&self) -> Result<MutexGuard<'_, Sketch>> {
    self
      .sketch
      .lock()
      .map_err(|e| eyre!("Sketch state is poisoned: {}", e))
  }

  /// Snapshot of the sketch being edited.
  pub fn current(&self) -> Result<Sketch> {
    Ok(self.lock()?.clone())
  }

  /// Apply a structural change and write it through immediately.
  /// Storage failures are reported as toasts; the in-memory change stands.
  fn edit<R>(&self, change: impl FnOnce(&mut Sketch) -> R) -> Result<R> {
    let mut sketch = self.lock()?;
    let result = change(&mut *sketch);
    if let Err(e) = self.bridge.persist_now(&mut sketch) {
      self.bridge.report("Saving sketch failed", &e);
    }
    Ok(result)
  }

  /// Apply a field edit and coalesce its write with others close behind it.
  fn edit_field<R>(&self, change: impl FnOnce(&mut Sketch) -> R) -> Result<R> {
    let result = change(&mut *self.lock()?);
    self.bridge.persist_debounced(&self.sketch);
    Ok(result)
  }

  pub fn list(&self) -> Vec<SketchRecord> {
    self.bridge.library().list()
  }

  /// Replace the current sketch with an empty, unsaved one.
  pub fn new_sketch(&self) -> Result<()> {
    self.edit(|sketch| *sketch = Sketch::new(today()))
  }

  pub fn open(&self, id: &str) -> Result<()> {
    let opened = self
      .bridge
      .library()
      .open(id)
      .map_err(|e| eyre!("Failed to open sketch {}: {}", id, e))?
      .ok_or_else(|| eyre!("No sketch with id {}", id))?;
    *self.lock()? = opened;
    Ok(())
  }

  pub fn rename(&self, id: &str, name: &str) -> Result<SketchRecord> {
    let renamed = self
      .bridge
      .library()
      .rename(id, name)
      .map_err(|e| eyre!("Failed to rename sketch {}: {}", id, e))?
      .ok_or_else(|| eyre!("No sketch with id {}", id))?;
    let is_current = self.lock()?.sketch_id.as_deref() == Some(id);
    if is_current {
      self.edit(|sketch| sketch.sketch_name = renamed.name.clone())?;
    }
    Ok(renamed)
  }

  pub fn duplicate(&self, id: &str) -> Result<SketchRecord> {
    self
      .bridge
      .library()
      .duplicate(id)
      .map_err(|e| eyre!("Failed to duplicate sketch {}: {}", id, e))?
      .ok_or_else(|| eyre!("No sketch with id {}", id))
  }

  /// Delete a record. When it was the one being edited, the most recent remaining
  /// record is opened, or an empty sketch started when none is left.
  pub fn delete(&self, id: &str) -> Result<()> {
    let was_current = {
      let mut sketch = self.lock()?;
      self
        .bridge
        .library()
        .delete(id, &mut sketch)
        .map_err(|e| eyre!("Failed to delete sketch {}: {}", id, e))?
    };
    if !was_current {
      return Ok(());
    }
    match self.list().first() {
      Some(next) => self.open(&next.id.clone()),
      None => self.new_sketch(),
    }
  }

  /// Add a node at (x, y). Home nodes get an internal id outside the numeric space.
  pub fn add_node(&self, x: f64, y: f64, home: bool) -> Result<String> {
    let defaults = self.admin.nodes.defaults.clone();
    self.edit(|sketch| {
      let node = if home {
        sketch.create_home_node(x, y, &defaults)
      } else {
        sketch.create_node(x, y, &defaults)
      };
      node.id.clone()
    })
  }

  pub fn delete_node(&self, id: &str, confirmed: bool) -> Result<DeleteOutcome> {
    let outcome = self.lock()?.delete_node(id, confirmed);
    if matches!(outcome, DeleteOutcome::Deleted { .. }) {
      self.edit(|_| ())?;
    }
    Ok(outcome)
  }

  /// Connect two nodes. `None` when either node is missing or they are already connected.
  pub fn add_edge(&self, tail: &str, head: &str) -> Result<Option<f64>> {
    let defaults = self.admin.edges.defaults.clone();
    let id = self
      .lock()?
      .create_edge(tail, head, &defaults)
      .map(|edge| edge.id);
    if id.is_some() {
      self.edit(|_| ())?;
    }
    Ok(id)
  }

  pub fn delete_edge(&self, edge_id: f64) -> Result<bool> {
    let removed = self.lock()?.delete_edge(edge_id);
    if removed {
      self.edit(|_| ())?;
    }
    Ok(removed)
  }

  pub fn rename_node(&self, old_id: &str, new_id: &str) -> Result<()> {
    self
      .edit(|sketch| sketch.rename_node_id(old_id, new_id))?
      .map_err(|e| eyre!("Failed to rename node: {}", e))
  }

  pub fn set_direct_connection(&self, id: &str, connected: bool) -> Result<String> {
    self
      .edit(|sketch| sketch.set_direct_connection(id, connected))?
      .map_err(|e| eyre!("Failed to change node {}: {}", id, e))
  }

  /// Keystroke-level edit of a node note.
  pub fn set_node_note(&self, id: &str, note: &str) -> Result<()> {
    let found = self.edit_field(|sketch| match sketch.node_mut(id) {
      Some(node) => {
        node.note = note.to_string();
        true
      }
      None => false,
    })?;
    if found {
      Ok(())
    } else {
      Err(eyre!("No node with id {}", id))
    }
  }

  /// The current sketch as a file, with its suggested file name.
  pub fn export_sketch(&self) -> Result<(String, String)> {
    let sketch = self.current()?;
    let contents = io::export_sketch(&sketch, &crate::sketch::now_iso())
      .map_err(|e| eyre!("Failed to export sketch: {}", e))?;
    Ok((io::export_filename(&sketch, &today()), contents))
  }

  /// Load a sketch file as the current sketch. It is saved as a new library record.
  pub fn import_sketch(&self, raw: &str) -> Result<()> {
    let imported = io::import_sketch(raw).map_err(|e| eyre!("{}", e))?;
    info!(
      "Imported sketch exported {} (format {})",
      imported.export_date.as_deref().unwrap_or("at an unknown date"),
      imported.version
    );
    self.edit(|sketch| *sketch = imported.sketch)
  }

  pub fn export_library(&self) -> Result<String> {
    self
      .bridge
      .library()
      .export()
      .map_err(|e| eyre!("Failed to export library: {}", e))
  }

  pub fn import_library(&self, raw: &str) -> Result<Vec<String>> {
    self
      .bridge
      .library()
      .import(raw)
      .map_err(|e| eyre!("{}", e))
  }

  /// Node and edge tables, encoded for spreadsheet programs.
  pub fn export_csv(&self) -> Result<(Vec<u8>, Vec<u8>)> {
    let sketch = self.current()?;
    let nodes = csv::export_nodes_csv(&sketch.nodes, &self.admin);
    let edges = csv::export_edges_csv(&sketch, &self.admin);
    Ok((
      csv::encode_for_spreadsheet(&nodes),
      csv::encode_for_spreadsheet(&edges),
    ))
  }

  pub fn set_autosave(&mut self, enabled: bool) -> Result<()> {
    Preferences::save_autosave(self.bridge.fast(), enabled)
      .map_err(|e| eyre!("Failed to save autosave setting: {}", e))?;
    self.prefs.autosave = enabled;
    self.bridge.set_autosave(enabled);
    Ok(())
  }

  pub fn set_language(&mut self, language: Language) -> Result<()> {
    Preferences::save_language(self.bridge.fast(), language)
      .map_err(|e| eyre!("Failed to save language: {}", e))?;
    self.prefs.language = language;
    Ok(())
  }

  pub fn save_admin(&mut self, admin: AdminConfig) -> Result<()> {
    admin
      .save(self.bridge.fast())
      .map_err(|e| eyre!("Failed to save admin settings: {}", e))?;
    self.admin = admin;
    Ok(())
  }

  /// Write out any coalesced edit and wait for the durable mirror to catch up.
  pub async fn shutdown(&self) -> Result<()> {
    if self.bridge.has_pending_write() {
      self.edit(|_| ())?;
    }
    self.bridge.flush().await;
    Ok(())
  }

  /// Events raised so far (toasts, reload requests).
  pub fn drain_events(&mut self) -> Vec<AppEvent> {
    self.events.drain()
  }
}

//! The sketch library: every saved sketch, most recent first.
//!
//! The whole list lives under one FastCache key and is read-modify-written as a
//! unit; each changed record is also mirrored to DurableStore individually.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::sketch::io;
use crate::sketch::{generate_sketch_id, now_iso, Sketch, SketchRecord};
use crate::store::{keys, StoreResult};
use crate::sync::SyncBridge;

/// One stored library item. Items that no longer parse are carried verbatim.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum Entry {
  Record(SketchRecord),
  Unreadable(Value),
}

impl Entry {
  fn id(&self) -> Option<&str> {
    match self {
      Entry::Record(record) => Some(record.id.as_str()),
      Entry::Unreadable(value) => value.get("id").and_then(Value::as_str),
    }
  }

  fn record(&self, id: &str) -> Option<&SketchRecord> {
    match self {
      Entry::Record(record) if record.id == id => Some(record),
      _ => None,
    }
  }

  fn record_mut(&mut self, id: &str) -> Option<&mut SketchRecord> {
    match self {
      Entry::Record(record) if record.id == id => Some(record),
      _ => None,
    }
  }
}

/// View over the library stored behind a [`SyncBridge`].
pub struct SketchLibrary<'a> {
  bridge: &'a SyncBridge,
}

impl<'a> SketchLibrary<'a> {
  pub fn new(bridge: &'a SyncBridge) -> Self {
    Self { bridge }
  }

  /// Fresh library id. Not checked against existing ids.
  pub fn generate_id() -> String {
    generate_sketch_id()
  }

  /// All readable records in stored order. A missing or unreadable list reads
  /// as empty; records that fail to parse are left out.
  pub fn list(&self) -> Vec<SketchRecord> {
    self
      .entries()
      .into_iter()
      .filter_map(|entry| match entry {
        Entry::Record(record) => Some(record),
        Entry::Unreadable(_) => None,
      })
      .collect()
  }

  /// Stored entries, keeping the ones that fail to parse so writes put them back.
  fn entries(&self) -> Vec<Entry> {
    let raw = match self.bridge.fast().get(keys::LIBRARY) {
      Ok(Some(raw)) if !raw.trim().is_empty() => raw,
      Ok(_) => return Vec::new(),
      Err(e) => {
        warn!("Failed to read library: {}", e);
        return Vec::new();
      }
    };
    let items: Vec<Value> = match serde_json::from_str(&raw) {
      Ok(Value::Array(items)) => items,
      Ok(_) => return Vec::new(),
      Err(e) => {
        warn!("Failed to parse library: {}", e);
        return Vec::new();
      }
    };
    items
      .into_iter()
      .map(|item| match serde_json::from_value(item.clone()) {
        Ok(record) => Entry::Record(record),
        Err(e) => {
          warn!("Keeping unreadable library record as stored: {}", e);
          Entry::Unreadable(item)
        }
      })
      .collect()
  }

  pub fn get(&self, id: &str) -> Option<SketchRecord> {
    self.list().into_iter().find(|r| r.id == id)
  }

  fn store(&self, entries: &[Entry]) -> StoreResult<()> {
    let raw = serde_json::to_string(entries)?;
    self.bridge.fast().set(keys::LIBRARY, &raw)
  }

  /// Save `sketch` as a library record, assigning it an id if it has none.
  /// Existing records are replaced in place; an empty incoming name keeps the
  /// stored one. New records go to the front.
  pub fn upsert(&self, sketch: &mut Sketch) -> StoreResult<SketchRecord> {
    let mut entries = self.entries();
    let id = sketch
      .sketch_id
      .clone()
      .filter(|id| !id.is_empty())
      .unwrap_or_else(Self::generate_id);
    let mut record = SketchRecord::from_sketch(sketch, id.clone(), &now_iso());

    match entries.iter_mut().find(|e| e.id() == Some(id.as_str())) {
      Some(existing) => {
        if let Entry::Record(previous) = existing {
          if !record.has_name() && previous.has_name() {
            record.name = previous.name.clone();
          }
        }
        *existing = Entry::Record(record.clone());
      }
      None => entries.insert(0, Entry::Record(record.clone())),
    }

    sketch.sketch_id = Some(id);
    let result = self.store(&entries);
    self.bridge.mirror_record(record.clone());
    result.map(|()| record)
  }

  /// Wrap a pre-library single sketch into the first library record. Runs only
  /// when the library is empty, so repeated calls never duplicate.
  pub fn migrate_legacy_if_needed(&self) -> StoreResult<bool> {
    if !self.entries().is_empty() {
      return Ok(false);
    }
    let raw = match self.bridge.fast().get(keys::CURRENT_SKETCH)? {
      Some(raw) if !raw.trim().is_empty() => raw,
      _ => return Ok(false),
    };
    let mut sketch: Sketch = match serde_json::from_str(&raw) {
      Ok(sketch) => sketch,
      Err(e) => {
        warn!("Migration skipped: {}", e);
        return Ok(false);
      }
    };

    let id = sketch
      .sketch_id
      .clone()
      .filter(|id| !id.is_empty())
      .unwrap_or_else(Self::generate_id);
    let record = SketchRecord::from_sketch(&sketch, id.clone(), &now_iso());
    self.store(&[Entry::Record(record.clone())])?;
    self.bridge.mirror_record(record);

    sketch.sketch_id = Some(id.clone());
    self.bridge.persist(&mut sketch)?;
    info!("Migrated legacy sketch into library as {}", id);
    Ok(true)
  }

  /// Load a record into the current slot and persist it. Returns the new current sketch.
  pub fn open(&self, id: &str) -> StoreResult<Option<Sketch>> {
    let Some(record) = self.get(id) else {
      return Ok(None);
    };
    let mut sketch = Sketch::from_record(&record);
    self.bridge.persist_now(&mut sketch)?;
    Ok(Some(sketch))
  }

  /// Remove a record. If it is bound to `current`, the binding is cleared and
  /// `true` is returned; the caller decides what to show next.
  pub fn delete(&self, id: &str, current: &mut Sketch) -> StoreResult<bool> {
    let entries: Vec<Entry> = self
      .entries()
      .into_iter()
      .filter(|e| e.id() != Some(id))
      .collect();
    let result = self.store(&entries);
    self.bridge.mirror_delete(id);

    let was_current = current.sketch_id.as_deref() == Some(id);
    if was_current {
      current.sketch_id = None;
    }
    result.map(|()| was_current)
  }

  /// Copy a record under a new id with fresh timestamps, at the front.
  pub fn duplicate(&self, id: &str) -> StoreResult<Option<SketchRecord>> {
    let mut entries = self.entries();
    let Some(source) = entries.iter().find_map(|e| e.record(id)) else {
      return Ok(None);
    };
    let now = now_iso();
    let copy = SketchRecord {
      id: Self::generate_id(),
      created_at: now.clone(),
      updated_at: now,
      ..source.clone()
    };
    entries.insert(0, Entry::Record(copy.clone()));
    let result = self.store(&entries);
    self.bridge.mirror_record(copy.clone());
    result.map(|()| Some(copy))
  }

  /// Set or clear (empty `name`) a record's name. An unnamed record given its own
  /// fallback title stays unnamed. Always bumps `updated_at`.
  pub fn rename(&self, id: &str, name: &str) -> StoreResult<Option<SketchRecord>> {
    let mut entries = self.entries();
    let Some(record) = entries.iter_mut().find_map(|e| e.record_mut(id)) else {
      return Ok(None);
    };
    let name = name.trim();
    let keeps_fallback = !record.has_name() && name == record.display_title();
    record.name = if name.is_empty() || keeps_fallback {
      None
    } else {
      Some(name.to_string())
    };
    record.updated_at = now_iso();
    let renamed = record.clone();

    let result = self.store(&entries);
    self.bridge.mirror_record(renamed.clone());
    result.map(|()| Some(renamed))
  }

  /// Serialized library file.
  pub fn export(&self) -> StoreResult<String> {
    io::export_library(&self.list(), &now_iso())
  }

  /// Add records from a library or sketch file. Records whose id is missing or
  /// already taken get a fresh one. Imported records go to the front in file order.
  pub fn import(&self, raw: &str) -> StoreResult<Vec<String>> {
    let incoming = io::import_library(raw)?;
    let mut entries = self.entries();
    let now = now_iso();

    let mut added = Vec::with_capacity(incoming.len());
    for mut record in incoming {
      let taken = record.id.is_empty()
        || entries.iter().any(|e| e.id() == Some(record.id.as_str()))
        || added.iter().any(|r: &SketchRecord| r.id == record.id);
      if taken {
        record.id = Self::generate_id();
      }
      if record.created_at.is_empty() {
        record.created_at = now.clone();
      }
      if record.updated_at.is_empty() {
        record.updated_at = now.clone();
      }
      added.push(record);
    }

    let ids: Vec<String> = added.iter().map(|r| r.id.clone()).collect();
    entries.splice(0..0, added.iter().cloned().map(Entry::Record));
    let result = self.store(&entries);
    for record in added {
      self.bridge.mirror_record(record);
    }
    result.map(|()| ids)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sketch::admin::NodeDefaults;
  use crate::store::{DurableStore, FastCache, MemoryCache};
  use std::sync::Arc;

  fn bridge() -> (Arc<MemoryCache>, SyncBridge) {
    let fast = Arc::new(MemoryCache::new());
    let bridge = SyncBridge::new(fast.clone(), None);
    bridge.set_autosave(false);
    (fast, bridge)
  }

  fn sketch(date: &str) -> Sketch {
    let mut sketch = Sketch::new(date);
    sketch.create_node(0.0, 0.0, &NodeDefaults::default());
    sketch
  }

  #[test]
  fn test_upsert_inserts_new_at_front_and_updates_in_place() {
    let (_, bridge) = bridge();
    let library = bridge.library();
    let mut first = sketch("2024-01-01");
    let mut second = sketch("2024-01-02");
    library.upsert(&mut first).unwrap();
    library.upsert(&mut second).unwrap();

    let ids: Vec<String> = library.list().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![second.sketch_id.clone().unwrap(), first.sketch_id.clone().unwrap()]);

    first.create_node(5.0, 5.0, &NodeDefaults::default());
    library.upsert(&mut first).unwrap();
    let list = library.list();
    assert_eq!(list.len(), 2);
    assert_eq!(list[1].id, first.sketch_id.clone().unwrap());
    assert_eq!(list[1].nodes.len(), 2);
  }

  #[test]
  fn test_upsert_preserves_existing_name_when_incoming_is_empty() {
    let (_, bridge) = bridge();
    let library = bridge.library();
    let mut current = sketch("2024-01-01");
    current.sketch_name = Some("Herzl st".into());
    let id = library.upsert(&mut current).unwrap().id;

    current.sketch_name = None;
    library.upsert(&mut current).unwrap();
    assert_eq!(library.get(&id).unwrap().name.as_deref(), Some("Herzl st"));

    current.sketch_name = Some(String::new());
    library.upsert(&mut current).unwrap();
    assert_eq!(library.get(&id).unwrap().name.as_deref(), Some("Herzl st"));

    current.sketch_name = Some("Weizmann st".into());
    library.upsert(&mut current).unwrap();
    assert_eq!(library.get(&id).unwrap().name.as_deref(), Some("Weizmann st"));
  }

  #[test]
  fn test_migration_runs_once() {
    let (fast, bridge) = bridge();
    let legacy = r#"{"nodes":[{"id":1,"x":0,"y":0}],"edges":[],"nextNodeId":2,"creationDate":"2023-06-01"}"#;
    fast.set(keys::CURRENT_SKETCH, legacy).unwrap();

    let library = bridge.library();
    assert!(library.migrate_legacy_if_needed().unwrap());
    assert!(!library.migrate_legacy_if_needed().unwrap());

    let list = library.list();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].creation_date.as_deref(), Some("2023-06-01"));
    assert_eq!(list[0].nodes[0].id, "1");
    let current = bridge.load_current().unwrap();
    assert_eq!(current.sketch_id.as_deref(), Some(list[0].id.as_str()));
  }

  #[test]
  fn test_migration_without_legacy_sketch_is_noop() {
    let (_, bridge) = bridge();
    assert!(!bridge.library().migrate_legacy_if_needed().unwrap());
    assert!(bridge.library().list().is_empty());
  }

  #[test]
  fn test_delete_clears_current_binding() {
    let (_, bridge) = bridge();
    let library = bridge.library();
    let mut current = sketch("2024-01-01");
    let mut other = sketch("2024-01-02");
    let id = library.upsert(&mut current).unwrap().id;
    let other_id = library.upsert(&mut other).unwrap().id;

    assert!(!library.delete(&other_id, &mut current).unwrap());
    assert_eq!(current.sketch_id.as_deref(), Some(id.as_str()));
    assert!(library.delete(&id, &mut current).unwrap());
    assert_eq!(current.sketch_id, None);
    assert!(library.list().is_empty());
  }

  #[test]
  fn test_duplicate_gets_new_id_at_front() {
    let (_, bridge) = bridge();
    let library = bridge.library();
    let mut current = sketch("2024-01-01");
    current.sketch_name = Some("copy me".into());
    let id = library.upsert(&mut current).unwrap().id;

    let copy = library.duplicate(&id).unwrap().unwrap();
    assert_ne!(copy.id, id);
    assert_eq!(copy.nodes, current.nodes);
    assert_eq!(library.list()[0].id, copy.id);
    assert!(library.duplicate("sk_missing").unwrap().is_none());
  }

  #[test]
  fn test_rename_sets_and_clears_and_bumps_updated_at() {
    let (_, bridge) = bridge();
    let library = bridge.library();
    let mut current = sketch("2024-01-01");
    let id = library.upsert(&mut current).unwrap().id;

    let mut stale = library.get(&id).unwrap();
    stale.updated_at = "2000-01-01T00:00:00.000Z".into();
    library.store(&[Entry::Record(stale)]).unwrap();

    let renamed = library.rename(&id, "  North  ").unwrap().unwrap();
    assert_eq!(renamed.name.as_deref(), Some("North"));
    assert_ne!(renamed.updated_at, "2000-01-01T00:00:00.000Z");

    let cleared = library.rename(&id, "").unwrap().unwrap();
    assert_eq!(cleared.name, None);
    assert!(cleared.display_title().starts_with("Sketch "));
  }

  #[test]
  fn test_rename_to_fallback_title_keeps_record_unnamed() {
    let (_, bridge) = bridge();
    let library = bridge.library();
    let mut current = sketch("2024-01-01");
    let id = library.upsert(&mut current).unwrap().id;

    let title = library.get(&id).unwrap().display_title();
    let kept = library.rename(&id, &format!(" {} ", title)).unwrap().unwrap();
    assert_eq!(kept.name, None);

    let named = library.rename(&id, "Main line").unwrap().unwrap();
    assert_eq!(named.name.as_deref(), Some("Main line"));
    let same = library.rename(&id, "Main line").unwrap().unwrap();
    assert_eq!(same.name.as_deref(), Some("Main line"));
  }

  #[test]
  fn test_unreadable_records_survive_library_writes() {
    let (fast, bridge) = bridge();
    let seeded = r#"[{"id":"sk_old","createdAt":"2024-01-01T00:00:00.000Z","updatedAt":"2024-01-01T00:00:00.000Z","nodes":[{"id":"1","x":null,"y":5}],"edges":[]}]"#;
    fast.set(keys::LIBRARY, seeded).unwrap();

    let library = bridge.library();
    assert!(library.list().is_empty());
    let mut fresh = sketch("2024-02-01");
    let id = library.upsert(&mut fresh).unwrap().id;
    library.rename(&id, "Fresh").unwrap();

    let stored: Value = serde_json::from_str(&fast.get(keys::LIBRARY).unwrap().unwrap()).unwrap();
    let ids: Vec<&str> = stored
      .as_array()
      .unwrap()
      .iter()
      .filter_map(|item| item.get("id").and_then(Value::as_str))
      .collect();
    assert_eq!(ids, vec![id.as_str(), "sk_old"]);
    assert_eq!(stored[1]["nodes"][0]["x"], Value::Null);
    assert_eq!(library.list().len(), 1);

    let mut current = sketch("2024-02-02");
    library.delete("sk_old", &mut current).unwrap();
    assert_eq!(
      serde_json::from_str::<Value>(&fast.get(keys::LIBRARY).unwrap().unwrap())
        .unwrap()
        .as_array()
        .unwrap()
        .len(),
      1
    );
  }

  #[test]
  fn test_open_binds_record_as_current() {
    let (_, bridge) = bridge();
    let library = bridge.library();
    let mut saved = sketch("2024-01-01");
    saved.sketch_name = Some("Saved".into());
    let id = library.upsert(&mut saved).unwrap().id;

    let opened = library.open(&id).unwrap().unwrap();
    assert_eq!(opened.sketch_id.as_deref(), Some(id.as_str()));
    assert_eq!(opened.sketch_name.as_deref(), Some("Saved"));
    assert_eq!(bridge.load_current().unwrap().nodes, opened.nodes);
    assert!(library.open("sk_nope").unwrap().is_none());
  }

  #[test]
  fn test_import_assigns_fresh_ids_on_collision() {
    let (_, bridge) = bridge();
    let library = bridge.library();
    let mut current = sketch("2024-01-01");
    let id = library.upsert(&mut current).unwrap().id;

    let exported = library.export().unwrap();
    let ids = library.import(&exported).unwrap();
    assert_eq!(ids.len(), 1);
    assert_ne!(ids[0], id);

    let list = library.list();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id, ids[0]);
  }

  #[tokio::test]
  async fn test_library_writes_are_mirrored() {
    let fast = Arc::new(MemoryCache::new());
    let durable = DurableStore::in_memory().unwrap();
    let bridge = SyncBridge::new(fast, Some(durable.clone()));
    bridge.set_autosave(false);
    let library = bridge.library();

    let mut current = sketch("2024-01-01");
    let id = library.upsert(&mut current).unwrap().id;
    let copy = library.duplicate(&id).unwrap().unwrap();
    library.delete(&id, &mut current).unwrap();
    bridge.flush().await;

    let ids: Vec<String> = durable
      .get_all_sketches()
      .await
      .unwrap()
      .into_iter()
      .map(|r| r.id)
      .collect();
    assert_eq!(ids, vec![copy.id]);
  }
}

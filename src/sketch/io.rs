//! JSON sketch files: single-sketch export/import with structural validation,
//! and whole-library export/import.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Edge, Node, Sketch, SketchRecord};
use crate::store::{StoreError, StoreResult};

pub const FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportedSketch {
  #[serde(default)]
  id: Option<String>,
  #[serde(default)]
  name: Option<String>,
  #[serde(default)]
  creation_date: Option<String>,
  #[serde(
    default = "super::default_next_node_id",
    deserialize_with = "super::de_next_node_id"
  )]
  next_node_id: u64,
  nodes: Vec<Node>,
  edges: Vec<Edge>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SketchFile<'a> {
  version: &'a str,
  export_date: &'a str,
  sketch: ExportedSketch,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LibraryFile<'a> {
  version: &'a str,
  export_date: &'a str,
  sketch_count: usize,
  sketches: &'a [SketchRecord],
}

/// A validated sketch file. The sketch carries no id; one is assigned when it is saved.
#[derive(Debug, Clone)]
pub struct ImportedSketch {
  pub sketch: Sketch,
  pub export_date: Option<String>,
  pub version: String,
}

/// Serialize the current sketch as a pretty-printed sketch file.
pub fn export_sketch(sketch: &Sketch, export_date: &str) -> StoreResult<String> {
  let file = SketchFile {
    version: FORMAT_VERSION,
    export_date,
    sketch: ExportedSketch {
      id: sketch.sketch_id.clone(),
      name: sketch.sketch_name.clone().filter(|n| !n.is_empty()),
      creation_date: sketch.creation_date.clone(),
      next_node_id: sketch.next_node_id.max(1),
      nodes: sketch.nodes.clone(),
      edges: sketch.edges.clone(),
    },
  };
  Ok(serde_json::to_string_pretty(&file)?)
}

fn truthy(value: Option<&Value>) -> bool {
  match value {
    None | Some(Value::Null) => false,
    Some(Value::Bool(b)) => *b,
    Some(Value::String(s)) => !s.is_empty(),
    Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
    Some(_) => true,
  }
}

fn describe_id(value: Option<&Value>) -> String {
  match value {
    Some(Value::String(s)) => s.clone(),
    Some(Value::Null) | None => "undefined".to_string(),
    Some(other) => other.to_string(),
  }
}

/// Check the structure of a `sketch` object before any of it is deserialized.
fn validate(sketch: &Value) -> StoreResult<()> {
  let Some(nodes) = sketch.get("nodes").and_then(Value::as_array) else {
    return Err(StoreError::import("Invalid sketch file: nodes must be an array"));
  };
  let Some(edges) = sketch.get("edges").and_then(Value::as_array) else {
    return Err(StoreError::import("Invalid sketch file: edges must be an array"));
  };
  for node in nodes {
    let has_coords = node.get("x").is_some_and(Value::is_number)
      && node.get("y").is_some_and(Value::is_number);
    if !has_coords {
      return Err(StoreError::import(format!(
        "Invalid node structure: node {} missing x,y coordinates",
        describe_id(node.get("id"))
      )));
    }
    if !truthy(node.get("id")) {
      return Err(StoreError::import("Invalid node structure: node missing id"));
    }
  }
  for edge in edges {
    if !truthy(edge.get("tail")) || !truthy(edge.get("head")) {
      return Err(StoreError::import(
        "Invalid edge structure: edge missing tail or head",
      ));
    }
  }
  Ok(())
}

fn parse(raw: &str) -> StoreResult<Value> {
  serde_json::from_str(raw).map_err(|e| StoreError::import(e.to_string()))
}

fn exported_from_value(sketch: Value) -> StoreResult<ExportedSketch> {
  validate(&sketch)?;
  serde_json::from_value(sketch).map_err(|e| StoreError::import(e.to_string()))
}

/// Parse and validate a sketch file. Any violation rejects the whole file.
pub fn import_sketch(raw: &str) -> StoreResult<ImportedSketch> {
  let mut file = parse(raw)?;
  let sketch = match file.get_mut("sketch") {
    Some(value) if truthy(Some(&*value)) => value.take(),
    _ => {
      return Err(StoreError::import(
        "Invalid sketch file: missing sketch data",
      ))
    }
  };
  let exported = exported_from_value(sketch)?;

  Ok(ImportedSketch {
    sketch: Sketch {
      nodes: exported.nodes,
      edges: exported.edges,
      next_node_id: exported.next_node_id.max(1),
      creation_date: exported.creation_date.filter(|d| !d.is_empty()),
      sketch_id: None,
      sketch_name: exported.name.filter(|n| !n.is_empty()),
    },
    export_date: file
      .get("exportDate")
      .and_then(Value::as_str)
      .map(str::to_string),
    version: file
      .get("version")
      .and_then(Value::as_str)
      .unwrap_or(FORMAT_VERSION)
      .to_string(),
  })
}

/// Serialize the whole library.
pub fn export_library(records: &[SketchRecord], export_date: &str) -> StoreResult<String> {
  let file = LibraryFile {
    version: FORMAT_VERSION,
    export_date,
    sketch_count: records.len(),
    sketches: records,
  };
  Ok(serde_json::to_string_pretty(&file)?)
}

/// Parse a library file, or a single-sketch file wrapped as one record.
/// Records keep whatever ids they carry; the caller resolves collisions.
pub fn import_library(raw: &str) -> StoreResult<Vec<SketchRecord>> {
  library_records(raw).map_err(StoreError::in_library_import)
}

fn library_records(raw: &str) -> StoreResult<Vec<SketchRecord>> {
  let mut file = parse(raw)?;
  if let Some(Value::Array(items)) = file.get_mut("sketches").map(Value::take) {
    return items
      .into_iter()
      .map(|item| serde_json::from_value(item).map_err(|e| StoreError::import(e.to_string())))
      .collect();
  }
  match file.get_mut("sketch") {
    Some(value) if truthy(Some(&*value)) => {
      let exported = exported_from_value(value.take())?;
      let created = exported.creation_date.clone().unwrap_or_default();
      Ok(vec![SketchRecord {
        id: exported.id.unwrap_or_default(),
        created_at: created.clone(),
        updated_at: created,
        creation_date: exported.creation_date,
        name: exported.name.filter(|n| !n.is_empty()),
        nodes: exported.nodes,
        edges: exported.edges,
        next_node_id: exported.next_node_id.max(1),
      }])
    }
    _ => Err(StoreError::import("Invalid file format")),
  }
}

/// `sketch[_<name>]_<YYYY-MM-DD>.json`. Name characters outside ASCII
/// alphanumerics, `_` and the Hebrew block become `_`.
pub fn export_filename(sketch: &Sketch, today: &str) -> String {
  let date_source = sketch
    .creation_date
    .as_deref()
    .filter(|d| !d.is_empty())
    .unwrap_or(today);
  let date: String = date_source.chars().take(10).collect();
  let name = match sketch.sketch_name.as_deref().filter(|n| !n.is_empty()) {
    Some(name) => {
      let clean: String = name
        .chars()
        .map(|c| {
          if c.is_ascii_alphanumeric() || c == '_' || ('\u{0590}'..='\u{05FF}').contains(&c) {
            c
          } else {
            '_'
          }
        })
        .collect();
      format!("_{}", clean)
    }
    None => String::new(),
  };
  format!("sketch{}_{}.json", name, date)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sketch::admin::{EdgeDefaults, NodeDefaults};
  use crate::sketch::FieldValue;
  use serde_json::json;

  fn sample() -> Sketch {
    let mut sketch = Sketch::new("2024-03-05T10:00:00.000Z");
    let defaults = NodeDefaults::default();
    sketch.create_node(10.25, -3.5, &defaults);
    sketch.create_node(50.0, 50.0, &defaults);
    sketch.create_home_node(0.1 + 0.2, 7.0, &defaults);
    sketch.create_edge("1", "2", &EdgeDefaults::default());
    if let Some(node) = sketch.node_mut("1") {
      node.cover_diameter = FieldValue::Float(62.5);
      node
        .extra
        .insert("surveyor".into(), Value::String("dana".into()));
    }
    sketch.edges[0].tail_measurement = FieldValue::Float(1.375);
    sketch.sketch_name = Some("Main st".into());
    sketch.sketch_id = Some("sk_old".into());
    sketch
  }

  #[test]
  fn test_export_import_preserves_nodes_and_edges() {
    let sketch = sample();
    let raw = export_sketch(&sketch, "2024-03-06T00:00:00.000Z").unwrap();
    let imported = import_sketch(&raw).unwrap();

    assert_eq!(imported.sketch.nodes, sketch.nodes);
    assert_eq!(imported.sketch.edges, sketch.edges);
    assert_eq!(imported.sketch.creation_date, sketch.creation_date);
    assert_eq!(imported.sketch.sketch_name.as_deref(), Some("Main st"));
    assert_eq!(imported.sketch.sketch_id, None);
    assert_eq!(imported.version, "1.0");
    assert_eq!(
      imported.export_date.as_deref(),
      Some("2024-03-06T00:00:00.000Z")
    );
  }

  #[test]
  fn test_export_shape() {
    let raw = export_sketch(&sample(), "2024-03-06").unwrap();
    let value: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["version"], "1.0");
    assert_eq!(value["exportDate"], "2024-03-06");
    assert_eq!(value["sketch"]["id"], "sk_old");
    assert_eq!(value["sketch"]["nextNodeId"], 3);
    assert!(value["sketch"]["nodes"].is_array());
  }

  fn import_err(value: Value) -> String {
    import_sketch(&value.to_string()).unwrap_err().to_string()
  }

  #[test]
  fn test_import_validation_messages() {
    assert_eq!(
      import_err(json!({"version": "1.0"})),
      "Failed to import sketch: Invalid sketch file: missing sketch data"
    );
    assert_eq!(
      import_err(json!({"sketch": {"nodes": {}, "edges": []}})),
      "Failed to import sketch: Invalid sketch file: nodes must be an array"
    );
    assert_eq!(
      import_err(json!({"sketch": {"nodes": [], "edges": null}})),
      "Failed to import sketch: Invalid sketch file: edges must be an array"
    );
    assert_eq!(
      import_err(json!({"sketch": {"nodes": [{"id": "4", "x": "1", "y": 2}], "edges": []}})),
      "Failed to import sketch: Invalid node structure: node 4 missing x,y coordinates"
    );
    assert_eq!(
      import_err(json!({"sketch": {"nodes": [{"id": "", "x": 1, "y": 2}], "edges": []}})),
      "Failed to import sketch: Invalid node structure: node missing id"
    );
    assert_eq!(
      import_err(json!({"sketch": {"nodes": [], "edges": [{"tail": "1", "head": ""}]}})),
      "Failed to import sketch: Invalid edge structure: edge missing tail or head"
    );
  }

  #[test]
  fn test_import_rejects_malformed_json() {
    let err = import_sketch("{not json").unwrap_err();
    assert!(matches!(err, StoreError::ImportValidation { .. }));
  }

  #[test]
  fn test_library_round_trip_and_single_sketch_wrap() {
    let sketch = sample();
    let record = SketchRecord::from_sketch(&sketch, "sk_1".into(), "2024-03-06T00:00:00.000Z");
    let raw = export_library(std::slice::from_ref(&record), "2024-03-06").unwrap();
    let value: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["sketchCount"], 1);
    assert_eq!(import_library(&raw).unwrap(), vec![record]);

    let single = export_sketch(&sketch, "2024-03-06").unwrap();
    let wrapped = import_library(&single).unwrap();
    assert_eq!(wrapped.len(), 1);
    assert_eq!(wrapped[0].id, "sk_old");
    assert_eq!(wrapped[0].nodes, sketch.nodes);

    assert_eq!(
      import_library("{\"foo\": 1}").unwrap_err().to_string(),
      "Failed to import library: Invalid file format"
    );
  }

  #[test]
  fn test_export_filename() {
    let mut sketch = Sketch::new("2024-03-05T10:00:00.000Z");
    assert_eq!(export_filename(&sketch, "2030-01-01"), "sketch_2024-03-05.json");
    sketch.sketch_name = Some("רחוב הרצל 5/a".into());
    assert_eq!(
      export_filename(&sketch, "2030-01-01"),
      "sketch_רחוב_הרצל_5_a_2024-03-05.json"
    );
    sketch.creation_date = None;
    sketch.sketch_name = None;
    assert_eq!(export_filename(&sketch, "2030-01-01T09:00"), "sketch_2030-01-01.json");
  }
}

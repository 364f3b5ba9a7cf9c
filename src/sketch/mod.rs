//! Sketch data model: nodes, edges, the current-sketch blob and library records.
//!
//! Serialized field names match the persisted JSON layout, so blobs written by
//! older builds (numeric ids, legacy node-type labels, loosely typed attributes)
//! still load.

pub mod admin;
pub mod csv;
mod graph;
pub mod io;

pub use graph::{is_numeric_id, DeleteOutcome, GraphError};

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Loosely typed attribute value (catalog code, free text, or measurement).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
  Int(i64),
  Float(f64),
  Text(String),
}

impl Default for FieldValue {
  fn default() -> Self {
    FieldValue::Text(String::new())
  }
}

impl FieldValue {
  /// Empty or whitespace-only text. Numbers are never blank.
  pub fn is_blank(&self) -> bool {
    match self {
      FieldValue::Text(s) => s.trim().is_empty(),
      _ => false,
    }
  }

  /// Integer code, if the value is (or spells) an integer.
  pub fn as_code(&self) -> Option<i64> {
    match self {
      FieldValue::Int(n) => Some(*n),
      FieldValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
      FieldValue::Float(_) => None,
      FieldValue::Text(s) => s.trim().parse().ok(),
    }
  }

  /// Coerce to a number, falling back to `0` when the value is not numeric.
  pub fn coerce_numeric(&self) -> FieldValue {
    match self {
      FieldValue::Int(_) | FieldValue::Float(_) => self.clone(),
      FieldValue::Text(s) => {
        let t = s.trim();
        if let Ok(n) = t.parse::<i64>() {
          FieldValue::Int(n)
        } else if let Ok(f) = t.parse::<f64>() {
          if f.is_finite() {
            FieldValue::Float(f)
          } else {
            FieldValue::Int(0)
          }
        } else {
          FieldValue::Int(0)
        }
      }
    }
  }

  /// Round to an integer, or empty text if not numeric (cover diameters).
  pub fn rounded_or_blank(&self) -> FieldValue {
    match self {
      FieldValue::Int(_) => self.clone(),
      FieldValue::Float(f) => FieldValue::Int(f.round() as i64),
      FieldValue::Text(s) => match s.trim().parse::<f64>() {
        Ok(f) if f.is_finite() && !s.trim().is_empty() => FieldValue::Int(f.round() as i64),
        _ => FieldValue::default(),
      },
    }
  }
}

impl std::fmt::Display for FieldValue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      FieldValue::Int(n) => write!(f, "{}", n),
      FieldValue::Float(x) => write!(f, "{}", x),
      FieldValue::Text(s) => f.write_str(s),
    }
  }
}

impl From<i64> for FieldValue {
  fn from(n: i64) -> Self {
    FieldValue::Int(n)
  }
}

impl From<&str> for FieldValue {
  fn from(s: &str) -> Self {
    FieldValue::Text(s.to_string())
  }
}

impl From<String> for FieldValue {
  fn from(s: String) -> Self {
    FieldValue::Text(s)
  }
}

impl Serialize for FieldValue {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      FieldValue::Int(n) => serializer.serialize_i64(*n),
      FieldValue::Float(f) => serializer.serialize_f64(*f),
      FieldValue::Text(s) => serializer.serialize_str(s),
    }
  }
}

impl<'de> Deserialize<'de> for FieldValue {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
      Value::Number(n) => match n.as_i64() {
        Some(i) => FieldValue::Int(i),
        None => FieldValue::Float(n.as_f64().unwrap_or(0.0)),
      },
      Value::String(s) => FieldValue::Text(s),
      Value::Null => FieldValue::default(),
      Value::Bool(b) => FieldValue::Text(b.to_string()),
      other => FieldValue::Text(other.to_string()),
    })
  }
}

/// Accept node ids written either as strings or as bare numbers.
fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
  match Value::deserialize(deserializer)? {
    Value::String(s) => Ok(s),
    Value::Number(n) => Ok(n.to_string()),
    Value::Null => Ok(String::new()),
    other => Err(serde::de::Error::custom(format!(
      "expected string or number id, got {}",
      other
    ))),
  }
}

fn de_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
  Ok(match Value::deserialize(deserializer)? {
    Value::String(s) => s,
    Value::Null => String::new(),
    other => other.to_string(),
  })
}

fn de_next_node_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
  Ok(match Value::deserialize(deserializer)? {
    Value::Number(n) => n.as_u64().filter(|n| *n > 0).unwrap_or(1),
    Value::String(s) => s.trim().parse::<u64>().ok().filter(|n| *n > 0).unwrap_or(1),
    _ => 1,
  })
}

fn default_next_node_id() -> u64 {
  1
}

/// Physical kind of node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum NodeKind {
  #[default]
  Manhole,
  Home,
  Drainage,
  Covered,
}

impl From<String> for NodeKind {
  fn from(raw: String) -> Self {
    match raw.as_str() {
      "Home" | "בית" | "B" => NodeKind::Home,
      "Covered" | "שוחה מכוסה" | "C" => NodeKind::Covered,
      "Drainage" | "קולטן" | "D" => NodeKind::Drainage,
      _ => NodeKind::Manhole,
    }
  }
}

impl NodeKind {
  pub fn as_str(self) -> &'static str {
    match self {
      NodeKind::Manhole => "Manhole",
      NodeKind::Home => "Home",
      NodeKind::Drainage => "Drainage",
      NodeKind::Covered => "Covered",
    }
  }
}

/// Derived measurement state. `Type2` marks a node touching an edge with a missing measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum NodeType {
  #[default]
  #[serde(rename = "type1")]
  Type1,
  #[serde(rename = "type2")]
  Type2,
}

impl From<String> for NodeType {
  fn from(raw: String) -> Self {
    if raw == "type2" {
      NodeType::Type2
    } else {
      NodeType::Type1
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  #[serde(deserialize_with = "de_id")]
  pub id: String,
  pub x: f64,
  pub y: f64,
  #[serde(default, deserialize_with = "de_text")]
  pub note: String,
  #[serde(rename = "nodeType", default)]
  pub kind: NodeKind,
  /// Cached; rebuilt by [`Sketch::compute_node_types`] after every edge change.
  #[serde(rename = "type", default)]
  pub node_type: NodeType,
  #[serde(default)]
  pub material: FieldValue,
  #[serde(rename = "coverDiameter", default)]
  pub cover_diameter: FieldValue,
  #[serde(default)]
  pub access: FieldValue,
  #[serde(rename = "accuracyLevel", default)]
  pub accuracy_level: FieldValue,
  #[serde(rename = "maintenanceStatus", default)]
  pub maintenance_status: FieldValue,
  /// Home nodes only.
  #[serde(
    rename = "directConnection",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub direct_connection: Option<bool>,
  /// Fields written by other builds, kept verbatim.
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Node {
  /// Whether this node's id lives in the shared numeric id space.
  pub fn in_numeric_id_space(&self) -> bool {
    self.kind != NodeKind::Home || self.direct_connection == Some(true)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
  #[serde(default = "generate_edge_id")]
  pub id: f64,
  #[serde(deserialize_with = "de_id")]
  pub tail: String,
  #[serde(deserialize_with = "de_id")]
  pub head: String,
  #[serde(default)]
  pub tail_measurement: FieldValue,
  #[serde(default)]
  pub head_measurement: FieldValue,
  #[serde(default)]
  pub fall_depth: FieldValue,
  #[serde(default)]
  pub fall_position: FieldValue,
  #[serde(default)]
  pub line_diameter: FieldValue,
  #[serde(default)]
  pub edge_type: FieldValue,
  #[serde(default)]
  pub material: FieldValue,
  #[serde(rename = "maintenanceStatus", default)]
  pub maintenance_status: FieldValue,
  #[serde(rename = "engineeringStatus", default)]
  pub engineering_status: FieldValue,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Edge {
  /// Whether this edge joins `a` and `b` in either direction.
  pub fn connects(&self, a: &str, b: &str) -> bool {
    (self.tail == a && self.head == b) || (self.tail == b && self.head == a)
  }

  pub fn touches(&self, node_id: &str) -> bool {
    self.tail == node_id || self.head == node_id
  }
}

/// The sketch bound to the editing surface, in its persisted (FastCache) layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sketch {
  pub nodes: Vec<Node>,
  pub edges: Vec<Edge>,
  #[serde(
    rename = "nextNodeId",
    default = "default_next_node_id",
    deserialize_with = "de_next_node_id"
  )]
  pub next_node_id: u64,
  #[serde(rename = "creationDate", default)]
  pub creation_date: Option<String>,
  #[serde(rename = "sketchId", default)]
  pub sketch_id: Option<String>,
  #[serde(rename = "sketchName", default)]
  pub sketch_name: Option<String>,
}

impl Default for Sketch {
  fn default() -> Self {
    Self {
      nodes: Vec::new(),
      edges: Vec::new(),
      next_node_id: 1,
      creation_date: None,
      sketch_id: None,
      sketch_name: None,
    }
  }
}

impl Sketch {
  /// A fresh, unsaved sketch.
  pub fn new(creation_date: impl Into<String>) -> Self {
    Self {
      creation_date: Some(creation_date.into()),
      ..Self::default()
    }
  }

  pub fn node(&self, id: &str) -> Option<&Node> {
    self.nodes.iter().find(|n| n.id == id)
  }

  pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
    self.nodes.iter_mut().find(|n| n.id == id)
  }

  /// Rebuild the editing copy of a library record.
  pub fn from_record(record: &SketchRecord) -> Self {
    let mut sketch = Self {
      nodes: record.nodes.clone(),
      edges: record.edges.clone(),
      next_node_id: record.next_node_id.max(1),
      creation_date: record
        .creation_date
        .clone()
        .or_else(|| non_empty(&record.created_at)),
      sketch_id: Some(record.id.clone()),
      sketch_name: record.name.clone().filter(|n| !n.trim().is_empty()),
    };
    sketch.normalize();
    sketch
  }
}

/// A sketch saved in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SketchRecord {
  #[serde(default)]
  pub id: String,
  #[serde(rename = "createdAt", default, deserialize_with = "de_text")]
  pub created_at: String,
  #[serde(rename = "updatedAt", default, deserialize_with = "de_text")]
  pub updated_at: String,
  #[serde(rename = "creationDate", default)]
  pub creation_date: Option<String>,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub nodes: Vec<Node>,
  #[serde(default)]
  pub edges: Vec<Edge>,
  #[serde(
    rename = "nextNodeId",
    default = "default_next_node_id",
    deserialize_with = "de_next_node_id"
  )]
  pub next_node_id: u64,
}

impl SketchRecord {
  /// Snapshot the current sketch as a library record stamped `now`.
  pub fn from_sketch(sketch: &Sketch, id: String, now: &str) -> Self {
    let creation = sketch
      .creation_date
      .clone()
      .unwrap_or_else(|| now.to_string());
    Self {
      id,
      created_at: creation.clone(),
      updated_at: now.to_string(),
      creation_date: Some(creation),
      name: sketch.sketch_name.clone().filter(|n| !n.is_empty()),
      nodes: sketch.nodes.clone(),
      edges: sketch.edges.clone(),
      next_node_id: sketch.next_node_id,
    }
  }

  pub fn has_name(&self) -> bool {
    self.name.as_deref().is_some_and(|n| !n.trim().is_empty())
  }

  /// Title shown in the library list. Unnamed sketches get one derived from the
  /// id suffix and the creation date; the derived title is never persisted.
  pub fn display_title(&self) -> String {
    if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
      return name.to_string();
    }
    let suffix: String = {
      let chars: Vec<char> = self.id.chars().collect();
      chars[chars.len().saturating_sub(6)..].iter().collect()
    };
    let date = self
      .creation_date
      .as_deref()
      .filter(|d| !d.is_empty())
      .unwrap_or(self.created_at.as_str());
    let date = date.get(..10).unwrap_or(date);
    format!("Sketch {} ({})", suffix, date)
  }
}

fn non_empty(s: &str) -> Option<String> {
  if s.is_empty() {
    None
  } else {
    Some(s.to_string())
  }
}

/// Current time as an ISO-8601 UTC timestamp with millisecond precision.
pub fn now_iso() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn base36(mut n: u64) -> String {
  const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
  if n == 0 {
    return "0".to_string();
  }
  let mut out = Vec::new();
  while n > 0 {
    out.push(DIGITS[(n % 36) as usize]);
    n /= 36;
  }
  out.reverse();
  String::from_utf8(out).unwrap_or_default()
}

fn random_base36(len: usize) -> String {
  const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
  let mut rng = rand::rng();
  (0..len)
    .map(|_| DIGITS[rng.random_range(0..DIGITS.len())] as char)
    .collect()
}

fn now_millis() -> u64 {
  Utc::now().timestamp_millis().max(0) as u64
}

/// Library id: `sk_` + base-36 timestamp + random suffix. Not checked against existing ids.
pub fn generate_sketch_id() -> String {
  format!("sk_{}{}", base36(now_millis()), random_base36(6))
}

/// Opaque id for a Home node outside the numeric id space.
pub fn generate_home_internal_id() -> String {
  format!("home_{}{}", base36(now_millis()), random_base36(4))
}

/// Opaque edge id: millisecond timestamp plus a random fraction.
pub fn generate_edge_id() -> f64 {
  now_millis() as f64 + rand::rng().random::<f64>()
}

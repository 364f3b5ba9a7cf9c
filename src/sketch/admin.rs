//! Admin configuration: CSV include flags, defaults for new entities, and the
//! option catalogs that map UI labels to export codes.
//!
//! Catalog entries are normalized to [`OptionEntry`] as they are deserialized,
//! whether they were stored as `{code, label}` objects or as bare strings.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use super::FieldValue;
use crate::store::{keys, FastCache, StoreResult};

/// Which entity family a catalog belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
  Nodes,
  Edges,
}

/// One selectable option: the code written to CSV and the label shown in the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionEntry {
  pub code: FieldValue,
  pub label: String,
  pub enabled: bool,
}

impl OptionEntry {
  pub fn new(code: impl Into<FieldValue>, label: impl Into<String>) -> Self {
    Self {
      code: code.into(),
      label: label.into(),
      enabled: true,
    }
  }
}

impl<'de> Deserialize<'de> for OptionEntry {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(normalize_option(raw))
  }
}

fn scalar_to_field(value: &Value) -> FieldValue {
  serde_json::from_value(value.clone()).unwrap_or_default()
}

fn normalize_option(raw: Value) -> OptionEntry {
  match raw {
    Value::Object(map) if map.contains_key("code") || map.contains_key("label") => {
      let code = map.get("code").filter(|v| !v.is_null());
      let label = map.get("label").filter(|v| !v.is_null());
      let code_value = code.or(label).map(scalar_to_field).unwrap_or_default();
      let label_text = match label {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => code_value.to_string(),
      };
      let enabled = map.get("enabled").and_then(Value::as_bool).unwrap_or(true);
      OptionEntry {
        code: code_value,
        label: label_text,
        enabled,
      }
    }
    other => {
      let code = scalar_to_field(&other);
      let label = code.to_string();
      OptionEntry {
        code,
        label,
        enabled: true,
      }
    }
  }
}

const UNKNOWN: &str = "לא ידוע";

pub const NODE_MATERIAL_OPTIONS: &[(i64, &str)] = &[
  (0, UNKNOWN),
  (1, "פלדה מגולוונת"),
  (2, "פלדה עם ציפוי פנים וחוץ"),
  (3, "פלדה ללא ציפוי"),
  (4, "פי. וי. סי. לפי ת\"י 884"),
  (5, "פי. וי. סי. לחץ"),
  (6, "פיברגלס"),
  (7, "בטון"),
  (8, "אסבסט צמנט"),
  (10, "פקסגול - פוליאטילן"),
  (11, "יציקת ברזל"),
  (12, "פלסטיק - שוחת חופית"),
  (13, "שוחת PVC"),
  (9, "אבו"),
];

pub const NODE_ACCESS_OPTIONS: &[(i64, &str)] = &[
  (0, UNKNOWN),
  (1, "מדרגות ברזל חשוף"),
  (2, "מדרגות ברזל מצופה PVC"),
  (3, "סולם פלדה"),
  (4, "אין אמצעי ירידה"),
  (5, "מדרגות PVC מובנות"),
];

pub const NODE_MAINTENANCE_OPTIONS: &[(i64, &str)] = &[
  (0, UNKNOWN),
  (1, "תקין"),
  (2, "אביזר שבור"),
  (3, "לא ניתן לפתיחה"),
  (4, "שוחה מכוסה"),
  (5, "שוחת ביוב - ללא גישה"),
  (6, "שוחה מלאה חול / זבל"),
  (7, "מספל גבוה (סתומה)"),
  (8, "מכסה שבור/לא תקין"),
  (9, "שוחה יבשה/קו יבש"),
  (10, "ללא מכסה"),
  (11, "לא מחובר"),
  (12, "הכנה"),
  (13, "בית נעול"),
  (14, "אחר"),
];

/// 0 = engineering grade, 1 = schematic.
pub const NODE_ACCURACY_OPTIONS: &[(i64, &str)] = &[(0, "הנדסית"), (1, "סכימטית")];

pub const EDGE_MATERIAL_OPTIONS: &[(i64, &str)] = NODE_MATERIAL_OPTIONS;

pub const EDGE_TYPE_OPTIONS: &[(i64, &str)] = &[
  (4801, "קו ראשי"),
  (4802, "קו סניקה"),
  (4803, "קו משני"),
];

pub const EDGE_ENGINEERING_STATUS: &[(i64, &str)] = &[
  (0, UNKNOWN),
  (1, "פעיל"),
  (2, "לא פעיל"),
  (3, "מתוכנן"),
  (4, "מבוטל"),
];

pub const EDGE_FALL_POSITIONS: &[(i64, &str)] = &[(0, "פנימי"), (1, "חיצוני")];

pub const EDGE_LINE_DIAMETERS: &[&str] = &[
  "10", "25", "26", "50", "75", "100", "150", "160", "200", "250", "300", "350", "400", "500",
  "600", "650", "700", "800", "900", "1000", "1250", "1500", "1800", "2000",
];

fn catalog(entries: &[(i64, &str)]) -> Vec<OptionEntry> {
  entries
    .iter()
    .map(|(code, label)| OptionEntry::new(*code, *label))
    .collect()
}

fn diameters() -> Vec<OptionEntry> {
  EDGE_LINE_DIAMETERS
    .iter()
    .map(|d| OptionEntry::new(*d, *d))
    .collect()
}

/// Built-in catalog for a field, used when the admin config has none.
pub fn default_options(scope: Scope, key: &str) -> Vec<OptionEntry> {
  match (scope, key) {
    (Scope::Nodes, "material") => catalog(NODE_MATERIAL_OPTIONS),
    (Scope::Nodes, "access") => catalog(NODE_ACCESS_OPTIONS),
    (Scope::Nodes, "maintenance_status") => catalog(NODE_MAINTENANCE_OPTIONS),
    (Scope::Nodes, "accuracy_level") => catalog(NODE_ACCURACY_OPTIONS),
    (Scope::Edges, "material") => catalog(EDGE_MATERIAL_OPTIONS),
    (Scope::Edges, "edge_type") => catalog(EDGE_TYPE_OPTIONS),
    (Scope::Edges, "line_diameter") => diameters(),
    (Scope::Edges, "engineering_status") => catalog(EDGE_ENGINEERING_STATUS),
    (Scope::Edges, "fall_position") => catalog(EDGE_FALL_POSITIONS),
    _ => Vec::new(),
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeInclude {
  pub id: bool,
  #[serde(rename = "type")]
  pub node_type: bool,
  pub note: bool,
  pub material: bool,
  pub cover_diameter: bool,
  pub access: bool,
  pub accuracy_level: bool,
  pub engineering_status: bool,
  pub maintenance_status: bool,
}

impl Default for NodeInclude {
  fn default() -> Self {
    Self {
      id: true,
      node_type: true,
      note: true,
      material: true,
      cover_diameter: true,
      access: true,
      accuracy_level: true,
      engineering_status: false,
      maintenance_status: true,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeInclude {
  pub from_node: bool,
  pub to_node: bool,
  pub tail_measurement: bool,
  pub head_measurement: bool,
  pub fall_depth: bool,
  pub fall_position: bool,
  pub line_diameter: bool,
  pub note: bool,
  pub edge_material: bool,
  pub edge_type: bool,
  pub engineering_status: bool,
}

impl Default for EdgeInclude {
  fn default() -> Self {
    Self {
      from_node: true,
      to_node: true,
      tail_measurement: true,
      head_measurement: true,
      fall_depth: true,
      fall_position: true,
      line_diameter: true,
      note: true,
      edge_material: true,
      edge_type: true,
      engineering_status: true,
    }
  }
}

/// Initial attribute values for new nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeDefaults {
  pub material: FieldValue,
  pub cover_diameter: FieldValue,
  pub access: FieldValue,
  pub accuracy_level: FieldValue,
  pub engineering_status: FieldValue,
  pub maintenance_status: FieldValue,
}

impl Default for NodeDefaults {
  fn default() -> Self {
    Self {
      material: FieldValue::from(UNKNOWN),
      cover_diameter: FieldValue::default(),
      access: FieldValue::Int(0),
      accuracy_level: FieldValue::Int(0),
      engineering_status: FieldValue::Int(0),
      maintenance_status: FieldValue::Int(0),
    }
  }
}

/// Initial attribute values for new edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeDefaults {
  pub material: FieldValue,
  pub edge_type: FieldValue,
  pub tail_measurement: FieldValue,
  pub head_measurement: FieldValue,
  pub fall_depth: FieldValue,
  pub fall_position: FieldValue,
  pub line_diameter: FieldValue,
  pub engineering_status: FieldValue,
}

impl Default for EdgeDefaults {
  fn default() -> Self {
    Self {
      material: FieldValue::from(UNKNOWN),
      edge_type: FieldValue::from(EDGE_TYPE_OPTIONS[0].1),
      tail_measurement: FieldValue::default(),
      head_measurement: FieldValue::default(),
      fall_depth: FieldValue::default(),
      fall_position: FieldValue::Int(0),
      line_diameter: FieldValue::default(),
      engineering_status: FieldValue::Int(0),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeAdmin {
  pub include: NodeInclude,
  pub defaults: NodeDefaults,
  pub options: BTreeMap<String, Vec<OptionEntry>>,
}

impl Default for NodeAdmin {
  fn default() -> Self {
    let options = ["material", "access", "accuracy_level", "maintenance_status"]
      .into_iter()
      .map(|k| (k.to_string(), default_options(Scope::Nodes, k)))
      .collect();
    Self {
      include: NodeInclude::default(),
      defaults: NodeDefaults::default(),
      options,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeAdmin {
  pub include: EdgeInclude,
  pub defaults: EdgeDefaults,
  pub options: BTreeMap<String, Vec<OptionEntry>>,
}

impl Default for EdgeAdmin {
  fn default() -> Self {
    let options = [
      "material",
      "edge_type",
      "engineering_status",
      "line_diameter",
      "fall_position",
    ]
    .into_iter()
    .map(|k| (k.to_string(), default_options(Scope::Edges, k)))
    .collect();
    Self {
      include: EdgeInclude::default(),
      defaults: EdgeDefaults::default(),
      options,
    }
  }
}

/// Singleton admin configuration. Loaded once at startup, saved only on explicit admin save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
  pub nodes: NodeAdmin,
  pub edges: EdgeAdmin,
}

impl AdminConfig {
  /// Load from FastCache, merged over the defaults. Unreadable blobs fall back to defaults.
  pub fn load(cache: &dyn FastCache) -> Self {
    let raw = match cache.get(keys::ADMIN_CONFIG) {
      Ok(Some(raw)) if !raw.is_empty() => raw,
      Ok(_) => return Self::default(),
      Err(e) => {
        warn!("Failed to read admin config; using defaults: {}", e);
        return Self::default();
      }
    };
    match serde_json::from_str(&raw) {
      Ok(config) => config,
      Err(e) => {
        warn!("Failed to parse admin config; using defaults: {}", e);
        Self::default()
      }
    }
  }

  pub fn save(&self, cache: &dyn FastCache) -> StoreResult<()> {
    let raw = serde_json::to_string(self)?;
    cache.set(keys::ADMIN_CONFIG, &raw)
  }

  /// Catalog for a field: the admin's list when non-empty, otherwise the built-in one.
  pub fn options_for(&self, scope: Scope, key: &str) -> Vec<OptionEntry> {
    let scoped = match scope {
      Scope::Nodes => &self.nodes.options,
      Scope::Edges => &self.edges.options,
    };
    match scoped.get(key) {
      Some(list) if !list.is_empty() => list.clone(),
      _ => default_options(scope, key),
    }
  }

  /// Export code for a stored value. Labels map to codes, preferring numeric ones.
  pub fn code_for(&self, scope: Scope, key: &str, value: &FieldValue) -> String {
    if value.is_blank() {
      return String::new();
    }
    match value {
      FieldValue::Int(_) | FieldValue::Float(_) => return value.to_string(),
      FieldValue::Text(_) => {}
    }
    let text = value.to_string();
    let options = self.options_for(scope, key);
    if text.trim().parse::<f64>().is_ok() && options.iter().any(|o| o.code.to_string() == text) {
      return text;
    }
    let Some(found) = options.iter().find(|o| o.label == text) else {
      return text;
    };
    if found.code.as_code().is_some() {
      return found.code.to_string();
    }
    // Admin catalogs that use labels as codes still export the built-in numeric code.
    default_options(scope, key)
      .into_iter()
      .find(|o| o.label == text && o.code.as_code().is_some())
      .map(|o| o.code.to_string())
      .unwrap_or_else(|| found.code.to_string())
  }

  /// Display label for a stored value (code or label).
  pub fn label_for(&self, scope: Scope, key: &str, value: &FieldValue) -> String {
    if value.is_blank() {
      return String::new();
    }
    let text = value.to_string();
    let options = self.options_for(scope, key);
    options
      .iter()
      .find(|o| o.code.to_string() == text)
      .or_else(|| options.iter().find(|o| o.label == text))
      .map(|o| o.label.clone())
      .unwrap_or(text)
  }

  /// Enabled entries only, for pickers.
  pub fn enabled_options(&self, scope: Scope, key: &str) -> Vec<OptionEntry> {
    self
      .options_for(scope, key)
      .into_iter()
      .filter(|o| o.enabled)
      .collect()
  }
}

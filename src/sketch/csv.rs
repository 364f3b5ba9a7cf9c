//! Spreadsheet export. Columns follow the admin include flags; coded fields are
//! written as catalog codes.

use super::admin::{AdminConfig, Scope};
use super::{Edge, FieldValue, Node, Sketch};

/// Quote one field: newlines flattened to spaces, embedded quotes doubled.
pub fn csv_quote(value: &str) -> String {
  let flat = value.replace("\r\n", " ").replace('\n', " ");
  format!("\"{}\"", flat.replace('"', "\"\""))
}

fn join(cells: &[String]) -> String {
  cells.join(",")
}

fn header(names: &[&str]) -> String {
  join(&names.iter().map(|n| csv_quote(n)).collect::<Vec<_>>())
}

fn text(value: &FieldValue) -> String {
  value.to_string()
}

fn node_row(node: &Node, admin: &AdminConfig) -> String {
  let inc = &admin.nodes.include;
  let code = |key: &str, value: &FieldValue| csv_quote(&admin.code_for(Scope::Nodes, key, value));
  let mut row = Vec::new();
  if inc.id {
    row.push(csv_quote(&node.id));
  }
  if inc.node_type {
    row.push(csv_quote(node.kind.as_str()));
  }
  if inc.note {
    row.push(csv_quote(&node.note));
  }
  if inc.material {
    row.push(code("material", &node.material));
  }
  if inc.cover_diameter {
    row.push(csv_quote(&text(&node.cover_diameter)));
  }
  if inc.access {
    row.push(code("access", &node.access));
  }
  if inc.accuracy_level {
    row.push(code("accuracy_level", &node.accuracy_level));
  }
  if inc.maintenance_status {
    row.push(code("maintenance_status", &node.maintenance_status));
  }
  join(&row)
}

/// Node table, one row per node, `\n` separated.
pub fn export_nodes_csv(nodes: &[Node], admin: &AdminConfig) -> String {
  let inc = &admin.nodes.include;
  let columns: Vec<&str> = [
    (inc.id, "ID"),
    (inc.node_type, "Type"),
    (inc.note, "Note"),
    (inc.material, "Cover material"),
    (inc.cover_diameter, "Cover diameter"),
    (inc.access, "Access"),
    (inc.accuracy_level, "Accuracy Level"),
    (inc.maintenance_status, "Maintenance status"),
  ]
  .into_iter()
  .filter_map(|(on, name)| on.then_some(name))
  .collect();

  let mut lines = vec![header(&columns)];
  lines.extend(nodes.iter().map(|n| node_row(n, admin)));
  lines.join("\n")
}

fn edge_note(edge: &Edge) -> String {
  match edge.extra.get("note") {
    Some(serde_json::Value::String(s)) => s.clone(),
    Some(serde_json::Value::Null) | None => String::new(),
    Some(other) => other.to_string(),
  }
}

fn edge_row(edge: &Edge, admin: &AdminConfig) -> String {
  let inc = &admin.edges.include;
  let code = |key: &str, value: &FieldValue| csv_quote(&admin.code_for(Scope::Edges, key, value));
  let mut row = Vec::new();
  if inc.from_node {
    row.push(csv_quote(&edge.tail));
  }
  if inc.to_node {
    row.push(csv_quote(&edge.head));
  }
  if inc.tail_measurement {
    row.push(csv_quote(&text(&edge.tail_measurement)));
  }
  if inc.head_measurement {
    row.push(csv_quote(&text(&edge.head_measurement)));
  }
  if inc.fall_depth {
    row.push(csv_quote(&text(&edge.fall_depth)));
  }
  if inc.fall_position {
    row.push(code("fall_position", &edge.fall_position));
  }
  if inc.line_diameter {
    row.push(code("line_diameter", &edge.line_diameter));
  }
  if inc.note {
    row.push(csv_quote(&edge_note(edge)));
  }
  if inc.edge_material {
    row.push(code("material", &edge.material));
  }
  if inc.edge_type {
    row.push(code("edge_type", &edge.edge_type));
  }
  if inc.engineering_status {
    row.push(code("engineering_status", &edge.engineering_status));
  }
  join(&row)
}

/// Edge table. Edges whose endpoints are missing from the sketch are skipped.
pub fn export_edges_csv(sketch: &Sketch, admin: &AdminConfig) -> String {
  let inc = &admin.edges.include;
  let columns: Vec<&str> = [
    (inc.from_node, "From"),
    (inc.to_node, "To"),
    (inc.tail_measurement, "Tail"),
    (inc.head_measurement, "Head"),
    (inc.fall_depth, "Fall depth"),
    (inc.fall_position, "Fall position"),
    (inc.line_diameter, "Diameter"),
    (inc.note, "Note"),
    (inc.edge_material, "Material"),
    (inc.edge_type, "Type"),
    (inc.engineering_status, "Engineering status"),
  ]
  .into_iter()
  .filter_map(|(on, name)| on.then_some(name))
  .collect();

  let mut lines = vec![header(&columns)];
  lines.extend(
    sketch
      .edges
      .iter()
      .filter(|e| sketch.node(&e.tail).is_some() && sketch.node(&e.head).is_some())
      .map(|e| edge_row(e, admin)),
  );
  lines.join("\n")
}

/// File bytes for a CSV table: `sep=,` line, CRLF line endings, UTF-16LE with a BOM.
pub fn encode_for_spreadsheet(table: &str) -> Vec<u8> {
  let content = format!("sep=,\r\n{}", table.replace('\n', "\r\n"));
  let mut bytes = Vec::with_capacity(2 + content.len() * 2);
  bytes.extend_from_slice(&[0xFF, 0xFE]);
  for unit in content.encode_utf16() {
    bytes.extend_from_slice(&unit.to_le_bytes());
  }
  bytes
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sketch::admin::EdgeDefaults;
  use crate::sketch::admin::NodeDefaults;

  #[test]
  fn test_csv_quote() {
    assert_eq!(csv_quote("plain"), "\"plain\"");
    assert_eq!(csv_quote("a \"b\""), "\"a \"\"b\"\"\"");
    assert_eq!(csv_quote("line1\nline2\r\nline3"), "\"line1 line2 line3\"");
  }

  #[test]
  fn test_nodes_csv_uses_codes_and_include_flags() {
    let mut sketch = Sketch::new("2024-01-01");
    sketch.create_node(0.0, 0.0, &NodeDefaults::default());
    if let Some(node) = sketch.node_mut("1") {
      node.material = FieldValue::from("בטון");
      node.note = "north, corner".into();
    }
    let mut admin = AdminConfig::default();
    admin.nodes.include.cover_diameter = false;

    let csv = export_nodes_csv(&sketch.nodes, &admin);
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
      lines[0],
      "\"ID\",\"Type\",\"Note\",\"Cover material\",\"Access\",\"Accuracy Level\",\"Maintenance status\""
    );
    assert_eq!(lines[1], "\"1\",\"Manhole\",\"north, corner\",\"7\",\"0\",\"0\",\"0\"");
  }

  #[test]
  fn test_edges_csv_skips_dangling_edges() {
    let mut sketch = Sketch::new("2024-01-01");
    let defaults = NodeDefaults::default();
    sketch.create_node(0.0, 0.0, &defaults);
    sketch.create_node(1.0, 1.0, &defaults);
    sketch.create_edge("1", "2", &EdgeDefaults::default());
    let mut dangling = sketch.edges[0].clone();
    dangling.head = "99".into();
    sketch.edges.push(dangling);

    let csv = export_edges_csv(&sketch, &AdminConfig::default());
    assert_eq!(csv.lines().count(), 2);
    assert!(csv.lines().nth(1).unwrap().starts_with("\"1\",\"2\""));
    assert!(csv.contains("\"4801\""));
  }

  #[test]
  fn test_spreadsheet_encoding() {
    let bytes = encode_for_spreadsheet("\"a\"\n\"b\"");
    assert_eq!(&bytes[..2], &[0xFF, 0xFE]);
    let units: Vec<u16> = bytes[2..]
      .chunks(2)
      .map(|c| u16::from_le_bytes([c[0], c[1]]))
      .collect();
    let decoded = String::from_utf16(&units).unwrap();
    assert_eq!(decoded, "sep=,\r\n\"a\"\r\n\"b\"");
  }
}

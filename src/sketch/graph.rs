//! Node and edge editing on the current sketch.

use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

use super::admin::{EdgeDefaults, NodeDefaults};
use super::{generate_edge_id, generate_home_internal_id, Edge, FieldValue, Node, NodeKind, NodeType, Sketch};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
  #[error("node {0} not found")]
  NodeNotFound(String),
  #[error("node id must be a positive integer: {0}")]
  IdNotNumeric(String),
  #[error("node id {0} is already in use")]
  IdTaken(String),
  #[error("node {0} is not a Home node")]
  NotHome(String),
}

/// Result of a node deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
  /// The node (and `removed_edges` attached edges) was removed.
  Deleted { removed_edges: usize },
  /// Edges are attached; repeat the call with confirmation to cascade.
  NeedsConfirmation { edge_count: usize },
  NotFound,
}

/// A strictly positive integer, spelled with digits only.
pub fn is_numeric_id(id: &str) -> bool {
  !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) && id.parse::<u64>().is_ok_and(|n| n > 0)
}

fn smallest_missing(used: &BTreeSet<u64>) -> u64 {
  let mut candidate = 1;
  while used.contains(&candidate) {
    candidate += 1;
  }
  candidate
}

impl Sketch {
  /// Numeric ids held by nodes that take part in the numeric id space.
  pub fn used_numeric_ids(&self) -> BTreeSet<u64> {
    self
      .nodes
      .iter()
      .filter(|n| n.in_numeric_id_space() && is_numeric_id(&n.id))
      .filter_map(|n| n.id.parse().ok())
      .collect()
  }

  /// First-fit allocation: the smallest positive integer not held by an eligible node.
  pub fn find_smallest_available_numeric_id(&self) -> String {
    smallest_missing(&self.used_numeric_ids()).to_string()
  }

  fn refresh_next_node_id(&mut self) {
    self.next_node_id = smallest_missing(&self.used_numeric_ids());
  }

  /// Recompute `next_node_id` as the largest numeric id plus one (used when loading).
  pub fn recompute_next_node_id_from_max(&mut self) {
    let max = self
      .nodes
      .iter()
      .filter_map(|n| n.id.parse::<u64>().ok())
      .max()
      .unwrap_or(0);
    self.next_node_id = max + 1;
  }

  /// Place a manhole at (x, y) with the smallest free numeric id.
  pub fn create_node(&mut self, x: f64, y: f64, defaults: &NodeDefaults) -> &Node {
    let id = self.find_smallest_available_numeric_id();
    self.nodes.push(Node {
      id,
      x,
      y,
      note: String::new(),
      kind: NodeKind::Manhole,
      node_type: NodeType::Type1,
      material: defaults.material.clone(),
      cover_diameter: defaults.cover_diameter.clone(),
      access: defaults.access.clone(),
      accuracy_level: defaults.accuracy_level.clone(),
      maintenance_status: defaults.maintenance_status.clone(),
      direct_connection: None,
      extra: Default::default(),
    });
    self.refresh_next_node_id();
    self.compute_node_types();
    let idx = self.nodes.len() - 1;
    &self.nodes[idx]
  }

  /// Place a Home node. It gets an opaque internal id until it is directly connected.
  pub fn create_home_node(&mut self, x: f64, y: f64, defaults: &NodeDefaults) -> &Node {
    self.create_node(x, y, defaults);
    let idx = self.nodes.len() - 1;
    let old_id = self.nodes[idx].id.clone();
    let new_id = self.fresh_home_id();
    {
      let node = &mut self.nodes[idx];
      node.kind = NodeKind::Home;
      node.direct_connection = Some(false);
      clear_manhole_fields(node);
    }
    self.rewrite_node_id(&old_id, &new_id);
    self.refresh_next_node_id();
    &self.nodes[idx]
  }

  fn fresh_home_id(&self) -> String {
    loop {
      let id = generate_home_internal_id();
      if self.node(&id).is_none() {
        return id;
      }
    }
  }

  /// Connect `tail` to `head`. Returns `None` if the pair is already joined in either direction.
  pub fn create_edge(&mut self, tail: &str, head: &str, defaults: &EdgeDefaults) -> Option<&Edge> {
    if self.edges.iter().any(|e| e.connects(tail, head)) {
      return None;
    }
    self.edges.push(Edge {
      id: generate_edge_id(),
      tail: tail.to_string(),
      head: head.to_string(),
      tail_measurement: defaults.tail_measurement.clone(),
      head_measurement: defaults.head_measurement.clone(),
      fall_depth: defaults.fall_depth.clone(),
      fall_position: defaults.fall_position.clone(),
      line_diameter: defaults.line_diameter.clone(),
      edge_type: defaults.edge_type.clone(),
      material: defaults.material.clone(),
      maintenance_status: FieldValue::Int(0),
      engineering_status: defaults.engineering_status.clone(),
      extra: Default::default(),
    });
    self.compute_node_types();
    self.edges.last()
  }

  /// Remove a node. When edges are attached nothing happens unless `confirmed`,
  /// in which case the attached edges go too.
  pub fn delete_node(&mut self, id: &str, confirmed: bool) -> DeleteOutcome {
    if self.node(id).is_none() {
      return DeleteOutcome::NotFound;
    }
    let edge_count = self.edges.iter().filter(|e| e.touches(id)).count();
    if edge_count > 0 && !confirmed {
      return DeleteOutcome::NeedsConfirmation { edge_count };
    }
    self.nodes.retain(|n| n.id != id);
    self.edges.retain(|e| !e.touches(id));
    self.compute_node_types();
    DeleteOutcome::Deleted {
      removed_edges: edge_count,
    }
  }

  pub fn delete_edge(&mut self, edge_id: f64) -> bool {
    let before = self.edges.len();
    self.edges.retain(|e| e.id != edge_id);
    let removed = self.edges.len() != before;
    if removed {
      self.compute_node_types();
    }
    removed
  }

  fn rewrite_node_id(&mut self, old_id: &str, new_id: &str) {
    if let Some(node) = self.node_mut(old_id) {
      node.id = new_id.to_string();
    } else {
      return;
    }
    for edge in &mut self.edges {
      if edge.tail == old_id {
        edge.tail = new_id.to_string();
      }
      if edge.head == old_id {
        edge.head = new_id.to_string();
      }
    }
  }

  /// User-driven id change. Non-Home nodes must keep numeric ids; ids stay unique.
  pub fn rename_node_id(&mut self, old_id: &str, new_id: &str) -> Result<(), GraphError> {
    let new_id = new_id.trim();
    let node = self
      .node(old_id)
      .ok_or_else(|| GraphError::NodeNotFound(old_id.to_string()))?;
    if new_id.is_empty() || new_id == old_id {
      return Ok(());
    }
    let is_home = node.kind == NodeKind::Home;
    if !is_home && !new_id.bytes().all(|b| b.is_ascii_digit()) {
      return Err(GraphError::IdNotNumeric(new_id.to_string()));
    }
    if self.node(new_id).is_some() {
      return Err(GraphError::IdTaken(new_id.to_string()));
    }
    self.rewrite_node_id(old_id, new_id);
    if !is_home {
      self.refresh_next_node_id();
      self.compute_node_types();
    }
    Ok(())
  }

  /// Toggle a Home node's direct connection. Connecting moves it into the numeric
  /// id space (smallest free id); disconnecting gives it a fresh internal id.
  /// Returns the node's new id.
  pub fn set_direct_connection(&mut self, id: &str, connected: bool) -> Result<String, GraphError> {
    let node = self
      .node(id)
      .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
    if node.kind != NodeKind::Home {
      return Err(GraphError::NotHome(id.to_string()));
    }

    let new_id = if connected {
      // Allocate before flagging so the node's own id is not counted as used
      self.find_smallest_available_numeric_id()
    } else {
      self.fresh_home_id()
    };
    if let Some(node) = self.node_mut(id) {
      node.direct_connection = Some(connected);
    }
    if new_id != id {
      self.rewrite_node_id(id, &new_id);
    }
    self.refresh_next_node_id();
    Ok(new_id)
  }

  /// Mark every node touching an edge with a blank measurement at its end as `Type2`.
  /// Self-loops are ignored.
  pub fn compute_node_types(&mut self) {
    let index: HashMap<String, usize> = self
      .nodes
      .iter()
      .enumerate()
      .map(|(i, n)| (n.id.clone(), i))
      .collect();
    for node in &mut self.nodes {
      node.node_type = NodeType::Type1;
    }
    for edge in &self.edges {
      if edge.tail == edge.head {
        continue;
      }
      if edge.tail_measurement.is_blank() {
        if let Some(&i) = index.get(&edge.tail) {
          self.nodes[i].node_type = NodeType::Type2;
        }
      }
      if edge.head_measurement.is_blank() {
        if let Some(&i) = index.get(&edge.head) {
          self.nodes[i].node_type = NodeType::Type2;
        }
      }
    }
  }

  /// Bring a loaded sketch up to the current shape: manhole-only fields cleared on
  /// Home/Drainage nodes, coded fields coerced to numbers, node types rebuilt.
  pub fn normalize(&mut self) {
    for node in &mut self.nodes {
      match node.kind {
        NodeKind::Home | NodeKind::Drainage => {
          clear_manhole_fields(node);
          if node.kind == NodeKind::Home && node.direct_connection.is_none() {
            node.direct_connection = Some(false);
          }
        }
        NodeKind::Manhole | NodeKind::Covered => {
          node.cover_diameter = node.cover_diameter.rounded_or_blank();
          node.access = node.access.coerce_numeric();
          node.accuracy_level = node.accuracy_level.coerce_numeric();
          node.maintenance_status = node.maintenance_status.coerce_numeric();
        }
      }
    }
    for edge in &mut self.edges {
      edge.maintenance_status = edge.maintenance_status.coerce_numeric();
      edge.engineering_status = edge.engineering_status.coerce_numeric();
    }
    self.compute_node_types();
  }
}

fn clear_manhole_fields(node: &mut Node) {
  node.cover_diameter = FieldValue::default();
  node.access = FieldValue::default();
  node.maintenance_status = FieldValue::default();
}

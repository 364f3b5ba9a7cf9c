//! Light and dark drawing palettes.

use crate::sketch::{Node, NodeType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeColors {
  pub fill_default: &'static str,
  pub fill_missing: &'static str,
  pub fill_selected_missing: &'static str,
  pub fill_blocked: &'static str,
  pub fill_selected: &'static str,
  pub stroke: &'static str,
  pub label: &'static str,
  pub house_roof: &'static str,
  pub house_body: &'static str,
  pub house_door: &'static str,
  pub badge_bg: &'static str,
  pub badge_icon: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeColors {
  pub type_primary: &'static str,
  pub type_secondary: &'static str,
  pub type_drainage: &'static str,
  pub selected: &'static str,
  pub selected_primary: &'static str,
  pub selected_drainage: &'static str,
  pub selected_secondary: &'static str,
  pub preview: &'static str,
  pub label: &'static str,
  pub label_stroke: &'static str,
  pub fall_icon_bg: &'static str,
  pub fall_icon_stroke: &'static str,
  pub fall_icon_fallback: &'static str,
  pub fall_icon_text: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorPalette {
  pub node: NodeColors,
  pub edge: EdgeColors,
}

const LIGHT: ColorPalette = ColorPalette {
  node: NodeColors {
    fill_default: "#60a5fa",
    fill_missing: "#fb923c",
    fill_selected_missing: "#fed7aa",
    fill_blocked: "#cbd5e1",
    fill_selected: "#bfdbfe",
    stroke: "#2563eb",
    label: "#1f2937",
    house_roof: "#795548",
    house_body: "#d7ccc8",
    house_door: "#6d4c41",
    badge_bg: "#16a34a",
    badge_icon: "#ffffff",
  },
  edge: EdgeColors {
    type_primary: "#2563eb",
    type_secondary: "#0d9488",
    type_drainage: "#fb923c",
    selected: "#7c3aed",
    selected_primary: "#60a5fa",
    selected_drainage: "#fdba74",
    selected_secondary: "#86efac",
    preview: "#94a3b8",
    label: "#334155",
    label_stroke: "#ffffff",
    fall_icon_bg: "#bfdbfe",
    fall_icon_stroke: "#ffffff",
    fall_icon_fallback: "#0ea5e9",
    fall_icon_text: "#ffffff",
  },
};

const DARK: ColorPalette = ColorPalette {
  node: NodeColors {
    fill_default: "#60a5fa",
    fill_missing: "#fb923c",
    fill_selected_missing: "#fed7aa",
    fill_blocked: "#475569",
    fill_selected: "#3b82f6",
    stroke: "#60a5fa",
    label: "#f1f5f9",
    house_roof: "#a1887f",
    house_body: "#6d4c41",
    house_door: "#3e2723",
    badge_bg: "#22c55e",
    badge_icon: "#f0fdf4",
  },
  edge: EdgeColors {
    type_primary: "#60a5fa",
    type_secondary: "#14b8a6",
    type_drainage: "#fb923c",
    selected: "#a78bfa",
    selected_primary: "#93c5fd",
    selected_drainage: "#fdba74",
    selected_secondary: "#6ee7b7",
    preview: "#94a3b8",
    label: "#f1f5f9",
    label_stroke: "#1e293b",
    fall_icon_bg: "#1e40af",
    fall_icon_stroke: "#60a5fa",
    fall_icon_fallback: "#3b82f6",
    fall_icon_text: "#e0f2fe",
  },
};

/// Palette for the active theme. Call at draw time; nothing is cached.
pub fn resolve_colors(is_dark: bool) -> &'static ColorPalette {
  if is_dark {
    &DARK
  } else {
    &LIGHT
  }
}

/// Fill for a node given its measurement state and selection.
pub fn node_fill(palette: &ColorPalette, node: &Node, selected: bool) -> &'static str {
  let missing = node.node_type == NodeType::Type2;
  match (missing, selected) {
    (true, true) => palette.node.fill_selected_missing,
    (true, false) => palette.node.fill_missing,
    (false, true) => palette.node.fill_selected,
    (false, false) => palette.node.fill_default,
  }
}

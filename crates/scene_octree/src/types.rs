//! Core data types shared by ingestion, batching and streaming.

use std::fmt;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::octree::Aabb3;

/// Identifier of an independently authored content item.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "item#{}", self.0)
  }
}

/// Identifier of a spatial node.
///
/// Assigned in pre-order during construction, starting at 1 for the root.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
  /// The root node id.
  pub const ROOT: NodeId = NodeId(1);

  /// Arena index of this node (ids are dense and 1-based).
  #[inline]
  pub fn index(self) -> usize {
    (self.0 as usize).wrapping_sub(1)
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "node#{}", self.0)
  }
}

/// Size category derived from an item's screen coverage.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum SizeCategory {
  Small,
  Medium,
  Large,
}

/// A content item as seen by the spatial pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
  pub id: ItemId,
  /// World-space bounding box (transform already applied).
  pub world_bounds: Aabb3,
  /// Local-to-world transform of the item's geometry.
  pub world_transform: Mat4,
  /// Visual importance, roughly the fraction of the viewport covered.
  pub screen_coverage: f32,
}

impl ContentItem {
  /// Center of the world bounding box; drives spatial assignment.
  #[inline]
  pub fn center(&self) -> Vec3 {
    self.world_bounds.center()
  }

  /// True if the bounding box is usable for placement.
  pub fn has_valid_bounds(&self) -> bool {
    self.world_bounds.is_valid()
  }
}

/// Raw local-space geometry of one item.
///
/// Buffers are flat: 3 floats per position/normal, 4 floats (RGBA) per color.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemGeometry {
  pub positions: Vec<f32>,
  #[serde(default)]
  pub normals: Vec<f32>,
  pub indices: Vec<u32>,
  /// Optional per-vertex RGBA colors.
  #[serde(default)]
  pub colors: Option<Vec<f32>>,
  /// Optional color applied to every vertex when `colors` is absent.
  #[serde(default)]
  pub uniform_color: Option<[f32; 4]>,
}

impl ItemGeometry {
  /// Number of vertices described by `positions`.
  #[inline]
  pub fn vertex_count(&self) -> usize {
    self.positions.len() / 3
  }

  /// True if the item carries any color information.
  pub fn has_color(&self) -> bool {
    self.colors.is_some() || self.uniform_color.is_some()
  }

  /// Local-space bounding box of the positions.
  pub fn local_bounds(&self) -> Option<Aabb3> {
    Aabb3::from_flat_points(&self.positions)
  }
}

/// A content item together with its geometry, as kept in the item partition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
  pub item: ContentItem,
  pub geometry: ItemGeometry,
}

/// Final (node, depth) assignment of an item after overlap resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
  pub item_id: ItemId,
  pub category: SizeCategory,
  /// Node at the depth chosen by classification.
  pub original_node: NodeId,
  pub original_depth: u8,
  /// Node the item ended up in.
  pub placed_node: NodeId,
  pub placed_depth: u8,
  /// Placed at the root because no ancestor was conflict free.
  pub root_fallback: bool,
}

impl Placement {
  /// True if overlap resolution moved the item to an ancestor.
  #[inline]
  pub fn relocated(&self) -> bool {
    self.placed_node != self.original_node
  }
}

/// Per-category item counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
  pub small: u32,
  pub medium: u32,
  pub large: u32,
}

impl CategoryCounts {
  pub fn add(&mut self, category: SizeCategory) {
    match category {
      SizeCategory::Small => self.small += 1,
      SizeCategory::Medium => self.medium += 1,
      SizeCategory::Large => self.large += 1,
    }
  }

  #[inline]
  pub fn total(&self) -> u32 {
    self.small + self.medium + self.large
  }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;

//! Geometry batching: merges the items placed in one node into a single
//! world-space mesh.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ merge(node, items)                                              │
//! │                                                                 │
//! │  for each item, in input order:                                 │
//! │    validate buffers ──bad──► skipped (warn)                     │
//! │    positions * world_transform                                  │
//! │    normals   * inverse-transpose(world_transform)               │
//! │    indices   + running vertex count                             │
//! │    colors    explicit | uniform replicated | white              │
//! │    push SourceRange { item, start/count vertex, start/count idx}│
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use glam::{Mat3, Mat4, Vec3};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::octree::Aabb3;
use crate::types::{CategoryCounts, ItemGeometry, ItemId, NodeId, SizeCategory};

/// Color used for vertices of items without color information when the
/// batch carries a color buffer.
pub const DEFAULT_VERTEX_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// One item's geometry with the transform to bake into it.
#[derive(Clone, Copy, Debug)]
pub struct GeometryWithTransform<'a> {
  pub item_id: ItemId,
  pub category: SizeCategory,
  pub geometry: &'a ItemGeometry,
  pub transform: Mat4,
}

/// Location of one source item inside a [`BatchedMesh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRange {
  pub item_id: ItemId,
  pub start_vertex: u32,
  pub vertex_count: u32,
  pub start_index: u32,
  pub index_count: u32,
}

impl SourceRange {
  #[inline]
  pub fn vertices(&self) -> std::ops::Range<usize> {
    self.start_vertex as usize..(self.start_vertex + self.vertex_count) as usize
  }

  #[inline]
  pub fn indices(&self) -> std::ops::Range<usize> {
    self.start_index as usize..(self.start_index + self.index_count) as usize
  }
}

/// Merged world-space geometry of all items placed in one node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchedMesh {
  pub node_id: NodeId,
  pub positions: Vec<f32>,
  pub normals: Vec<f32>,
  pub indices: Vec<u32>,
  /// RGBA per vertex, present when any item had color.
  pub colors: Option<Vec<f32>>,
  /// Ordered, gapless cover of the vertex and index buffers.
  pub source_ranges: Vec<SourceRange>,
  pub category_counts: CategoryCounts,
  /// World bounds of `positions`.
  pub bounds: Aabb3,
}

impl BatchedMesh {
  #[inline]
  pub fn vertex_count(&self) -> usize {
    self.positions.len() / 3
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.source_ranges.is_empty()
  }

  /// Source range of `item`, if it is part of this mesh.
  pub fn range_for(&self, item: ItemId) -> Option<&SourceRange> {
    self.source_ranges.iter().find(|r| r.item_id == item)
  }

  /// World-space positions belonging to `item`.
  pub fn item_positions(&self, item: ItemId) -> Option<&[f32]> {
    let range = self.range_for(item)?.vertices();
    self.positions.get(range.start * 3..range.end * 3)
  }

  /// Bounding sphere of the mesh (center, radius).
  pub fn bounding_sphere(&self) -> (Vec3, f32) {
    (self.bounds.center(), self.bounds.bounding_radius())
  }
}

/// Result of merging one node.
#[derive(Debug)]
pub struct MergeOutput {
  pub mesh: BatchedMesh,
  /// Items dropped because their buffers were malformed.
  pub skipped: Vec<ItemId>,
}

/// Reason an item cannot be merged.
fn malformed_reason(geometry: &ItemGeometry) -> Option<String> {
  if geometry.positions.is_empty() {
    return Some("missing positions".into());
  }
  if geometry.positions.len() % 3 != 0 {
    return Some(format!("position buffer length {} is not a multiple of 3", geometry.positions.len()));
  }
  if geometry.indices.is_empty() {
    return Some("missing indices".into());
  }
  let vertex_count = geometry.vertex_count();
  if let Some(&bad) = geometry.indices.iter().find(|&&i| i as usize >= vertex_count) {
    return Some(format!("index {} out of range for {} vertices", bad, vertex_count));
  }
  None
}

/// Merge `items` into one mesh for `node_id`.
///
/// Items are appended in input order. Malformed items are skipped with a
/// warning and reported in [`MergeOutput::skipped`].
pub fn merge(node_id: NodeId, items: &[GeometryWithTransform<'_>]) -> MergeOutput {
  let mut skipped = Vec::new();
  let valid: Vec<&GeometryWithTransform<'_>> = items
    .iter()
    .filter(|item| match malformed_reason(item.geometry) {
      Some(reason) => {
        warn!(item = %item.item_id, node = %node_id, %reason, "skipping malformed geometry");
        skipped.push(item.item_id);
        false
      }
      None => true,
    })
    .collect();

  let vertex_total: usize = valid.iter().map(|i| i.geometry.vertex_count()).sum();
  let index_total: usize = valid.iter().map(|i| i.geometry.indices.len()).sum();
  let with_colors = valid.iter().any(|i| i.geometry.has_color());

  let mut positions = Vec::with_capacity(vertex_total * 3);
  let mut normals = Vec::with_capacity(vertex_total * 3);
  let mut indices = Vec::with_capacity(index_total);
  let mut colors = with_colors.then(|| Vec::with_capacity(vertex_total * 4));
  let mut source_ranges = Vec::with_capacity(valid.len());
  let mut category_counts = CategoryCounts::default();

  for item in valid {
    let geometry = item.geometry;
    let vertex_count = geometry.vertex_count();
    let start_vertex = (positions.len() / 3) as u32;
    let start_index = indices.len() as u32;

    for p in geometry.positions.chunks_exact(3) {
      let world = item.transform.transform_point3(Vec3::from_slice(p));
      positions.extend_from_slice(&world.to_array());
    }

    if geometry.normals.len() == vertex_count * 3 {
      let normal_matrix = Mat3::from_mat4(item.transform).inverse().transpose();
      for n in geometry.normals.chunks_exact(3) {
        let world = (normal_matrix * Vec3::from_slice(n)).normalize_or_zero();
        normals.extend_from_slice(&world.to_array());
      }
    } else {
      normals.resize(normals.len() + vertex_count * 3, 0.0);
    }

    indices.extend(geometry.indices.iter().map(|i| i + start_vertex));

    if let Some(colors) = colors.as_mut() {
      append_colors(colors, geometry, vertex_count);
    }

    source_ranges.push(SourceRange {
      item_id: item.item_id,
      start_vertex,
      vertex_count: vertex_count as u32,
      start_index,
      index_count: geometry.indices.len() as u32,
    });
    category_counts.add(item.category);
  }

  let bounds = Aabb3::from_flat_points(&positions).unwrap_or(Aabb3::new(Vec3::ZERO, Vec3::ZERO));
  let mesh = BatchedMesh {
    node_id,
    positions,
    normals,
    indices,
    colors,
    source_ranges,
    category_counts,
    bounds,
  };
  MergeOutput { mesh, skipped }
}

fn append_colors(colors: &mut Vec<f32>, geometry: &ItemGeometry, vertex_count: usize) {
  match &geometry.colors {
    Some(explicit) if explicit.len() == vertex_count * 4 => colors.extend_from_slice(explicit),
    _ => {
      let fill = geometry.uniform_color.unwrap_or(DEFAULT_VERTEX_COLOR);
      for _ in 0..vertex_count {
        colors.extend_from_slice(&fill);
      }
    }
  }
}

/// Optional geometry simplification applied before batching.
pub trait GeometryReducer: Send + Sync {
  /// Return geometry with the same buffer layout, possibly fewer triangles.
  fn reduce(&self, geometry: &ItemGeometry, angle_tolerance: f32) -> ItemGeometry;
}

/// Reducer that returns the geometry unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoReduction;

impl GeometryReducer for NoReduction {
  fn reduce(&self, geometry: &ItemGeometry, _angle_tolerance: f32) -> ItemGeometry {
    geometry.clone()
  }
}

#[cfg(test)]
#[path = "batch_test.rs"]
mod batch_test;

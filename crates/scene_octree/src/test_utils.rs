//! Shared fixtures for unit tests.

use glam::{Mat4, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::octree::Aabb3;
use crate::types::{ContentItem, ItemGeometry, ItemId, StoredItem};

/// World bounds used by most tests: a 1024-unit cube at the origin.
pub fn world_bounds() -> Aabb3 {
  Aabb3::new(Vec3::ZERO, Vec3::splat(1024.0))
}

/// Item with an axis-aligned box of `half` extents around `center`.
pub fn item_at(id: u64, center: Vec3, half: f32, coverage: f32) -> ContentItem {
  ContentItem {
    id: ItemId(id),
    world_bounds: Aabb3::from_center_half_extents(center, Vec3::splat(half)),
    world_transform: Mat4::from_translation(center),
    screen_coverage: coverage,
  }
}

/// Deterministic pseudo-random items inside `bounds`.
pub fn random_items(seed: u64, count: usize, bounds: Aabb3) -> Vec<ContentItem> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..count)
    .map(|i| {
      let center = Vec3::new(
        rng.random_range(bounds.min.x..bounds.max.x),
        rng.random_range(bounds.min.y..bounds.max.y),
        rng.random_range(bounds.min.z..bounds.max.z),
      );
      let half = rng.random_range(0.5..8.0);
      let coverage = rng.random_range(0.0..1.5);
      item_at(i as u64 + 1, center, half, coverage)
    })
    .collect()
}

/// Unit cube spanning [-1, 1] on each axis: 8 vertices, 12 triangles.
pub fn cube_geometry() -> ItemGeometry {
  let mut positions = Vec::with_capacity(24);
  let mut normals = Vec::with_capacity(24);
  for i in 0..8u32 {
    let p = Vec3::new(
      if i & 1 == 0 { -1.0 } else { 1.0 },
      if i & 2 == 0 { -1.0 } else { 1.0 },
      if i & 4 == 0 { -1.0 } else { 1.0 },
    );
    positions.extend_from_slice(&p.to_array());
    normals.extend_from_slice(&p.normalize().to_array());
  }
  let indices = vec![
    0, 2, 1, 1, 2, 3, // -Z
    4, 5, 6, 5, 7, 6, // +Z
    0, 1, 4, 1, 5, 4, // -Y
    2, 6, 3, 3, 6, 7, // +Y
    0, 4, 2, 2, 4, 6, // -X
    1, 3, 5, 3, 7, 5, // +X
  ];
  ItemGeometry {
    positions,
    normals,
    indices,
    colors: None,
    uniform_color: None,
  }
}

/// Stored item whose world box is the transformed unit cube.
pub fn stored_cube(id: u64, transform: Mat4, coverage: f32) -> StoredItem {
  let geometry = cube_geometry();
  let local = geometry.local_bounds().expect("cube has positions");
  StoredItem {
    item: ContentItem {
      id: ItemId(id),
      world_bounds: local.transformed(&transform),
      world_transform: transform,
      screen_coverage: coverage,
    },
    geometry,
  }
}

use glam::Quat;

use super::*;
use crate::test_utils::cube_geometry;

fn entry(id: u64, geometry: &ItemGeometry, transform: Mat4) -> GeometryWithTransform<'_> {
  GeometryWithTransform {
    item_id: ItemId(id),
    category: SizeCategory::Small,
    geometry,
    transform,
  }
}

fn assert_vec3_near(a: Vec3, b: Vec3) {
  assert!((a - b).abs().max_element() < 1e-3, "{:?} != {:?}", a, b);
}

/// Source ranges tile the buffers with no gaps and sum to the totals.
#[test]
fn test_source_ranges_partition_buffers() {
  let cube = cube_geometry();
  let items = vec![
    entry(1, &cube, Mat4::IDENTITY),
    entry(2, &cube, Mat4::from_translation(Vec3::X * 10.0)),
    entry(3, &cube, Mat4::from_translation(Vec3::Y * 10.0)),
  ];
  let mesh = merge(NodeId(9), &items).mesh;

  let vertex_sum: u32 = mesh.source_ranges.iter().map(|r| r.vertex_count).sum();
  let index_sum: u32 = mesh.source_ranges.iter().map(|r| r.index_count).sum();
  assert_eq!(vertex_sum as usize, mesh.vertex_count());
  assert_eq!(index_sum as usize, mesh.indices.len());

  let mut next_vertex = 0;
  let mut next_index = 0;
  for range in &mesh.source_ranges {
    assert_eq!(range.start_vertex, next_vertex);
    assert_eq!(range.start_index, next_index);
    next_vertex += range.vertex_count;
    next_index += range.index_count;
  }

  let order: Vec<u64> = mesh.source_ranges.iter().map(|r| r.item_id.0).collect();
  assert_eq!(order, vec![1, 2, 3]);
  assert_eq!(mesh.node_id, NodeId(9));
}

/// Indices of later items are offset into their own vertex range.
#[test]
fn test_indices_offset_by_running_vertex_count() {
  let cube = cube_geometry();
  let items = vec![entry(1, &cube, Mat4::IDENTITY), entry(2, &cube, Mat4::IDENTITY)];
  let mesh = merge(NodeId(1), &items).mesh;

  let second = mesh.range_for(ItemId(2)).unwrap();
  let slice = &mesh.indices[second.indices()];
  assert_eq!(slice[0], cube.indices[0] + 8);
  assert!(slice.iter().all(|&i| second.vertices().contains(&(i as usize))));
}

/// Undoing the baked transform recovers each item's local bounds.
#[test]
fn test_inverse_transform_recovers_local_bounds() {
  let cube = cube_geometry();
  let local = cube.local_bounds().unwrap();
  let transforms = [
    Mat4::from_translation(Vec3::new(100.0, 5.0, -20.0)),
    Mat4::from_scale_rotation_translation(
      Vec3::new(2.0, 0.5, 3.0),
      Quat::from_rotation_y(0.7),
      Vec3::new(-40.0, 12.0, 8.0),
    ),
    Mat4::from_rotation_x(1.2) * Mat4::from_scale(Vec3::splat(4.0)),
  ];
  let items: Vec<_> = transforms.iter().enumerate().map(|(i, t)| entry(i as u64 + 1, &cube, *t)).collect();
  let mesh = merge(NodeId(3), &items).mesh;

  for (i, transform) in transforms.iter().enumerate() {
    let world = mesh.item_positions(ItemId(i as u64 + 1)).unwrap();
    let inverse = transform.inverse();
    let back: Vec<f32> = world
      .chunks_exact(3)
      .flat_map(|p| inverse.transform_point3(Vec3::from_slice(p)).to_array())
      .collect();
    let recovered = Aabb3::from_flat_points(&back).unwrap();
    assert_vec3_near(recovered.min, local.min);
    assert_vec3_near(recovered.max, local.max);
  }
}

#[test]
fn test_normals_stay_unit_under_non_uniform_scale() {
  let cube = cube_geometry();
  let transform = Mat4::from_scale(Vec3::new(10.0, 1.0, 0.1));
  let mesh = merge(NodeId(1), &[entry(1, &cube, transform)]).mesh;

  assert_eq!(mesh.normals.len(), mesh.positions.len());
  for n in mesh.normals.chunks_exact(3) {
    assert!((Vec3::from_slice(n).length() - 1.0).abs() < 1e-4);
  }
}

#[test]
fn test_missing_normals_are_zero_filled() {
  let mut cube = cube_geometry();
  cube.normals.clear();
  let mesh = merge(NodeId(1), &[entry(1, &cube, Mat4::IDENTITY)]).mesh;

  assert_eq!(mesh.normals.len(), mesh.positions.len());
  assert!(mesh.normals.iter().all(|&v| v == 0.0));
}

#[test]
fn test_no_color_information_means_no_color_buffer() {
  let cube = cube_geometry();
  let mesh = merge(NodeId(1), &[entry(1, &cube, Mat4::IDENTITY)]).mesh;
  assert!(mesh.colors.is_none());
}

/// One colored item gives the whole batch a color buffer.
#[test]
fn test_uniform_color_replicated_and_default_fill() {
  let mut red = cube_geometry();
  red.uniform_color = Some([1.0, 0.0, 0.0, 1.0]);
  let plain = cube_geometry();

  let items = vec![entry(1, &red, Mat4::IDENTITY), entry(2, &plain, Mat4::IDENTITY)];
  let mesh = merge(NodeId(1), &items).mesh;
  let colors = mesh.colors.as_ref().unwrap();
  assert_eq!(colors.len(), mesh.vertex_count() * 4);

  let (red_part, plain_part) = colors.split_at(8 * 4);
  assert!(red_part.chunks_exact(4).all(|c| c == [1.0, 0.0, 0.0, 1.0]));
  assert!(plain_part.chunks_exact(4).all(|c| c == DEFAULT_VERTEX_COLOR));
}

#[test]
fn test_explicit_colors_win_over_uniform() {
  let mut painted = cube_geometry();
  let explicit: Vec<f32> = (0..8).flat_map(|i| [i as f32 / 8.0, 0.5, 0.25, 1.0]).collect();
  painted.colors = Some(explicit.clone());
  painted.uniform_color = Some([0.0, 0.0, 0.0, 1.0]);

  let mesh = merge(NodeId(1), &[entry(1, &painted, Mat4::IDENTITY)]).mesh;
  assert_eq!(mesh.colors.unwrap(), explicit);
}

#[test]
fn test_mismatched_explicit_colors_fall_back_to_uniform() {
  let mut painted = cube_geometry();
  painted.colors = Some(vec![0.0; 5]);
  painted.uniform_color = Some([0.0, 1.0, 0.0, 1.0]);

  let mesh = merge(NodeId(1), &[entry(1, &painted, Mat4::IDENTITY)]).mesh;
  assert!(mesh.colors.unwrap().chunks_exact(4).all(|c| c == [0.0, 1.0, 0.0, 1.0]));
}

/// Malformed items are skipped and the rest of the batch survives.
#[test]
fn test_malformed_items_are_skipped() {
  let cube = cube_geometry();
  let no_positions = ItemGeometry {
    indices: vec![0, 1, 2],
    ..Default::default()
  };
  let no_indices = ItemGeometry {
    indices: Vec::new(),
    ..cube_geometry()
  };
  let bad_index = ItemGeometry {
    indices: vec![0, 1, 99],
    ..cube_geometry()
  };
  let ragged = ItemGeometry {
    positions: vec![0.0; 7],
    ..cube_geometry()
  };

  let items = vec![
    entry(1, &no_positions, Mat4::IDENTITY),
    entry(2, &cube, Mat4::IDENTITY),
    entry(3, &no_indices, Mat4::IDENTITY),
    entry(4, &bad_index, Mat4::IDENTITY),
    entry(5, &ragged, Mat4::IDENTITY),
  ];
  let output = merge(NodeId(1), &items);

  assert_eq!(output.skipped, vec![ItemId(1), ItemId(3), ItemId(4), ItemId(5)]);
  assert_eq!(output.mesh.source_ranges.len(), 1);
  assert_eq!(output.mesh.vertex_count(), 8);
}

#[test]
fn test_empty_batch() {
  let output = merge(NodeId(4), &[]);
  assert!(output.mesh.is_empty());
  assert_eq!(output.mesh.vertex_count(), 0);
  assert!(output.skipped.is_empty());
}

#[test]
fn test_category_counts_and_bounds() {
  let cube = cube_geometry();
  let items = vec![
    GeometryWithTransform {
      category: SizeCategory::Large,
      ..entry(1, &cube, Mat4::IDENTITY)
    },
    entry(2, &cube, Mat4::from_translation(Vec3::X * 10.0)),
  ];
  let mesh = merge(NodeId(1), &items).mesh;

  assert_eq!(mesh.category_counts.large, 1);
  assert_eq!(mesh.category_counts.small, 1);
  assert_eq!(mesh.category_counts.total(), 2);
  assert_vec3_near(mesh.bounds.min, Vec3::splat(-1.0));
  assert_vec3_near(mesh.bounds.max, Vec3::new(11.0, 1.0, 1.0));

  let (center, radius) = mesh.bounding_sphere();
  assert_vec3_near(center, Vec3::new(5.0, 0.0, 0.0));
  assert!(radius > 6.0);
}

#[test]
fn test_no_reduction_is_identity() {
  let cube = cube_geometry();
  assert_eq!(NoReduction.reduce(&cube, 15.0), cube);
}

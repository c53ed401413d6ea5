use std::sync::atomic::{AtomicUsize, Ordering};

use glam::Mat4;

use super::*;
use crate::batch::BatchedMesh;
use crate::store::MemoryStore;
use crate::test_utils::{stored_cube, world_bounds};
use crate::types::ItemGeometry;

/// Store whose batched writes fail when they contain a given key.
struct FailingStore {
  inner: MemoryStore,
  poisoned_key: String,
}

impl KvStore for FailingStore {
  fn get(&self, partition: Partition, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    self.inner.get(partition, key)
  }

  fn put(&self, partition: Partition, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
    self.inner.put(partition, key, value)
  }

  fn put_batch(&self, partition: Partition, entries: Vec<(String, Vec<u8>)>) -> Result<(), StoreError> {
    if entries.iter().any(|(key, _)| *key == self.poisoned_key) {
      return Err(StoreError::TransactionAborted {
        partition,
        reason: "injected failure".into(),
      });
    }
    self.inner.put_batch(partition, entries)
  }

  fn keys(&self, partition: Partition) -> Result<Vec<String>, StoreError> {
    self.inner.keys(partition)
  }

  fn delete(&self, partition: Partition, key: &str) -> Result<bool, StoreError> {
    self.inner.delete(partition, key)
  }
}

struct CountingReducer(AtomicUsize);

impl GeometryReducer for CountingReducer {
  fn reduce(&self, geometry: &ItemGeometry, _angle_tolerance: f32) -> ItemGeometry {
    self.0.fetch_add(1, Ordering::Relaxed);
    geometry.clone()
  }
}

fn config() -> IngestConfig {
  IngestConfig {
    world_bounds: Some(world_bounds()),
    ..Default::default()
  }
}

/// Five cubes: three apart, two stacked on the same spot.
fn scene() -> Vec<StoredItem> {
  let at = |x: f32, y: f32, z: f32| Mat4::from_translation(Vec3::new(x, y, z));
  vec![
    stored_cube(1, at(100.0, 100.0, 100.0), 0.1),
    stored_cube(2, at(900.0, 100.0, 100.0), 0.5),
    stored_cube(3, at(500.0, 900.0, 300.0), 2.0),
    stored_cube(4, at(300.0, 300.0, 300.0), 0.1),
    stored_cube(5, at(300.0, 300.0, 300.0), 0.1),
  ]
}

fn seeded_store() -> MemoryStore {
  let store = MemoryStore::new();
  import_items(&store, &scene(), 2).unwrap();
  store
}

fn load_meshes(store: &dyn KvStore) -> Vec<BatchedMesh> {
  store
    .keys(Partition::BatchedMeshes)
    .unwrap()
    .iter()
    .map(|key| get_json(store, Partition::BatchedMeshes, key).unwrap().unwrap())
    .collect()
}

#[test]
fn test_empty_store_is_no_items() {
  let err = IngestPipeline::new(config()).run(&MemoryStore::new()).unwrap_err();
  assert!(matches!(err, PipelineError::NoItems));
}

#[test]
fn test_missing_tree_is_fatal() {
  assert!(matches!(load_tree(&MemoryStore::new()), Err(PipelineError::MissingTree)));
}

#[test]
fn test_full_run_persists_everything() {
  let store = seeded_store();
  let report = IngestPipeline::new(config()).run(&store).unwrap();

  assert_eq!(report.items_loaded, 5);
  assert_eq!(report.placed, 5);
  assert_eq!(report.relocated, 1, "second stacked cube climbs one level");
  assert_eq!(report.root_fallbacks, 0);
  assert_eq!(report.skipped(), 0);
  assert!(report.failed_nodes.is_empty());

  let tree = load_tree(&store).unwrap();
  assert_eq!(tree.len(), crate::octree::complete_node_count(4));

  let placements = load_placements(&store).unwrap().unwrap();
  assert_eq!(placements.len(), 5);

  // Every item is in exactly one mesh, the one for its placed node
  let meshes = load_meshes(&store);
  assert_eq!(meshes.len(), report.meshes_written);
  for placement in &placements {
    let holders: Vec<&BatchedMesh> = meshes.iter().filter(|m| m.range_for(placement.item_id).is_some()).collect();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].node_id, placement.placed_node);
  }

  let total: u32 = meshes.iter().map(|m| m.category_counts.total()).sum();
  assert_eq!(total, 5);
}

#[test]
fn test_invalid_bounds_are_skipped() {
  let store = seeded_store();
  let mut broken = stored_cube(6, Mat4::IDENTITY, 0.1);
  // Reversed on x
  broken.item.world_bounds.max.x = broken.item.world_bounds.min.x - 1.0;
  import_items(&store, &[broken], 1).unwrap();

  let report = IngestPipeline::new(config()).run(&store).unwrap();
  assert_eq!(report.items_loaded, 6);
  assert_eq!(report.skipped_invalid, vec![ItemId(6)]);
  assert_eq!(report.placed, 5);
}

#[test]
fn test_unreadable_item_is_skipped() {
  let store = seeded_store();
  store.put(Partition::Items, "77", b"{ not json".to_vec()).unwrap();

  let report = IngestPipeline::new(config()).run(&store).unwrap();
  assert_eq!(report.skipped_invalid, vec![ItemId(77)]);
  assert_eq!(report.placed, 5);
}

#[test]
fn test_malformed_geometry_is_counted() {
  let store = seeded_store();
  let mut hollow = stored_cube(8, Mat4::from_translation(Vec3::splat(700.0)), 0.1);
  hollow.geometry.indices.clear();
  import_items(&store, &[hollow], 1).unwrap();

  let report = IngestPipeline::new(config()).run(&store).unwrap();
  assert_eq!(report.placed, 6);
  assert_eq!(report.skipped_geometry, vec![ItemId(8)]);
  // The node holding only the hollow cube gets no mesh
  assert_eq!(load_meshes(&store).len(), report.meshes_written);
}

#[test]
fn test_items_outside_configured_bounds_are_counted() {
  let store = seeded_store();
  import_items(&store, &[stored_cube(9, Mat4::from_translation(Vec3::splat(-500.0)), 0.1)], 1).unwrap();

  let report = IngestPipeline::new(config()).run(&store).unwrap();
  assert_eq!(report.skipped_outside, 1);
  assert_eq!(report.placed, 5);
}

/// A failed transaction only loses its own meshes.
#[test]
fn test_failed_write_batch_does_not_abort_run() {
  let inner = seeded_store();
  let first = IngestPipeline::new(config()).run(&inner).unwrap();
  let victim = load_placements(&inner).unwrap().unwrap()[0].placed_node;
  for key in inner.keys(Partition::BatchedMeshes).unwrap() {
    inner.delete(Partition::BatchedMeshes, &key).unwrap();
  }

  let store = FailingStore {
    inner,
    poisoned_key: node_key(victim),
  };
  let report = IngestPipeline::new(IngestConfig {
    write_batch_size: 1,
    ..config()
  })
  .run(&store)
  .unwrap();

  assert_eq!(report.failed_nodes, vec![victim]);
  assert_eq!(report.meshes_written, first.meshes_written - 1);
  assert!(store.get(Partition::BatchedMeshes, &node_key(victim)).unwrap().is_none());
}

#[test]
fn test_rerun_removes_stale_meshes() {
  let store = seeded_store();
  store.put(Partition::BatchedMeshes, "4000", b"{}".to_vec()).unwrap();

  let report = IngestPipeline::new(config()).run(&store).unwrap();
  assert_eq!(report.stale_meshes_removed, 1);
  assert!(store.get(Partition::BatchedMeshes, "4000").unwrap().is_none());

  let again = IngestPipeline::new(config()).run(&store).unwrap();
  assert_eq!(again.stale_meshes_removed, 0);
  assert_eq!(again.meshes_written, report.meshes_written);
}

#[test]
fn test_bounds_default_to_item_union() {
  let store = seeded_store();
  IngestPipeline::new(IngestConfig::default()).run(&store).unwrap();

  let tree = load_tree(&store).unwrap();
  assert_eq!(tree.bounds().min, Vec3::splat(99.0));
  assert_eq!(tree.bounds().max, Vec3::new(901.0, 901.0, 301.0));
}

#[test]
fn test_reducer_sees_every_placed_item() {
  let store = seeded_store();
  let pipeline = IngestPipeline::with_reducer(config(), CountingReducer(AtomicUsize::new(0)));
  pipeline.run(&store).unwrap();
  assert_eq!(pipeline.reducer.0.load(Ordering::Relaxed), 5);
}

//! Ingestion: stored items -> tree -> placements -> per-node batched meshes.
//!
//! ```text
//! Items partition ─► load ─► build tree ─► validate ─► Tree partition
//!                                │
//!                                ▼
//!                      classify + resolve (dispatcher) ─► Placements partition
//!                                │
//!                                ▼
//!                group by node ─► merge (rayon) ─► batched writes ─► BatchedMeshes
//! ```
//!
//! Missing input is fatal. Malformed items are skipped and counted. A failed
//! write batch is reported and later batches still run.

use std::collections::{BTreeSet, HashMap};

use glam::Vec3;
use rayon::prelude::*;
use tracing::{debug, info, info_span, warn};

use crate::batch::{merge, GeometryReducer, GeometryWithTransform, MergeOutput, NoReduction};
use crate::dispatch::{ChunkDispatcher, DispatchConfig};
use crate::error::{PipelineError, StoreError};
use crate::octree::{bounds_of, build, Aabb3, SpatialTree, DEFAULT_MAX_DEPTH};
use crate::overlap::{group_by_node, OverlapResolver};
use crate::store::{
  decode, encode, get_json, item_key, node_key, parse_node_key, put_json, KvStore, Partition, PLACEMENTS_KEY,
  TREE_KEY,
};
use crate::types::{ContentItem, ItemId, NodeId, Placement, StoredItem};

/// Meshes per write transaction.
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 16;
/// Angle tolerance (degrees) handed to the geometry reducer.
pub const DEFAULT_ANGLE_TOLERANCE: f32 = 15.0;

/// Ingestion configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IngestConfig {
  pub max_depth: u8,
  /// World bounds of the tree. `None` uses the union of all item boxes.
  pub world_bounds: Option<Aabb3>,
  /// Meshes per write transaction.
  pub write_batch_size: usize,
  pub dispatch: DispatchConfig,
  pub angle_tolerance: f32,
}

impl Default for IngestConfig {
  fn default() -> Self {
    Self {
      max_depth: DEFAULT_MAX_DEPTH,
      world_bounds: None,
      write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
      dispatch: DispatchConfig::default(),
      angle_tolerance: DEFAULT_ANGLE_TOLERANCE,
    }
  }
}

/// Outcome of one ingestion run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
  /// Items read from the store.
  pub items_loaded: usize,
  /// Items with unreadable values or unusable bounds.
  pub skipped_invalid: Vec<ItemId>,
  /// Items whose center fell outside the world bounds.
  pub skipped_outside: usize,
  /// Items dropped during batching for malformed geometry.
  pub skipped_geometry: Vec<ItemId>,
  pub placed: usize,
  pub relocated: usize,
  pub root_fallbacks: usize,
  pub meshes_written: usize,
  /// Nodes whose write transaction failed.
  pub failed_nodes: Vec<NodeId>,
  /// Meshes of nodes that are no longer occupied.
  pub stale_meshes_removed: usize,
}

impl IngestReport {
  /// Total items that did not end up in a mesh.
  pub fn skipped(&self) -> usize {
    self.skipped_invalid.len() + self.skipped_outside + self.skipped_geometry.len()
  }
}

/// Runs the full ingestion over a store.
pub struct IngestPipeline<R: GeometryReducer = NoReduction> {
  config: IngestConfig,
  reducer: R,
}

impl IngestPipeline<NoReduction> {
  pub fn new(config: IngestConfig) -> Self {
    Self::with_reducer(config, NoReduction)
  }
}

impl<R: GeometryReducer> IngestPipeline<R> {
  pub fn with_reducer(config: IngestConfig, reducer: R) -> Self {
    Self { config, reducer }
  }

  #[inline]
  pub fn config(&self) -> &IngestConfig {
    &self.config
  }

  pub fn run(&self, store: &dyn KvStore) -> Result<IngestReport, PipelineError> {
    let _span = info_span!("ingest").entered();
    let mut report = IngestReport::default();

    let stored = self.load_items(store, &mut report)?;
    let contents: Vec<ContentItem> = stored.iter().map(|s| s.item.clone()).collect();

    // Tree
    let tree = {
      let bounds = self
        .config
        .world_bounds
        .or_else(|| bounds_of(&contents))
        .unwrap_or(Aabb3::new(Vec3::ZERO, Vec3::ZERO));
      let tree = build(bounds, &contents, self.config.max_depth);
      tree.validate()?;
      put_json(store, Partition::Tree, TREE_KEY, &tree)?;
      tree
    };

    // Placements
    let resolver = OverlapResolver::new(ChunkDispatcher::new(self.config.dispatch));
    let placements = resolver.resolve(&contents, &tree)?;
    put_json(store, Partition::Placements, PLACEMENTS_KEY, &placements)?;

    report.placed = placements.len();
    report.skipped_outside = contents.len() - placements.len();
    report.relocated = placements.iter().filter(|p| p.relocated()).count();
    report.root_fallbacks = placements.iter().filter(|p| p.root_fallback).count();

    // Meshes
    let merged = self.batch(&stored, &placements);
    for (_, output) in &merged {
      report.skipped_geometry.extend(output.skipped.iter().copied());
    }
    let occupied: BTreeSet<NodeId> = merged
      .iter()
      .filter(|(_, output)| !output.mesh.is_empty())
      .map(|(node, _)| *node)
      .collect();
    self.write_meshes(store, merged, &mut report)?;
    report.stale_meshes_removed = remove_stale_meshes(store, &occupied)?;

    info!(
      items = report.items_loaded,
      placed = report.placed,
      relocated = report.relocated,
      meshes = report.meshes_written,
      skipped = report.skipped(),
      failed_batches = report.failed_nodes.len(),
      "ingestion finished"
    );
    Ok(report)
  }

  /// Read every stored item, dropping unreadable ones and bad bounds.
  fn load_items(&self, store: &dyn KvStore, report: &mut IngestReport) -> Result<Vec<StoredItem>, PipelineError> {
    let keys = store.keys(Partition::Items)?;
    if keys.is_empty() {
      return Err(PipelineError::NoItems);
    }
    report.items_loaded = keys.len();

    let mut items = Vec::with_capacity(keys.len());
    for key in keys {
      // Listed but gone: the store changed under the run
      let bytes = store.get(Partition::Items, &key)?.ok_or_else(|| StoreError::Missing {
        partition: Partition::Items,
        key: key.clone(),
      })?;
      match decode::<StoredItem>(&bytes) {
        Ok(stored) if stored.item.has_valid_bounds() => items.push(stored),
        Ok(stored) => {
          warn!(item = %stored.item.id, "item has no usable bounding box, skipping");
          report.skipped_invalid.push(stored.item.id);
        }
        Err(e) => {
          warn!(key = %key, error = %e, "unreadable item, skipping");
          if let Ok(id) = key.parse() {
            report.skipped_invalid.push(ItemId(id));
          }
        }
      }
    }
    // Stored order is by key string; placement order follows item ids
    items.sort_by_key(|s| s.item.id);
    Ok(items)
  }

  /// Merge every occupied node in parallel.
  fn batch(&self, stored: &[StoredItem], placements: &[Placement]) -> Vec<(NodeId, MergeOutput)> {
    let _span = info_span!("batch").entered();
    let by_id: HashMap<ItemId, &StoredItem> = stored.iter().map(|s| (s.item.id, s)).collect();
    let groups: Vec<(NodeId, Vec<Placement>)> = group_by_node(placements).into_iter().collect();
    let tolerance = self.config.angle_tolerance;

    groups
      .into_par_iter()
      .map(|(node, group)| {
        let members: Vec<(&Placement, &StoredItem)> =
          group.iter().filter_map(|p| by_id.get(&p.item_id).map(|s| (p, *s))).collect();
        let reduced: Vec<_> = members.iter().map(|(_, s)| self.reducer.reduce(&s.geometry, tolerance)).collect();
        let entries: Vec<GeometryWithTransform<'_>> = members
          .iter()
          .zip(&reduced)
          .map(|((placement, s), geometry)| GeometryWithTransform {
            item_id: placement.item_id,
            category: placement.category,
            geometry,
            transform: s.item.world_transform,
          })
          .collect();

        (node, merge(node, &entries))
      })
      .collect()
  }

  /// Persist meshes in bounded transactions. A failed transaction is
  /// recorded and the remaining ones continue.
  fn write_meshes(
    &self,
    store: &dyn KvStore,
    merged: Vec<(NodeId, MergeOutput)>,
    report: &mut IngestReport,
  ) -> Result<(), PipelineError> {
    let _span = info_span!("write").entered();
    let mut encoded = Vec::with_capacity(merged.len());
    for (node, output) in merged {
      if output.mesh.is_empty() {
        debug!(node = %node, "node has no mergeable geometry");
        continue;
      }
      encoded.push((node, encode(&output.mesh)?));
    }

    for batch in encoded.chunks(self.config.write_batch_size.max(1)) {
      let entries: Vec<(String, Vec<u8>)> = batch.iter().map(|(node, bytes)| (node_key(*node), bytes.clone())).collect();
      match store.put_batch(Partition::BatchedMeshes, entries) {
        Ok(()) => report.meshes_written += batch.len(),
        Err(e) => {
          warn!(error = %e, nodes = batch.len(), "mesh write batch failed");
          report.failed_nodes.extend(batch.iter().map(|(node, _)| *node));
        }
      }
    }
    Ok(())
  }
}

/// Delete meshes of nodes outside `occupied`. Returns the number removed.
fn remove_stale_meshes(store: &dyn KvStore, occupied: &BTreeSet<NodeId>) -> Result<usize, StoreError> {
  let mut removed = 0;
  for key in store.keys(Partition::BatchedMeshes)? {
    let stale = parse_node_key(&key).map_or(true, |node| !occupied.contains(&node));
    if stale && store.delete(Partition::BatchedMeshes, &key)? {
      removed += 1;
    }
  }
  if removed > 0 {
    debug!(removed, "removed stale meshes");
  }
  Ok(removed)
}

/// Write `items` into the item partition in batches of `batch_size`.
pub fn import_items(store: &dyn KvStore, items: &[StoredItem], batch_size: usize) -> Result<usize, StoreError> {
  for chunk in items.chunks(batch_size.max(1)) {
    let entries = chunk
      .iter()
      .map(|s| Ok((item_key(s.item.id), encode(s)?)))
      .collect::<Result<Vec<_>, StoreError>>()?;
    store.put_batch(Partition::Items, entries)?;
  }
  Ok(items.len())
}

/// Load and validate the persisted tree.
pub fn load_tree(store: &dyn KvStore) -> Result<SpatialTree, PipelineError> {
  let tree: SpatialTree = get_json(store, Partition::Tree, TREE_KEY)?.ok_or(PipelineError::MissingTree)?;
  tree.validate()?;
  Ok(tree)
}

/// Placements of the last run, if any.
pub fn load_placements(store: &dyn KvStore) -> Result<Option<Vec<Placement>>, StoreError> {
  get_json(store, Partition::Placements, PLACEMENTS_KEY)
}

#[cfg(test)]
#[path = "ingest_test.rs"]
mod ingest_test;

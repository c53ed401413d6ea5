//! scene_octree - Spatial batching and LOD streaming for large static scenes
//!
//! This crate turns thousands of independently authored content items into a
//! complete octree of batched meshes, persists them, and streams them back in
//! by camera distance.
//!
//! # Features
//!
//! - **Spatial Octree**: Complete fixed-depth tree built from item centers
//! - **Overlap Resolution**: Size classification and relocation of items
//!   whose boxes collide at their target depth
//! - **Geometry Batching**: One merged, world-space mesh per node with
//!   per-item source ranges
//! - **LOD Streaming**: Distance bands with hysteresis, background loads,
//!   eviction and an LRU cache
//!
//! # Example
//!
//! ```ignore
//! use scene_octree::{FileStore, HeadlessScene, IngestConfig, IngestPipeline, LodStreamer};
//!
//! let store = Arc::new(FileStore::open("scene_store")?);
//! let report = IngestPipeline::new(IngestConfig::default()).run(store.as_ref())?;
//!
//! let tree = scene_octree::load_tree(store.as_ref())?;
//! let mut streamer = LodStreamer::new(&tree, store, Default::default());
//! let mut scene = HeadlessScene::new();
//! streamer.tick(camera, Instant::now(), &mut scene);
//! ```

pub mod error;
pub mod types;

pub use error::{DispatchError, PipelineError, StoreError};
pub use types::{CategoryCounts, ContentItem, ItemGeometry, ItemId, NodeId, Placement, SizeCategory, StoredItem};

// Spatial index
pub mod octree;
pub use octree::{build, Aabb3, SpatialNode, SpatialTree};

// Size classification and importance
pub mod classify;
pub use classify::{classify, target_depth, ImportanceMetric, ProjectedSphereCoverage};

// Chunked work dispatch (worker pool or cooperative)
pub mod dispatch;
pub use dispatch::{ChunkDispatcher, ChunkFailurePolicy, ChunkWork, DispatchConfig, DispatchStrategy, RequestId};

// Overlap resolution
pub mod overlap;
pub use overlap::{group_by_node, OverlapResolver};

// Geometry batching
pub mod batch;
pub use batch::{merge, BatchedMesh, GeometryReducer, GeometryWithTransform, MergeOutput, NoReduction, SourceRange};

// Persistence
pub mod store;
pub use store::{FileStore, KvStore, MemoryStore, Partition};

// Offline ingestion
pub mod ingest;
pub use ingest::{import_items, load_placements, load_tree, IngestConfig, IngestPipeline, IngestReport};

// Runtime streaming
pub mod streamer;
pub use streamer::{
  EvictionPolicy, HeadlessScene, LodBands, LodStreamer, NodeStatus, SceneHandle, SceneRuntime, StreamMetrics,
  StreamerConfig, TickReport,
};

#[cfg(test)]
pub mod test_utils;

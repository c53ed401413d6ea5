//! Runtime LOD streaming of per-node batched meshes.
//!
//! # Node States
//!
//! ```text
//! Unloaded ──request──► Loading ──mesh──► Resident(hidden) ◄──► Resident(visible)
//!    ▲                     │                    │
//!    │                     └─no mesh / error────┤ (absent / retried)
//!    └──────────────── evict (policy) ──────────┘──► MeshCache
//! ```
//!
//! # Tick
//!
//! ```text
//! 1. rate limit (min_tick_interval)
//! 2. drain finished loads -> instantiate hidden
//! 3. desired set: depth band of each node's face distance, hysteresis for
//!    nodes desired last tick
//! 4. desired + resident -> show; desired + cached -> instantiate;
//!    desired + unloaded -> load candidate
//! 5. resident + not desired -> hide
//! 6. issue loads, finest depth first, then nearest, up to the in-flight cap
//! 7. prefetch nodes entering a band at the extrapolated camera position
//! 8. evict hidden nodes per policy
//! ```
//!
//! The streamer is driven from a single thread. `tick` takes `&mut self`, so
//! overlapping ticks cannot happen.

pub mod bands;
pub mod cache;
pub mod loader;
pub mod metrics;
pub mod scene;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use tracing::{debug, debug_span, warn};
use web_time::Instant;

use crate::batch::BatchedMesh;
use crate::error::StoreError;
use crate::octree::SpatialTree;
use crate::store::{parse_node_key, KvStore, Partition};
use crate::types::NodeId;

pub use bands::{LodBands, FAR_DEPTH, MID_DEPTH, NEAR_DEPTH};
pub use cache::{MeshCache, DEFAULT_CACHE_CAPACITY};
pub use loader::{LoadResult, MeshLoader};
pub use metrics::{RollingWindow, StreamMetrics};
pub use scene::{HeadlessObject, HeadlessScene, SceneHandle, SceneRuntime};

/// What happens to resident meshes that are no longer shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
  /// Keep hidden meshes in the scene indefinitely.
  #[default]
  Retain,
  /// Evict meshes hidden for at least this long.
  HiddenFor(Duration),
  /// Keep at most this many hidden meshes, evicting the longest hidden.
  MaxHidden(usize),
}

/// Streamer configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamerConfig {
  /// Distance beyond which nothing is shown.
  pub max_distance: f32,
  /// Ticks closer together than this are dropped.
  pub min_tick_interval: Duration,
  /// Evicted meshes kept in memory.
  pub cache_capacity: usize,
  /// Cap on reads in flight at once.
  pub max_concurrent_loads: usize,
  /// How far ahead the camera position is extrapolated.
  pub prefetch_lookahead: Duration,
  /// Extra distance, as a fraction of `max_distance`, a node may be outside
  /// a band at the extrapolated position and still be prefetched.
  pub prefetch_tolerance: f32,
  pub eviction: EvictionPolicy,
}

impl Default for StreamerConfig {
  fn default() -> Self {
    Self {
      max_distance: 1000.0,
      min_tick_interval: Duration::from_millis(100),
      cache_capacity: DEFAULT_CACHE_CAPACITY,
      max_concurrent_loads: 8,
      prefetch_lookahead: Duration::from_millis(500),
      prefetch_tolerance: 0.02,
      eviction: EvictionPolicy::Retain,
    }
  }
}

/// Observable state of one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
  Unloaded,
  Loading,
  Hidden,
  Visible,
}

/// What one tick did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
  /// Nodes wanted at the current camera position.
  pub desired: usize,
  /// Resident nodes made visible.
  pub shown: usize,
  /// Resident nodes hidden.
  pub hidden: usize,
  pub loads_issued: usize,
  pub loads_completed: usize,
  /// Finished loads for nodes with no persisted mesh.
  pub missing: usize,
  pub failed: usize,
  pub cache_hits: usize,
  pub prefetched: usize,
  pub evicted: usize,
}

struct Resident {
  handle: SceneHandle,
  visible: bool,
  hidden_since: Option<Instant>,
  mesh: Arc<BatchedMesh>,
}

/// A node the streamer may show.
#[derive(Clone, Copy)]
struct Candidate {
  node: NodeId,
  depth: u8,
  center: Vec3,
}

/// Decides which node meshes live in the scene for a camera position.
pub struct LodStreamer {
  config: StreamerConfig,
  bands: LodBands,
  candidates: Vec<Candidate>,
  loader: MeshLoader,
  resident: HashMap<NodeId, Resident>,
  /// Nodes known to have no persisted mesh.
  absent: HashSet<NodeId>,
  /// Nodes desired on the previous tick.
  desired: HashSet<NodeId>,
  cache: MeshCache,
  last_tick: Option<Instant>,
  last_camera: Option<(Vec3, Instant)>,
  velocity: Vec3,
  metrics: StreamMetrics,
}

impl LodStreamer {
  pub fn new(tree: &SpatialTree, store: Arc<dyn KvStore>, config: StreamerConfig) -> Self {
    let candidates = tree
      .iter()
      .filter(|n| (FAR_DEPTH..=NEAR_DEPTH).contains(&n.depth))
      .map(|n| Candidate {
        node: n.id,
        depth: n.depth,
        center: n.center(),
      })
      .collect();

    Self {
      bands: LodBands::new(config.max_distance),
      candidates,
      loader: MeshLoader::new(store),
      resident: HashMap::new(),
      absent: HashSet::new(),
      desired: HashSet::new(),
      cache: MeshCache::new(config.cache_capacity),
      last_tick: None,
      last_camera: None,
      velocity: Vec3::ZERO,
      metrics: StreamMetrics::default(),
      config,
    }
  }

  /// Mark every node without a stored mesh as absent up front.
  ///
  /// Returns the number of nodes that do have a mesh.
  pub fn prime_from_store(&mut self) -> Result<usize, StoreError> {
    let stored: HashSet<NodeId> = self
      .loader
      .store()
      .keys(Partition::BatchedMeshes)?
      .iter()
      .filter_map(|k| parse_node_key(k))
      .collect();
    for candidate in &self.candidates {
      if !stored.contains(&candidate.node) {
        self.absent.insert(candidate.node);
      }
    }
    Ok(self.candidates.len() - self.absent.len())
  }

  #[inline]
  pub fn config(&self) -> &StreamerConfig {
    &self.config
  }

  #[inline]
  pub fn bands(&self) -> &LodBands {
    &self.bands
  }

  #[inline]
  pub fn metrics(&self) -> &StreamMetrics {
    &self.metrics
  }

  #[inline]
  pub fn cache(&self) -> &MeshCache {
    &self.cache
  }

  /// Camera velocity estimated from the last two ticks.
  #[inline]
  pub fn velocity(&self) -> Vec3 {
    self.velocity
  }

  #[inline]
  pub fn loads_in_flight(&self) -> usize {
    self.loader.in_flight()
  }

  pub fn resident_count(&self) -> usize {
    self.resident.len()
  }

  pub fn visible_count(&self) -> usize {
    self.resident.values().filter(|r| r.visible).count()
  }

  pub fn is_absent(&self, node: NodeId) -> bool {
    self.absent.contains(&node)
  }

  pub fn status(&self, node: NodeId) -> NodeStatus {
    match self.resident.get(&node) {
      Some(r) if r.visible => NodeStatus::Visible,
      Some(_) => NodeStatus::Hidden,
      None if self.loader.is_loading(node) => NodeStatus::Loading,
      None => NodeStatus::Unloaded,
    }
  }

  /// Run one update for `camera` at time `now`.
  ///
  /// Returns `None` when dropped by the rate limit.
  pub fn tick(&mut self, camera: Vec3, now: Instant, scene: &mut impl SceneRuntime) -> Option<TickReport> {
    if let Some(last) = self.last_tick {
      if now.duration_since(last) < self.config.min_tick_interval {
        return None;
      }
    }
    self.last_tick = Some(now);

    let _span = debug_span!("tick").entered();
    let started = Instant::now();
    let mut report = TickReport::default();

    self.update_velocity(camera, now);
    self.drain_loads(now, scene, &mut report);

    let desired = self.desired_nodes(camera);
    report.desired = desired.len();

    // Show resident, serve cache hits, collect load candidates
    let mut wanted: Vec<(u8, f32, NodeId)> = Vec::new();
    for &(node, depth, distance) in &desired {
      if let Some(resident) = self.resident.get_mut(&node) {
        if !resident.visible {
          scene.set_visible(resident.handle, true);
          resident.visible = true;
          resident.hidden_since = None;
          report.shown += 1;
        }
        continue;
      }
      if self.loader.is_loading(node) || self.absent.contains(&node) {
        continue;
      }
      if let Some(mesh) = self.cache.take(node) {
        self.instantiate(node, mesh, true, now, scene);
        report.cache_hits += 1;
        report.shown += 1;
        continue;
      }
      wanted.push((depth, distance, node));
    }

    let desired_set: HashSet<NodeId> = desired.iter().map(|&(node, _, _)| node).collect();

    // Hide everything else
    for (node, resident) in self.resident.iter_mut() {
      if resident.visible && !desired_set.contains(node) {
        scene.set_visible(resident.handle, false);
        resident.visible = false;
        resident.hidden_since = Some(now);
        report.hidden += 1;
      }
    }

    // Finest detail first, nearest first within a depth
    wanted.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.total_cmp(&b.1)));
    for (_, _, node) in wanted {
      if self.loader.in_flight() >= self.config.max_concurrent_loads {
        break;
      }
      if self.loader.request(node) {
        report.loads_issued += 1;
      }
    }

    report.prefetched = self.prefetch(camera, &desired_set);
    report.evicted = self.evict(now, scene);

    self.desired = desired_set;
    self.metrics.resident = self.resident.len();
    self.metrics.visible = self.visible_count();
    self.metrics.in_flight = self.loader.in_flight();
    self.metrics.record_tick(&report, started.elapsed().as_micros() as u64);

    debug!(
      desired = report.desired,
      shown = report.shown,
      hidden = report.hidden,
      loads = report.loads_issued,
      prefetched = report.prefetched,
      evicted = report.evicted,
      "tick"
    );
    Some(report)
  }

  /// Dispose every resident mesh, keeping the meshes in the cache.
  pub fn clear(&mut self, scene: &mut impl SceneRuntime) {
    for (node, resident) in self.resident.drain() {
      scene.dispose(resident.handle);
      self.cache.insert(node, resident.mesh);
    }
    self.desired.clear();
  }

  fn update_velocity(&mut self, camera: Vec3, now: Instant) {
    if let Some((previous, at)) = self.last_camera {
      let dt = now.duration_since(at).as_secs_f32();
      if dt > 0.0 {
        self.velocity = (camera - previous) / dt;
      }
    }
    self.last_camera = Some((camera, now));
  }

  fn drain_loads(&mut self, now: Instant, scene: &mut impl SceneRuntime, report: &mut TickReport) {
    for LoadResult { node, outcome } in self.loader.poll() {
      match outcome {
        Ok(Some(mesh)) => {
          report.loads_completed += 1;
          if !self.resident.contains_key(&node) {
            // Shown later this tick if still desired
            self.instantiate(node, Arc::new(mesh), false, now, scene);
          }
        }
        Ok(None) => {
          debug!(node = %node, "no persisted mesh, marking absent");
          self.absent.insert(node);
          report.missing += 1;
        }
        Err(e) => {
          warn!(node = %node, error = %e, "mesh load failed");
          report.failed += 1;
        }
      }
    }
  }

  fn instantiate(
    &mut self,
    node: NodeId,
    mesh: Arc<BatchedMesh>,
    visible: bool,
    now: Instant,
    scene: &mut impl SceneRuntime,
  ) {
    let handle = scene.instantiate(&mesh);
    if visible {
      scene.set_visible(handle, true);
    }
    self.resident.insert(
      node,
      Resident {
        handle,
        visible,
        hidden_since: (!visible).then_some(now),
        mesh,
      },
    );
  }

  /// Camera-to-node distance, measured to the mesh surface when resident.
  fn face_distance(&self, candidate: &Candidate, camera: Vec3) -> f32 {
    let center_distance = camera.distance(candidate.center);
    match self.resident.get(&candidate.node) {
      Some(resident) => (center_distance - resident.mesh.bounding_sphere().1).max(0.0),
      None => center_distance,
    }
  }

  fn desired_nodes(&self, camera: Vec3) -> Vec<(NodeId, u8, f32)> {
    self
      .candidates
      .iter()
      .filter_map(|candidate| {
        let distance = self.face_distance(candidate, camera);
        let was_desired = self.desired.contains(&candidate.node);
        self
          .bands
          .wants(candidate.depth, distance, was_desired)
          .then_some((candidate.node, candidate.depth, distance))
      })
      .collect()
  }

  /// Request nodes that will be in band at the extrapolated camera position.
  fn prefetch(&mut self, camera: Vec3, desired: &HashSet<NodeId>) -> usize {
    if self.velocity == Vec3::ZERO || self.config.prefetch_lookahead.is_zero() {
      return 0;
    }
    let predicted = camera + self.velocity * self.config.prefetch_lookahead.as_secs_f32();
    let tolerance = self.config.prefetch_tolerance * self.bands.max_distance;

    let mut upcoming: Vec<(u8, f32, NodeId)> = self
      .candidates
      .iter()
      .filter(|c| {
        !desired.contains(&c.node)
          && !self.resident.contains_key(&c.node)
          && !self.absent.contains(&c.node)
          && !self.cache.contains(c.node)
          && !self.loader.is_loading(c.node)
      })
      .filter_map(|c| {
        let distance = predicted.distance(c.center);
        let (low, high) = self.bands.range(c.depth)?;
        (distance >= low - tolerance && distance <= high + tolerance).then_some((c.depth, distance, c.node))
      })
      .collect();
    upcoming.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.total_cmp(&b.1)));

    let mut issued = 0;
    for (_, _, node) in upcoming {
      if self.loader.in_flight() >= self.config.max_concurrent_loads {
        break;
      }
      if self.loader.request(node) {
        issued += 1;
      }
    }
    issued
  }

  fn evict(&mut self, now: Instant, scene: &mut impl SceneRuntime) -> usize {
    let mut hidden: Vec<(Instant, NodeId)> = self
      .resident
      .iter()
      .filter(|(_, r)| !r.visible)
      .filter_map(|(node, r)| r.hidden_since.map(|since| (since, *node)))
      .collect();

    let victims: Vec<NodeId> = match self.config.eviction {
      EvictionPolicy::Retain => return 0,
      EvictionPolicy::HiddenFor(limit) => hidden
        .into_iter()
        .filter(|(since, _)| now.duration_since(*since) >= limit)
        .map(|(_, node)| node)
        .collect(),
      EvictionPolicy::MaxHidden(limit) => {
        if hidden.len() <= limit {
          return 0;
        }
        // Longest hidden first
        hidden.sort_by_key(|(since, node)| (*since, *node));
        let excess = hidden.len() - limit;
        hidden.into_iter().take(excess).map(|(_, node)| node).collect()
      }
    };

    for node in &victims {
      if let Some(resident) = self.resident.remove(node) {
        scene.dispose(resident.handle);
        if let Some(dropped) = self.cache.insert(*node, resident.mesh) {
          debug!(node = %dropped, "mesh dropped from cache");
        }
      }
    }
    victims.len()
  }
}

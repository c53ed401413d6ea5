//! Overlap resolution: moves items that visually collide with another item of
//! the same depth up to a conflict-free ancestor.
//!
//! # Algorithm
//!
//! ```text
//! 1. classify every item -> target depth          (chunked, dispatched)
//! 2. per depth: item i conflicts if its box
//!    overlaps any earlier item j < i at that depth (chunked, dispatched)
//! 3. depths 2, 3, 4 in order, items in input order:
//!      no conflict -> place at its own node
//!      conflict    -> first ancestor (parent, grandparent, ...) whose
//!                     already placed boxes do not overlap it
//!      none found  -> root, flagged as fallback
//! ```
//!
//! Conflicts are global per depth: two overlapping items conflict even when
//! their centers landed in different cells. Step 2 is quadratic per depth,
//! which is why it is split into chunks. Chunks hold a range into one shared
//! buffer per pass, so memory stays linear in the item count.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;

use tracing::{info, info_span, warn};

use crate::classify::target_depth;
use crate::dispatch::{chunk_ranges, ChunkDispatcher, ChunkWork};
use crate::error::DispatchError;
use crate::octree::{Aabb3, SpatialTree};
use crate::types::{ContentItem, NodeId, Placement, SizeCategory};

/// Classifies `range` of the shared coverage values.
struct ClassifyChunk {
  coverages: Arc<[f32]>,
  range: Range<usize>,
}

impl ChunkWork for ClassifyChunk {
  type Output = Vec<SizeCategory>;

  fn run(&self) -> Vec<SizeCategory> {
    self.coverages[self.range.clone()]
      .iter()
      .map(|&coverage| SizeCategory::from_coverage(coverage))
      .collect()
  }
}

/// Conflict flags for `range` of a depth bucket, against every box before it.
struct ConflictChunk {
  boxes: Arc<[Aabb3]>,
  range: Range<usize>,
}

impl ChunkWork for ConflictChunk {
  type Output = Vec<bool>;

  fn run(&self) -> Vec<bool> {
    self
      .range
      .clone()
      .map(|i| {
        let current = &self.boxes[i];
        self.boxes[..i].iter().any(|earlier| earlier.overlaps(current))
      })
      .collect()
  }
}

/// An item entering placement at its classified depth.
struct Candidate {
  index: usize,
  category: SizeCategory,
  node: NodeId,
  depth: u8,
}

/// Resolves placements, running the heavy passes through a [`ChunkDispatcher`].
pub struct OverlapResolver {
  dispatcher: ChunkDispatcher,
}

impl Default for OverlapResolver {
  fn default() -> Self {
    Self::new(ChunkDispatcher::default())
  }
}

impl OverlapResolver {
  pub fn new(dispatcher: ChunkDispatcher) -> Self {
    Self { dispatcher }
  }

  #[inline]
  pub fn dispatcher(&self) -> &ChunkDispatcher {
    &self.dispatcher
  }

  /// Compute the final placement of every item the tree holds.
  ///
  /// Items outside the tree are skipped with a warning. The result is in
  /// input order. A failed chunk fails the whole resolution.
  pub fn resolve(&self, items: &[ContentItem], tree: &SpatialTree) -> Result<Vec<Placement>, DispatchError> {
    let _span = info_span!("resolve", items = items.len()).entered();
    let chunk_size = self.dispatcher.config().chunk_size;

    let categories = self.classify(items, chunk_size)?;

    // Bucket by target depth, keeping input order inside each bucket
    let mut buckets: BTreeMap<u8, Vec<Candidate>> = BTreeMap::new();
    for (index, (item, category)) in items.iter().zip(categories).enumerate() {
      let depth = target_depth(category, tree.max_depth());
      match tree.descend(item.center(), depth) {
        Some(node) => buckets.entry(depth).or_default().push(Candidate {
          index,
          category,
          node,
          depth,
        }),
        None => warn!(item = %item.id, "item center outside the tree, not placed"),
      }
    }

    let mut placed_boxes: HashMap<NodeId, Vec<Aabb3>> = HashMap::new();
    let mut placements: Vec<(usize, Placement)> = Vec::with_capacity(items.len());
    let mut relocated = 0usize;
    let mut fallbacks = 0usize;

    for (&depth, bucket) in &buckets {
      let boxes: Arc<[Aabb3]> = bucket.iter().map(|c| items[c.index].world_bounds).collect();
      let conflicts = self.conflicts(boxes, items.len(), chunk_size)?;

      for (candidate, conflict) in bucket.iter().zip(conflicts) {
        let item = &items[candidate.index];
        let bounds = item.world_bounds;

        let (placed_node, root_fallback) = if conflict {
          let free = tree.ancestors(candidate.node).find(|ancestor| {
            placed_boxes
              .get(ancestor)
              .map_or(true, |placed| !placed.iter().any(|b| b.overlaps(&bounds)))
          });
          match free {
            Some(ancestor) => (ancestor, false),
            None => {
              warn!(item = %item.id, depth, "no conflict-free ancestor, placing at root");
              (NodeId::ROOT, true)
            }
          }
        } else {
          (candidate.node, false)
        };

        let placed_depth = tree.get(placed_node).map_or(0, |n| n.depth);
        placed_boxes.entry(placed_node).or_default().push(bounds);

        let placement = Placement {
          item_id: item.id,
          category: candidate.category,
          original_node: candidate.node,
          original_depth: candidate.depth,
          placed_node,
          placed_depth,
          root_fallback,
        };
        if placement.relocated() {
          relocated += 1;
        }
        if root_fallback {
          fallbacks += 1;
        }
        placements.push((candidate.index, placement));
      }
    }

    placements.sort_unstable_by_key(|(index, _)| *index);
    info!(placed = placements.len(), relocated, fallbacks, "overlap resolution done");
    Ok(placements.into_iter().map(|(_, p)| p).collect())
  }

  fn classify(&self, items: &[ContentItem], chunk_size: usize) -> Result<Vec<SizeCategory>, DispatchError> {
    let coverages: Arc<[f32]> = items.iter().map(|i| i.screen_coverage).collect();
    let jobs = chunk_ranges(items.len(), chunk_size).map(|range| ClassifyChunk {
      coverages: Arc::clone(&coverages),
      range,
    });
    let chunks = self.dispatcher.dispatch_all(items.len(), jobs)?;
    Ok(chunks.into_iter().flatten().collect())
  }

  fn conflicts(&self, boxes: Arc<[Aabb3]>, item_count: usize, chunk_size: usize) -> Result<Vec<bool>, DispatchError> {
    let jobs = chunk_jobs(&boxes, chunk_size);
    let chunks = self.dispatcher.dispatch_all(item_count, jobs)?;
    Ok(chunks.into_iter().flatten().collect())
  }
}

/// Conflict jobs over one depth bucket, all sharing `boxes`.
fn chunk_jobs(boxes: &Arc<[Aabb3]>, chunk_size: usize) -> impl Iterator<Item = ConflictChunk> + '_ {
  chunk_ranges(boxes.len(), chunk_size).map(move |range| ConflictChunk {
    boxes: Arc::clone(boxes),
    range,
  })
}

/// Group placements by the node they were placed in.
pub fn group_by_node(placements: &[Placement]) -> BTreeMap<NodeId, Vec<Placement>> {
  let mut groups: BTreeMap<NodeId, Vec<Placement>> = BTreeMap::new();
  for placement in placements {
    groups.entry(placement.placed_node).or_default().push(*placement);
  }
  groups
}

#[cfg(test)]
#[path = "overlap_test.rs"]
mod overlap_test;

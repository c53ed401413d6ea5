//! SpatialTree - arena-backed complete octree of fixed depth.

use std::collections::BTreeSet;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::{Aabb3, SpatialNode};
use crate::error::PipelineError;
use crate::types::NodeId;

/// Depth of the tree built by ingestion.
pub const DEFAULT_MAX_DEPTH: u8 = 4;

/// Node count of a complete octree: sum of 8^d for d in 0..=max_depth.
pub fn complete_node_count(max_depth: u8) -> usize {
  (0..=max_depth as u32).map(|d| 8usize.pow(d)).sum()
}

/// Complete octree with nodes stored in pre-order.
///
/// `nodes[i].id == NodeId(i + 1)`, so id lookups and parent chases are
/// plain index operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpatialTree {
  nodes: Vec<SpatialNode>,
  max_depth: u8,
}

impl SpatialTree {
  pub(crate) fn from_nodes(nodes: Vec<SpatialNode>, max_depth: u8) -> Self {
    Self { nodes, max_depth }
  }

  #[inline]
  pub fn max_depth(&self) -> u8 {
    self.max_depth
  }

  /// The root node.
  ///
  /// # Panics
  /// If the tree has no nodes, which a built tree never does. Deserialized
  /// trees should go through [`Self::validate`] first.
  #[inline]
  pub fn root(&self) -> &SpatialNode {
    &self.nodes[0]
  }

  /// World bounds covered by the tree.
  #[inline]
  pub fn bounds(&self) -> Aabb3 {
    self.root().bounds
  }

  #[inline]
  pub fn get(&self, id: NodeId) -> Option<&SpatialNode> {
    self.nodes.get(id.index())
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Iterate nodes in pre-order.
  pub fn iter(&self) -> impl Iterator<Item = &SpatialNode> {
    self.nodes.iter()
  }

  #[inline]
  pub fn parent(&self, id: NodeId) -> Option<NodeId> {
    self.get(id).and_then(|n| n.parent)
  }

  /// Ancestors of `id`, nearest first, ending at the root.
  pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
    Ancestors {
      tree: self,
      next: self.parent(id),
    }
  }

  /// All nodes at `depth`, in pre-order.
  pub fn nodes_at_depth(&self, depth: u8) -> impl Iterator<Item = &SpatialNode> {
    self.nodes.iter().filter(move |n| n.depth == depth)
  }

  /// Node at `depth` whose cell holds `point` under the octant split rule.
  ///
  /// Returns `None` if the point lies outside the tree, the tree bounds are
  /// degenerate, or `depth` exceeds `max_depth`.
  pub fn descend(&self, point: Vec3, depth: u8) -> Option<NodeId> {
    let root = self.nodes.first()?;
    if depth > self.max_depth || root.bounds.is_degenerate() || !root.bounds.contains_point(point) {
      return None;
    }
    let mut node = root;
    while node.depth < depth {
      let child = node.child(node.bounds.octant_of(point))?;
      node = self.get(child)?;
    }
    Some(node.id)
  }

  /// Verify the structural invariants of a complete octree.
  ///
  /// Checks ids, parent/child links, child counts, node count and that each
  /// internal node's items are partitioned exactly across its children.
  pub fn validate(&self) -> Result<(), PipelineError> {
    let inconsistent = |node: NodeId, reason: String| PipelineError::InconsistentTree { node, reason };

    if self.nodes.is_empty() {
      return Err(inconsistent(NodeId::ROOT, "tree has no nodes".into()));
    }
    let expected = complete_node_count(self.max_depth);
    if self.nodes.len() != expected {
      return Err(inconsistent(
        NodeId::ROOT,
        format!("expected {} nodes, found {}", expected, self.nodes.len()),
      ));
    }

    for (idx, node) in self.nodes.iter().enumerate() {
      if node.id.index() != idx {
        return Err(inconsistent(node.id, format!("stored at index {}", idx)));
      }

      match node.parent {
        None if node.id != NodeId::ROOT || node.depth != 0 => {
          return Err(inconsistent(node.id, "non-root node without parent".into()));
        }
        Some(_) if node.id == NodeId::ROOT => {
          return Err(inconsistent(node.id, "root has a parent".into()));
        }
        Some(parent_id) => {
          let parent = self
            .get(parent_id)
            .ok_or_else(|| inconsistent(node.id, format!("missing parent {}", parent_id)))?;
          if parent.depth + 1 != node.depth || !parent.children.contains(&node.id) {
            return Err(inconsistent(node.id, format!("broken link to parent {}", parent_id)));
          }
        }
        None => {}
      }

      let expected_children = if node.depth < self.max_depth { 8 } else { 0 };
      if node.children.len() != expected_children {
        return Err(inconsistent(
          node.id,
          format!("expected {} children, found {}", expected_children, node.children.len()),
        ));
      }
      if node.is_leaf() {
        continue;
      }

      let mut union = BTreeSet::new();
      let mut total = 0usize;
      for &child_id in &node.children {
        let child = self
          .get(child_id)
          .ok_or_else(|| inconsistent(node.id, format!("missing child {}", child_id)))?;
        if child.parent != Some(node.id) {
          return Err(inconsistent(child_id, format!("parent link does not point at {}", node.id)));
        }
        total += child.item_ids.len();
        union.extend(child.item_ids.iter().copied());
      }
      if total != union.len() {
        return Err(inconsistent(node.id, "item assigned to more than one child".into()));
      }
      if union != node.item_ids {
        return Err(inconsistent(
          node.id,
          format!(
            "children hold {} items, node holds {}",
            union.len(),
            node.item_ids.len()
          ),
        ));
      }
    }

    Ok(())
  }

  #[cfg(test)]
  pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut SpatialNode> {
    self.nodes.get_mut(id.index())
  }
}

/// Iterator over a node's ancestor chain.
pub struct Ancestors<'a> {
  tree: &'a SpatialTree,
  next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
  type Item = NodeId;

  fn next(&mut self) -> Option<NodeId> {
    let current = self.next?;
    self.next = self.tree.parent(current);
    Some(current)
  }
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;

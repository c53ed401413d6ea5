use super::*;

fn unit_node() -> SpatialNode {
  SpatialNode::new(NodeId(3), 2, Aabb3::new(Vec3::ZERO, Vec3::splat(2.0)), Some(NodeId(2)))
}

/// A freshly created node has no children and no items.
#[test]
fn test_new_node_is_empty_leaf() {
  let node = unit_node();
  assert!(node.is_leaf());
  assert!(!node.is_root());
  assert!(node.item_ids.is_empty());
  assert_eq!(node.center(), Vec3::ONE);
}

/// Children are addressed by octant index.
#[test]
fn test_child_by_octant() {
  let mut node = unit_node();
  node.children.extend((10..18).map(NodeId));

  for octant in 0u8..8 {
    assert_eq!(node.child(octant), Some(NodeId(10 + octant as u32)));
  }
  assert_eq!(node.child(8), None);
}

/// Item sets iterate in id order regardless of insertion order.
#[test]
fn test_item_ids_are_ordered() {
  let mut node = unit_node();
  node.item_ids.insert(ItemId(9));
  node.item_ids.insert(ItemId(1));
  node.item_ids.insert(ItemId(4));

  let ids: Vec<_> = node.item_ids.iter().map(|id| id.0).collect();
  assert_eq!(ids, vec![1, 4, 9]);
}

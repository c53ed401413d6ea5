//! Octree module: the fixed-depth spatial index.
//!
//! Unlike a refinement octree, this tree is complete: every node above the
//! maximum depth has exactly eight children, empty or not.
//!
//! # Depth Convention
//!
//! Depth 0 = root (coarsest, whole world), `max_depth` = finest cells.
//!
//! ```text
//! Cell Size = world_size / 2^depth
//! ```
//!
//! # Module Structure
//!
//! - [`bounds`]: `Aabb3` - boxes and the octant split rule
//! - [`node`]: `SpatialNode` - one cell with its item set
//! - [`tree`]: `SpatialTree` - pre-order arena, ancestor walks, validation
//! - [`builder`]: `build` - construction from item centers

pub mod bounds;
pub mod builder;
pub mod node;
pub mod tree;

// Re-exports
pub use bounds::Aabb3;
pub use builder::{bounds_of, build};
pub use node::SpatialNode;
pub use tree::{complete_node_count, Ancestors, SpatialTree, DEFAULT_MAX_DEPTH};

//! Content classification: screen coverage -> size category -> target depth.
//!
//! Visually dominant items go to coarse, shallow cells so they stay loaded
//! from far away; minor items go to the finest cells.

use glam::Vec3;

use crate::octree::Aabb3;
use crate::types::{ContentItem, SizeCategory};

/// Coverage at or above which an item is `Large`.
pub const LARGE_COVERAGE: f32 = 1.0;
/// Coverage at or above which an item is `Medium`.
pub const MEDIUM_COVERAGE: f32 = 0.3;

impl SizeCategory {
  /// Category for a coverage value. Negative or NaN coverage is `Small`.
  pub fn from_coverage(coverage: f32) -> Self {
    if coverage >= LARGE_COVERAGE {
      SizeCategory::Large
    } else if coverage >= MEDIUM_COVERAGE {
      SizeCategory::Medium
    } else {
      SizeCategory::Small
    }
  }

  /// Tree depth this category is placed at: Large 2, Medium 3, Small 4.
  #[inline]
  pub fn target_depth(self) -> u8 {
    match self {
      SizeCategory::Large => 2,
      SizeCategory::Medium => 3,
      SizeCategory::Small => 4,
    }
  }
}

/// Category of an item.
#[inline]
pub fn classify(item: &ContentItem) -> SizeCategory {
  SizeCategory::from_coverage(item.screen_coverage)
}

/// Target depth of a category, clamped to the depth of the tree.
#[inline]
pub fn target_depth(category: SizeCategory, max_depth: u8) -> u8 {
  category.target_depth().min(max_depth)
}

/// External importance metric consumed by classification.
///
/// Returns a non-negative scalar approximating the fraction of the viewport
/// an item would cover.
pub trait ImportanceMetric: Send + Sync {
  fn coverage(&self, bounds: &Aabb3, viewpoint: Vec3, render_width: f32) -> f32;
}

/// Projects the bounding sphere of an item and compares the disc to the
/// viewport.
#[derive(Clone, Copy, Debug)]
pub struct ProjectedSphereCoverage {
  /// Vertical field of view in radians.
  pub vertical_fov: f32,
  /// Viewport width / height.
  pub aspect: f32,
  /// Projected diameters below this many pixels count as zero coverage.
  pub min_pixels: f32,
}

impl Default for ProjectedSphereCoverage {
  fn default() -> Self {
    Self {
      vertical_fov: 60f32.to_radians(),
      aspect: 16.0 / 9.0,
      min_pixels: 1.0,
    }
  }
}

impl ImportanceMetric for ProjectedSphereCoverage {
  fn coverage(&self, bounds: &Aabb3, viewpoint: Vec3, render_width: f32) -> f32 {
    if !bounds.is_valid() || render_width <= 0.0 {
      return 0.0;
    }
    let radius = bounds.bounding_radius();
    // Inside the sphere the disc fills the view; clamp so it stays finite
    let distance = viewpoint.distance(bounds.center()).max(radius).max(f32::EPSILON);

    let render_height = render_width / self.aspect;
    let half_height_px = render_height * 0.5;
    let radius_px = radius / (distance * (self.vertical_fov * 0.5).tan()) * half_height_px;

    if radius_px * 2.0 < self.min_pixels {
      return 0.0;
    }
    std::f32::consts::PI * radius_px * radius_px / (render_width * render_height)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::item_at;

  #[test]
  fn test_category_thresholds() {
    assert_eq!(SizeCategory::from_coverage(1.0), SizeCategory::Large);
    assert_eq!(SizeCategory::from_coverage(7.5), SizeCategory::Large);
    assert_eq!(SizeCategory::from_coverage(0.99), SizeCategory::Medium);
    assert_eq!(SizeCategory::from_coverage(0.3), SizeCategory::Medium);
    assert_eq!(SizeCategory::from_coverage(0.29), SizeCategory::Small);
    assert_eq!(SizeCategory::from_coverage(0.0), SizeCategory::Small);
  }

  #[test]
  fn test_negative_and_nan_are_small() {
    assert_eq!(SizeCategory::from_coverage(-2.0), SizeCategory::Small);
    assert_eq!(SizeCategory::from_coverage(f32::NAN), SizeCategory::Small);
  }

  #[test]
  fn test_target_depths() {
    assert_eq!(SizeCategory::Large.target_depth(), 2);
    assert_eq!(SizeCategory::Medium.target_depth(), 3);
    assert_eq!(SizeCategory::Small.target_depth(), 4);
    assert_eq!(target_depth(SizeCategory::Small, 3), 3);
  }

  #[test]
  fn test_medium_example() {
    let item = item_at(1, Vec3::ZERO, 1.0, 0.5);
    let category = classify(&item);
    assert_eq!(category, SizeCategory::Medium);
    assert_eq!(target_depth(category, 4), 3);
  }

  #[test]
  fn test_projected_coverage_shrinks_with_distance() {
    let metric = ProjectedSphereCoverage::default();
    let bounds = Aabb3::from_center_half_extents(Vec3::ZERO, Vec3::splat(1.0));

    let near = metric.coverage(&bounds, Vec3::new(0.0, 0.0, 5.0), 1920.0);
    let far = metric.coverage(&bounds, Vec3::new(0.0, 0.0, 50.0), 1920.0);
    assert!(near > far);
    assert!(far > 0.0);
  }

  #[test]
  fn test_projected_coverage_inside_is_large() {
    let metric = ProjectedSphereCoverage::default();
    let bounds = Aabb3::from_center_half_extents(Vec3::ZERO, Vec3::splat(10.0));
    let inside = metric.coverage(&bounds, Vec3::ZERO, 1920.0);
    assert!(inside.is_finite());
    assert!(inside >= LARGE_COVERAGE);
  }

  #[test]
  fn test_projected_coverage_subpixel_is_zero() {
    let metric = ProjectedSphereCoverage::default();
    let bounds = Aabb3::from_center_half_extents(Vec3::ZERO, Vec3::splat(0.01));
    assert_eq!(metric.coverage(&bounds, Vec3::new(0.0, 0.0, 10_000.0), 1920.0), 0.0);
  }
}

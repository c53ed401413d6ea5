//! Axis-aligned bounding box used for world bounds, node cells and item boxes.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Single-precision axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb3 {
	/// Minimum corner (inclusive).
	pub min: Vec3,
	/// Maximum corner (inclusive).
	pub max: Vec3,
}

impl Aabb3 {
	/// Create a new AABB from min and max corners.
	///
	/// # Panics
	/// Debug-asserts that min <= max on all axes.
	pub fn new(min: Vec3, max: Vec3) -> Self {
		debug_assert!(
			min.x <= max.x && min.y <= max.y && min.z <= max.z,
			"AABB min must be <= max on all axes"
		);
		Self { min, max }
	}

	/// Create a new AABB from center and half-extents.
	pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
		Self {
			min: center - half_extents,
			max: center + half_extents,
		}
	}

	/// Bounding box of a flat `[x, y, z, x, y, z, ..]` buffer.
	///
	/// Returns `None` for an empty buffer.
	pub fn from_flat_points(points: &[f32]) -> Option<Self> {
		let mut chunks = points.chunks_exact(3);
		let first = chunks.next().map(Vec3::from_slice)?;
		let mut aabb = Self {
			min: first,
			max: first,
		};
		for p in chunks {
			aabb.encapsulate(Vec3::from_slice(p));
		}
		Some(aabb)
	}

	/// Grow the box to include `point`.
	#[inline]
	pub fn encapsulate(&mut self, point: Vec3) {
		self.min = self.min.min(point);
		self.max = self.max.max(point);
	}

	/// Smallest box containing both boxes.
	#[inline]
	pub fn union(&self, other: &Aabb3) -> Aabb3 {
		Aabb3 {
			min: self.min.min(other.min),
			max: self.max.max(other.max),
		}
	}

	/// Check if this AABB overlaps with another.
	///
	/// Two AABBs overlap if they share any interior or boundary points.
	#[inline]
	pub fn overlaps(&self, other: &Aabb3) -> bool {
		self.min.x <= other.max.x
			&& self.max.x >= other.min.x
			&& self.min.y <= other.max.y
			&& self.max.y >= other.min.y
			&& self.min.z <= other.max.z
			&& self.max.z >= other.min.z
	}

	/// Check if this AABB contains a point (boundary inclusive).
	#[inline]
	pub fn contains_point(&self, point: Vec3) -> bool {
		point.x >= self.min.x
			&& point.x <= self.max.x
			&& point.y >= self.min.y
			&& point.y <= self.max.y
			&& point.z >= self.min.z
			&& point.z <= self.max.z
	}

	/// Get the size of the AABB (max - min).
	#[inline]
	pub fn size(&self) -> Vec3 {
		self.max - self.min
	}

	/// Get the center of the AABB.
	#[inline]
	pub fn center(&self) -> Vec3 {
		(self.min + self.max) * 0.5
	}

	/// Radius of the sphere through all eight corners.
	#[inline]
	pub fn bounding_radius(&self) -> f32 {
		self.size().length() * 0.5
	}

	/// True when min == max on every axis.
	#[inline]
	pub fn is_degenerate(&self) -> bool {
		self.min == self.max
	}

	/// Finite corners with min <= max on every axis.
	#[inline]
	pub fn is_valid(&self) -> bool {
		self.min.is_finite() && self.max.is_finite() && self.min.cmple(self.max).all()
	}

	/// Octant of `point` relative to this box's midpoint.
	///
	/// Bits: X (bit 0), Y (bit 1), Z (bit 2). A coordinate exactly on a split
	/// plane belongs to the low half, so the low octant is closed on both sides
	/// and every high half is open toward the center. Each point therefore maps
	/// to exactly one octant.
	#[inline]
	pub fn octant_of(&self, point: Vec3) -> u8 {
		let mid = self.center();
		(point.x > mid.x) as u8 | ((point.y > mid.y) as u8) << 1 | ((point.z > mid.z) as u8) << 2
	}

	/// Bounds of one of the eight octants (same bit layout as [`Self::octant_of`]).
	pub fn octant_bounds(&self, octant: u8) -> Aabb3 {
		let mid = self.center();
		let pick = |bit: u8, lo: f32, m: f32, hi: f32| {
			if octant & bit == 0 {
				(lo, m)
			} else {
				(m, hi)
			}
		};
		let (min_x, max_x) = pick(1, self.min.x, mid.x, self.max.x);
		let (min_y, max_y) = pick(2, self.min.y, mid.y, self.max.y);
		let (min_z, max_z) = pick(4, self.min.z, mid.z, self.max.z);
		Aabb3 {
			min: Vec3::new(min_x, min_y, min_z),
			max: Vec3::new(max_x, max_y, max_z),
		}
	}

	/// Axis-aligned box around this box after applying `transform`.
	pub fn transformed(&self, transform: &Mat4) -> Aabb3 {
		let first = transform.transform_point3(self.min);
		let mut out = Aabb3 {
			min: first,
			max: first,
		};
		for i in 1..8u8 {
			let corner = Vec3::new(
				if i & 1 == 0 { self.min.x } else { self.max.x },
				if i & 2 == 0 { self.min.y } else { self.max.y },
				if i & 4 == 0 { self.min.z } else { self.max.z },
			);
			out.encapsulate(transform.transform_point3(corner));
		}
		out
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_new() {
		let aabb = Aabb3::new(Vec3::new(-1.0, -2.0, -3.0), Vec3::new(1.0, 2.0, 3.0));
		assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, -3.0));
		assert_eq!(aabb.max, Vec3::new(1.0, 2.0, 3.0));
	}

	#[test]
	fn test_from_center_half_extents() {
		let aabb = Aabb3::from_center_half_extents(Vec3::ZERO, Vec3::splat(10.0));
		assert_eq!(aabb.min, Vec3::splat(-10.0));
		assert_eq!(aabb.max, Vec3::splat(10.0));
	}

	#[test]
	fn test_overlaps_touching() {
		// Touching at boundary should count as overlapping
		let a = Aabb3::new(Vec3::ZERO, Vec3::splat(10.0));
		let b = Aabb3::new(Vec3::splat(10.0), Vec3::splat(20.0));
		assert!(a.overlaps(&b));
		assert!(b.overlaps(&a));
	}

	#[test]
	fn test_overlaps_false() {
		let a = Aabb3::new(Vec3::ZERO, Vec3::splat(10.0));
		let b = Aabb3::new(Vec3::new(11.0, 0.0, 0.0), Vec3::splat(20.0));
		assert!(!a.overlaps(&b));
		assert!(!b.overlaps(&a));
	}

	#[test]
	fn test_contains_point() {
		let aabb = Aabb3::new(Vec3::ZERO, Vec3::splat(10.0));
		assert!(aabb.contains_point(Vec3::splat(5.0)));
		assert!(aabb.contains_point(Vec3::ZERO));
		assert!(aabb.contains_point(Vec3::splat(10.0)));
		assert!(!aabb.contains_point(Vec3::splat(-1.0)));
	}

	#[test]
	fn test_octant_of_split_plane_goes_low() {
		let aabb = Aabb3::new(Vec3::ZERO, Vec3::splat(10.0));
		assert_eq!(aabb.octant_of(Vec3::splat(5.0)), 0);
		assert_eq!(aabb.octant_of(Vec3::new(5.0001, 5.0, 5.0)), 1);
		assert_eq!(aabb.octant_of(Vec3::new(5.0, 7.0, 5.0)), 2);
		assert_eq!(aabb.octant_of(Vec3::new(9.0, 9.0, 9.0)), 7);
	}

	#[test]
	fn test_octant_bounds_tile_parent() {
		let aabb = Aabb3::new(Vec3::new(-4.0, 0.0, 2.0), Vec3::new(4.0, 8.0, 10.0));
		let mut volume = 0.0;
		for octant in 0..8u8 {
			let child = aabb.octant_bounds(octant);
			let size = child.size();
			volume += size.x * size.y * size.z;
			// Child center must map back to the same octant
			assert_eq!(aabb.octant_of(child.center()), octant);
		}
		let size = aabb.size();
		assert!((volume - size.x * size.y * size.z).abs() < 1e-3);
	}

	#[test]
	fn test_degenerate_and_valid() {
		let point = Aabb3::new(Vec3::ONE, Vec3::ONE);
		assert!(point.is_degenerate());
		assert!(point.is_valid());

		let broken = Aabb3 {
			min: Vec3::splat(f32::NAN),
			max: Vec3::ONE,
		};
		assert!(!broken.is_valid());
	}

	#[test]
	fn test_transformed_translation() {
		let aabb = Aabb3::new(Vec3::ZERO, Vec3::ONE);
		let moved = aabb.transformed(&Mat4::from_translation(Vec3::new(5.0, 0.0, -2.0)));
		assert_eq!(moved.min, Vec3::new(5.0, 0.0, -2.0));
		assert_eq!(moved.max, Vec3::new(6.0, 1.0, -1.0));
	}

	#[test]
	fn test_center_and_radius() {
		let aabb = Aabb3::new(Vec3::new(-1.0, -2.0, -2.0), Vec3::new(1.0, 2.0, 2.0));
		assert_eq!(aabb.center(), Vec3::ZERO);
		assert!((aabb.bounding_radius() - 3.0).abs() < 1e-6);
	}
}

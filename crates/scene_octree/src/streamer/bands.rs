//! Distance bands mapping camera distance to the tree depth shown.
//!
//! ```text
//! 0 ──────── near ─────────────── far ─────────── max
//! │  depth 4  │      depth 3       │    depth 2    │  nothing
//!           ±h                   ±h              ±h
//! ```
//!
//! `near = 0.3 * max`, `far = 0.8 * max`, `h = 0.03 * max`. A node that is
//! already desired keeps its band widened by `h` on both sides, so a camera
//! hovering at a threshold does not toggle it every tick.

/// Fraction of `max_distance` where depth 4 gives way to depth 3.
pub const NEAR_FRACTION: f32 = 0.3;
/// Fraction of `max_distance` where depth 3 gives way to depth 2.
pub const FAR_FRACTION: f32 = 0.8;
/// Hysteresis as a fraction of `max_distance`.
pub const HYSTERESIS_FRACTION: f32 = 0.03;

/// Depth shown close to the camera.
pub const NEAR_DEPTH: u8 = 4;
pub const MID_DEPTH: u8 = 3;
/// Depth shown far from the camera.
pub const FAR_DEPTH: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LodBands {
  pub max_distance: f32,
  pub near: f32,
  pub far: f32,
  pub hysteresis: f32,
}

impl LodBands {
  pub fn new(max_distance: f32) -> Self {
    let max_distance = max_distance.max(0.0);
    Self {
      max_distance,
      near: max_distance * NEAR_FRACTION,
      far: max_distance * FAR_FRACTION,
      hysteresis: max_distance * HYSTERESIS_FRACTION,
    }
  }

  /// Distance range `[low, high)` of a depth; depth 2 also includes `high`.
  pub fn range(&self, depth: u8) -> Option<(f32, f32)> {
    match depth {
      NEAR_DEPTH => Some((0.0, self.near)),
      MID_DEPTH => Some((self.near, self.far)),
      FAR_DEPTH => Some((self.far, self.max_distance)),
      _ => None,
    }
  }

  /// Depth whose band holds `distance`, ignoring hysteresis.
  pub fn depth_for(&self, distance: f32) -> Option<u8> {
    [NEAR_DEPTH, MID_DEPTH, FAR_DEPTH]
      .into_iter()
      .find(|&depth| self.contains(depth, distance, 0.0))
  }

  /// Should a node at `depth` be shown at `distance`?
  ///
  /// `desired` is whether the node was wanted on the previous tick.
  pub fn wants(&self, depth: u8, distance: f32, desired: bool) -> bool {
    let slack = if desired { self.hysteresis } else { 0.0 };
    self.contains(depth, distance, slack)
  }

  /// Band after moving to `distance`, given the band held before.
  pub fn next_band(&self, current: Option<u8>, distance: f32) -> Option<u8> {
    match current {
      Some(depth) if self.wants(depth, distance, true) => Some(depth),
      _ => self.depth_for(distance),
    }
  }

  fn contains(&self, depth: u8, distance: f32, slack: f32) -> bool {
    let Some((low, high)) = self.range(depth) else {
      return false;
    };
    if !distance.is_finite() {
      return false;
    }
    let above_low = distance >= low - slack;
    let below_high = if depth == FAR_DEPTH {
      distance <= high + slack
    } else {
      distance < high + slack
    };
    above_low && below_high
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_thresholds_from_max_distance() {
    let bands = LodBands::new(1000.0);
    assert!((bands.near - 300.0).abs() < 1e-3);
    assert!((bands.far - 800.0).abs() < 1e-3);
    assert!((bands.hysteresis - 30.0).abs() < 1e-3);
  }

  #[test]
  fn test_plain_bands() {
    let bands = LodBands::new(1000.0);
    assert_eq!(bands.depth_for(0.0), Some(4));
    assert_eq!(bands.depth_for(299.9), Some(4));
    assert_eq!(bands.depth_for(300.0), Some(3));
    assert_eq!(bands.depth_for(799.9), Some(3));
    assert_eq!(bands.depth_for(800.0), Some(2));
    assert_eq!(bands.depth_for(1000.0), Some(2));
    assert_eq!(bands.depth_for(1000.1), None);
    assert_eq!(bands.depth_for(f32::NAN), None);
  }

  /// Depth 3 node at 350 is shown; at 250 it is not, and depth 4 takes over.
  #[test]
  fn test_example_scenario() {
    let bands = LodBands::new(1000.0);
    assert!(bands.wants(3, 350.0, false));
    assert!(!bands.wants(3, 250.0, true));
    assert!(bands.wants(4, 250.0, false));
  }

  #[test]
  fn test_hysteresis_keeps_desired_node() {
    let bands = LodBands::new(1000.0);
    // Just inside the depth 4 side of the near threshold
    assert!(!bands.wants(3, 290.0, false));
    assert!(bands.wants(3, 290.0, true));
    assert!(!bands.wants(3, 269.0, true));

    assert!(bands.wants(2, 1020.0, true));
    assert!(!bands.wants(2, 1020.0, false));
  }

  /// Moving away, the band only ever gets coarser, and each switch happens
  /// past threshold + hysteresis.
  #[test]
  fn test_band_monotonic_moving_away() {
    let bands = LodBands::new(1000.0);
    let mut band = bands.next_band(None, 0.0);
    let mut switches = Vec::new();

    let mut distance = 0.0f32;
    while distance < 1200.0 {
      let next = bands.next_band(band, distance);
      let rank = |b: Option<u8>| b.map_or(0, |d| d as i32);
      assert!(rank(next) <= rank(band), "band went finer at {}", distance);
      if next != band {
        switches.push((band, next, distance));
      }
      band = next;
      distance += 0.5;
    }

    assert_eq!(switches.len(), 3);
    assert_eq!(switches[0].0, Some(4));
    assert!(switches[0].2 >= bands.near + bands.hysteresis);
    assert!(switches[1].2 >= bands.far + bands.hysteresis);
    assert!(switches[2].2 > bands.max_distance + bands.hysteresis);
    assert_eq!(switches[2].1, None);
  }

  #[test]
  fn test_unknown_depth_is_never_wanted() {
    let bands = LodBands::new(1000.0);
    assert!(!bands.wants(1, 10.0, true));
    assert!(!bands.wants(5, 10.0, true));
  }
}

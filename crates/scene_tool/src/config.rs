//! Configuration parsing for scene ingestion and streaming.

use anyhow::{Context, Result};
use glam::Vec3;
use scene_octree::{Aabb3, ChunkFailurePolicy, DispatchConfig, EvictionPolicy, IngestConfig, StreamerConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
	/// Store directory, relative to the config file.
	pub store_dir: PathBuf,
	#[serde(default)]
	pub octree: OctreeSection,
	#[serde(default)]
	pub dispatch: DispatchSection,
	#[serde(default)]
	pub streaming: StreamingSection,
}

/// Tree construction and mesh writing.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OctreeSection {
	pub max_depth: u8,
	/// World box corners. Both or neither; omitted means the union of item boxes.
	pub world_min: Option<[f32; 3]>,
	pub world_max: Option<[f32; 3]>,
	/// Meshes per write transaction.
	pub write_batch_size: usize,
}

impl Default for OctreeSection {
	fn default() -> Self {
		let defaults = IngestConfig::default();
		Self {
			max_depth: defaults.max_depth,
			world_min: None,
			world_max: None,
			write_batch_size: defaults.write_batch_size,
		}
	}
}

/// Overlap resolution work splitting.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
	pub chunk_size: usize,
	/// Item count from which chunks run inline instead of on workers.
	pub worker_item_limit: usize,
	pub chunk_timeout_secs: u64,
	/// Extra attempts for a failed chunk (0 = abort on first failure).
	pub retry_attempts: u32,
}

impl Default for DispatchSection {
	fn default() -> Self {
		let defaults = DispatchConfig::default();
		Self {
			chunk_size: defaults.chunk_size,
			worker_item_limit: defaults.worker_item_limit,
			chunk_timeout_secs: defaults.chunk_timeout.as_secs(),
			retry_attempts: 0,
		}
	}
}

/// Eviction as written in TOML: `"retain"`, `{ hidden_for_ms = 5000 }` or
/// `{ max_hidden = 32 }`.
#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionSection {
	#[default]
	Retain,
	HiddenForMs(u64),
	MaxHidden(usize),
}

/// Runtime streaming and the headless camera walk.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StreamingSection {
	pub max_distance: f32,
	pub min_tick_interval_ms: u64,
	pub cache_capacity: usize,
	pub max_concurrent_loads: usize,
	pub prefetch_lookahead_ms: u64,
	pub prefetch_tolerance: f32,
	pub eviction: EvictionSection,
	/// Waypoints the camera visits in order.
	pub camera_path: Vec<[f32; 3]>,
	/// Camera speed along the path, units per second.
	pub camera_speed: f32,
}

impl Default for StreamingSection {
	fn default() -> Self {
		let defaults = StreamerConfig::default();
		Self {
			max_distance: defaults.max_distance,
			min_tick_interval_ms: defaults.min_tick_interval.as_millis() as u64,
			cache_capacity: defaults.cache_capacity,
			max_concurrent_loads: defaults.max_concurrent_loads,
			prefetch_lookahead_ms: defaults.prefetch_lookahead.as_millis() as u64,
			prefetch_tolerance: defaults.prefetch_tolerance,
			eviction: EvictionSection::Retain,
			camera_path: Vec::new(),
			camera_speed: 100.0,
		}
	}
}

impl Config {
	/// Load configuration from a TOML file.
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)
			.with_context(|| format!("Failed to read config file: {}", path.display()))?;
		let config = Self::parse(&content)?;

		if let Some(parent) = path.parent() {
			return Ok(Self {
				store_dir: parent.join(&config.store_dir),
				..config
			});
		}
		Ok(config)
	}

	/// Parse and validate TOML text.
	pub fn parse(content: &str) -> Result<Self> {
		let config: Config =
			toml::from_str(content).with_context(|| "Failed to parse config TOML")?;

		if !(2..=8).contains(&config.octree.max_depth) {
			anyhow::bail!(
				"octree.max_depth must be within 2..=8, got {}",
				config.octree.max_depth
			);
		}
		if config.octree.world_min.is_some() != config.octree.world_max.is_some() {
			anyhow::bail!("octree.world_min and octree.world_max must be given together");
		}
		if let (Some(min), Some(max)) = (config.octree.world_min, config.octree.world_max) {
			if let Some(axis) = (0..3).find(|&i| min[i].is_nan() || max[i].is_nan() || min[i] > max[i]) {
				anyhow::bail!(
					"octree.world_min must not exceed octree.world_max, axis {} has {} > {}",
					axis,
					min[axis],
					max[axis]
				);
			}
		}
		if config.octree.write_batch_size == 0 {
			anyhow::bail!("octree.write_batch_size must be positive");
		}
		if config.dispatch.chunk_size == 0 {
			anyhow::bail!("dispatch.chunk_size must be positive");
		}
		if config.streaming.max_distance.is_nan() || config.streaming.max_distance <= 0.0 {
			anyhow::bail!(
				"streaming.max_distance must be positive, got {}",
				config.streaming.max_distance
			);
		}
		if config.streaming.max_concurrent_loads == 0 {
			anyhow::bail!("streaming.max_concurrent_loads must be positive");
		}

		Ok(config)
	}

	pub fn ingest_config(&self) -> IngestConfig {
		let world_bounds = match (self.octree.world_min, self.octree.world_max) {
			(Some(min), Some(max)) => Some(Aabb3::new(Vec3::from(min), Vec3::from(max))),
			_ => None,
		};
		IngestConfig {
			max_depth: self.octree.max_depth,
			world_bounds,
			write_batch_size: self.octree.write_batch_size,
			dispatch: self.dispatch_config(),
			..Default::default()
		}
	}

	pub fn dispatch_config(&self) -> DispatchConfig {
		let failure_policy = match self.dispatch.retry_attempts {
			0 => ChunkFailurePolicy::Abort,
			attempts => ChunkFailurePolicy::Retry { attempts },
		};
		DispatchConfig {
			chunk_size: self.dispatch.chunk_size,
			worker_item_limit: self.dispatch.worker_item_limit,
			chunk_timeout: Duration::from_secs(self.dispatch.chunk_timeout_secs),
			failure_policy,
		}
	}

	pub fn streamer_config(&self) -> StreamerConfig {
		let s = &self.streaming;
		let eviction = match s.eviction {
			EvictionSection::Retain => EvictionPolicy::Retain,
			EvictionSection::HiddenForMs(ms) => EvictionPolicy::HiddenFor(Duration::from_millis(ms)),
			EvictionSection::MaxHidden(count) => EvictionPolicy::MaxHidden(count),
		};
		StreamerConfig {
			max_distance: s.max_distance,
			min_tick_interval: Duration::from_millis(s.min_tick_interval_ms),
			cache_capacity: s.cache_capacity,
			max_concurrent_loads: s.max_concurrent_loads,
			prefetch_lookahead: Duration::from_millis(s.prefetch_lookahead_ms),
			prefetch_tolerance: s.prefetch_tolerance,
			eviction,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_minimal_config_uses_defaults() {
		let config = Config::parse(r#"store_dir = "store""#).unwrap();
		assert_eq!(config.octree.max_depth, 4);
		assert_eq!(config.dispatch_config(), DispatchConfig::default());
		assert_eq!(config.streamer_config(), StreamerConfig::default());
		assert_eq!(config.ingest_config().world_bounds, None);
	}

	#[test]
	fn test_full_config() {
		let config = Config::parse(
			r#"
			store_dir = "store"

			[octree]
			max_depth = 5
			world_min = [0.0, 0.0, 0.0]
			world_max = [512.0, 512.0, 512.0]

			[dispatch]
			chunk_size = 250
			retry_attempts = 2

			[streaming]
			max_distance = 400.0
			eviction = { hidden_for_ms = 1500 }
			camera_path = [[0.0, 10.0, 0.0], [500.0, 10.0, 500.0]]
			"#,
		)
		.unwrap();

		let ingest = config.ingest_config();
		assert_eq!(ingest.max_depth, 5);
		assert_eq!(
			ingest.world_bounds,
			Some(Aabb3::new(Vec3::ZERO, Vec3::splat(512.0)))
		);
		assert_eq!(ingest.dispatch.chunk_size, 250);
		assert_eq!(
			ingest.dispatch.failure_policy,
			ChunkFailurePolicy::Retry { attempts: 2 }
		);

		let streamer = config.streamer_config();
		assert_eq!(streamer.max_distance, 400.0);
		assert_eq!(
			streamer.eviction,
			EvictionPolicy::HiddenFor(Duration::from_millis(1500))
		);
		assert_eq!(config.streaming.camera_path.len(), 2);
	}

	#[test]
	fn test_invalid_values_rejected() {
		assert!(Config::parse("store_dir = \"s\"\n[octree]\nmax_depth = 1").is_err());
		assert!(Config::parse("store_dir = \"s\"\n[octree]\nmax_depth = 9").is_err());
		assert!(Config::parse("store_dir = \"s\"\n[dispatch]\nchunk_size = 0").is_err());
		assert!(Config::parse("store_dir = \"s\"\n[streaming]\nmax_distance = 0.0").is_err());
		assert!(Config::parse("store_dir = \"s\"\n[octree]\nworld_min = [0.0, 0.0, 0.0]").is_err());
	}

	#[test]
	fn test_inverted_world_box_rejected() {
		let inverted = r#"
			store_dir = "s"
			[octree]
			world_min = [0.0, 600.0, 0.0]
			world_max = [512.0, 512.0, 512.0]
		"#;
		let err = Config::parse(inverted).unwrap_err();
		assert!(err.to_string().contains("axis 1"));

		let flat = r#"
			store_dir = "s"
			[octree]
			world_min = [0.0, 0.0, 5.0]
			world_max = [512.0, 512.0, 5.0]
		"#;
		assert!(Config::parse(flat).is_ok());
	}
}

//! Scene octree tool.
//!
//! Drives a file-backed store through the offline and runtime stages:
//! - generate: write a synthetic scene of cube items (for trying things out)
//! - import: load stored items from a JSON file
//! - ingest: build the tree, resolve overlaps, write batched meshes
//! - stream: walk a camera path through a headless scene

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glam::{Mat4, Quat, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scene_octree::{
	import_items, load_tree, Aabb3, ContentItem, FileStore, HeadlessScene, ImportanceMetric, IngestPipeline,
	ItemGeometry, ItemId, LodStreamer, ProjectedSphereCoverage, StoredItem,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use web_time::Instant;

use config::Config;

/// Offline ingestion and headless streaming for scene stores.
#[derive(Parser, Debug)]
#[command(name = "scene_tool")]
#[command(about = "Builds and streams batched scene octrees")]
struct Args {
	/// Path to configuration TOML file.
	#[arg(short, long)]
	config: PathBuf,

	/// Log at debug level.
	#[arg(short, long)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Write a synthetic scene of randomly placed cubes.
	Generate {
		#[arg(long, default_value_t = 1000)]
		count: usize,
		#[arg(long, default_value_t = 1)]
		seed: u64,
		/// Side length of the cube the items are scattered in.
		#[arg(long, default_value_t = 1024.0)]
		extent: f32,
		/// Point screen coverage is measured from, as `x,y,z`. Defaults to the scene center.
		#[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
		viewpoint: Option<Vec<f32>>,
		/// Viewport width in pixels for screen coverage.
		#[arg(long, default_value_t = 1920.0)]
		render_width: f32,
	},
	/// Import stored items from a JSON array.
	Import {
		#[arg(short, long)]
		input: PathBuf,
	},
	/// Build the tree and batched meshes from the stored items.
	Ingest,
	/// Walk the configured camera path and report streaming statistics.
	Stream,
}

fn main() -> Result<()> {
	let args = Args::parse();

	let subscriber = FmtSubscriber::builder()
		.with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
		.finish();
	tracing::subscriber::set_global_default(subscriber)
		.context("Failed to install log subscriber")?;

	let config = Config::load(&args.config)?;
	info!(store = %config.store_dir.display(), "opening store");
	let store = Arc::new(
		FileStore::open(&config.store_dir)
			.with_context(|| format!("Failed to open store: {}", config.store_dir.display()))?,
	);

	match args.command {
		Command::Generate {
			count,
			seed,
			extent,
			viewpoint,
			render_width,
		} => {
			let position = match viewpoint.as_deref() {
				None => Vec3::splat(extent * 0.5),
				Some(&[x, y, z]) => Vec3::new(x, y, z),
				Some(other) => anyhow::bail!("--viewpoint takes three values, got {}", other.len()),
			};
			let view = Viewpoint {
				position,
				render_width,
			};
			let items = synthetic_scene(count, seed, extent, &ProjectedSphereCoverage::default(), view);
			let written = import_items(store.as_ref(), &items, config.octree.write_batch_size)
				.context("Writing generated items")?;
			info!(written, "generated scene");
		}
		Command::Import { input } => {
			let content = std::fs::read_to_string(&input)
				.with_context(|| format!("Failed to read items: {}", input.display()))?;
			let items: Vec<StoredItem> =
				serde_json::from_str(&content).context("Failed to parse items JSON")?;
			let written = import_items(store.as_ref(), &items, config.octree.write_batch_size)
				.context("Importing items")?;
			info!(written, "imported items");
		}
		Command::Ingest => {
			let pipeline = IngestPipeline::new(config.ingest_config());
			let report = pipeline.run(store.as_ref()).context("Ingestion failed")?;
			info!(
				loaded = report.items_loaded,
				placed = report.placed,
				relocated = report.relocated,
				root_fallbacks = report.root_fallbacks,
				skipped = report.skipped(),
				meshes = report.meshes_written,
				stale_removed = report.stale_meshes_removed,
				"ingestion finished"
			);
			if !report.failed_nodes.is_empty() {
				warn!(nodes = ?report.failed_nodes, "some meshes were not written");
			}
		}
		Command::Stream => stream(&config, store)?,
	}

	Ok(())
}

/// Where generated items are seen from when measuring their coverage.
#[derive(Clone, Copy, Debug)]
struct Viewpoint {
	position: Vec3,
	render_width: f32,
}

/// Cubes of random size and rotation inside `[0, extent]^3`, with coverage
/// measured by `metric` from `view`.
fn synthetic_scene(
	count: usize,
	seed: u64,
	extent: f32,
	metric: &dyn ImportanceMetric,
	view: Viewpoint,
) -> Vec<StoredItem> {
	let mut rng = StdRng::seed_from_u64(seed);
	let geometry = cube_geometry();
	let local = Aabb3::new(Vec3::splat(-0.5), Vec3::splat(0.5));

	(0..count)
		.map(|i| {
			let translation = Vec3::new(
				rng.random_range(0.0..extent),
				rng.random_range(0.0..extent),
				rng.random_range(0.0..extent),
			);
			let scale = Vec3::splat(rng.random_range(1.0..12.0));
			let rotation = Quat::from_rotation_y(rng.random_range(0.0..std::f32::consts::TAU));
			let transform = Mat4::from_scale_rotation_translation(scale, rotation, translation);
			let mut geometry = geometry.clone();
			geometry.uniform_color = Some([rng.random(), rng.random(), rng.random(), 1.0]);
			let world_bounds = local.transformed(&transform);

			StoredItem {
				item: ContentItem {
					id: ItemId(i as u64 + 1),
					world_bounds,
					world_transform: transform,
					screen_coverage: metric.coverage(&world_bounds, view.position, view.render_width),
				},
				geometry,
			}
		})
		.collect()
}

/// Unit cube centered on the origin, one normal per corner.
fn cube_geometry() -> ItemGeometry {
	let mut positions = Vec::with_capacity(24);
	let mut normals = Vec::with_capacity(24);
	for corner in 0..8u32 {
		let p = Vec3::new(
			if corner & 1 == 0 { -0.5 } else { 0.5 },
			if corner & 2 == 0 { -0.5 } else { 0.5 },
			if corner & 4 == 0 { -0.5 } else { 0.5 },
		);
		positions.extend_from_slice(&p.to_array());
		normals.extend_from_slice(&p.normalize().to_array());
	}
	ItemGeometry {
		positions,
		normals,
		indices: vec![
			0, 2, 1, 1, 2, 3, 4, 5, 6, 5, 7, 6, 0, 1, 4, 1, 5, 4, 2, 6, 3, 3, 6, 7, 0, 4, 2, 2, 4, 6,
			1, 3, 5, 3, 7, 5,
		],
		colors: None,
		uniform_color: None,
	}
}

/// Tick a headless scene along the camera path on a simulated clock.
fn stream(config: &Config, store: Arc<FileStore>) -> Result<()> {
	let path: Vec<Vec3> = config.streaming.camera_path.iter().map(|p| Vec3::from(*p)).collect();
	if path.len() < 2 {
		anyhow::bail!("streaming.camera_path needs at least two waypoints");
	}

	let tree = load_tree(store.as_ref()).context("Loading tree")?;
	let streamer_config = config.streamer_config();
	let mut streamer = LodStreamer::new(&tree, store, streamer_config);
	let with_meshes = streamer.prime_from_store().context("Listing stored meshes")?;
	info!(nodes = tree.len(), with_meshes, "streamer ready");

	let mut scene = HeadlessScene::new();
	let step = streamer_config.min_tick_interval.max(Duration::from_millis(1));
	let step_distance = config.streaming.camera_speed * step.as_secs_f32();
	let mut now = Instant::now();

	for leg in path.windows(2) {
		let (from, to) = (leg[0], leg[1]);
		let length = from.distance(to);
		let steps = if step_distance > 0.0 {
			(length / step_distance).ceil().max(1.0) as usize
		} else {
			1
		};

		for i in 0..=steps {
			let camera = from.lerp(to, i as f32 / steps as f32);
			now += step;
			if let Some(report) = streamer.tick(camera, now, &mut scene) {
				if report.shown > 0 || report.hidden > 0 {
					info!(
						camera = ?camera,
						shown = report.shown,
						hidden = report.hidden,
						visible = streamer.visible_count(),
						"visibility changed"
					);
				}
			}
			// Let background reads land before the next simulated tick
			std::thread::sleep(Duration::from_millis(1));
		}
	}

	let metrics = streamer.metrics();
	info!(
		ticks = metrics.ticks,
		loads = metrics.loads_issued,
		completed = metrics.loads_completed,
		missing = metrics.loads_missing,
		failed = metrics.loads_failed,
		cache_hits = metrics.cache_hits,
		prefetches = metrics.prefetches,
		evictions = metrics.evictions,
		resident = metrics.resident,
		visible = metrics.visible,
		avg_tick_us = metrics.tick_timings.average(),
		"stream finished"
	);
	Ok(())
}

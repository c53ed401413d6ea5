//! Chunk Dispatcher
//!
//! Runs bounded chunks of CPU work either on rayon's pool or inline on the
//! calling thread.
//!
//! # Strategies
//!
//! ```text
//! item count < worker_item_limit          item count >= worker_item_limit
//! ┌──────────────────────────┐            ┌──────────────────────────┐
//! │ Workers                  │            │ Cooperative              │
//! │ - job moved to the pool  │            │ - chunk runs inline      │
//! │ - rayon::spawn per chunk │            │ - yield between chunks   │
//! │ - bounded(1) response    │            │ - job borrowed, no copy  │
//! │ - per-request deadline   │            │                          │
//! └──────────────────────────┘            └──────────────────────────┘
//! ```
//!
//! Every chunk is correlated by a [`RequestId`]. A failing chunk only fails
//! its own result; completed chunks keep theirs.
//!
//! Jobs are pulled from the input iterator one at a time, so callers can hand
//! out ranges over one shared `Arc` buffer instead of a copy per chunk.
//!
//! # Usage
//!
//! ```ignore
//! let dispatcher = ChunkDispatcher::new(DispatchConfig::default());
//! let shared: Arc<[Item]> = items.into();
//! let jobs = chunk_ranges(shared.len(), 1000).map(|range| MyChunk { items: shared.clone(), range });
//! let outputs = dispatcher.dispatch_all(shared.len(), jobs)?;
//! ```

use std::any::Any;
use std::fmt;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{self as channel, Receiver, RecvTimeoutError};
use tracing::{debug, warn};
use web_time::Instant;

use crate::error::DispatchError;

/// Default number of items per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
/// Item count at and above which chunks run cooperatively.
pub const DEFAULT_WORKER_ITEM_LIMIT: usize = 50_000;
/// Default time a worker chunk may take before it is reported as timed out.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// Correlation id of one chunk request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "req#{}", self.0)
	}
}

/// A self-contained unit of work.
///
/// Jobs hold immutable payload only. A job may run more than once when the
/// failure policy retries it.
pub trait ChunkWork: Send + Sync + 'static {
	type Output: Send + 'static;

	fn run(&self) -> Self::Output;
}

/// Where chunks execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchStrategy {
	/// One rayon task per chunk, response over a channel.
	Workers,
	/// Inline on the calling thread, yielding between chunks.
	Cooperative,
}

/// What happens to a failed chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ChunkFailurePolicy {
	/// Report the failure; the caller aborts.
	#[default]
	Abort,
	/// Re-run failed chunks up to `attempts` more times.
	Retry { attempts: u32 },
}

/// Dispatcher configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DispatchConfig {
	/// Items per chunk.
	pub chunk_size: usize,
	/// Item counts below this use [`DispatchStrategy::Workers`].
	pub worker_item_limit: usize,
	/// Deadline of a worker chunk, measured from submission.
	pub chunk_timeout: Duration,
	pub failure_policy: ChunkFailurePolicy,
}

impl Default for DispatchConfig {
	fn default() -> Self {
		Self {
			chunk_size: DEFAULT_CHUNK_SIZE,
			worker_item_limit: DEFAULT_WORKER_ITEM_LIMIT,
			chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
			failure_policy: ChunkFailurePolicy::Abort,
		}
	}
}

impl DispatchConfig {
	/// Strategy for a run over `item_count` items.
	pub fn strategy_for(&self, item_count: usize) -> DispatchStrategy {
		if item_count < self.worker_item_limit {
			DispatchStrategy::Workers
		} else {
			DispatchStrategy::Cooperative
		}
	}
}

/// Split `0..len` into consecutive ranges of at most `chunk_size` items.
pub fn chunk_ranges(len: usize, chunk_size: usize) -> impl Iterator<Item = Range<usize>> {
	let step = chunk_size.max(1);
	(0..len).step_by(step).map(move |start| start..(start + step).min(len))
}

/// A chunk submitted to the rayon pool and not yet collected.
struct PendingChunk<T> {
	request: RequestId,
	deadline: Instant,
	receiver: Receiver<Result<T, String>>,
}

impl<T> PendingChunk<T> {
	fn wait(self) -> Result<T, DispatchError> {
		let request = self.request;
		match self.receiver.recv_deadline(self.deadline) {
			Ok(Ok(output)) => Ok(output),
			Ok(Err(reason)) => Err(DispatchError::Failed { request, reason }),
			Err(RecvTimeoutError::Timeout) => Err(DispatchError::Timeout { request }),
			Err(RecvTimeoutError::Disconnected) => Err(DispatchError::Failed {
				request,
				reason: "worker dropped its response channel".into(),
			}),
		}
	}
}

/// Runs [`ChunkWork`] with the strategy chosen by [`DispatchConfig`].
pub struct ChunkDispatcher {
	config: DispatchConfig,
	next_request: AtomicU64,
}

impl Default for ChunkDispatcher {
	fn default() -> Self {
		Self::new(DispatchConfig::default())
	}
}

impl ChunkDispatcher {
	pub fn new(config: DispatchConfig) -> Self {
		Self {
			config,
			next_request: AtomicU64::new(1),
		}
	}

	#[inline]
	pub fn config(&self) -> &DispatchConfig {
		&self.config
	}

	fn next_request_id(&self) -> RequestId {
		RequestId(self.next_request.fetch_add(1, Ordering::Relaxed))
	}

	/// Run `jobs` and return one result per job, in job order.
	///
	/// `item_count` is the size of the whole input and selects the strategy.
	/// Failed chunks are retried according to the failure policy.
	pub fn dispatch<W, I>(&self, item_count: usize, jobs: I) -> Vec<Result<W::Output, DispatchError>>
	where
		W: ChunkWork,
		I: IntoIterator<Item = W>,
	{
		let strategy = self.config.strategy_for(item_count);
		debug!(?strategy, item_count, "dispatching chunks");

		// Jobs are kept only when they may run again
		let retrying = matches!(self.config.failure_policy, ChunkFailurePolicy::Retry { .. });
		let mut kept: Vec<Arc<W>> = Vec::new();
		let jobs = jobs.into_iter().map(Arc::new).inspect(|job| {
			if retrying {
				kept.push(Arc::clone(job));
			}
		});
		let mut results = self.run_once(strategy, jobs);

		if let ChunkFailurePolicy::Retry { attempts } = self.config.failure_policy {
			for attempt in 1..=attempts {
				let failed: Vec<usize> = results
					.iter()
					.enumerate()
					.filter(|(_, r)| r.is_err())
					.map(|(i, _)| i)
					.collect();
				if failed.is_empty() {
					break;
				}
				warn!(attempt, failed = failed.len(), "retrying failed chunks");

				let retried = self.run_once(strategy, failed.iter().map(|&i| Arc::clone(&kept[i])));
				for (index, result) in failed.into_iter().zip(retried) {
					results[index] = result;
				}
			}
		}

		results
	}

	/// Like [`Self::dispatch`], but fails the whole run on the first failed chunk.
	pub fn dispatch_all<W, I>(&self, item_count: usize, jobs: I) -> Result<Vec<W::Output>, DispatchError>
	where
		W: ChunkWork,
		I: IntoIterator<Item = W>,
	{
		self.dispatch(item_count, jobs).into_iter().collect()
	}

	fn run_once<W: ChunkWork>(
		&self,
		strategy: DispatchStrategy,
		jobs: impl Iterator<Item = Arc<W>>,
	) -> Vec<Result<W::Output, DispatchError>> {
		match strategy {
			DispatchStrategy::Workers => self.run_workers(jobs),
			DispatchStrategy::Cooperative => self.run_cooperative(jobs),
		}
	}

	fn run_workers<W: ChunkWork>(&self, jobs: impl Iterator<Item = Arc<W>>) -> Vec<Result<W::Output, DispatchError>> {
		let pending: Vec<PendingChunk<W::Output>> = jobs.map(|job| self.spawn_worker(job)).collect();
		pending.into_iter().map(PendingChunk::wait).collect()
	}

	fn spawn_worker<W: ChunkWork>(&self, job: Arc<W>) -> PendingChunk<W::Output> {
		let request = self.next_request_id();
		let (sender, receiver) = channel::bounded(1);

		rayon::spawn(move || {
			let result = panic::catch_unwind(AssertUnwindSafe(|| job.run())).map_err(|payload| panic_message(&payload));
			// Receiver gone = request timed out or caller gave up
			let _ = sender.send(result);
		});

		PendingChunk {
			request,
			deadline: Instant::now() + self.config.chunk_timeout,
			receiver,
		}
	}

	fn run_cooperative<W: ChunkWork>(&self, jobs: impl Iterator<Item = Arc<W>>) -> Vec<Result<W::Output, DispatchError>> {
		let mut results = Vec::new();
		for (i, job) in jobs.enumerate() {
			if i > 0 {
				std::thread::yield_now();
			}
			let request = self.next_request_id();
			let result = panic::catch_unwind(AssertUnwindSafe(|| job.run())).map_err(|payload| DispatchError::Failed {
				request,
				reason: panic_message(&payload),
			});
			results.push(result);
		}
		results
	}
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"chunk panicked".to_string()
	}
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod dispatch_test;

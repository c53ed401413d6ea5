//! Error types for the ingestion pipeline, the chunk dispatcher and the
//! persistence layer.

use thiserror::Error;

use crate::dispatch::RequestId;
use crate::store::Partition;
use crate::types::NodeId;

/// Failure reported by a [`KvStore`](crate::store::KvStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("i/o error in partition `{partition}`: {source}")]
  Io {
    partition: Partition,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to encode or decode a stored value: {0}")]
  Codec(#[from] serde_json::Error),

  #[error("no value for key `{key}` in partition `{partition}`")]
  Missing { partition: Partition, key: String },

  #[error("transaction on partition `{partition}` aborted: {reason}")]
  TransactionAborted { partition: Partition, reason: String },

  #[error("store lock poisoned")]
  LockPoisoned,
}

/// Failure of a single chunk submitted to the
/// [`ChunkDispatcher`](crate::dispatch::ChunkDispatcher).
///
/// Only the failing chunk is affected; chunks that already completed keep
/// their results.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
  #[error("chunk request {request} timed out")]
  Timeout { request: RequestId },

  #[error("chunk request {request} failed: {reason}")]
  Failed { request: RequestId, reason: String },
}

/// Fatal errors of an ingestion run.
#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("no persisted tree found")]
  MissingTree,

  #[error("no content items found in the store")]
  NoItems,

  #[error("inconsistent spatial tree at node {node}: {reason}")]
  InconsistentTree { node: NodeId, reason: String },

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Dispatch(#[from] DispatchError),
}

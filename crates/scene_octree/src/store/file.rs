//! Directory-backed store: one directory per partition, one JSON file per key.
//!
//! ```text
//! root/
//!   items/42.json
//!   tree/tree.json
//!   placements/placements.json
//!   batched_meshes/137.json
//! ```
//!
//! Writes go to a `.tmp` sibling first and are renamed into place. A batch
//! hard-links every value it overwrites to a `.bak` sibling before committing,
//! and puts those back if any rename fails.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{KvStore, Partition};
use crate::error::StoreError;

const VALUE_EXT: &str = "json";
const STAGING_EXT: &str = "json.tmp";
const BACKUP_EXT: &str = "json.bak";

/// One committed entry of a batch in progress.
struct Commit {
  target: PathBuf,
  /// Previous value, if the key existed.
  backup: Option<PathBuf>,
}

pub struct FileStore {
  root: PathBuf,
}

impl FileStore {
  /// Open (and create if needed) a store rooted at `root`.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let root = root.into();
    for partition in Partition::ALL {
      let dir = root.join(partition.name());
      fs::create_dir_all(&dir).map_err(|source| StoreError::Io { partition, source })?;
    }
    debug!(root = %root.display(), "opened file store");
    Ok(Self { root })
  }

  #[inline]
  pub fn root(&self) -> &Path {
    &self.root
  }

  fn value_path(&self, partition: Partition, key: &str) -> Result<PathBuf, StoreError> {
    self.keyed_path(partition, key, VALUE_EXT)
  }

  fn staging_path(&self, partition: Partition, key: &str) -> Result<PathBuf, StoreError> {
    self.keyed_path(partition, key, STAGING_EXT)
  }

  fn backup_path(&self, partition: Partition, key: &str) -> Result<PathBuf, StoreError> {
    self.keyed_path(partition, key, BACKUP_EXT)
  }

  fn keyed_path(&self, partition: Partition, key: &str, ext: &str) -> Result<PathBuf, StoreError> {
    let valid = !key.is_empty() && !key.starts_with('.') && !key.contains(['/', '\\']);
    if !valid {
      return Err(StoreError::Io {
        partition,
        source: io::Error::new(io::ErrorKind::InvalidInput, format!("invalid key `{}`", key)),
      });
    }
    Ok(self.root.join(partition.name()).join(format!("{}.{}", key, ext)))
  }

  /// Write `value` to the staging file of `key`.
  fn stage(&self, partition: Partition, key: &str, value: &[u8]) -> Result<PathBuf, StoreError> {
    let staged = self.staging_path(partition, key)?;
    fs::write(&staged, value).map_err(|source| StoreError::Io { partition, source })?;
    Ok(staged)
  }

  fn discard(staged: &[PathBuf]) {
    for path in staged {
      if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to remove temporary file");
      }
    }
  }

  /// Link the current value of `target` to `backup`. `false` if there is none.
  fn back_up(target: &Path, backup: &Path) -> io::Result<bool> {
    match fs::remove_file(backup) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(e),
    }
    match fs::hard_link(target, backup) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(e) => Err(e),
    }
  }

  /// Undo committed entries, newest first.
  fn roll_back(committed: Vec<Commit>) {
    for commit in committed.into_iter().rev() {
      let undone = match &commit.backup {
        Some(backup) => fs::rename(backup, &commit.target),
        None => fs::remove_file(&commit.target),
      };
      if let Err(e) = undone {
        warn!(path = %commit.target.display(), error = %e, "failed to roll back batch entry");
      }
    }
  }

  /// Move one staged value into place, keeping a backup of what it replaces.
  fn commit_one(staged: &Path, target: &Path, backup: PathBuf) -> io::Result<Commit> {
    let backup = Self::back_up(target, &backup)?.then_some(backup);
    if let Err(e) = fs::rename(staged, target) {
      if let Some(backup) = &backup {
        let _ = fs::remove_file(backup);
      }
      return Err(e);
    }
    Ok(Commit {
      target: target.to_path_buf(),
      backup,
    })
  }
}

impl KvStore for FileStore {
  fn get(&self, partition: Partition, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(self.value_path(partition, key)?) {
      Ok(bytes) => Ok(Some(bytes)),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(source) => Err(StoreError::Io { partition, source }),
    }
  }

  fn put(&self, partition: Partition, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
    let target = self.value_path(partition, key)?;
    let staged = self.stage(partition, key, &value)?;
    fs::rename(&staged, &target).map_err(|source| {
      Self::discard(std::slice::from_ref(&staged));
      StoreError::Io { partition, source }
    })
  }

  fn put_batch(&self, partition: Partition, entries: Vec<(String, Vec<u8>)>) -> Result<(), StoreError> {
    // Last value wins for a repeated key, as with separate puts
    let mut seen = HashSet::new();
    let mut entries: Vec<(String, Vec<u8>)> =
      entries.into_iter().rev().filter(|(key, _)| seen.insert(key.clone())).collect();
    entries.reverse();

    let mut staged = Vec::with_capacity(entries.len());
    for (key, value) in &entries {
      let entry = self.value_path(partition, key).and_then(|target| {
        let backup = self.backup_path(partition, key)?;
        Ok((self.stage(partition, key, value)?, target, backup))
      });
      match entry {
        Ok(paths) => staged.push(paths),
        Err(e) => {
          let paths: Vec<PathBuf> = staged.into_iter().map(|(s, _, _)| s).collect();
          Self::discard(&paths);
          return Err(StoreError::TransactionAborted {
            partition,
            reason: format!("staging `{}` failed: {}", key, e),
          });
        }
      }
    }

    // Commit
    let mut committed = Vec::with_capacity(staged.len());
    let mut pending = staged.into_iter();
    while let Some((from, to, backup)) = pending.next() {
      match Self::commit_one(&from, &to, backup) {
        Ok(commit) => committed.push(commit),
        Err(e) => {
          let mut rest: Vec<PathBuf> = pending.map(|(s, _, _)| s).collect();
          rest.push(from);
          Self::discard(&rest);
          Self::roll_back(committed);
          return Err(StoreError::TransactionAborted {
            partition,
            reason: format!("commit of {} failed: {}", to.display(), e),
          });
        }
      }
    }

    let backups: Vec<PathBuf> = committed.into_iter().filter_map(|c| c.backup).collect();
    Self::discard(&backups);
    Ok(())
  }

  fn keys(&self, partition: Partition) -> Result<Vec<String>, StoreError> {
    let dir = self.root.join(partition.name());
    let io_err = |source| StoreError::Io { partition, source };

    let mut keys = Vec::new();
    for entry in fs::read_dir(&dir).map_err(io_err)? {
      let entry = entry.map_err(io_err)?;
      if !entry.file_type().map_err(io_err)?.is_file() {
        continue;
      }
      let name = entry.file_name();
      let Some(name) = name.to_str() else { continue };
      if name.ends_with(STAGING_EXT) {
        continue;
      }
      if let Some(key) = name.strip_suffix(".json") {
        keys.push(key.to_string());
      }
    }
    keys.sort();
    Ok(keys)
  }

  fn delete(&self, partition: Partition, key: &str) -> Result<bool, StoreError> {
    match fs::remove_file(self.value_path(partition, key)?) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(source) => Err(StoreError::Io { partition, source }),
    }
  }
}

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::{
  data::entry::{SstableEntry, ValueMeta, TOMBSTONE},
  errors::{Errors, Result},
  sstable::writer::TableWriter,
};

/// Bytes a single entry is charged for beyond its key: the vlog offset and
/// length pointer.
const ENTRY_POINTER_SIZE: usize = 8;

/// In-memory sorted buffer of recent writes. Maps each key to its vlog
/// pointer; ascending key order gives a deterministic flush order.
///
/// The size counter is a monotonic estimator: overwriting a key charges it
/// again rather than replacing the old charge. It only gates flush timing, so
/// the bias makes overwrite-heavy workloads flush a little early.
pub struct Memtable {
  entries: BTreeMap<Bytes, ValueMeta>,
  size: usize,
  max_size: usize,
}

impl Memtable {
  pub fn new(max_size: usize) -> Self {
    Self {
      entries: BTreeMap::new(),
      size: 0,
      max_size,
    }
  }

  /// Inserts or overwrites a key's vlog pointer. The tombstone marker is
  /// reserved and rejected as a key.
  pub fn put(&mut self, key: Bytes, meta: ValueMeta) -> Result<()> {
    if key == TOMBSTONE {
      return Err(Errors::ReservedKey);
    }
    self.size += key.len() + ENTRY_POINTER_SIZE;
    self.entries.insert(key, meta);
    Ok(())
  }

  pub fn get(&self, key: &[u8]) -> Option<ValueMeta> {
    self.entries.get(key).copied()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Threshold is exceeded, not reached.
  pub fn is_full(&self) -> bool {
    self.size > self.max_size
  }

  /// Drains every entry into the given sstable writer in ascending key order,
  /// then clears the table. The caller must hold the tree write lock so no
  /// concurrent access to this instance is possible.
  pub fn flush(&mut self, writer: &mut TableWriter) -> Result<()> {
    for (key, meta) in &self.entries {
      writer.write_entry(&SstableEntry::new(key.clone(), *meta))?;
    }
    self.entries.clear();
    self.size = 0;
    Ok(())
  }
}

use lazy_static::lazy_static;
use std::{
  path::{Path, PathBuf},
  time::Duration,
};

lazy_static! {
  pub static ref DEFAULT_DIR_PATH: PathBuf = std::env::temp_dir().join("wisp-kv");
}

#[derive(Debug, Clone)]
pub struct Options {
  /// Directory holding the immutable sstable files.
  pub sstable_dir: PathBuf,

  /// Path of the append-only value log.
  pub vlog_path: PathBuf,

  /// Path of the checkpoint file holding the vlog head offset.
  pub checkpoint_path: PathBuf,

  /// Memtable byte threshold; a flush is triggered once it is exceeded.
  pub memtable_max_bytes: usize,

  /// Target byte length of one sstable block.
  pub block_max_bytes: u32,

  /// How often the background compaction task wakes up.
  pub compaction_interval: Duration,

  /// Fsync the vlog after every append.
  pub sync_writes: bool,
}

impl Options {
  /// Derives all storage paths under a single base directory.
  pub fn in_dir<P>(dir: P) -> Self
  where
    P: AsRef<Path>,
  {
    let dir = dir.as_ref();
    Self {
      sstable_dir: dir.join("sst"),
      vlog_path: dir.join("vlog"),
      checkpoint_path: dir.join("checkpoint"),
      memtable_max_bytes: 4 * 1024 * 1024, // 4MB
      block_max_bytes: 4096,
      compaction_interval: Duration::from_secs(120),
      sync_writes: false,
    }
  }
}

impl Default for Options {
  fn default() -> Self {
    Self::in_dir(DEFAULT_DIR_PATH.clone())
  }
}

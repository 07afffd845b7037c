use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Errors {
  #[error("io error: {0}")]
  Io(#[from] io::Error),

  #[error("record is truncated or corrupt")]
  CorruptRecord,

  #[error("key is reserved as the tombstone marker")]
  ReservedKey,

  #[error("sstable footer has an invalid length")]
  InvalidFooter,

  #[error("vlog garbage collection already in progress")]
  GcInProgress,

  #[error("database directory is locked by another process")]
  DirectoryLocked,
}

pub type Result<T> = std::result::Result<T, Errors>;

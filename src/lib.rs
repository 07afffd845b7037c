//! wisp-kv: an embedded key-value storage engine built on the WiscKey design.
//!
//! Keys and values are stored separately: an ordered index (memtable +
//! immutable sstables) holds only keys and byte offsets, while an append-only
//! value log holds the full key/value records. Keeping the sorted structures
//! key-only keeps them small; the value log is written sequentially and
//! reclaimed by garbage collection.
//!
//! # Features
//!
//! * Point reads and writes over a log-structured store
//! * Crash recovery by replaying the value log from a checkpoint
//! * Background pairwise sstable compaction
//! * Value-log garbage collection that relocates live records and truncates
//!   consumed history
//!
//! # Basic Usage
//!
//! ```
//! use bytes::Bytes;
//! use wisp_kv::{db::Engine, option::Options};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let opts = Options::in_dir(dir.path());
//! let engine = Engine::open(opts).expect("failed to open wisp-kv engine");
//!
//! let key = Bytes::from(b"hello".to_vec());
//! let value = Bytes::from(b"world".to_vec());
//! engine.put(key.clone(), value.clone()).expect("failed to put");
//!
//! let retrieved = engine.get(key.clone()).expect("failed to get");
//! assert_eq!(retrieved, Some(value));
//!
//! engine.delete(key.clone()).expect("failed to delete");
//! assert_eq!(engine.get(key).unwrap(), None);
//! ```

mod data;
mod memtable;
mod sstable;
mod vlog;

pub mod db;
pub mod errors;
pub mod option;
pub mod util;

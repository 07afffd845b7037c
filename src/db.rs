use std::{
  collections::HashSet,
  fs::{self, File, OpenOptions},
  path::PathBuf,
  sync::Arc,
  thread::{self, JoinHandle},
};

use bytes::Bytes;
use fs2::FileExt;
use log::{debug, error, info};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::{
  data::entry::{SstableEntry, TableEntry, ValueMeta, TOMBSTONE},
  errors::{Errors, Result},
  memtable::Memtable,
  option::Options,
  sstable::{self, writer::TableWriter, SSTable},
  util,
  vlog::Vlog,
};

pub(crate) const FILE_LOCK_NAME: &str = "flock";

const SSTABLE_FILE_SUFFIX: &str = ".sstable";
const SSTABLE_FILE_STEM_LENGTH: usize = 10;

/// How many vlog records a single `compress_vlog` call processes. Bounding
/// the scan bounds the GC pause.
const VLOG_GC_ENTRY_BUDGET: usize = 128;

/// The storage engine: memtable + value log + sstables, with a background
/// compaction task for the lifetime of the handle.
pub struct Engine {
  core: Arc<Core>,
  compaction_handle: Mutex<Option<JoinHandle<()>>>,
}

struct Core {
  options: Options,
  tree: RwLock<TreeState>,
  /// Keeps vlog GC and compaction from relocating the same sstable's
  /// pointer fields concurrently.
  gc_lock: Mutex<()>,
  shutdown: Mutex<bool>,
  shutdown_signal: Condvar,
  /// Exclusive directory lock, held for the life of the engine.
  _lock_file: File,
}

/// Everything the tree lock guards. Writers and compaction take it
/// exclusively; readers take it shared, so a lookup can never observe a
/// half-replaced sstable list.
struct TreeState {
  memtable: Memtable,
  vlog: Vlog,
  /// Live sstable files, oldest first. Each file is internally key-sorted.
  sstables: Vec<PathBuf>,
  /// Keys deleted since the last flush; cleared once their tombstones are
  /// durable in an sstable.
  deleted: HashSet<Bytes>,
}

impl Engine {
  /// Opens (or creates) the store described by `options` and starts the
  /// background compaction task.
  pub fn open(options: Options) -> Result<Self> {
    fs::create_dir_all(&options.sstable_dir)?;
    if let Some(parent) = options.vlog_path.parent() {
      fs::create_dir_all(parent)?;
    }
    if let Some(parent) = options.checkpoint_path.parent() {
      fs::create_dir_all(parent)?;
    }

    let lock_file = OpenOptions::new()
      .create(true)
      .write(true)
      .open(options.sstable_dir.join(FILE_LOCK_NAME))?;
    lock_file
      .try_lock_exclusive()
      .map_err(|_| Errors::DirectoryLocked)?;

    let mut vlog = Vlog::open(
      options.vlog_path.clone(),
      options.checkpoint_path.clone(),
      options.sync_writes,
    )?;
    let mut memtable = Memtable::new(options.memtable_max_bytes);
    let sstables = load_sstable_paths(&options.sstable_dir)?;

    // Replay everything written after the last checkpoint but never flushed.
    if let Some(head) = read_checkpoint(&options.checkpoint_path)? {
      vlog.restore_to(head, &mut memtable)?;
    }
    info!(
      "opened store with {} sstables, vlog size {} bytes, {} replayed keys",
      sstables.len(),
      vlog.size(),
      memtable.len()
    );

    let core = Arc::new(Core {
      options,
      tree: RwLock::new(TreeState {
        memtable,
        vlog,
        sstables,
        deleted: HashSet::new(),
      }),
      gc_lock: Mutex::new(()),
      shutdown: Mutex::new(false),
      shutdown_signal: Condvar::new(),
      _lock_file: lock_file,
    });

    let task_core = Arc::clone(&core);
    let handle = thread::Builder::new()
      .name("wisp-kv-compaction".to_string())
      .spawn(move || task_core.compaction_loop())?;

    Ok(Self {
      core,
      compaction_handle: Mutex::new(Some(handle)),
    })
  }

  /// Stores a key/value pair. Clears any pending-delete mark for the key.
  pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
    if key == TOMBSTONE {
      return Err(Errors::ReservedKey);
    }
    let mut state = self.core.tree.write();
    state.deleted.remove(key.as_ref());
    self.core.save(&mut state, TableEntry::new(key, value))
  }

  /// Retrieves the latest value for a key. Absence and tombstoned keys both
  /// resolve to `Ok(None)`.
  pub fn get(&self, key: Bytes) -> Result<Option<Bytes>> {
    let state = self.core.tree.read();
    Core::lookup(&state, &key).map(|found| found.map(|entry| entry.value))
  }

  /// Marks a key deleted by storing a tombstone-valued record. Deleting an
  /// already-marked key is a no-op.
  pub fn delete(&self, key: Bytes) -> Result<()> {
    if key == TOMBSTONE {
      return Err(Errors::ReservedKey);
    }
    let mut state = self.core.tree.write();
    if state.deleted.contains(key.as_ref()) {
      return Ok(());
    }
    state.deleted.insert(key.clone());
    self.core.save(&mut state, TableEntry::deleted(key))
  }

  /// Drains the memtable into a new sstable and checkpoints the vlog head.
  /// A no-op on an empty memtable.
  pub fn flush(&self) -> Result<()> {
    let mut state = self.core.tree.write();
    self.core.flush_locked(&mut state)
  }

  /// One compaction pass: pairwise-merges the live sstables when their count
  /// is even. Also runs periodically on the background task.
  pub fn merge(&self) -> Result<()> {
    self.core.merge()
  }

  /// Garbage-collects the head of the vlog: relocates still-referenced
  /// records, drops dead ones, and truncates the consumed prefix. Processes
  /// at most a fixed number of records per call.
  pub fn compress_vlog(&self) -> Result<()> {
    let _gc = self
      .core
      .gc_lock
      .try_lock()
      .ok_or(Errors::GcInProgress)?;
    let mut state = self.core.tree.write();

    // Give every live key an sstable reference first, otherwise the
    // liveness check below would drop keys that only exist in the memtable.
    self.core.flush_locked(&mut state)?;
    self.core.gc_pass(&mut state, VLOG_GC_ENTRY_BUDGET)?;
    state.vlog.flush_head()
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    {
      let mut stopped = self.core.shutdown.lock();
      *stopped = true;
    }
    self.core.shutdown_signal.notify_all();
    if let Some(handle) = self.compaction_handle.lock().take() {
      let _ = handle.join();
    }
  }
}

impl Core {
  /// The write path shared by put and delete: vlog append, memtable upsert,
  /// flush when the memtable runs over its threshold.
  fn save(&self, state: &mut TreeState, entry: TableEntry) -> Result<()> {
    let meta = state.vlog.append(&entry)?;
    state.memtable.put(entry.key, meta)?;
    if state.memtable.is_full() {
      self.flush_locked(state)?;
    }
    Ok(())
  }

  fn flush_locked(&self, state: &mut TreeState) -> Result<()> {
    if state.memtable.is_empty() {
      return Ok(());
    }
    let path = self.options.sstable_dir.join(format!(
      "{}{}",
      util::random_file_stem(SSTABLE_FILE_STEM_LENGTH),
      SSTABLE_FILE_SUFFIX
    ));
    let file = File::create(&path)?;
    let mut writer = TableWriter::new(file, self.options.block_max_bytes);
    state.memtable.flush(&mut writer)?;
    writer.close()?;
    state.vlog.flush_head()?;
    state.sstables.push(path);
    // tombstones are durable now, the in-memory marks are done
    state.deleted.clear();
    debug!("flushed memtable, {} live sstables", state.sstables.len());
    Ok(())
  }

  /// Resolves a key against the full read path: pending-delete set, then
  /// memtable, then every sstable with the greatest timestamp winning.
  /// Timestamps have second granularity, so two flushes can tie; the later
  /// file in the list is the newer flush and takes precedence. Returns the
  /// full vlog record.
  fn lookup(state: &TreeState, key: &[u8]) -> Result<Option<TableEntry>> {
    if state.deleted.contains(key) {
      return Ok(None);
    }

    if let Some(meta) = state.memtable.get(key) {
      let record = state.vlog.get(meta)?;
      if record.is_tombstone() {
        return Ok(None);
      }
      return Ok(Some(record));
    }

    let mut latest: Option<SstableEntry> = None;
    for path in &state.sstables {
      let table = SSTable::open(path)?;
      if let Some(entry) = table.get(key)? {
        let newer = latest
          .as_ref()
          .map(|best| entry.timestamp >= best.timestamp)
          .unwrap_or(true);
        if newer {
          latest = Some(entry);
        }
      }
    }
    let Some(entry) = latest else {
      return Ok(None);
    };
    let record = state.vlog.get(entry.meta)?;
    if record.is_tombstone() {
      return Ok(None);
    }
    Ok(Some(record))
  }

  /// Every `(sstable, block)` position whose pointer targets the record at
  /// exactly `offset` in the vlog. Vlog GC patches all of them after
  /// relocating the record. Matching on the offset and not just the key keeps
  /// a superseded prefix copy dead even when a newer record for the same key
  /// sits past the scan budget; the newer record's pointers are moved by the
  /// offset shift instead.
  fn exists(sstables: &[PathBuf], key: &[u8], offset: u32) -> Result<Vec<(PathBuf, usize)>> {
    let mut references = Vec::new();
    for path in sstables {
      let table = SSTable::open(path)?;
      if let Some((block, entry)) = table.locate(key)? {
        if entry.meta.offset == offset {
          references.push((path.clone(), block));
        }
      }
    }
    Ok(references)
  }

  fn compaction_loop(&self) {
    info!("compaction task started");
    loop {
      {
        let mut stopped = self.shutdown.lock();
        if !*stopped {
          self
            .shutdown_signal
            .wait_for(&mut stopped, self.options.compaction_interval);
        }
        if *stopped {
          break;
        }
      }
      if let Err(e) = self.merge() {
        // deliberately no retry: repeated failure against a broken
        // filesystem would loop forever
        error!("compaction failed, stopping the compaction task: {}", e);
        return;
      }
    }
    info!("compaction task stopped");
  }

  /// Pairwise compaction. Old files are only deleted after every pair has
  /// been merged, so a failure mid-pass leaves the live list untouched.
  fn merge(&self) -> Result<()> {
    let _gc = self.gc_lock.lock();
    let mut state = self.tree.write();
    if state.sstables.len() % 2 != 0 {
      debug!(
        "skipping compaction, odd sstable count {}",
        state.sstables.len()
      );
      return Ok(());
    }

    let originals = state.sstables.clone();
    let mut merged = Vec::with_capacity(originals.len() / 2);
    for pair in originals.chunks(2) {
      if let Some(path) = self.merge_pair(&state, &pair[0], &pair[1])? {
        merged.push(path);
      }
    }
    for path in &originals {
      fs::remove_file(path)?;
    }
    if !originals.is_empty() {
      info!(
        "compaction merged {} sstables into {}",
        originals.len(),
        merged.len()
      );
    }
    state.sstables = merged;
    Ok(())
  }

  /// Two-pointer merge of a pair of key-sorted sstables. Each candidate
  /// entry is re-checked against the current read path so keys tombstoned
  /// after these files were written get dropped; on a key present in both
  /// files the greater timestamp wins, ties favoring the second file.
  fn merge_pair(
    &self,
    state: &TreeState,
    first_path: &PathBuf,
    second_path: &PathBuf,
  ) -> Result<Option<PathBuf>> {
    let first = SSTable::open(first_path)?.entries()?;
    let second = SSTable::open(second_path)?.entries()?;

    let path = self.options.sstable_dir.join(format!(
      "{}{}",
      util::random_file_stem(SSTABLE_FILE_STEM_LENGTH),
      SSTABLE_FILE_SUFFIX
    ));
    let mut writer = TableWriter::new(File::create(&path)?, self.options.block_max_bytes);
    let mut written = 0usize;
    let mut emit = |entry: &SstableEntry| -> Result<()> {
      if Self::lookup(state, &entry.key)?.is_some() {
        writer.write_entry(entry)?;
        written += 1;
      }
      Ok(())
    };

    let (mut i, mut j) = (0usize, 0usize);
    while i < first.len() && j < second.len() {
      match first[i].key.cmp(&second[j].key) {
        std::cmp::Ordering::Less => {
          emit(&first[i])?;
          i += 1;
        }
        std::cmp::Ordering::Greater => {
          emit(&second[j])?;
          j += 1;
        }
        std::cmp::Ordering::Equal => {
          if first[i].timestamp > second[j].timestamp {
            emit(&first[i])?;
          } else {
            emit(&second[j])?;
          }
          i += 1;
          j += 1;
        }
      }
    }
    for entry in &first[i..] {
      emit(entry)?;
    }
    for entry in &second[j..] {
      emit(entry)?;
    }
    writer.close()?;

    if written == 0 {
      // nothing survived this pair
      fs::remove_file(&path)?;
      return Ok(None);
    }
    Ok(Some(path))
  }

  /// One vlog GC pass. Scans the log head, re-appends every record some
  /// sstable still points at, truncates the consumed prefix, then repoints
  /// every surviving record at its post-truncation offset.
  fn gc_pass(&self, state: &mut TreeState, max_entries: usize) -> Result<()> {
    let (records, read_bytes) = state.vlog.read_prefix(max_entries)?;
    if read_bytes == 0 {
      return Ok(());
    }

    let mut patches: Vec<(PathBuf, usize, Bytes, ValueMeta)> = Vec::new();
    let mut relocated = 0usize;
    let mut record_offset = 0u32;
    for record in records {
      let record_len = record.encoded_len() as u32;
      let references = Self::exists(&state.sstables, &record.key, record_offset)?;
      record_offset += record_len;
      if references.is_empty() {
        // dead record: no sstable points at it anymore
        continue;
      }
      let meta = state.vlog.append(&record)?;
      // express the fresh pointer in post-truncation coordinates
      let shifted = ValueMeta {
        offset: meta.offset - read_bytes,
        length: meta.length,
      };
      relocated += 1;
      for (path, block) in references {
        patches.push((path, block, record.key.clone(), shifted));
      }
    }

    // Point of no return: everything before this leaves the log intact and
    // the pass safe to retry.
    state.vlog.truncate_prefix(read_bytes)?;
    for path in &state.sstables {
      sstable::shift_value_offsets(path, read_bytes)?;
    }
    for (path, block, key, meta) in &patches {
      sstable::patch_value_meta(path, *block, key, *meta)?;
    }
    info!(
      "vlog gc consumed {} bytes, relocated {} records",
      read_bytes, relocated
    );
    Ok(())
  }
}

fn load_sstable_paths(dir: &PathBuf) -> Result<Vec<PathBuf>> {
  let mut paths = Vec::new();
  for entry in fs::read_dir(dir)? {
    let path = entry?.path();
    if path
      .file_name()
      .and_then(|name| name.to_str())
      .map(|name| name.ends_with(SSTABLE_FILE_SUFFIX))
      .unwrap_or(false)
    {
      paths.push(path);
    }
  }
  // read_dir order is platform-dependent
  paths.sort();
  Ok(paths)
}

fn read_checkpoint(path: &PathBuf) -> Result<Option<u32>> {
  let bytes = match fs::read(path) {
    Ok(bytes) => bytes,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(Errors::Io(e)),
  };
  if bytes.is_empty() {
    return Ok(None);
  }
  if bytes.len() != 4 {
    return Err(Errors::CorruptRecord);
  }
  let mut head = [0u8; 4];
  head.copy_from_slice(&bytes);
  Ok(Some(u32::from_be_bytes(head)))
}

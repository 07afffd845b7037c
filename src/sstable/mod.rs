pub mod writer;

use std::{
  cmp::Ordering,
  fs::{File, OpenOptions},
  io::{Seek, SeekFrom, Write},
  path::Path,
};

use log::warn;

use crate::{
  data::{
    block::{BlockIndex, Footer, FOOTER_SIZE},
    entry::{SstableEntry, ValueMeta, U32_SIZE, U64_SIZE},
  },
  errors::{Errors, Result},
  util,
};

/// Read handle over one finalized sstable file. Only the block index lives in
/// memory; record payloads are read per lookup. Handles are opened per query
/// and dropped after use.
pub struct SSTable {
  file: File,
  indexes: Vec<BlockIndex>,
}

impl SSTable {
  pub fn open<P>(path: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let indexes = read_indexes(&file, file_len)?;
    Ok(Self { file, indexes })
  }

  pub fn block_count(&self) -> usize {
    self.indexes.len()
  }

  /// Point lookup. Returns the key's sstable record; the caller resolves the
  /// value through the vlog.
  pub fn get(&self, key: &[u8]) -> Result<Option<SstableEntry>> {
    Ok(self.locate(key)?.map(|(_, entry)| entry))
  }

  /// Every record in the file, in ascending key order. Used by compaction.
  pub fn entries(&self) -> Result<Vec<SstableEntry>> {
    let mut entries = Vec::new();
    for index in &self.indexes {
      let block = self.read_block(index)?;
      let mut slice = block.as_slice();
      while !slice.is_empty() {
        entries.push(SstableEntry::decode(&mut slice)?);
      }
    }
    Ok(entries)
  }

  /// Full search result: the record together with the position of the block
  /// holding it. Vlog GC needs the block position to know what to patch.
  ///
  /// Range shortcuts against the first and last block, then a binary search
  /// over block first-keys that narrows to the rightmost block whose first
  /// key sorts at or before the probe, then a linear scan of that block.
  pub fn locate(&self, key: &[u8]) -> Result<Option<(usize, SstableEntry)>> {
    if self.indexes.is_empty() {
      return Ok(None);
    }
    let last = self.indexes.len() - 1;
    if last == 0 {
      // single block: nothing to bisect
      return Ok(self.scan_block(0, key)?.map(|e| (0, e)));
    }

    let first_entry = self.first_entry(0)?;
    match key.cmp(&first_entry.key.as_ref()) {
      Ordering::Less => return Ok(None),
      Ordering::Equal => return Ok(Some((0, first_entry))),
      Ordering::Greater => {}
    }

    let last_entry = self.first_entry(last)?;
    match key.cmp(&last_entry.key.as_ref()) {
      // past the last block's first key: only the last block can hold it
      Ordering::Greater => return Ok(self.scan_block(last, key)?.map(|e| (last, e))),
      Ordering::Equal => return Ok(Some((last, last_entry))),
      Ordering::Less => {}
    }

    let (mut lo, mut hi) = (0usize, last - 1);
    while lo < hi {
      let mid = (lo + hi + 1) / 2;
      let probe = self.first_entry(mid)?;
      match key.cmp(&probe.key.as_ref()) {
        Ordering::Equal => return Ok(Some((mid, probe))),
        Ordering::Greater => lo = mid,
        Ordering::Less => hi = mid - 1,
      }
    }
    Ok(self.scan_block(lo, key)?.map(|e| (lo, e)))
  }

  fn scan_block(&self, block: usize, key: &[u8]) -> Result<Option<SstableEntry>> {
    let bytes = self.read_block(&self.indexes[block])?;
    let mut slice = bytes.as_slice();
    while !slice.is_empty() {
      let entry = SstableEntry::decode(&mut slice)?;
      if entry.key == key {
        return Ok(Some(entry));
      }
    }
    Ok(None)
  }

  fn first_entry(&self, block: usize) -> Result<SstableEntry> {
    let bytes = self.read_block(&self.indexes[block])?;
    let mut slice = bytes.as_slice();
    SstableEntry::decode(&mut slice)
  }

  fn read_block(&self, index: &BlockIndex) -> Result<Vec<u8>> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(index.offset as u64))?;
    let mut buf = vec![0u8; index.block_length as usize];
    util::read_exact_or_corrupt(&mut file, &mut buf)?;
    Ok(buf)
  }
}

/// Rewrites the vlog pointer of `key`'s record inside the given block, in
/// place. Used by vlog GC after relocating the record it points at. The file
/// is synced before returning so the patch is durable while the GC lock is
/// still held.
pub(crate) fn patch_value_meta(
  path: &Path,
  block: usize,
  key: &[u8],
  meta: ValueMeta,
) -> Result<()> {
  let file = OpenOptions::new().read(true).write(true).open(path)?;
  let file_len = file.metadata()?.len();
  let indexes = read_indexes(&file, file_len)?;
  let index = match indexes.get(block) {
    Some(index) => *index,
    None => {
      warn!("block {} is out of range in {:?}, skipping patch", block, path);
      return Ok(());
    }
  };

  let mut f = &file;
  f.seek(SeekFrom::Start(index.offset as u64))?;
  let mut bytes = vec![0u8; index.block_length as usize];
  util::read_exact_or_corrupt(&mut f, &mut bytes)?;

  let mut slice = bytes.as_slice();
  let mut position = 0usize;
  while !slice.is_empty() {
    let before = slice.len();
    let entry = SstableEntry::decode(&mut slice)?;
    if entry.key == key {
      let field_position = pointer_field_position(&index, position, entry.key.len());
      let mut buf = [0u8; 8];
      buf[..4].copy_from_slice(&meta.offset.to_be_bytes());
      buf[4..].copy_from_slice(&meta.length.to_be_bytes());
      f.seek(SeekFrom::Start(field_position))?;
      f.write_all(&buf)?;
      file.sync_all()?;
      return Ok(());
    }
    position += before - slice.len();
  }

  warn!("no record for patched key in block {} of {:?}", block, path);
  Ok(())
}

/// Subtracts `boundary` from every record pointer at or past it. Called after
/// the vlog drops its consumed prefix, which shifts every surviving record
/// left by `boundary` bytes.
pub(crate) fn shift_value_offsets(path: &Path, boundary: u32) -> Result<()> {
  if boundary == 0 {
    return Ok(());
  }
  let file = OpenOptions::new().read(true).write(true).open(path)?;
  let file_len = file.metadata()?.len();
  let indexes = read_indexes(&file, file_len)?;

  let mut f = &file;
  for index in &indexes {
    f.seek(SeekFrom::Start(index.offset as u64))?;
    let mut bytes = vec![0u8; index.block_length as usize];
    util::read_exact_or_corrupt(&mut f, &mut bytes)?;

    let mut slice = bytes.as_slice();
    let mut position = 0usize;
    while !slice.is_empty() {
      let before = slice.len();
      let entry = SstableEntry::decode(&mut slice)?;
      if entry.meta.offset >= boundary {
        let field_position = pointer_field_position(index, position, entry.key.len());
        f.seek(SeekFrom::Start(field_position))?;
        f.write_all(&(entry.meta.offset - boundary).to_be_bytes())?;
      }
      position += before - slice.len();
    }
  }
  file.sync_all()?;
  Ok(())
}

/// File position of a record's `value_offset` field, given the record's
/// position inside its block.
fn pointer_field_position(index: &BlockIndex, record_position: usize, key_len: usize) -> u64 {
  index.offset as u64 + record_position as u64 + (U32_SIZE + key_len + U64_SIZE) as u64
}

fn read_indexes(file: &File, file_len: u64) -> Result<Vec<BlockIndex>> {
  if file_len < FOOTER_SIZE as u64 {
    return Err(Errors::InvalidFooter);
  }
  let mut f = file;
  f.seek(SeekFrom::Start(file_len - FOOTER_SIZE as u64))?;
  let mut footer_buf = [0u8; FOOTER_SIZE];
  util::read_exact_or_corrupt(&mut f, &mut footer_buf)?;
  let footer = Footer::decode(&footer_buf)?;

  let index_end = file_len - FOOTER_SIZE as u64;
  if footer.index_offset as u64 > index_end {
    return Err(Errors::CorruptRecord);
  }
  let mut buf = vec![0u8; (index_end - footer.index_offset as u64) as usize];
  f.seek(SeekFrom::Start(footer.index_offset as u64))?;
  util::read_exact_or_corrupt(&mut f, &mut buf)?;
  BlockIndex::decode_section(&buf)
}

#[cfg(test)]
mod tests {
  use bytes::Bytes;

  use super::{writer::TableWriter, *};

  fn write_table(path: &Path, block_length: u32, entries: &[SstableEntry]) {
    let file = File::create(path).unwrap();
    let mut writer = TableWriter::new(file, block_length);
    for entry in entries {
      writer.write_entry(entry).unwrap();
    }
    writer.close().unwrap();
  }

  fn sorted_entries() -> Vec<SstableEntry> {
    ["apple", "banana", "cherry", "damson", "elder", "fig"]
      .iter()
      .enumerate()
      .map(|(i, key)| SstableEntry {
        key: Bytes::copy_from_slice(key.as_bytes()),
        timestamp: 1_700_000_000 + i as u64,
        meta: ValueMeta {
          offset: (i * 32) as u32,
          length: 32,
        },
      })
      .collect()
  }

  #[test]
  fn test_get_every_key_small_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.sstable");
    let entries = sorted_entries();
    // tiny blocks: one entry per block
    write_table(&path, 20, &entries);

    let table = SSTable::open(&path).unwrap();
    assert_eq!(table.block_count(), entries.len());
    for entry in &entries {
      assert_eq!(table.get(&entry.key).unwrap().as_ref(), Some(entry));
    }
  }

  #[test]
  fn test_get_every_key_multi_entry_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.sstable");
    let entries = sorted_entries();
    // two-ish entries per block
    write_table(&path, 50, &entries);

    let table = SSTable::open(&path).unwrap();
    assert!(table.block_count() > 1);
    assert!(table.block_count() < entries.len());
    for entry in &entries {
      assert_eq!(table.get(&entry.key).unwrap().as_ref(), Some(entry));
    }
  }

  #[test]
  fn test_get_single_block_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.sstable");
    let entries = sorted_entries();
    write_table(&path, 4096, &entries);

    let table = SSTable::open(&path).unwrap();
    assert_eq!(table.block_count(), 1);
    for entry in &entries {
      assert_eq!(table.get(&entry.key).unwrap().as_ref(), Some(entry));
    }
    assert_eq!(table.get(b"nope").unwrap(), None);
  }

  #[test]
  fn test_get_misses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.sstable");
    write_table(&path, 20, &sorted_entries());
    let table = SSTable::open(&path).unwrap();

    // before the first key, after the last key, and between keys
    assert_eq!(table.get(b"aaa").unwrap(), None);
    assert_eq!(table.get(b"zzz").unwrap(), None);
    assert_eq!(table.get(b"blueberry").unwrap(), None);
  }

  #[test]
  fn test_entries_in_key_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.sstable");
    let entries = sorted_entries();
    write_table(&path, 50, &entries);

    let table = SSTable::open(&path).unwrap();
    assert_eq!(table.entries().unwrap(), entries);
  }

  #[test]
  fn test_locate_reports_block_position() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.sstable");
    let entries = sorted_entries();
    write_table(&path, 20, &entries);

    let table = SSTable::open(&path).unwrap();
    for (i, entry) in entries.iter().enumerate() {
      let (block, found) = table.locate(&entry.key).unwrap().unwrap();
      assert_eq!(block, i);
      assert_eq!(&found, entry);
    }
    assert_eq!(table.locate(b"nope").unwrap(), None);
  }

  #[test]
  fn test_patch_value_meta_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.sstable");
    let entries = sorted_entries();
    write_table(&path, 50, &entries);

    let (block, _) = SSTable::open(&path)
      .unwrap()
      .locate(b"cherry")
      .unwrap()
      .unwrap();
    let fresh = ValueMeta {
      offset: 9000,
      length: 77,
    };
    patch_value_meta(&path, block, b"cherry", fresh).unwrap();

    let table = SSTable::open(&path).unwrap();
    let patched = table.get(b"cherry").unwrap().unwrap();
    assert_eq!(patched.meta, fresh);
    // neighbors untouched
    assert_eq!(table.get(b"banana").unwrap().unwrap().meta.offset, 32);
    assert_eq!(table.get(b"damson").unwrap().unwrap().meta.offset, 96);
  }

  #[test]
  fn test_shift_value_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.sstable");
    let entries = sorted_entries(); // offsets 0, 32, 64, 96, 128, 160
    write_table(&path, 50, &entries);

    shift_value_offsets(&path, 64).unwrap();

    let table = SSTable::open(&path).unwrap();
    let shifted = table.entries().unwrap();
    let offsets: Vec<u32> = shifted.iter().map(|e| e.meta.offset).collect();
    // pointers below the boundary stay, the rest move left by 64
    assert_eq!(offsets, vec![0, 32, 0, 32, 64, 96]);
  }

  #[test]
  fn test_open_rejects_truncated_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.sstable");
    std::fs::write(&path, [0u8; 2]).unwrap();
    assert!(matches!(SSTable::open(&path), Err(Errors::InvalidFooter)));
  }
}

use std::{
  fs::{self, File, OpenOptions},
  io::{BufReader, Read, Seek, SeekFrom, Write},
  path::PathBuf,
};

use bytes::{Buf, Bytes};
use log::error;

use crate::{
  data::entry::{TableEntry, ValueMeta, U32_SIZE},
  errors::{Errors, Result},
  memtable::Memtable,
  util,
};

const TEMP_FILE_STEM_LENGTH: usize = 10;

/// Append-only log holding full key/value records. The source of truth for
/// values; sstables and the memtable only hold pointers into it.
///
/// The cached logical size is the next append offset. Mutating calls are
/// serialized by the engine's tree lock, so offsets are assigned without
/// races.
pub struct Vlog {
  path: PathBuf,
  checkpoint_path: PathBuf,
  size: u32,
  sync_writes: bool,
}

impl Vlog {
  pub fn open<P>(path: P, checkpoint_path: P, sync_writes: bool) -> Result<Self>
  where
    P: Into<PathBuf>,
  {
    let path = path.into();
    // Make sure the file exists so size and reads are well-defined.
    OpenOptions::new().create(true).append(true).open(&path)?;
    let size = fs::metadata(&path)?.len() as u32;
    Ok(Self {
      path,
      checkpoint_path: checkpoint_path.into(),
      size,
      sync_writes,
    })
  }

  /// Next append offset; also the current logical file size.
  pub fn size(&self) -> u32 {
    self.size
  }

  /// Appends one record and returns its pointer. The cached size reflects the
  /// write immediately so the next append computes the right offset.
  pub fn append(&mut self, entry: &TableEntry) -> Result<ValueMeta> {
    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)?;
    let encoded = entry.encode();
    file.write_all(&encoded)?;
    if self.sync_writes {
      file.sync_all()?;
    }
    let meta = ValueMeta {
      offset: self.size,
      length: encoded.len() as u32,
    };
    self.size += encoded.len() as u32;
    Ok(meta)
  }

  /// Reads back exactly the record a pointer describes.
  pub fn get(&self, meta: ValueMeta) -> Result<TableEntry> {
    let mut file = File::open(&self.path)?;
    file.seek(SeekFrom::Start(meta.offset as u64))?;
    let mut buf = vec![0u8; meta.length as usize];
    util::read_exact_or_corrupt(&mut file, &mut buf)?;
    TableEntry::decode(&buf)
  }

  /// Durably overwrites the checkpoint file with the current logical size,
  /// the replay boundary for the next restart. The checkpoint is truncated
  /// and rewritten, never appended to.
  pub fn flush_head(&self) -> Result<()> {
    let mut file = OpenOptions::new()
      .create(true)
      .write(true)
      .open(&self.checkpoint_path)?;
    file.set_len(0)?;
    file.write_all(&self.size.to_be_bytes())?;
    file.sync_all()?;
    Ok(())
  }

  /// Replays every record written after `head_offset` into the memtable.
  /// These are writes that never made it into an sstable before the last
  /// shutdown.
  pub fn restore_to(&mut self, head_offset: u32, memtable: &mut Memtable) -> Result<()> {
    let file_size = fs::metadata(&self.path)?.len();
    if file_size <= head_offset as u64 {
      self.size = file_size as u32;
      return Ok(());
    }

    let mut file = File::open(&self.path)?;
    file.seek(SeekFrom::Start(head_offset as u64))?;
    let mut buf = Vec::with_capacity((file_size - head_offset as u64) as usize);
    file.read_to_end(&mut buf)?;

    let mut slice = buf.as_slice();
    let mut offset = head_offset;
    while slice.has_remaining() {
      let (entry, record_len) = decode_record(&mut slice)?;
      memtable.put(
        entry.key,
        ValueMeta {
          offset,
          length: record_len,
        },
      )?;
      offset += record_len;
    }
    self.size = file_size as u32;
    Ok(())
  }

  /// The GC scan: decodes up to `max_entries` records from the start of the
  /// log, returning them together with the number of bytes consumed.
  pub fn read_prefix(&self, max_entries: usize) -> Result<(Vec<TableEntry>, u32)> {
    let mut reader = BufReader::new(File::open(&self.path)?);
    let mut records = Vec::new();
    let mut read_bytes = 0u32;
    while records.len() < max_entries && read_bytes < self.size {
      let (entry, record_len) = decode_record_from(&mut reader)?;
      records.push(entry);
      read_bytes += record_len;
    }
    Ok((records, read_bytes))
  }

  /// Drops the consumed prefix `[0, read_bytes)` by copying the remainder to
  /// a sibling temp file and atomically renaming it over the original.
  pub fn truncate_prefix(&mut self, read_bytes: u32) -> Result<()> {
    let temp_path = self
      .path
      .with_file_name(util::random_file_stem(TEMP_FILE_STEM_LENGTH));
    let mut source = File::open(&self.path)?;
    source.seek(SeekFrom::Start(read_bytes as u64))?;
    let mut target = File::create(&temp_path)?;
    std::io::copy(&mut source, &mut target)?;
    target.sync_all()?;
    drop(target);

    if let Err(e) = fs::rename(&temp_path, &self.path) {
      error!("failed to replace vlog after truncation: {}", e);
      let _ = fs::remove_file(&temp_path);
      return Err(Errors::Io(e));
    }
    self.size = fs::metadata(&self.path)?.len() as u32;
    Ok(())
  }
}

/// Decodes one record from the front of a byte slice, advancing the slice.
/// Returns the record and its on-disk length.
fn decode_record(buf: &mut &[u8]) -> Result<(TableEntry, u32)> {
  if buf.remaining() < U32_SIZE * 2 {
    return Err(Errors::CorruptRecord);
  }
  let key_len = buf.get_u32() as usize;
  let value_len = buf.get_u32() as usize;
  if buf.remaining() < key_len + value_len {
    return Err(Errors::CorruptRecord);
  }
  let key = buf.copy_to_bytes(key_len);
  let value = buf.copy_to_bytes(value_len);
  let record_len = (U32_SIZE * 2 + key_len + value_len) as u32;
  Ok((TableEntry::new(key, value), record_len))
}

/// Streaming variant of [`decode_record`] for sequential scans.
fn decode_record_from<R>(reader: &mut R) -> Result<(TableEntry, u32)>
where
  R: Read,
{
  let mut header = [0u8; U32_SIZE * 2];
  util::read_exact_or_corrupt(reader, &mut header)?;
  let mut header_buf = &header[..];
  let key_len = header_buf.get_u32() as usize;
  let value_len = header_buf.get_u32() as usize;

  let mut body = vec![0u8; key_len + value_len];
  util::read_exact_or_corrupt(reader, &mut body)?;
  let key = Bytes::copy_from_slice(&body[..key_len]);
  let value = Bytes::copy_from_slice(&body[key_len..]);
  let record_len = (U32_SIZE * 2 + key_len + value_len) as u32;
  Ok((TableEntry::new(key, value), record_len))
}

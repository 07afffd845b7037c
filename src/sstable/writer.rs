use std::{fs::File, io::Write};

use crate::{
  data::{
    block::{BlockIndex, Footer},
    entry::SstableEntry,
  },
  errors::Result,
};

/// Builds one sstable file from a key-ascending stream of entries. Records
/// are grouped into blocks of roughly `max_block_length` bytes; each closed
/// block gets a `BlockIndex` record, written out before the footer on close.
///
/// Entries must be supplied in ascending key order; the block index and the
/// reader's binary search depend on it.
pub struct TableWriter {
  file: File,
  max_block_length: u32,
  current_block_position: u32,
  size: u32,
  index: Vec<BlockIndex>,
}

impl TableWriter {
  pub fn new(file: File, max_block_length: u32) -> Self {
    Self {
      file,
      max_block_length,
      current_block_position: 0,
      size: 0,
      index: Vec::new(),
    }
  }

  /// Appends one entry, closing the current block once it reaches the block
  /// length threshold. Returns the bytes written.
  pub fn write_entry(&mut self, entry: &SstableEntry) -> Result<u32> {
    let encoded = entry.encode();
    self.file.write_all(&encoded)?;
    self.size += encoded.len() as u32;
    if self.block_is_full() {
      self.close_block();
    }
    Ok(encoded.len() as u32)
  }

  /// Finalizes the file: trailing block, index section, footer. Consumes the
  /// writer so it cannot be reused.
  pub fn close(mut self) -> Result<()> {
    self.close_block();
    let footer = Footer {
      index_offset: self.size,
    };
    for index in &self.index {
      self.file.write_all(&index.encode())?;
    }
    self.file.write_all(&footer.encode())?;
    self.file.sync_all()?;
    Ok(())
  }

  fn block_is_full(&self) -> bool {
    self.size - self.current_block_position >= self.max_block_length
  }

  fn close_block(&mut self) {
    if self.size > self.current_block_position {
      self.index.push(BlockIndex {
        offset: self.current_block_position,
        block_length: self.size - self.current_block_position,
      });
      self.current_block_position = self.size;
    }
  }
}

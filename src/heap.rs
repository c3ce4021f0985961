/*!
  Untyped memory for the `alloc`, `free` and heap load/store instructions.

  Bytecode sees heap memory as plain 64 bit addresses it can do arithmetic on. Instead of handing
  out host pointers, the heap is an arena of owned byte buffers and an address is

  ```text
  [slot : 32][offset : 32]
  ```

  so zero is never a valid address, and adding an offset to an address moves within its block.
  Every access is checked: an address into a freed or unknown block, or one running past the end
  of its block, is a `BadAccess` fault rather than undefined behavior.

  Slot numbers are handed out once and never reused, so a stale address stays invalid after its
  block is freed. A freed block's memory is released immediately and the arena only holds live
  blocks. The price is a limit of 2^32 - 1 allocations over the life of a heap; past that every
  `alloc` is an `OutOfMemory` fault.

  Multi-byte values are stored little endian.
*/

use std::collections::HashMap;
use std::convert::TryFrom;

use crate::status::Status;

/// The largest single allocation, in bytes.
pub const MAX_ALLOCATION: u64 = 1 << 30;

/// The most slots a heap hands out in its lifetime.
pub const MAX_SLOTS: u64 = (1 << OFFSET_BITS) - 1;

const OFFSET_BITS: u32 = 32;
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

#[derive(Clone, Debug, Default)]
pub struct Heap {
  blocks : HashMap<u64, Vec<u8>>, // live blocks by slot
  issued : u64,                   // slots handed out so far; the last one issued is `issued`
}

impl Heap {
  pub fn new() -> Heap {
    Heap::default()
  }

  /// Allocates `size` zeroed bytes and returns the address of the first one.
  pub fn alloc(&mut self, size: u64) -> Result<u64, Status> {
    if size > MAX_ALLOCATION || self.issued >= MAX_SLOTS {
      return Err(Status::OutOfMemory);
    }

    let mut block: Vec<u8> = Vec::new();
    block.try_reserve_exact(size as usize).map_err(|_| Status::OutOfMemory)?;
    block.resize(size as usize, 0);

    self.issued += 1;
    self.blocks.insert(self.issued, block);
    Ok(self.issued << OFFSET_BITS)
  }

  /// Releases the block starting at `address`. Freeing address zero does nothing.
  pub fn free(&mut self, address: u64) -> Result<(), Status> {
    if address == 0 {
      return Ok(());
    }
    if address & OFFSET_MASK != 0 {
      return Err(Status::BadAccess(address));
    }

    match self.blocks.remove(&slot(address)) {
      Some(_) => Ok(()),
      None    => Err(Status::BadAccess(address))
    }
  }

  /// Reads `width` bytes (1, 2, 4 or 8) at `address`, zero extended.
  pub fn load(&self, address: u64, width: usize) -> Result<u64, Status> {
    let block = self.blocks.get(&slot(address)).ok_or(Status::BadAccess(address))?;
    let range = range(block, address, width)?;

    let mut buffer = [0u8; 8];
    buffer[..width].copy_from_slice(&block[range]);
    Ok(u64::from_le_bytes(buffer))
  }

  /// Writes the low `width` bytes of `value` at `address`.
  pub fn store(&mut self, address: u64, width: usize, value: u64) -> Result<(), Status> {
    let block = self.blocks.get_mut(&slot(address)).ok_or(Status::BadAccess(address))?;
    let range = range(block, address, width)?;

    block[range].copy_from_slice(&value.to_le_bytes()[..width]);
    Ok(())
  }

  /// Number of blocks allocated and not yet freed.
  pub fn live_blocks(&self) -> usize {
    self.blocks.len()
  }

  /// The contents of the live block `address` points into.
  pub fn block(&self, address: u64) -> Option<&[u8]> {
    self.blocks.get(&slot(address)).map(Vec::as_slice)
  }
}

// region Address arithmetic

fn slot(address: u64) -> u64 {
  address >> OFFSET_BITS
}

/// The bytes of `block` that `width` bytes at `address` cover.
fn range(block: &[u8], address: u64, width: usize) -> Result<std::ops::Range<usize>, Status> {
  let start = usize::try_from(address & OFFSET_MASK).map_err(|_| Status::BadAccess(address))?;
  let end = start.checked_add(width).ok_or(Status::BadAccess(address))?;
  if end > block.len() {
    return Err(Status::BadAccess(address));
  }
  Ok(start..end)
}

// endregion

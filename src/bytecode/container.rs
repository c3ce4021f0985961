/*!
  The on-disk container for a program.

  ```text
  offset 0:  u8   0x2C
  offset 1:  u8   0xDF when the fields below are big endian, 0xD0 when little endian
  offset 2:  u64  call stack size
  offset 10: u64  handler stack size
  offset 18: u64  instruction count
  offset 26: u32  instructions, `instruction count` of them
  ```

  Reading converts every field from the order the header declares to host values. Writing
  encodes in the order named by `magic[1]`, so a container written on one host reads back the
  same on any other.
*/

use std::convert::TryFrom;
use std::io::{ErrorKind, Read, Write};

use thiserror::Error;

use super::binary::Word;
use crate::status::Status;
use crate::vm::Vm;

pub const MAGIC                : u8 = 0x2C;
pub const MAGIC_BIG_ENDIAN     : u8 = 0xDF;
pub const MAGIC_LITTLE_ENDIAN  : u8 = 0xD0;

/// Size in bytes of everything before the first instruction.
pub const HEADER_SIZE: usize = 26;

#[derive(Debug, Error)]
pub enum BytecodeError {
  #[error("invalid magic header of 0x{0:x} 0x{1:x}")]
  BadMagic(u8, u8),
  #[error("bytecode ended before the header or code was complete")]
  Truncated,
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ByteOrder {
  Big,
  Little,
}

impl ByteOrder {
  pub fn native() -> ByteOrder {
    if cfg!(target_endian = "big") {
      ByteOrder::Big
    } else {
      ByteOrder::Little
    }
  }

  /// The second magic byte that declares this order.
  pub fn tag(&self) -> u8 {
    match self {
      ByteOrder::Big    => MAGIC_BIG_ENDIAN,
      ByteOrder::Little => MAGIC_LITTLE_ENDIAN,
    }
  }

  fn from_tag(tag: u8) -> Option<ByteOrder> {
    match tag {
      MAGIC_BIG_ENDIAN    => Some(ByteOrder::Big),
      MAGIC_LITTLE_ENDIAN => Some(ByteOrder::Little),
      _                   => None
    }
  }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Bytecode {
  pub magic              : [u8; 2],
  pub call_stack_size    : u64,
  pub handler_stack_size : u64,
  pub code               : Vec<Word>,
}

impl Bytecode {
  /// A container tagged with the host's byte order.
  pub fn new(call_stack_size: u64, handler_stack_size: u64, code: Vec<Word>) -> Bytecode {
    Bytecode {
      magic: [MAGIC, ByteOrder::native().tag()],
      call_stack_size,
      handler_stack_size,
      code
    }
  }

  pub fn with_byte_order(mut self, order: ByteOrder) -> Bytecode {
    self.magic[1] = order.tag();
    self
  }

  pub fn is_valid_magic(&self) -> bool {
    self.byte_order().is_some()
  }

  /// The declared byte order, `None` when the magic bytes are invalid.
  pub fn byte_order(&self) -> Option<ByteOrder> {
    match self.magic[0] {
      MAGIC => ByteOrder::from_tag(self.magic[1]),
      _     => None
    }
  }

  pub fn read<R: Read>(reader: &mut R) -> Result<Bytecode, BytecodeError> {
    let mut magic = [0u8; 2];
    read_exact(reader, &mut magic)?;
    let order = match (magic[0], ByteOrder::from_tag(magic[1])) {
      (MAGIC, Some(order)) => order,
      _                    => return Err(BytecodeError::BadMagic(magic[0], magic[1]))
    };

    let call_stack_size    = read_u64(reader, order)?;
    let handler_stack_size = read_u64(reader, order)?;
    let count              = read_u64(reader, order)?;

    // The count is untrusted, so the buffer grows as words actually arrive.
    let mut code: Vec<Word> = Vec::new();
    for _ in 0..count {
      code.push(read_word(reader, order)?);
    }

    Ok(Bytecode { magic, call_stack_size, handler_stack_size, code })
  }

  /// Writes the container in its declared byte order. Nothing is written when the magic bytes
  /// are invalid.
  pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), BytecodeError> {
    let order = self.byte_order()
                    .ok_or(BytecodeError::BadMagic(self.magic[0], self.magic[1]))?;

    let mut buffer: Vec<u8> = Vec::with_capacity(HEADER_SIZE + 4 * self.code.len());
    buffer.extend_from_slice(&self.magic);
    for field in [self.call_stack_size, self.handler_stack_size, self.code.len() as u64].iter() {
      match order {
        ByteOrder::Big    => buffer.extend_from_slice(&field.to_be_bytes()),
        ByteOrder::Little => buffer.extend_from_slice(&field.to_le_bytes()),
      }
    }
    for word in self.code.iter() {
      match order {
        ByteOrder::Big    => buffer.extend_from_slice(&word.to_be_bytes()),
        ByteOrder::Little => buffer.extend_from_slice(&word.to_le_bytes()),
      }
    }

    writer.write_all(&buffer)?;
    Ok(())
  }

  /**
    Runs the program on `vm`, which is first reset to a fresh machine with the stack capacities
    from the header. The VM keeps its input and output streams. Returns the final status, and
    the VM is left as the program left it for inspection.
  */
  pub fn execute(&self, vm: &mut Vm) -> Status {
    let call_stack_size    = usize::try_from(self.call_stack_size).unwrap_or(usize::MAX);
    let handler_stack_size = usize::try_from(self.handler_stack_size).unwrap_or(usize::MAX);

    let previous = std::mem::replace(vm, Vm::new(call_stack_size, handler_stack_size));
    vm.input  = previous.input;
    vm.output = previous.output;

    vm.execute(&self.code)
  }

  /// Drops the code. Releasing twice is harmless.
  pub fn release(&mut self) {
    self.code = Vec::new();
  }
}

// region Field readers

fn read_exact<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<(), BytecodeError> {
  reader.read_exact(buffer).map_err(|error| {
    match error.kind() {
      ErrorKind::UnexpectedEof => BytecodeError::Truncated,
      _                        => BytecodeError::Io(error)
    }
  })
}

fn read_u64<R: Read>(reader: &mut R, order: ByteOrder) -> Result<u64, BytecodeError> {
  let mut bytes = [0u8; 8];
  read_exact(reader, &mut bytes)?;
  Ok(match order {
    ByteOrder::Big    => u64::from_be_bytes(bytes),
    ByteOrder::Little => u64::from_le_bytes(bytes),
  })
}

fn read_word<R: Read>(reader: &mut R, order: ByteOrder) -> Result<Word, BytecodeError> {
  let mut bytes = [0u8; 4];
  read_exact(reader, &mut bytes)?;
  Ok(match order {
    ByteOrder::Big    => Word::from_be_bytes(bytes),
    ByteOrder::Little => Word::from_le_bytes(bytes),
  })
}

// endregion

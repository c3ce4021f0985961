/*!

  Programs for the VM are sequences of 32 bit instruction words. A word is read under one of
  three layouts (register, immediate or target), and which one applies is decided by the opcode
  in its low six bits. See `binary` for the bit layouts.

  Instructions are not stored as Rust enum values with their operands: the VM fetches and
  decodes raw words, so the code array stays four bytes per instruction. `Instruction` is the
  unencoded form used to build and inspect programs. Decoding a word and encoding the result
  reproduces the word exactly.

  A program travels in a `Bytecode` container (`container`), which carries the stack capacities
  the program expects. The `assembly` module builds containers from text and the `disassembly`
  module renders them back.

*/

mod assembly;
mod binary;
mod container;
mod disassembly;
mod instruction;

pub use assembly::{assemble, assemble_with_labels, AssemblyError, DEFAULT_HANDLER_STACK_SIZE,
                   DEFAULT_STACK_SIZE};
pub use binary::{encode_instruction, opcode_bits, sign_extend, try_decode_instruction,
                 ImmediateForm, RegisterForm, TargetForm, Word, IMMEDIATE_BITS, TARGET_BITS};
pub use container::{ByteOrder, Bytecode, BytecodeError, HEADER_SIZE, MAGIC, MAGIC_BIG_ENDIAN,
                    MAGIC_LITTLE_ENDIAN};
pub use disassembly::{disassemble, render_instruction, DisassemblyError};
pub use instruction::*;

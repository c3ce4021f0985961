/*!
  A register virtual machine with structured exception handling.

  The machine has 32 integer and 32 floating point registers, a bounded call stack, a bounded
  stack of exception handlers, and a byte addressed heap. A fault (division by zero, a stack
  bound, a bad opcode, a bad heap access, or a value given to `throw`) unwinds to the most
  recently installed handler, or ends the run when there is none.

  ```ignore
  let bytecode = rlvm::assemble(&["mov r0,42\nhalt r0"])?;
  let mut vm = rlvm::Vm::new(0, 0);
  assert_eq!(bytecode.execute(&mut vm), rlvm::Status::Clean(42));
  ```
*/

#[macro_use] extern crate prettytable;
#[macro_use] extern crate lazy_static;

pub mod bytecode;
pub mod heap;
pub mod labels;
pub mod status;
pub mod vm;

pub use bytecode::{assemble, disassemble, Bytecode, Instruction, Opcode, Word};
pub use status::{Status, StatusKind};
pub use vm::Vm;

//! The status register: how a run of the VM ended, or which fault is being unwound.

use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display as StrumDisplay, IntoStaticStr};

use crate::bytecode::Word;

/// The fieldless discriminant of a `Status`. The numeric values are what `ldek` loads and what
/// the command line driver exits with for faults.
#[derive(
StrumDisplay, IntoStaticStr, TryFromPrimitive, IntoPrimitive,
Clone,        Copy,          Eq, PartialEq,    Debug,       Hash
)]
#[repr(u8)]
pub enum StatusKind {
  #[strum(to_string = "CLEAN")]        Clean,
  #[strum(to_string = "DIV_BY_ZERO")]  DivByZero,
  #[strum(to_string = "STACK_OFLOW")]  StackOverflow,
  #[strum(to_string = "STACK_UFLOW")]  StackUnderflow,
  #[strum(to_string = "OUT_OF_MEM")]   OutOfMemory,
  #[strum(to_string = "BAD_OPCODE")]   BadOpcode,
  #[strum(to_string = "BAD_ACCESS")]   BadAccess,
  #[strum(to_string = "USER_DEFINED")] UserDefined,
}

/// Either a clean halt carrying the program's return value, or a fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Status {
  /// Normal termination with the value given to `halt`.
  Clean(u64),
  DivByZero,
  StackOverflow,
  StackUnderflow,
  /// The heap could not satisfy an allocation.
  OutOfMemory,
  /// Carries the raw instruction word that failed to decode.
  BadOpcode(Word),
  /// Carries the heap address, or the byte, that could not be accessed.
  BadAccess(u64),
  /// Raised by `throw`, carrying the thrown value.
  UserDefined(u64),
}

impl Default for Status {
  fn default() -> Status {
    Status::Clean(0)
  }
}

impl Status {
  pub fn kind(&self) -> StatusKind {
    match self {
      Status::Clean(_)       => StatusKind::Clean,
      Status::DivByZero      => StatusKind::DivByZero,
      Status::StackOverflow  => StatusKind::StackOverflow,
      Status::StackUnderflow => StatusKind::StackUnderflow,
      Status::OutOfMemory    => StatusKind::OutOfMemory,
      Status::BadOpcode(_)   => StatusKind::BadOpcode,
      Status::BadAccess(_)   => StatusKind::BadAccess,
      Status::UserDefined(_) => StatusKind::UserDefined,
    }
  }

  /// The auxiliary value, zero for kinds that carry none.
  pub fn id(&self) -> u64 {
    match self {
      | Status::Clean(value)
      | Status::BadAccess(value)
      | Status::UserDefined(value) => *value,
      Status::BadOpcode(word)      => *word as u64,
      _                            => 0
    }
  }

  pub fn is_clean(&self) -> bool {
    match self {
      Status::Clean(_) => true,
      _ => false
    }
  }

  pub fn is_fault(&self) -> bool {
    !self.is_clean()
  }
}

impl Display for Status {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Status::Clean(_) | Status::UserDefined(_) | Status::BadAccess(_) => {
        write!(f, "{} ({})", self.kind(), self.id())
      }
      Status::BadOpcode(word) => {
        write!(f, "{} (0x{:08x})", self.kind(), word)
      }
      _ => {
        write!(f, "{}", self.kind())
      }
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kinds_and_ids() {
    assert_eq!(Status::default(), Status::Clean(0));
    assert_eq!(Status::Clean(12).kind(), StatusKind::Clean);
    assert_eq!(Status::Clean(12).id(), 12);
    assert_eq!(Status::UserDefined(7).id(), 7);
    assert_eq!(Status::BadOpcode(0xFFFF_FFFF).id(), 0xFFFF_FFFF);
    assert_eq!(Status::DivByZero.id(), 0);
    assert!(Status::StackUnderflow.is_fault());
    assert!(!Status::Clean(1).is_fault());
  }

  #[test]
  fn kind_codes() {
    assert_eq!(Into::<u8>::into(StatusKind::Clean), 0);
    assert_eq!(Into::<u8>::into(StatusKind::UserDefined), 7);
    assert_eq!(Status::StackOverflow.kind().to_string(), "STACK_OFLOW");
  }

  #[test]
  fn display() {
    assert_eq!(Status::Clean(3).to_string(), "CLEAN (3)");
    assert_eq!(Status::BadOpcode(42).to_string(), "BAD_OPCODE (0x0000002a)");
    assert_eq!(Status::DivByZero.to_string(), "DIV_BY_ZERO");
  }
}

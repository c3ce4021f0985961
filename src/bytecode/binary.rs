/*!
  This module is responsible for the encoding and decoding of binary instructions.

  Every instruction is a single 32 bit word. The same bits are read under one of three layouts,
  and which layout applies is a property of the opcode in the low six bits:

  ```text
   31        26 25     21 20     16 15     11 10      6 5        0
  |    fn     |   sa    |   rd    |   rt    |   rs    |  opcode  |  register form
  |          immediate            |   rt    |   rs    |  opcode  |  immediate form
  |                       target                    |  opcode  |  target form
  ```

  The views below are plain masks and shifts, so a word means the same thing on every host.
*/

use super::{Instruction, Layout, Opcode};

// If you change this you must also change the field views below.
pub type Word = u32;

const OPCODE_MASK    : Word = 0x3F;
const REGISTER_MASK  : Word = 0x1F;
const IMMEDIATE_MASK : Word = 0xFFFF;
const TARGET_MASK    : Word = 0x03FF_FFFF;

const RS_SHIFT        : u32 = 6;
const RT_SHIFT        : u32 = 11;
const RD_SHIFT        : u32 = 16;
const SA_SHIFT        : u32 = 21;
const FN_SHIFT        : u32 = 26;
const IMMEDIATE_SHIFT : u32 = 16;
const TARGET_SHIFT    : u32 = 6;

/// Width in bits of the immediate field.
pub const IMMEDIATE_BITS: u32 = 16;
/// Width in bits of the target field.
pub const TARGET_BITS: u32 = 26;

/// The opcode bits of any word. They sit in the same place in all three layouts.
#[inline]
pub fn opcode_bits(word: Word) -> u8 {
  (word & OPCODE_MASK) as u8
}

/**
  Interprets the low `width` bits of `value` as a two's complement number.

  `sign_extend(0x3FF_FFFD, 26) == -3`.
*/
#[inline]
pub fn sign_extend(value: u64, width: u32) -> i64 {
  let unused = 64 - width;
  ((value << unused) as i64) >> unused
}

/// `[opcode:6][rs:5][rt:5][rd:5][sa:5][fn:6]`
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct RegisterForm {
  pub opcode : u8,
  pub rs     : u8,
  pub rt     : u8,
  pub rd     : u8,
  pub sa     : u8,
  pub func   : u8,
}

/// `[opcode:6][rs:5][rt:5][immediate:16]`
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ImmediateForm {
  pub opcode    : u8,
  pub rs        : u8,
  pub rt        : u8,
  pub immediate : u16,
}

/// `[opcode:6][target:26]`
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct TargetForm {
  pub opcode : u8,
  pub target : u32,
}

impl RegisterForm {
  pub fn from_word(word: Word) -> RegisterForm {
    RegisterForm {
      opcode : opcode_bits(word),
      rs     : ((word >> RS_SHIFT) & REGISTER_MASK) as u8,
      rt     : ((word >> RT_SHIFT) & REGISTER_MASK) as u8,
      rd     : ((word >> RD_SHIFT) & REGISTER_MASK) as u8,
      sa     : ((word >> SA_SHIFT) & REGISTER_MASK) as u8,
      func   : ((word >> FN_SHIFT) & OPCODE_MASK) as u8,
    }
  }

  /// Fields wider than their slot are truncated to it.
  pub fn to_word(&self) -> Word {
    (self.opcode as Word & OPCODE_MASK)
      | ((self.rs   as Word & REGISTER_MASK) << RS_SHIFT)
      | ((self.rt   as Word & REGISTER_MASK) << RT_SHIFT)
      | ((self.rd   as Word & REGISTER_MASK) << RD_SHIFT)
      | ((self.sa   as Word & REGISTER_MASK) << SA_SHIFT)
      | ((self.func as Word & OPCODE_MASK)   << FN_SHIFT)
  }
}

impl ImmediateForm {
  pub fn from_word(word: Word) -> ImmediateForm {
    ImmediateForm {
      opcode    : opcode_bits(word),
      rs        : ((word >> RS_SHIFT) & REGISTER_MASK) as u8,
      rt        : ((word >> RT_SHIFT) & REGISTER_MASK) as u8,
      immediate : ((word >> IMMEDIATE_SHIFT) & IMMEDIATE_MASK) as u16,
    }
  }

  pub fn to_word(&self) -> Word {
    (self.opcode as Word & OPCODE_MASK)
      | ((self.rs as Word & REGISTER_MASK) << RS_SHIFT)
      | ((self.rt as Word & REGISTER_MASK) << RT_SHIFT)
      | ((self.immediate as Word) << IMMEDIATE_SHIFT)
  }

  /// The immediate read as a signed 16 bit offset.
  pub fn offset(&self) -> i64 {
    sign_extend(self.immediate as u64, IMMEDIATE_BITS)
  }
}

impl TargetForm {
  pub fn from_word(word: Word) -> TargetForm {
    TargetForm {
      opcode : opcode_bits(word),
      target : (word >> TARGET_SHIFT) & TARGET_MASK,
    }
  }

  pub fn to_word(&self) -> Word {
    (self.opcode as Word & OPCODE_MASK) | ((self.target & TARGET_MASK) << TARGET_SHIFT)
  }

  /// The target read as a signed 26 bit displacement.
  pub fn offset(&self) -> i64 {
    sign_extend(self.target as u64, TARGET_BITS)
  }
}

/// Decodes a word into the layout its opcode selects. Returns `None` for opcodes outside the
/// instruction set.
pub fn try_decode_instruction(word: Word) -> Option<Instruction> {
  let opcode = Opcode::from_word(word)?;

  let instruction =
    match opcode.layout() {

      Layout::Register => {
        let form = RegisterForm::from_word(word);
        Instruction::Register {
          opcode,
          rs   : form.rs,
          rt   : form.rt,
          rd   : form.rd,
          sa   : form.sa,
          func : form.func,
        }
      }

      Layout::Immediate => {
        let form = ImmediateForm::from_word(word);
        Instruction::Immediate {
          opcode,
          rs        : form.rs,
          rt        : form.rt,
          immediate : form.immediate,
        }
      }

      Layout::Target => {
        Instruction::Target {
          opcode,
          target: TargetForm::from_word(word).target,
        }
      }

    };

  Some(instruction)
}

/**
  Encodes the instruction into bytecode. It is the caller's responsibility to use the
  `Instruction` variant matching the opcode's layout; the opcode bits are written either way.
*/
pub fn encode_instruction(instruction: Instruction) -> Word {
  match instruction {

    Instruction::Register { opcode, rs, rt, rd, sa, func } => {
      RegisterForm { opcode: opcode.code(), rs, rt, rd, sa, func }.to_word()
    }

    Instruction::Immediate { opcode, rs, rt, immediate } => {
      ImmediateForm { opcode: opcode.code(), rs, rt, immediate }.to_word()
    }

    Instruction::Target { opcode, target } => {
      TargetForm { opcode: opcode.code(), target }.to_word()
    }

  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn register_fields_land_in_place() {
    let form = RegisterForm { opcode: 1, rs: 2, rt: 3, rd: 4, sa: 5, func: 0x24 };
    let word = form.to_word();

    assert_eq!(word & 0x3F, 1);
    assert_eq!((word >> 6) & 0x1F, 2);
    assert_eq!((word >> 11) & 0x1F, 3);
    assert_eq!((word >> 16) & 0x1F, 4);
    assert_eq!((word >> 21) & 0x1F, 5);
    assert_eq!(word >> 26, 0x24);
    assert_eq!(RegisterForm::from_word(word), form);
  }

  #[test]
  fn opcode_is_layout_independent() {
    let word = 0xDEAD_BEEF;
    assert_eq!(RegisterForm::from_word(word).opcode, opcode_bits(word));
    assert_eq!(ImmediateForm::from_word(word).opcode, opcode_bits(word));
    assert_eq!(TargetForm::from_word(word).opcode, opcode_bits(word));
  }

  #[test]
  fn views_share_bits() {
    let word = ImmediateForm { opcode: 3, rs: 7, rt: 9, immediate: 0xABCD }.to_word();
    let register = RegisterForm::from_word(word);

    assert_eq!(register.rs, 7);
    assert_eq!(register.rt, 9);
    assert_eq!(register.rd as u16 | (register.sa as u16) << 5 | (register.func as u16) << 10, 0xABCD);
  }

  #[test]
  fn sign_extension() {
    assert_eq!(sign_extend(0xFFFF, 16), -1);
    assert_eq!(sign_extend(0x7FFF, 16), 32767);
    assert_eq!(sign_extend(0x8000, 16), -32768);
    assert_eq!(sign_extend(0x3FF_FFFD, 26), -3);
    assert_eq!(sign_extend(0x1FF_FFFF, 26), 0x1FF_FFFF);

    let jump_back = TargetForm { opcode: 24, target: (-3i32) as u32 }.to_word();
    assert_eq!(TargetForm::from_word(jump_back).offset(), -3);
  }

  #[test]
  fn oversized_fields_are_masked() {
    let form = RegisterForm { opcode: 0xFF, rs: 0xFF, rt: 0, rd: 0, sa: 0, func: 0 };
    assert_eq!(form.to_word(), 0x3F | (0x1F << 6));
  }

  #[test]
  fn decode_rejects_unknown_opcodes() {
    assert_eq!(try_decode_instruction(42), None);
    assert_eq!(try_decode_instruction(63 | 0xFFFF_FF00), None);
  }

  #[test]
  fn decode_then_encode_is_identity() {
    let words = [
      RegisterForm { opcode: 1, rs: 31, rt: 30, rd: 29, sa: 28, func: 0x3F }.to_word(),
      ImmediateForm { opcode: 15, rs: 1, rt: 2, immediate: 0xFFFF }.to_word(),
      TargetForm { opcode: 12, target: 0x3FF_FFFF }.to_word(),
      TargetForm { opcode: 28, target: 17 }.to_word(),
    ];

    for word in words.iter() {
      let instruction = try_decode_instruction(*word).unwrap();
      assert_eq!(encode_instruction(instruction), *word);
    }
  }
}

use std::convert::TryFrom;
use std::fmt::{Display, Formatter};

use strum_macros::{Display as StrumDisplay, EnumString, IntoStaticStr};
use num_enum::{TryFromPrimitive, IntoPrimitive};

use super::binary::{encode_instruction, opcode_bits, Word, TARGET_BITS};
use super::disassembly::render_instruction;

/**
  Opcodes of the virtual machine.

  The discriminant of each variant is the value stored in the low six bits of an instruction
  word, so the order the opcodes are listed below is significant and must match the dispatch in
  `Vm::dispatch` and the render table of the disassembler.
*/
#[derive(
StrumDisplay, IntoStaticStr, TryFromPrimitive, IntoPrimitive,
Clone,        Copy,          Eq, PartialEq,    Debug,       Hash
)]
#[repr(u8)]
pub enum Opcode {
  // Register form //
  Misc,              // sub-function in `fn`, see `MiscFunction`
  Alu,               // rd = rs op (rt pre-shifted by sa)
  FloatAlu,          // fpD = fpS op fpT

  // Immediate form //
  LoadImmediate,     // rs = immediate << rt
  AddI,
  SubI,
  MulI,
  DivI,
  ModI,
  AndI,
  OrI,
  XorI,              // Opcode 11

  // Target form //
  Call,
  Jump,
  Return,

  // Conditional jumps to an absolute immediate //
  Je,
  Jne,
  Jl,
  Jg,
  Jsl,
  Jsg,
  Jfe,
  Jfl,
  Jfg,

  JumpOffset,        // ip += sext(target)
  JumpIndirect,      // ip = (rs << rt) + sext(immediate)
  Jz,
  Jnz,

  SetHandler,        // push handler { target, sp }
  Skip,              // register form, see `Condition`

  LoadStack,         // rs = stack[sp + sext(immediate)]
  StoreStack,

  Alloc,             // rs = alloc(rt + immediate)
  Free,

  LoadByte,
  LoadHalf,
  LoadWord,
  LoadQuad,
  StoreByte,
  StoreHalf,
  StoreWord,
  StoreQuad,         // Opcode 41
}

/// One past the largest opcode.
pub const OPCODE_COUNT: u8 = 42;

/// Which of the three views of a word an opcode uses.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum Layout {
  Register,
  Immediate,
  Target,
}

impl Opcode {
  pub fn code(&self) -> u8 {
    Into::<u8>::into(*self)
  }

  /// The opcode of a raw word, if it is part of the instruction set.
  pub fn from_word(word: Word) -> Option<Opcode> {
    Opcode::try_from(opcode_bits(word)).ok()
  }

  pub fn layout(&self) -> Layout {
    match self {
      | Opcode::Misc
      | Opcode::Alu
      | Opcode::FloatAlu
      | Opcode::Skip => Layout::Register,

      | Opcode::Call
      | Opcode::Jump
      | Opcode::Return
      | Opcode::JumpOffset
      | Opcode::SetHandler => Layout::Target,

      _ => Layout::Immediate
    }
  }

  /// The assembly mnemonic of an opcode that has exactly one. The register form opcodes and
  /// `LoadImmediate` spell theirs from their sub-function and operands.
  pub fn mnemonic(&self) -> Option<&'static str> {
    let text =
      match self {
        Opcode::AddI         => "add",
        Opcode::SubI         => "sub",
        Opcode::MulI         => "mul",
        Opcode::DivI         => "div",
        Opcode::ModI         => "mod",
        Opcode::AndI         => "and",
        Opcode::OrI          => "or",
        Opcode::XorI         => "xor",
        Opcode::Call         => "call",
        Opcode::Jump         => "jmp",
        Opcode::Return       => "ret",
        Opcode::Je           => "je",
        Opcode::Jne          => "jne",
        Opcode::Jl           => "jl",
        Opcode::Jg           => "jg",
        Opcode::Jsl          => "jsl",
        Opcode::Jsg          => "jsg",
        Opcode::Jfe          => "jfe",
        Opcode::Jfl          => "jfl",
        Opcode::Jfg          => "jfg",
        Opcode::JumpOffset   => "jof",
        Opcode::JumpIndirect => "jir",
        Opcode::Jz           => "jz",
        Opcode::Jnz          => "jnz",
        Opcode::SetHandler   => "seh",
        Opcode::LoadStack    => "ldsp",
        Opcode::StoreStack   => "stsp",
        Opcode::Alloc        => "alloc",
        Opcode::Free         => "free",
        Opcode::LoadByte     => "ldb",
        Opcode::LoadHalf     => "ldw",
        Opcode::LoadWord     => "ldd",
        Opcode::LoadQuad     => "ldq",
        Opcode::StoreByte    => "stb",
        Opcode::StoreHalf    => "stw",
        Opcode::StoreWord    => "std",
        Opcode::StoreQuad    => "stq",

        | Opcode::Misc
        | Opcode::Alu
        | Opcode::FloatAlu
        | Opcode::LoadImmediate
        | Opcode::Skip => return None,
      };
    Some(text)
  }

  /// Number of bytes moved by a heap load or store, `None` for every other opcode.
  pub fn access_width(&self) -> Option<usize> {
    match self {
      Opcode::LoadByte | Opcode::StoreByte => Some(1),
      Opcode::LoadHalf | Opcode::StoreHalf => Some(2),
      Opcode::LoadWord | Opcode::StoreWord => Some(4),
      Opcode::LoadQuad | Opcode::StoreQuad => Some(8),
      _ => None
    }
  }
}

/// Sub-functions of `Opcode::Misc`, selected by the `fn` field.
#[derive(TryFromPrimitive, IntoPrimitive, Clone, Copy, Eq, PartialEq, Debug, Hash)]
#[repr(u8)]
pub enum MiscFunction {
  Halt,              // halt rs
  Move,              // sa selects the bits copied, see `MOVE_*`
  FloatMove,
  Swap,
  IntToFloat,        // rt: 0 numeric value, 1 raw bits
  FloatToInt,        // rt: 0 floor, 1 raw bits, 2 ceiling
  RemoveHandler,
  Throw,
  Stack,             // sa: 0..=2 push 1..=3 registers, 4..=6 pop 1..=3 registers
  Exception,         // sa: 0 load id, 1 clear, 2 load kind
  GetChar,
  PutChar,
  Flush,
}

pub const MOVE_ALL     : u8 = 0;
pub const MOVE_HIGH_32 : u8 = 1;
pub const MOVE_LOW_32  : u8 = 2;
pub const MOVE_LOW_16  : u8 = 3;
pub const MOVE_LOW_8   : u8 = 4;

/// Mnemonics of `MiscFunction::Move`, indexed by the `MOVE_*` mode.
pub const MOVE_MNEMONICS: [&str; 5] = ["mov", "mh32", "ml32", "ml16", "ml8"];

pub const CONVERT_VALUE   : u8 = 0;
pub const CONVERT_BITS    : u8 = 1;
pub const CONVERT_CEILING : u8 = 2;

/// Mnemonics of the conversions, indexed by the `CONVERT_*` mode.
pub const INT_TO_FLOAT_MNEMONICS: [&str; 2] = ["i2f", "b2f"];
pub const FLOAT_TO_INT_MNEMONICS: [&str; 3] = ["f2if", "f2b", "f2ic"];

pub const STACK_POP : u8 = 4;

pub const EXCEPTION_LOAD_ID   : u8 = 0;
pub const EXCEPTION_CLEAR     : u8 = 1;
pub const EXCEPTION_LOAD_KIND : u8 = 2;

/// Integer operations of `Opcode::Alu`, held in the low four bits of `fn`.
#[derive(
StrumDisplay, EnumString, TryFromPrimitive, IntoPrimitive,
Clone,        Copy,       Eq, PartialEq,    Debug,       Hash
)]
#[repr(u8)]
pub enum AluFunction {
  #[strum(to_string = "add")]  Add,
  #[strum(to_string = "sub")]  Sub,
  #[strum(to_string = "mul")]  Mul,
  #[strum(to_string = "div")]  Div,
  #[strum(to_string = "mod")]  Mod,
  #[strum(to_string = "and")]  And,
  #[strum(to_string = "or")]   Or,
  #[strum(to_string = "xor")]  Xor,
  #[strum(to_string = "not")]  Not,
  #[strum(to_string = "lsh")]  Lsh,
  #[strum(to_string = "rsh")]  Rsh,
  #[strum(to_string = "srsh")] Srsh,
  #[strum(to_string = "rol")]  Rol,
  #[strum(to_string = "ror")]  Ror,
}

/// Shift applied to the right hand operand of `Opcode::Alu`, held in the top two bits of `fn`.
#[derive(
StrumDisplay, EnumString, TryFromPrimitive, IntoPrimitive,
Clone,        Copy,       Eq, PartialEq,    Debug,       Hash
)]
#[repr(u8)]
pub enum PreShift {
  #[strum(to_string = "NONE")] None,
  #[strum(to_string = "LSH")]  Left,
  #[strum(to_string = "RSH")]  Right,
  #[strum(to_string = "SRSH")] Arithmetic,
}

#[derive(
StrumDisplay, EnumString, TryFromPrimitive, IntoPrimitive,
Clone,        Copy,       Eq, PartialEq,    Debug,       Hash
)]
#[repr(u8)]
pub enum FloatFunction {
  #[strum(to_string = "add")] Add,
  #[strum(to_string = "sub")] Sub,
  #[strum(to_string = "mul")] Mul,
  #[strum(to_string = "div")] Div,
  #[strum(to_string = "mod")] Mod,
}

/// Conditions of `Opcode::Skip`, held in the low three bits of `fn`.
#[derive(
StrumDisplay, EnumString, TryFromPrimitive, IntoPrimitive,
Clone,        Copy,       Eq, PartialEq,    Debug,       Hash
)]
#[repr(u8)]
pub enum Condition {
  #[strum(to_string = "eq")] Equal,
  #[strum(to_string = "lt")] Less,
  #[strum(to_string = "gt")] Greater,
  #[strum(to_string = "z")]  Zero,
  #[strum(to_string = "ne")] NotEqual,
  #[strum(to_string = "le")] LessEqual,
  #[strum(to_string = "ge")] GreaterEqual,
  #[strum(to_string = "nz")] NonZero,
}

pub const SKIP_CONDITION_MASK : u8 = 0b00111;
pub const SKIP_SIGNED         : u8 = 0b01000;
pub const SKIP_FLOAT          : u8 = 0b10000;

impl Condition {
  /// True when the condition only reads its first operand.
  pub fn is_unary(&self) -> bool {
    match self {
      Condition::Zero | Condition::NonZero => true,
      _ => false
    }
  }
}

/// Holds the unencoded components of an instruction, one variant per layout.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Instruction {
  /// [opcode:6][rs:5][rt:5][rd:5][sa:5][fn:6]
  Register {
    opcode : Opcode,
    rs     : u8,
    rt     : u8,
    rd     : u8,
    sa     : u8,
    func   : u8
  },
  /// [opcode:6][rs:5][rt:5][immediate:16]
  Immediate {
    opcode    : Opcode,
    rs        : u8,
    rt        : u8,
    immediate : u16
  },
  /// [opcode:6][target:26]
  Target {
    opcode : Opcode,
    target : u32
  },
}

impl Display for Instruction {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", render_instruction(self.encode()))
  }
}

// region Builders

impl Instruction {
  pub fn encode(&self) -> Word {
    encode_instruction(*self)
  }

  pub fn opcode(&self) -> Opcode {
    match self {
      | Instruction::Register  { opcode, .. }
      | Instruction::Immediate { opcode, .. }
      | Instruction::Target    { opcode, .. } => *opcode
    }
  }

  // Encoding masks every field to its width, so the builders refuse values that would not survive.

  pub fn register(opcode: Opcode, rs: u8, rt: u8, rd: u8, sa: u8, func: u8) -> Instruction {
    debug_assert!(rs < 32 && rt < 32 && rd < 32, "register number out of range in {}", opcode);
    debug_assert!(sa < 32, "shift amount {} does not fit in 5 bits", sa);
    debug_assert!(func < 64, "function {} does not fit in 6 bits", func);
    Instruction::Register { opcode, rs, rt, rd, sa, func }
  }

  pub fn immediate(opcode: Opcode, rs: u8, rt: u8, immediate: u16) -> Instruction {
    debug_assert!(rs < 32 && rt < 32, "register number out of range in {}", opcode);
    Instruction::Immediate { opcode, rs, rt, immediate }
  }

  pub fn target(opcode: Opcode, target: u32) -> Instruction {
    debug_assert!(target < 1 << TARGET_BITS, "target {:#x} does not fit in 26 bits", target);
    Instruction::Target { opcode, target }
  }

  fn misc(function: MiscFunction, rs: u8, rt: u8, rd: u8, sa: u8) -> Instruction {
    Instruction::register(Opcode::Misc, rs, rt, rd, sa, function.into())
  }

  pub fn halt(rs: u8) -> Instruction {
    Instruction::misc(MiscFunction::Halt, rs, 0, 0, 0)
  }

  /// `mode` is one of the `MOVE_*` constants.
  pub fn move_register(rd: u8, rs: u8, mode: u8) -> Instruction {
    Instruction::misc(MiscFunction::Move, rs, 0, rd, mode)
  }

  pub fn move_float(rd: u8, rs: u8) -> Instruction {
    Instruction::misc(MiscFunction::FloatMove, rs, 0, rd, 0)
  }

  pub fn swap(rd: u8, rs: u8) -> Instruction {
    Instruction::misc(MiscFunction::Swap, rs, 0, rd, 0)
  }

  /// `mode` is `CONVERT_VALUE` or `CONVERT_BITS`.
  pub fn int_to_float(rd: u8, rs: u8, mode: u8) -> Instruction {
    Instruction::misc(MiscFunction::IntToFloat, rs, mode, rd, 0)
  }

  /// `mode` is `CONVERT_VALUE` (floor), `CONVERT_BITS` or `CONVERT_CEILING`.
  pub fn float_to_int(rd: u8, rs: u8, mode: u8) -> Instruction {
    Instruction::misc(MiscFunction::FloatToInt, rs, mode, rd, 0)
  }

  pub fn remove_handler() -> Instruction {
    Instruction::misc(MiscFunction::RemoveHandler, 0, 0, 0, 0)
  }

  pub fn throw(rs: u8) -> Instruction {
    Instruction::misc(MiscFunction::Throw, rs, 0, 0, 0)
  }

  /// Pushes one to three registers, first operand first.
  pub fn push(registers: &[u8]) -> Instruction {
    Instruction::stack(registers, 0)
  }

  /// Pops one to three registers, last operand first, undoing a `push` of the same list.
  pub fn pop(registers: &[u8]) -> Instruction {
    Instruction::stack(registers, STACK_POP)
  }

  fn stack(registers: &[u8], base: u8) -> Instruction {
    let at = |i: usize| registers.get(i).copied().unwrap_or(0);
    let count = registers.len().max(1).min(3) as u8;
    Instruction::misc(MiscFunction::Stack, at(0), at(1), at(2), base + count - 1)
  }

  /// `mode` is one of the `EXCEPTION_*` constants.
  pub fn exception(rd: u8, mode: u8) -> Instruction {
    Instruction::misc(MiscFunction::Exception, 0, 0, rd, mode)
  }

  pub fn get_char(rd: u8) -> Instruction {
    Instruction::misc(MiscFunction::GetChar, 0, 0, rd, 0)
  }

  pub fn put_char(rs: u8) -> Instruction {
    Instruction::misc(MiscFunction::PutChar, rs, 0, 0, 0)
  }

  pub fn flush() -> Instruction {
    Instruction::misc(MiscFunction::Flush, 0, 0, 0, 0)
  }

  pub fn alu(function: AluFunction, rd: u8, rs: u8, rt: u8) -> Instruction {
    Instruction::alu_shifted(function, rd, rs, rt, PreShift::None, 0)
  }

  pub fn alu_shifted(function: AluFunction, rd: u8, rs: u8, rt: u8, shift: PreShift, sa: u8)
    -> Instruction
  {
    let func = Into::<u8>::into(function) | (Into::<u8>::into(shift) << 4);
    Instruction::register(Opcode::Alu, rs, rt, rd, sa, func)
  }

  pub fn float_alu(function: FloatFunction, rd: u8, rs: u8, rt: u8) -> Instruction {
    Instruction::register(Opcode::FloatAlu, rs, rt, rd, 0, function.into())
  }

  /// `rs = immediate << shift`
  pub fn load_immediate(rs: u8, immediate: u16, shift: u8) -> Instruction {
    Instruction::immediate(Opcode::LoadImmediate, rs, shift, immediate)
  }

  pub fn call(target: u32) -> Instruction {
    Instruction::target(Opcode::Call, target)
  }

  pub fn jump(target: u32) -> Instruction {
    Instruction::target(Opcode::Jump, target)
  }

  pub fn ret() -> Instruction {
    Instruction::target(Opcode::Return, 0)
  }

  pub fn jump_offset(offset: i32) -> Instruction {
    Instruction::target(Opcode::JumpOffset, (offset as u32) & ((1 << TARGET_BITS) - 1))
  }

  /// `ip = (rs << shift) + offset`
  pub fn jump_indirect(rs: u8, shift: u8, offset: i16) -> Instruction {
    Instruction::immediate(Opcode::JumpIndirect, rs, shift, offset as u16)
  }

  pub fn set_handler(target: u32) -> Instruction {
    Instruction::target(Opcode::SetHandler, target)
  }

  /// Skips the next instruction when `condition` holds for `rs` and `rt`.
  pub fn skip(condition: Condition, signed: bool, float: bool, rs: u8, rt: u8) -> Instruction {
    let mut func: u8 = condition.into();
    if signed {
      func |= SKIP_SIGNED;
    }
    if float {
      func |= SKIP_FLOAT;
    }
    Instruction::register(Opcode::Skip, rs, rt, 0, 0, func)
  }

  pub fn load_stack(rs: u8, offset: i16) -> Instruction {
    Instruction::immediate(Opcode::LoadStack, rs, 0, offset as u16)
  }

  pub fn store_stack(rs: u8, offset: i16) -> Instruction {
    Instruction::immediate(Opcode::StoreStack, rs, 0, offset as u16)
  }

  /// `rs = alloc(rt + size)`
  pub fn alloc(rs: u8, rt: u8, size: u16) -> Instruction {
    Instruction::immediate(Opcode::Alloc, rs, rt, size)
  }

  pub fn free(rs: u8) -> Instruction {
    Instruction::immediate(Opcode::Free, rs, 0, 0)
  }

  /// A heap load or store: `opcode` is one of `LoadByte..=StoreQuad`.
  pub fn memory(opcode: Opcode, rs: u8, base: u8, offset: i16) -> Instruction {
    Instruction::immediate(opcode, rs, base, offset as u16)
  }
}

// endregion


#[cfg(test)]
mod tests {
  use super::*;
  use crate::bytecode::binary::{try_decode_instruction, RegisterForm, ImmediateForm, TargetForm};

  #[test]
  fn opcode_numbers_are_stable() {
    assert_eq!(Opcode::Misc.code(), 0);
    assert_eq!(Opcode::LoadImmediate.code(), 3);
    assert_eq!(Opcode::XorI.code(), 11);
    assert_eq!(Opcode::Call.code(), 12);
    assert_eq!(Opcode::JumpOffset.code(), 24);
    assert_eq!(Opcode::Jz.code(), 26);
    assert_eq!(Opcode::SetHandler.code(), 28);
    assert_eq!(Opcode::Skip.code(), 29);
    assert_eq!(Opcode::StoreQuad.code(), OPCODE_COUNT - 1);
    assert!(Opcode::try_from(OPCODE_COUNT).is_err());
  }

  #[test]
  fn every_opcode_round_trips() {
    for code in 0..OPCODE_COUNT {
      let opcode = Opcode::try_from(code).unwrap();
      let instruction = match opcode.layout() {
        Layout::Register  => Instruction::register(opcode, 1, 2, 3, 4, 5),
        Layout::Immediate => Instruction::immediate(opcode, 6, 7, 0x8001),
        Layout::Target    => Instruction::target(opcode, 0x2ABCDEF),
      };

      let decoded = try_decode_instruction(instruction.encode()).unwrap();
      assert_eq!(decoded, instruction);
      assert_eq!(decoded.opcode(), opcode);
    }
  }

  #[test]
  fn builders_place_operands() {
    let word = Instruction::alu_shifted(AluFunction::Sub, 3, 4, 5, PreShift::Arithmetic, 7).encode();
    let form = RegisterForm::from_word(word);
    assert_eq!((form.rd, form.rs, form.rt, form.sa), (3, 4, 5, 7));
    assert_eq!(form.func, 1 | (3 << 4));

    let word = Instruction::load_immediate(2, 48, 16).encode();
    let form = ImmediateForm::from_word(word);
    assert_eq!((form.opcode, form.rs, form.rt, form.immediate), (3, 2, 16, 48));

    let word = Instruction::jump_offset(-3).encode();
    assert_eq!(TargetForm::from_word(word).offset(), -3);

    let word = Instruction::memory(Opcode::LoadQuad, 1, 2, -8).encode();
    assert_eq!(ImmediateForm::from_word(word).offset(), -8);
  }

  #[test]
  fn stack_builders_count_registers() {
    let push = RegisterForm::from_word(Instruction::push(&[1, 2, 3]).encode());
    assert_eq!((push.rs, push.rt, push.rd, push.sa), (1, 2, 3, 2));

    let pop = RegisterForm::from_word(Instruction::pop(&[4]).encode());
    assert_eq!((pop.rs, pop.sa), (4, STACK_POP));
  }

  #[test]
  fn skip_flags() {
    let form = RegisterForm::from_word(
      Instruction::skip(Condition::Less, true, false, 1, 2).encode()
    );
    assert_eq!(form.func, 1 | SKIP_SIGNED);

    let form = RegisterForm::from_word(
      Instruction::skip(Condition::NonZero, false, true, 1, 0).encode()
    );
    assert_eq!(form.func, 7 | SKIP_FLOAT);
  }

  #[test]
  #[cfg(debug_assertions)]
  #[should_panic(expected = "shift amount 60 does not fit in 5 bits")]
  fn oversized_shift_amount_is_refused() {
    Instruction::alu_shifted(AluFunction::Or, 7, 0, 3, PreShift::Right, 60);
  }

  #[test]
  #[cfg(debug_assertions)]
  #[should_panic(expected = "register number out of range")]
  fn oversized_register_is_refused() {
    Instruction::load_immediate(32, 1, 0);
  }

  #[test]
  fn widest_fields_survive_encoding() {
    let word = Instruction::alu_shifted(AluFunction::Or, 31, 31, 31, PreShift::Right, 31).encode();
    let form = RegisterForm::from_word(word);
    assert_eq!((form.rs, form.rt, form.rd, form.sa), (31, 31, 31, 31));
  }

  #[test]
  fn opcode_mnemonics() {
    assert_eq!(Opcode::Jump.mnemonic(), Some("jmp"));
    assert_eq!(Opcode::StoreWord.mnemonic(), Some("std"));
    assert_eq!(Opcode::Skip.mnemonic(), None);
    assert_eq!(MOVE_MNEMONICS[MOVE_LOW_16 as usize], "ml16");
    assert_eq!(FLOAT_TO_INT_MNEMONICS[CONVERT_CEILING as usize], "f2ic");
  }

  #[test]
  fn mnemonics_parse_back() {
    assert_eq!(AluFunction::Srsh.to_string(), "srsh");
    assert_eq!("srsh".parse::<AluFunction>().unwrap(), AluFunction::Srsh);
    assert_eq!("LSH".parse::<PreShift>().unwrap(), PreShift::Left);
    assert_eq!("nz".parse::<Condition>().unwrap(), Condition::NonZero);
    assert!("bogus".parse::<FloatFunction>().is_err());
  }
}

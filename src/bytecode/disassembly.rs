/*!
  Renders bytecode as assembly.

  Each opcode has a render function in `RENDER_TABLE`, indexed by the opcode's number, that
  spells out the instruction in the syntax `assembly::assemble` accepts. A render function
  returns `None` when the word names a sub-function or mode the VM does not define, which prints
  as `(unsupported instruction)`.
*/

use std::convert::TryFrom;
use std::io::Write;

use thiserror::Error;

use super::binary::{ImmediateForm, RegisterForm, TargetForm, Word};
use super::container::Bytecode;
use super::instruction::*;

#[derive(Debug, Error)]
pub enum DisassemblyError {
  #[error("invalid magic header of 0x{0:x} 0x{1:x}")]
  BadMagic(u8, u8),
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

type Render = fn(Word) -> Option<String>;

const UNSUPPORTED: &str = "(unsupported instruction)";

lazy_static! {
  /// One render function per opcode, in opcode order.
  static ref RENDER_TABLE: Vec<Render> = vec![
    render_misc,              // Misc
    render_alu,               // Alu
    render_float_alu,         // FloatAlu
    render_load_immediate,    // LoadImmediate
    render_alu_immediate,     // AddI
    render_alu_immediate,     // SubI
    render_alu_immediate,     // MulI
    render_alu_immediate,     // DivI
    render_alu_immediate,     // ModI
    render_alu_immediate,     // AndI
    render_alu_immediate,     // OrI
    render_alu_immediate,     // XorI
    render_target,            // Call
    render_target,            // Jump
    render_return,            // Return
    render_compare_jump,      // Je
    render_compare_jump,      // Jne
    render_compare_jump,      // Jl
    render_compare_jump,      // Jg
    render_compare_jump,      // Jsl
    render_compare_jump,      // Jsg
    render_float_jump,        // Jfe
    render_float_jump,        // Jfl
    render_float_jump,        // Jfg
    render_jump_offset,       // JumpOffset
    render_jump_indirect,     // JumpIndirect
    render_zero_jump,         // Jz
    render_zero_jump,         // Jnz
    render_target,            // SetHandler
    render_skip,              // Skip
    render_stack_slot,        // LoadStack
    render_stack_slot,        // StoreStack
    render_alloc,             // Alloc
    render_free,              // Free
    render_memory,            // LoadByte
    render_memory,            // LoadHalf
    render_memory,            // LoadWord
    render_memory,            // LoadQuad
    render_memory,            // StoreByte
    render_memory,            // StoreHalf
    render_memory,            // StoreWord
    render_memory,            // StoreQuad
  ];
}

/// The assembly text of a single word.
pub fn render_instruction(word: Word) -> String {
  Opcode::from_word(word)
    .and_then(|opcode| RENDER_TABLE.get(opcode.code() as usize))
    .and_then(|render| render(word))
    .unwrap_or_else(|| UNSUPPORTED.to_string())
}

/// Writes a listing of every container to `out`. Stops at the first container with an invalid
/// magic header.
pub fn disassemble<W: Write>(containers: &[Bytecode], out: &mut W) -> Result<(), DisassemblyError> {
  for bytecode in containers {
    let [first, second] = bytecode.magic;
    if !bytecode.is_valid_magic() {
      writeln!(out, "error: invalid magic header of 0x{:x} 0x{:x}", first, second)?;
      return Err(DisassemblyError::BadMagic(first, second));
    }

    writeln!(out, "Call stack size:     {}", bytecode.call_stack_size)?;
    writeln!(out, "Handler stack size:  {}", bytecode.handler_stack_size)?;
    writeln!(out, "Instruction count:   {}", bytecode.code.len())?;
    writeln!(out)?;
    writeln!(out, "Disassembly of section TEXT")?;

    for (ip, word) in bytecode.code.iter().enumerate() {
      writeln!(out, "{}", render_line(ip, *word))?;
    }
    writeln!(out)?;
  }
  Ok(())
}

/// `index  raw word  fields  assembly`
fn render_line(ip: usize, word: Word) -> String {
  match Opcode::from_word(word) {
    Some(opcode) => {
      format!("{:016x}  {:08x}  {:<17}  {}", ip, word, field_dump(opcode, word), render_instruction(word))
    }
    None => {
      format!("{:016x}  {:08x}  {}", ip, word, UNSUPPORTED)
    }
  }
}

/// The word's fields in hex, split according to the opcode's layout.
fn field_dump(opcode: Opcode, word: Word) -> String {
  match opcode.layout() {
    Layout::Register => {
      let r = RegisterForm::from_word(word);
      format!("{:02x} {:02x} {:02x} {:02x} {:02x} {:02x}", r.opcode, r.rs, r.rt, r.rd, r.sa, r.func)
    }
    Layout::Immediate => {
      let i = ImmediateForm::from_word(word);
      format!("{:02x} {:02x} {:02x} {:04x}", i.opcode, i.rs, i.rt, i.immediate)
    }
    Layout::Target => {
      let t = TargetForm::from_word(word);
      format!("{:02x} {:07x}", t.opcode, t.target)
    }
  }
}

// region Render functions

fn mnemonic_of(word: Word) -> Option<&'static str> {
  Opcode::from_word(word)?.mnemonic()
}

fn register_list(registers: &[u8]) -> String {
  registers.iter()
           .map(|r| format!("r{}", r))
           .collect::<Vec<String>>()
           .join(",")
}

fn render_misc(word: Word) -> Option<String> {
  let r = RegisterForm::from_word(word);

  let text =
    match MiscFunction::try_from(r.func).ok()? {

      MiscFunction::Halt => format!("halt r{}", r.rs),

      MiscFunction::Move => {
        format!("{} r{},r{}", MOVE_MNEMONICS.get(r.sa as usize)?, r.rd, r.rs)
      }

      MiscFunction::FloatMove => format!("mov fp{},fp{}", r.rd, r.rs),

      MiscFunction::Swap => format!("swp r{},r{}", r.rd, r.rs),

      MiscFunction::IntToFloat => {
        format!("{} fp{},r{}", INT_TO_FLOAT_MNEMONICS.get(r.rt as usize)?, r.rd, r.rs)
      }

      MiscFunction::FloatToInt => {
        format!("{} r{},fp{}", FLOAT_TO_INT_MNEMONICS.get(r.rt as usize)?, r.rd, r.rs)
      }

      MiscFunction::RemoveHandler => "rmeh".to_string(),

      MiscFunction::Throw => format!("throw r{}", r.rs),

      MiscFunction::Stack => {
        let registers = [r.rs, r.rt, r.rd];
        match r.sa {
          0..=2 => format!("push {}", register_list(&registers[..r.sa as usize + 1])),
          4..=6 => format!("pop {}", register_list(&registers[..(r.sa - STACK_POP) as usize + 1])),
          _     => return None
        }
      }

      MiscFunction::Exception => {
        match r.sa {
          EXCEPTION_LOAD_ID   => format!("ldex r{}", r.rd),
          EXCEPTION_CLEAR     => "clex".to_string(),
          EXCEPTION_LOAD_KIND => format!("ldek r{}", r.rd),
          _                   => return None
        }
      }

      MiscFunction::GetChar => format!("getc r{}", r.rd),

      MiscFunction::PutChar => format!("putc r{}", r.rs),

      MiscFunction::Flush => "flush".to_string(),

    };

  Some(text)
}

fn render_alu(word: Word) -> Option<String> {
  let r        = RegisterForm::from_word(word);
  let function = AluFunction::try_from(r.func & 0xF).ok()?;
  let shift    = PreShift::try_from(r.func >> 4).ok()?;

  let mut text =
    match function {
      AluFunction::Not => format!("not r{},r{}", r.rd, r.rt),
      _                => format!("{} r{},r{},r{}", function, r.rd, r.rs, r.rt),
    };
  if shift != PreShift::None {
    text.push_str(&format!(",{} {}", shift, r.sa));
  }
  Some(text)
}

fn render_float_alu(word: Word) -> Option<String> {
  let r = RegisterForm::from_word(word);
  let function = FloatFunction::try_from(r.func).ok()?;
  Some(format!("{} fp{},fp{},fp{}", function, r.rd, r.rs, r.rt))
}

fn render_load_immediate(word: Word) -> Option<String> {
  let i = ImmediateForm::from_word(word);
  let mut text = format!("mov r{},{}", i.rs, i.immediate);
  if i.rt > 0 {
    text.push_str(&format!(",LSH {}", i.rt));
  }
  Some(text)
}

fn render_alu_immediate(word: Word) -> Option<String> {
  let i = ImmediateForm::from_word(word);
  Some(format!("{} r{},r{},{}", mnemonic_of(word)?, i.rs, i.rt, i.immediate))
}

fn render_target(word: Word) -> Option<String> {
  Some(format!("{} {}", mnemonic_of(word)?, TargetForm::from_word(word).target))
}

fn render_return(_word: Word) -> Option<String> {
  Some("ret".to_string())
}

fn render_compare_jump(word: Word) -> Option<String> {
  let i = ImmediateForm::from_word(word);
  Some(format!("{} r{},r{},{}", mnemonic_of(word)?, i.rs, i.rt, i.immediate))
}

fn render_float_jump(word: Word) -> Option<String> {
  let i = ImmediateForm::from_word(word);
  Some(format!("{} fp{},fp{},{}", mnemonic_of(word)?, i.rs, i.rt, i.immediate))
}

fn render_jump_offset(word: Word) -> Option<String> {
  Some(format!("jof {}", TargetForm::from_word(word).offset()))
}

fn render_jump_indirect(word: Word) -> Option<String> {
  let i = ImmediateForm::from_word(word);
  let mut text = format!("jir r{},{}", i.rs, i.offset());
  if i.rt > 0 {
    text.push_str(&format!(",LSH {}", i.rt));
  }
  Some(text)
}

fn render_zero_jump(word: Word) -> Option<String> {
  let i = ImmediateForm::from_word(word);
  Some(format!("{} r{},{}", mnemonic_of(word)?, i.rs, i.immediate))
}

fn render_skip(word: Word) -> Option<String> {
  let r = RegisterForm::from_word(word);
  if r.func >= SKIP_FLOAT << 1 {
    return None;
  }
  let condition = Condition::try_from(r.func & SKIP_CONDITION_MASK).ok()?;
  let prefix    = if r.func & SKIP_SIGNED != 0 { "ss" } else { "s" };
  let bank      = if r.func & SKIP_FLOAT != 0 { "fp" } else { "r" };

  match condition.is_unary() {
    true  => Some(format!("{}{} {}{}", prefix, condition, bank, r.rs)),
    false => Some(format!("{}{} {}{},{}{}", prefix, condition, bank, r.rs, bank, r.rt)),
  }
}

fn render_stack_slot(word: Word) -> Option<String> {
  let i = ImmediateForm::from_word(word);
  Some(format!("{} r{},{}", mnemonic_of(word)?, i.rs, i.offset()))
}

fn render_alloc(word: Word) -> Option<String> {
  let i = ImmediateForm::from_word(word);
  Some(format!("alloc r{},r{},{}", i.rs, i.rt, i.immediate))
}

fn render_free(word: Word) -> Option<String> {
  Some(format!("free r{}", ImmediateForm::from_word(word).rs))
}

fn render_memory(word: Word) -> Option<String> {
  let i = ImmediateForm::from_word(word);
  Some(format!("{} r{},{}(r{})", mnemonic_of(word)?, i.rs, i.offset(), i.rt))
}

// endregion


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn table_covers_every_opcode() {
    assert_eq!(RENDER_TABLE.len(), OPCODE_COUNT as usize);
  }

  #[test]
  fn renders_each_family() {
    let cases = [
      (Instruction::halt(3), "halt r3"),
      (Instruction::move_register(1, 2, MOVE_LOW_8), "ml8 r1,r2"),
      (Instruction::move_float(1, 2), "mov fp1,fp2"),
      (Instruction::int_to_float(4, 5, CONVERT_BITS), "b2f fp4,r5"),
      (Instruction::float_to_int(4, 5, CONVERT_CEILING), "f2ic r4,fp5"),
      (Instruction::push(&[1, 2, 3]), "push r1,r2,r3"),
      (Instruction::pop(&[7]), "pop r7"),
      (Instruction::exception(2, EXCEPTION_LOAD_KIND), "ldek r2"),
      (Instruction::exception(0, EXCEPTION_CLEAR), "clex"),
      (Instruction::get_char(9), "getc r9"),
      (Instruction::alu(AluFunction::Mod, 0, 0, 1), "mod r0,r0,r1"),
      (Instruction::alu(AluFunction::Not, 2, 0, 3), "not r2,r3"),
      (Instruction::alu_shifted(AluFunction::Add, 1, 2, 3, PreShift::Arithmetic, 4), "add r1,r2,r3,SRSH 4"),
      (Instruction::float_alu(FloatFunction::Div, 1, 2, 3), "div fp1,fp2,fp3"),
      (Instruction::load_immediate(1, 7, 16), "mov r1,7,LSH 16"),
      (Instruction::immediate(Opcode::XorI, 1, 2, 65535), "xor r1,r2,65535"),
      (Instruction::call(12), "call 12"),
      (Instruction::ret(), "ret"),
      (Instruction::immediate(Opcode::Jsg, 1, 2, 9), "jsg r1,r2,9"),
      (Instruction::immediate(Opcode::Jfe, 1, 2, 9), "jfe fp1,fp2,9"),
      (Instruction::jump_offset(-3), "jof -3"),
      (Instruction::jump_indirect(4, 2, -1), "jir r4,-1,LSH 2"),
      (Instruction::immediate(Opcode::Jz, 1, 0, 6), "jz r1,6"),
      (Instruction::set_handler(40), "seh 40"),
      (Instruction::skip(Condition::Equal, false, false, 1, 2), "seq r1,r2"),
      (Instruction::skip(Condition::Less, true, false, 1, 2), "sslt r1,r2"),
      (Instruction::skip(Condition::NonZero, false, true, 3, 0), "snz fp3"),
      (Instruction::load_stack(1, -2), "ldsp r1,-2"),
      (Instruction::alloc(1, 2, 64), "alloc r1,r2,64"),
      (Instruction::free(1), "free r1"),
      (Instruction::memory(Opcode::LoadWord, 1, 2, -8), "ldd r1,-8(r2)"),
      (Instruction::memory(Opcode::StoreQuad, 3, 4, 16), "stq r3,16(r4)"),
    ];

    for (instruction, text) in cases.iter() {
      assert_eq!(render_instruction(instruction.encode()), *text);
      assert_eq!(instruction.to_string(), *text);
    }
  }

  #[test]
  fn undefined_words_are_unsupported() {
    assert_eq!(render_instruction(42), UNSUPPORTED);
    assert_eq!(render_instruction(Instruction::register(Opcode::Misc, 0, 0, 0, 0, 13).encode()), UNSUPPORTED);
    assert_eq!(render_instruction(Instruction::move_register(0, 0, 5).encode()), UNSUPPORTED);
    assert_eq!(render_instruction(Instruction::register(Opcode::Alu, 0, 0, 0, 0, 15).encode()), UNSUPPORTED);
    assert_eq!(render_instruction(Instruction::register(Opcode::Skip, 0, 0, 0, 0, 32).encode()), UNSUPPORTED);
  }

  #[test]
  fn listing() {
    let code = vec![
      Instruction::load_immediate(0, 48, 0).encode(),
      Instruction::jump_offset(-1).encode(),
      Instruction::halt(0).encode(),
      0xFFFF_FFFF,
    ];
    let bytecode = Bytecode::new(256, 16, code);
    let mut out: Vec<u8> = Vec::new();
    disassemble(&[bytecode], &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines[0], "Call stack size:     256");
    assert_eq!(lines[1], "Handler stack size:  16");
    assert_eq!(lines[2], "Instruction count:   4");
    assert_eq!(lines[3], "");
    assert_eq!(lines[4], "Disassembly of section TEXT");
    assert_eq!(lines[5], "0000000000000000  00300003  03 00 00 0030      mov r0,48");
    assert_eq!(lines[6], "0000000000000001  ffffffd8  18 3ffffff         jof -1");
    assert_eq!(lines[7], "0000000000000002  00000000  00 00 00 00 00 00  halt r0");
    assert_eq!(lines[8], "0000000000000003  ffffffff  (unsupported instruction)");
  }

  #[test]
  fn bad_magic_stops_the_listing() {
    let good = Bytecode::new(1, 1, vec![Instruction::ret().encode()]);
    let mut bad = Bytecode::new(1, 1, vec![]);
    bad.magic = [0x2C, 0x00];

    let mut out: Vec<u8> = Vec::new();
    let result = disassemble(&[good, bad], &mut out);
    let text = String::from_utf8(out).unwrap();

    match result {
      Err(DisassemblyError::BadMagic(0x2C, 0x00)) => {}
      other => panic!("expected BadMagic, got {:?}", other),
    }
    assert!(text.contains("ret"));
    assert!(text.ends_with("error: invalid magic header of 0x2c 0x0\n"));
  }
}

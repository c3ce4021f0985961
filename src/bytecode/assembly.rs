/*!
  The human readable textual form of bytecode is called assembly. This module turns one or more
  units of assembly text into a single `Bytecode` container, accepting exactly the syntax the
  disassembler prints.

  ```text
  ; comments run from `;` or `#` to the end of the line
  .stack 64              ; call stack capacity (default 256)
  .handlers 4            ; handler stack capacity (default 16)
  start:  mov r1,180
  loop:   jz r1,done     ; labels may be used before they are defined
          jof loop       ; `jof` takes the distance to the label
  done:   halt r0
  ```

  Assembly happens in two passes. The first parses every line of every unit and records label
  addresses in a `LabelTable`; the second encodes each statement with its labels resolved. Labels
  from all units share a namespace, and instructions are numbered consecutively across units.
*/

use std::convert::TryFrom;

use nom::{
  branch::alt,
  bytes::complete::{tag, take_till},
  character::complete::{
    alpha1,
    alphanumeric1,
    char as one_char,
    digit1,
    hex_digit1,
    space0,
    space1
  },
  combinator::{all_consuming, map, map_res, not, opt, recognize},
  multi::{many0, separated_list},
  sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
  IResult
};
use string_cache::DefaultAtom;
use thiserror::Error;

use super::binary::{Word, IMMEDIATE_BITS, TARGET_BITS};
use super::container::Bytecode;
use super::instruction::*;
use crate::labels::{Label, LabelTable};
use crate::vm::REGISTER_COUNT;

pub const DEFAULT_STACK_SIZE         : u64 = 256;
pub const DEFAULT_HANDLER_STACK_SIZE : u64 = 16;

/// Register numbers and shift amounts occupy five bits.
const REGISTER_BITS: u32 = 5;

/// Errors carry the index of the unit and the one based line number they were found on.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AssemblyError {
  #[error("unit {unit}, line {line}: cannot parse `{text}`")]
  Syntax { unit: usize, line: usize, text: String },

  #[error("unit {unit}, line {line}: `{mnemonic}` is not an instruction or directive")]
  UnknownMnemonic { unit: usize, line: usize, mnemonic: String },

  #[error("unit {unit}, line {line}: wrong operands for `{mnemonic}`")]
  WrongOperands { unit: usize, line: usize, mnemonic: String },

  #[error("unit {unit}, line {line}: undefined label `{label}`")]
  UndefinedLabel { unit: usize, line: usize, label: String },

  #[error("unit {unit}, line {line}: label `{label}` is already defined in unit {previous_unit}")]
  DuplicateLabel { unit: usize, line: usize, label: String, previous_unit: usize },

  #[error("unit {unit}, line {line}: {value} does not fit in a {bits} bit field")]
  OutOfRange { unit: usize, line: usize, value: i64, bits: u32 },
}

/// An immediate, offset or target operand before label resolution.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Value<'a> {
  Number(i64),
  Label(&'a str),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Operand<'a> {
  Register(u8),
  Float(u8),
  Value(Value<'a>),
  /// `offset(rN)`
  Memory(Value<'a>, u8),
  /// `LSH n`, `RSH n` or `SRSH n`
  Shift(PreShift, i64),
}

struct Statement<'a> {
  unit     : usize,
  line     : usize,
  mnemonic : &'a str,
  operands : Vec<Operand<'a>>,
}

// region Parsers

fn identifier(input: &str) -> IResult<&str, &str> {
  recognize(
    pair(
      alt((alpha1, tag("_"))),
      many0(alt((alphanumeric1, tag("_"), tag("."))))
    )
  )(input)
}

/// Succeeds without consuming when the next character cannot continue a word.
fn word_end(input: &str) -> IResult<&str, ()> {
  not(alt((alphanumeric1, tag("_"))))(input)
}

fn register_number(input: &str) -> IResult<&str, u8> {
  map_res(digit1, |digits: &str| digits.parse::<u8>())(input)
}

fn integer_register(input: &str) -> IResult<&str, u8> {
  terminated(preceded(one_char('r'), register_number), word_end)(input)
}

fn float_register(input: &str) -> IResult<&str, u8> {
  terminated(preceded(tag("fp"), register_number), word_end)(input)
}

/// Decimal or `0x` hexadecimal, optionally negative.
fn number(input: &str) -> IResult<&str, i64> {
  map(
    pair(
      opt(one_char('-')),
      terminated(
        alt((
          map_res(
            preceded(alt((tag("0x"), tag("0X"))), hex_digit1),
            |digits: &str| i64::from_str_radix(digits, 16)
          ),
          map_res(digit1, |digits: &str| digits.parse::<i64>())
        )),
        word_end
      )
    ),
    |(sign, magnitude): (Option<char>, i64)| {
      match sign {
        Some(_) => -magnitude,
        None    => magnitude
      }
    }
  )(input)
}

fn value(input: &str) -> IResult<&str, Value<'_>> {
  alt((
    map(number, Value::Number),
    map(identifier, Value::Label)
  ))(input)
}

fn shift(input: &str) -> IResult<&str, Operand<'_>> {
  map(
    separated_pair(
      map_res(
        alt((tag("SRSH"), tag("LSH"), tag("RSH"))),
        |name: &str| name.parse::<PreShift>()
      ),
      space1,
      number
    ),
    |(kind, amount)| Operand::Shift(kind, amount)
  )(input)
}

fn memory(input: &str) -> IResult<&str, Operand<'_>> {
  map(
    pair(
      value,
      delimited(
        pair(space0, one_char('(')),
        delimited(space0, integer_register, space0),
        one_char(')')
      )
    ),
    |(offset, base)| Operand::Memory(offset, base)
  )(input)
}

fn operand(input: &str) -> IResult<&str, Operand<'_>> {
  alt((
    shift,
    map(float_register, Operand::Float),
    map(integer_register, Operand::Register),
    memory,
    map(value, Operand::Value)
  ))(input)
}

fn statement(input: &str) -> IResult<&str, (&str, Vec<Operand<'_>>)> {
  all_consuming(
    pair(
      terminated(alphanumeric1, word_end),
      preceded(
        space0,
        separated_list(delimited(space0, one_char(','), space0), operand)
      )
    )
  )(input)
}

fn label_definition(input: &str) -> IResult<&str, &str> {
  terminated(identifier, tuple((space0, one_char(':'), space0)))(input)
}

fn directive(input: &str) -> IResult<&str, (&str, i64)> {
  all_consuming(separated_pair(preceded(one_char('.'), alpha1), space1, number))(input)
}

fn strip_comment(line: &str) -> &str {
  let code: IResult<&str, &str> = take_till(|c: char| c == '#' || c == ';')(line);
  match code {
    Ok((_comment, code)) => code.trim(),
    Err(_e)              => line.trim()
  }
}

// endregion

// region Mnemonic tables

/// Sub-functions of `Opcode::Misc` whose mnemonic does not depend on a mode field.
const MISC_MNEMONICS: [&str; 13] = [
  "halt", "mov", "swp", "rmeh", "throw", "push", "pop", "ldex", "clex", "ldek", "getc", "putc",
  "flush"
];

fn opcode_named(mnemonic: &str) -> Option<Opcode> {
  (0..OPCODE_COUNT)
    .filter_map(|code| Opcode::try_from(code).ok())
    .find(|opcode| opcode.mnemonic() == Some(mnemonic))
}

/// Splits `s<cond>` and `ss<cond>` into the condition and whether the comparison is signed.
fn skip_condition(mnemonic: &str) -> Option<(Condition, bool)> {
  if mnemonic.starts_with("ss") {
    if let Ok(condition) = mnemonic[2..].parse::<Condition>() {
      return Some((condition, true));
    }
  }
  if mnemonic.starts_with('s') {
    if let Ok(condition) = mnemonic[1..].parse::<Condition>() {
      return Some((condition, false));
    }
  }
  None
}

fn is_mnemonic(mnemonic: &str) -> bool {
  MISC_MNEMONICS.contains(&mnemonic)
    || MOVE_MNEMONICS.contains(&mnemonic)
    || INT_TO_FLOAT_MNEMONICS.contains(&mnemonic)
    || FLOAT_TO_INT_MNEMONICS.contains(&mnemonic)
    || mnemonic.parse::<AluFunction>().is_ok()
    || mnemonic.parse::<FloatFunction>().is_ok()
    || skip_condition(mnemonic).is_some()
    || opcode_named(mnemonic).is_some()
}

fn position(table: &[&str], mnemonic: &str) -> u8 {
  table.iter().position(|m| *m == mnemonic).unwrap_or(0) as u8
}

// endregion

// region Encoding

/// Encodes one statement at a known address.
struct Encoder<'t> {
  labels  : &'t LabelTable,
  address : u64,
  unit    : usize,
  line    : usize,
}

impl<'t> Encoder<'t> {

  fn encode(&self, statement: &Statement) -> Result<Instruction, AssemblyError> {
    use Operand::{Float as F, Memory as M, Register as R, Shift as S, Value as V};

    for operand in statement.operands.iter() {
      match operand {
        | R(n)
        | F(n)
        | M(_, n) if *n as usize >= REGISTER_COUNT => {
          return Err(self.out_of_range(*n as i64, REGISTER_BITS));
        }
        S(_, amount) if *amount < 0 || *amount as usize >= REGISTER_COUNT => {
          return Err(self.out_of_range(*amount, REGISTER_BITS));
        }
        _ => {}
      }
    }

    let m = statement.mnemonic;
    let instruction =
      match (m, statement.operands.as_slice()) {

        // Misc sub-functions //
        ("halt",  [R(s)])       => Instruction::halt(*s),
        ("swp",   [R(d), R(s)]) => Instruction::swap(*d, *s),
        ("mov",   [F(d), F(s)]) => Instruction::move_float(*d, *s),
        ("rmeh",  [])           => Instruction::remove_handler(),
        ("throw", [R(s)])       => Instruction::throw(*s),
        ("ldex",  [R(d)])       => Instruction::exception(*d, EXCEPTION_LOAD_ID),
        ("clex",  [])           => Instruction::exception(0, EXCEPTION_CLEAR),
        ("ldek",  [R(d)])       => Instruction::exception(*d, EXCEPTION_LOAD_KIND),
        ("getc",  [R(d)])       => Instruction::get_char(*d),
        ("putc",  [R(s)])       => Instruction::put_char(*s),
        ("flush", [])           => Instruction::flush(),

        (_, [R(d), R(s)]) if MOVE_MNEMONICS.contains(&m) => {
          Instruction::move_register(*d, *s, position(&MOVE_MNEMONICS, m))
        }

        (_, [F(d), R(s)]) if INT_TO_FLOAT_MNEMONICS.contains(&m) => {
          Instruction::int_to_float(*d, *s, position(&INT_TO_FLOAT_MNEMONICS, m))
        }

        (_, [R(d), F(s)]) if FLOAT_TO_INT_MNEMONICS.contains(&m) => {
          Instruction::float_to_int(*d, *s, position(&FLOAT_TO_INT_MNEMONICS, m))
        }

        ("push", operands) | ("pop", operands) => self.stack(m, operands)?,

        // Loads of an immediate //
        ("mov", [R(s), V(v)]) => {
          Instruction::load_immediate(*s, self.unsigned(v, IMMEDIATE_BITS)? as u16, 0)
        }
        ("mov", [R(s), V(v), S(PreShift::Left, n)]) => {
          Instruction::load_immediate(*s, self.unsigned(v, IMMEDIATE_BITS)? as u16, *n as u8)
        }

        // Register ALU //
        ("not", [R(d), R(t)]) => Instruction::alu(AluFunction::Not, *d, 0, *t),
        ("not", [R(d), R(t), S(kind, n)]) => {
          Instruction::alu_shifted(AluFunction::Not, *d, 0, *t, *kind, *n as u8)
        }
        (_, [R(d), R(s), R(t)]) if m != "not" && m.parse::<AluFunction>().is_ok() => {
          Instruction::alu(self.alu_function(m)?, *d, *s, *t)
        }
        (_, [R(d), R(s), R(t), S(kind, n)]) if m != "not" && m.parse::<AluFunction>().is_ok() => {
          Instruction::alu_shifted(self.alu_function(m)?, *d, *s, *t, *kind, *n as u8)
        }
        (_, [F(d), F(s), F(t)]) if m.parse::<FloatFunction>().is_ok() => {
          let function = m.parse::<FloatFunction>().map_err(|_| self.wrong_operands(m))?;
          Instruction::float_alu(function, *d, *s, *t)
        }

        // Control flow with a fixed shape //
        ("ret", []) => Instruction::ret(),
        ("jof", [V(v)]) => {
          Instruction::target(Opcode::JumpOffset, self.relative(v, TARGET_BITS)? as u32)
        }
        ("jir", [R(s), V(v)]) => {
          Instruction::immediate(Opcode::JumpIndirect, *s, 0, self.signed(v, IMMEDIATE_BITS)? as u16)
        }
        ("jir", [R(s), V(v), S(PreShift::Left, n)]) => {
          Instruction::immediate(Opcode::JumpIndirect, *s, *n as u8, self.signed(v, IMMEDIATE_BITS)? as u16)
        }

        // Heap management //
        ("alloc", [R(s), R(t), V(v)]) => {
          Instruction::alloc(*s, *t, self.unsigned(v, IMMEDIATE_BITS)? as u16)
        }
        ("free", [R(s)]) => Instruction::free(*s),

        _ => self.encode_by_opcode(m, statement.operands.as_slice())?

      };

    Ok(instruction)
  }

  /// Skips, and the opcodes whose mnemonic alone names them.
  fn encode_by_opcode(&self, m: &str, operands: &[Operand]) -> Result<Instruction, AssemblyError> {
    use Operand::{Float as F, Memory as M, Register as R, Value as V};

    if let Some((condition, signed)) = skip_condition(m) {
      return match (condition.is_unary(), operands) {
        (true,  [R(s)])       => Ok(Instruction::skip(condition, signed, false, *s, 0)),
        (true,  [F(s)])       => Ok(Instruction::skip(condition, signed, true, *s, 0)),
        (false, [R(s), R(t)]) => Ok(Instruction::skip(condition, signed, false, *s, *t)),
        (false, [F(s), F(t)]) => Ok(Instruction::skip(condition, signed, true, *s, *t)),
        _                     => Err(self.wrong_operands(m))
      };
    }

    let opcode = match opcode_named(m) {
      Some(opcode) => opcode,
      None if is_mnemonic(m) => return Err(self.wrong_operands(m)),
      None => {
        return Err(AssemblyError::UnknownMnemonic {
          unit     : self.unit,
          line     : self.line,
          mnemonic : m.to_string()
        });
      }
    };

    let instruction =
      match (opcode, operands) {

        (op, [R(s), R(t), V(v)])
          if matches!(op, Opcode::AddI | Opcode::SubI | Opcode::MulI | Opcode::DivI
                        | Opcode::ModI | Opcode::AndI | Opcode::OrI  | Opcode::XorI
                        | Opcode::Je   | Opcode::Jne  | Opcode::Jl   | Opcode::Jg
                        | Opcode::Jsl  | Opcode::Jsg) => {
          Instruction::immediate(op, *s, *t, self.unsigned(v, IMMEDIATE_BITS)? as u16)
        }

        (op, [F(s), F(t), V(v)]) if matches!(op, Opcode::Jfe | Opcode::Jfl | Opcode::Jfg) => {
          Instruction::immediate(op, *s, *t, self.unsigned(v, IMMEDIATE_BITS)? as u16)
        }

        (op, [R(s), V(v)]) if matches!(op, Opcode::Jz | Opcode::Jnz) => {
          Instruction::immediate(op, *s, 0, self.unsigned(v, IMMEDIATE_BITS)? as u16)
        }

        (op, [V(v)]) if matches!(op, Opcode::Call | Opcode::Jump | Opcode::SetHandler) => {
          Instruction::target(op, self.unsigned(v, TARGET_BITS)? as u32)
        }

        (op, [R(s), V(v)]) if matches!(op, Opcode::LoadStack | Opcode::StoreStack) => {
          Instruction::immediate(op, *s, 0, self.signed(v, IMMEDIATE_BITS)? as u16)
        }

        (op, [R(s), M(v, base)]) if op.access_width().is_some() => {
          Instruction::immediate(op, *s, *base, self.signed(v, IMMEDIATE_BITS)? as u16)
        }

        _ => return Err(self.wrong_operands(m))

      };

    Ok(instruction)
  }

  fn stack(&self, m: &str, operands: &[Operand]) -> Result<Instruction, AssemblyError> {
    let registers: Vec<u8> =
      operands.iter()
              .map(|operand| match operand {
                Operand::Register(r) => Some(*r),
                _ => None
              })
              .collect::<Option<Vec<u8>>>()
              .ok_or_else(|| self.wrong_operands(m))?;

    match (m, registers.len()) {
      ("push", 1..=3) => Ok(Instruction::push(&registers)),
      ("pop",  1..=3) => Ok(Instruction::pop(&registers)),
      _               => Err(self.wrong_operands(m))
    }
  }

  fn alu_function(&self, m: &str) -> Result<AluFunction, AssemblyError> {
    m.parse::<AluFunction>().map_err(|_| self.wrong_operands(m))
  }

  fn resolve(&self, value: &Value) -> Result<i64, AssemblyError> {
    match value {
      Value::Number(n) => Ok(*n),
      Value::Label(name) => {
        self.labels
            .address(name)
            .map(|address| address as i64)
            .ok_or_else(|| AssemblyError::UndefinedLabel {
              unit  : self.unit,
              line  : self.line,
              label : name.to_string()
            })
      }
    }
  }

  /// A field read as an unsigned number: `0 <= value < 2^bits`.
  fn unsigned(&self, value: &Value, bits: u32) -> Result<u64, AssemblyError> {
    let n = self.resolve(value)?;
    if n < 0 || n >= 1 << bits {
      return Err(self.out_of_range(n, bits));
    }
    Ok(n as u64)
  }

  /// A field read as a two's complement number, returned masked to `bits`.
  fn signed(&self, value: &Value, bits: u32) -> Result<u64, AssemblyError> {
    let n = self.resolve(value)?;
    self.fit_signed(n, bits)
  }

  /// Like `signed`, except a label resolves to its distance from this instruction.
  fn relative(&self, value: &Value, bits: u32) -> Result<u64, AssemblyError> {
    let n = match value {
      Value::Number(n) => *n,
      Value::Label(_)  => self.resolve(value)? - self.address as i64,
    };
    self.fit_signed(n, bits)
  }

  fn fit_signed(&self, n: i64, bits: u32) -> Result<u64, AssemblyError> {
    let bound = 1i64 << (bits - 1);
    if n < -bound || n >= bound {
      return Err(self.out_of_range(n, bits));
    }
    Ok((n as u64) & ((1 << bits) - 1))
  }

  fn wrong_operands(&self, m: &str) -> AssemblyError {
    AssemblyError::WrongOperands { unit: self.unit, line: self.line, mnemonic: m.to_string() }
  }

  fn out_of_range(&self, value: i64, bits: u32) -> AssemblyError {
    AssemblyError::OutOfRange { unit: self.unit, line: self.line, value, bits }
  }

}

// endregion

/// Assembles the units into one container, numbering instructions consecutively across units.
pub fn assemble(units: &[&str]) -> Result<Bytecode, AssemblyError> {
  assemble_with_labels(units).map(|(bytecode, _labels)| bytecode)
}

/// Like `assemble`, also returning the labels that were defined.
pub fn assemble_with_labels(units: &[&str]) -> Result<(Bytecode, LabelTable), AssemblyError> {
  let mut call_stack_size    = DEFAULT_STACK_SIZE;
  let mut handler_stack_size = DEFAULT_HANDLER_STACK_SIZE;
  let mut labels             = LabelTable::new();
  let mut statements         = Vec::<Statement>::new();

  // First pass: parse, collect labels and directives.
  for (unit, text) in units.iter().enumerate() {
    for (index, raw_line) in text.lines().enumerate() {
      let line = index + 1;
      let syntax_error = |text: &str| AssemblyError::Syntax { unit, line, text: text.to_string() };

      let code = strip_comment(raw_line);
      if code.is_empty() {
        continue;
      }

      let parsed: IResult<&str, Vec<&str>> = many0(label_definition)(code);
      let (rest, names) = parsed.map_err(|_| syntax_error(code))?;
      for name in names {
        let label = Label { address: statements.len() as u64, unit };
        labels.insert(DefaultAtom::from(name), label).map_err(|previous| {
          AssemblyError::DuplicateLabel {
            unit,
            line,
            label: name.to_string(),
            previous_unit: previous.unit
          }
        })?;
      }

      if rest.is_empty() {
        continue;
      }

      if rest.starts_with('.') {
        let (_, (name, value)) = directive(rest).map_err(|_| syntax_error(rest))?;
        if value < 0 {
          return Err(AssemblyError::OutOfRange { unit, line, value, bits: 64 });
        }
        match name {
          "stack"    => call_stack_size = value as u64,
          "handlers" => handler_stack_size = value as u64,
          _ => {
            return Err(AssemblyError::UnknownMnemonic { unit, line, mnemonic: format!(".{}", name) });
          }
        }
        continue;
      }

      let (_, (mnemonic, operands)) = statement(rest).map_err(|_| syntax_error(rest))?;
      statements.push(Statement { unit, line, mnemonic, operands });
    }
  }

  // Second pass: encode with every label known.
  let code =
    statements.iter()
              .enumerate()
              .map(|(address, statement)| {
                let encoder = Encoder {
                  labels  : &labels,
                  address : address as u64,
                  unit    : statement.unit,
                  line    : statement.line,
                };
                encoder.encode(statement).map(|instruction| instruction.encode())
              })
              .collect::<Result<Vec<Word>, AssemblyError>>()?;

  Ok((Bytecode::new(call_stack_size, handler_stack_size, code), labels))
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::bytecode::render_instruction;
  use crate::status::Status;
  use crate::vm::Vm;

  const GCD: &str = "
    ; greatest common divisor of 48 and 180
    .stack 8
          mov r0,48
          mov r1,180
    loop: jz r1,done      # loop until the remainder is zero
          mod r0,r0,r1
          swp r0,r1
          jof loop
    done: halt r0
  ";

  #[test]
  fn assembles_gcd() {
    let (bytecode, labels) = assemble_with_labels(&[GCD]).unwrap();

    let expected: Vec<Word> = [
      Instruction::load_immediate(0, 48, 0),
      Instruction::load_immediate(1, 180, 0),
      Instruction::immediate(Opcode::Jz, 1, 0, 6),
      Instruction::alu(AluFunction::Mod, 0, 0, 1),
      Instruction::swap(0, 1),
      Instruction::jump_offset(-3),
      Instruction::halt(0),
    ].iter().map(Instruction::encode).collect();

    assert_eq!(bytecode.code, expected);
    assert_eq!(bytecode.call_stack_size, 8);
    assert_eq!(bytecode.handler_stack_size, DEFAULT_HANDLER_STACK_SIZE);
    assert_eq!(labels.address("loop"), Some(2));
    assert_eq!(labels.address("done"), Some(6));

    let mut vm = Vm::new(0, 0);
    assert_eq!(bytecode.execute(&mut vm), Status::Clean(12));
  }

  #[test]
  fn labels_span_units() {
    let main = "
      .handlers 2
             seh oops
             call square
             halt r0
      oops:  ldek r0
             halt r0
    ";
    let library = "
      square: mov r1,7
              mul r0,r1,r1
              ret
    ";

    let (bytecode, labels) = assemble_with_labels(&[main, library]).unwrap();
    assert_eq!(labels.get("square"), Some(Label { address: 5, unit: 1 }));
    assert_eq!(bytecode.handler_stack_size, 2);
    assert_eq!(bytecode.code[1], Instruction::call(5).encode());

    let mut vm = Vm::new(0, 0);
    assert_eq!(bytecode.execute(&mut vm), Status::Clean(49));
  }

  #[test]
  fn labels_may_share_lines_and_addresses() {
    let (bytecode, labels) = assemble_with_labels(&["a: b:\nc: jmp b\n end:"]).unwrap();
    assert_eq!(labels.address("a"), Some(0));
    assert_eq!(labels.address("b"), Some(0));
    assert_eq!(labels.address("c"), Some(0));
    assert_eq!(labels.address("end"), Some(1));
    assert_eq!(bytecode.code, vec![Instruction::jump(0).encode()]);
  }

  #[test]
  fn operand_forms() {
    let source = "
      mov r1,0x10,LSH 16
      add r2,r3,r4,SRSH 3
      ldq r5,-8(r6)
      stb r5, 0x2 ( r6 )
      sslt r1,r2
      snz fp3
      jir r4,-1,LSH 2
      jfg fp1,fp2,0
      i2f fp1,r2
      pop r1,r2
    ";
    let bytecode = assemble(&[source]).unwrap();

    let expected: Vec<Word> = [
      Instruction::load_immediate(1, 16, 16),
      Instruction::alu_shifted(AluFunction::Add, 2, 3, 4, PreShift::Arithmetic, 3),
      Instruction::memory(Opcode::LoadQuad, 5, 6, -8),
      Instruction::memory(Opcode::StoreByte, 5, 6, 2),
      Instruction::skip(Condition::Less, true, false, 1, 2),
      Instruction::skip(Condition::NonZero, false, true, 3, 0),
      Instruction::jump_indirect(4, 2, -1),
      Instruction::immediate(Opcode::Jfg, 1, 2, 0),
      Instruction::int_to_float(1, 2, CONVERT_VALUE),
      Instruction::pop(&[1, 2]),
    ].iter().map(Instruction::encode).collect();

    assert_eq!(bytecode.code, expected);
  }

  #[test]
  fn disassembly_reassembles() {
    let program = [
      Instruction::halt(3),
      Instruction::move_register(1, 2, MOVE_HIGH_32),
      Instruction::move_float(4, 5),
      Instruction::float_to_int(6, 7, CONVERT_BITS),
      Instruction::remove_handler(),
      Instruction::throw(8),
      Instruction::push(&[1, 2, 3]),
      Instruction::exception(0, EXCEPTION_CLEAR),
      Instruction::exception(9, EXCEPTION_LOAD_ID),
      Instruction::get_char(1),
      Instruction::put_char(2),
      Instruction::flush(),
      Instruction::alu(AluFunction::Ror, 1, 2, 3),
      Instruction::alu_shifted(AluFunction::Not, 1, 0, 3, PreShift::Left, 31),
      Instruction::float_alu(FloatFunction::Mod, 1, 2, 3),
      Instruction::load_immediate(1, 65535, 0),
      Instruction::immediate(Opcode::DivI, 1, 2, 3),
      Instruction::call(0x3FF_FFFF),
      Instruction::jump(17),
      Instruction::ret(),
      Instruction::immediate(Opcode::Jne, 1, 2, 3),
      Instruction::jump_offset(-33_554_432),
      Instruction::jump_indirect(1, 0, 7),
      Instruction::immediate(Opcode::Jnz, 1, 0, 9),
      Instruction::set_handler(4),
      Instruction::skip(Condition::GreaterEqual, true, true, 1, 2),
      Instruction::load_stack(1, -32768),
      Instruction::store_stack(2, 32767),
      Instruction::alloc(1, 2, 3),
      Instruction::free(4),
      Instruction::memory(Opcode::LoadHalf, 1, 2, 3),
      Instruction::memory(Opcode::StoreWord, 1, 2, -3),
    ];

    let text: Vec<String> = program.iter().map(|i| render_instruction(i.encode())).collect();
    let source = text.join("\n");
    let bytecode = assemble(&[source.as_str()]).unwrap();

    let expected: Vec<Word> = program.iter().map(Instruction::encode).collect();
    assert_eq!(bytecode.code, expected);
  }

  #[test]
  fn unknown_mnemonic() {
    assert_eq!(
      assemble(&["ret", "\n  bogus r1"]),
      Err(AssemblyError::UnknownMnemonic { unit: 1, line: 2, mnemonic: "bogus".to_string() })
    );
    assert_eq!(
      assemble(&[".origin 4"]),
      Err(AssemblyError::UnknownMnemonic { unit: 0, line: 1, mnemonic: ".origin".to_string() })
    );
  }

  #[test]
  fn wrong_operands() {
    for source in ["halt 5", "mov fp1,r2", "push", "pop r1,r2,r3,r4", "jz fp1,3", "snz r1,r2", "ldb r1,r2"].iter() {
      match assemble(&[*source]) {
        Err(AssemblyError::WrongOperands { unit: 0, line: 1, .. }) => {}
        other => panic!("expected WrongOperands for `{}`, got {:?}", source, other),
      }
    }
  }

  #[test]
  fn undefined_label() {
    assert_eq!(
      assemble(&["ret\njmp nowhere"]),
      Err(AssemblyError::UndefinedLabel { unit: 0, line: 2, label: "nowhere".to_string() })
    );
  }

  #[test]
  fn duplicate_label() {
    assert_eq!(
      assemble(&["a: ret", "\n\na: ret"]),
      Err(AssemblyError::DuplicateLabel { unit: 1, line: 3, label: "a".to_string(), previous_unit: 0 })
    );
  }

  #[test]
  fn out_of_range() {
    assert_eq!(
      assemble(&["mov r1,70000"]),
      Err(AssemblyError::OutOfRange { unit: 0, line: 1, value: 70000, bits: 16 })
    );
    assert_eq!(
      assemble(&["mov r40,1"]),
      Err(AssemblyError::OutOfRange { unit: 0, line: 1, value: 40, bits: 5 })
    );
    assert_eq!(
      assemble(&["ldsp r1,32768"]),
      Err(AssemblyError::OutOfRange { unit: 0, line: 1, value: 32768, bits: 16 })
    );
    assert_eq!(
      assemble(&["add r1,r2,r3,LSH 32"]),
      Err(AssemblyError::OutOfRange { unit: 0, line: 1, value: 32, bits: 5 })
    );
    assert_eq!(
      assemble(&[".stack -1"]),
      Err(AssemblyError::OutOfRange { unit: 0, line: 1, value: -1, bits: 64 })
    );
  }

  #[test]
  fn syntax_errors() {
    assert_eq!(
      assemble(&["mov r1,,2"]),
      Err(AssemblyError::Syntax { unit: 0, line: 1, text: "mov r1,,2".to_string() })
    );
    assert!(matches!(assemble(&["ldq r1,8(r2"]), Err(AssemblyError::Syntax { .. })));
    assert!(matches!(assemble(&[".stack"]), Err(AssemblyError::Syntax { .. })));
  }

  #[test]
  fn empty_input() {
    let bytecode = assemble(&["", "  ; nothing here\n\n"]).unwrap();
    assert!(bytecode.code.is_empty());
    assert_eq!(bytecode.call_stack_size, DEFAULT_STACK_SIZE);
    assert!(bytecode.is_valid_magic());
  }
}

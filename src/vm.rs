//! The register machine: state, the fetch/decode/dispatch loop, and fault unwinding.

use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use std::io::{Read, Write};

use prettytable::{format as TableFormat, Table};

use crate::bytecode::*;
use crate::heap::Heap;
use crate::status::Status;

/// Number of integer registers, and separately of float registers.
pub const REGISTER_COUNT: usize = 32;

/// An installed exception handler.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handler {
  /// Where control resumes when a fault is raised.
  pub target: usize,
  /// The call stack depth when the handler was installed.
  pub old_sp: usize,
}

/// Where control goes after an instruction that did not raise.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Flow {
  Next,
  Skip,
  Jump(usize),
}

/// The outcome of one instruction. `Err` carries the status to raise, which is how `halt` ends a
/// run too.
type Step = Result<Flow, Status>;

pub struct Vm {
  // Registers //
  iregs : [u64; REGISTER_COUNT],
  fregs : [f64; REGISTER_COUNT],
  ip    : usize,
  status: Status,

  // Memory Stores //
  stack              : Vec<u64>,    // `sp` is its length
  stack_capacity     : usize,
  handlers           : Vec<Handler>, // `esp` is its length
  handler_capacity   : usize,
  heap               : Heap,

  // Host streams for `getc`, `putc` and `flush` //
  pub(crate) input  : Box<dyn Read>,
  pub(crate) output : Box<dyn Write>,
}

impl Vm {

  // region Construction and accessors

  /// A VM with every register zero, empty stacks of the given capacities, and the process's
  /// standard input and output as its streams. Stack memory grows on use, so a capacity read from
  /// an untrusted header costs nothing up front.
  pub fn new(call_stack_size: usize, handler_stack_size: usize) -> Vm {
    Vm {
      iregs            : [0; REGISTER_COUNT],
      fregs            : [0.0; REGISTER_COUNT],
      ip               : 0,
      status           : Status::default(),
      stack            : Vec::new(),
      stack_capacity   : call_stack_size,
      handlers         : Vec::new(),
      handler_capacity : handler_stack_size,
      heap             : Heap::new(),
      input            : Box::new(std::io::stdin()),
      output           : Box::new(std::io::stdout()),
    }
  }

  pub fn with_streams(mut self, input: Box<dyn Read>, output: Box<dyn Write>) -> Vm {
    self.input = input;
    self.output = output;
    self
  }

  pub fn ip(&self) -> usize {
    self.ip
  }

  pub fn sp(&self) -> usize {
    self.stack.len()
  }

  pub fn esp(&self) -> usize {
    self.handlers.len()
  }

  pub fn status(&self) -> Status {
    self.status
  }

  pub fn ireg(&self, index: usize) -> u64 {
    self.iregs[index]
  }

  pub fn set_ireg(&mut self, index: usize, value: u64) {
    self.iregs[index] = value;
  }

  pub fn freg(&self, index: usize) -> f64 {
    self.fregs[index]
  }

  pub fn set_freg(&mut self, index: usize, value: f64) {
    self.fregs[index] = value;
  }

  /// The live part of the call stack, bottom first.
  pub fn stack(&self) -> &[u64] {
    &self.stack
  }

  pub fn stack_capacity(&self) -> usize {
    self.stack_capacity
  }

  /// Installed handlers, oldest first.
  pub fn handlers(&self) -> &[Handler] {
    &self.handlers
  }

  pub fn handler_capacity(&self) -> usize {
    self.handler_capacity
  }

  pub fn heap(&self) -> &Heap {
    &self.heap
  }

  // endregion

  // region Execution

  /**
    Runs `code` from the current instruction pointer until a `halt`, a fault no handler catches,
    or the instruction pointer leaving the code. Returns the final status, which is also left in
    the status register.
  */
  pub fn execute(&mut self, code: &[Word]) -> Status {
    while self.ip < code.len() {
      let word = code[self.ip];

      #[cfg(feature = "trace_computation")]
      println!("{:016x}  {:08x}  {}", self.ip, word, render_instruction(word));

      match self.dispatch(word) {
        Ok(Flow::Next)         => self.ip += 1,
        Ok(Flow::Skip)         => self.ip += 2,
        Ok(Flow::Jump(target)) => self.ip = target,
        Err(status)            => {
          if !self.raise(status) {
            break;
          }
        }
      }
    }

    #[cfg(feature = "trace_computation")] println!("{}", self);

    self.status
  }

  /**
    Records `status` and unwinds to the most recent handler. Returns whether execution continues.

    A clean status is a `halt`, which no handler can intercept. Otherwise the handler is popped,
    control moves to its target, and values pushed since it was installed are dropped. Heap
    blocks are left alone.
  */
  fn raise(&mut self, status: Status) -> bool {
    self.status = status;
    if status.is_clean() {
      return false;
    }

    match self.handlers.pop() {
      Some(handler) => {
        #[cfg(feature = "trace_computation")]
        println!("raise({}): unwinding to {} with sp = {}", status, handler.target, handler.old_sp);

        self.ip = handler.target;
        self.stack.truncate(handler.old_sp);
        true
      }
      None => false
    }
  }

  fn dispatch(&mut self, word: Word) -> Step {
    let opcode = Opcode::from_word(word).ok_or(Status::BadOpcode(word))?;

    let r = RegisterForm::from_word(word);
    let i = ImmediateForm::from_word(word);
    let t = TargetForm::from_word(word);

    let rs = i.rs as usize;
    let rt = i.rt as usize;

    match opcode {

      Opcode::Misc     => self.misc(word, r),
      Opcode::Alu      => self.alu(word, r),
      Opcode::FloatAlu => self.float_alu(word, r),

      Opcode::LoadImmediate => {
        self.iregs[rs] = (i.immediate as u64) << i.rt;
        Ok(Flow::Next)
      }

      Opcode::AddI => self.alu_immediate(i, |lhs, imm| Some(lhs.wrapping_add(imm))),
      Opcode::SubI => self.alu_immediate(i, |lhs, imm| Some(lhs.wrapping_sub(imm))),
      Opcode::MulI => self.alu_immediate(i, |lhs, imm| Some(lhs.wrapping_mul(imm))),
      Opcode::DivI => self.alu_immediate(i, |lhs, imm| lhs.checked_div(imm)),
      // Modulo by an immediate zero is not a fault; it leaves the dividend.
      Opcode::ModI => self.alu_immediate(i, |lhs, imm| Some(lhs.checked_rem(imm).unwrap_or(lhs))),
      Opcode::AndI => self.alu_immediate(i, |lhs, imm| Some(lhs & imm)),
      Opcode::OrI  => self.alu_immediate(i, |lhs, imm| Some(lhs | imm)),
      Opcode::XorI => self.alu_immediate(i, |lhs, imm| Some(lhs ^ imm)),

      Opcode::Call => {
        if self.stack.len() >= self.stack_capacity {
          return Err(Status::StackOverflow);
        }
        self.stack.push((self.ip + 1) as u64);
        Ok(Flow::Jump(t.target as usize))
      }

      Opcode::Jump => Ok(Flow::Jump(t.target as usize)),

      Opcode::Return => {
        let address = self.stack.pop().ok_or(Status::StackUnderflow)?;
        Ok(Flow::Jump(address as usize))
      }

      Opcode::Je  => branch(self.iregs[rs] == self.iregs[rt], i.immediate),
      Opcode::Jne => branch(self.iregs[rs] != self.iregs[rt], i.immediate),
      Opcode::Jl  => branch(self.iregs[rs] <  self.iregs[rt], i.immediate),
      Opcode::Jg  => branch(self.iregs[rs] >  self.iregs[rt], i.immediate),
      Opcode::Jsl => branch((self.iregs[rs] as i64) < (self.iregs[rt] as i64), i.immediate),
      Opcode::Jsg => branch((self.iregs[rs] as i64) > (self.iregs[rt] as i64), i.immediate),
      Opcode::Jfe => branch(self.fregs[rs] == self.fregs[rt], i.immediate),
      Opcode::Jfl => branch(self.fregs[rs] <  self.fregs[rt], i.immediate),
      Opcode::Jfg => branch(self.fregs[rs] >  self.fregs[rt], i.immediate),
      Opcode::Jz  => branch(self.iregs[rs] == 0, i.immediate),
      Opcode::Jnz => branch(self.iregs[rs] != 0, i.immediate),

      // A displacement before the start of the code wraps to a huge address, which ends the run.
      Opcode::JumpOffset => Ok(Flow::Jump((self.ip as i64).wrapping_add(t.offset()) as usize)),

      Opcode::JumpIndirect => {
        let base = self.iregs[rs].wrapping_shl(i.rt as u32);
        Ok(Flow::Jump(base.wrapping_add(i.offset() as u64) as usize))
      }

      Opcode::SetHandler => {
        if self.handlers.len() >= self.handler_capacity {
          return Err(Status::StackOverflow);
        }
        self.handlers.push(Handler { target: t.target as usize, old_sp: self.stack.len() });
        Ok(Flow::Next)
      }

      Opcode::Skip => self.skip(word, r),

      Opcode::LoadStack => {
        let index = self.stack_index(i.offset())?;
        self.iregs[rs] = self.stack[index];
        Ok(Flow::Next)
      }

      Opcode::StoreStack => {
        let index = self.stack_index(i.offset())?;
        self.stack[index] = self.iregs[rs];
        Ok(Flow::Next)
      }

      Opcode::Alloc => {
        let size = self.iregs[rt].wrapping_add(i.immediate as u64);
        self.iregs[rs] = self.heap.alloc(size)?;
        Ok(Flow::Next)
      }

      Opcode::Free => {
        self.heap.free(self.iregs[rs])?;
        Ok(Flow::Next)
      }

      | Opcode::LoadByte
      | Opcode::LoadHalf
      | Opcode::LoadWord
      | Opcode::LoadQuad => {
        let width = opcode.access_width().ok_or(Status::BadOpcode(word))?;
        let address = self.iregs[rt].wrapping_add(i.offset() as u64);
        self.iregs[rs] = self.heap.load(address, width)?;
        Ok(Flow::Next)
      }

      | Opcode::StoreByte
      | Opcode::StoreHalf
      | Opcode::StoreWord
      | Opcode::StoreQuad => {
        let width = opcode.access_width().ok_or(Status::BadOpcode(word))?;
        let address = self.iregs[rt].wrapping_add(i.offset() as u64);
        self.heap.store(address, width, self.iregs[rs])?;
        Ok(Flow::Next)
      }

    }
  }

  // endregion

  // region Instruction families

  fn misc(&mut self, word: Word, r: RegisterForm) -> Step {
    let function = MiscFunction::try_from(r.func).map_err(|_| Status::BadOpcode(word))?;
    let rs = r.rs as usize;
    let rd = r.rd as usize;

    match function {

      MiscFunction::Halt => return Err(Status::Clean(self.iregs[rs])),

      MiscFunction::Move => {
        let mask: u64 =
          match r.sa {
            MOVE_ALL     => u64::MAX,
            MOVE_HIGH_32 => 0xFFFF_FFFF_0000_0000,
            MOVE_LOW_32  => 0xFFFF_FFFF,
            MOVE_LOW_16  => 0xFFFF,
            MOVE_LOW_8   => 0xFF,
            _            => return Err(Status::BadOpcode(word))
          };
        self.iregs[rd] = (self.iregs[rd] & !mask) | (self.iregs[rs] & mask);
      }

      MiscFunction::FloatMove => self.fregs[rd] = self.fregs[rs],

      MiscFunction::Swap => self.iregs.swap(rd, rs),

      MiscFunction::IntToFloat => {
        self.fregs[rd] =
          match r.rt {
            CONVERT_VALUE => self.iregs[rs] as i64 as f64,
            CONVERT_BITS  => f64::from_bits(self.iregs[rs]),
            _             => return Err(Status::BadOpcode(word))
          };
      }

      MiscFunction::FloatToInt => {
        // Float to integer casts saturate, and NaN becomes zero.
        self.iregs[rd] =
          match r.rt {
            CONVERT_VALUE   => self.fregs[rs].floor() as i64 as u64,
            CONVERT_BITS    => self.fregs[rs].to_bits(),
            CONVERT_CEILING => self.fregs[rs].ceil() as i64 as u64,
            _               => return Err(Status::BadOpcode(word))
          };
      }

      MiscFunction::RemoveHandler => {
        self.handlers.pop().ok_or(Status::StackUnderflow)?;
      }

      MiscFunction::Throw => return Err(Status::UserDefined(self.iregs[rs])),

      MiscFunction::Stack => return self.push_pop(word, r),

      MiscFunction::Exception => {
        match r.sa {
          EXCEPTION_LOAD_ID   => self.iregs[rd] = self.status.id(),
          EXCEPTION_CLEAR     => self.status = Status::default(),
          EXCEPTION_LOAD_KIND => self.iregs[rd] = Into::<u8>::into(self.status.kind()) as u64,
          _                   => return Err(Status::BadOpcode(word))
        }
      }

      MiscFunction::GetChar => {
        let mut byte = [0u8; 1];
        self.iregs[rd] =
          match self.input.read_exact(&mut byte) {
            Ok(())  => byte[0] as u64,
            Err(_e) => u64::MAX
          };
      }

      MiscFunction::PutChar => {
        let value = self.iregs[rs];
        self.output.write_all(&[value as u8]).map_err(|_| Status::BadAccess(value))?;
      }

      MiscFunction::Flush => {
        self.output.flush().map_err(|_| Status::BadAccess(0))?;
      }

    }

    Ok(Flow::Next)
  }

  /// Pushes (`sa` 0..=2) or pops (`sa` 4..=6) one to three of `rs`, `rt`, `rd`. Either every
  /// value moves or none does.
  fn push_pop(&mut self, word: Word, r: RegisterForm) -> Step {
    let registers = [r.rs as usize, r.rt as usize, r.rd as usize];

    match r.sa {

      0..=2 => {
        let count = r.sa as usize + 1;
        if self.stack.len() + count > self.stack_capacity {
          return Err(Status::StackOverflow);
        }
        for register in registers[..count].iter() {
          self.stack.push(self.iregs[*register]);
        }
      }

      4..=6 => {
        let count = (r.sa - STACK_POP) as usize + 1;
        if self.stack.len() < count {
          return Err(Status::StackUnderflow);
        }
        // The top `count` values, in push order, land in the registers in operand order.
        let values = self.stack.split_off(self.stack.len() - count);
        for (register, value) in registers[..count].iter().zip(values) {
          self.iregs[*register] = value;
        }
      }

      _ => return Err(Status::BadOpcode(word))

    }

    Ok(Flow::Next)
  }

  fn alu(&mut self, word: Word, r: RegisterForm) -> Step {
    let function = AluFunction::try_from(r.func & 0xF).map_err(|_| Status::BadOpcode(word))?;
    let shift    = PreShift::try_from(r.func >> 4).map_err(|_| Status::BadOpcode(word))?;

    let sa  = r.sa as u32;
    let lhs = self.iregs[r.rs as usize];
    let rhs =
      match shift {
        PreShift::None       => self.iregs[r.rt as usize],
        PreShift::Left       => self.iregs[r.rt as usize] << sa,
        PreShift::Right      => self.iregs[r.rt as usize] >> sa,
        PreShift::Arithmetic => ((self.iregs[r.rt as usize] as i64) >> sa) as u64,
      };

    self.iregs[r.rd as usize] =
      match function {
        AluFunction::Add  => lhs.wrapping_add(rhs),
        AluFunction::Sub  => lhs.wrapping_sub(rhs),
        AluFunction::Mul  => lhs.wrapping_mul(rhs),
        AluFunction::Div  => lhs.checked_div(rhs).ok_or(Status::DivByZero)?,
        AluFunction::Mod  => lhs.checked_rem(rhs).ok_or(Status::DivByZero)?,
        AluFunction::And  => lhs & rhs,
        AluFunction::Or   => lhs | rhs,
        AluFunction::Xor  => lhs ^ rhs,
        AluFunction::Not  => !rhs,
        // Shift and rotate amounts are taken modulo 64.
        AluFunction::Lsh  => lhs.wrapping_shl(rhs as u32),
        AluFunction::Rsh  => lhs.wrapping_shr(rhs as u32),
        AluFunction::Srsh => (lhs as i64).wrapping_shr(rhs as u32) as u64,
        AluFunction::Rol  => lhs.rotate_left((rhs % 64) as u32),
        AluFunction::Ror  => lhs.rotate_right((rhs % 64) as u32),
      };

    Ok(Flow::Next)
  }

  fn float_alu(&mut self, word: Word, r: RegisterForm) -> Step {
    let function = FloatFunction::try_from(r.func).map_err(|_| Status::BadOpcode(word))?;
    let lhs = self.fregs[r.rs as usize];
    let rhs = self.fregs[r.rt as usize];

    self.fregs[r.rd as usize] =
      match function {
        FloatFunction::Add => lhs + rhs,
        FloatFunction::Sub => lhs - rhs,
        FloatFunction::Mul => lhs * rhs,
        FloatFunction::Div => lhs / rhs,
        FloatFunction::Mod => lhs % rhs,
      };

    Ok(Flow::Next)
  }

  /// `rs = rt op immediate`, where `op` returns `None` for a division by zero.
  fn alu_immediate<F>(&mut self, i: ImmediateForm, op: F) -> Step
    where F: FnOnce(u64, u64) -> Option<u64>
  {
    let value = op(self.iregs[i.rt as usize], i.immediate as u64).ok_or(Status::DivByZero)?;
    self.iregs[i.rs as usize] = value;
    Ok(Flow::Next)
  }

  fn skip(&mut self, word: Word, r: RegisterForm) -> Step {
    if r.func >= SKIP_FLOAT << 1 {
      return Err(Status::BadOpcode(word));
    }
    let condition =
      Condition::try_from(r.func & SKIP_CONDITION_MASK).map_err(|_| Status::BadOpcode(word))?;
    let rs = r.rs as usize;
    let rt = r.rt as usize;

    let holds =
      if r.func & SKIP_FLOAT != 0 {
        compare(condition, self.fregs[rs], self.fregs[rt])
      } else if r.func & SKIP_SIGNED != 0 {
        compare(condition, self.iregs[rs] as i64, self.iregs[rt] as i64)
      } else {
        compare(condition, self.iregs[rs], self.iregs[rt])
      };

    match holds {
      true  => Ok(Flow::Skip),
      false => Ok(Flow::Next)
    }
  }

  /// Index of the stack slot `offset` away from the top, which must be below `sp`.
  fn stack_index(&self, offset: i64) -> Result<usize, Status> {
    let index = self.stack.len() as i64 + offset;
    if index < 0 {
      Err(Status::StackUnderflow)
    } else if index as usize >= self.stack.len() {
      Err(Status::StackOverflow)
    } else {
      Ok(index as usize)
    }
  }

  // endregion

  // region Display methods

  fn make_register_table<T>(
      name      : &str,
      registers : &[T],
      highlight : Option<usize>
    ) -> Table
    where T: Display
  {
    let mut table = Table::new();

    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->"Address", ubl->"Contents"]);

    for (i, value) in registers.iter().enumerate() {
      match Some(i) == highlight {

        true  => {
          table.add_row(row![r->format!("* --> {}{} =", name, i), format!("{}", value)]);
        }

        false => {
          table.add_row(row![r->format!("{}{} =", name, i), format!("{}", value)]);
        }

      } // end match on highlight
    } // end for
    table
  }

  // endregion

}

fn branch(taken: bool, target: u16) -> Step {
  match taken {
    true  => Ok(Flow::Jump(target as usize)),
    false => Ok(Flow::Next)
  }
}

fn compare<T>(condition: Condition, lhs: T, rhs: T) -> bool
  where T: PartialOrd + Default
{
  match condition {
    Condition::Equal        => lhs == rhs,
    Condition::Less         => lhs <  rhs,
    Condition::Greater      => lhs >  rhs,
    Condition::Zero         => lhs == T::default(),
    Condition::NotEqual     => lhs != rhs,
    Condition::LessEqual    => lhs <= rhs,
    Condition::GreaterEqual => lhs >= rhs,
    Condition::NonZero      => lhs != T::default(),
  }
}


lazy_static! {
  static ref TABLE_DISPLAY_FORMAT: TableFormat::TableFormat =
    TableFormat::FormatBuilder::new()
      .column_separator('│')
      .borders(' ')
      .separator(
        TableFormat::LinePosition::Title,
        TableFormat::LineSeparator::new('─', '┼', ' ', ' ')
      )
      .separator(
        TableFormat::LinePosition::Bottom,
        TableFormat::LineSeparator::new('─', '┴', ' ', ' ')
      )
      .padding(1, 1)
      .build();
}

impl Display for Vm {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let iregs: Vec<String> = self.iregs.iter().map(|v| format!("{:016x}", v)).collect();
    let stack: Vec<String> = self.stack.iter().map(|v| format!("{:016x}", v)).collect();
    let handlers: Vec<String> =
      self.handlers
          .iter()
          .map(|h| format!("-> {} (sp {})", h.target, h.old_sp))
          .collect();

    let i_table = Vm::make_register_table("r",  &iregs,       None);
    let f_table = Vm::make_register_table("fp", &self.fregs,  None);
    let s_table = Vm::make_register_table("",   &stack,       self.stack.len().checked_sub(1));
    let e_table = Vm::make_register_table("",   &handlers,    self.handlers.len().checked_sub(1));

    let mut combined_table = table!([i_table, f_table, s_table, e_table]);

    combined_table.set_titles(row![ub->"Registers", ub->"Float Registers", ub->"Stack", ub->"Handlers"]);
    combined_table.set_format(*TABLE_DISPLAY_FORMAT);

    write!(
      f,
      "IP: {}  SP: {}/{}  ESP: {}/{}  Status: {}\n{}",
      self.ip,
      self.stack.len(),
      self.stack_capacity,
      self.handlers.len(),
      self.handler_capacity,
      self.status,
      combined_table
    )
  }
}

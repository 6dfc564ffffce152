//! The bytecode instruction set.
//!
//! Instructions are one opcode byte followed by inline operands of fixed
//! width (big-endian for multi-byte operands). `CreateClosure` additionally
//! trails two bytes per upvalue of the function it instantiates.

use crate::heap::{Heap, ObjRef};
use crate::object::Obj;
use crate::symbol::SymbolTable;
use crate::value::Value;

macro_rules! ops {
  ($($name:ident => operands: $width:expr, effect: $effect:expr;)*) => {
    #[repr(u8)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Op {
      $($name),*
    }

    const ALL: &[Op] = &[$(Op::$name),*];

    impl Op {
      pub fn from_byte(byte: u8) -> Option<Op> {
        ALL.get(byte as usize).copied()
      }

      /// Inline operand bytes following the opcode. `CreateClosure` has a
      /// variable tail on top of this; see [`operand_bytes_at`].
      pub fn operand_bytes(self) -> usize {
        match self {
          $(Op::$name => $width),*
        }
      }

      /// Net change in stack slots when this instruction executes; used by
      /// the compiler to track the peak frame size.
      pub fn stack_effect(self) -> i32 {
        match self {
          $(Op::$name => $effect),*
        }
      }
    }
  };
}

ops! {
  LoadConstant => operands: 2, effect: 1;
  PushNull => operands: 0, effect: 1;
  PushFalse => operands: 0, effect: 1;
  PushTrue => operands: 0, effect: 1;
  LoadLocal => operands: 1, effect: 1;
  StoreLocal => operands: 1, effect: 0;
  LoadUpvalue => operands: 1, effect: 1;
  StoreUpvalue => operands: 1, effect: 0;
  LoadModuleVar => operands: 2, effect: 1;
  StoreModuleVar => operands: 2, effect: 0;
  LoadThisField => operands: 1, effect: 1;
  StoreThisField => operands: 1, effect: 0;
  LoadField => operands: 1, effect: 0;
  StoreField => operands: 1, effect: -1;
  Pop => operands: 0, effect: -1;
  Call0 => operands: 2, effect: 0;
  Call1 => operands: 2, effect: -1;
  Call2 => operands: 2, effect: -2;
  Call3 => operands: 2, effect: -3;
  Call4 => operands: 2, effect: -4;
  Call5 => operands: 2, effect: -5;
  Call6 => operands: 2, effect: -6;
  Call7 => operands: 2, effect: -7;
  Call8 => operands: 2, effect: -8;
  Call9 => operands: 2, effect: -9;
  Call10 => operands: 2, effect: -10;
  Call11 => operands: 2, effect: -11;
  Call12 => operands: 2, effect: -12;
  Call13 => operands: 2, effect: -13;
  Call14 => operands: 2, effect: -14;
  Call15 => operands: 2, effect: -15;
  Call16 => operands: 2, effect: -16;
  Super0 => operands: 4, effect: 0;
  Super1 => operands: 4, effect: -1;
  Super2 => operands: 4, effect: -2;
  Super3 => operands: 4, effect: -3;
  Super4 => operands: 4, effect: -4;
  Super5 => operands: 4, effect: -5;
  Super6 => operands: 4, effect: -6;
  Super7 => operands: 4, effect: -7;
  Super8 => operands: 4, effect: -8;
  Super9 => operands: 4, effect: -9;
  Super10 => operands: 4, effect: -10;
  Super11 => operands: 4, effect: -11;
  Super12 => operands: 4, effect: -12;
  Super13 => operands: 4, effect: -13;
  Super14 => operands: 4, effect: -14;
  Super15 => operands: 4, effect: -15;
  Super16 => operands: 4, effect: -16;
  Jump => operands: 2, effect: 0;
  Loop => operands: 2, effect: 0;
  JumpIfFalse => operands: 2, effect: -1;
  And => operands: 2, effect: -1;
  Or => operands: 2, effect: -1;
  CloseUpvalue => operands: 0, effect: -1;
  Return => operands: 0, effect: 0;
  CreateClosure => operands: 2, effect: 1;
  Construct => operands: 0, effect: 0;
  CreateClass => operands: 1, effect: -1;
  InstanceMethod => operands: 2, effect: -2;
  StaticMethod => operands: 2, effect: -2;
  End => operands: 0, effect: 0;
}

impl Op {
  pub fn call(arg_count: usize) -> Op {
    ALL[Op::Call0 as usize + arg_count]
  }

  pub fn super_(arg_count: usize) -> Op {
    ALL[Op::Super0 as usize + arg_count]
  }

  pub fn call_args(self) -> Option<usize> {
    let byte = self as u8;
    if (Op::Call0 as u8..=Op::Call16 as u8).contains(&byte) {
      return Some((byte - Op::Call0 as u8) as usize);
    }
    None
  }

  pub fn super_args(self) -> Option<usize> {
    let byte = self as u8;
    if (Op::Super0 as u8..=Op::Super16 as u8).contains(&byte) {
      return Some((byte - Op::Super0 as u8) as usize);
    }
    None
  }
}

/// Operand footprint of the instruction whose opcode byte sits at `ip`,
/// including `CreateClosure`'s per-upvalue tail (which needs the constant
/// table to find the function).
pub fn operand_bytes_at(heap: &Heap, code: &[u8], constants: &[Value], ip: usize) -> usize {
  let op = Op::from_byte(code[ip]).unwrap_or(Op::End);
  if op == Op::CreateClosure {
    let index = read_u16(code, ip + 1) as usize;
    let function = match constants[index] {
      Value::Obj(r) => r,
      _ => unreachable!("closure constant must be a function"),
    };
    return 2 + heap.function(function).upvalue_count * 2;
  }
  op.operand_bytes()
}

pub fn read_u16(code: &[u8], at: usize) -> u16 {
  (code[at] as u16) << 8 | code[at + 1] as u16
}

/// Human-readable listing of a compiled function, one instruction per line.
pub fn disassemble(heap: &Heap, method_names: &SymbolTable, function: ObjRef) -> String {
  let f = heap.function(function);
  let mut out = format!("-- {} --\n", f.name);
  let mut ip = 0;
  while ip < f.code.len() {
    let Some(op) = Op::from_byte(f.code[ip]) else {
      out.push_str(&format!("{ip:04} ???\n"));
      ip += 1;
      continue;
    };
    out.push_str(&format!("{ip:04} {op:?}"));

    match op {
      Op::LoadConstant => {
        let index = read_u16(&f.code, ip + 1) as usize;
        out.push_str(&format!(" {index} ; {}", constant_repr(heap, f.constants[index])));
      }
      Op::CreateClosure => {
        let index = read_u16(&f.code, ip + 1) as usize;
        out.push_str(&format!(" {index} ; {}", constant_repr(heap, f.constants[index])));
      }
      _ if op.call_args().is_some() => {
        let symbol = read_u16(&f.code, ip + 1) as usize;
        out.push_str(&format!(" {symbol} ; {}", method_names.get(symbol)));
      }
      _ if op.super_args().is_some() => {
        let symbol = read_u16(&f.code, ip + 1) as usize;
        let constant = read_u16(&f.code, ip + 3);
        out.push_str(&format!(" {symbol} {constant} ; {}", method_names.get(symbol)));
      }
      _ => {
        match op.operand_bytes() {
          0 => {}
          1 => out.push_str(&format!(" {}", f.code[ip + 1])),
          2 => out.push_str(&format!(" {}", read_u16(&f.code, ip + 1))),
          _ => unreachable!("no 4-byte operands outside super calls"),
        };
      }
    }
    out.push('\n');
    ip += 1 + operand_bytes_at(heap, &f.code, &f.constants, ip);
  }
  out
}

fn constant_repr(heap: &Heap, value: Value) -> String {
  match value {
    Value::Obj(r) => match heap.obj(r) {
      Obj::Str(s) => format!("{:?}", s.to_str_lossy()),
      Obj::Fn(f) => format!("fn {}", f.name),
      Obj::Class(c) => format!("class {}", heap.string(c.name).to_str_lossy()),
      other => format!("<{}>", other.kind_name()),
    },
    other => other.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_byte_round_trips() {
    let mut byte = 0u8;
    while let Some(op) = Op::from_byte(byte) {
      assert_eq!(op as u8, byte);
      byte += 1;
    }
    assert_eq!(byte as usize, ALL.len());
    assert_eq!(Op::from_byte(byte), None);
  }

  #[test]
  fn call_encoding() {
    assert_eq!(Op::call(0), Op::Call0);
    assert_eq!(Op::call(16), Op::Call16);
    assert_eq!(Op::super_(3), Op::Super3);
    assert_eq!(Op::Call5.call_args(), Some(5));
    assert_eq!(Op::Super16.super_args(), Some(16));
    assert_eq!(Op::Jump.call_args(), None);
    assert_eq!(Op::Call0.super_args(), None);
  }

  #[test]
  fn operand_widths_match_contract() {
    // zero-operand group
    for op in [Op::Pop, Op::PushNull, Op::PushFalse, Op::PushTrue, Op::Return,
               Op::Construct, Op::CloseUpvalue, Op::End] {
      assert_eq!(op.operand_bytes(), 0);
    }
    // one-byte group
    for op in [Op::LoadLocal, Op::StoreLocal, Op::LoadUpvalue, Op::StoreUpvalue,
               Op::LoadThisField, Op::StoreThisField, Op::LoadField, Op::StoreField,
               Op::CreateClass] {
      assert_eq!(op.operand_bytes(), 1);
    }
    // two-byte group
    for op in [Op::LoadConstant, Op::LoadModuleVar, Op::StoreModuleVar, Op::Jump,
               Op::Loop, Op::JumpIfFalse, Op::And, Op::Or, Op::InstanceMethod,
               Op::StaticMethod, Op::CreateClosure, Op::Call0, Op::Call16] {
      assert_eq!(op.operand_bytes(), 2);
    }
    // super calls carry the method symbol and the superclass constant slot
    assert_eq!(Op::Super0.operand_bytes(), 4);
    assert_eq!(Op::Super16.operand_bytes(), 4);
  }

  #[test]
  fn read_u16_is_big_endian() {
    assert_eq!(read_u16(&[0x12, 0x34], 0), 0x1234);
  }
}

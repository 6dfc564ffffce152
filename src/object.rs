//! The heap object kinds.
//!
//! Every object lives in a heap slot behind an [`ObjRef`](crate::heap::ObjRef)
//! handle; the slot header carries the mark bit, the object's class and the
//! all-objects chain link, so the structs here hold only their own payload.

pub mod class;
pub mod fiber;
pub mod function;
pub mod list;
pub mod map;
pub mod module;
pub mod range;
pub mod string;

use std::mem::size_of;

pub use class::{Method, ObjClass, ObjInstance};
pub use fiber::{Frame, ObjFiber};
pub use function::{ObjClosure, ObjFn, ObjUpvalue};
pub use list::ObjList;
pub use map::{MapEntry, ObjMap};
pub use module::ObjModule;
pub use range::ObjRange;
pub use string::ObjString;

use crate::value::Value;

pub enum Obj {
  /// A vacant heap slot (swept, or temporarily detached during an operation).
  Free,
  Str(ObjString),
  Range(ObjRange),
  List(ObjList),
  Map(ObjMap),
  Fn(ObjFn),
  Closure(ObjClosure),
  Upvalue(ObjUpvalue),
  Class(ObjClass),
  Instance(ObjInstance),
  Module(ObjModule),
  Fiber(ObjFiber),
}

impl Obj {
  pub fn kind_name(&self) -> &'static str {
    match self {
      Obj::Free => "free",
      Obj::Str(_) => "string",
      Obj::Range(_) => "range",
      Obj::List(_) => "list",
      Obj::Map(_) => "map",
      Obj::Fn(_) => "function",
      Obj::Closure(_) => "closure",
      Obj::Upvalue(_) => "upvalue",
      Obj::Class(_) => "class",
      Obj::Instance(_) => "instance",
      Obj::Module(_) => "module",
      Obj::Fiber(_) => "fiber",
    }
  }

  /// The bytes this object currently retains, counting owned buffers by
  /// capacity. Used both when accounting an allocation and when the collector
  /// re-accounts survivors.
  pub fn retained_size(&self) -> usize {
    let own = size_of::<Obj>();
    own
      + match self {
        Obj::Free => 0,
        Obj::Str(s) => s.as_bytes().len(),
        Obj::Range(_) => 0,
        Obj::List(l) => l.elements.capacity() * size_of::<Value>(),
        Obj::Map(m) => m.capacity() * size_of::<MapEntry>(),
        Obj::Fn(f) => {
          f.code.capacity() + f.constants.capacity() * size_of::<Value>() + f.lines.capacity() * 4
        }
        Obj::Closure(c) => c.upvalues.capacity() * 4,
        Obj::Upvalue(_) => 0,
        Obj::Class(c) => c.methods.capacity() * size_of::<Method>(),
        Obj::Instance(i) => i.fields.capacity() * size_of::<Value>(),
        Obj::Module(m) => m.vars.capacity() * size_of::<Value>() + m.var_names.len() * 16,
        Obj::Fiber(f) => {
          f.stack.capacity() * size_of::<Value>() + f.frames.capacity() * size_of::<Frame>()
        }
      }
  }
}

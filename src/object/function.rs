use crate::heap::ObjRef;
use crate::value::Value;

/// A unit of compiled code: the instruction stream and constant table of one
/// function, method or module body.
pub struct ObjFn {
  pub code: Vec<u8>,
  pub constants: Vec<Value>,
  /// The module this function was compiled in; module-variable instructions
  /// index into it.
  pub module: ObjRef,
  /// Peak operand-stack depth, so a frame can reserve its slots up front.
  pub max_stack: usize,
  pub upvalue_count: usize,
  pub arg_count: usize,
  /// Source line of each instruction byte, parallel to `code`.
  pub lines: Vec<u32>,
  pub name: String,
}

impl ObjFn {
  pub fn new(module: ObjRef, initial_slots: usize, name: impl Into<String>) -> ObjFn {
    ObjFn {
      code: Vec::new(),
      constants: Vec::new(),
      module,
      max_stack: initial_slots,
      upvalue_count: 0,
      arg_count: 0,
      lines: Vec::new(),
      name: name.into(),
    }
  }
}

/// A function bound together with the upvalues it closes over.
pub struct ObjClosure {
  pub function: ObjRef,
  /// One upvalue object per descriptor of the function, in order.
  pub upvalues: Vec<ObjRef>,
}

impl ObjClosure {
  pub fn new(function: ObjRef) -> ObjClosure {
    ObjClosure {
      function,
      upvalues: Vec::new(),
    }
  }
}

/// A captured local variable.
///
/// While the owning frame is live the upvalue is *open* and points at a
/// fiber stack slot; when that slot dies the value moves into the upvalue
/// itself.
pub enum ObjUpvalue {
  Open { fiber: ObjRef, slot: usize },
  Closed(Value),
}

impl ObjUpvalue {
  pub fn open_slot(&self) -> Option<usize> {
    match self {
      ObjUpvalue::Open { slot, .. } => Some(*slot),
      ObjUpvalue::Closed(_) => None,
    }
  }
}

use crate::heap::ObjRef;
use crate::value::Value;
use crate::vm::Vm;

/// A native method: receiver in `args[0]`, which also carries the return
/// value back. Returning `false` means the fiber aborted or control switched
/// fibers; the dispatch loop reloads from the VM either way.
pub type PrimitiveFn = fn(&mut Vm, &mut [Value]) -> bool;

/// One entry of a class's method table, indexed by the global method-name
/// symbol.
#[derive(Clone, Copy, Default)]
pub enum Method {
  /// No method bound under this symbol.
  #[default]
  None,
  Primitive(PrimitiveFn),
  /// `Fn.call(...)`: the receiver itself is the closure to invoke.
  FnCall,
  Script(ObjRef),
}

impl Method {
  pub fn is_none(&self) -> bool {
    matches!(self, Method::None)
  }
}

pub struct ObjClass {
  /// The class name, an `ObjString`.
  pub name: ObjRef,
  /// Instance fields, including inherited ones.
  pub field_count: usize,
  pub superclass: Option<ObjRef>,
  pub methods: Vec<Method>,
}

impl ObjClass {
  pub fn new(name: ObjRef, field_count: usize) -> ObjClass {
    ObjClass {
      name,
      field_count,
      superclass: None,
      methods: Vec::new(),
    }
  }

  pub fn method(&self, symbol: usize) -> Method {
    self.methods.get(symbol).copied().unwrap_or(Method::None)
  }

  /// Bind `method` under `symbol`, padding the table with `None` as needed.
  pub fn bind_method(&mut self, symbol: usize, method: Method) {
    if symbol >= self.methods.len() {
      self.methods.resize(symbol + 1, Method::None);
    }
    self.methods[symbol] = method;
  }
}

pub struct ObjInstance {
  pub fields: Vec<Value>,
}

impl ObjInstance {
  pub fn new(field_count: usize) -> ObjInstance {
    ObjInstance {
      fields: vec![Value::Null; field_count],
    }
  }
}

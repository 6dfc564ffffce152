//! The virtual machine: heap, global method-name table, module registry and
//! the currently running fiber.

mod dispatch;

use std::any::Any;
use std::io::Write;
use std::path::PathBuf;

use diag::Report;

use crate::heap::{Heap, HeapConfig, ObjRef, Roots};
use crate::object::{
  Method, Obj, ObjClass, ObjClosure, ObjFiber, ObjFn, ObjInstance, ObjList, ObjMap, ObjModule,
  ObjRange, ObjString,
};
use crate::op::Op;
use crate::symbol::SymbolTable;
use crate::value::Value;

/// Instance fields a class may carry, inherited ones included.
pub const MAX_FIELDS: usize = 254;

/// Where the program's output goes; injectable so tests capture it.
pub trait Output: Write + Any {
  fn as_any(&self) -> &dyn Any;
}

impl<T: Write + Any> Output for T {
  fn as_any(&self) -> &dyn Any {
    self
  }
}

/// Resolves `import` names to source text.
pub trait ModuleLoader {
  fn load(&self, name: &str) -> Result<String, Report>;
}

/// Loads `<root>/<name>.sz` from disk.
pub struct FileLoader {
  pub root: Option<PathBuf>,
}

impl ModuleLoader for FileLoader {
  fn load(&self, name: &str) -> Result<String, Report> {
    let file = format!("{name}.sz");
    let path = match &self.root {
      Some(root) => root.join(file),
      None => PathBuf::from(file),
    };
    std::fs::read_to_string(&path)
      .map_err(|_| Report::io(format!("could not open module \"{}\"", path.display())))
  }
}

/// The builtin classes. All `Some` once the core module has been installed;
/// `None` only during bootstrap.
#[derive(Default)]
pub struct CoreClasses {
  pub object: Option<ObjRef>,
  pub class_of_class: Option<ObjRef>,
  pub bool_: Option<ObjRef>,
  pub num: Option<ObjRef>,
  pub null: Option<ObjRef>,
  pub string: Option<ObjRef>,
  pub list: Option<ObjRef>,
  pub map: Option<ObjRef>,
  pub range: Option<ObjRef>,
  pub function: Option<ObjRef>,
  pub thread: Option<ObjRef>,
  pub system: Option<ObjRef>,
}

pub struct Vm {
  pub heap: Heap,
  /// The process-wide method-name space; call instructions carry 16-bit
  /// indices into it and every class's method table is aligned with it.
  pub method_names: SymbolTable,
  /// `ObjMap` from module name (string, or null for the core module) to
  /// `ObjModule`.
  pub modules: ObjRef,
  pub current_fiber: Option<ObjRef>,
  pub core: CoreClasses,
  pub output: Box<dyn Output>,
  pub loader: Box<dyn ModuleLoader>,
  /// A fatal error raised inside a primitive (import failing to compile);
  /// surfaces from the dispatch loop on the next switch.
  pub(crate) fatal: Option<Report>,
}

impl Vm {
  pub fn new(output: Box<dyn Output>, loader: Box<dyn ModuleLoader>) -> Vm {
    let mut heap = Heap::new(HeapConfig::default());
    let modules = heap.alloc(Obj::Map(ObjMap::new()), None);
    let mut vm = Vm {
      heap,
      method_names: SymbolTable::new(),
      modules,
      current_fiber: None,
      core: CoreClasses::default(),
      output,
      loader,
      fatal: None,
    };
    crate::builtins::install(&mut vm);
    vm
  }

  // -----------------------------------------------------------------------
  // allocation; every path below may run a collection first

  pub fn collect_garbage(&mut self) {
    let roots = Roots {
      modules: Some(self.modules),
      fiber: self.current_fiber,
      extra: &[],
    };
    self.heap.collect(&roots);
  }

  pub fn alloc(&mut self, obj: Obj, class: Option<ObjRef>) -> ObjRef {
    if self.heap.should_collect() {
      self.collect_garbage();
    }
    self.heap.alloc(obj, class)
  }

  pub fn alloc_string(&mut self, bytes: impl Into<Vec<u8>>) -> ObjRef {
    let class = self.core.string;
    self.alloc(Obj::Str(ObjString::new(bytes)), class)
  }

  pub fn string_value(&mut self, s: &str) -> Value {
    Value::Obj(self.alloc_string(s.as_bytes().to_vec()))
  }

  pub fn alloc_list(&mut self, elements: Vec<Value>) -> ObjRef {
    let class = self.core.list;
    self.alloc(Obj::List(ObjList::with_elements(elements)), class)
  }

  pub fn alloc_map(&mut self) -> ObjRef {
    let class = self.core.map;
    self.alloc(Obj::Map(ObjMap::new()), class)
  }

  pub fn alloc_range(&mut self, from: f64, to: f64) -> ObjRef {
    let class = self.core.range;
    self.alloc(Obj::Range(ObjRange::new(from, to)), class)
  }

  pub fn alloc_instance(&mut self, class: ObjRef) -> ObjRef {
    let fields = self.heap.class(class).field_count;
    self.alloc(Obj::Instance(ObjInstance::new(fields)), Some(class))
  }

  pub fn alloc_closure(&mut self, function: ObjRef) -> ObjRef {
    let class = self.core.function;
    self.alloc(Obj::Closure(ObjClosure::new(function)), class)
  }

  pub fn alloc_fiber(&mut self, closure: ObjRef) -> ObjRef {
    let class = self.core.thread;
    self.alloc(Obj::Fiber(ObjFiber::new(closure)), class)
  }

  pub fn alloc_fn(&mut self, module: ObjRef, initial_slots: usize, name: &str) -> ObjRef {
    self.alloc(Obj::Fn(ObjFn::new(module, initial_slots, name)), None)
  }

  pub fn alloc_module(&mut self, name: Option<String>) -> ObjRef {
    self.alloc(Obj::Module(ObjModule::new(name)), None)
  }

  // -----------------------------------------------------------------------
  // classes

  /// The class a method dispatch on `value` starts from.
  pub fn class_of(&self, value: Value) -> ObjRef {
    let core = &self.core;
    match value {
      Value::Null => core.null.expect("core classes installed"),
      Value::False | Value::True => core.bool_.expect("core classes installed"),
      Value::Num(_) => core.num.expect("core classes installed"),
      Value::Undefined => unreachable!("undefined never receives a method"),
      Value::Obj(r) => self
        .heap
        .class_of_obj(r)
        .unwrap_or_else(|| core.object.expect("core classes installed")),
    }
  }

  /// A class without a meta-class; bootstrap and meta-class construction.
  pub fn new_raw_class(&mut self, name: &str, field_count: usize) -> ObjRef {
    let name_ref = self.alloc_string(name.as_bytes().to_vec());
    self.heap.push_temp_root(name_ref);
    let class = self.alloc(Obj::Class(ObjClass::new(name_ref, field_count)), None);
    self.heap.pop_temp_root();
    class
  }

  /// A full class: meta-class wired to the class-of-class, superclass bound,
  /// inherited methods and field count copied down.
  pub fn new_class(&mut self, name: ObjRef, field_count: usize, superclass: ObjRef) -> ObjRef {
    let class_of_class = self.core.class_of_class.expect("core classes installed");
    let name_str = self.heap.string(name).to_str_lossy().into_owned();

    let meta = self.new_raw_class(&format!("{name_str} metaClass"), 0);
    self.heap.set_obj_class(meta, class_of_class);
    self.bind_superclass(meta, class_of_class);

    self.heap.push_temp_root(meta);
    let class = self.alloc(Obj::Class(ObjClass::new(name, field_count)), Some(meta));
    self.heap.pop_temp_root();
    self.bind_superclass(class, superclass);
    class
  }

  pub fn bind_superclass(&mut self, class: ObjRef, superclass: ObjRef) {
    let (super_fields, methods) = {
      let s = self.heap.class(superclass);
      (s.field_count, s.methods.clone())
    };
    let c = self.heap.class_mut(class);
    c.superclass = Some(superclass);
    c.field_count += super_fields;
    for (symbol, method) in methods.into_iter().enumerate() {
      if !method.is_none() {
        c.bind_method(symbol, method);
      }
    }
  }

  pub fn bind_method(&mut self, class: ObjRef, symbol: usize, method: Method) {
    self.heap.class_mut(class).bind_method(symbol, method);
  }

  /// Bind a compiled method, fixing up its code for the concrete superclass
  /// first. Static methods land on the meta-class.
  pub(crate) fn bind_method_and_patch(
    &mut self,
    op: Op,
    symbol: usize,
    class: ObjRef,
    method: Value,
  ) -> Result<(), Report> {
    let class = if op == Op::StaticMethod {
      self
        .heap
        .class_of_obj(class)
        .expect("a class always has a meta-class")
    } else {
      class
    };
    let closure = method
      .as_obj()
      .filter(|&r| matches!(self.heap.obj(r), Obj::Closure(_)))
      .ok_or_else(|| Report::runtime("method body must be a closure"))?;
    let function = self.heap.closure(closure).function;
    self.patch_method_operands(class, function);
    self.bind_method(class, symbol, Method::Script(closure));
    Ok(())
  }

  /// Methods are compiled with field indices relative to the class's own
  /// fields and with a null placeholder where their superclass belongs; both
  /// become known only now, at bind time. Recurses into nested closures so
  /// methods that return functions are patched all the way down.
  fn patch_method_operands(&mut self, class: ObjRef, function: ObjRef) {
    enum Patch {
      FieldBase(usize),
      SuperConstant(usize),
      Nested(ObjRef),
    }

    let superclass = self
      .heap
      .class(class)
      .superclass
      .expect("script classes always inherit");
    let field_base = self.heap.class(superclass).field_count;

    let mut patches = vec![];
    {
      let f = self.heap.function(function);
      let mut ip = 0;
      while ip < f.code.len() {
        let op = Op::from_byte(f.code[ip]).unwrap_or(Op::End);
        match op {
          Op::LoadField | Op::StoreField | Op::LoadThisField | Op::StoreThisField => {
            patches.push(Patch::FieldBase(ip + 1));
          }
          _ if op.super_args().is_some() => {
            let constant = crate::op::read_u16(&f.code, ip + 3) as usize;
            patches.push(Patch::SuperConstant(constant));
          }
          Op::CreateClosure => {
            let index = crate::op::read_u16(&f.code, ip + 1) as usize;
            if let Some(nested) = f.constants[index].as_obj() {
              patches.push(Patch::Nested(nested));
            }
          }
          Op::End => break,
          _ => {}
        }
        ip += 1 + crate::op::operand_bytes_at(&self.heap, &f.code, &f.constants, ip);
      }
    }

    for patch in patches {
      match patch {
        Patch::FieldBase(at) => {
          self.heap.function_mut(function).code[at] += field_base as u8;
        }
        Patch::SuperConstant(index) => {
          self.heap.function_mut(function).constants[index] = Value::Obj(superclass);
        }
        Patch::Nested(nested) => self.patch_method_operands(class, nested),
      }
    }
  }

  pub(crate) fn validate_superclass(
    &self,
    name: Value,
    field_count: usize,
    superclass: Value,
  ) -> Result<ObjRef, Report> {
    let class_name = self.show_value(name);
    let superclass = superclass
      .as_obj()
      .filter(|&r| matches!(self.heap.obj(r), Obj::Class(_)))
      .ok_or_else(|| {
        Report::runtime(format!("class \"{class_name}\" inherits from a non-class value"))
      })?;

    let core = &self.core;
    let builtin = [
      core.string, core.map, core.range, core.list, core.null, core.bool_, core.num,
      core.function, core.thread,
    ];
    if builtin.contains(&Some(superclass)) {
      return Err(Report::runtime(format!(
        "class \"{class_name}\" inherits from a builtin class"
      )));
    }

    if self.heap.class(superclass).field_count + field_count > MAX_FIELDS {
      return Err(Report::runtime(format!(
        "class \"{class_name}\" has more than {MAX_FIELDS} fields, inherited ones included"
      )));
    }
    Ok(superclass)
  }

  // -----------------------------------------------------------------------
  // modules

  pub fn get_module(&self, name: Value) -> Option<ObjRef> {
    match self.heap.map_get(self.modules, name) {
      Some(Value::Obj(r)) => Some(r),
      _ => None,
    }
  }

  pub fn get_core_module(&self) -> ObjRef {
    self.get_module(Value::Null).expect("core module installed")
  }

  /// Get or create the module, compile `source` into it, and return a fresh
  /// fiber ready to run the module body.
  pub fn load_module(&mut self, name: Value, source: &str) -> Result<ObjRef, Report> {
    let module = match self.get_module(name) {
      Some(module) => module,
      None => {
        let module_name = match name {
          Value::Obj(r) => Some(self.heap.string(r).to_str_lossy().into_owned()),
          _ => None,
        };
        let module = self.alloc_module(module_name);
        self.heap.push_temp_root(module);
        self.heap.map_set(self.modules, name, Value::Obj(module));
        self.heap.pop_temp_root();

        // a new module starts from the core module's variables
        let core = self.get_core_module();
        let count = self.heap.module(core).vars.len();
        for index in 0..count {
          let core_module = self.heap.module(core);
          let var_name = core_module.var_names.get(index).to_string();
          let value = core_module.vars[index];
          self.define_module_var(module, &var_name, value);
        }
        module
      }
    };

    let function = crate::compile::compile_module(self, module, source)?;
    self.heap.push_temp_root(function);
    let closure = self.alloc_closure(function);
    self.heap.pop_temp_root();
    self.heap.push_temp_root(closure);
    let fiber = self.alloc_fiber(closure);
    self.heap.pop_temp_root();
    // no receiver slot: a module body has no local 0, its first push is the
    // bottom of the stack
    Ok(fiber)
  }

  pub fn execute_module(&mut self, name: Value, source: &str) -> Result<Value, Report> {
    let fiber = self.load_module(name, source)?;
    self.execute(fiber)
  }

  /// Define (or fill a forward declaration of) a module variable. `None`
  /// means the name is already defined.
  pub fn define_module_var(&mut self, module: ObjRef, name: &str, value: Value) -> Option<usize> {
    let m = self.heap.module_mut(module);
    match m.var_index(name) {
      Some(index) => {
        if m.vars[index].as_num().is_some() {
          // a forward-declared slot holds the referencing line number
          m.vars[index] = value;
          Some(index)
        } else {
          None
        }
      }
      None => {
        let index = m.var_names.ensure(name);
        m.vars.push(value);
        Some(index)
      }
    }
  }

  /// Record a reference to a not-yet-defined module variable; the slot holds
  /// the referencing line until the definition overwrites it.
  pub fn declare_module_var(&mut self, module: ObjRef, name: &str, line: u32) -> usize {
    let m = self.heap.module_mut(module);
    let index = m.var_names.ensure(name);
    m.vars.push(Value::Num(line as f64));
    index
  }

  // -----------------------------------------------------------------------
  // misc

  /// Set the current fiber's error and hand control back to the dispatch
  /// loop; shaped for `return vm.abort_fiber(...)` inside primitives.
  pub fn abort_fiber(&mut self, message: impl Into<String>) -> bool {
    let message = message.into();
    let error = self.string_value(&message);
    if let Some(fiber) = self.current_fiber {
      self.heap.fiber_mut(fiber).error = error;
    }
    false
  }

  /// A debug rendering of a value, for diagnostics; user-facing printing
  /// goes through `toString` dispatch instead.
  pub fn show_value(&self, value: Value) -> String {
    match value {
      Value::Obj(r) => match self.heap.obj(r) {
        Obj::Str(s) => s.to_str_lossy().into_owned(),
        Obj::Class(c) => self.heap.string(c.name).to_str_lossy().into_owned(),
        Obj::Range(range) => format!("{}..{}", range.from, range.to),
        other => format!("<{}>", other.kind_name()),
      },
      other => other.to_string(),
    }
  }

  pub fn write_output(&mut self, text: &str) {
    let _ = self.output.write_all(text.as_bytes());
  }
}

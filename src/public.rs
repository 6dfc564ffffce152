//! The embedder-facing surface.

use std::path::PathBuf;

use diag::Report;

use crate::heap::ObjRef;
use crate::value::Value;
use crate::vm::{FileLoader, ModuleLoader, Output, Vm};

/// One language instance: its heap, its core module, its loaded modules.
pub struct Suzume {
  vm: Vm,
}

impl Suzume {
  pub fn new() -> Suzume {
    Suzume::with_io(Box::new(std::io::stdout()))
  }

  /// Route program output (`System.print` and friends) into `output`;
  /// tests use this with a byte buffer.
  pub fn with_io(output: Box<dyn Output>) -> Suzume {
    Suzume {
      vm: Vm::new(output, Box::new(FileLoader { root: None })),
    }
  }

  /// Where `import` looks for `<name>.sz` files.
  pub fn set_root(&mut self, root: Option<PathBuf>) {
    self.vm.loader = Box::new(FileLoader { root });
  }

  pub fn set_loader(&mut self, loader: Box<dyn ModuleLoader>) {
    self.vm.loader = loader;
  }

  /// Compile and run `source` as the module `name`. Evaluating into the
  /// same module again sees its earlier definitions, which is what a REPL
  /// wants.
  pub fn eval(&mut self, name: &str, source: &str) -> Result<(), Report> {
    let name_value = self.vm.string_value(name);
    let name_ref = name_value.as_obj().expect("module names are strings");
    self.vm.heap.push_temp_root(name_ref);
    let result = self.vm.execute_module(name_value, source);
    self.vm.heap.pop_temp_root();
    result.map(|_| ())
  }

  /// Compile `source` and render the bytecode listing of the module body
  /// and every function nested in it.
  pub fn disassemble(&mut self, name: &str, source: &str) -> Result<String, Report> {
    let name_value = self.vm.string_value(name);
    let name_ref = name_value.as_obj().expect("module names are strings");
    self.vm.heap.push_temp_root(name_ref);
    let fiber = self.vm.load_module(name_value, source);
    self.vm.heap.pop_temp_root();
    let fiber = fiber?;

    let closure = self.vm.heap.fiber(fiber).frames[0].closure;
    let function = self.vm.heap.closure(closure).function;

    let mut out = String::new();
    self.disassemble_deep(function, &mut out);
    Ok(out)
  }

  fn disassemble_deep(&self, function: ObjRef, out: &mut String) {
    out.push_str(&crate::op::disassemble(
      &self.vm.heap,
      &self.vm.method_names,
      function,
    ));
    for index in 0..self.vm.heap.function(function).constants.len() {
      let constant = self.vm.heap.function(function).constants[index];
      if let Value::Obj(r) = constant {
        if matches!(self.vm.heap.obj(r), crate::object::Obj::Fn(_)) {
          out.push('\n');
          self.disassemble_deep(r, out);
        }
      }
    }
  }

  /// Downcast the output sink; how tests read captured program output.
  pub fn output_as<T: 'static>(&self) -> Option<&T> {
    self.vm.output.as_any().downcast_ref()
  }

  /// Currently accounted heap bytes.
  pub fn allocated_bytes(&self) -> usize {
    self.vm.heap.allocated_bytes()
  }

  /// Completed collection cycles.
  pub fn collections(&self) -> u64 {
    self.vm.heap.collections()
  }
}

impl Default for Suzume {
  fn default() -> Suzume {
    Suzume::new()
  }
}

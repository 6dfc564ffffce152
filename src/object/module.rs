use crate::symbol::SymbolTable;
use crate::value::Value;

/// A compiled module: variable names aligned 1:1 with variable values.
///
/// A variable may be referenced before its definition; the slot then holds
/// the referencing line number as a `Num` until the definition overwrites
/// it. Any slot still numeric when the module finishes compiling is an
/// unresolved forward reference.
pub struct ObjModule {
  /// `None` for the core module.
  pub name: Option<String>,
  pub var_names: SymbolTable,
  pub vars: Vec<Value>,
}

impl ObjModule {
  pub fn new(name: Option<String>) -> ObjModule {
    ObjModule {
      name,
      var_names: SymbolTable::new(),
      vars: Vec::new(),
    }
  }

  /// Look up a defined variable's index.
  pub fn var_index(&self, name: &str) -> Option<usize> {
    self.var_names.index_of(name)
  }
}

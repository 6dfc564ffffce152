use indexmap::IndexSet;

/// An append-only table of interned names.
///
/// The index of a name is how the rest of the runtime refers to it: the
/// global method-name table backs the 16-bit symbol in call instructions,
/// each module keeps one for its variable names, and class books use one for
/// instance fields. Indices are stable for the lifetime of the table.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
  names: IndexSet<String>,
}

impl SymbolTable {
  pub fn new() -> SymbolTable {
    SymbolTable::default()
  }

  /// The index of `name`, interning it first if absent.
  pub fn ensure(&mut self, name: &str) -> usize {
    if let Some(index) = self.names.get_index_of(name) {
      return index;
    }
    self.names.insert_full(name.to_string()).0
  }

  pub fn index_of(&self, name: &str) -> Option<usize> {
    self.names.get_index_of(name)
  }

  pub fn get(&self, index: usize) -> &str {
    self.names.get_index(index).map(String::as_str).unwrap_or("")
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ensure_is_stable() {
    let mut table = SymbolTable::new();
    let a = table.ensure("call()");
    let b = table.ensure("call(_)");
    assert_eq!(a, 0);
    assert_eq!(b, 1);
    assert_eq!(table.ensure("call()"), a);
    assert_eq!(table.len(), 2);
  }

  #[test]
  fn index_of_missing() {
    let table = SymbolTable::new();
    assert_eq!(table.index_of("nope"), None);
  }

  #[test]
  fn get_round_trips(){
    let mut table = SymbolTable::new();
    let index = table.ensure("toString");
    assert_eq!(table.get(index), "toString");
  }
}

use crate::value::Value;

/// A growable array of values.
#[derive(Default)]
pub struct ObjList {
  pub elements: Vec<Value>,
}

impl ObjList {
  pub fn new() -> ObjList {
    ObjList::default()
  }

  pub fn with_elements(elements: Vec<Value>) -> ObjList {
    ObjList { elements }
  }

  pub fn insert(&mut self, index: usize, value: Value) {
    self.elements.insert(index, value);
  }

  pub fn remove(&mut self, index: usize) -> Value {
    self.elements.remove(index)
  }
}

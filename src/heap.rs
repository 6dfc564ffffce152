//! The object heap and its mark-and-sweep collector.
//!
//! Objects live in arena slots addressed by [`ObjRef`] handles; reference
//! cycles (the meta-class loop, fibers pointing at their callers) cost
//! nothing because nothing is reference counted. Every live object is
//! threaded onto an intrusive all-objects chain from the moment it is
//! allocated until a sweep frees it.

use std::mem;

use crate::object::{Method, Obj, ObjUpvalue};
use crate::value::{num_hash, Value};

/// Handle to a heap slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjRef(u32);

impl ObjRef {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

struct Slot {
  marked: bool,
  /// The object's class; `None` only during bootstrap, before the builtin
  /// classes exist.
  class: Option<ObjRef>,
  /// Next object on the all-objects chain.
  next: Option<ObjRef>,
  obj: Obj,
}

pub struct HeapConfig {
  pub initial_heap_size: usize,
  pub min_heap_size: usize,
  pub heap_growth_factor: f64,
}

impl Default for HeapConfig {
  fn default() -> HeapConfig {
    HeapConfig {
      initial_heap_size: 1 << 20,
      min_heap_size: 1 << 16,
      heap_growth_factor: 1.5,
    }
  }
}

/// Everything reachable outside the heap itself; the caller supplies these
/// at collection time. Temporary roots are tracked inside the heap.
#[derive(Default)]
pub struct Roots<'a> {
  pub modules: Option<ObjRef>,
  pub fiber: Option<ObjRef>,
  /// In-flight compile units and similar transient anchors.
  pub extra: &'a [ObjRef],
}

pub struct Heap {
  slots: Vec<Slot>,
  free: Vec<u32>,
  /// Head of the all-objects chain; newest first.
  head: Option<ObjRef>,
  allocated: usize,
  next_gc: usize,
  min_heap_size: usize,
  growth_factor: f64,
  gray: Vec<ObjRef>,
  temp_roots: Vec<ObjRef>,
  collections: u64,
}

impl Heap {
  pub fn new(config: HeapConfig) -> Heap {
    Heap {
      slots: Vec::new(),
      free: Vec::new(),
      head: None,
      allocated: 0,
      next_gc: config.initial_heap_size,
      min_heap_size: config.min_heap_size,
      growth_factor: config.heap_growth_factor,
      gray: Vec::new(),
      temp_roots: Vec::new(),
      collections: 0,
    }
  }

  /// Link a new object at the head of the all-objects chain. Never collects;
  /// the caller decides when to run [`Heap::collect`] so that a half-built
  /// object is never reaped out from under it.
  pub fn alloc(&mut self, obj: Obj, class: Option<ObjRef>) -> ObjRef {
    self.allocated += obj.retained_size();
    let slot = Slot {
      marked: false,
      class,
      next: self.head,
      obj,
    };
    let r = match self.free.pop() {
      Some(index) => {
        self.slots[index as usize] = slot;
        ObjRef(index)
      }
      None => {
        self.slots.push(slot);
        ObjRef(self.slots.len() as u32 - 1)
      }
    };
    self.head = Some(r);
    r
  }

  /// Record growth of a buffer owned by a live object (fiber stacks, map
  /// tables) so the trigger tracks real usage between collections.
  pub fn account(&mut self, bytes: usize) {
    self.allocated += bytes;
  }

  pub fn should_collect(&self) -> bool {
    self.allocated > self.next_gc
  }

  pub fn allocated_bytes(&self) -> usize {
    self.allocated
  }

  pub fn next_gc_threshold(&self) -> usize {
    self.next_gc
  }

  pub fn collections(&self) -> u64 {
    self.collections
  }

  /// Protect an object that is not yet reachable from the normal roots.
  pub fn push_temp_root(&mut self, r: ObjRef) {
    self.temp_roots.push(r);
  }

  pub fn pop_temp_root(&mut self) {
    self.temp_roots.pop();
  }

  pub fn temp_roots_len(&self) -> usize {
    self.temp_roots.len()
  }

  /// Drop temp roots pushed after `len`; unwinding from a failed compile.
  pub fn truncate_temp_roots(&mut self, len: usize) {
    self.temp_roots.truncate(len);
  }

  // ---------------------------------------------------------------------
  // typed access

  pub fn obj(&self, r: ObjRef) -> &Obj {
    &self.slots[r.index()].obj
  }

  /// Every live object, newest first (the all-objects chain order).
  pub fn all_objects(&self) -> Vec<ObjRef> {
    let mut refs = Vec::new();
    let mut cur = self.head;
    while let Some(r) = cur {
      refs.push(r);
      cur = self.slots[r.index()].next;
    }
    refs
  }

  pub fn class_of_obj(&self, r: ObjRef) -> Option<ObjRef> {
    self.slots[r.index()].class
  }

  pub fn set_obj_class(&mut self, r: ObjRef, class: ObjRef) {
    self.slots[r.index()].class = Some(class);
  }
}

macro_rules! typed_accessors {
  ($($variant:ident => $get:ident, $get_mut:ident, $ty:ty;)*) => {
    impl Heap {
      $(
        pub fn $get(&self, r: ObjRef) -> &$ty {
          match &self.slots[r.index()].obj {
            Obj::$variant(v) => v,
            other => unreachable!("expected {}, found {}", stringify!($variant), other.kind_name()),
          }
        }

        pub fn $get_mut(&mut self, r: ObjRef) -> &mut $ty {
          match &mut self.slots[r.index()].obj {
            Obj::$variant(v) => v,
            other => unreachable!("expected {}, found {}", stringify!($variant), other.kind_name()),
          }
        }
      )*
    }
  };
}

typed_accessors! {
  Str => string, string_mut, crate::object::ObjString;
  Range => range, range_mut, crate::object::ObjRange;
  List => list, list_mut, crate::object::ObjList;
  Map => map_obj, map_obj_mut, crate::object::ObjMap;
  Fn => function, function_mut, crate::object::ObjFn;
  Closure => closure, closure_mut, crate::object::ObjClosure;
  Upvalue => upvalue, upvalue_mut, crate::object::ObjUpvalue;
  Class => class, class_mut, crate::object::ObjClass;
  Instance => instance, instance_mut, crate::object::ObjInstance;
  Module => module, module_mut, crate::object::ObjModule;
  Fiber => fiber, fiber_mut, crate::object::ObjFiber;
}

impl Heap {
  // ---------------------------------------------------------------------
  // value semantics that need object contents

  /// `None` for kinds that cannot be map keys.
  pub fn value_hash(&self, value: Value) -> Option<u32> {
    match value {
      Value::False => Some(0),
      Value::Null => Some(1),
      Value::True => Some(2),
      Value::Num(n) => Some(num_hash(n)),
      Value::Undefined => None,
      Value::Obj(r) => match self.obj(r) {
        Obj::Str(s) => Some(s.hash()),
        Obj::Range(range) => Some(num_hash(range.from) ^ num_hash(range.to)),
        Obj::Class(class) => Some(self.string(class.name).hash()),
        _ => None,
      },
    }
  }

  /// Structural equality: strings by content, ranges by endpoints, all other
  /// objects by identity.
  pub fn values_equal(&self, a: Value, b: Value) -> bool {
    match (a, b) {
      (Value::Obj(ra), Value::Obj(rb)) => {
        if ra == rb {
          return true;
        }
        match (self.obj(ra), self.obj(rb)) {
          (Obj::Str(sa), Obj::Str(sb)) => sa.as_bytes() == sb.as_bytes(),
          (Obj::Range(a), Obj::Range(b)) => a == b,
          _ => false,
        }
      }
      _ => a == b,
    }
  }

  // ---------------------------------------------------------------------
  // map operations (hashing and equality resolved against this heap)

  pub fn map_set(&mut self, map: ObjRef, key: Value, value: Value) -> Option<()> {
    self.value_hash(key)?;
    let mut m = match mem::replace(&mut self.slots[map.index()].obj, Obj::Free) {
      Obj::Map(m) => m,
      other => unreachable!("expected map, found {}", other.kind_name()),
    };
    let before = m.capacity();
    {
      let heap = &*self;
      m.set(
        key,
        value,
        &|v| heap.value_hash(v).unwrap_or(0),
        &|a, b| heap.values_equal(a, b),
      );
    }
    let grown = m.capacity().saturating_sub(before) * mem::size_of::<crate::object::MapEntry>();
    self.slots[map.index()].obj = Obj::Map(m);
    self.account(grown);
    Some(())
  }

  /// `None` when the key kind is unhashable; `Undefined` when absent.
  pub fn map_get(&self, map: ObjRef, key: Value) -> Option<Value> {
    self.value_hash(key)?;
    Some(self.map_obj(map).get(
      key,
      &|v| self.value_hash(v).unwrap_or(0),
      &|a, b| self.values_equal(a, b),
    ))
  }

  pub fn map_contains(&self, map: ObjRef, key: Value) -> Option<bool> {
    self.value_hash(key)?;
    Some(self.map_obj(map).contains(
      key,
      &|v| self.value_hash(v).unwrap_or(0),
      &|a, b| self.values_equal(a, b),
    ))
  }

  /// `None` when the key kind is unhashable; `Null` when absent.
  pub fn map_remove(&mut self, map: ObjRef, key: Value) -> Option<Value> {
    self.value_hash(key)?;
    let mut m = match mem::replace(&mut self.slots[map.index()].obj, Obj::Free) {
      Obj::Map(m) => m,
      other => unreachable!("expected map, found {}", other.kind_name()),
    };
    let removed = {
      let heap = &*self;
      m.remove(
        key,
        &|v| heap.value_hash(v).unwrap_or(0),
        &|a, b| heap.values_equal(a, b),
      )
    };
    self.slots[map.index()].obj = Obj::Map(m);
    Some(removed)
  }

  // ---------------------------------------------------------------------
  // collection

  pub fn collect(&mut self, roots: &Roots<'_>) {
    // retained sizes are re-accounted while blackening
    self.allocated = 0;

    if let Some(modules) = roots.modules {
      self.gray_obj(modules);
    }
    for i in 0..self.temp_roots.len() {
      let r = self.temp_roots[i];
      self.gray_obj(r);
    }
    if let Some(fiber) = roots.fiber {
      self.gray_obj(fiber);
    }
    for &r in roots.extra {
      self.gray_obj(r);
    }

    while let Some(r) = self.gray.pop() {
      self.blacken(r);
    }

    self.sweep();

    self.next_gc = ((self.allocated as f64 * self.growth_factor) as usize).max(self.min_heap_size);
    self.collections += 1;
  }

  fn gray_value(&mut self, value: Value) {
    if let Value::Obj(r) = value {
      self.gray_obj(r);
    }
  }

  fn gray_obj(&mut self, r: ObjRef) {
    let slot = &mut self.slots[r.index()];
    if slot.marked {
      return;
    }
    slot.marked = true;
    self.gray.push(r);
  }

  /// Gray everything `r` references and account its retained size. The
  /// object is detached from its slot while its fields are walked; graying
  /// only touches mark bits, so even self-references are fine.
  fn blacken(&mut self, r: ObjRef) {
    let obj = mem::replace(&mut self.slots[r.index()].obj, Obj::Free);
    self.allocated += obj.retained_size();

    match &obj {
      Obj::Free | Obj::Str(_) | Obj::Range(_) => {}
      Obj::List(list) => {
        for &v in &list.elements {
          self.gray_value(v);
        }
      }
      Obj::Map(map) => {
        for entry in map.entries() {
          if !entry.key.is_undefined() {
            self.gray_value(entry.key);
            self.gray_value(entry.value);
          }
        }
      }
      Obj::Fn(function) => {
        for &v in &function.constants {
          self.gray_value(v);
        }
      }
      Obj::Closure(closure) => {
        self.gray_obj(closure.function);
        for &upvalue in &closure.upvalues {
          self.gray_obj(upvalue);
        }
      }
      Obj::Upvalue(upvalue) => match upvalue {
        // keep the owning fiber alive: the open slot points into its stack
        ObjUpvalue::Open { fiber, .. } => self.gray_obj(*fiber),
        ObjUpvalue::Closed(v) => self.gray_value(*v),
      },
      Obj::Class(class) => {
        if let Some(meta) = self.slots[r.index()].class {
          self.gray_obj(meta);
        }
        if let Some(superclass) = class.superclass {
          self.gray_obj(superclass);
        }
        self.gray_obj(class.name);
        for method in &class.methods {
          if let Method::Script(closure) = method {
            self.gray_obj(*closure);
          }
        }
      }
      Obj::Instance(instance) => {
        if let Some(class) = self.slots[r.index()].class {
          self.gray_obj(class);
        }
        for &v in &instance.fields {
          self.gray_value(v);
        }
      }
      Obj::Module(module) => {
        for &v in &module.vars {
          self.gray_value(v);
        }
      }
      Obj::Fiber(fiber) => {
        for frame in &fiber.frames {
          self.gray_obj(frame.closure);
        }
        for &v in &fiber.stack {
          self.gray_value(v);
        }
        for &upvalue in &fiber.open_upvalues {
          self.gray_obj(upvalue);
        }
        if let Some(caller) = fiber.caller {
          self.gray_obj(caller);
        }
        self.gray_value(fiber.error);
      }
    }

    self.slots[r.index()].obj = obj;
  }

  /// Walk the all-objects chain: unlink and free unmarked slots, clear the
  /// mark on survivors.
  fn sweep(&mut self) {
    let mut prev: Option<ObjRef> = None;
    let mut cur = self.head;
    while let Some(r) = cur {
      let next = self.slots[r.index()].next;
      if self.slots[r.index()].marked {
        self.slots[r.index()].marked = false;
        prev = Some(r);
      } else {
        match prev {
          None => self.head = next,
          Some(p) => self.slots[p.index()].next = next,
        }
        self.slots[r.index()] = Slot {
          marked: false,
          class: None,
          next: None,
          obj: Obj::Free,
        };
        self.free.push(r.0);
      }
      cur = next;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::object::{ObjClosure, ObjFn, ObjList, ObjMap, ObjModule, ObjString};

  fn heap() -> Heap {
    Heap::new(HeapConfig::default())
  }

  fn alloc_str(heap: &mut Heap, s: &str) -> ObjRef {
    heap.alloc(Obj::Str(ObjString::new(s.as_bytes().to_vec())), None)
  }

  #[test]
  fn collect_frees_unreachable() {
    let mut heap = heap();
    let keep = alloc_str(&mut heap, "keep");
    let _drop1 = alloc_str(&mut heap, "drop1");
    let _drop2 = alloc_str(&mut heap, "drop2");

    let list = heap.alloc(Obj::List(ObjList::new()), None);
    heap.list_mut(list).elements.push(Value::Obj(keep));
    heap.push_temp_root(list);

    heap.collect(&Roots::default());

    assert!(matches!(heap.obj(keep), Obj::Str(_)));
    assert!(matches!(heap.obj(list), Obj::List(_)));
    assert!(matches!(heap.obj(_drop1), Obj::Free));
    assert!(matches!(heap.obj(_drop2), Obj::Free));
  }

  #[test]
  fn closure_keeps_function_alive() {
    let mut heap = heap();
    let module = heap.alloc(Obj::Module(ObjModule::new(None)), None);
    let function = heap.alloc(Obj::Fn(ObjFn::new(module, 1, "f")), None);
    let closure = heap.alloc(Obj::Closure(ObjClosure::new(function)), None);
    heap.push_temp_root(closure);

    heap.collect(&Roots::default());

    assert!(matches!(heap.obj(function), Obj::Fn(_)));
    // the module is unreferenced by the trace and gets reaped
    assert!(matches!(heap.obj(module), Obj::Free));
  }

  #[test]
  fn threshold_respects_floor_and_growth() {
    let mut heap = heap();
    for i in 0..100 {
      let r = alloc_str(&mut heap, &format!("string number {i}"));
      if i % 2 == 0 {
        heap.push_temp_root(r);
      }
    }
    heap.collect(&Roots::default());
    assert!(heap.next_gc_threshold() >= heap.allocated_bytes());
    assert!(heap.next_gc_threshold() >= 1 << 16);
    assert_eq!(heap.collections(), 1);
  }

  #[test]
  fn temp_root_pops_unprotect() {
    let mut heap = heap();
    let r = alloc_str(&mut heap, "transient");
    heap.push_temp_root(r);
    heap.collect(&Roots::default());
    assert!(matches!(heap.obj(r), Obj::Str(_)));

    heap.pop_temp_root();
    heap.collect(&Roots::default());
    assert!(matches!(heap.obj(r), Obj::Free));
  }

  #[test]
  fn freed_slots_are_reused() {
    let mut heap = heap();
    let a = alloc_str(&mut heap, "a");
    heap.collect(&Roots::default());
    let b = alloc_str(&mut heap, "b");
    assert_eq!(a, b);
  }

  #[test]
  fn map_roundtrip_through_heap() {
    let mut heap = heap();
    let map = heap.alloc(Obj::Map(ObjMap::new()), None);
    let key = alloc_str(&mut heap, "key");
    heap.map_set(map, Value::Obj(key), Value::Num(7.0)).unwrap();

    // a different string object with the same content finds the entry
    let key2 = alloc_str(&mut heap, "key");
    assert_eq!(heap.map_get(map, Value::Obj(key2)), Some(Value::Num(7.0)));

    // unhashable key kinds are rejected
    let list = heap.alloc(Obj::List(ObjList::new()), None);
    assert_eq!(heap.map_set(map, Value::Obj(list), Value::Null), None);
  }
}

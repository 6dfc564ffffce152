//! Bootstrap of the core module and the native method catalog.
//!
//! Start-up order matters: `object`, `class` and `objectMeta` are built
//! natively (closing the meta-class cycle by hand), the embedded core script
//! then defines the remaining builtin classes in the language itself, and
//! finally the natives below are bound onto them.

use std::time::{SystemTime, UNIX_EPOCH};

use paste::paste;

use crate::heap::ObjRef;
use crate::object::string::{self, utf8_decode, utf8_decode_len, utf8_encode};
use crate::object::{Method, Obj};
use crate::value::{num_to_string, Value};
use crate::vm::Vm;

const CORE_SCRIPT: &str = include_str!("builtins/core.sz");

pub(crate) fn install(vm: &mut Vm) {
  let core = vm.alloc_module(None);
  vm.heap.push_temp_root(core);
  vm.heap.map_set(vm.modules, Value::Null, Value::Obj(core));
  vm.heap.pop_temp_root();

  // the native root: object, class, and the meta cycle
  let object = define_class(vm, core, "object");
  bind_prim(vm, object, "!", prim_object_not);
  bind_prim(vm, object, "==(_)", prim_object_eq);
  bind_prim(vm, object, "!=(_)", prim_object_ne);
  bind_prim(vm, object, "is(_)", prim_object_is);
  bind_prim(vm, object, "toString", prim_object_to_string);
  bind_prim(vm, object, "type", prim_object_type);

  let class_of_class = define_class(vm, core, "class");
  vm.bind_superclass(class_of_class, object);
  bind_prim(vm, class_of_class, "name", prim_class_name);
  bind_prim(vm, class_of_class, "supertype", prim_class_supertype);
  bind_prim(vm, class_of_class, "toString", prim_class_name);

  let object_meta = define_class(vm, core, "objectMeta");
  vm.bind_superclass(object_meta, class_of_class);
  bind_prim(vm, object_meta, "same(_,_)", prim_object_meta_same);

  vm.heap.set_obj_class(object, object_meta);
  vm.heap.set_obj_class(object_meta, class_of_class);
  // the meta cycle ends at the class of classes, which is its own class
  vm.heap.set_obj_class(class_of_class, class_of_class);

  vm.core.object = Some(object);
  vm.core.class_of_class = Some(class_of_class);

  vm
    .execute_module(Value::Null, CORE_SCRIPT)
    .expect("the embedded core module must run");

  vm.core.bool_ = Some(core_class(vm, core, "Bool"));
  vm.core.null = Some(core_class(vm, core, "Null"));
  vm.core.num = Some(core_class(vm, core, "Num"));
  vm.core.function = Some(core_class(vm, core, "Fn"));
  vm.core.thread = Some(core_class(vm, core, "Thread"));
  vm.core.string = Some(core_class(vm, core, "String"));
  vm.core.list = Some(core_class(vm, core, "List"));
  vm.core.map = Some(core_class(vm, core, "Map"));
  vm.core.range = Some(core_class(vm, core, "Range"));
  vm.core.system = Some(core_class(vm, core, "System"));

  let bool_ = vm.core.bool_.unwrap();
  bind_prim(vm, bool_, "toString", prim_bool_to_string);
  bind_prim(vm, bool_, "!", prim_bool_not);

  let null = vm.core.null.unwrap();
  bind_prim(vm, null, "!", prim_null_not);
  bind_prim(vm, null, "toString", prim_null_to_string);

  let thread = vm.core.thread.unwrap();
  bind_static(vm, thread, "new(_)", prim_thread_new);
  bind_static(vm, thread, "abort(_)", prim_thread_abort);
  bind_static(vm, thread, "current", prim_thread_current);
  bind_static(vm, thread, "suspend()", prim_thread_suspend);
  bind_static(vm, thread, "yield()", prim_thread_yield);
  bind_static(vm, thread, "yield(_)", prim_thread_yield_arg);
  bind_prim(vm, thread, "call()", prim_thread_call);
  bind_prim(vm, thread, "call(_)", prim_thread_call_arg);
  bind_prim(vm, thread, "isDone", prim_thread_is_done);

  let function = vm.core.function.unwrap();
  bind_static(vm, function, "new(_)", prim_fn_new);
  // closures answer every `call` arity as a frame push, not a native
  for arity in 0..=crate::compile::MAX_ARGS {
    let sig = crate::compile::Signature::new(crate::compile::SigKind::Method, "call", arity);
    let symbol = vm.method_names.ensure(&sig.canonical());
    vm.bind_method(function, symbol, Method::FnCall);
  }

  install_num(vm);
  install_string(vm);
  install_list(vm);
  install_map(vm);
  install_range(vm);

  let system = vm.core.system.unwrap();
  bind_static(vm, system, "writeString_(_)", prim_system_write_string);
  bind_static(vm, system, "clock", prim_system_clock);
  bind_static(vm, system, "gc()", prim_system_gc);
  bind_static(vm, system, "importModule_(_)", prim_system_import_module);
  bind_static(vm, system, "getModuleVariable_(_,_)", prim_system_get_module_variable);

  patch_bootstrap_classes(vm);
}

fn install_num(vm: &mut Vm) {
  let num = vm.core.num.unwrap();
  bind_static(vm, num, "fromString(_)", prim_num_from_string);
  bind_static(vm, num, "pi", prim_num_pi);

  bind_prim(vm, num, "+(_)", prim_num_plus);
  bind_prim(vm, num, "-(_)", prim_num_minus);
  bind_prim(vm, num, "*(_)", prim_num_mul);
  bind_prim(vm, num, "/(_)", prim_num_div);
  bind_prim(vm, num, ">(_)", prim_num_gt);
  bind_prim(vm, num, ">=(_)", prim_num_ge);
  bind_prim(vm, num, "<(_)", prim_num_lt);
  bind_prim(vm, num, "<=(_)", prim_num_le);
  bind_prim(vm, num, "&(_)", prim_num_bit_and);
  bind_prim(vm, num, "|(_)", prim_num_bit_or);
  bind_prim(vm, num, ">>(_)", prim_num_shift_right);
  bind_prim(vm, num, "<<(_)", prim_num_shift_left);
  bind_prim(vm, num, "abs", prim_num_abs);
  bind_prim(vm, num, "acos", prim_num_acos);
  bind_prim(vm, num, "asin", prim_num_asin);
  bind_prim(vm, num, "atan", prim_num_atan);
  bind_prim(vm, num, "ceil", prim_num_ceil);
  bind_prim(vm, num, "cos", prim_num_cos);
  bind_prim(vm, num, "floor", prim_num_floor);
  bind_prim(vm, num, "sin", prim_num_sin);
  bind_prim(vm, num, "sqrt", prim_num_sqrt);
  bind_prim(vm, num, "tan", prim_num_tan);
  bind_prim(vm, num, "-", prim_num_negate);
  bind_prim(vm, num, "%(_)", prim_num_mod);
  bind_prim(vm, num, "~", prim_num_bit_not);
  bind_prim(vm, num, "..(_)", prim_num_range);
  bind_prim(vm, num, "atan(_)", prim_num_atan2);
  bind_prim(vm, num, "fraction", prim_num_fraction);
  bind_prim(vm, num, "truncate", prim_num_truncate);
  bind_prim(vm, num, "isInfinity", prim_num_is_infinity);
  bind_prim(vm, num, "isInteger", prim_num_is_integer);
  bind_prim(vm, num, "isNan", prim_num_is_nan);
  bind_prim(vm, num, "toString", prim_num_to_string);
  bind_prim(vm, num, "==(_)", prim_num_eq);
  bind_prim(vm, num, "!=(_)", prim_num_ne);
}

fn install_string(vm: &mut Vm) {
  let string = vm.core.string.unwrap();
  bind_static(vm, string, "fromCodePoint(_)", prim_string_from_code_point);

  bind_prim(vm, string, "+(_)", prim_string_plus);
  bind_prim(vm, string, "[_]", prim_string_subscript);
  bind_prim(vm, string, "byteAt_(_)", prim_string_byte_at);
  bind_prim(vm, string, "byteCount_", prim_string_byte_count);
  bind_prim(vm, string, "count", prim_string_byte_count);
  bind_prim(vm, string, "codePointAt_(_)", prim_string_code_point_at);
  bind_prim(vm, string, "contains(_)", prim_string_contains);
  bind_prim(vm, string, "startsWith(_)", prim_string_starts_with);
  bind_prim(vm, string, "endsWith(_)", prim_string_ends_with);
  bind_prim(vm, string, "indexOf(_)", prim_string_index_of);
  bind_prim(vm, string, "iterate(_)", prim_string_iterate);
  bind_prim(vm, string, "iterateByte_(_)", prim_string_iterate_byte);
  bind_prim(vm, string, "iteratorValue(_)", prim_string_iterator_value);
  bind_prim(vm, string, "toString", prim_string_to_string);
}

fn install_list(vm: &mut Vm) {
  let list = vm.core.list.unwrap();
  bind_static(vm, list, "new()", prim_list_new);

  bind_prim(vm, list, "[_]", prim_list_subscript);
  bind_prim(vm, list, "[_]=(_)", prim_list_subscript_setter);
  bind_prim(vm, list, "add(_)", prim_list_add);
  bind_prim(vm, list, "addCore_(_)", prim_list_add_core);
  bind_prim(vm, list, "clear()", prim_list_clear);
  bind_prim(vm, list, "count", prim_list_count);
  bind_prim(vm, list, "insert(_,_)", prim_list_insert);
  bind_prim(vm, list, "iterate(_)", prim_list_iterate);
  bind_prim(vm, list, "iteratorValue(_)", prim_list_iterator_value);
  bind_prim(vm, list, "removeAt(_)", prim_list_remove_at);
}

fn install_map(vm: &mut Vm) {
  let map = vm.core.map.unwrap();
  bind_static(vm, map, "new()", prim_map_new);

  bind_prim(vm, map, "[_]", prim_map_subscript);
  bind_prim(vm, map, "[_]=(_)", prim_map_subscript_setter);
  bind_prim(vm, map, "addCore_(_,_)", prim_map_add_core);
  bind_prim(vm, map, "clear()", prim_map_clear);
  bind_prim(vm, map, "containsKey(_)", prim_map_contains_key);
  bind_prim(vm, map, "count", prim_map_count);
  bind_prim(vm, map, "remove(_)", prim_map_remove);
  bind_prim(vm, map, "iterate_(_)", prim_map_iterate);
  bind_prim(vm, map, "keyIteratorValue_(_)", prim_map_key_iterator_value);
  bind_prim(vm, map, "valueIteratorValue_(_)", prim_map_value_iterator_value);
}

fn install_range(vm: &mut Vm) {
  let range = vm.core.range.unwrap();
  bind_prim(vm, range, "from", prim_range_from);
  bind_prim(vm, range, "to", prim_range_to);
  bind_prim(vm, range, "min", prim_range_min);
  bind_prim(vm, range, "max", prim_range_max);
  bind_prim(vm, range, "iterate(_)", prim_range_iterate);
  bind_prim(vm, range, "iteratorValue(_)", prim_range_iterator_value);
}

// ---------------------------------------------------------------------------
// binding helpers

fn define_class(vm: &mut Vm, module: ObjRef, name: &str) -> ObjRef {
  let class = vm.new_raw_class(name, 0);
  vm.heap.push_temp_root(class);
  vm.define_module_var(module, name, Value::Obj(class));
  vm.heap.pop_temp_root();
  class
}

fn core_class(vm: &Vm, module: ObjRef, name: &str) -> ObjRef {
  let m = vm.heap.module(module);
  let index = m.var_index(name).expect("the core module defines this class");
  match m.vars[index] {
    Value::Obj(class) => class,
    _ => unreachable!("core module variable {name} is not a class"),
  }
}

fn bind_prim(vm: &mut Vm, class: ObjRef, name: &str, prim: crate::object::class::PrimitiveFn) {
  let symbol = vm.method_names.ensure(name);
  vm.bind_method(class, symbol, Method::Primitive(prim));
}

/// Static methods live on the meta-class.
fn bind_static(vm: &mut Vm, class: ObjRef, name: &str, prim: crate::object::class::PrimitiveFn) {
  let meta = vm
    .heap
    .class_of_obj(class)
    .expect("a class always has a meta-class");
  bind_prim(vm, meta, name, prim);
}

/// Objects allocated before their class existed get it stamped in now.
fn patch_bootstrap_classes(vm: &mut Vm) {
  for r in vm.heap.all_objects() {
    if vm.heap.class_of_obj(r).is_some() {
      continue;
    }
    let class = match vm.heap.obj(r) {
      Obj::Str(_) => vm.core.string,
      Obj::List(_) => vm.core.list,
      Obj::Map(_) => vm.core.map,
      Obj::Range(_) => vm.core.range,
      Obj::Closure(_) => vm.core.function,
      Obj::Fiber(_) => vm.core.thread,
      _ => None,
    };
    if let Some(class) = class {
      vm.heap.set_obj_class(r, class);
    }
  }
}

// ---------------------------------------------------------------------------
// validation

fn validate_num(vm: &mut Vm, value: Value) -> Option<f64> {
  match value {
    Value::Num(n) => Some(n),
    _ => {
      vm.abort_fiber("argument must be a number");
      None
    }
  }
}

fn validate_int(vm: &mut Vm, value: Value) -> Option<f64> {
  let n = validate_num(vm, value)?;
  if n.trunc() != n {
    vm.abort_fiber("argument must be an integer");
    return None;
  }
  Some(n)
}

/// An integer in `[0, length)`, with negative values indexing from the end.
fn validate_index(vm: &mut Vm, value: Value, length: usize) -> Option<usize> {
  let n = validate_int(vm, value)?;
  index_in_bounds(vm, n, length)
}

fn index_in_bounds(vm: &mut Vm, mut index: f64, length: usize) -> Option<usize> {
  if index < 0.0 {
    index += length as f64;
  }
  if index >= 0.0 && index < length as f64 {
    return Some(index as usize);
  }
  vm.abort_fiber("index out of bounds");
  None
}

fn validate_string(vm: &mut Vm, value: Value) -> Option<ObjRef> {
  match value.as_obj() {
    Some(r) if matches!(vm.heap.obj(r), Obj::Str(_)) => Some(r),
    _ => {
      vm.abort_fiber("argument must be a string");
      None
    }
  }
}

fn validate_fun(vm: &mut Vm, value: Value) -> Option<ObjRef> {
  match value.as_obj() {
    Some(r) if matches!(vm.heap.obj(r), Obj::Closure(_)) => Some(r),
    _ => {
      vm.abort_fiber("argument must be a function");
      None
    }
  }
}

// ---------------------------------------------------------------------------
// object / class

fn prim_object_not(_vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = Value::False;
  true
}

fn prim_object_eq(vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = Value::bool(vm.heap.values_equal(args[0], args[1]));
  true
}

fn prim_object_ne(vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = Value::bool(!vm.heap.values_equal(args[0], args[1]));
  true
}

/// `value is Class`: walk the receiver's class chain upwards.
fn prim_object_is(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(base) = args[1]
    .as_obj()
    .filter(|&r| matches!(vm.heap.obj(r), Obj::Class(_)))
  else {
    return vm.abort_fiber("the right operand of 'is' must be a class");
  };

  let mut class = Some(vm.class_of(args[0]));
  while let Some(c) = class {
    if c == base {
      args[0] = Value::True;
      return true;
    }
    class = vm.heap.class(c).superclass;
  }
  args[0] = Value::False;
  true
}

fn prim_object_to_string(vm: &mut Vm, args: &mut [Value]) -> bool {
  let class = vm.class_of(args[0]);
  args[0] = Value::Obj(vm.heap.class(class).name);
  true
}

fn prim_object_type(vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = Value::Obj(vm.class_of(args[0]));
  true
}

fn prim_class_name(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(class) = args[0].as_obj() else {
    return vm.abort_fiber("receiver must be a class");
  };
  args[0] = Value::Obj(vm.heap.class(class).name);
  true
}

fn prim_class_supertype(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(class) = args[0].as_obj() else {
    return vm.abort_fiber("receiver must be a class");
  };
  args[0] = match vm.heap.class(class).superclass {
    Some(superclass) => Value::Obj(superclass),
    None => Value::Null,
  };
  true
}

fn prim_object_meta_same(vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = Value::bool(vm.heap.values_equal(args[1], args[2]));
  true
}

// ---------------------------------------------------------------------------
// Bool / Null

fn prim_bool_to_string(vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = vm.string_value(if args[0] == Value::True { "true" } else { "false" });
  true
}

fn prim_bool_not(_vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = Value::bool(args[0] == Value::False);
  true
}

fn prim_null_not(_vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = Value::True;
  true
}

fn prim_null_to_string(vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = vm.string_value("null");
  true
}

// ---------------------------------------------------------------------------
// Thread

fn prim_thread_new(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(closure) = validate_fun(vm, args[1]) else {
    return false;
  };
  let fiber = vm.alloc_fiber(closure);
  // slot 0 plays the receiver, so the stack stays balanced
  vm.heap.fiber_mut(fiber).push(Value::Null);
  args[0] = Value::Obj(fiber);
  true
}

/// Aborting with null is a no-op; anything else kills the fiber.
fn prim_thread_abort(vm: &mut Vm, args: &mut [Value]) -> bool {
  if let Some(fiber) = vm.current_fiber {
    vm.heap.fiber_mut(fiber).error = args[1];
  }
  args[0] = Value::Null;
  args[1].is_null()
}

fn prim_thread_current(vm: &mut Vm, args: &mut [Value]) -> bool {
  let fiber = vm.current_fiber.expect("a fiber is running");
  args[0] = Value::Obj(fiber);
  true
}

fn prim_thread_suspend(vm: &mut Vm, _args: &mut [Value]) -> bool {
  // with no current fiber, the dispatch loop finishes successfully
  vm.current_fiber = None;
  false
}

fn prim_thread_yield(vm: &mut Vm, _args: &mut [Value]) -> bool {
  let current = vm.current_fiber.expect("a fiber is running");
  vm.current_fiber = vm.heap.fiber(current).caller;
  vm.heap.fiber_mut(current).caller = None;

  if let Some(caller) = vm.current_fiber {
    // the caller's `call` comes back with null
    vm.heap.fiber_mut(caller).set_top(Value::Null);
  }
  false
}

fn prim_thread_yield_arg(vm: &mut Vm, args: &mut [Value]) -> bool {
  let current = vm.current_fiber.expect("a fiber is running");
  vm.current_fiber = vm.heap.fiber(current).caller;
  vm.heap.fiber_mut(current).caller = None;

  if let Some(caller) = vm.current_fiber {
    vm.heap.fiber_mut(caller).set_top(args[1]);
    // drop the argument slot; what remains receives the resume value
    vm.heap.fiber_mut(current).pop();
  }
  false
}

fn switch_to_fiber(vm: &mut Vm, next: ObjRef, arg: Option<Value>) -> bool {
  if vm.heap.fiber(next).caller.is_some() {
    return vm.abort_fiber("the fiber has already been called");
  }
  if vm.heap.fiber(next).frames.is_empty() {
    return vm.abort_fiber("a finished fiber cannot be called");
  }

  vm.heap.fiber_mut(next).caller = vm.current_fiber;
  if arg.is_some() {
    // the argument slot is consumed; the slot under it takes the result of
    // the call when this fiber resumes
    if let Some(current) = vm.current_fiber {
      vm.heap.fiber_mut(current).pop();
    }
  }
  // what the called fiber sees as the result of its yield
  vm.heap.fiber_mut(next).set_top(arg.unwrap_or(Value::Null));
  vm.current_fiber = Some(next);
  false
}

fn prim_thread_call(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(fiber) = args[0].as_obj() else {
    return vm.abort_fiber("receiver must be a fiber");
  };
  switch_to_fiber(vm, fiber, None)
}

fn prim_thread_call_arg(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(fiber) = args[0].as_obj() else {
    return vm.abort_fiber("receiver must be a fiber");
  };
  switch_to_fiber(vm, fiber, Some(args[1]))
}

fn prim_thread_is_done(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(fiber) = args[0].as_obj() else {
    return vm.abort_fiber("receiver must be a fiber");
  };
  args[0] = Value::bool(vm.heap.fiber(fiber).is_done());
  true
}

// ---------------------------------------------------------------------------
// Fn

fn prim_fn_new(vm: &mut Vm, args: &mut [Value]) -> bool {
  if validate_fun(vm, args[1]).is_none() {
    return false;
  }
  args[0] = args[1];
  true
}

// ---------------------------------------------------------------------------
// Num

macro_rules! num_infix {
  ($name:ident, $op:tt, num) => {
    paste! {
      fn [<prim_num_ $name>](vm: &mut Vm, args: &mut [Value]) -> bool {
        let Some(b) = validate_num(vm, args[1]) else { return false };
        let a = args[0].as_num().unwrap_or_default();
        args[0] = Value::Num(a $op b);
        true
      }
    }
  };
  ($name:ident, $op:tt, bool) => {
    paste! {
      fn [<prim_num_ $name>](vm: &mut Vm, args: &mut [Value]) -> bool {
        let Some(b) = validate_num(vm, args[1]) else { return false };
        let a = args[0].as_num().unwrap_or_default();
        args[0] = Value::bool(a $op b);
        true
      }
    }
  };
}

num_infix!(plus, +, num);
num_infix!(minus, -, num);
num_infix!(mul, *, num);
num_infix!(div, /, num);
num_infix!(gt, >, bool);
num_infix!(ge, >=, bool);
num_infix!(lt, <, bool);
num_infix!(le, <=, bool);

macro_rules! num_bits {
  ($name:ident, |$a:ident, $b:ident| $body:expr) => {
    paste! {
      fn [<prim_num_ $name>](vm: &mut Vm, args: &mut [Value]) -> bool {
        let Some(b) = validate_num(vm, args[1]) else { return false };
        let $a = args[0].as_num().unwrap_or_default() as i64 as u32;
        let $b = b as i64 as u32;
        args[0] = Value::Num($body as f64);
        true
      }
    }
  };
}

num_bits!(bit_and, |a, b| a & b);
num_bits!(bit_or, |a, b| a | b);
num_bits!(shift_right, |a, b| a.wrapping_shr(b));
num_bits!(shift_left, |a, b| a.wrapping_shl(b));

macro_rules! num_math {
  ($($name:ident),*) => {
    $(
      paste! {
        fn [<prim_num_ $name>](_vm: &mut Vm, args: &mut [Value]) -> bool {
          let n = args[0].as_num().unwrap_or_default();
          args[0] = Value::Num(n.$name());
          true
        }
      }
    )*
  };
}

num_math!(abs, acos, asin, atan, ceil, cos, floor, sin, sqrt, tan);

fn prim_num_negate(_vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = Value::Num(-args[0].as_num().unwrap_or_default());
  true
}

fn prim_num_mod(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(b) = validate_num(vm, args[1]) else {
    return false;
  };
  args[0] = Value::Num(args[0].as_num().unwrap_or_default() % b);
  true
}

fn prim_num_bit_not(_vm: &mut Vm, args: &mut [Value]) -> bool {
  let n = args[0].as_num().unwrap_or_default() as i64 as u32;
  args[0] = Value::Num(!n as f64);
  true
}

fn prim_num_range(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(to) = validate_num(vm, args[1]) else {
    return false;
  };
  let from = args[0].as_num().unwrap_or_default();
  args[0] = Value::Obj(vm.alloc_range(from, to));
  true
}

fn prim_num_atan2(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(b) = validate_num(vm, args[1]) else {
    return false;
  };
  args[0] = Value::Num(args[0].as_num().unwrap_or_default().atan2(b));
  true
}

fn prim_num_fraction(_vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = Value::Num(args[0].as_num().unwrap_or_default().fract());
  true
}

/// The integer part, truncating toward zero.
fn prim_num_truncate(_vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = Value::Num(args[0].as_num().unwrap_or_default().trunc());
  true
}

fn prim_num_is_infinity(_vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = Value::bool(args[0].as_num().unwrap_or_default().is_infinite());
  true
}

fn prim_num_is_integer(_vm: &mut Vm, args: &mut [Value]) -> bool {
  let n = args[0].as_num().unwrap_or_default();
  args[0] = Value::bool(n.is_finite() && n.trunc() == n);
  true
}

fn prim_num_is_nan(_vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = Value::bool(args[0].as_num().unwrap_or_default().is_nan());
  true
}

fn prim_num_to_string(vm: &mut Vm, args: &mut [Value]) -> bool {
  let n = args[0].as_num().unwrap_or_default();
  args[0] = vm.string_value(&num_to_string(n));
  true
}

fn prim_num_eq(_vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = match (args[0].as_num(), args[1].as_num()) {
    (Some(a), Some(b)) => Value::bool(a == b),
    _ => Value::False,
  };
  true
}

fn prim_num_ne(_vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = match (args[0].as_num(), args[1].as_num()) {
    (Some(a), Some(b)) => Value::bool(a != b),
    _ => Value::True,
  };
  true
}

fn prim_num_pi(_vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = Value::Num(std::f64::consts::PI);
  true
}

fn prim_num_from_string(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(s) = validate_string(vm, args[1]) else {
    return false;
  };
  let text = vm.heap.string(s).to_str_lossy().trim().to_string();
  if text.is_empty() {
    args[0] = Value::Null;
    return true;
  }
  match text.parse::<f64>() {
    Ok(n) if n.is_finite() => {
      args[0] = Value::Num(n);
      true
    }
    Ok(_) => vm.abort_fiber("number literal is too large"),
    Err(_) => {
      args[0] = Value::Null;
      true
    }
  }
}

// ---------------------------------------------------------------------------
// String

fn prim_string_from_code_point(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(n) = validate_int(vm, args[1]) else {
    return false;
  };
  let code = n as i64;
  if code < 0 {
    return vm.abort_fiber("a code point cannot be negative");
  }
  if code > 0x10ffff {
    return vm.abort_fiber("a code point must be between 0 and 0x10ffff");
  }
  let mut bytes = Vec::new();
  utf8_encode(code, &mut bytes);
  args[0] = Value::Obj(vm.alloc_string(bytes));
  true
}

fn prim_string_plus(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(other) = validate_string(vm, args[1]) else {
    return false;
  };
  let receiver = args[0].as_obj().expect("receiver is a string");
  let mut bytes = vm.heap.string(receiver).as_bytes().to_vec();
  bytes.extend_from_slice(vm.heap.string(other).as_bytes());
  args[0] = Value::Obj(vm.alloc_string(bytes));
  true
}

/// One whole code point starting at byte `index`; malformed bytes come back
/// as a single raw byte.
fn string_code_point_at(vm: &mut Vm, s: ObjRef, index: usize) -> Value {
  let bytes = vm.heap.string(s).as_bytes();
  let piece = match utf8_decode(&bytes[index..]) {
    Some(code) => {
      let mut out = Vec::new();
      utf8_encode(code as i64, &mut out);
      out
    }
    None => vec![bytes[index]],
  };
  Value::Obj(vm.alloc_string(piece))
}

/// Start, count and direction of a range over a sequence of `length`
/// elements; both ends support negative indexing.
fn calculate_range(
  vm: &mut Vm,
  range: ObjRef,
  length: usize,
) -> Option<(usize, usize, i64)> {
  let r = *vm.heap.range(range);
  let from = index_in_bounds(vm, r.from, length)?;
  let to = index_in_bounds(vm, r.to, length)?;
  let direction = if from < to { 1 } else { -1 };
  let count = from.abs_diff(to) + 1;
  Some((from, count, direction))
}

fn prim_string_subscript(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a string");
  let length = vm.heap.string(receiver).len();

  match args[1] {
    Value::Num(n) => {
      let Some(index) = index_in_bounds(vm, n, length) else {
        return false;
      };
      args[0] = string_code_point_at(vm, receiver, index);
      true
    }
    Value::Obj(r) if matches!(vm.heap.obj(r), Obj::Range(_)) => {
      let Some((start, count, direction)) = calculate_range(vm, r, length) else {
        return false;
      };
      let mut out = Vec::new();
      for i in 0..count {
        let index = (start as i64 + i as i64 * direction) as usize;
        let bytes = vm.heap.string(receiver).as_bytes();
        if let Some(code) = utf8_decode(&bytes[index..]) {
          utf8_encode(code as i64, &mut out);
        }
      }
      args[0] = Value::Obj(vm.alloc_string(out));
      true
    }
    _ => vm.abort_fiber("a string subscript must be a number or a range"),
  }
}

fn prim_string_byte_at(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a string");
  let length = vm.heap.string(receiver).len();
  let Some(index) = validate_index(vm, args[1], length) else {
    return false;
  };
  args[0] = Value::Num(vm.heap.string(receiver).as_bytes()[index] as f64);
  true
}

fn prim_string_byte_count(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a string");
  args[0] = Value::Num(vm.heap.string(receiver).len() as f64);
  true
}

fn prim_string_code_point_at(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a string");
  let length = vm.heap.string(receiver).len();
  let Some(index) = validate_index(vm, args[1], length) else {
    return false;
  };
  let bytes = vm.heap.string(receiver).as_bytes();
  args[0] = match utf8_decode(&bytes[index..]) {
    Some(code) => Value::Num(code as f64),
    None => Value::Num(-1.0),
  };
  true
}

fn prim_string_contains(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(needle) = validate_string(vm, args[1]) else {
    return false;
  };
  let receiver = args[0].as_obj().expect("receiver is a string");
  let found = string::find(
    vm.heap.string(receiver).as_bytes(),
    vm.heap.string(needle).as_bytes(),
  );
  args[0] = Value::bool(found.is_some());
  true
}

fn prim_string_starts_with(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(prefix) = validate_string(vm, args[1]) else {
    return false;
  };
  let receiver = args[0].as_obj().expect("receiver is a string");
  let starts = vm
    .heap
    .string(receiver)
    .as_bytes()
    .starts_with(vm.heap.string(prefix).as_bytes());
  args[0] = Value::bool(starts);
  true
}

fn prim_string_ends_with(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(suffix) = validate_string(vm, args[1]) else {
    return false;
  };
  let receiver = args[0].as_obj().expect("receiver is a string");
  let ends = vm
    .heap
    .string(receiver)
    .as_bytes()
    .ends_with(vm.heap.string(suffix).as_bytes());
  args[0] = Value::bool(ends);
  true
}

fn prim_string_index_of(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(needle) = validate_string(vm, args[1]) else {
    return false;
  };
  let receiver = args[0].as_obj().expect("receiver is a string");
  let found = string::find(
    vm.heap.string(receiver).as_bytes(),
    vm.heap.string(needle).as_bytes(),
  );
  args[0] = Value::Num(found.map(|i| i as f64).unwrap_or(-1.0));
  true
}

/// Step to the next code point boundary; the iterator is a byte offset.
fn prim_string_iterate(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a string");
  let length = vm.heap.string(receiver).len();

  if args[1].is_null() {
    args[0] = if length == 0 {
      Value::False
    } else {
      Value::Num(0.0)
    };
    return true;
  }

  let Some(n) = validate_int(vm, args[1]) else {
    return false;
  };
  if n < 0.0 {
    args[0] = Value::False;
    return true;
  }
  let mut index = n as usize + 1;
  // skip over continuation bytes to the next sequence start
  while index < length {
    let byte = vm.heap.string(receiver).as_bytes()[index];
    if utf8_decode_len(byte) != 0 {
      break;
    }
    index += 1;
  }
  args[0] = if index < length {
    Value::Num(index as f64)
  } else {
    Value::False
  };
  true
}

fn prim_string_iterate_byte(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a string");
  let length = vm.heap.string(receiver).len();

  if args[1].is_null() {
    args[0] = if length == 0 {
      Value::False
    } else {
      Value::Num(0.0)
    };
    return true;
  }
  let Some(n) = validate_int(vm, args[1]) else {
    return false;
  };
  let next = n + 1.0;
  args[0] = if next >= 0.0 && (next as usize) < length {
    Value::Num(next)
  } else {
    Value::False
  };
  true
}

fn prim_string_iterator_value(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a string");
  let length = vm.heap.string(receiver).len();
  let Some(index) = validate_index(vm, args[1], length) else {
    return false;
  };
  args[0] = string_code_point_at(vm, receiver, index);
  true
}

fn prim_string_to_string(_vm: &mut Vm, args: &mut [Value]) -> bool {
  true
}

// ---------------------------------------------------------------------------
// List

fn prim_list_new(vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = Value::Obj(vm.alloc_list(Vec::new()));
  true
}

fn prim_list_subscript(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a list");
  let length = vm.heap.list(receiver).elements.len();

  match args[1] {
    Value::Num(n) => {
      let Some(index) = index_in_bounds(vm, n, length) else {
        return false;
      };
      args[0] = vm.heap.list(receiver).elements[index];
      true
    }
    Value::Obj(r) if matches!(vm.heap.obj(r), Obj::Range(_)) => {
      let Some((start, count, direction)) = calculate_range(vm, r, length) else {
        return false;
      };
      let mut elements = Vec::with_capacity(count);
      for i in 0..count {
        let index = (start as i64 + i as i64 * direction) as usize;
        elements.push(vm.heap.list(receiver).elements[index]);
      }
      args[0] = Value::Obj(vm.alloc_list(elements));
      true
    }
    _ => vm.abort_fiber("a list subscript must be a number or a range"),
  }
}

fn prim_list_subscript_setter(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a list");
  let length = vm.heap.list(receiver).elements.len();
  let Some(index) = validate_index(vm, args[1], length) else {
    return false;
  };
  vm.heap.list_mut(receiver).elements[index] = args[2];
  args[0] = args[2];
  true
}

fn prim_list_add(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a list");
  vm.heap.list_mut(receiver).elements.push(args[1]);
  args[0] = args[1];
  true
}

/// Like `add`, but returns the list itself so literal construction chains.
fn prim_list_add_core(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a list");
  vm.heap.list_mut(receiver).elements.push(args[1]);
  true
}

fn prim_list_clear(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a list");
  vm.heap.list_mut(receiver).elements.clear();
  args[0] = Value::Null;
  true
}

fn prim_list_count(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a list");
  args[0] = Value::Num(vm.heap.list(receiver).elements.len() as f64);
  true
}

fn prim_list_insert(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a list");
  let length = vm.heap.list(receiver).elements.len();
  // one past the end is allowed: appending
  let Some(index) = validate_index(vm, args[1], length + 1) else {
    return false;
  };
  vm.heap.list_mut(receiver).insert(index, args[2]);
  args[0] = args[2];
  true
}

fn prim_list_iterate(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a list");
  let length = vm.heap.list(receiver).elements.len();

  if args[1].is_null() {
    args[0] = if length == 0 {
      Value::False
    } else {
      Value::Num(0.0)
    };
    return true;
  }
  let Some(n) = validate_int(vm, args[1]) else {
    return false;
  };
  args[0] = if n < 0.0 || n >= length as f64 - 1.0 {
    Value::False
  } else {
    Value::Num(n + 1.0)
  };
  true
}

fn prim_list_iterator_value(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a list");
  let length = vm.heap.list(receiver).elements.len();
  let Some(index) = validate_index(vm, args[1], length) else {
    return false;
  };
  args[0] = vm.heap.list(receiver).elements[index];
  true
}

fn prim_list_remove_at(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a list");
  let length = vm.heap.list(receiver).elements.len();
  let Some(index) = validate_index(vm, args[1], length) else {
    return false;
  };
  args[0] = vm.heap.list_mut(receiver).remove(index);
  true
}

// ---------------------------------------------------------------------------
// Map

fn prim_map_new(vm: &mut Vm, args: &mut [Value]) -> bool {
  args[0] = Value::Obj(vm.alloc_map());
  true
}

fn prim_map_subscript(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a map");
  match vm.heap.map_get(receiver, args[1]) {
    Some(Value::Undefined) => {
      args[0] = Value::Null;
      true
    }
    Some(value) => {
      args[0] = value;
      true
    }
    None => vm.abort_fiber("map keys must be strings, ranges, classes, numbers, bools or null"),
  }
}

fn prim_map_subscript_setter(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a map");
  if vm.heap.map_set(receiver, args[1], args[2]).is_none() {
    return vm.abort_fiber("map keys must be strings, ranges, classes, numbers, bools or null");
  }
  args[0] = args[2];
  true
}

/// Like `[_]=(_)`, but returns the map itself so literal construction chains.
fn prim_map_add_core(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a map");
  if vm.heap.map_set(receiver, args[1], args[2]).is_none() {
    return vm.abort_fiber("map keys must be strings, ranges, classes, numbers, bools or null");
  }
  true
}

fn prim_map_clear(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a map");
  vm.heap.map_obj_mut(receiver).clear();
  args[0] = Value::Null;
  true
}

fn prim_map_contains_key(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a map");
  match vm.heap.map_contains(receiver, args[1]) {
    Some(contains) => {
      args[0] = Value::bool(contains);
      true
    }
    None => vm.abort_fiber("map keys must be strings, ranges, classes, numbers, bools or null"),
  }
}

fn prim_map_count(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a map");
  args[0] = Value::Num(vm.heap.map_obj(receiver).count() as f64);
  true
}

fn prim_map_remove(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a map");
  match vm.heap.map_remove(receiver, args[1]) {
    Some(removed) => {
      args[0] = removed;
      true
    }
    None => vm.abort_fiber("map keys must be strings, ranges, classes, numbers, bools or null"),
  }
}

/// Iterates entry slots; the iterator value is a slot index.
fn prim_map_iterate(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a map");
  let start = if args[1].is_null() {
    0
  } else {
    let Some(n) = validate_int(vm, args[1]) else {
      return false;
    };
    if n < 0.0 {
      args[0] = Value::False;
      return true;
    }
    n as usize + 1
  };
  args[0] = match vm.heap.map_obj(receiver).next_live_slot(start) {
    Some(slot) => Value::Num(slot as f64),
    None => Value::False,
  };
  true
}

fn prim_map_key_iterator_value(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a map");
  let capacity = vm.heap.map_obj(receiver).capacity();
  let Some(n) = validate_index(vm, args[1], capacity) else {
    return false;
  };
  match vm.heap.map_obj(receiver).entry_at(n) {
    Some(entry) if !entry.key.is_undefined() => {
      args[0] = entry.key;
      true
    }
    _ => vm.abort_fiber("invalid map iterator"),
  }
}

fn prim_map_value_iterator_value(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a map");
  let capacity = vm.heap.map_obj(receiver).capacity();
  let Some(n) = validate_index(vm, args[1], capacity) else {
    return false;
  };
  match vm.heap.map_obj(receiver).entry_at(n) {
    Some(entry) if !entry.key.is_undefined() => {
      args[0] = entry.value;
      true
    }
    _ => vm.abort_fiber("invalid map iterator"),
  }
}

// ---------------------------------------------------------------------------
// Range

fn prim_range_from(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a range");
  args[0] = Value::Num(vm.heap.range(receiver).from);
  true
}

fn prim_range_to(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a range");
  args[0] = Value::Num(vm.heap.range(receiver).to);
  true
}

fn prim_range_min(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a range");
  let r = vm.heap.range(receiver);
  args[0] = Value::Num(r.from.min(r.to));
  true
}

fn prim_range_max(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a range");
  let r = vm.heap.range(receiver);
  args[0] = Value::Num(r.from.max(r.to));
  true
}

/// Both endpoints are included; iteration runs toward `to`.
fn prim_range_iterate(vm: &mut Vm, args: &mut [Value]) -> bool {
  let receiver = args[0].as_obj().expect("receiver is a range");
  let r = *vm.heap.range(receiver);

  if args[1].is_null() {
    args[0] = Value::Num(r.from);
    return true;
  }
  let Some(n) = validate_num(vm, args[1]) else {
    return false;
  };
  let next = if r.from < r.to { n + 1.0 } else { n - 1.0 };
  let past_end = if r.from < r.to { next > r.to } else { next < r.to };
  args[0] = if past_end { Value::False } else { Value::Num(next) };
  true
}

fn prim_range_iterator_value(vm: &mut Vm, args: &mut [Value]) -> bool {
  if validate_num(vm, args[1]).is_none() {
    return false;
  }
  args[0] = args[1];
  true
}

// ---------------------------------------------------------------------------
// System

fn prim_system_write_string(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(s) = validate_string(vm, args[1]) else {
    return false;
  };
  let text = vm.heap.string(s).to_str_lossy().into_owned();
  vm.write_output(&text);
  args[0] = args[1];
  true
}

fn prim_system_clock(_vm: &mut Vm, args: &mut [Value]) -> bool {
  let seconds = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs_f64())
    .unwrap_or_default();
  args[0] = Value::Num(seconds);
  true
}

fn prim_system_gc(vm: &mut Vm, args: &mut [Value]) -> bool {
  vm.collect_garbage();
  args[0] = Value::Null;
  true
}

/// Load, compile and run a module on its own fiber; control transfers to it
/// and returns here when its body finishes.
fn prim_system_import_module(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(name_ref) = validate_string(vm, args[1]) else {
    return false;
  };
  let name_value = args[1];
  if vm.get_module(name_value).is_some() {
    args[0] = Value::Null;
    return true;
  }

  let name = vm.heap.string(name_ref).to_str_lossy().into_owned();
  let source = match vm.loader.load(&name) {
    Ok(source) => source,
    Err(report) => {
      vm.fatal = Some(report);
      return false;
    }
  };

  match vm.load_module(name_value, &source) {
    Ok(fiber) => {
      // consume the name argument: the slot under it takes the module
      // fiber's result when this fiber resumes
      if let Some(current) = vm.current_fiber {
        vm.heap.fiber_mut(current).pop();
      }
      vm.heap.fiber_mut(fiber).caller = vm.current_fiber;
      vm.current_fiber = Some(fiber);
      false
    }
    Err(report) => {
      vm.fatal = Some(report);
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::value::Value;
  use crate::vm::{FileLoader, Vm};

  fn vm() -> Vm {
    Vm::new(Box::new(Vec::<u8>::new()), Box::new(FileLoader { root: None }))
  }

  #[test]
  fn meta_cycle_closes_at_the_class_of_classes() {
    let vm = vm();
    let class_of_class = vm.core.class_of_class.unwrap();
    assert_eq!(vm.heap.class_of_obj(class_of_class), Some(class_of_class));

    let object = vm.core.object.unwrap();
    let object_meta = vm.heap.class_of_obj(object).unwrap();
    assert_eq!(vm.heap.class_of_obj(object_meta), Some(class_of_class));
  }

  #[test]
  fn every_value_kind_has_a_dispatch_class() {
    let mut vm = vm();
    assert_eq!(vm.class_of(Value::Null), vm.core.null.unwrap());
    assert_eq!(vm.class_of(Value::True), vm.core.bool_.unwrap());
    assert_eq!(vm.class_of(Value::Num(1.0)), vm.core.num.unwrap());

    let s = vm.string_value("x");
    assert_eq!(vm.class_of(s), vm.core.string.unwrap());
    let list = vm.alloc_list(Vec::new());
    assert_eq!(vm.class_of(Value::Obj(list)), vm.core.list.unwrap());
  }

  #[test]
  fn builtin_classes_inherit_from_object() {
    let vm = vm();
    let object = vm.core.object.unwrap();
    for class in [
      vm.core.bool_.unwrap(),
      vm.core.num.unwrap(),
      vm.core.string.unwrap(),
      vm.core.list.unwrap(),
      vm.core.map.unwrap(),
      vm.core.range.unwrap(),
      vm.core.thread.unwrap(),
    ] {
      let mut cursor = Some(class);
      let mut reaches_object = false;
      while let Some(c) = cursor {
        if c == object {
          reaches_object = true;
          break;
        }
        cursor = vm.heap.class(c).superclass;
      }
      assert!(reaches_object);
    }
  }
}

fn prim_system_get_module_variable(vm: &mut Vm, args: &mut [Value]) -> bool {
  let Some(module_name) = validate_string(vm, args[1]) else {
    return false;
  };
  let Some(var_name) = validate_string(vm, args[2]) else {
    return false;
  };

  let Some(module) = vm.get_module(args[1]) else {
    let name = vm.heap.string(module_name).to_str_lossy().into_owned();
    return vm.abort_fiber(format!("module \"{name}\" is not loaded"));
  };

  let var = vm.heap.string(var_name).to_str_lossy().into_owned();
  match vm.heap.module(module).var_index(&var) {
    Some(index) => {
      args[0] = vm.heap.module(module).vars[index];
      true
    }
    None => {
      let name = vm.heap.string(module_name).to_str_lossy().into_owned();
      vm.abort_fiber(format!("module \"{name}\" does not define \"{var}\""))
    }
  }
}

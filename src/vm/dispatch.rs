//! The bytecode dispatch loop.
//!
//! One frame's registers (`ip`, stack base, closure, function) are cached in
//! locals; every call, return or fiber switch writes `ip` back to the frame
//! and reloads from whichever frame is then on top of the current fiber.

use diag::Report;

use crate::heap::ObjRef;
use crate::object::{Frame, Method, Obj, ObjUpvalue};
use crate::op::Op;
use crate::value::Value;
use crate::vm::Vm;

/// Explicit arguments a call may pass, not counting the receiver.
pub const MAX_ARGS: usize = 16;

impl Vm {
  /// Run `fiber` until the last frame returns, a fiber suspends the VM, or
  /// an error goes unhandled.
  pub fn execute(&mut self, fiber: ObjRef) -> Result<Value, Report> {
    self.current_fiber = Some(fiber);

    let mut fiber = fiber;
    let mut ip: usize;
    let mut start: usize;
    let mut closure: ObjRef;
    let mut function: ObjRef;

    macro_rules! load_frame {
      () => {{
        let frame = *self
          .heap
          .fiber(fiber)
          .frames
          .last()
          .expect("a running fiber has a frame");
        ip = frame.ip;
        start = frame.start;
        closure = frame.closure;
        function = self.heap.closure(closure).function;
      }};
    }

    macro_rules! store_frame {
      () => {{
        if let Some(frame) = self.heap.fiber_mut(fiber).frames.last_mut() {
          frame.ip = ip;
        }
      }};
    }

    macro_rules! read_byte {
      () => {{
        let byte = self.heap.function(function).code[ip];
        ip += 1;
        byte
      }};
    }

    macro_rules! read_short {
      () => {{
        let f = self.heap.function(function);
        let value = crate::op::read_u16(&f.code, ip);
        ip += 2;
        value
      }};
    }

    macro_rules! push {
      ($value:expr) => {{
        let value = $value;
        self.heap.fiber_mut(fiber).push(value);
      }};
    }

    macro_rules! pop {
      () => {
        self.heap.fiber_mut(fiber).pop()
      };
    }

    macro_rules! rt_err {
      ($($arg:tt)*) => {{
        store_frame!();
        return Err(self.runtime_report(function, ip, format!($($arg)*)));
      }};
    }

    load_frame!();
    loop {
      let op = match Op::from_byte(read_byte!()) {
        Some(op) => op,
        None => rt_err!("corrupt bytecode"),
      };

      match op {
        Op::LoadLocal => {
          let index = read_byte!() as usize;
          push!(self.heap.fiber(fiber).stack[start + index]);
        }
        Op::StoreLocal => {
          let index = read_byte!() as usize;
          let value = self.heap.fiber(fiber).peek();
          self.heap.fiber_mut(fiber).stack[start + index] = value;
        }
        Op::LoadConstant => {
          let index = read_short!() as usize;
          push!(self.heap.function(function).constants[index]);
        }
        Op::PushNull => push!(Value::Null),
        Op::PushFalse => push!(Value::False),
        Op::PushTrue => push!(Value::True),
        Op::Pop => {
          pop!();
        }

        Op::LoadUpvalue => {
          let index = read_byte!() as usize;
          let upvalue = self.heap.closure(closure).upvalues[index];
          push!(self.read_upvalue(upvalue));
        }
        Op::StoreUpvalue => {
          let index = read_byte!() as usize;
          let upvalue = self.heap.closure(closure).upvalues[index];
          let value = self.heap.fiber(fiber).peek();
          self.write_upvalue(upvalue, value);
        }

        Op::LoadModuleVar => {
          let index = read_short!() as usize;
          let module = self.heap.function(function).module;
          push!(self.heap.module(module).vars[index]);
        }
        Op::StoreModuleVar => {
          let index = read_short!() as usize;
          let module = self.heap.function(function).module;
          let value = self.heap.fiber(fiber).peek();
          self.heap.module_mut(module).vars[index] = value;
        }

        Op::LoadThisField => {
          let index = read_byte!() as usize;
          let receiver = self.heap.fiber(fiber).stack[start];
          let Some(instance) = self.as_instance(receiver) else {
            rt_err!("only instances have fields");
          };
          push!(self.heap.instance(instance).fields[index]);
        }
        Op::StoreThisField => {
          let index = read_byte!() as usize;
          let receiver = self.heap.fiber(fiber).stack[start];
          let Some(instance) = self.as_instance(receiver) else {
            rt_err!("only instances have fields");
          };
          let value = self.heap.fiber(fiber).peek();
          self.heap.instance_mut(instance).fields[index] = value;
        }
        Op::LoadField => {
          let index = read_byte!() as usize;
          let receiver = pop!();
          let Some(instance) = self.as_instance(receiver) else {
            rt_err!("only instances have fields");
          };
          push!(self.heap.instance(instance).fields[index]);
        }
        Op::StoreField => {
          let index = read_byte!() as usize;
          let receiver = pop!();
          let Some(instance) = self.as_instance(receiver) else {
            rt_err!("only instances have fields");
          };
          let value = self.heap.fiber(fiber).peek();
          self.heap.instance_mut(instance).fields[index] = value;
        }

        Op::Jump => {
          let offset = read_short!() as usize;
          ip += offset;
        }
        Op::Loop => {
          let offset = read_short!() as usize;
          ip -= offset;
        }
        Op::JumpIfFalse => {
          let offset = read_short!() as usize;
          if pop!().is_falsy() {
            ip += offset;
          }
        }
        Op::And => {
          let offset = read_short!() as usize;
          if self.heap.fiber(fiber).peek().is_falsy() {
            // short-circuit: the left operand is the result
            ip += offset;
          } else {
            pop!();
          }
        }
        Op::Or => {
          let offset = read_short!() as usize;
          if self.heap.fiber(fiber).peek().is_falsy() {
            pop!();
          } else {
            ip += offset;
          }
        }

        _ if op.call_args().is_some() || op.super_args().is_some() => {
          let arg_count = op.call_args().or(op.super_args()).unwrap_or(0) + 1;
          let symbol = read_short!() as usize;

          let class = if op.super_args().is_some() {
            // the superclass was patched into this constant at bind time
            let index = read_short!() as usize;
            match self.heap.function(function).constants[index] {
              Value::Obj(class) => class,
              _ => rt_err!("super call before the method was bound to a class"),
            }
          } else {
            let base = self.heap.fiber(fiber).stack.len() - arg_count;
            let receiver = self.heap.fiber(fiber).stack[base];
            self.class_of(receiver)
          };

          match self.heap.class(class).method(symbol) {
            Method::None => {
              let name = self.method_names.get(symbol).to_string();
              let on = self.heap.string(self.heap.class(class).name).to_str_lossy().into_owned();
              rt_err!("method \"{name}\" not found on {on}");
            }
            Method::Primitive(primitive) => {
              let base = self.heap.fiber(fiber).stack.len() - arg_count;
              let mut args = [Value::Null; MAX_ARGS + 1];
              args[..arg_count].copy_from_slice(&self.heap.fiber(fiber).stack[base..]);

              if primitive(self, &mut args[..arg_count]) {
                // normal return: args[0] is the result, the explicit
                // arguments are discarded
                let f = self.heap.fiber_mut(fiber);
                f.stack[base] = args[0];
                f.stack.truncate(base + 1);
              } else {
                store_frame!();
                if let Some(report) = self.fatal.take() {
                  return Err(report);
                }
                // either the fiber aborted or control switched fibers
                let Some(current) = self.current_fiber else {
                  // suspended: the computation ends without a value
                  return Ok(Value::Null);
                };
                fiber = current;
                let error = self.heap.fiber(fiber).error;
                if !error.is_null() {
                  return Err(self.error_value_report(error));
                }
                load_frame!();
              }
            }
            Method::FnCall => {
              let base = self.heap.fiber(fiber).stack.len() - arg_count;
              let receiver = self.heap.fiber(fiber).stack[base];
              let Some(target) = receiver
                .as_obj()
                .filter(|&r| matches!(self.heap.obj(r), Obj::Closure(_)))
              else {
                rt_err!("call receiver must be a function");
              };
              let declared = {
                let f = self.heap.closure(target).function;
                self.heap.function(f).arg_count
              };
              if arg_count - 1 < declared {
                rt_err!("function expects {declared} arguments, got {}", arg_count - 1);
              }
              store_frame!();
              self.create_frame(fiber, target, arg_count);
              load_frame!();
            }
            Method::Script(target) => {
              store_frame!();
              self.create_frame(fiber, target, arg_count);
              load_frame!();
            }
          }
        }

        Op::CloseUpvalue => {
          let top = self.heap.fiber(fiber).stack.len() - 1;
          self.close_upvalues(fiber, top);
          pop!();
        }

        Op::Return => {
          let result = pop!();
          self.heap.fiber_mut(fiber).frames.pop();
          self.close_upvalues(fiber, start);

          if self.heap.fiber(fiber).frames.is_empty() {
            let Some(caller) = self.heap.fiber(fiber).caller else {
              // the last frame of the root fiber: done
              let f = self.heap.fiber_mut(fiber);
              f.stack.clear();
              f.stack.push(result);
              return Ok(result);
            };
            // resume the calling fiber; the result lands where it expects
            // its `call` to leave one
            self.heap.fiber_mut(fiber).caller = None;
            self.current_fiber = Some(caller);
            fiber = caller;
            self.heap.fiber_mut(fiber).set_top(result);
          } else {
            let f = self.heap.fiber_mut(fiber);
            f.stack.truncate(start);
            f.stack.push(result);
          }
          load_frame!();
        }

        Op::CreateClosure => {
          let index = read_short!() as usize;
          let proto = match self.heap.function(function).constants[index] {
            Value::Obj(r) => r,
            _ => rt_err!("corrupt bytecode"),
          };
          // push before the upvalues exist so a collection mid-way keeps it
          let new_closure = self.alloc_closure(proto);
          push!(Value::Obj(new_closure));

          let upvalue_count = self.heap.function(proto).upvalue_count;
          for _ in 0..upvalue_count {
            let is_enclosing_local = read_byte!() == 1;
            let index = read_byte!() as usize;
            let upvalue = if is_enclosing_local {
              self.capture_upvalue(fiber, start + index)
            } else {
              self.heap.closure(closure).upvalues[index]
            };
            self.heap.closure_mut(new_closure).upvalues.push(upvalue);
          }
        }

        Op::Construct => {
          let class = match self.heap.fiber(fiber).stack[start] {
            Value::Obj(r) if matches!(self.heap.obj(r), Obj::Class(_)) => r,
            _ => rt_err!("constructor receiver must be a class"),
          };
          let instance = self.alloc_instance(class);
          self.heap.fiber_mut(fiber).stack[start] = Value::Obj(instance);
        }

        Op::CreateClass => {
          let field_count = read_byte!() as usize;
          let stack_len = self.heap.fiber(fiber).stack.len();
          let superclass_value = self.heap.fiber(fiber).stack[stack_len - 1];
          let name_value = self.heap.fiber(fiber).stack[stack_len - 2];

          let superclass = match self.validate_superclass(name_value, field_count, superclass_value)
          {
            Ok(superclass) => superclass,
            Err(report) => {
              store_frame!();
              return Err(report);
            }
          };
          let name = match name_value {
            Value::Obj(r) => r,
            _ => rt_err!("corrupt bytecode"),
          };
          // both operands stay on the stack while the class is created, so
          // a collection here cannot reap them
          let class = self.new_class(name, field_count, superclass);
          let f = self.heap.fiber_mut(fiber);
          f.pop();
          f.set_top(Value::Obj(class));
        }

        Op::InstanceMethod | Op::StaticMethod => {
          let symbol = read_short!() as usize;
          let stack_len = self.heap.fiber(fiber).stack.len();
          let class = match self.heap.fiber(fiber).stack[stack_len - 1] {
            Value::Obj(r) if matches!(self.heap.obj(r), Obj::Class(_)) => r,
            _ => rt_err!("method bound to a non-class"),
          };
          let method = self.heap.fiber(fiber).stack[stack_len - 2];
          if let Err(report) = self.bind_method_and_patch(op, symbol, class, method) {
            store_frame!();
            return Err(report);
          }
          pop!();
          pop!();
        }

        Op::End => rt_err!("corrupt bytecode"),

        // every call and super opcode was taken by the guarded arm
        _ => rt_err!("corrupt bytecode"),
      }
    }
  }

  // -----------------------------------------------------------------------

  fn as_instance(&self, value: Value) -> Option<ObjRef> {
    value
      .as_obj()
      .filter(|&r| matches!(self.heap.obj(r), Obj::Instance(_)))
  }

  fn create_frame(&mut self, fiber: ObjRef, closure: ObjRef, arg_count: usize) {
    let function = self.heap.closure(closure).function;
    let reserve = self.heap.function(function).max_stack;
    let f = self.heap.fiber_mut(fiber);
    let start = f.stack.len() - arg_count;
    f.frames.push(Frame {
      ip: 0,
      closure,
      start,
    });
    let capacity_before = f.stack.capacity();
    f.stack.reserve(reserve);
    let grown = f.stack.capacity() - capacity_before;
    self.heap.account(grown * std::mem::size_of::<Value>());
  }

  fn read_upvalue(&self, upvalue: ObjRef) -> Value {
    match self.heap.upvalue(upvalue) {
      ObjUpvalue::Open { fiber, slot } => self.heap.fiber(*fiber).stack[*slot],
      ObjUpvalue::Closed(value) => *value,
    }
  }

  fn write_upvalue(&mut self, upvalue: ObjRef, value: Value) {
    match self.heap.upvalue(upvalue) {
      ObjUpvalue::Open { fiber, slot } => {
        let (fiber, slot) = (*fiber, *slot);
        self.heap.fiber_mut(fiber).stack[slot] = value;
      }
      ObjUpvalue::Closed(_) => *self.heap.upvalue_mut(upvalue) = ObjUpvalue::Closed(value),
    }
  }

  /// Find the open upvalue for `slot`, or splice a new one into the fiber's
  /// descending-by-slot list. Sharing the node is what makes two closures
  /// over the same variable see each other's writes.
  fn capture_upvalue(&mut self, fiber: ObjRef, slot: usize) -> ObjRef {
    let mut insert_at = self.heap.fiber(fiber).open_upvalues.len();
    for (i, &upvalue) in self.heap.fiber(fiber).open_upvalues.iter().enumerate() {
      let existing = self
        .heap
        .upvalue(upvalue)
        .open_slot()
        .expect("open list holds only open upvalues");
      if existing == slot {
        return upvalue;
      }
      if existing < slot {
        insert_at = i;
        break;
      }
    }
    let upvalue = self.alloc(Obj::Upvalue(ObjUpvalue::Open { fiber, slot }), None);
    self.heap.fiber_mut(fiber).open_upvalues.insert(insert_at, upvalue);
    upvalue
  }

  /// Close every open upvalue pointing at `limit` or above; they form a
  /// prefix of the descending list.
  pub(crate) fn close_upvalues(&mut self, fiber: ObjRef, limit: usize) {
    while let Some(&upvalue) = self.heap.fiber(fiber).open_upvalues.first() {
      let slot = self
        .heap
        .upvalue(upvalue)
        .open_slot()
        .expect("open list holds only open upvalues");
      if slot < limit {
        break;
      }
      let value = self.heap.fiber(fiber).stack[slot];
      *self.heap.upvalue_mut(upvalue) = ObjUpvalue::Closed(value);
      self.heap.fiber_mut(fiber).open_upvalues.remove(0);
    }
  }

  fn runtime_report(&self, function: ObjRef, ip: usize, message: String) -> Report {
    let f = self.heap.function(function);
    let mut report = Report::runtime(message);
    if let Some(&line) = f.lines.get(ip.saturating_sub(1)) {
      report = report.at_line(line);
    }
    match &self.heap.module(f.module).name {
      Some(name) => report.in_module(name.clone()),
      None => report.in_module("core"),
    }
  }

  pub(crate) fn error_value_report(&self, error: Value) -> Report {
    Report::runtime(self.show_value(error))
  }
}

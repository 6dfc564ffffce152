//! The single-pass compiler: token stream in, module `ObjFn` out.
//!
//! One [`CompileUnit`] per function, method or module body. Units form a
//! stack; the innermost is compiled directly into its `ObjFn`, which lives on
//! the heap (temp-rooted) so that a collection mid-compile sees all in-flight
//! code and constants.

mod expr;
mod stmt;

use diag::Report;
use span::LineIndex;
use syntax::{Lexer, Token, TokenKind};

use crate::heap::ObjRef;
use crate::op::Op;
use crate::symbol::SymbolTable;
use crate::value::Value;
use crate::vm::Vm;

pub(crate) const MAX_LOCALS: usize = 128;
pub(crate) const MAX_UPVALUES: usize = 128;
pub(crate) const MAX_ID_LEN: usize = 128;
pub(crate) const MAX_ARGS: usize = 16;
pub(crate) const MAX_FIELDS_PER_CLASS: usize = 128;

/// Compile `source` into `module`, returning the function that runs the
/// module body and defines its top-level names.
pub(crate) fn compile_module(vm: &mut Vm, module: ObjRef, source: &str) -> Result<ObjRef, Report> {
  let module_name = vm
    .heap
    .module(module)
    .name
    .clone()
    .unwrap_or_else(|| "core".to_string());

  let lines = LineIndex::new(source);
  let tokens = Lexer::lex(source).map_err(|errors| {
    let first = &errors[0];
    Report::lex(first.message.clone())
      .at(first.span, &lines)
      .in_module(module_name.clone())
  })?;

  let temp_roots_before = vm.heap.temp_roots_len();
  let var_count_before = vm.heap.module(module).vars.len();

  let mut compiler = Compiler {
    vm: &mut *vm,
    module,
    module_name,
    tokens,
    pos: 0,
    lines,
    units: Vec::new(),
    classes: Vec::new(),
  };

  let result = compiler.run();
  compiler.vm.heap.truncate_temp_roots(temp_roots_before);
  let function = result?;

  // a module variable still holding a number was referenced (the number is
  // the line of the reference) but never defined
  let vars = vm.heap.module(module).vars.len();
  for index in var_count_before..vars {
    if let Some(line) = vm.heap.module(module).vars[index].as_num() {
      let name = vm.heap.module(module).var_names.get(index).to_string();
      let module_name = vm
        .heap
        .module(module)
        .name
        .clone()
        .unwrap_or_else(|| "core".to_string());
      return Err(
        Report::compile(format!("variable \"{name}\" is referenced but never defined"))
          .at_line(line as u32)
          .in_module(module_name),
      );
    }
  }

  Ok(function)
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum SigKind {
  Getter,
  Setter,
  Method,
  Subscript,
  SubscriptSetter,
  Construct,
}

/// A method signature; its canonical string form is the key into the global
/// method-name table.
#[derive(Clone)]
pub(crate) struct Signature {
  pub kind: SigKind,
  pub name: String,
  pub arg_count: usize,
}

impl Signature {
  pub fn new(kind: SigKind, name: impl Into<String>, arg_count: usize) -> Signature {
    Signature {
      kind,
      name: name.into(),
      arg_count,
    }
  }

  fn underscores(count: usize) -> String {
    vec!["_"; count].join(",")
  }

  pub fn canonical(&self) -> String {
    let name = &self.name;
    match self.kind {
      SigKind::Getter => name.clone(),
      SigKind::Setter => format!("{name}=(_)"),
      SigKind::Method | SigKind::Construct => {
        format!("{name}({})", Signature::underscores(self.arg_count))
      }
      SigKind::Subscript => format!("[{}]", Signature::underscores(self.arg_count)),
      SigKind::SubscriptSetter => {
        format!("[{}]=(_)", Signature::underscores(self.arg_count - 1))
      }
    }
  }
}

struct Local {
  name: String,
  /// Scope the local was declared in; -1 on the reserved receiver slot.
  depth: i32,
  is_upvalue: bool,
}

struct UpvalueDesc {
  is_enclosing_local: bool,
  index: usize,
}

pub(crate) struct LoopCtx {
  /// Offset of the first condition instruction.
  pub cond_start: usize,
  /// Offset of the first body instruction.
  pub body_start: usize,
  /// Placeholder of the jump that exits the loop.
  pub exit_placeholder: usize,
  pub scope_depth: i32,
}

/// Book-keeping for the class definition currently being compiled.
pub(crate) struct ClassInfo {
  pub name: String,
  pub fields: SymbolTable,
  /// Signature of the method being compiled, for bare `super(...)` calls.
  pub signature: Option<Signature>,
  instance_methods: Vec<usize>,
  static_methods: Vec<usize>,
}

struct CompileUnit {
  function: ObjRef,
  locals: Vec<Local>,
  upvalues: Vec<UpvalueDesc>,
  /// -1 at module scope, 0 at function top level, deeper inside blocks.
  scope_depth: i32,
  /// Stack slots currently in use; the peak lands in `ObjFn::max_stack`.
  slot_count: i32,
  loops: Vec<LoopCtx>,
  /// Set on the unit that lexically holds a `class` statement, for the time
  /// the class body is being compiled.
  class_info: Option<usize>,
}

#[derive(Clone, Copy, PartialEq)]
pub(crate) enum VarScope {
  Local,
  Upvalue,
  Module,
}

#[derive(Clone, Copy)]
pub(crate) struct Variable {
  pub scope: VarScope,
  pub index: usize,
}

pub(crate) struct Compiler<'vm, 'src> {
  pub(crate) vm: &'vm mut Vm,
  module: ObjRef,
  module_name: String,
  tokens: Vec<Token<'src>>,
  pos: usize,
  lines: LineIndex,
  units: Vec<CompileUnit>,
  classes: Vec<ClassInfo>,
}

impl<'vm, 'src> Compiler<'vm, 'src> {
  fn run(&mut self) -> Result<ObjRef, Report> {
    self.push_unit(UnitKind::Module, "<module>");
    while self.peek() != TokenKind::Eof {
      self.compile_program()?;
    }
    self.write_op(Op::PushNull);
    self.write_op(Op::Return);
    Ok(self.end_unit()?)
  }

  // -----------------------------------------------------------------------
  // tokens

  pub(crate) fn peek(&self) -> TokenKind {
    self.tokens[self.pos].kind
  }

  pub(crate) fn cur(&self) -> &Token<'src> {
    &self.tokens[self.pos]
  }

  pub(crate) fn prev(&self) -> &Token<'src> {
    &self.tokens[self.pos.saturating_sub(1)]
  }

  pub(crate) fn advance(&mut self) {
    if self.pos + 1 < self.tokens.len() {
      self.pos += 1;
    }
  }

  pub(crate) fn match_token(&mut self, kind: TokenKind) -> bool {
    if self.peek() != kind {
      return false;
    }
    self.advance();
    true
  }

  pub(crate) fn consume(&mut self, kind: TokenKind, message: &str) -> Result<(), Report> {
    if self.match_token(kind) {
      return Ok(());
    }
    Err(self.error_at_cur(format!("{message} (found {})", self.peek())))
  }

  pub(crate) fn line_of_prev(&self) -> u32 {
    self.lines.line_of(self.prev().span)
  }

  pub(crate) fn error_at_prev(&self, message: impl Into<String>) -> Report {
    Report::compile(message.into())
      .at(self.prev().span, &self.lines)
      .in_module(self.module_name.clone())
  }

  pub(crate) fn error_at_cur(&self, message: impl Into<String>) -> Report {
    Report::compile(message.into())
      .at(self.cur().span, &self.lines)
      .in_module(self.module_name.clone())
  }

  // -----------------------------------------------------------------------
  // units

  pub(crate) fn push_unit(&mut self, kind: UnitKind, name: &str) {
    let mut locals = Vec::new();
    let scope_depth = match kind {
      UnitKind::Module => -1,
      UnitKind::Function | UnitKind::Method => {
        // slot 0 holds the receiver; only methods can name it
        locals.push(Local {
          name: if kind == UnitKind::Method { "this" } else { "" }.to_string(),
          depth: -1,
          is_upvalue: false,
        });
        0
      }
    };

    let initial = locals.len();
    let function = self.vm.alloc_fn(self.module, initial, name);
    self.vm.heap.push_temp_root(function);

    self.units.push(CompileUnit {
      function,
      locals,
      upvalues: Vec::new(),
      scope_depth,
      slot_count: initial as i32,
      loops: Vec::new(),
      class_info: None,
    });
  }

  /// Finish the innermost unit. For a nested unit, the finished function
  /// becomes a constant of its encloser, which gets the `CreateClosure`
  /// instruction plus one `(is_enclosing_local, index)` pair per upvalue.
  pub(crate) fn end_unit(&mut self) -> Result<ObjRef, Report> {
    self.write_op(Op::End);

    let unit = self.units.pop().expect("a unit is open");
    let function = unit.function;
    self.vm.heap.function_mut(function).upvalue_count = unit.upvalues.len();

    if !self.units.is_empty() {
      let index = self.add_constant(Value::Obj(function))?;
      self.write_op_short(Op::CreateClosure, index);
      for upvalue in &unit.upvalues {
        self.write_raw_byte(upvalue.is_enclosing_local as u8);
        self.write_raw_byte(upvalue.index as u8);
      }
    }

    self.vm.heap.pop_temp_root();
    Ok(function)
  }

  fn unit(&mut self) -> &mut CompileUnit {
    self.units.last_mut().expect("a unit is open")
  }

  fn unit_ref(&self) -> &CompileUnit {
    self.units.last().expect("a unit is open")
  }

  pub(crate) fn current_fn(&self) -> ObjRef {
    self.unit_ref().function
  }

  pub(crate) fn units_len(&self) -> usize {
    self.units.len()
  }

  pub(crate) fn code_len(&self) -> usize {
    self.vm.heap.function(self.current_fn()).code.len()
  }

  // -----------------------------------------------------------------------
  // emission

  /// Append one byte with no stack-effect accounting (operands, and the
  /// pop/close sequences whose slots the scope tracking already owns).
  fn write_raw_byte(&mut self, byte: u8) -> usize {
    let line = self.line_of_prev();
    let function = self.current_fn();
    let f = self.vm.heap.function_mut(function);
    f.code.push(byte);
    f.lines.push(line);
    f.code.len() - 1
  }

  pub(crate) fn write_op(&mut self, op: Op) -> usize {
    let at = self.write_raw_byte(op as u8);
    let unit = self.unit();
    unit.slot_count += op.stack_effect();
    let peak = unit.slot_count.max(0) as usize;
    let function = self.current_fn();
    let f = self.vm.heap.function_mut(function);
    if peak > f.max_stack {
      f.max_stack = peak;
    }
    at
  }

  pub(crate) fn write_op_byte(&mut self, op: Op, operand: usize) -> usize {
    self.write_op(op);
    self.write_raw_byte(operand as u8)
  }

  pub(crate) fn write_op_short(&mut self, op: Op, operand: usize) {
    self.write_op(op);
    self.write_raw_byte(((operand >> 8) & 0xff) as u8);
    self.write_raw_byte((operand & 0xff) as u8);
  }

  pub(crate) fn add_constant(&mut self, value: Value) -> Result<usize, Report> {
    let function = self.current_fn();
    let f = self.vm.heap.function_mut(function);
    f.constants.push(value);
    let index = f.constants.len() - 1;
    if index > u16::MAX as usize {
      return Err(self.error_at_prev("too many constants in one function"));
    }
    Ok(index)
  }

  pub(crate) fn emit_constant(&mut self, value: Value) -> Result<(), Report> {
    let index = self.add_constant(value)?;
    self.write_op_short(Op::LoadConstant, index);
    Ok(())
  }

  /// Emit `op` with a two-byte `0xffff` placeholder; returns the offset of
  /// the placeholder's high byte for later patching.
  pub(crate) fn emit_placeholder(&mut self, op: Op) -> usize {
    self.write_op(op);
    self.write_raw_byte(0xff);
    self.write_raw_byte(0xff) - 1
  }

  /// Point the placeholder at `at` to the current end of code.
  pub(crate) fn patch_placeholder(&mut self, at: usize) {
    let function = self.current_fn();
    let f = self.vm.heap.function_mut(function);
    let offset = f.code.len() - at - 2;
    f.code[at] = ((offset >> 8) & 0xff) as u8;
    f.code[at + 1] = (offset & 0xff) as u8;
  }

  /// Jump backwards to `target` (an instruction offset before the loop op).
  pub(crate) fn emit_loop_to(&mut self, target: usize) {
    let offset = self.code_len() - target + 3;
    self.write_op(Op::Loop);
    self.write_raw_byte(((offset >> 8) & 0xff) as u8);
    self.write_raw_byte((offset & 0xff) as u8);
  }

  /// Ensure `signature`'s canonical name is in the global method-name table
  /// and emit the call (or super call) for it.
  pub(crate) fn emit_call_by_signature(&mut self, sig: &Signature, op: Op) -> Result<(), Report> {
    let canonical = sig.canonical();
    let symbol = self.vm.method_names.ensure(&canonical);
    if symbol > u16::MAX as usize {
      return Err(self.error_at_prev("too many method names"));
    }
    let call_op = if op == Op::Super0 {
      Op::super_(sig.arg_count)
    } else {
      Op::call(sig.arg_count)
    };
    self.write_op_short(call_op, symbol);

    if op == Op::Super0 {
      // reserve a constant slot for the superclass; filled at bind time
      let index = self.add_constant(Value::Null)?;
      self.write_raw_byte(((index >> 8) & 0xff) as u8);
      self.write_raw_byte((index & 0xff) as u8);
    }
    Ok(())
  }

  pub(crate) fn emit_call(&mut self, arg_count: usize, name: &str) {
    let symbol = self.vm.method_names.ensure(name);
    self.write_op_short(Op::call(arg_count), symbol);
  }

  // -----------------------------------------------------------------------
  // scopes and variables

  pub(crate) fn enter_scope(&mut self) {
    self.unit().scope_depth += 1;
  }

  pub(crate) fn leave_scope(&mut self) {
    let depth = self.unit_ref().scope_depth;
    let discarded = self.discard_locals(depth);
    let unit = self.unit();
    unit.locals.truncate(unit.locals.len() - discarded);
    unit.slot_count -= discarded as i32;
    unit.scope_depth -= 1;
  }

  /// Pin the local at `index` to the persistent depth, so no scope exit and
  /// no `break` ever pops its slot. Static fields need this: every method of
  /// their class holds an upvalue into the slot for the rest of the module
  /// run.
  pub(crate) fn mark_local_persistent(&mut self, index: usize) {
    self.unit().locals[index].depth = -1;
  }

  /// Emit pops (or upvalue closes) for every local at `scope_depth` or
  /// deeper, without forgetting them; `break`/`continue` discard slots while
  /// the names stay visible to the remaining loop body.
  pub(crate) fn discard_locals(&mut self, scope_depth: i32) -> usize {
    let mut discarded = 0;
    let locals: Vec<bool> = self
      .unit_ref()
      .locals
      .iter()
      .rev()
      .take_while(|local| local.depth >= scope_depth)
      .map(|local| local.is_upvalue)
      .collect();
    for is_upvalue in locals {
      if is_upvalue {
        self.write_raw_byte(Op::CloseUpvalue as u8);
      } else {
        self.write_raw_byte(Op::Pop as u8);
      }
      discarded += 1;
    }
    discarded
  }

  pub(crate) fn add_local(&mut self, name: &str) -> Result<usize, Report> {
    if self.unit_ref().locals.len() >= MAX_LOCALS {
      return Err(self.error_at_prev(format!("more than {MAX_LOCALS} locals in one function")));
    }
    let depth = self.unit_ref().scope_depth;
    let unit = self.unit();
    unit.locals.push(Local {
      name: name.to_string(),
      depth,
      is_upvalue: false,
    });
    Ok(unit.locals.len() - 1)
  }

  pub(crate) fn declare_local(&mut self, name: &str) -> Result<usize, Report> {
    let depth = self.unit_ref().scope_depth;
    for local in self.unit_ref().locals.iter().rev() {
      if local.depth != -1 && local.depth < depth {
        break;
      }
      if local.name == name {
        return Err(self.error_at_prev(format!("identifier \"{name}\" redefinition")));
      }
    }
    self.add_local(name)
  }

  /// Declare `name` in the scope the compiler is currently in: a module
  /// variable at module scope, a local otherwise.
  pub(crate) fn declare_variable(&mut self, name: &str) -> Result<usize, Report> {
    if name.len() > MAX_ID_LEN {
      return Err(self.error_at_prev(format!("identifier longer than {MAX_ID_LEN} bytes")));
    }
    if self.unit_ref().scope_depth == -1 {
      return match self.vm.define_module_var(self.module, name, Value::Null) {
        Some(index) => Ok(index),
        None => Err(self.error_at_prev(format!("identifier \"{name}\" redefinition"))),
      };
    }
    self.declare_local(name)
  }

  /// A local's value is already in its stack slot; a module variable is
  /// stored off the stack.
  pub(crate) fn define_variable(&mut self, index: usize) {
    if self.unit_ref().scope_depth == -1 {
      self.write_op_short(Op::StoreModuleVar, index);
      self.write_op(Op::Pop);
    }
  }

  fn find_local(&self, unit: usize, name: &str) -> Option<usize> {
    self.units[unit]
      .locals
      .iter()
      .rposition(|local| local.name == name)
  }

  fn add_upvalue(
    &mut self,
    unit: usize,
    is_enclosing_local: bool,
    index: usize,
  ) -> Result<usize, Report> {
    let upvalues = &self.units[unit].upvalues;
    for (i, upvalue) in upvalues.iter().enumerate() {
      if upvalue.index == index && upvalue.is_enclosing_local == is_enclosing_local {
        return Ok(i);
      }
    }
    if upvalues.len() >= MAX_UPVALUES {
      return Err(self.error_at_prev(format!("more than {MAX_UPVALUES} upvalues in one function")));
    }
    self.units[unit].upvalues.push(UpvalueDesc {
      is_enclosing_local,
      index,
    });
    Ok(self.units[unit].upvalues.len() - 1)
  }

  /// Resolve `name` as an upvalue of `unit`, capturing through every
  /// enclosing unit in between. Plain names never cross the boundary of the
  /// unit a class body lives in; mangled static-field names (they contain a
  /// space) may.
  fn find_upvalue(&mut self, unit: usize, name: &str) -> Result<Option<usize>, Report> {
    if unit == 0 {
      return Ok(None);
    }
    if !name.contains(' ') && self.units[unit - 1].class_info.is_some() {
      return Ok(None);
    }

    if let Some(local) = self.find_local(unit - 1, name) {
      self.units[unit - 1].locals[local].is_upvalue = true;
      return Ok(Some(self.add_upvalue(unit, true, local)?));
    }
    if let Some(upvalue) = self.find_upvalue(unit - 1, name)? {
      return Ok(Some(self.add_upvalue(unit, false, upvalue)?));
    }
    Ok(None)
  }

  pub(crate) fn resolve_local_or_upvalue(&mut self, name: &str) -> Result<Option<Variable>, Report> {
    let unit = self.units.len() - 1;
    if let Some(index) = self.find_local(unit, name) {
      return Ok(Some(Variable {
        scope: VarScope::Local,
        index,
      }));
    }
    if let Some(index) = self.find_upvalue(unit, name)? {
      return Ok(Some(Variable {
        scope: VarScope::Upvalue,
        index,
      }));
    }
    Ok(None)
  }

  /// Locals and upvalues first, then module variables.
  pub(crate) fn find_variable(&mut self, name: &str) -> Result<Option<Variable>, Report> {
    if let Some(var) = self.resolve_local_or_upvalue(name)? {
      return Ok(Some(var));
    }
    Ok(
      self
        .vm
        .heap
        .module(self.module)
        .var_index(name)
        .map(|index| Variable {
          scope: VarScope::Module,
          index,
        }),
    )
  }

  pub(crate) fn emit_load_variable(&mut self, var: Variable) {
    match var.scope {
      VarScope::Local => {
        self.write_op_byte(Op::LoadLocal, var.index);
      }
      VarScope::Upvalue => {
        self.write_op_byte(Op::LoadUpvalue, var.index);
      }
      VarScope::Module => self.write_op_short(Op::LoadModuleVar, var.index),
    }
  }

  pub(crate) fn emit_store_variable(&mut self, var: Variable) {
    match var.scope {
      VarScope::Local => {
        self.write_op_byte(Op::StoreLocal, var.index);
      }
      VarScope::Upvalue => {
        self.write_op_byte(Op::StoreUpvalue, var.index);
      }
      VarScope::Module => self.write_op_short(Op::StoreModuleVar, var.index),
    }
  }

  pub(crate) fn emit_load_or_store(
    &mut self,
    can_assign: bool,
    var: Variable,
  ) -> Result<(), Report> {
    if can_assign && self.match_token(TokenKind::Assign) {
      self.expression(BindPower::Lowest)?;
      self.emit_store_variable(var);
    } else {
      self.emit_load_variable(var);
    }
    Ok(())
  }

  pub(crate) fn emit_load_module_var(&mut self, name: &str) -> Result<(), Report> {
    let Some(index) = self.vm.heap.module(self.module).var_index(name) else {
      return Err(self.error_at_prev(format!("variable \"{name}\" is not defined")));
    };
    self.write_op_short(Op::LoadModuleVar, index);
    Ok(())
  }

  /// Load a builtin by name, forward-declaring it when the reference comes
  /// before its definition (literals inside the core module itself do).
  pub(crate) fn emit_load_core_var(&mut self, name: &str) {
    let index = match self.vm.heap.module(self.module).var_index(name) {
      Some(index) => index,
      None => {
        let line = self.line_of_prev();
        self.vm.declare_module_var(self.module, name, line)
      }
    };
    self.write_op_short(Op::LoadModuleVar, index);
  }

  pub(crate) fn emit_load_this(&mut self) -> Result<(), Report> {
    let Some(var) = self.resolve_local_or_upvalue("this")? else {
      return Err(self.error_at_prev("\"this\" is only available inside a method"));
    };
    self.emit_load_variable(var);
    Ok(())
  }

  pub(crate) fn unit_scope_depth(&self) -> i32 {
    self.unit_ref().scope_depth
  }

  pub(crate) fn unit_loops_mut(&mut self) -> &mut Vec<LoopCtx> {
    &mut self.unit().loops
  }

  pub(crate) fn current_unit_class(&self) -> Option<usize> {
    self.unit_ref().class_info
  }

  pub(crate) fn set_unit_class(&mut self, class: Option<usize>) {
    self.unit().class_info = class;
  }

  pub(crate) fn classes_push(&mut self, info: ClassInfo) -> usize {
    self.classes.push(info);
    self.classes.len() - 1
  }

  pub(crate) fn local_exists(&self, name: &str) -> bool {
    self.find_local(self.units.len() - 1, name).is_some()
  }

  pub(crate) fn set_unit_slots(&mut self, slots: i32) {
    self.unit().slot_count = slots;
  }

  // -----------------------------------------------------------------------
  // class book-keeping

  /// The book-keeping of the class whose body lexically encloses the code
  /// being compiled, if any.
  pub(crate) fn enclosing_class(&self) -> Option<usize> {
    self.units.iter().rev().find_map(|unit| unit.class_info)
  }

  pub(crate) fn class_info(&self, index: usize) -> &ClassInfo {
    &self.classes[index]
  }

  pub(crate) fn class_info_mut(&mut self, index: usize) -> &mut ClassInfo {
    &mut self.classes[index]
  }
}

#[derive(Clone, Copy, PartialEq)]
pub(crate) enum UnitKind {
  Module,
  Function,
  Method,
}

/// Binding powers, low to high; the Pratt loop continues while the next
/// token's power exceeds the caller's.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum BindPower {
  None,
  Lowest,
  Assign,
  Condition,
  LogicOr,
  LogicAnd,
  Equal,
  Is,
  Cmp,
  BitOr,
  BitAnd,
  BitShift,
  Range,
  Term,
  Factor,
  Unary,
  Call,
}

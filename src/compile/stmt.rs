//! Statement and definition compilation.

use diag::Report;
use syntax::TokenKind;

use crate::compile::expr::{rule, static_field_id};
use crate::compile::{
  BindPower, ClassInfo, Compiler, LoopCtx, SigKind, Signature, UnitKind, VarScope, Variable,
  MAX_FIELDS_PER_CLASS,
};
use crate::op::Op;
use crate::symbol::SymbolTable;

impl<'vm, 'src> Compiler<'vm, 'src> {
  /// One top-level item: a definition or a statement.
  pub(crate) fn compile_program(&mut self) -> Result<(), Report> {
    if self.match_token(TokenKind::Kw_Class) {
      self.compile_class_definition()
    } else if self.match_token(TokenKind::Kw_Fun) {
      self.compile_function_definition()
    } else if self.match_token(TokenKind::Kw_Var) {
      self.compile_var_definition(false)
    } else if self.match_token(TokenKind::Kw_Import) {
      self.compile_import()
    } else {
      self.compile_statement()
    }
  }

  fn compile_statement(&mut self) -> Result<(), Report> {
    if self.match_token(TokenKind::Kw_If) {
      self.compile_if()
    } else if self.match_token(TokenKind::Kw_While) {
      self.compile_while()
    } else if self.match_token(TokenKind::Kw_For) {
      self.compile_for()
    } else if self.match_token(TokenKind::Kw_Return) {
      self.compile_return()
    } else if self.match_token(TokenKind::Kw_Break) {
      self.compile_break()
    } else if self.match_token(TokenKind::Kw_Continue) {
      self.compile_continue()
    } else if self.match_token(TokenKind::CurlyL) {
      self.enter_scope();
      self.compile_block()?;
      self.leave_scope();
      Ok(())
    } else {
      // a bare expression; its value is discarded
      self.expression(BindPower::Lowest)?;
      self.write_op(Op::Pop);
      Ok(())
    }
  }

  /// Statements up to the closing `}` (already inside the scope).
  pub(crate) fn compile_block(&mut self) -> Result<(), Report> {
    while !self.match_token(TokenKind::CurlyR) {
      if self.peek() == TokenKind::Eof {
        return Err(self.error_at_cur("expect '}' closing the block"));
      }
      self.compile_program()?;
    }
    Ok(())
  }

  /// A function or method body: its block plus the implicit return — `this`
  /// for constructors, null otherwise.
  pub(crate) fn compile_body(&mut self, is_construct: bool) -> Result<(), Report> {
    self.compile_block()?;
    if is_construct {
      self.write_op_byte(Op::LoadLocal, 0);
    } else {
      self.write_op(Op::PushNull);
    }
    self.write_op(Op::Return);
    Ok(())
  }

  // -----------------------------------------------------------------------
  // control flow

  fn compile_if(&mut self) -> Result<(), Report> {
    self.consume(TokenKind::ParenL, "expect '(' after 'if'")?;
    self.expression(BindPower::Lowest)?;
    self.consume(TokenKind::ParenR, "expect ')' after the condition")?;

    let false_branch = self.emit_placeholder(Op::JumpIfFalse);
    self.compile_statement()?;

    if self.match_token(TokenKind::Kw_Else) {
      let end = self.emit_placeholder(Op::Jump);
      self.patch_placeholder(false_branch);
      self.compile_statement()?;
      self.patch_placeholder(end);
    } else {
      self.patch_placeholder(false_branch);
    }
    Ok(())
  }

  fn enter_loop(&mut self) {
    let ctx = LoopCtx {
      cond_start: self.code_len(),
      body_start: 0,
      exit_placeholder: 0,
      scope_depth: self.unit_scope_depth(),
    };
    self.unit_loops_mut().push(ctx);
  }

  fn compile_loop_body(&mut self) -> Result<(), Report> {
    let body_start = self.code_len();
    if let Some(ctx) = self.unit_loops_mut().last_mut() {
      ctx.body_start = body_start;
    }
    self.compile_statement()
  }

  /// Jump back to the condition, patch the exit, and turn every `End`
  /// placeholder a `break` left in the body into a jump past the loop.
  fn leave_loop(&mut self) {
    let ctx = self.unit_loops_mut().pop().expect("inside a loop");
    self.emit_loop_to(ctx.cond_start);
    self.patch_placeholder(ctx.exit_placeholder);

    let end = self.code_len();
    let mut at = ctx.body_start;
    while at < end {
      let function = self.current_fn();
      if self.vm.heap.function(function).code[at] == Op::End as u8 {
        self.vm.heap.function_mut(function).code[at] = Op::Jump as u8;
        self.patch_placeholder(at + 1);
        at += 3;
      } else {
        let f = self.vm.heap.function(function);
        at += 1 + crate::op::operand_bytes_at(&self.vm.heap, &f.code, &f.constants, at);
      }
    }
  }

  fn compile_while(&mut self) -> Result<(), Report> {
    self.enter_loop();
    self.consume(TokenKind::ParenL, "expect '(' after 'while'")?;
    self.expression(BindPower::Lowest)?;
    self.consume(TokenKind::ParenR, "expect ')' after the condition")?;

    let exit = self.emit_placeholder(Op::JumpIfFalse);
    if let Some(ctx) = self.unit_loops_mut().last_mut() {
      ctx.exit_placeholder = exit;
    }
    self.compile_loop_body()?;
    self.leave_loop();
    Ok(())
  }

  /// `for id (seq) body` runs through the iterator protocol:
  ///
  /// ```text
  /// var seq = sequence
  /// var iter
  /// while (iter = seq.iterate(iter)) {
  ///   var id = seq.iteratorValue(iter)
  ///   body
  /// }
  /// ```
  fn compile_for(&mut self) -> Result<(), Report> {
    self.enter_scope();

    self.consume(TokenKind::Id, "expect the loop variable after 'for'")?;
    let loop_var = self.prev().lexeme.to_string();

    self.consume(TokenKind::ParenL, "expect '(' before the sequence")?;
    self.expression(BindPower::Lowest)?;
    self.consume(TokenKind::ParenR, "expect ')' after the sequence")?;
    // the trailing space keeps these hidden locals out of user reach
    let seq_slot = self.add_local("seq ")?;
    self.write_op(Op::PushNull);
    let iter_slot = self.add_local("iter ")?;

    self.enter_loop();
    self.write_op_byte(Op::LoadLocal, seq_slot);
    self.write_op_byte(Op::LoadLocal, iter_slot);
    self.emit_call(1, "iterate(_)");
    self.write_op_byte(Op::StoreLocal, iter_slot);

    let exit = self.emit_placeholder(Op::JumpIfFalse);
    if let Some(ctx) = self.unit_loops_mut().last_mut() {
      ctx.exit_placeholder = exit;
    }

    self.write_op_byte(Op::LoadLocal, seq_slot);
    self.write_op_byte(Op::LoadLocal, iter_slot);
    self.emit_call(1, "iteratorValue(_)");

    self.enter_scope();
    self.add_local(&loop_var)?;
    self.compile_loop_body()?;
    self.leave_scope();

    self.leave_loop();
    self.leave_scope();
    Ok(())
  }

  fn compile_return(&mut self) -> Result<(), Report> {
    if self.peek() == TokenKind::CurlyR {
      self.write_op(Op::PushNull);
    } else {
      self.expression(BindPower::Lowest)?;
    }
    self.write_op(Op::Return);
    Ok(())
  }

  fn compile_break(&mut self) -> Result<(), Report> {
    let Some(scope_depth) = self.unit_loops_mut().last().map(|l| l.scope_depth) else {
      return Err(self.error_at_prev("'break' outside of a loop"));
    };
    // locals of the loop body die here; their slots must not leak
    self.discard_locals(scope_depth + 1);
    // `End` marks the spot; the loop exit rewrites it into a jump
    self.emit_placeholder(Op::End);
    Ok(())
  }

  fn compile_continue(&mut self) -> Result<(), Report> {
    let ctx = self.unit_loops_mut().last().map(|l| (l.cond_start, l.scope_depth));
    let Some((cond_start, scope_depth)) = ctx else {
      return Err(self.error_at_prev("'continue' outside of a loop"));
    };
    self.discard_locals(scope_depth + 1);
    self.emit_loop_to(cond_start);
    Ok(())
  }

  // -----------------------------------------------------------------------
  // definitions

  fn compile_var_definition(&mut self, is_static: bool) -> Result<(), Report> {
    self.consume(TokenKind::Id, "expect a variable name after 'var'")?;
    let name = self.prev().lexeme.to_string();
    if self.peek() == TokenKind::Comma {
      return Err(self.error_at_cur("'var' declares a single variable"));
    }

    // a `var` directly in a class body declares a field
    if self.units_len() == 1 {
      if let Some(class) = self.current_unit_class() {
        if is_static {
          return self.compile_static_field(class, &name);
        }
        return self.compile_instance_field(class, &name);
      }
    }

    if self.match_token(TokenKind::Assign) {
      self.expression(BindPower::Lowest)?;
    } else {
      self.write_op(Op::PushNull);
    }

    let index = self.declare_variable(&name)?;
    self.define_variable(index);
    Ok(())
  }

  /// Static fields are locals of the module unit under a mangled name, so
  /// every method of the class captures the same slot as an upvalue.
  fn compile_static_field(&mut self, class: usize, name: &str) -> Result<(), Report> {
    let mangled = static_field_id(&self.class_info(class).name, name);
    if self.local_exists(&mangled) {
      return Err(self.error_at_prev(format!("static field \"{name}\" redefinition")));
    }

    let slot = self.declare_local(&mangled)?;
    self.mark_local_persistent(slot);
    self.write_op(Op::PushNull);

    if self.match_token(TokenKind::Assign) {
      let var = self
        .find_variable(&mangled)?
        .expect("the static field was just declared");
      self.expression(BindPower::Lowest)?;
      self.emit_store_variable(var);
      self.write_op(Op::Pop);
    }
    Ok(())
  }

  fn compile_instance_field(&mut self, class: usize, name: &str) -> Result<(), Report> {
    let info = self.class_info(class);
    if info.fields.index_of(name).is_some() {
      return Err(self.error_at_prev(format!("instance field \"{name}\" redefinition")));
    }
    if info.fields.len() >= MAX_FIELDS_PER_CLASS {
      return Err(
        self.error_at_prev(format!("a class declares at most {MAX_FIELDS_PER_CLASS} fields")),
      );
    }
    self.class_info_mut(class).fields.ensure(name);

    if self.match_token(TokenKind::Assign) {
      return Err(self.error_at_prev("instance fields cannot be initialized here"));
    }
    Ok(())
  }

  fn compile_function_definition(&mut self) -> Result<(), Report> {
    if self.units_len() > 1 {
      return Err(self.error_at_prev("'fun' is only allowed at module scope"));
    }
    self.consume(TokenKind::Id, "expect a function name after 'fun'")?;
    let name = self.prev().lexeme.to_string();

    // functions live as module variables under a `Fn ` prefix; bare calls
    // resolve through it
    let index = self.declare_variable(&format!("Fn {name}"))?;

    self.push_unit(UnitKind::Function, &name);
    let mut sig = Signature::new(SigKind::Method, name, 0);
    self.consume(TokenKind::ParenL, "expect '(' after the function name")?;
    if !self.match_token(TokenKind::ParenR) {
      self.process_para_list(&mut sig)?;
      self.consume(TokenKind::ParenR, "expect ')' after the parameters")?;
    }
    let function = self.current_fn();
    self.vm.heap.function_mut(function).arg_count = sig.arg_count;

    self.consume(TokenKind::CurlyL, "expect '{' before the function body")?;
    self.compile_body(false)?;
    self.end_unit()?;

    self.define_variable(index);
    Ok(())
  }

  /// `import name` runs the module; `import name for a, b` additionally
  /// copies the named variables into this module.
  fn compile_import(&mut self) -> Result<(), Report> {
    self.consume(TokenKind::Id, "expect a module name after 'import'")?;
    let module_name = self.prev().lexeme.to_string();

    // run the module (a no-op when it is already loaded)
    self.emit_load_module_var("System")?;
    let name = self.vm.string_value(&module_name);
    self.emit_constant(name)?;
    self.emit_call(1, "importModule_(_)");
    self.write_op(Op::Pop);

    if !self.match_token(TokenKind::Kw_For) {
      return Ok(());
    }

    loop {
      self.consume(TokenKind::Id, "expect a variable name after 'for'")?;
      let var_name = self.prev().lexeme.to_string();
      let index = self.declare_variable(&var_name)?;

      self.emit_load_module_var("System")?;
      let module_arg = self.vm.string_value(&module_name);
      self.emit_constant(module_arg)?;
      let var_arg = self.vm.string_value(&var_name);
      self.emit_constant(var_arg)?;
      self.emit_call(2, "getModuleVariable_(_,_)");
      self.define_variable(index);

      if !self.match_token(TokenKind::Comma) {
        return Ok(());
      }
    }
  }

  // -----------------------------------------------------------------------
  // classes

  fn compile_class_definition(&mut self) -> Result<(), Report> {
    if self.unit_scope_depth() != -1 {
      return Err(self.error_at_prev("classes may only be defined at module scope"));
    }

    self.consume(TokenKind::Id, "expect a class name after 'class'")?;
    let name = self.prev().lexeme.to_string();
    let class_var = self.declare_variable(&name)?;

    let name_value = self.vm.string_value(&name);
    self.emit_constant(name_value)?;

    if self.match_token(TokenKind::Less) {
      self.expression(BindPower::Call)?;
    } else {
      self.emit_load_module_var("object")?;
    }

    // the field count is patched in once the body has been counted
    let field_operand = self.write_op_byte(Op::CreateClass, 255);
    self.define_variable(class_var);

    let class = self.classes_push(ClassInfo {
      name,
      fields: SymbolTable::new(),
      signature: None,
      instance_methods: Vec::new(),
      static_methods: Vec::new(),
    });
    self.set_unit_class(Some(class));
    self.enter_scope();

    self.consume(TokenKind::CurlyL, "expect '{' after the class declaration")?;
    while !self.match_token(TokenKind::CurlyR) {
      if self.peek() == TokenKind::Eof {
        return Err(self.error_at_cur("expect '}' closing the class body"));
      }
      self.compile_class_body(class, class_var)?;
    }

    let field_count = self.class_info(class).fields.len();
    let function = self.current_fn();
    self.vm.heap.function_mut(function).code[field_operand] = field_count as u8;

    self.leave_scope();
    self.set_unit_class(None);
    Ok(())
  }

  fn compile_class_body(&mut self, class: usize, class_var: usize) -> Result<(), Report> {
    let is_static = self.match_token(TokenKind::Kw_Static);
    if self.match_token(TokenKind::Kw_Var) {
      return self.compile_var_definition(is_static);
    }
    self.compile_method(class, class_var, is_static)
  }

  fn compile_method(&mut self, class: usize, class_var: usize, is_static: bool) -> Result<(), Report> {
    let Some(sign_fn) = rule(self.peek()).sign else {
      return Err(self.error_at_cur("expect a method definition"));
    };
    let name = self.cur().lexeme.to_string();
    self.advance();

    // the unit comes first: the signature declares parameters into it
    self.push_unit(UnitKind::Method, &name);
    let mut sig = Signature::new(SigKind::Getter, name, 0);
    sign_fn(self, &mut sig)?;

    if is_static && sig.kind == SigKind::Construct {
      return Err(self.error_at_prev("a constructor cannot be static"));
    }
    self.class_info_mut(class).signature = Some(sig.clone());

    let canonical = sig.canonical();
    let symbol = self.vm.method_names.ensure(&canonical);
    let duplicate = if is_static {
      self.class_info(class).static_methods.contains(&symbol)
    } else {
      self.class_info(class).instance_methods.contains(&symbol)
    };
    if duplicate {
      return Err(self.error_at_prev(format!("method \"{canonical}\" redefinition")));
    }
    if is_static {
      self.class_info_mut(class).static_methods.push(symbol);
    } else {
      self.class_info_mut(class).instance_methods.push(symbol);
    }

    let function = self.current_fn();
    self.vm.heap.function_mut(function).arg_count = sig.arg_count;

    self.consume(TokenKind::CurlyL, "expect '{' opening the method body")?;
    self.compile_body(sig.kind == SigKind::Construct)?;
    self.end_unit()?;

    self.emit_load_variable(Variable {
      scope: VarScope::Module,
      index: class_var,
    });
    let bind_op = if is_static {
      Op::StaticMethod
    } else {
      Op::InstanceMethod
    };
    self.write_op_short(bind_op, symbol);

    if sig.kind == SigKind::Construct {
      self.emit_constructor_stub(&sig, symbol, class_var)?;
    }
    Ok(())
  }

  /// The meta-class side of `new(...)`: allocate the instance, then run the
  /// initializer (the instance method bound under the same signature) on it.
  fn emit_constructor_stub(
    &mut self,
    sig: &Signature,
    symbol: usize,
    class_var: usize,
  ) -> Result<(), Report> {
    self.push_unit(UnitKind::Method, "new");
    let function = self.current_fn();
    {
      let f = self.vm.heap.function_mut(function);
      f.arg_count = sig.arg_count;
      f.max_stack = sig.arg_count + 2;
    }
    self.set_unit_slots(sig.arg_count as i32 + 1);

    self.write_op(Op::Construct);
    self.write_op_short(Op::call(sig.arg_count), symbol);
    self.write_op(Op::Return);
    self.end_unit()?;

    self.emit_load_variable(Variable {
      scope: VarScope::Module,
      index: class_var,
    });
    self.write_op_short(Op::StaticMethod, symbol);
    Ok(())
  }
}

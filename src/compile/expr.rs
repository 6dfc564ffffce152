//! Expression compilation: the Pratt rules and denotation methods.

use diag::Report;
use syntax::{TokenKind, TokenValue};

use crate::compile::{BindPower, Compiler, SigKind, Signature, UnitKind, MAX_ARGS};
use crate::op::Op;
use crate::value::Value;

type DenotationFn = fn(&mut Compiler<'_, '_>, bool) -> Result<(), Report>;
type SignatureFn = fn(&mut Compiler<'_, '_>, &mut Signature) -> Result<(), Report>;

/// How one token kind binds in expressions: its left binding power, its
/// prefix (`nud`) and infix (`led`) denotations, and — when the token can
/// name a method in a class body — its signature parser.
pub(crate) struct Rule {
  pub lbp: BindPower,
  pub nud: Option<DenotationFn>,
  pub led: Option<DenotationFn>,
  pub sign: Option<SignatureFn>,
  /// The operator's method name; `==` compiles to a call of `==(_)`.
  pub id: &'static str,
}

const UNUSED: Rule = Rule {
  lbp: BindPower::None,
  nud: None,
  led: None,
  sign: None,
  id: "",
};

fn prefix(nud: DenotationFn) -> Rule {
  Rule {
    nud: Some(nud),
    ..UNUSED
  }
}

fn prefix_operator(id: &'static str) -> Rule {
  Rule {
    nud: Some(|c, a| c.unary_operator(a)),
    sign: Some(|c, s| c.unary_method_signature(s)),
    id,
    ..UNUSED
  }
}

fn infix(lbp: BindPower, led: DenotationFn) -> Rule {
  Rule {
    lbp,
    led: Some(led),
    ..UNUSED
  }
}

fn infix_operator(id: &'static str, lbp: BindPower) -> Rule {
  Rule {
    lbp,
    led: Some(|c, a| c.infix_operator(a)),
    sign: Some(|c, s| c.infix_method_signature(s)),
    id,
    ..UNUSED
  }
}

/// Both prefix and infix, like `-`.
fn mix_operator(id: &'static str) -> Rule {
  Rule {
    lbp: BindPower::Term,
    nud: Some(|c, a| c.unary_operator(a)),
    led: Some(|c, a| c.infix_operator(a)),
    sign: Some(|c, s| c.mix_method_signature(s)),
    id,
  }
}

pub(crate) fn rule(kind: TokenKind) -> Rule {
  match kind {
    TokenKind::Num | TokenKind::Str => prefix(|c, a| c.literal(a)),
    TokenKind::Interpolation => prefix(|c, a| c.string_interpolation(a)),
    TokenKind::Id => Rule {
      nud: Some(|c, a| c.id(a)),
      sign: Some(|c, s| c.id_method_signature(s)),
      ..UNUSED
    },
    TokenKind::Kw_True | TokenKind::Kw_False => prefix(|c, a| c.boolean(a)),
    TokenKind::Kw_Null => prefix(|c, a| c.null(a)),
    TokenKind::Kw_This => prefix(|c, a| c.this(a)),
    TokenKind::Kw_Super => prefix(|c, a| c.super_(a)),
    TokenKind::ParenL => prefix(|c, a| c.parentheses(a)),
    TokenKind::SquareL => Rule {
      lbp: BindPower::Call,
      nud: Some(|c, a| c.list_literal(a)),
      led: Some(|c, a| c.subscript(a)),
      sign: Some(|c, s| c.subscript_method_signature(s)),
      id: "",
    },
    TokenKind::CurlyL => prefix(|c, a| c.map_literal(a)),
    TokenKind::Dot => infix(BindPower::Call, |c, a| c.call_entry(a)),
    TokenKind::DotDot => infix_operator("..", BindPower::Range),
    TokenKind::Plus => infix_operator("+", BindPower::Term),
    TokenKind::Minus => mix_operator("-"),
    TokenKind::Star => infix_operator("*", BindPower::Factor),
    TokenKind::Slash => infix_operator("/", BindPower::Factor),
    TokenKind::Percent => infix_operator("%", BindPower::Factor),
    TokenKind::Amp => infix_operator("&", BindPower::BitAnd),
    TokenKind::Pipe => infix_operator("|", BindPower::BitOr),
    TokenKind::Tilde => prefix_operator("~"),
    TokenKind::ShiftL => infix_operator("<<", BindPower::BitShift),
    TokenKind::ShiftR => infix_operator(">>", BindPower::BitShift),
    TokenKind::AndAnd => infix(BindPower::LogicAnd, |c, a| c.logic_and(a)),
    TokenKind::PipePipe => infix(BindPower::LogicOr, |c, a| c.logic_or(a)),
    TokenKind::Bang => prefix_operator("!"),
    TokenKind::EqualEqual => infix_operator("==", BindPower::Equal),
    TokenKind::BangEqual => infix_operator("!=", BindPower::Equal),
    TokenKind::More => infix_operator(">", BindPower::Cmp),
    TokenKind::MoreEqual => infix_operator(">=", BindPower::Cmp),
    TokenKind::Less => infix_operator("<", BindPower::Cmp),
    TokenKind::LessEqual => infix_operator("<=", BindPower::Cmp),
    TokenKind::Kw_Is => infix_operator("is", BindPower::Is),
    TokenKind::Question => infix(BindPower::Assign, |c, a| c.condition(a)),
    _ => UNUSED,
  }
}

impl<'vm, 'src> Compiler<'vm, 'src> {
  /// The Pratt core: parse the prefix denotation, then fold infix
  /// denotations while the next token binds tighter than `rbp`.
  pub(crate) fn expression(&mut self, rbp: BindPower) -> Result<(), Report> {
    // deeply nested expressions recurse through here; grow the stack instead
    // of crashing on pathological input
    #[cfg(feature = "check-recursion-limit")]
    return stacker::maybe_grow(32 * 1024, 1 << 20, || self.expression_inner(rbp));
    #[cfg(not(feature = "check-recursion-limit"))]
    self.expression_inner(rbp)
  }

  fn expression_inner(&mut self, rbp: BindPower) -> Result<(), Report> {
    let Some(nud) = rule(self.peek()).nud else {
      return Err(self.error_at_cur("expect an expression"));
    };
    self.advance();

    // assignment targets only parse while nothing binds to our left
    let can_assign = rbp < BindPower::Assign;
    nud(self, can_assign)?;

    while rbp < rule(self.peek()).lbp {
      let Some(led) = rule(self.peek()).led else {
        return Err(self.error_at_cur("expect an infix operator"));
      };
      self.advance();
      led(self, can_assign)?;
    }
    Ok(())
  }

  // -----------------------------------------------------------------------
  // prefix denotations

  fn literal(&mut self, _can_assign: bool) -> Result<(), Report> {
    match self.prev().value.clone() {
      Some(TokenValue::Num(n)) => self.emit_constant(Value::Num(n)),
      Some(TokenValue::Str(s)) => {
        let value = self.vm.string_value(&s);
        self.emit_constant(value)
      }
      None => Err(self.error_at_prev("literal token has no value")),
    }
  }

  /// `"a %(e1) b %(e2) c"` compiles as `["a ", e1, " b ", e2, " c"].join()`.
  fn string_interpolation(&mut self, _can_assign: bool) -> Result<(), Report> {
    self.emit_load_core_var("List");
    self.emit_call(0, "new()");

    loop {
      // the literal segment carried by the interpolation token
      self.literal(false)?;
      self.emit_call(1, "addCore_(_)");

      // the embedded expression
      self.expression(BindPower::Lowest)?;
      self.emit_call(1, "addCore_(_)");

      if !self.match_token(TokenKind::Interpolation) {
        break;
      }
    }

    self.consume(TokenKind::Str, "expect a string segment ending the interpolation")?;
    self.literal(false)?;
    self.emit_call(1, "addCore_(_)");

    self.emit_call(0, "join()");
    Ok(())
  }

  fn boolean(&mut self, _can_assign: bool) -> Result<(), Report> {
    let op = if self.prev().kind == TokenKind::Kw_True {
      Op::PushTrue
    } else {
      Op::PushFalse
    };
    self.write_op(op);
    Ok(())
  }

  fn null(&mut self, _can_assign: bool) -> Result<(), Report> {
    self.write_op(Op::PushNull);
    Ok(())
  }

  fn this(&mut self, _can_assign: bool) -> Result<(), Report> {
    if self.enclosing_class().is_none() {
      return Err(self.error_at_prev("\"this\" is only available inside a method"));
    }
    self.emit_load_this()
  }

  fn super_(&mut self, can_assign: bool) -> Result<(), Report> {
    let Some(class) = self.enclosing_class() else {
      return Err(self.error_at_prev("\"super\" is only available inside a method"));
    };

    // args[0] must be `this` even for a super dispatch
    self.emit_load_this()?;

    if self.match_token(TokenKind::Dot) {
      // super.name(...)
      self.consume(TokenKind::Id, "expect a method name after \"super.\"")?;
      let name = self.prev().lexeme.to_string();
      self.emit_method_call(&name, Op::Super0, can_assign)
    } else {
      // bare super(...): the superclass method with this method's signature
      let Some(signature) = self.class_info(class).signature.clone() else {
        return Err(self.error_at_prev("bare \"super\" outside a method body"));
      };
      self.emit_getter_method_call(&signature, Op::Super0)
    }
  }

  fn parentheses(&mut self, _can_assign: bool) -> Result<(), Report> {
    self.expression(BindPower::Lowest)?;
    self.consume(TokenKind::ParenR, "expect ')' after the expression")
  }

  fn list_literal(&mut self, _can_assign: bool) -> Result<(), Report> {
    self.emit_load_core_var("List");
    self.emit_call(0, "new()");

    loop {
      if self.peek() == TokenKind::SquareR {
        break;
      }
      self.expression(BindPower::Lowest)?;
      self.emit_call(1, "addCore_(_)");
      if !self.match_token(TokenKind::Comma) {
        break;
      }
    }
    self.consume(TokenKind::SquareR, "expect ']' after the list elements")
  }

  fn map_literal(&mut self, _can_assign: bool) -> Result<(), Report> {
    self.emit_load_core_var("Map");
    self.emit_call(0, "new()");

    loop {
      if self.peek() == TokenKind::CurlyR {
        break;
      }
      // keys bind tightly so `k: v` never swallows the colon
      self.expression(BindPower::Unary)?;
      self.consume(TokenKind::Colon, "expect ':' between key and value")?;
      self.expression(BindPower::Lowest)?;
      self.emit_call(2, "addCore_(_,_)");
      if !self.match_token(TokenKind::Comma) {
        break;
      }
    }
    self.consume(TokenKind::CurlyR, "expect '}' after the map entries")
  }

  // -----------------------------------------------------------------------
  // infix denotations

  fn subscript(&mut self, can_assign: bool) -> Result<(), Report> {
    if self.match_token(TokenKind::SquareR) {
      return Err(self.error_at_prev("a subscript needs at least one index"));
    }

    let mut sig = Signature::new(SigKind::Subscript, "", 0);
    self.process_arg_list(&mut sig)?;
    self.consume(TokenKind::SquareR, "expect ']' after the subscript")?;

    if can_assign && self.match_token(TokenKind::Assign) {
      sig.kind = SigKind::SubscriptSetter;
      // the right-hand side is one more argument
      sig.arg_count += 1;
      if sig.arg_count > MAX_ARGS {
        return Err(self.error_at_prev(format!("more than {MAX_ARGS} arguments")));
      }
      self.expression(BindPower::Lowest)?;
    }
    self.emit_call_by_signature(&sig, Op::Call0)
  }

  fn call_entry(&mut self, can_assign: bool) -> Result<(), Report> {
    self.consume(TokenKind::Id, "expect a method name after '.'")?;
    let name = self.prev().lexeme.to_string();
    self.emit_method_call(&name, Op::Call0, can_assign)
  }

  fn logic_and(&mut self, _can_assign: bool) -> Result<(), Report> {
    let placeholder = self.emit_placeholder(Op::And);
    self.expression(BindPower::LogicAnd)?;
    self.patch_placeholder(placeholder);
    Ok(())
  }

  fn logic_or(&mut self, _can_assign: bool) -> Result<(), Report> {
    let placeholder = self.emit_placeholder(Op::Or);
    self.expression(BindPower::LogicOr)?;
    self.patch_placeholder(placeholder);
    Ok(())
  }

  /// `cond ? then : else`.
  fn condition(&mut self, _can_assign: bool) -> Result<(), Report> {
    let false_branch = self.emit_placeholder(Op::JumpIfFalse);
    self.expression(BindPower::Lowest)?;
    self.consume(TokenKind::Colon, "expect ':' after the true branch")?;

    let end = self.emit_placeholder(Op::Jump);
    self.patch_placeholder(false_branch);
    self.expression(BindPower::Lowest)?;
    self.patch_placeholder(end);
    Ok(())
  }

  fn infix_operator(&mut self, _can_assign: bool) -> Result<(), Report> {
    let r = rule(self.prev().kind);

    // infix operators bind both sides equally
    self.expression(r.lbp)?;

    let sig = Signature::new(SigKind::Method, r.id, 1);
    self.emit_call_by_signature(&sig, Op::Call0)
  }

  fn unary_operator(&mut self, _can_assign: bool) -> Result<(), Report> {
    let r = rule(self.prev().kind);
    self.expression(BindPower::Unary)?;
    self.emit_call(0, r.id);
    Ok(())
  }

  // -----------------------------------------------------------------------
  // identifiers

  /// Resolution order: locals and upvalues, instance fields, static fields,
  /// sibling methods on `this`, module variables, then `Fn `-prefixed
  /// functions for bare calls; an unknown name is forward-declared with the
  /// referencing line.
  fn id(&mut self, can_assign: bool) -> Result<(), Report> {
    let name = self.prev().lexeme.to_string();
    let class = self.enclosing_class();

    if let Some(var) = self.resolve_local_or_upvalue(&name)? {
      return self.emit_load_or_store(can_assign, var);
    }

    if let Some(class) = class {
      // instance field
      if let Some(field) = self.class_info(class).fields.index_of(&name) {
        let mut is_load = true;
        if can_assign && self.match_token(TokenKind::Assign) {
          is_load = false;
          self.expression(BindPower::Lowest)?;
        }
        if self.units_len() > 1 {
          // inside a method: the receiver is local 0
          let op = if is_load { Op::LoadThisField } else { Op::StoreThisField };
          self.write_op_byte(op, field);
        } else {
          self.emit_load_this()?;
          let op = if is_load { Op::LoadField } else { Op::StoreField };
          self.write_op_byte(op, field);
        }
        return Ok(());
      }

      // static field, stored under its mangled name
      let static_name = static_field_id(&self.class_info(class).name, &name);
      if let Some(var) = self.find_variable(&static_name)? {
        return self.emit_load_or_store(can_assign, var);
      }

      // a lowercase name inside a class body is a sibling method on `this`
      if name.starts_with(|c: char| c.is_ascii_lowercase()) {
        self.emit_load_this()?;
        return self.emit_method_call(&name, Op::Call0, can_assign);
      }
    }

    if let Some(index) = self.vm.heap.module(self.module).var_index(&name) {
      let var = super::Variable {
        scope: super::VarScope::Module,
        index,
      };
      return self.emit_load_or_store(can_assign, var);
    }

    // a bare call with no other resolution targets a `fun` definition
    let fn_name = format!("Fn {name}");
    if self.match_token(TokenKind::ParenL) {
      let Some(index) = self.vm.heap.module(self.module).var_index(&fn_name) else {
        return Err(self.error_at_prev(format!("undefined function \"{name}\"")));
      };
      self.write_op_short(Op::LoadModuleVar, index);

      let mut sig = Signature::new(SigKind::Method, "call", 0);
      if !self.match_token(TokenKind::ParenR) {
        self.process_arg_list(&mut sig)?;
        self.consume(TokenKind::ParenR, "expect ')' after the arguments")?;
      }
      return self.emit_call_by_signature(&sig, Op::Call0);
    }

    // referencing a `fun` as a value
    if let Some(index) = self.vm.heap.module(self.module).var_index(&fn_name) {
      let var = super::Variable {
        scope: super::VarScope::Module,
        index,
      };
      return self.emit_load_or_store(can_assign, var);
    }

    // possibly defined further down the module: remember the line for the
    // end-of-module check
    let line = self.line_of_prev();
    let index = self.vm.declare_module_var(self.module, &name, line);
    let var = super::Variable {
      scope: super::VarScope::Module,
      index,
    };
    self.emit_load_or_store(can_assign, var)
  }

  // -----------------------------------------------------------------------
  // call emission

  /// A getter or a full method call: `name`, `name(args)`, optionally with a
  /// trailing block argument `{ |params| body }`.
  pub(crate) fn emit_getter_method_call(
    &mut self,
    sig: &Signature,
    op: Op,
  ) -> Result<(), Report> {
    let mut call = Signature::new(SigKind::Getter, sig.name.clone(), 0);

    if self.match_token(TokenKind::ParenL) {
      call.kind = SigKind::Method;
      if !self.match_token(TokenKind::ParenR) {
        self.process_arg_list(&mut call)?;
        self.consume(TokenKind::ParenR, "expect ')' after the arguments")?;
      }
    }

    // a trailing block compiles to a function passed as the last argument
    if self.match_token(TokenKind::CurlyL) {
      call.kind = SigKind::Method;
      call.arg_count += 1;

      self.push_unit(UnitKind::Function, &format!("{} block", call.name));
      let mut block_sig = Signature::new(SigKind::Method, "", 0);
      if self.match_token(TokenKind::Pipe) {
        self.process_para_list(&mut block_sig)?;
        self.consume(TokenKind::Pipe, "expect '|' after the block parameters")?;
      }
      let function = self.current_fn();
      self.vm.heap.function_mut(function).arg_count = block_sig.arg_count;
      self.compile_body(false)?;
      self.end_unit()?;
    }

    // inside a constructor only `super(...)` may be called bare
    if sig.kind == SigKind::Construct {
      if call.kind != SigKind::Method {
        return Err(self.error_at_prev("a super call inside a constructor needs parentheses"));
      }
      call.kind = SigKind::Construct;
    }

    self.emit_call_by_signature(&call, op)
  }

  /// A method call that may also be a setter: `name = value`.
  pub(crate) fn emit_method_call(
    &mut self,
    name: &str,
    op: Op,
    can_assign: bool,
  ) -> Result<(), Report> {
    if can_assign && self.match_token(TokenKind::Assign) {
      let sig = Signature::new(SigKind::Setter, name, 1);
      self.expression(BindPower::Lowest)?;
      self.emit_call_by_signature(&sig, op)
    } else {
      let sig = Signature::new(SigKind::Getter, name, 0);
      self.emit_getter_method_call(&sig, op)
    }
  }

  /// Compile each argument onto the stack, counting them into `sig`.
  pub(crate) fn process_arg_list(&mut self, sig: &mut Signature) -> Result<(), Report> {
    loop {
      sig.arg_count += 1;
      if sig.arg_count > MAX_ARGS {
        return Err(self.error_at_cur(format!("more than {MAX_ARGS} arguments")));
      }
      self.expression(BindPower::Lowest)?;
      if !self.match_token(TokenKind::Comma) {
        return Ok(());
      }
    }
  }

  /// Declare each parameter as a local, counting them into `sig`.
  pub(crate) fn process_para_list(&mut self, sig: &mut Signature) -> Result<(), Report> {
    loop {
      sig.arg_count += 1;
      if sig.arg_count > MAX_ARGS {
        return Err(self.error_at_cur(format!("more than {MAX_ARGS} parameters")));
      }
      self.consume(TokenKind::Id, "expect a parameter name")?;
      let name = self.prev().lexeme.to_string();
      self.declare_variable(&name)?;
      if !self.match_token(TokenKind::Comma) {
        return Ok(());
      }
    }
  }

  // -----------------------------------------------------------------------
  // method signatures

  /// `=` after a signature turns it into a setter with one parameter.
  pub(crate) fn try_setter(&mut self, sig: &mut Signature) -> Result<bool, Report> {
    if !self.match_token(TokenKind::Assign) {
      return Ok(false);
    }
    sig.kind = if sig.kind == SigKind::Subscript {
      SigKind::SubscriptSetter
    } else {
      SigKind::Setter
    };

    self.consume(TokenKind::ParenL, "expect '(' after '='")?;
    self.consume(TokenKind::Id, "expect the setter parameter name")?;
    let name = self.prev().lexeme.to_string();
    self.declare_variable(&name)?;
    self.consume(TokenKind::ParenR, "expect ')' after the setter parameter")?;
    sig.arg_count += 1;
    Ok(true)
  }

  pub(crate) fn id_method_signature(&mut self, sig: &mut Signature) -> Result<(), Report> {
    sig.kind = SigKind::Getter;

    if sig.name == "new" {
      if self.match_token(TokenKind::Assign) {
        return Err(self.error_at_prev("a constructor cannot be a setter"));
      }
      if !self.match_token(TokenKind::ParenL) {
        return Err(self.error_at_prev("a constructor must be parenthesized"));
      }
      sig.kind = SigKind::Construct;
      if self.match_token(TokenKind::ParenR) {
        return Ok(());
      }
    } else {
      if self.try_setter(sig)? {
        return Ok(());
      }
      if !self.match_token(TokenKind::ParenL) {
        // a plain name is a getter
        return Ok(());
      }
      sig.kind = SigKind::Method;
      if self.match_token(TokenKind::ParenR) {
        return Ok(());
      }
    }

    self.process_para_list(sig)?;
    self.consume(TokenKind::ParenR, "expect ')' after the parameters")
  }

  pub(crate) fn unary_method_signature(&mut self, sig: &mut Signature) -> Result<(), Report> {
    sig.kind = SigKind::Getter;
    Ok(())
  }

  pub(crate) fn infix_method_signature(&mut self, sig: &mut Signature) -> Result<(), Report> {
    sig.kind = SigKind::Method;
    sig.arg_count = 1;
    self.consume(TokenKind::ParenL, "expect '(' after the operator")?;
    self.consume(TokenKind::Id, "expect the parameter name")?;
    let name = self.prev().lexeme.to_string();
    self.declare_variable(&name)?;
    self.consume(TokenKind::ParenR, "expect ')' after the parameter")
  }

  pub(crate) fn mix_method_signature(&mut self, sig: &mut Signature) -> Result<(), Report> {
    sig.kind = SigKind::Getter;
    if self.match_token(TokenKind::ParenL) {
      sig.kind = SigKind::Method;
      sig.arg_count = 1;
      self.consume(TokenKind::Id, "expect the parameter name")?;
      let name = self.prev().lexeme.to_string();
      self.declare_variable(&name)?;
      self.consume(TokenKind::ParenR, "expect ')' after the parameter")?;
    }
    Ok(())
  }

  pub(crate) fn subscript_method_signature(&mut self, sig: &mut Signature) -> Result<(), Report> {
    sig.kind = SigKind::Subscript;
    sig.name.clear();
    self.process_para_list(sig)?;
    self.consume(TokenKind::SquareR, "expect ']' after the index parameters")?;
    self.try_setter(sig)?;
    Ok(())
  }
}

/// Static fields live as module-unit locals named `Cls<class> <field>`; the
/// space keeps user identifiers from colliding and lets the name cross the
/// class boundary during upvalue resolution.
pub(crate) fn static_field_id(class_name: &str, field: &str) -> String {
  format!("Cls{class_name} {field}")
}

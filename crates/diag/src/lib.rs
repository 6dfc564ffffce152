//! Error reporting for Suzume.
//!
//! Every failure in the pipeline is a [`Report`]: a category, a message, and
//! optionally the module name and source line it points at. Reports render as
//! a single diagnostic line, e.g.
//!
//! ```text
//! [fib.sz:3] Compile error: identifier "n" redefinition!
//! ```

mod style;

use std::fmt::{self, Display};

use beef::lean::Cow;
use span::{LineIndex, Span};
use thiserror::Error;

use crate::style::Style;

pub type Result<T, E = Report> = std::result::Result<T, E>;

/// The five failure categories of the pipeline.
///
/// Everything except [`Category::Runtime`] is fatal: the process reports and
/// exits non-zero. Runtime errors land in the offending fiber's error slot
/// and propagate through the fiber chain first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Category {
  #[error("IO error")]
  Io,
  #[error("Memory error")]
  Memory,
  #[error("Lex error")]
  Lex,
  #[error("Compile error")]
  Compile,
  #[error("Runtime error")]
  Runtime,
}

impl Category {
  pub fn is_fatal(&self) -> bool {
    !matches!(self, Category::Runtime)
  }
}

#[derive(Clone, Debug)]
pub struct Report {
  pub category: Category,
  pub message: Cow<'static, str>,
  pub module: Option<String>,
  pub line: Option<u32>,
}

impl std::error::Error for Report {}

impl Report {
  pub fn new(category: Category, message: impl Into<Cow<'static, str>>) -> Report {
    Report {
      category,
      message: message.into(),
      module: None,
      line: None,
    }
  }

  pub fn io(message: impl Into<Cow<'static, str>>) -> Report {
    Report::new(Category::Io, message)
  }

  pub fn memory(message: impl Into<Cow<'static, str>>) -> Report {
    Report::new(Category::Memory, message)
  }

  pub fn lex(message: impl Into<Cow<'static, str>>) -> Report {
    Report::new(Category::Lex, message)
  }

  pub fn compile(message: impl Into<Cow<'static, str>>) -> Report {
    Report::new(Category::Compile, message)
  }

  pub fn runtime(message: impl Into<Cow<'static, str>>) -> Report {
    Report::new(Category::Runtime, message)
  }

  pub fn in_module(mut self, module: impl Into<String>) -> Report {
    self.module = Some(module.into());
    self
  }

  pub fn at_line(mut self, line: u32) -> Report {
    self.line = Some(line);
    self
  }

  pub fn at(self, span: Span, lines: &LineIndex) -> Report {
    let line = lines.line_of(span);
    self.at_line(line)
  }

  /// Render the single-line diagnostic, with ANSI color when `color` is set.
  pub fn render(&self, color: bool) -> String {
    let style = Style::new(color);
    let mut out = String::new();
    let location = match (&self.module, self.line) {
      (Some(module), Some(line)) => Some(format!("[{module}:{line}]")),
      (Some(module), None) => Some(format!("[{module}]")),
      (None, Some(line)) => Some(format!("[line {line}]")),
      (None, None) => None,
    };
    if let Some(location) = location {
      out.push_str(&format!("{} ", style.location(location)));
    }
    out.push_str(&format!("{}: {}", style.level(self.category), self.message));
    out
  }
}

// Display stays free of escape codes so logs and tests see plain text.
impl Display for Report {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.render(false))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn render_with_location() {
    let report = Report::compile("identifier \"x\" redefinition!")
      .in_module("main.sz")
      .at_line(3);
    assert_eq!(
      report.to_string(),
      "[main.sz:3] Compile error: identifier \"x\" redefinition!"
    );
  }

  #[test]
  fn render_bare() {
    let report = Report::io("could not open file \"missing.sz\"");
    assert_eq!(
      report.to_string(),
      "IO error: could not open file \"missing.sz\""
    );
  }

  #[test]
  fn line_from_span() {
    let lines = LineIndex::new("var a\nvar b\n");
    let report = Report::compile("oops").at(Span::from(6..11), &lines);
    assert_eq!(report.line, Some(2));
  }

  #[test]
  fn fatal_categories() {
    assert!(Category::Io.is_fatal());
    assert!(Category::Memory.is_fatal());
    assert!(Category::Lex.is_fatal());
    assert!(Category::Compile.is_fatal());
    assert!(!Category::Runtime.is_fatal());
  }
}

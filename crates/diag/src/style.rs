use std::fmt::Display;

use owo_colors::OwoColorize;

pub struct Style {
  enabled: bool,
}

impl Style {
  pub fn new(enabled: bool) -> Style {
    Style { enabled }
  }

  pub fn level(&self, inner: impl Display) -> String {
    if self.enabled {
      inner.red().bold().to_string()
    } else {
      inner.to_string()
    }
  }

  pub fn location(&self, inner: impl Display) -> String {
    if self.enabled {
      inner.dimmed().to_string()
    } else {
      inner.to_string()
    }
  }
}

#![allow(non_camel_case_types)]

use std::fmt;

use beef::lean::Cow;
use logos::Logos;
use span::Span;

/// How deep `%( ... )` expressions may nest inside one another.
const MAX_INTERPOLATION_NESTING: usize = 8;

#[derive(Clone, Debug)]
pub struct Token<'src> {
  pub kind: TokenKind,
  pub lexeme: Cow<'src, str>,
  pub span: Span,
  /// Pre-parsed literal payload for `Num`, `Str` and `Interpolation` tokens.
  pub value: Option<TokenValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenValue {
  Num(f64),
  Str(String),
}

impl TokenValue {
  pub fn as_num(&self) -> Option<f64> {
    match self {
      TokenValue::Num(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      TokenValue::Str(s) => Some(s),
      _ => None,
    }
  }
}

#[derive(Debug)]
pub struct Error {
  pub span: Span,
  pub message: String,
}

pub struct Lexer;

impl Lexer {
  /// Lex `src` into an EOF-terminated token stream.
  pub fn lex(src: &str) -> Result<Vec<Token<'_>>, Vec<Error>> {
    let mut tokens = vec![];
    let mut errors = vec![];
    // open interpolations; each entry counts unclosed `(` inside one `%(`
    let mut interpolations: Vec<u32> = vec![];

    let mut inner = logos::Lexer::<Raw>::new(src);
    while let Some(raw) = inner.next() {
      let span = Span::from(inner.span());

      match raw {
        Raw::_Error => {
          errors.push(Error {
            span,
            message: format!("unexpected character {:?}", inner.slice()),
          });
        }
        Raw::_StrStart => {
          match scan_string(inner.remainder()) {
            Ok(scan) => {
              inner.bump(scan.consumed);
              let span = Span::from(span.start..span.end + scan.consumed);
              if scan.interpolated {
                if interpolations.len() == MAX_INTERPOLATION_NESTING {
                  errors.push(Error {
                    span,
                    message: format!(
                      "interpolation may only nest {MAX_INTERPOLATION_NESTING} levels deep"
                    ),
                  });
                }
                interpolations.push(1);
              }
              tokens.push(Token {
                kind: if scan.interpolated {
                  TokenKind::Interpolation
                } else {
                  TokenKind::Str
                },
                lexeme: Cow::borrowed(&src[span.range()]),
                span,
                value: Some(TokenValue::Str(scan.text)),
              });
            }
            Err(e) => {
              errors.push(Error {
                span: Span::from(span.start..span.start + 1 + e.offset),
                message: e.message,
              });
              // an unterminated string poisons the rest of the input
              break;
            }
          }
        }
        Raw::ParenL => {
          if let Some(depth) = interpolations.last_mut() {
            *depth += 1;
          }
          tokens.push(token(raw, src, span));
        }
        Raw::ParenR => {
          let closes_interpolation = match interpolations.last_mut() {
            Some(depth) => {
              *depth -= 1;
              *depth == 0
            }
            None => false,
          };
          if !closes_interpolation {
            tokens.push(token(raw, src, span));
            continue;
          }
          // the `)` ends an embedded expression: the enclosing string
          // resumes right after it and the paren itself is not a token
          interpolations.pop();
          match scan_string(inner.remainder()) {
            Ok(scan) => {
              inner.bump(scan.consumed);
              let span = Span::from(span.start..span.end + scan.consumed);
              if scan.interpolated {
                interpolations.push(1);
              }
              tokens.push(Token {
                kind: if scan.interpolated {
                  TokenKind::Interpolation
                } else {
                  TokenKind::Str
                },
                lexeme: Cow::borrowed(&src[span.range()]),
                span,
                value: Some(TokenValue::Str(scan.text)),
              });
            }
            Err(e) => {
              errors.push(Error {
                span: Span::from(span.start..span.start + 1 + e.offset),
                message: e.message,
              });
              break;
            }
          }
        }
        Raw::Num => {
          let lexeme = inner.slice();
          match parse_number(lexeme) {
            Ok(n) => tokens.push(Token {
              kind: TokenKind::Num,
              lexeme: Cow::borrowed(lexeme),
              span,
              value: Some(TokenValue::Num(n)),
            }),
            Err(message) => errors.push(Error { span, message }),
          }
        }
        _ => tokens.push(token(raw, src, span)),
      }
    }

    if !interpolations.is_empty() && errors.is_empty() {
      errors.push(Error {
        span: Span::from(src.len()..src.len()),
        message: "unterminated interpolation expression".to_string(),
      });
    }

    if !errors.is_empty() {
      return Err(errors);
    }

    tokens.push(Token {
      kind: TokenKind::Eof,
      lexeme: Cow::borrowed(""),
      span: Span::from(src.len()..src.len()),
      value: None,
    });
    Ok(tokens)
  }
}

fn token<'src>(raw: Raw, src: &'src str, span: Span) -> Token<'src> {
  Token {
    kind: raw.into(),
    lexeme: Cow::borrowed(&src[span.range()]),
    span,
    value: None,
  }
}

struct StrScan {
  /// Escape-processed contents of the segment.
  text: String,
  /// Bytes consumed past the opening delimiter, including the closing `"`
  /// or `%(`.
  consumed: usize,
  /// The segment ended at `%(`, so an embedded expression follows.
  interpolated: bool,
}

struct StrError {
  offset: usize,
  message: String,
}

/// Scan a string segment starting just past a `"` (or past the `)` which
/// closed an embedded expression) up to the closing `"` or the next `%(`.
fn scan_string(rem: &str) -> Result<StrScan, StrError> {
  let bytes = rem.as_bytes();
  let mut text = String::new();
  let mut i = 0;
  while i < bytes.len() {
    match bytes[i] {
      b'"' => {
        return Ok(StrScan {
          text,
          consumed: i + 1,
          interpolated: false,
        })
      }
      b'%' => {
        if bytes.get(i + 1) != Some(&b'(') {
          return Err(StrError {
            offset: i,
            message: "'%' in a string must be followed by '('".to_string(),
          });
        }
        return Ok(StrScan {
          text,
          consumed: i + 2,
          interpolated: true,
        });
      }
      b'\\' => {
        let escape = bytes.get(i + 1).copied().ok_or_else(|| StrError {
          offset: i,
          message: "unterminated string".to_string(),
        })?;
        i += 2;
        match escape {
          b'"' => text.push('"'),
          b'\\' => text.push('\\'),
          b'%' => text.push('%'),
          b'0' => text.push('\0'),
          b'a' => text.push('\x07'),
          b'b' => text.push('\x08'),
          b'f' => text.push('\x0c'),
          b'n' => text.push('\n'),
          b'r' => text.push('\r'),
          b't' => text.push('\t'),
          b'v' => text.push('\x0b'),
          b'u' => {
            let digits = rem.get(i..i + 4).ok_or_else(|| StrError {
              offset: i,
              message: "'\\u' expects 4 hex digits".to_string(),
            })?;
            let code = u32::from_str_radix(digits, 16).map_err(|_| StrError {
              offset: i,
              message: "'\\u' expects 4 hex digits".to_string(),
            })?;
            let c = char::from_u32(code).ok_or_else(|| StrError {
              offset: i,
              message: format!("'\\u{digits}' is not a valid code point"),
            })?;
            text.push(c);
            i += 4;
          }
          _ => {
            return Err(StrError {
              offset: i - 2,
              message: format!("unsupported escape '\\{}'", escape as char),
            })
          }
        }
      }
      _ => {
        // copy one whole UTF-8 sequence through untouched
        let c = rem[i..].chars().next().expect("scan is on a char boundary");
        text.push(c);
        i += c.len_utf8();
      }
    }
  }
  Err(StrError {
    offset: rem.len(),
    message: "unterminated string".to_string(),
  })
}

fn parse_number(lexeme: &str) -> Result<f64, String> {
  if let Some(hex) = lexeme.strip_prefix("0x") {
    return u64::from_str_radix(hex, 16)
      .map(|n| n as f64)
      .map_err(|_| format!("invalid hex literal \"{lexeme}\""));
  }
  lexeme
    .parse::<f64>()
    .map_err(|_| format!("invalid number literal \"{lexeme}\""))
}

/// The kinds the compiler sees. `Str` and `Interpolation` are produced by
/// the string scanner, never by the raw lexer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
  // Literals
  Num,
  Str,
  Interpolation,
  Id,

  // Keywords
  Kw_Var,
  Kw_Fun,
  Kw_If,
  Kw_Else,
  Kw_True,
  Kw_False,
  Kw_While,
  Kw_For,
  Kw_Break,
  Kw_Continue,
  Kw_Return,
  Kw_Null,
  Kw_Class,
  Kw_This,
  Kw_Static,
  Kw_Is,
  Kw_Super,
  Kw_Import,

  // Brackets
  ParenL,
  ParenR,
  SquareL,
  SquareR,
  CurlyL,
  CurlyR,

  // Punctuation
  Dot,
  DotDot,
  Comma,
  Colon,
  Question,

  // Operators
  Assign,
  Plus,
  Minus,
  Star,
  Slash,
  Percent,
  Amp,
  Pipe,
  Tilde,
  ShiftL,
  ShiftR,
  AndAnd,
  PipePipe,
  Bang,
  EqualEqual,
  BangEqual,
  More,
  MoreEqual,
  Less,
  LessEqual,

  Eof,
}

impl fmt::Display for TokenKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      TokenKind::Num => "number",
      TokenKind::Str => "string",
      TokenKind::Interpolation => "interpolation",
      TokenKind::Id => "identifier",
      TokenKind::Kw_Var => "'var'",
      TokenKind::Kw_Fun => "'fun'",
      TokenKind::Kw_If => "'if'",
      TokenKind::Kw_Else => "'else'",
      TokenKind::Kw_True => "'true'",
      TokenKind::Kw_False => "'false'",
      TokenKind::Kw_While => "'while'",
      TokenKind::Kw_For => "'for'",
      TokenKind::Kw_Break => "'break'",
      TokenKind::Kw_Continue => "'continue'",
      TokenKind::Kw_Return => "'return'",
      TokenKind::Kw_Null => "'null'",
      TokenKind::Kw_Class => "'class'",
      TokenKind::Kw_This => "'this'",
      TokenKind::Kw_Static => "'static'",
      TokenKind::Kw_Is => "'is'",
      TokenKind::Kw_Super => "'super'",
      TokenKind::Kw_Import => "'import'",
      TokenKind::ParenL => "'('",
      TokenKind::ParenR => "')'",
      TokenKind::SquareL => "'['",
      TokenKind::SquareR => "']'",
      TokenKind::CurlyL => "'{'",
      TokenKind::CurlyR => "'}'",
      TokenKind::Dot => "'.'",
      TokenKind::DotDot => "'..'",
      TokenKind::Comma => "','",
      TokenKind::Colon => "':'",
      TokenKind::Question => "'?'",
      TokenKind::Assign => "'='",
      TokenKind::Plus => "'+'",
      TokenKind::Minus => "'-'",
      TokenKind::Star => "'*'",
      TokenKind::Slash => "'/'",
      TokenKind::Percent => "'%'",
      TokenKind::Amp => "'&'",
      TokenKind::Pipe => "'|'",
      TokenKind::Tilde => "'~'",
      TokenKind::ShiftL => "'<<'",
      TokenKind::ShiftR => "'>>'",
      TokenKind::AndAnd => "'&&'",
      TokenKind::PipePipe => "'||'",
      TokenKind::Bang => "'!'",
      TokenKind::EqualEqual => "'=='",
      TokenKind::BangEqual => "'!='",
      TokenKind::More => "'>'",
      TokenKind::MoreEqual => "'>='",
      TokenKind::Less => "'<'",
      TokenKind::LessEqual => "'<='",
      TokenKind::Eof => "end of input",
    };
    f.write_str(name)
  }
}

#[derive(Clone, Copy, Debug, Logos)]
enum Raw {
  // Keywords
  #[token("var")]
  Var,
  #[token("fun")]
  Fun,
  #[token("if")]
  If,
  #[token("else")]
  Else,
  #[token("true")]
  True,
  #[token("false")]
  False,
  #[token("while")]
  While,
  #[token("for")]
  For,
  #[token("break")]
  Break,
  #[token("continue")]
  Continue,
  #[token("return")]
  Return,
  #[token("null")]
  Null,
  #[token("class")]
  Class,
  #[token("this")]
  This,
  #[token("static")]
  Static,
  #[token("is")]
  Is,
  #[token("super")]
  Super,
  #[token("import")]
  Import,

  // Brackets
  #[token("(")]
  ParenL,
  #[token(")")]
  ParenR,
  #[token("[")]
  SquareL,
  #[token("]")]
  SquareR,
  #[token("{")]
  CurlyL,
  #[token("}")]
  CurlyR,

  // Punctuation
  #[token(".")]
  Dot,
  #[token("..")]
  DotDot,
  #[token(",")]
  Comma,
  #[token(":")]
  Colon,
  #[token("?")]
  Question,

  // Operators
  #[token("=")]
  Assign,
  #[token("+")]
  Plus,
  #[token("-")]
  Minus,
  #[token("*")]
  Star,
  #[token("/")]
  Slash,
  #[token("%")]
  Percent,
  #[token("&")]
  Amp,
  #[token("|")]
  Pipe,
  #[token("~")]
  Tilde,
  #[token("<<")]
  ShiftL,
  #[token(">>")]
  ShiftR,
  #[token("&&")]
  AndAnd,
  #[token("||")]
  PipePipe,
  #[token("!")]
  Bang,
  #[token("==")]
  EqualEqual,
  #[token("!=")]
  BangEqual,
  #[token(">")]
  More,
  #[token(">=")]
  MoreEqual,
  #[token("<")]
  Less,
  #[token("<=")]
  LessEqual,

  /// `0`, `1.5`, `5e10`, `0x7f`, etc.
  #[regex(r"[0-9]+(\.[0-9]+)?([Ee][+-]?[0-9]+)?")]
  #[regex(r"0x[0-9a-fA-F]+")]
  Num,
  /// `a`, `b_c`, `__x0`, etc.
  #[regex("[a-zA-Z_][a-zA-Z0-9_]*")]
  Id,

  /// The string scanner takes over from the opening quote.
  #[doc(hidden)]
  #[token("\"")]
  _StrStart,

  #[doc(hidden)]
  #[regex(r"[ \t\r\n]+", logos::skip)]
  _Whitespace,
  #[doc(hidden)]
  #[regex(r"//[^\n]*", logos::skip)]
  #[regex(r"/\*([^*]|\*+[^*/])*\*+/", logos::skip)]
  _Comment,

  #[doc(hidden)]
  #[error]
  _Error,
}

impl From<Raw> for TokenKind {
  fn from(raw: Raw) -> TokenKind {
    match raw {
      Raw::Var => TokenKind::Kw_Var,
      Raw::Fun => TokenKind::Kw_Fun,
      Raw::If => TokenKind::Kw_If,
      Raw::Else => TokenKind::Kw_Else,
      Raw::True => TokenKind::Kw_True,
      Raw::False => TokenKind::Kw_False,
      Raw::While => TokenKind::Kw_While,
      Raw::For => TokenKind::Kw_For,
      Raw::Break => TokenKind::Kw_Break,
      Raw::Continue => TokenKind::Kw_Continue,
      Raw::Return => TokenKind::Kw_Return,
      Raw::Null => TokenKind::Kw_Null,
      Raw::Class => TokenKind::Kw_Class,
      Raw::This => TokenKind::Kw_This,
      Raw::Static => TokenKind::Kw_Static,
      Raw::Is => TokenKind::Kw_Is,
      Raw::Super => TokenKind::Kw_Super,
      Raw::Import => TokenKind::Kw_Import,
      Raw::ParenL => TokenKind::ParenL,
      Raw::ParenR => TokenKind::ParenR,
      Raw::SquareL => TokenKind::SquareL,
      Raw::SquareR => TokenKind::SquareR,
      Raw::CurlyL => TokenKind::CurlyL,
      Raw::CurlyR => TokenKind::CurlyR,
      Raw::Dot => TokenKind::Dot,
      Raw::DotDot => TokenKind::DotDot,
      Raw::Comma => TokenKind::Comma,
      Raw::Colon => TokenKind::Colon,
      Raw::Question => TokenKind::Question,
      Raw::Assign => TokenKind::Assign,
      Raw::Plus => TokenKind::Plus,
      Raw::Minus => TokenKind::Minus,
      Raw::Star => TokenKind::Star,
      Raw::Slash => TokenKind::Slash,
      Raw::Percent => TokenKind::Percent,
      Raw::Amp => TokenKind::Amp,
      Raw::Pipe => TokenKind::Pipe,
      Raw::Tilde => TokenKind::Tilde,
      Raw::ShiftL => TokenKind::ShiftL,
      Raw::ShiftR => TokenKind::ShiftR,
      Raw::AndAnd => TokenKind::AndAnd,
      Raw::PipePipe => TokenKind::PipePipe,
      Raw::Bang => TokenKind::Bang,
      Raw::EqualEqual => TokenKind::EqualEqual,
      Raw::BangEqual => TokenKind::BangEqual,
      Raw::More => TokenKind::More,
      Raw::MoreEqual => TokenKind::MoreEqual,
      Raw::Less => TokenKind::Less,
      Raw::LessEqual => TokenKind::LessEqual,
      Raw::Num => TokenKind::Num,
      Raw::Id => TokenKind::Id,
      Raw::_StrStart | Raw::_Whitespace | Raw::_Comment | Raw::_Error => {
        unreachable!("raw token {raw:?} never surfaces")
      }
    }
  }
}

#[cfg(test)]
mod tests;

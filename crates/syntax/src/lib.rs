//! Lexical analysis for Suzume.
//!
//! The compiler consumes a flat, EOF-terminated token stream. String
//! interpolation is resolved here: `"a %(e) b"` arrives as an
//! `Interpolation` token holding `"a "`, the tokens of `e`, then a `String`
//! token holding `" b"`. The parentheses delimiting the embedded expression
//! never surface as tokens.

mod lexer;

pub use lexer::{Error, Lexer, Token, TokenKind, TokenValue};

use super::*;

fn kinds(src: &str) -> Vec<TokenKind> {
  Lexer::lex(src)
    .expect("source lexes")
    .into_iter()
    .map(|t| t.kind)
    .collect()
}

fn values(src: &str) -> Vec<Option<TokenValue>> {
  Lexer::lex(src)
    .expect("source lexes")
    .into_iter()
    .map(|t| t.value)
    .collect()
}

#[test]
fn keywords_and_identifiers() {
  let dump = kinds("var x = fun_0")
    .iter()
    .map(|k| format!("{k:?}"))
    .collect::<Vec<_>>()
    .join(" ");
  insta::assert_snapshot!(dump, @"Kw_Var Id Assign Id Eof");
}

#[test]
fn operators_longest_match() {
  assert_eq!(
    kinds("a <= b << c < d"),
    vec![
      TokenKind::Id,
      TokenKind::LessEqual,
      TokenKind::Id,
      TokenKind::ShiftL,
      TokenKind::Id,
      TokenKind::Less,
      TokenKind::Id,
      TokenKind::Eof,
    ]
  );
  assert_eq!(
    kinds("a .. b . c"),
    vec![
      TokenKind::Id,
      TokenKind::DotDot,
      TokenKind::Id,
      TokenKind::Dot,
      TokenKind::Id,
      TokenKind::Eof,
    ]
  );
}

#[test]
fn numbers() {
  let values = values("0 1.5 5e3 0x7f");
  assert_eq!(values[0], Some(TokenValue::Num(0.0)));
  assert_eq!(values[1], Some(TokenValue::Num(1.5)));
  assert_eq!(values[2], Some(TokenValue::Num(5000.0)));
  assert_eq!(values[3], Some(TokenValue::Num(127.0)));
}

#[test]
fn string_escapes() {
  let values = values(r#""a\n\t\"\\A""#);
  assert_eq!(
    values[0],
    Some(TokenValue::Str("a\n\t\"\\A".to_string()))
  );
}

#[test]
fn interpolation_splits_the_string() {
  let tokens = Lexer::lex(r#""a %(1 + 2) b""#).expect("source lexes");
  let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
  assert_eq!(
    kinds,
    vec![
      TokenKind::Interpolation,
      TokenKind::Num,
      TokenKind::Plus,
      TokenKind::Num,
      TokenKind::Str,
      TokenKind::Eof,
    ]
  );
  assert_eq!(tokens[0].value, Some(TokenValue::Str("a ".to_string())));
  assert_eq!(tokens[4].value, Some(TokenValue::Str(" b".to_string())));
}

#[test]
fn interpolation_keeps_inner_parens() {
  // the parens of `f(1)` are real tokens; the `)` closing the
  // interpolation is not
  assert_eq!(
    kinds(r#""x %(f(1)) y""#),
    vec![
      TokenKind::Interpolation,
      TokenKind::Id,
      TokenKind::ParenL,
      TokenKind::Num,
      TokenKind::ParenR,
      TokenKind::Str,
      TokenKind::Eof,
    ]
  );
}

#[test]
fn interpolation_nests() {
  assert_eq!(
    kinds(r#""a %("b %(1) c") d""#),
    vec![
      TokenKind::Interpolation,
      TokenKind::Interpolation,
      TokenKind::Num,
      TokenKind::Str,
      TokenKind::Str,
      TokenKind::Eof,
    ]
  );
}

#[test]
fn comments_are_skipped() {
  assert_eq!(
    kinds("1 // line\n/* block */ 2"),
    vec![TokenKind::Num, TokenKind::Num, TokenKind::Eof]
  );
}

#[test]
fn unterminated_string_errors() {
  let errors = Lexer::lex(r#"var a = "oops"#).expect_err("lexing fails");
  assert!(errors[0].message.contains("unterminated"));
}

#[test]
fn stray_percent_errors() {
  let errors = Lexer::lex(r#""100%""#).expect_err("lexing fails");
  assert!(errors[0].message.contains("'%'"));
}

#[test]
fn unexpected_character_errors() {
  let errors = Lexer::lex("var a = $").expect_err("lexing fails");
  assert!(errors[0].message.contains("unexpected character"));
}

//! Value lexer: one tuple's text in, typed scalars out.
//!
//! Splits the inner text of a `( ... )` tuple on top-level commas and coerces
//! each field by fixed rules:
//!
//! - `NULL` is null, `CURRENT_TIMESTAMP` is the wall-clock time of parsing
//! - quoted text has its wrapping quotes stripped and escapes resolved once
//! - anything that parses fully as a finite number is a number
//! - an empty field is null, any other bare word is kept verbatim as text

use super::{ByteClass, Scanner};
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// A single coerced value from a tuple
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    /// `CURRENT_TIMESTAMP`, resolved at parse time
    Timestamp(DateTime<Utc>),
    Number(f64),
    Text(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            ScalarValue::Number(n) => write!(f, "{}", n),
            ScalarValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

/// Row-level lexing failure. Never fatal for a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unbalanced tuple (open string: {open_string}, open parentheses: {depth})")]
    Unbalanced { open_string: bool, depth: usize },
}

/// Split a tuple's inner text on top-level commas.
///
/// Returns raw (untrimmed) field slices. A blank tuple yields no fields.
pub fn split_fields(raw: &str) -> Result<Vec<&str>, LexError> {
    let bytes = raw.as_bytes();
    let mut scanner = Scanner::new();
    let mut fields = Vec::new();
    let mut start = 0;

    for (i, &b) in bytes.iter().enumerate() {
        if scanner.step(b) == ByteClass::Comma && scanner.depth() == 0 {
            fields.push(&raw[start..i]);
            start = i + 1;
        }
    }

    if !scanner.is_balanced() {
        return Err(LexError::Unbalanced {
            open_string: scanner.in_quote(),
            depth: scanner.depth(),
        });
    }

    if fields.is_empty() && raw.trim().is_empty() {
        return Ok(fields);
    }

    fields.push(&raw[start..]);
    Ok(fields)
}

/// Lex a tuple's inner text into scalar values, one per top-level field.
pub fn lex_tuple(raw: &str) -> Result<Vec<ScalarValue>, LexError> {
    Ok(split_fields(raw)?.into_iter().map(coerce_value).collect())
}

/// Coerce one field's text into a [`ScalarValue`].
pub fn coerce_value(field: &str) -> ScalarValue {
    let v = field.trim();

    if v == "NULL" {
        return ScalarValue::Null;
    }
    if v == "CURRENT_TIMESTAMP" {
        return ScalarValue::Timestamp(Utc::now());
    }
    if v.is_empty() {
        return ScalarValue::Null;
    }
    if let Some(inner) = strip_wrapping_quotes(v) {
        return ScalarValue::Text(unescape_text(inner));
    }
    if let Some(n) = parse_number(v) {
        return ScalarValue::Number(n);
    }

    ScalarValue::Text(v.to_string())
}

fn strip_wrapping_quotes(v: &str) -> Option<&str> {
    let bytes = v.as_bytes();
    if bytes.len() < 2 {
        return None;
    }
    let first = bytes[0];
    if (first == b'\'' || first == b'"') && bytes[bytes.len() - 1] == first {
        Some(&v[1..v.len() - 1])
    } else {
        None
    }
}

fn parse_number(v: &str) -> Option<f64> {
    let first = *v.as_bytes().first()?;
    if !(first.is_ascii_digit() || matches!(first, b'-' | b'+' | b'.')) {
        return None;
    }
    v.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Resolve `\'`, `\"`, `\\` and then replace `&nbsp;`, `&amp;`, `&lt;`, `&gt;`
/// one after another, in that order. `&amp;lt;` therefore ends up as `<`.
pub fn unescape_text(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&next) if matches!(next, '\'' | '"' | '\\') => {
                    out.push(next);
                    chars.next();
                }
                // Unknown escape or trailing backslash stays literal
                _ => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }

    if out.contains('&') {
        decode_entities(out)
    } else {
        out
    }
}

const ENTITIES: [(&str, &str); 4] = [("&nbsp;", " "), ("&amp;", "&"), ("&lt;", "<"), ("&gt;", ">")];

fn decode_entities(text: String) -> String {
    ENTITIES.iter().fold(text, |acc, &(entity, literal)| {
        if acc.contains(entity) {
            acc.replace(entity, literal)
        } else {
            acc
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lex_basic_tuple() {
        let values = lex_tuple("1, 'Alice', NULL").unwrap();
        assert_eq!(
            values,
            vec![
                ScalarValue::Number(1.0),
                ScalarValue::Text("Alice".to_string()),
                ScalarValue::Null
            ]
        );
    }

    #[test]
    fn test_nested_parens_in_string() {
        let values = lex_tuple("1, 'a(b)c', NULL").unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[1], ScalarValue::Text("a(b)c".to_string()));
    }

    #[test]
    fn test_escaped_quote_decodes_once() {
        let values = lex_tuple(r"'O\'Brien'").unwrap();
        assert_eq!(values, vec![ScalarValue::Text("O'Brien".to_string())]);
    }

    #[test]
    fn test_escaped_backslash_before_quote() {
        let values = lex_tuple(r"'C:\\', 2").unwrap();
        assert_eq!(values[0], ScalarValue::Text(r"C:\".to_string()));
        assert_eq!(values[1], ScalarValue::Number(2.0));
    }

    #[test]
    fn test_current_timestamp() {
        let before = Utc::now();
        let values = lex_tuple("CURRENT_TIMESTAMP").unwrap();
        match &values[0] {
            ScalarValue::Timestamp(ts) => assert!(*ts >= before),
            other => panic!("expected timestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_word_kept_verbatim() {
        let values = lex_tuple("abc, 0x1F, NaN").unwrap();
        assert_eq!(values[0], ScalarValue::Text("abc".to_string()));
        assert_eq!(values[1], ScalarValue::Text("0x1F".to_string()));
        assert_eq!(values[2], ScalarValue::Text("NaN".to_string()));
    }

    #[test]
    fn test_numbers() {
        let values = lex_tuple("-3, 2.5, 1e3, .5").unwrap();
        assert_eq!(values[0], ScalarValue::Number(-3.0));
        assert_eq!(values[1], ScalarValue::Number(2.5));
        assert_eq!(values[2], ScalarValue::Number(1000.0));
        assert_eq!(values[3], ScalarValue::Number(0.5));
    }

    #[test]
    fn test_quoted_number_stays_text() {
        let values = lex_tuple("'42'").unwrap();
        assert_eq!(values[0], ScalarValue::Text("42".to_string()));
    }

    #[test]
    fn test_entities_replaced_in_order() {
        assert_eq!(unescape_text("a&nbsp;b &amp; c &lt;d&gt;"), "a b & c <d>");
        // &amp; is replaced before &lt; and &gt;, so these collapse fully
        assert_eq!(unescape_text("&amp;lt;b&amp;gt;"), "<b>");
        assert_eq!(unescape_text("&amp;nbsp;"), "&nbsp;");
        assert_eq!(unescape_text("AT&T &copy;"), "AT&T &copy;");
    }

    #[test]
    fn test_trailing_backslash_is_literal() {
        assert_eq!(unescape_text("abc\\"), "abc\\");
        assert_eq!(unescape_text("a\\nb"), "a\\nb");
    }

    #[test]
    fn test_unbalanced_tuple() {
        assert_eq!(
            lex_tuple("1, 'open"),
            Err(LexError::Unbalanced {
                open_string: true,
                depth: 0
            })
        );
        assert!(lex_tuple("1, (2").is_err());
    }

    #[test]
    fn test_blank_tuple_has_no_values() {
        assert!(lex_tuple("  ").unwrap().is_empty());
    }

    #[test]
    fn test_empty_field_is_null() {
        let values = lex_tuple("1,,3").unwrap();
        assert_eq!(values[1], ScalarValue::Null);
    }
}

//! Hand-written tokenizer for `INSERT INTO ... VALUES` dumps.
//!
//! Both the tuple extractor and the value lexer drive the same [`Scanner`]:
//! a byte-at-a-time state machine tracking quoted strings, parenthesis depth
//! and backslash escapes. All structural characters are ASCII, so scanning
//! bytes of a `&str` and slicing at their positions keeps UTF-8 boundaries
//! intact.

pub mod extract;
pub mod lexer;


pub use extract::{
    extract_all, extract_tuples, scan_statements, InsertScanner, InsertStatement, RawTuple,
    TableTuples, TupleIndex,
};
pub use lexer::{coerce_value, lex_tuple, split_fields, unescape_text, LexError, ScalarValue};

/// What a single byte meant to the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteClass {
    /// Byte inside a quoted string (including escapes and the escaped byte)
    Quoted,
    /// Quote character that opened a string
    QuoteOpen,
    /// Quote character that closed a string
    QuoteClose,
    /// `(` outside a string
    Open,
    /// `)` outside a string
    Close,
    /// `,` outside a string
    Comma,
    /// `;` outside a string
    Terminator,
    /// Anything else outside a string
    Other,
}

/// Quote/nesting/escape state shared by the extractor and the lexer.
#[derive(Debug, Default, Clone)]
pub struct Scanner {
    /// The quote byte that opened the current string, if inside one
    quote: Option<u8>,
    depth: usize,
    escape_armed: bool,
    /// Set when a `)` appeared with nothing open
    underflow: bool,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte and classify it.
    #[inline]
    pub fn step(&mut self, b: u8) -> ByteClass {
        if let Some(q) = self.quote {
            if self.escape_armed {
                self.escape_armed = false;
                return ByteClass::Quoted;
            }
            if b == b'\\' {
                self.escape_armed = true;
                return ByteClass::Quoted;
            }
            if b == q {
                self.quote = None;
                return ByteClass::QuoteClose;
            }
            return ByteClass::Quoted;
        }

        match b {
            b'\'' | b'"' => {
                self.quote = Some(b);
                ByteClass::QuoteOpen
            }
            b'(' => {
                self.depth += 1;
                ByteClass::Open
            }
            b')' => {
                if self.depth == 0 {
                    self.underflow = true;
                } else {
                    self.depth -= 1;
                }
                ByteClass::Close
            }
            b',' => ByteClass::Comma,
            b';' => ByteClass::Terminator,
            _ => ByteClass::Other,
        }
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    pub fn in_quote(&self) -> bool {
        self.quote.is_some()
    }

    /// True when no string is open, depth is zero and no `)` went unmatched.
    pub fn is_balanced(&self) -> bool {
        self.quote.is_none() && self.depth == 0 && !self.underflow
    }
}

#[inline]
pub(crate) fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

#[inline]
pub(crate) fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

//! Tuple extractor for `INSERT INTO ... VALUES (...), (...);` statements.
//!
//! Walks the dump statement by statement. Comments are skipped, and so is
//! every statement that does not start with INSERT or REPLACE, up to its `;`
//! outside any string. For every INSERT it reads the target table name, skips
//! an optional column list, finds `VALUES` and then slices out each top-level
//! `( ... )` group as a [`RawTuple`]. A statement ends at its `;`. An INSERT
//! at the start of a later line also ends an unterminated statement, and a
//! trailing bare-word clause such as `ON DUPLICATE KEY UPDATE` is skipped up
//! to the `;`.

use super::{is_ident_byte, is_whitespace, ByteClass, Scanner};
use ahash::AHashMap;
use once_cell::sync::Lazy;
use regex::Regex;

static INSERT_AT_START_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:INSERT(?:\s+(?:IGNORE|LOW_PRIORITY|DELAYED|HIGH_PRIORITY))?|REPLACE)\s+INTO\s")
        .unwrap()
});

/// One parenthesized row, exactly as it appeared between its parentheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTuple<'a> {
    /// Text between the enclosing `(` and `)`, parentheses excluded
    pub text: &'a str,
    /// Byte offset of the opening `(` in the dump
    pub offset: usize,
    /// False when the dump ended (or a `;` appeared) before the tuple closed
    pub balanced: bool,
}

/// A single INSERT statement found in the dump
#[derive(Debug, Clone)]
pub struct InsertStatement<'a> {
    /// Table name with quoting and any schema qualifier removed
    pub table: String,
    /// Byte offset of the INSERT keyword
    pub offset: usize,
    pub tuples: Vec<RawTuple<'a>>,
    /// Whether the statement ended with `;`
    pub terminated: bool,
}

/// Iterator over every INSERT statement in a dump, in file order.
pub struct InsertScanner<'a> {
    dump: &'a str,
    pos: usize,
}

impl<'a> InsertScanner<'a> {
    pub fn new(dump: &'a str) -> Self {
        let pos = if dump.starts_with('\u{feff}') {
            '\u{feff}'.len_utf8()
        } else {
            0
        };
        Self { dump, pos }
    }

    fn scan_statement(&mut self, table: String, offset: usize, header_end: usize) -> InsertStatement<'a> {
        let bytes = self.dump.as_bytes();
        let mut stmt = InsertStatement {
            table,
            offset,
            tuples: Vec::new(),
            terminated: false,
        };

        let values_end = match find_values_keyword(bytes, header_end) {
            ValuesSearch::Found(end) => end,
            ValuesSearch::Terminated(end) => {
                tracing::debug!(table = %stmt.table, offset, "INSERT without VALUES clause ignored");
                stmt.terminated = true;
                self.pos = end;
                return stmt;
            }
            ValuesSearch::Eof => {
                self.pos = bytes.len();
                return stmt;
            }
        };

        let mut i = values_end;
        while i < bytes.len() {
            match bytes[i] {
                b if is_whitespace(b) || b == b',' => i += 1,
                b';' => {
                    stmt.terminated = true;
                    i += 1;
                    break;
                }
                b'(' => {
                    let (tuple, next, hit_terminator) = scan_tuple(self.dump, i);
                    if !tuple.balanced {
                        tracing::warn!(
                            table = %stmt.table,
                            offset = tuple.offset,
                            "tuple never closed"
                        );
                    }
                    stmt.tuples.push(tuple);
                    i = next;
                    if hit_terminator {
                        stmt.terminated = true;
                        break;
                    }
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_line(bytes, i),
                b'#' => i = skip_line(bytes, i),
                b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
                _ => {
                    if insert_keyword_end(self.dump, i).is_some() {
                        tracing::warn!(
                            table = %stmt.table,
                            offset,
                            "INSERT statement ended without ';' before the next INSERT"
                        );
                        break;
                    }
                    let (end, found) = skip_to_terminator(bytes, i);
                    stmt.terminated = found;
                    i = end;
                    break;
                }
            }
        }

        self.pos = i;
        stmt
    }
}

impl<'a> Iterator for InsertScanner<'a> {
    type Item = InsertStatement<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.dump.as_bytes();

        while self.pos < bytes.len() {
            let i = self.pos;
            match bytes[i] {
                b if is_whitespace(b) || b == b';' => self.pos += 1,
                b'-' if bytes.get(i + 1) == Some(&b'-') => self.pos = skip_line(bytes, i),
                b'#' => self.pos = skip_line(bytes, i),
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    self.pos = skip_block_comment(bytes, i)
                }
                _ => match insert_keyword_end(self.dump, i) {
                    Some(end) => match read_table_name(self.dump, end) {
                        Some((table, header_end)) => {
                            return Some(self.scan_statement(table, i, header_end));
                        }
                        None => self.pos = skip_statement(self.dump, end),
                    },
                    None => self.pos = skip_statement(self.dump, i),
                },
            }
        }

        None
    }
}

/// Tuples of one table, gathered across all of its INSERT statements
#[derive(Debug, Clone)]
pub struct TableTuples<'a> {
    /// Table name as first seen in the dump
    pub name: String,
    pub statements: usize,
    pub unterminated_statements: usize,
    pub tuples: Vec<RawTuple<'a>>,
}

impl TableTuples<'_> {
    pub fn unbalanced_tuples(&self) -> usize {
        self.tuples.iter().filter(|t| !t.balanced).count()
    }
}

/// All tuples of a dump grouped by table, built in one pass.
#[derive(Debug, Default)]
pub struct TupleIndex<'a> {
    tables: Vec<TableTuples<'a>>,
    lookup: AHashMap<String, usize>,
}

impl<'a> TupleIndex<'a> {
    pub fn build(dump: &'a str) -> Self {
        let mut index = TupleIndex::default();

        for stmt in InsertScanner::new(dump) {
            let key = stmt.table.to_ascii_lowercase();
            let slot = match index.lookup.get(&key) {
                Some(&slot) => slot,
                None => {
                    index.tables.push(TableTuples {
                        name: stmt.table.clone(),
                        statements: 0,
                        unterminated_statements: 0,
                        tuples: Vec::new(),
                    });
                    index.lookup.insert(key, index.tables.len() - 1);
                    index.tables.len() - 1
                }
            };

            let entry = &mut index.tables[slot];
            entry.statements += 1;
            if !stmt.terminated {
                entry.unterminated_statements += 1;
            }
            entry.tuples.extend(stmt.tuples);
        }

        index
    }

    /// Tuples for a table (ASCII case-insensitive). Absent tables yield none.
    pub fn get(&self, table: &str) -> &[RawTuple<'a>] {
        self.lookup
            .get(&table.to_ascii_lowercase())
            .map(|&slot| self.tables[slot].tuples.as_slice())
            .unwrap_or(&[])
    }

    /// Tables in first-seen order
    pub fn tables(&self) -> &[TableTuples<'a>] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn total_tuples(&self) -> usize {
        self.tables.iter().map(|t| t.tuples.len()).sum()
    }
}

/// Every tuple of every INSERT addressing `table`, in file order.
pub fn extract_tuples<'a>(dump: &'a str, table: &str) -> Vec<RawTuple<'a>> {
    InsertScanner::new(dump)
        .filter(|stmt| stmt.table.eq_ignore_ascii_case(table))
        .flat_map(|stmt| stmt.tuples)
        .collect()
}

/// Extract tuples for every table in one pass.
pub fn extract_all(dump: &str) -> TupleIndex<'_> {
    TupleIndex::build(dump)
}

/// Iterate the INSERT statements of a dump.
pub fn scan_statements(dump: &str) -> InsertScanner<'_> {
    InsertScanner::new(dump)
}

enum ValuesSearch {
    /// Position right after the `VALUES` keyword
    Found(usize),
    /// Statement ended (position after `;`) without a VALUES clause
    Terminated(usize),
    Eof,
}

fn find_values_keyword(bytes: &[u8], from: usize) -> ValuesSearch {
    let mut scanner = Scanner::new();

    for i in from..bytes.len() {
        let b = bytes[i];
        match scanner.step(b) {
            ByteClass::Terminator => return ValuesSearch::Terminated(i + 1),
            ByteClass::Other if scanner.depth() == 0 && (b == b'V' || b == b'v') => {
                let is_keyword = bytes.len() >= i + 6
                    && bytes[i..i + 6].eq_ignore_ascii_case(b"VALUES")
                    && (i == 0 || !is_ident_byte(bytes[i - 1]))
                    && bytes.get(i + 6).map_or(true, |&n| !is_ident_byte(n));
                if is_keyword {
                    return ValuesSearch::Found(i + 6);
                }
            }
            _ => {}
        }
    }

    ValuesSearch::Eof
}

/// Scan one tuple starting at its `(`.
///
/// Returns the tuple, the position to continue from, and whether a `;`
/// outside any string cut the tuple short.
fn scan_tuple(dump: &str, open: usize) -> (RawTuple<'_>, usize, bool) {
    let bytes = dump.as_bytes();
    let mut scanner = Scanner::new();
    scanner.step(b'(');

    for j in open + 1..bytes.len() {
        match scanner.step(bytes[j]) {
            ByteClass::Close if scanner.depth() == 0 => {
                let tuple = RawTuple {
                    text: &dump[open + 1..j],
                    offset: open,
                    balanced: true,
                };
                return (tuple, j + 1, false);
            }
            ByteClass::Terminator => {
                let tuple = RawTuple {
                    text: &dump[open + 1..j],
                    offset: open,
                    balanced: false,
                };
                return (tuple, j + 1, true);
            }
            _ => {}
        }
    }

    let tuple = RawTuple {
        text: &dump[open + 1..],
        offset: open,
        balanced: false,
    };
    (tuple, bytes.len(), false)
}

/// Read a possibly quoted, possibly schema-qualified table name.
/// Returns the last name segment and the position after it.
fn read_table_name(dump: &str, from: usize) -> Option<(String, usize)> {
    let bytes = dump.as_bytes();
    let mut i = from;
    let mut name = None;

    loop {
        while i < bytes.len() && is_whitespace(bytes[i]) {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let (segment, end) = match bytes[i] {
            q @ (b'`' | b'"') => {
                let start = i + 1;
                let close = memchr::memchr(q, &bytes[start..])? + start;
                (&dump[start..close], close + 1)
            }
            _ => {
                let start = i;
                let mut j = i;
                while j < bytes.len() && (is_ident_byte(bytes[j]) || bytes[j] >= 0x80) {
                    j += 1;
                }
                if j == start {
                    break;
                }
                (&dump[start..j], j)
            }
        };

        name = Some(segment.to_string());
        i = end;

        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
            continue;
        }
        break;
    }

    name.filter(|n| !n.is_empty()).map(|n| (n, i))
}

/// Position right after `INSERT ... INTO ` when one starts at `at`.
fn insert_keyword_end(dump: &str, at: usize) -> Option<usize> {
    INSERT_AT_START_RE.find(&dump[at..]).map(|m| at + m.end())
}

/// Start of an INSERT that opens the line beginning at `from`, if any.
fn insert_on_line(dump: &str, from: usize) -> Option<usize> {
    let bytes = dump.as_bytes();
    let mut i = from;
    while i < bytes.len() && matches!(bytes[i], b' ' | b'\t' | b'\r') {
        i += 1;
    }
    insert_keyword_end(dump, i).map(|_| i)
}

fn skip_line(bytes: &[u8], from: usize) -> usize {
    memchr::memchr(b'\n', &bytes[from..])
        .map(|p| from + p + 1)
        .unwrap_or(bytes.len())
}

fn skip_block_comment(bytes: &[u8], from: usize) -> usize {
    memchr::memmem::find(&bytes[from + 2..], b"*/")
        .map(|p| from + 2 + p + 2)
        .unwrap_or(bytes.len())
}

/// Skip a statement that is not an INSERT.
///
/// Ends just past its `;` outside strings, identifiers and comments, or at an
/// INSERT opening a later line when the `;` is missing.
fn skip_statement(dump: &str, from: usize) -> usize {
    let bytes = dump.as_bytes();
    let mut scanner = Scanner::new();
    let mut i = from;

    while i < bytes.len() {
        let b = bytes[i];
        if !scanner.in_quote() {
            let line_end = match b {
                b'`' => {
                    i = memchr::memchr(b'`', &bytes[i + 1..])
                        .map_or(bytes.len(), |p| i + 1 + p + 1);
                    continue;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i = skip_block_comment(bytes, i);
                    continue;
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => Some(skip_line(bytes, i)),
                b'#' => Some(skip_line(bytes, i)),
                b'\n' => Some(i + 1),
                _ => None,
            };
            if let Some(next) = line_end {
                if let Some(start) = insert_on_line(dump, next) {
                    tracing::warn!(offset = from, "statement ended without ';' before an INSERT");
                    return start;
                }
                i = next;
                continue;
            }
        }
        if scanner.step(b) == ByteClass::Terminator {
            return i + 1;
        }
        i += 1;
    }

    bytes.len()
}

/// Skip to just past the next `;` outside a string.
fn skip_to_terminator(bytes: &[u8], from: usize) -> (usize, bool) {
    let mut scanner = Scanner::new();
    for i in from..bytes.len() {
        if scanner.step(bytes[i]) == ByteClass::Terminator {
            return (i + 1, true);
        }
    }
    (bytes.len(), false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_tuples_one_statement() {
        let dump = "INSERT INTO `t` (`a`,`b`,`c`) VALUES (1,'Alice',NULL),(2,'Bob','x');";
        let tuples = extract_tuples(dump, "t");
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0].text, "1,'Alice',NULL");
        assert_eq!(tuples[1].text, "2,'Bob','x'");
        assert!(tuples.iter().all(|t| t.balanced));
    }

    #[test]
    fn test_absent_table_is_empty() {
        let dump = "INSERT INTO `t` VALUES (1);";
        assert!(extract_tuples(dump, "missing").is_empty());
    }

    #[test]
    fn test_statements_concatenate_in_order() {
        let dump = "INSERT INTO t VALUES (1);\nINSERT INTO u VALUES (9);\nINSERT INTO t VALUES (2),(3);";
        let texts: Vec<&str> = extract_tuples(dump, "t").iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_semicolon_inside_string() {
        let dump = "INSERT INTO t VALUES ('a;b'),('c');";
        let tuples = extract_tuples(dump, "t");
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0].text, "'a;b'");
    }

    #[test]
    fn test_missing_terminator_before_next_insert() {
        let dump = "INSERT INTO t VALUES (1),(2)\nINSERT INTO t VALUES (3);";
        let stmts: Vec<_> = scan_statements(dump).collect();
        assert_eq!(stmts.len(), 2);
        assert!(!stmts[0].terminated);
        assert!(stmts[1].terminated);
        assert_eq!(extract_tuples(dump, "t").len(), 3);
    }

    #[test]
    fn test_unterminated_tuple_at_eof() {
        let dump = "INSERT INTO t VALUES (1,'ok'),(2,'never closed";
        let tuples = extract_tuples(dump, "t");
        assert_eq!(tuples.len(), 2);
        assert!(tuples[0].balanced);
        assert!(!tuples[1].balanced);
    }

    #[test]
    fn test_on_duplicate_key_clause_skipped() {
        let dump = "INSERT INTO t VALUES (1,'a') ON DUPLICATE KEY UPDATE b=VALUES(b);\nINSERT INTO t VALUES (2,'b');";
        let tuples = extract_tuples(dump, "t");
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[1].text, "2,'b'");
    }

    #[test]
    fn test_commented_insert_ignored() {
        let dump = "-- INSERT INTO t VALUES (0);\nINSERT INTO t VALUES (1);";
        let tuples = extract_tuples(dump, "t");
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].text, "1");
    }

    #[test]
    fn test_insert_in_block_comment_ignored() {
        let dump = "/* INSERT INTO t VALUES (0); */\n/*\nINSERT INTO t VALUES (8);\n*/\nINSERT INTO t VALUES (1);";
        let texts: Vec<&str> = extract_tuples(dump, "t").iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["1"]);
    }

    #[test]
    fn test_insert_inside_other_statement_string_ignored() {
        let dump = "\
CREATE TABLE `t` (
  `id` int(11) NOT NULL COMMENT 'see INSERT INTO t VALUES (7)'
) ENGINE=InnoDB COMMENT='INSERT INTO t VALUES (9)';
UPDATE t SET note = 'x;
INSERT INTO t VALUES (6)';
INSERT INTO t VALUES (1);";
        let texts: Vec<&str> = extract_tuples(dump, "t").iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["1"]);
        assert_eq!(scan_statements(dump).count(), 1);
    }

    #[test]
    fn test_unterminated_statement_before_insert() {
        let dump = "LOCK TABLES `t` WRITE\nINSERT INTO t VALUES (1);\nUNLOCK TABLES;";
        assert_eq!(extract_tuples(dump, "t").len(), 1);
    }

    #[test]
    fn test_apostrophe_in_comment_and_bom() {
        let dump = "\u{feff}-- Don't edit by hand\n# it's generated\nINSERT INTO t VALUES (1);";
        assert_eq!(extract_tuples(dump, "t").len(), 1);
    }

    #[test]
    fn test_qualified_and_case_insensitive_name() {
        let dump = "insert into `shop`.`Users` values (1);";
        assert_eq!(extract_tuples(dump, "users").len(), 1);
    }

    #[test]
    fn test_insert_without_values() {
        let dump = "INSERT INTO t SELECT * FROM u;\nINSERT INTO t VALUES (5);";
        let tuples = extract_tuples(dump, "t");
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].text, "5");
    }

    #[test]
    fn test_index_groups_tables() {
        let dump = "INSERT INTO a VALUES (1);\nINSERT INTO b VALUES (2),(3);\nINSERT INTO A VALUES (4);";
        let index = extract_all(dump);
        assert_eq!(index.tables().len(), 2);
        assert_eq!(index.get("a").len(), 2);
        assert_eq!(index.get("B").len(), 2);
        assert_eq!(index.tables()[0].statements, 2);
        assert_eq!(index.total_tuples(), 4);
    }
}

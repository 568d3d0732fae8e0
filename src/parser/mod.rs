//! Layout detection and format-specific splitters for status dumps.
//!
//! A status dump is turned into a sequence of raw groups (one per snapshot)
//! by a [`GroupParser`]. Which parser is used depends on the [`Layout`],
//! which is detected from the first recognisable line of input:
//!
//! ```text
//! Vertical, boxed (mysqladmin extended-status)
//!   +-----------------+-------+
//!   | Variable_name   | Value |
//!   +-----------------+-------+
//!   | Uptime          | 3600  |
//!   +-----------------+-------+
//!
//! Vertical, batch (mysql -B -e 'SHOW GLOBAL STATUS')
//!   Variable_name<TAB>Value
//!   Uptime<TAB>3600
//!
//! Tabular (header row + one row per snapshot)
//!   uptime  connections  threads_running
//!   3600    1542         2
//! ```
//!
//! Parsers are line-driven state machines: the loader feeds them one line at
//! a time, so a snapshot is emitted as soon as its last line is seen.

mod tabular;
mod vertical;

pub use tabular::TabularParser;
pub use vertical::VerticalParser;

use std::io::{self, BufRead};

use tracing::debug;

use crate::sample::UPTIME;

/// Header cell that opens a vertical block.
const VERTICAL_HEADER: &str = "variable_name";

const NO_LAYOUT: &str = "no vertical block header or tabular header with an uptime column";

/// How vertical name/value rows are delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalStyle {
    /// `| name | value |` rows between `+---+` separators.
    Boxed,
    /// `name<TAB>value` rows.
    Batch,
}

/// How tabular lines are split into columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRule {
    Tab,
    Whitespace,
    /// `| a | b |` cells; `+---+` lines are separators.
    Boxed,
}

impl ColumnRule {
    /// Splits a line into trimmed cells.
    pub fn split<'a>(&self, line: &'a str) -> Vec<&'a str> {
        match self {
            ColumnRule::Tab => line.split('\t').map(str::trim).collect(),
            ColumnRule::Whitespace => line.split_whitespace().collect(),
            ColumnRule::Boxed => split_boxed(line),
        }
    }
}

/// Textual arrangement of a status dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Vertical(VerticalStyle),
    Tabular(ColumnRule),
}

impl std::fmt::Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Layout::Vertical(VerticalStyle::Boxed) => write!(f, "vertical (boxed)"),
            Layout::Vertical(VerticalStyle::Batch) => write!(f, "vertical (batch)"),
            Layout::Tabular(ColumnRule::Tab) => write!(f, "tabular (tab)"),
            Layout::Tabular(ColumnRule::Whitespace) => write!(f, "tabular (whitespace)"),
            Layout::Tabular(ColumnRule::Boxed) => write!(f, "tabular (boxed)"),
        }
    }
}

/// Untyped name to raw-string mapping for one snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawGroup {
    /// 1-based line where the unit started.
    pub line: usize,
    pub fields: Vec<(String, String)>,
}

impl RawGroup {
    pub fn new(line: usize) -> Self {
        Self {
            line,
            fields: Vec::new(),
        }
    }

    /// Appends a metric; the name is normalised to lower case.
    pub fn push(&mut self, name: &str, raw: &str) {
        self.fields.push((name.to_ascii_lowercase(), raw.to_string()));
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Why a unit of input was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum MalformedReason {
    /// Tabular row with the wrong number of columns.
    ColumnCount { expected: usize, found: usize },
    /// Line inside a vertical block that is not a name/value row.
    InvalidRow(String),
    /// Same metric twice in one vertical block.
    DuplicateName(String),
    /// Vertical rows with no header in front of them.
    OrphanRows,
    /// Line that is not valid UTF-8.
    InvalidEncoding,
    /// Assembled unit has no integer `uptime`.
    MissingUptime,
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedReason::ColumnCount { expected, found } => {
                write!(f, "expected {} columns, found {}", expected, found)
            }
            MalformedReason::InvalidRow(line) => write!(f, "not a name/value row: '{}'", line),
            MalformedReason::DuplicateName(name) => write!(f, "metric '{}' repeated", name),
            MalformedReason::OrphanRows => write!(f, "rows without a block header"),
            MalformedReason::InvalidEncoding => write!(f, "line is not valid UTF-8"),
            MalformedReason::MissingUptime => write!(f, "no integer '{}' metric", UPTIME),
        }
    }
}

/// A row or block that was skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedUnit {
    pub line: usize,
    pub reason: MalformedReason,
}

impl std::fmt::Display for MalformedUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed unit at line {}: {}", self.line, self.reason)
    }
}

impl std::error::Error for MalformedUnit {}

/// The input matches neither supported layout.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatError {
    /// Non-blank lines inspected before giving up.
    pub inspected: usize,
    pub message: String,
}

impl FormatError {
    pub fn new(inspected: usize, msg: impl Into<String>) -> Self {
        Self {
            inspected,
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Unrecognized status layout after {} lines: {}",
            self.inspected, self.message
        )
    }
}

impl std::error::Error for FormatError {}

/// Outcome of one unit of input.
pub type ParsedUnit = Result<RawGroup, MalformedUnit>;

/// Line-driven splitter for one layout.
///
/// The first line pushed is the line that [`classify_line`] recognised.
pub trait GroupParser: Send {
    /// Feeds one line (without its terminator). Returns a unit when this
    /// line completes one.
    fn push_line(&mut self, line_no: usize, line: &str) -> Option<ParsedUnit>;

    /// Feeds a line that could not be decoded. The unit it belongs to is
    /// reported as malformed; parsing carries on with the next line.
    fn reject_line(&mut self, line_no: usize, reason: MalformedReason) -> Option<ParsedUnit>;

    /// Flushes the unit still in progress at end of input.
    fn finish(&mut self) -> Option<ParsedUnit>;
}

/// Creates the parser for a detected layout.
pub fn parser_for(layout: Layout) -> Box<dyn GroupParser> {
    match layout {
        Layout::Vertical(style) => Box::new(VerticalParser::new(style)),
        Layout::Tabular(rule) => Box::new(TabularParser::new(rule)),
    }
}

/// Recognises the line that starts a supported layout.
///
/// Returns `None` for blank lines and boilerplate.
pub fn classify_line(line: &str) -> Option<Layout> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.starts_with('|') {
        let cells = split_boxed(line);
        if is_vertical_header(&cells) {
            return Some(Layout::Vertical(VerticalStyle::Boxed));
        }
        return is_tabular_header(&cells).then_some(Layout::Tabular(ColumnRule::Boxed));
    }

    if line.contains('\t') {
        let cells = ColumnRule::Tab.split(line);
        if is_vertical_header(&cells) {
            return Some(Layout::Vertical(VerticalStyle::Batch));
        }
        return is_tabular_header(&cells).then_some(Layout::Tabular(ColumnRule::Tab));
    }

    let cells = ColumnRule::Whitespace.split(line);
    is_tabular_header(&cells).then_some(Layout::Tabular(ColumnRule::Whitespace))
}

/// One line read from a status source.
pub(crate) enum TextLine<'a> {
    /// Decoded line without its terminator.
    Text(&'a str),
    /// Line that is not valid UTF-8.
    NotUtf8,
    End,
}

/// Reads the next line into `buf` and decodes it.
pub(crate) fn read_text_line<'a, R: BufRead + ?Sized>(
    reader: &mut R,
    buf: &'a mut Vec<u8>,
) -> io::Result<TextLine<'a>> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Ok(TextLine::End);
    }
    match std::str::from_utf8(buf) {
        Ok(line) => Ok(TextLine::Text(line.trim_end_matches(['\n', '\r']))),
        Err(_) => Ok(TextLine::NotUtf8),
    }
}

/// The line that decided the layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub layout: Layout,
    /// 1-based line number.
    pub line_no: usize,
    pub line: String,
}

/// Reads leading lines until one of them fixes the layout.
///
/// Scans at most `limit` non-blank lines and leaves `reader` right after the
/// deciding line. The outer error is a read failure; the inner one means no
/// layout matched.
pub fn detect_layout<R: BufRead + ?Sized>(
    reader: &mut R,
    limit: usize,
) -> io::Result<Result<Detection, FormatError>> {
    let mut buf = Vec::new();
    let mut line_no = 0;
    let mut inspected = 0;

    while inspected < limit {
        let line = match read_text_line(reader, &mut buf)? {
            TextLine::End => break,
            TextLine::NotUtf8 => {
                line_no += 1;
                debug!("Skipping undecodable leading line {}", line_no);
                inspected += 1;
                continue;
            }
            TextLine::Text(line) => line,
        };
        line_no += 1;

        if line.trim().is_empty() {
            continue;
        }
        if let Some(layout) = classify_line(line) {
            return Ok(Ok(Detection {
                layout,
                line_no,
                line: line.to_string(),
            }));
        }
        debug!("Skipping leading line {}: {}", line_no, line);
        inspected += 1;
    }

    Ok(Err(FormatError::new(inspected, NO_LAYOUT)))
}

fn split_boxed(line: &str) -> Vec<&str> {
    let line = line.trim();
    let line = line.strip_prefix('|').unwrap_or(line);
    let line = line.strip_suffix('|').unwrap_or(line);
    line.split('|').map(str::trim).collect()
}

/// `+-----+-----+` line.
fn is_separator(line: &str) -> bool {
    let line = line.trim();
    line.starts_with('+') && line.chars().all(|c| c == '+' || c == '-')
}

fn is_vertical_header(cells: &[&str]) -> bool {
    cells.len() == 2 && cells[0].eq_ignore_ascii_case(VERTICAL_HEADER)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_tabular_header(cells: &[&str]) -> bool {
    cells.len() >= 2
        && cells.iter().all(|c| is_identifier(c))
        && cells.iter().any(|c| c.eq_ignore_ascii_case(UPTIME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_classify_vertical_headers() {
        assert_eq!(
            classify_line("| Variable_name                     | Value    |"),
            Some(Layout::Vertical(VerticalStyle::Boxed))
        );
        assert_eq!(
            classify_line("Variable_name\tValue"),
            Some(Layout::Vertical(VerticalStyle::Batch))
        );
        assert_eq!(
            classify_line("VARIABLE_NAME\tVALUE"),
            Some(Layout::Vertical(VerticalStyle::Batch))
        );
    }

    #[test]
    fn test_classify_tabular_headers() {
        assert_eq!(
            classify_line("Uptime\tConnections\tThreads_running"),
            Some(Layout::Tabular(ColumnRule::Tab))
        );
        assert_eq!(
            classify_line("uptime connections  threads_running"),
            Some(Layout::Tabular(ColumnRule::Whitespace))
        );
        assert_eq!(
            classify_line("| uptime | connections |"),
            Some(Layout::Tabular(ColumnRule::Boxed))
        );
    }

    #[test]
    fn test_classify_rejects_boilerplate() {
        assert_eq!(classify_line(""), None);
        assert_eq!(classify_line("   "), None);
        assert_eq!(classify_line("+-------------------+-------+"), None);
        assert_eq!(
            classify_line("mysqladmin: [Warning] Using a password on the command line"),
            None
        );
        // Identifier-like but no uptime column.
        assert_eq!(classify_line("connections threads_running"), None);
        // Data row, not a header.
        assert_eq!(classify_line("3600\t1542"), None);
    }

    #[test]
    fn test_detect_layout_skips_leading_boilerplate() {
        let input = "\
mysqladmin: [Warning] Using a password on the command line interface can be insecure.

+-------------------+-------+
| Variable_name     | Value |
+-------------------+-------+
| Uptime            | 10    |
";
        let detection = detect_layout(&mut input.as_bytes(), 64).unwrap().unwrap();
        assert_eq!(detection.layout, Layout::Vertical(VerticalStyle::Boxed));
        assert_eq!(detection.line_no, 4);
        assert_eq!(detection.line, "| Variable_name     | Value |");
    }

    #[test]
    fn test_detect_layout_leaves_reader_after_header() {
        let mut reader = Cursor::new("warning: something\n\nVariable_name\tValue\nUptime\t1\n");
        let detection = detect_layout(&mut reader, 10).unwrap().unwrap();
        assert_eq!(detection.layout, Layout::Vertical(VerticalStyle::Batch));
        assert_eq!(detection.line_no, 3);

        let mut rest = String::new();
        reader.read_line(&mut rest).unwrap();
        assert_eq!(rest, "Uptime\t1\n");
    }

    #[test]
    fn test_detect_layout_fails_on_unknown_input() {
        let input = "hello world\nthis is not a status dump\n1 2 3\n";
        let err = detect_layout(&mut input.as_bytes(), 64).unwrap().unwrap_err();
        assert_eq!(err.inspected, 3);
        assert!(err.to_string().starts_with("Unrecognized status layout"));

        let err = detect_layout(&mut "".as_bytes(), 64).unwrap().unwrap_err();
        assert_eq!(err.inspected, 0);
    }

    #[test]
    fn test_detect_layout_respects_limit() {
        let mut input = String::new();
        for _ in 0..10 {
            input.push_str("noise line\n");
        }
        input.push_str("Variable_name\tValue\n");

        assert!(detect_layout(&mut input.as_bytes(), 5).unwrap().is_err());
        let detection = detect_layout(&mut input.as_bytes(), 64).unwrap().unwrap();
        assert_eq!(detection.line_no, 11);
    }

    #[test]
    fn test_detect_layout_skips_undecodable_lines() {
        let mut input = b"caf\xe9 warning\n".to_vec();
        input.extend_from_slice(b"uptime\tqueries\n1\t1\n");
        let detection = detect_layout(&mut input.as_slice(), 64).unwrap().unwrap();
        assert_eq!(detection.layout, Layout::Tabular(ColumnRule::Tab));
        assert_eq!(detection.line_no, 2);

        let err = detect_layout(&mut &b"\xff\n\xfe\n"[..], 64).unwrap().unwrap_err();
        assert_eq!(err.inspected, 2);
    }

    #[test]
    fn test_read_text_line() {
        let mut reader: &[u8] = b"a\tb\r\n\xff\nlast";
        let mut buf = Vec::new();
        assert!(matches!(
            read_text_line(&mut reader, &mut buf).unwrap(),
            TextLine::Text("a\tb")
        ));
        assert!(matches!(
            read_text_line(&mut reader, &mut buf).unwrap(),
            TextLine::NotUtf8
        ));
        assert!(matches!(
            read_text_line(&mut reader, &mut buf).unwrap(),
            TextLine::Text("last")
        ));
        assert!(matches!(
            read_text_line(&mut reader, &mut buf).unwrap(),
            TextLine::End
        ));
    }

    #[test]
    fn test_column_rule_split() {
        assert_eq!(ColumnRule::Tab.split("a\t b \tc"), vec!["a", "b", "c"]);
        assert_eq!(ColumnRule::Tab.split("a\t"), vec!["a", ""]);
        assert_eq!(ColumnRule::Whitespace.split(" a   b c "), vec!["a", "b", "c"]);
        assert_eq!(ColumnRule::Boxed.split("| a | b  |"), vec!["a", "b"]);
        assert_eq!(ColumnRule::Boxed.split("| a |  |"), vec!["a", ""]);
    }

    #[test]
    fn test_separator() {
        assert!(is_separator("+------+-----+"));
        assert!(is_separator("  +---+  "));
        assert!(!is_separator("| a | b |"));
        assert!(!is_separator("+1"));
    }

    #[test]
    fn test_raw_group_lowercases_names() {
        let mut group = RawGroup::new(4);
        group.push("Uptime", "10");
        assert_eq!(group.fields, vec![("uptime".to_string(), "10".to_string())]);
        assert_eq!(group.len(), 1);
        assert_eq!(group.line, 4);
    }
}

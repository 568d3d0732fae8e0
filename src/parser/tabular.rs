//! Tabular layout: one header row of metric names, one data row per snapshot.

use super::{
    ColumnRule, GroupParser, MalformedReason, MalformedUnit, ParsedUnit, RawGroup, is_separator,
};

/// Zips each data row against the header columns.
///
/// The first non-blank line pushed becomes the header. Separator lines and
/// repeated copies of the header are skipped; rows with a different column
/// count are reported as malformed.
pub struct TabularParser {
    rule: ColumnRule,
    header: Option<Vec<String>>,
}

impl TabularParser {
    pub fn new(rule: ColumnRule) -> Self {
        Self { rule, header: None }
    }

    /// Column names once the header has been seen.
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }
}

impl GroupParser for TabularParser {
    fn push_line(&mut self, line_no: usize, line: &str) -> Option<ParsedUnit> {
        if line.trim().is_empty() {
            return None;
        }
        if self.rule == ColumnRule::Boxed && is_separator(line) {
            return None;
        }

        let cells = self.rule.split(line);
        let Some(header) = &self.header else {
            self.header = Some(cells.iter().map(|c| c.to_ascii_lowercase()).collect());
            return None;
        };

        let repeated_header = cells.len() == header.len()
            && cells
                .iter()
                .zip(header)
                .all(|(cell, name)| cell.eq_ignore_ascii_case(name));
        if repeated_header {
            return None;
        }

        if cells.len() != header.len() {
            return Some(Err(MalformedUnit {
                line: line_no,
                reason: MalformedReason::ColumnCount {
                    expected: header.len(),
                    found: cells.len(),
                },
            }));
        }

        let mut group = RawGroup::new(line_no);
        for (name, raw) in header.iter().zip(cells) {
            group.push(name, raw);
        }
        Some(Ok(group))
    }

    fn reject_line(&mut self, line_no: usize, reason: MalformedReason) -> Option<ParsedUnit> {
        Some(Err(MalformedUnit {
            line: line_no,
            reason,
        }))
    }

    fn finish(&mut self) -> Option<ParsedUnit> {
        None
    }
}

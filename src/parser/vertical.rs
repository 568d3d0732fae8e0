//! Vertical layout: repeating name/value blocks, one block per snapshot.

use std::collections::HashSet;

use super::{
    ColumnRule, GroupParser, MalformedReason, MalformedUnit, ParsedUnit, RawGroup, VerticalStyle,
    is_separator, is_vertical_header,
};

/// Block being accumulated.
struct Block {
    group: RawGroup,
    seen: HashSet<String>,
    broken: Option<MalformedReason>,
}

impl Block {
    fn new(line: usize) -> Self {
        Self {
            group: RawGroup::new(line),
            seen: HashSet::new(),
            broken: None,
        }
    }

    fn orphan(line: usize) -> Self {
        let mut block = Self::new(line);
        block.broken = Some(MalformedReason::OrphanRows);
        block
    }

    fn add(&mut self, name: &str, raw: &str) {
        let key = name.to_ascii_lowercase();
        if !self.seen.insert(key) {
            self.mark_broken(MalformedReason::DuplicateName(name.to_string()));
            return;
        }
        self.group.push(name, raw);
    }

    fn mark_broken(&mut self, reason: MalformedReason) {
        if self.broken.is_none() {
            self.broken = Some(reason);
        }
    }

    /// Empty blocks yield nothing; broken blocks yield a malformed unit.
    fn close(self) -> Option<ParsedUnit> {
        if let Some(reason) = self.broken {
            return Some(Err(MalformedUnit {
                line: self.group.line,
                reason,
            }));
        }
        if self.group.is_empty() {
            return None;
        }
        Some(Ok(self.group))
    }
}

/// Splits `Variable_name`/`Value` blocks into raw groups.
///
/// Header lines open a block and close the previous one. In the boxed style
/// a separator after at least one row also closes the block, so a live
/// `mysqladmin` stream emits each snapshot without waiting for the next one.
pub struct VerticalParser {
    style: VerticalStyle,
    current: Option<Block>,
}

impl VerticalParser {
    pub fn new(style: VerticalStyle) -> Self {
        Self {
            style,
            current: None,
        }
    }

    fn split_row<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
        match self.style {
            VerticalStyle::Boxed => {
                if !line.trim_start().starts_with('|') {
                    return None;
                }
                match ColumnRule::Boxed.split(line).as_slice() {
                    [name, value] if !name.is_empty() => Some((*name, *value)),
                    _ => None,
                }
            }
            VerticalStyle::Batch => {
                let (name, value) = line.split_once('\t')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some((name, value.trim()))
            }
        }
    }

    fn take(&mut self) -> Option<ParsedUnit> {
        self.current.take().and_then(Block::close)
    }
}

impl GroupParser for VerticalParser {
    fn push_line(&mut self, line_no: usize, line: &str) -> Option<ParsedUnit> {
        if line.trim().is_empty() {
            return None;
        }

        if is_separator(line) {
            if self.style == VerticalStyle::Boxed
                && self.current.as_ref().is_some_and(|b| !b.group.is_empty())
            {
                return self.take();
            }
            return None;
        }

        let Some((name, value)) = self.split_row(line) else {
            let block = self.current.get_or_insert_with(|| Block::orphan(line_no));
            block.mark_broken(MalformedReason::InvalidRow(line.trim().to_string()));
            return None;
        };

        if is_vertical_header(&[name, value]) {
            let finished = self.take();
            self.current = Some(Block::new(line_no));
            return finished;
        }

        self.current
            .get_or_insert_with(|| Block::orphan(line_no))
            .add(name, value);
        None
    }

    fn reject_line(&mut self, line_no: usize, reason: MalformedReason) -> Option<ParsedUnit> {
        self.current
            .get_or_insert_with(|| Block::orphan(line_no))
            .mark_broken(reason);
        None
    }

    fn finish(&mut self) -> Option<ParsedUnit> {
        self.take()
    }
}

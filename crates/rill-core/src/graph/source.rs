//! Splitting notebook text into cells and keeping cell ids stable across edits.

use syn::Block;
use syn::parse::Parser;
use syn::spanned::Spanned;

use super::types::{CellId, SourceSpan};

/// One top-level block of notebook text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBlock {
    pub span: SourceSpan,
    pub text: String,
}

/// A cell as supplied by the editor: id, span and text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellSource {
    pub id: CellId,
    pub span: SourceSpan,
    pub text: String,
}

impl CellSource {
    pub fn new(id: CellId, text: impl Into<String>) -> Self {
        Self {
            id,
            span: SourceSpan::default(),
            text: text.into(),
        }
    }
}

/// Line start offsets for converting between byte offsets and line/column.
struct LineIndex<'a> {
    source: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(source: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { source, starts }
    }

    /// Byte offset of a 1-based line and 0-based character column.
    fn offset(&self, line: usize, column: usize) -> usize {
        let Some(&start) = self.starts.get(line.saturating_sub(1)) else {
            return self.source.len();
        };
        self.source[start..]
            .char_indices()
            .nth(column)
            .map(|(i, _)| start + i)
            .unwrap_or(self.source.len())
    }

    /// 1-based line and 0-based character column of a byte offset.
    fn location(&self, offset: usize) -> (usize, usize) {
        let line = self.starts.partition_point(|&s| s <= offset);
        let start = self.starts[line - 1];
        (line, self.source[start..offset].chars().count())
    }

    fn span(&self, start: usize, end: usize) -> SourceSpan {
        let (start_line, start_col) = self.location(start);
        let (end_line, end_col) = self.location(end);
        SourceSpan {
            start_line,
            start_col,
            end_line,
            end_col,
            start,
            end,
        }
    }
}

/// Split notebook text into one block per top-level statement.
///
/// When the text as a whole does not parse, it is split on blank lines and
/// every paragraph is split on its own, so a syntax error stays inside the
/// paragraph that contains it.
pub fn split_cells(source: &str) -> Vec<SourceBlock> {
    let index = LineIndex::new(source);

    if let Some(ranges) = statement_ranges(source) {
        return ranges
            .into_iter()
            .map(|(start, end)| SourceBlock {
                span: index.span(start, end),
                text: source[start..end].to_string(),
            })
            .collect();
    }

    let mut blocks = Vec::new();
    for (start, end) in paragraphs(source) {
        let text = &source[start..end];
        match statement_ranges(text) {
            Some(ranges) => blocks.extend(ranges.into_iter().map(|(s, e)| SourceBlock {
                span: index.span(start + s, start + e),
                text: text[s..e].to_string(),
            })),
            None => blocks.push(SourceBlock {
                span: index.span(start, end),
                text: text.to_string(),
            }),
        }
    }
    blocks
}

/// Byte ranges of the top-level statements, or `None` if `source` does not parse.
fn statement_ranges(source: &str) -> Option<Vec<(usize, usize)>> {
    let stmts = Block::parse_within.parse_str(source).ok()?;
    let index = LineIndex::new(source);

    Some(
        stmts
            .iter()
            .map(|stmt| {
                let span = stmt.span();
                let (start, end) = (span.start(), span.end());
                (
                    index.offset(start.line, start.column),
                    index.offset(end.line, end.column),
                )
            })
            .filter(|(start, end)| start < end)
            .collect(),
    )
}

/// Byte ranges of blank-line separated paragraphs.
fn paragraphs(source: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut offset = 0;

    for line in source.split_inclusive('\n') {
        let content_end = offset + line.trim_end().len();
        if line.trim().is_empty() {
            if let Some(range) = current.take() {
                out.push(range);
            }
        } else {
            let start = current.map_or(offset + (line.len() - line.trim_start().len()), |c| c.0);
            current = Some((start, content_end));
        }
        offset += line.len();
    }
    if let Some(range) = current {
        out.push(range);
    }
    out
}

/// Allocates cell ids so that they survive edits.
///
/// Matching rules, in order:
/// 1. a block whose text equals a previous block's text keeps that id
///    (stable under insertion, deletion and reordering);
/// 2. an unmatched block takes the id of the first unmatched previous block
///    lying between the same matched neighbours (an in-place edit);
/// 3. anything else gets a fresh id.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_id: usize,
    previous: Vec<(CellId, String)>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign ids to a new list of blocks, in source order.
    pub fn assign(&mut self, blocks: Vec<SourceBlock>) -> Vec<CellSource> {
        let mut used = vec![false; self.previous.len()];
        let mut matched: Vec<Option<usize>> = vec![None; blocks.len()];

        for (i, block) in blocks.iter().enumerate() {
            let found = self
                .previous
                .iter()
                .enumerate()
                .position(|(k, (_, text))| !used[k] && text == &block.text);
            if let Some(k) = found {
                used[k] = true;
                matched[i] = Some(k);
            }
        }

        for i in 0..blocks.len() {
            if matched[i].is_some() {
                continue;
            }
            let lower = matched[..i].iter().rev().find_map(|m| *m);
            let upper = matched[i + 1..].iter().find_map(|m| *m);
            let candidate = (0..self.previous.len()).find(|&k| {
                !used[k]
                    && lower.is_none_or(|l| k > l)
                    && upper.is_none_or(|u| k < u)
            });
            if let Some(k) = candidate {
                used[k] = true;
                matched[i] = Some(k);
            }
        }

        let assigned: Vec<CellSource> = blocks
            .into_iter()
            .zip(matched)
            .map(|(block, m)| {
                let id = match m {
                    Some(k) => self.previous[k].0,
                    None => {
                        let id = CellId::new(self.next_id);
                        self.next_id += 1;
                        id
                    }
                };
                CellSource {
                    id,
                    span: block.span,
                    text: block.text,
                }
            })
            .collect();

        self.previous = assigned.iter().map(|c| (c.id, c.text.clone())).collect();
        assigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(blocks: &[SourceBlock]) -> Vec<&str> {
        blocks.iter().map(|b| b.text.as_str()).collect()
    }

    #[test]
    fn test_split_statements() {
        let source = "let a = 0;\n\nlet b = a + 1;\necho(b);\n";
        let blocks = split_cells(source);
        assert_eq!(texts(&blocks), vec!["let a = 0;", "let b = a + 1;", "echo(b);"]);
        assert_eq!(blocks[1].span.start_line, 3);
        assert_eq!(blocks[1].span.start_col, 0);
        assert_eq!(&source[blocks[2].span.start..blocks[2].span.end], "echo(b);");
    }

    #[test]
    fn test_split_multiline_item() {
        let source = "fn double(x: f64) -> f64 {\n    x * 2.0\n}\nlet y = double(2.0);";
        let blocks = split_cells(source);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].text.starts_with("fn double"));
        assert!(blocks[0].text.ends_with('}'));
        assert_eq!(blocks[0].span.end_line, 3);
    }

    #[test]
    fn test_syntax_error_stays_local() {
        let source = "let a = 1;\n\nlet b = ;\n\nlet c = a;";
        let blocks = split_cells(source);
        assert_eq!(texts(&blocks), vec!["let a = 1;", "let b = ;", "let c = a;"]);
        assert_eq!(blocks[1].span.start_line, 3);
    }

    #[test]
    fn test_ids_stable_under_insertion() {
        let mut ids = IdAllocator::new();
        let first = ids.assign(split_cells("let a = 1;\nlet b = 2;"));
        let second = ids.assign(split_cells("let z = 0;\nlet a = 1;\nlet b = 2;"));
        assert_eq!(second[1].id, first[0].id);
        assert_eq!(second[2].id, first[1].id);
        assert_ne!(second[0].id, first[0].id);
        assert_ne!(second[0].id, first[1].id);
    }

    #[test]
    fn test_ids_stable_under_deletion_and_reorder() {
        let mut ids = IdAllocator::new();
        let first = ids.assign(split_cells("let a = 1;\nlet b = 2;\nlet c = 3;"));
        let second = ids.assign(split_cells("let c = 3;\nlet a = 1;"));
        assert_eq!(second[0].id, first[2].id);
        assert_eq!(second[1].id, first[0].id);
    }

    #[test]
    fn test_edit_in_place_keeps_id() {
        let mut ids = IdAllocator::new();
        let first = ids.assign(split_cells("let a = 0;\necho(a + 1);"));
        let second = ids.assign(split_cells("let a = 5;\necho(a + 1);"));
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[1].id, first[1].id);
    }

    #[test]
    fn test_paragraphs() {
        let source = "a\nb\n\n  c\n";
        let ranges = paragraphs(source);
        assert_eq!(ranges, vec![(0, 3), (7, 8)]);
    }
}

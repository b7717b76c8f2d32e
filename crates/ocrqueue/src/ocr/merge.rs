//! Merging of the text and table passes of an AUTO recognition.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

static RE_HTML_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<table\b.*?</table\s*>").unwrap());

/// Combines the output of a text pass and a table pass over the same page.
///
/// Implementations must be deterministic: the same inputs always produce the
/// same document.
pub trait MergeStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn merge(&self, text_pass: &str, table_pass: &str) -> String;
}

/// Default merge: tables recognized by the table pass replace the tables of
/// the text pass, first to first, second to second. Table-pass tables without
/// a counterpart are appended at the end; text-pass tables without one are
/// kept as they were.
#[derive(Debug, Default, Clone, Copy)]
pub struct TableSplice;

impl MergeStrategy for TableSplice {
    fn name(&self) -> &str {
        "table_splice"
    }

    fn merge(&self, text_pass: &str, table_pass: &str) -> String {
        let tables: Vec<&str> = table_spans(table_pass)
            .into_iter()
            .map(|span| &table_pass[span])
            .collect();
        if tables.is_empty() {
            return text_pass.to_string();
        }

        let mut merged = String::with_capacity(text_pass.len() + table_pass.len());
        let mut cursor = 0;
        let mut used = 0;
        for span in table_spans(text_pass) {
            if span.start < cursor {
                continue;
            }
            let Some(table) = tables.get(used) else {
                break;
            };
            merged.push_str(&text_pass[cursor..span.start]);
            merged.push_str(table);
            cursor = span.end;
            used += 1;
        }
        merged.push_str(&text_pass[cursor..]);

        for table in &tables[used..] {
            let trimmed_len = merged.trim_end().len();
            merged.truncate(trimmed_len);
            if !merged.is_empty() {
                merged.push_str("\n\n");
            }
            merged.push_str(table);
        }
        merged
    }
}

/// Byte ranges of tables in a markdown document, in document order.
///
/// A table is either an HTML `<table>` element or a run of at least two
/// consecutive lines starting with `|`. Overlapping ranges are joined, so the
/// result never overlaps.
pub(crate) fn table_spans(doc: &str) -> Vec<Range<usize>> {
    let html: Vec<Range<usize>> = RE_HTML_TABLE.find_iter(doc).map(|m| m.range()).collect();
    let in_html = |pos: usize| html.iter().any(|r| r.contains(&pos));

    let mut spans = html.clone();
    let mut run: Option<(Range<usize>, usize)> = None;
    let mut offset = 0;

    for line in doc.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let content_end = start + line.trim_end_matches(['\n', '\r']).len();

        if line.trim_start().starts_with('|') && !in_html(start) {
            run = Some(match run {
                Some((range, rows)) => (range.start..content_end, rows + 1),
                None => (start..content_end, 1),
            });
        } else if let Some((range, rows)) = run.take() {
            if rows >= 2 {
                spans.push(range);
            }
        }
    }
    if let Some((range, rows)) = run {
        if rows >= 2 {
            spans.push(range);
        }
    }

    spans.sort_by_key(|r| r.start);
    let mut disjoint: Vec<Range<usize>> = Vec::with_capacity(spans.len());
    for span in spans {
        match disjoint.last_mut() {
            Some(last) if span.start < last.end => last.end = last.end.max(span.end),
            _ => disjoint.push(span),
        }
    }
    disjoint
}

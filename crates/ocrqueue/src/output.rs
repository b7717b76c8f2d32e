//! Result assembly for completed jobs.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::job::PageResult;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(#{1,6})[ \t]+(.+?)[ \t]*$").unwrap());

const UNTITLED: &str = "(untitled)";

/// Everything a caller gets back for a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutput {
    pub id: String,
    /// Per-page texts in page order.
    pub pages: Vec<PageResult>,
    /// All pages joined by a blank line.
    pub markdown: String,
    pub sections: Vec<Section>,
}

/// A markdown heading and the text under it, up to the next heading on the
/// same page. Text before the first heading of a page gets level 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub heading: String,
    pub level: u8,
    /// 0-based index of the page the section starts on.
    pub page: u32,
    pub content: String,
}

impl JobOutput {
    pub fn new(id: impl Into<String>, pages: Vec<PageResult>) -> Self {
        let markdown = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let sections = pages.iter().flat_map(page_sections).collect();

        Self {
            id: id.into(),
            pages,
            markdown,
            sections,
        }
    }
}

fn page_sections(page: &PageResult) -> Vec<Section> {
    let text = page.text.as_str();
    let mut sections = Vec::new();
    let headings: Vec<_> = HEADING_RE.captures_iter(text).collect();

    let first_start = headings
        .first()
        .and_then(|c| c.get(0))
        .map_or(text.len(), |m| m.start());
    let preamble = text[..first_start].trim();
    if !preamble.is_empty() {
        sections.push(Section {
            heading: UNTITLED.to_string(),
            level: 0,
            page: page.page_index,
            content: preamble.to_string(),
        });
    }

    for (i, caps) in headings.iter().enumerate() {
        let (Some(whole), Some(hashes), Some(title)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        let end = headings
            .get(i + 1)
            .and_then(|c| c.get(0))
            .map_or(text.len(), |m| m.start());

        sections.push(Section {
            heading: title.as_str().trim().to_string(),
            level: hashes.as_str().len() as u8,
            page: page.page_index,
            content: text[whole.end()..end].trim().to_string(),
        });
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::OcrMode;

    fn page(index: u32, text: &str) -> PageResult {
        PageResult {
            page_index: index,
            text: text.to_string(),
            mode_used: OcrMode::Text,
        }
    }

    #[test]
    fn test_markdown_joins_pages() {
        let output = JobOutput::new("job-1", vec![page(0, "first"), page(1, "second")]);
        assert_eq!(output.markdown, "first\n\nsecond");
        assert_eq!(output.pages.len(), 2);
    }

    #[test]
    fn test_sections_from_headings() {
        let text = "intro line\n# Title\nbody\n\n## Sub\nmore\n";
        let output = JobOutput::new("job-1", vec![page(0, text)]);

        let headings: Vec<_> = output
            .sections
            .iter()
            .map(|s| (s.heading.as_str(), s.level))
            .collect();
        assert_eq!(headings, vec![("(untitled)", 0), ("Title", 1), ("Sub", 2)]);
        assert_eq!(output.sections[0].content, "intro line");
        assert_eq!(output.sections[1].content, "body");
        assert_eq!(output.sections[2].content, "more");
    }

    #[test]
    fn test_page_without_headings_is_one_section() {
        let output = JobOutput::new("job-1", vec![page(0, "# A\nx"), page(1, "plain text")]);
        let last = output.sections.last().unwrap();
        assert_eq!(last.heading, "(untitled)");
        assert_eq!(last.page, 1);
        assert_eq!(last.content, "plain text");
    }

    #[test]
    fn test_blank_page_has_no_sections() {
        let output = JobOutput::new("job-1", vec![page(0, "  \n")]);
        assert!(output.sections.is_empty());
    }

    #[test]
    fn test_hash_without_space_is_not_heading() {
        let output = JobOutput::new("job-1", vec![page(0, "#hashtag\n####### seven")]);
        assert_eq!(output.sections.len(), 1);
        assert_eq!(output.sections[0].level, 0);
    }
}

//! Markdown → `ParsedBrochure` transformation.
//!
//! Pure function over the comrak AST: no I/O, idempotent, stable output
//! ordering for stable input. Spec tables are classified by data column
//! count (3/4/5); feature and USP sections are recognized by their H2
//! titles; remaining prose is paragraph-chunked.

use comrak::nodes::{AstNode, NodeValue};
use comrak::{Arena, Options, parse_document};
use std::sync::LazyLock;

use crate::availability::{looks_like_availability, parse_availability};
use crate::chunker::{OVERLAP_TOKENS, TARGET_TOKENS, chunk_paragraphs};
use crate::error::{ParseError, ParseResult};
use crate::frontmatter::extract_front_matter;
use crate::types::{FeatureEntry, ParsedBrochure, SpecCandidate, UspEntry};
use product_kb_core::split_numeric_unit;

static FEATURE_SECTION_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?i)feature|highlight").expect("static regex"));
static USP_SECTION_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?i)usp|unique selling").expect("static regex"));

fn comrak_options() -> Options<'static> {
    let mut opts = Options::default();
    opts.extension.table = true;
    opts.extension.strikethrough = true;
    opts
}

/// Which kind of section the walker is currently inside.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Section {
    Features(String),
    Usps(String),
    Other,
}

fn classify_section(title: &str) -> Section {
    if USP_SECTION_RE.is_match(title) {
        Section::Usps(title.to_string())
    } else if FEATURE_SECTION_RE.is_match(title) {
        Section::Features(title.to_string())
    } else {
        Section::Other
    }
}

/// Parse a brochure document.
///
/// # Errors
/// Fails only on an empty document or unparseable front-matter; malformed
/// tables and rows degrade to warnings.
pub fn parse(markdown: &str) -> ParseResult<ParsedBrochure> {
    if markdown.trim().is_empty() {
        return Err(ParseError::EmptyDocument);
    }

    let (meta, body) = extract_front_matter(markdown)?;

    let arena = Arena::new();
    let root = parse_document(&arena, body, &comrak_options());

    let mut out = ParsedBrochure {
        meta,
        ..ParsedBrochure::default()
    };

    let mut section = Section::Other;
    let mut prose: Vec<String> = Vec::new();
    let mut row_index = 0usize;
    // Header of the previous table; a repeated header means a table
    // continued across a page break, so its rows join the same logical
    // table (row_index keeps counting either way).
    let mut last_header: Option<Vec<String>> = None;

    for node in root.children() {
        match &node.data.borrow().value {
            NodeValue::Heading(h) => {
                if h.level == 2 {
                    let title = collect_text(node);
                    section = classify_section(&title);
                } else if h.level < 2 {
                    section = Section::Other;
                }
            }
            NodeValue::Table(_) => {
                handle_table(node, &mut out, &mut row_index, &mut last_header);
            }
            NodeValue::List(_) => match &section {
                Section::Features(title) => {
                    for body in list_item_texts(node) {
                        out.feature_blocks.push(FeatureEntry {
                            body,
                            section: title.clone(),
                        });
                    }
                }
                Section::Usps(title) => {
                    for body in list_item_texts(node) {
                        out.usps.push(UspEntry {
                            body,
                            section: title.clone(),
                        });
                    }
                }
                Section::Other => {
                    for text in list_item_texts(node) {
                        prose.push(text);
                    }
                }
            },
            NodeValue::Paragraph => {
                let text = collect_text(node);
                if text.trim().is_empty() {
                    continue;
                }
                match &section {
                    Section::Features(title) => out.feature_blocks.push(FeatureEntry {
                        body: text,
                        section: title.clone(),
                    }),
                    Section::Usps(title) => out.usps.push(UspEntry {
                        body: text,
                        section: title.clone(),
                    }),
                    Section::Other => prose.push(text),
                }
            }
            NodeValue::BlockQuote => {
                if section == Section::Other {
                    let text = collect_text(node);
                    if !text.trim().is_empty() {
                        prose.push(text);
                    }
                }
            }
            _ => {}
        }
    }

    out.paragraph_chunks = chunk_paragraphs(&prose, TARGET_TOKENS, OVERLAP_TOKENS);
    Ok(out)
}

/// Process one table node: classify by column count and emit one spec
/// candidate + one row chunk per data row.
fn handle_table<'a>(
    table: &'a AstNode<'a>,
    out: &mut ParsedBrochure,
    row_index: &mut usize,
    last_header: &mut Option<Vec<String>>,
) {
    let mut header: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();

    for row in table.children() {
        let is_header = match &row.data.borrow().value {
            NodeValue::TableRow(is_header) => *is_header,
            _ => continue,
        };
        let cells: Vec<String> = row
            .children()
            .map(|cell| collect_text(cell).trim().to_string())
            .collect();
        if is_header {
            header = cells;
        } else {
            rows.push(cells);
        }
    }

    let column_count = header.len();
    if column_count < 3 {
        tracing::warn!(
            columns = column_count,
            "skipping spec table with fewer than 3 columns"
        );
        out.warnings
            .push(format!("skipped table with {column_count} columns"));
        *last_header = None;
        return;
    }
    let effective_columns = if column_count > 5 {
        tracing::warn!(
            columns = column_count,
            "table has more than 5 columns; processing first 5"
        );
        out.warnings
            .push(format!("truncated table from {column_count} to 5 columns"));
        5
    } else {
        column_count
    };

    let continued = last_header.as_deref() == Some(header.as_slice());
    if !continued {
        *last_header = Some(header.clone());
    }

    for cells in rows {
        match build_candidate(&cells, effective_columns, *row_index) {
            Ok(candidate) => {
                out.row_chunks.push(candidate.to_row_chunk());
                out.spec_values.push(candidate);
                *row_index += 1;
            }
            Err(reason) => {
                tracing::warn!(row = *row_index, reason, "skipping malformed table row");
                out.warnings.push(format!("skipped row: {reason}"));
            }
        }
    }
}

/// Build a spec candidate from one row's cells.
fn build_candidate(
    cells: &[String],
    columns: usize,
    row_index: usize,
) -> Result<SpecCandidate, &'static str> {
    let cell = |idx: usize| cells.get(idx).map(|s| s.trim()).unwrap_or_default();

    let category = {
        let c = cell(0);
        if c.is_empty() { "Uncategorized" } else { c }
    };
    let name = {
        let n = cell(1);
        if n.is_empty() { "General" } else { n }
    };
    let raw_value = cell(2);
    if raw_value.is_empty() {
        return Err("empty value cell");
    }

    let (value_numeric, unit) = split_numeric_unit(raw_value);
    let value_text = if value_numeric.is_none() {
        Some(raw_value.to_string())
    } else {
        None
    };

    let (key_features, availability_cell) = match columns {
        5 => (non_empty(cell(3)), non_empty(cell(4))),
        4 => {
            // `Extra` column: availability-shaped cells are availability,
            // everything else is key features.
            let extra = cell(3);
            if looks_like_availability(extra) {
                (None, non_empty(extra))
            } else {
                (non_empty(extra), None)
            }
        }
        _ => (None, None),
    };

    let (variant_availability, availability_known) = match availability_cell {
        Some(raw) => {
            let reading = parse_availability(&raw);
            (non_empty(&reading.normalized), reading.known)
        }
        None => (None, true),
    };

    Ok(SpecCandidate {
        category: category.to_string(),
        name: name.to_string(),
        raw_value: raw_value.to_string(),
        value_numeric,
        value_text,
        unit,
        key_features,
        variant_availability,
        availability_known,
        row_index,
    })
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Flatten the inline text of a node (text + code spans; breaks as spaces).
fn collect_text<'a>(node: &'a AstNode<'a>) -> String {
    let mut out = String::new();
    for child in node.descendants() {
        match &child.data.borrow().value {
            NodeValue::Text(text) => out.push_str(text),
            NodeValue::Code(code) => out.push_str(&code.literal),
            NodeValue::SoftBreak | NodeValue::LineBreak => out.push(' '),
            _ => {}
        }
    }
    out.trim().to_string()
}

/// The text of each list item, one entry per item.
fn list_item_texts<'a>(list: &'a AstNode<'a>) -> Vec<String> {
    list.children()
        .filter(|item| matches!(item.data.borrow().value, NodeValue::Item(_)))
        .map(collect_text)
        .filter(|t| !t.is_empty())
        .collect()
}

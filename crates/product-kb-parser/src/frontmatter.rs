//! YAML front-matter extraction.

use crate::error::{ParseError, ParseResult};
use crate::types::BrochureMeta;

/// Split a document into `(front_matter, body)`.
///
/// Front-matter is the block between a leading `---` line and the next
/// `---` line. A document without one parses as an empty meta.
pub fn extract_front_matter(markdown: &str) -> ParseResult<(BrochureMeta, &str)> {
    let trimmed = markdown.trim_start_matches('\u{feff}');
    let Some(rest) = trimmed.strip_prefix("---") else {
        return Ok((BrochureMeta::default(), markdown));
    };
    // The opening fence must be its own line.
    let Some(rest) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) else {
        return Ok((BrochureMeta::default(), markdown));
    };

    let Some(end) = find_closing_fence(rest) else {
        return Err(ParseError::FrontMatter(
            "unterminated front-matter block".to_string(),
        ));
    };

    let yaml = &rest[..end.0];
    let body = &rest[end.1..];

    if yaml.trim().is_empty() {
        return Ok((BrochureMeta::default(), body));
    }

    let meta: BrochureMeta =
        serde_yaml::from_str(yaml).map_err(|e| ParseError::FrontMatter(e.to_string()))?;
    Ok((meta, body))
}

/// Find the closing `---` fence: returns (yaml_end, body_start) offsets.
fn find_closing_fence(rest: &str) -> Option<(usize, usize)> {
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some((offset, offset + line.len()));
        }
        offset += line.len();
    }
    None
}

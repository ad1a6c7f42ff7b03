//! Paragraph chunking for free prose.
//!
//! Prose that is neither a spec table nor a feature/USP section is packed
//! into chunks of roughly `target` tokens with `overlap` tokens carried
//! over between consecutive chunks, so sentence context survives the cut.

use crate::types::ParagraphChunk;
use product_kb_core::{content_hash, estimate_tokens};

pub const TARGET_TOKENS: usize = 512;
pub const OVERLAP_TOKENS: usize = 64;

/// Pack paragraphs into overlapping chunks.
///
/// Paragraph boundaries are respected: a paragraph is never split across
/// chunks unless it alone exceeds the target, in which case it is split on
/// token windows.
#[must_use]
pub fn chunk_paragraphs(paragraphs: &[String], target: usize, overlap: usize) -> Vec<ParagraphChunk> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    for para in paragraphs {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        let tokens = estimate_tokens(para);

        if tokens > target {
            // Oversized paragraph: flush what we have, then window it.
            flush(&mut chunks, &mut current, &mut current_tokens);
            split_oversized(&mut chunks, para, target, overlap);
            continue;
        }

        if current_tokens + tokens > target && current_tokens > 0 {
            let tail = overlap_tail(&current, overlap);
            flush(&mut chunks, &mut current, &mut current_tokens);
            if !tail.is_empty() {
                current = tail;
                current_tokens = estimate_tokens(&current);
            }
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(para);
        current_tokens += tokens;
    }
    flush(&mut chunks, &mut current, &mut current_tokens);

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, text)| ParagraphChunk {
            content_hash: content_hash(&text),
            text,
            index,
        })
        .collect()
}

fn flush(chunks: &mut Vec<String>, current: &mut String, current_tokens: &mut usize) {
    if !current.trim().is_empty() {
        chunks.push(std::mem::take(current));
    } else {
        current.clear();
    }
    *current_tokens = 0;
}

fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= overlap {
        return String::new();
    }
    words[words.len() - overlap..].join(" ")
}

fn split_oversized(chunks: &mut Vec<String>, para: &str, target: usize, overlap: usize) {
    let words: Vec<&str> = para.split_whitespace().collect();
    let step = target.saturating_sub(overlap).max(1);
    let mut start = 0;
    while start < words.len() {
        let end = (start + target).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn short_prose_is_one_chunk() {
        let paras = vec![words(20), words(30)];
        let chunks = chunk_paragraphs(&paras, TARGET_TOKENS, OVERLAP_TOKENS);
        assert_eq!(chunks.len(), 1);
        assert_eq!(estimate_tokens(&chunks[0].text), 50);
    }

    #[test]
    fn long_prose_splits_with_overlap() {
        let paras = vec![words(400), words(400), words(400)];
        let chunks = chunk_paragraphs(&paras, TARGET_TOKENS, OVERLAP_TOKENS);
        assert!(chunks.len() >= 2);
        // Every chunk except possibly the last should be near the target.
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(estimate_tokens(&chunk.text) <= TARGET_TOKENS + OVERLAP_TOKENS);
        }
        // Overlap: the second chunk starts with the tail of the first.
        let first_words: Vec<&str> = chunks[0].text.split_whitespace().collect();
        let tail = first_words[first_words.len() - OVERLAP_TOKENS..].join(" ");
        assert!(chunks[1].text.starts_with(&tail));
    }

    #[test]
    fn oversized_single_paragraph_is_windowed() {
        let paras = vec![words(1200)];
        let chunks = chunk_paragraphs(&paras, TARGET_TOKENS, OVERLAP_TOKENS);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(estimate_tokens(&chunk.text) <= TARGET_TOKENS);
        }
    }

    #[test]
    fn indices_and_hashes_are_assigned() {
        let paras = vec![words(600), words(600)];
        let chunks = chunk_paragraphs(&paras, TARGET_TOKENS, OVERLAP_TOKENS);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.content_hash.len(), 64);
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_paragraphs(&[], TARGET_TOKENS, OVERLAP_TOKENS).is_empty());
        assert!(chunk_paragraphs(&[String::new()], TARGET_TOKENS, OVERLAP_TOKENS).is_empty());
    }
}

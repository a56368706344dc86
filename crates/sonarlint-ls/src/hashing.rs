//
// hashing.rs
//
// Content hashes used to match findings across analysis runs
//

use sha2::{Digest, Sha256};

use crate::findings::{RawFinding, TextRange};

/// SHA-256 (hex) of `text` with every whitespace character removed.
///
/// Stripping whitespace keeps the hash stable across re-indentation and
/// trailing-space edits, which would otherwise break issue matching.
pub fn digest_without_whitespace(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::encode(Sha256::digest(stripped.as_bytes()))
}

/// Hash of a whole line (1-based). `None` when the line does not exist.
pub fn line_hash(content: &str, line: u32) -> Option<String> {
    let index = line.checked_sub(1)? as usize;
    content.lines().nth(index).map(digest_without_whitespace)
}

/// Hash of the text covered by `range`. Offsets are character offsets.
pub fn range_hash(content: &str, range: &TextRange) -> Option<String> {
    range_text(content, range).map(|text| digest_without_whitespace(&text))
}

fn range_text(content: &str, range: &TextRange) -> Option<String> {
    let start = range.start_line.checked_sub(1)? as usize;
    let end = range.end_line.checked_sub(1)? as usize;
    if end < start {
        return None;
    }

    let lines: Vec<&str> = content.lines().skip(start).take(end - start + 1).collect();
    if lines.len() != end - start + 1 {
        return None;
    }

    let mut text = String::new();
    for (i, line) in lines.iter().enumerate() {
        let from = if i == 0 { range.start_line_offset as usize } else { 0 };
        let to = if i == lines.len() - 1 {
            range.end_line_offset as usize
        } else {
            usize::MAX
        };
        text.extend(line.chars().skip(from).take(to.saturating_sub(from)));
        if i + 1 < lines.len() {
            text.push('\n');
        }
    }
    Some(text)
}

/// Fill in range and line hashes the engine did not provide, using the
/// analyzed content snapshot. Hashes already present are kept as-is.
pub fn fill_missing_hashes(finding: &mut RawFinding, content: &str) {
    let Some(range) = finding.text_range else {
        return;
    };
    if finding.range_hash.is_none() {
        finding.range_hash = range_hash(content, &range);
    }
    if finding.line_hash.is_none() {
        finding.line_hash = line_hash(content, range.start_line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT: &str = "def f():\n    x = 1\n    return 2\n";

    #[test]
    fn test_digest_ignores_whitespace() {
        assert_eq!(
            digest_without_whitespace("x = 1"),
            digest_without_whitespace("  x=1\t")
        );
        assert_ne!(digest_without_whitespace("x = 1"), digest_without_whitespace("x = 2"));
    }

    #[test]
    fn test_line_hash_is_one_based() {
        assert_eq!(line_hash(CONTENT, 2), Some(digest_without_whitespace("x = 1")));
        assert_eq!(line_hash(CONTENT, 0), None);
        assert_eq!(line_hash(CONTENT, 10), None);
    }

    #[test]
    fn test_range_hash_single_line() {
        let range = TextRange::new(2, 4, 2, 5);
        assert_eq!(range_hash(CONTENT, &range), Some(digest_without_whitespace("x")));
    }

    #[test]
    fn test_range_hash_multi_line() {
        let range = TextRange::new(2, 8, 3, 10);
        assert_eq!(
            range_hash(CONTENT, &range),
            Some(digest_without_whitespace("1\n    return"))
        );
    }

    #[test]
    fn test_range_hash_out_of_bounds() {
        assert_eq!(range_hash(CONTENT, &TextRange::new(5, 0, 6, 1)), None);
        assert_eq!(range_hash(CONTENT, &TextRange::new(3, 0, 2, 1)), None);
    }

    #[test]
    fn test_fill_missing_hashes_keeps_engine_hashes() {
        let mut finding = RawFinding::new("r", "m").with_range(TextRange::new(2, 4, 2, 5));
        finding.range_hash = Some("engine".to_string());
        fill_missing_hashes(&mut finding, CONTENT);
        assert_eq!(finding.range_hash.as_deref(), Some("engine"));
        assert_eq!(finding.line_hash, line_hash(CONTENT, 2));
    }

    #[test]
    fn test_fill_missing_hashes_without_range_is_noop() {
        let mut finding = RawFinding::new("r", "m");
        fill_missing_hashes(&mut finding, CONTENT);
        assert!(finding.range_hash.is_none());
        assert!(finding.line_hash.is_none());
    }
}

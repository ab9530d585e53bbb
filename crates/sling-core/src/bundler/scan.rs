//! `require()` scanner.
//!
//! Finds `require("...")` calls with a single string-literal argument in
//! module source, without full parsing. Calls inside strings, comments and
//! regex literals are ignored.

use crate::pipeline::lexer::{self, is_ident_char, LexError, SegmentKind};

/// A `require` call found in source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequireSpec {
    /// Specifier exactly as written between the quotes.
    pub specifier: String,
    /// Line number (1-indexed).
    pub line: u32,
}

/// Scan `source` for `require` specifiers.
///
/// Returns specifiers in first-appearance order, deduplicated.
pub fn scan_requires(source: &str) -> Result<Vec<RequireSpec>, LexError> {
    let segments = lexer::segments(source)?;
    let mut results: Vec<RequireSpec> = Vec::new();
    let mut line: u32 = 1;

    for (idx, seg) in segments.iter().enumerate() {
        if seg.kind == SegmentKind::String
            && idx > 0
            && opens_require_call(segments[idx - 1].text)
            && segments
                .get(idx + 1)
                .is_some_and(|next| next.kind == SegmentKind::Code && closes_call(next.text))
        {
            let specifier = &seg.text[1..seg.text.len() - 1];
            if !specifier.is_empty() && !results.iter().any(|r| r.specifier == specifier) {
                results.push(RequireSpec {
                    specifier: specifier.to_string(),
                    line,
                });
            }
        }
        line += seg.text.matches('\n').count() as u32;
    }

    Ok(results)
}

/// Whether `code` ends with `require(` (whitespace allowed).
fn opens_require_call(code: &str) -> bool {
    let Some(before_paren) = code.trim_end().strip_suffix('(') else {
        return false;
    };
    let Some(head) = before_paren.trim_end().strip_suffix("require") else {
        return false;
    };
    head.chars()
        .last()
        .map_or(true, |c| !is_ident_char(c) && c != '.')
}

fn closes_call(code: &str) -> bool {
    code.trim_start().starts_with(')')
}

//! Syntax downleveling.
//!
//! Rewrites block-scoped declarations (`let`, `const`) to `var` and turns
//! template literals without substitutions into plain double-quoted strings.
//! Strings, comments and regex literals are left alone.

use super::lexer::{self, is_ident_char, Segment, SegmentKind};
use super::{Transform, TransformContext, TransformError, TransformOutput};

const NAME: &str = "downlevel";

/// The downlevel stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct Downlevel;

impl Transform for Downlevel {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(
        &self,
        ctx: &TransformContext<'_>,
        source: &str,
    ) -> Result<TransformOutput, TransformError> {
        let segments = lexer::segments(source).map_err(|e| {
            TransformError::new(NAME, ctx.path, format!("{} (line {})", e.message, e.line))
        })?;

        let mut out = String::with_capacity(source.len());
        for (idx, seg) in segments.iter().enumerate() {
            match seg.kind {
                SegmentKind::Code => rewrite_declarations(seg.text, &mut out),
                SegmentKind::Template if !is_tagged(&segments[..idx]) => {
                    template_to_string(seg.text, &mut out);
                }
                _ => out.push_str(seg.text),
            }
        }

        Ok(TransformOutput::code(out))
    }
}

/// Replace `let`/`const` keywords in a run of plain code.
fn rewrite_declarations(code: &str, out: &mut String) {
    let mut last = 0;
    let mut prev: Option<char> = None;

    for (idx, c) in code.char_indices() {
        let at_word_start = prev.map_or(true, |p| !is_ident_char(p) && p != '.');
        prev = Some(c);
        if !at_word_start || !(c == 'l' || c == 'c') {
            continue;
        }

        let rest = &code[idx..];
        let keyword_len = if rest.starts_with("const") {
            5
        } else if rest.starts_with("let") {
            3
        } else {
            continue;
        };

        if is_declaration(&rest[keyword_len..]) {
            out.push_str(&code[last..idx]);
            out.push_str("var");
            last = idx + keyword_len;
        }
    }

    out.push_str(&code[last..]);
}

/// Whether the text after a keyword continues a declaration.
fn is_declaration(after: &str) -> bool {
    let trimmed = after.trim_start();
    let Some(next) = trimmed.chars().next() else {
        return false;
    };
    if next == '[' || next == '{' {
        return true;
    }
    // A binding name must be separated from the keyword.
    trimmed.len() < after.len() && (next.is_alphabetic() || next == '_' || next == '$')
}

/// A template directly after an identifier or call is tagged and keeps its form.
/// After a keyword such as `return` or `typeof` it is a plain expression.
fn is_tagged(previous: &[Segment<'_>]) -> bool {
    let Some(seg) = previous.last() else {
        return false;
    };
    if seg.kind != SegmentKind::Code {
        return false;
    }
    let text = seg.text.trim_end();
    match text.chars().last() {
        Some(')' | ']') => true,
        Some(c) if is_ident_char(c) => {
            let head = text.trim_end_matches(is_ident_char);
            let word = &text[head.len()..];
            head.ends_with('.') || !lexer::REGEX_PRECEDING_KEYWORDS.contains(&word)
        }
        _ => false,
    }
}

fn template_to_string(template: &str, out: &mut String) {
    let body = &template[1..template.len() - 1];
    if body.contains("${") {
        out.push_str(template);
        return;
    }

    out.push('"');
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('`') => out.push('`'),
                Some(escaped) => {
                    out.push('\\');
                    out.push(escaped);
                }
                None => out.push('\\'),
            },
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

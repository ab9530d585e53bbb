//! Source segmentation shared by the built-in transforms.
//!
//! Splits JavaScript source into runs of plain code, string literals,
//! template literals, comments and regex literals without building an AST.
//! Concatenating every segment's text reproduces the input exactly.

/// Kind of a source segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Code,
    String,
    Template,
    LineComment,
    BlockComment,
    Regex,
}

/// A contiguous slice of source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub kind: SegmentKind,
    pub text: &'a str,
}

impl Segment<'_> {
    #[must_use]
    pub fn is_comment(&self) -> bool {
        matches!(
            self.kind,
            SegmentKind::LineComment | SegmentKind::BlockComment
        )
    }
}

/// Unterminated literal or comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    /// 1-indexed line where the construct starts.
    pub line: usize,
}

/// Keywords after which a `/` starts a regex literal rather than a division.
pub(crate) const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "case", "do", "else", "in", "of", "new", "delete", "void",
    "throw", "yield", "await",
];

/// Split `source` into segments.
pub fn segments(source: &str) -> Result<Vec<Segment<'_>>, LexError> {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut out = Vec::new();
    let mut code_start = 0;
    let mut i = 0;

    while i < len {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();

        let (kind, end) = match b {
            b'"' | b'\'' => (SegmentKind::String, scan_string(source, i)?),
            b'`' => (SegmentKind::Template, scan_template(source, i)?),
            b'/' if next == Some(b'/') => {
                let end = source[i..].find('\n').map_or(len, |off| i + off);
                (SegmentKind::LineComment, end)
            }
            b'/' if next == Some(b'*') => {
                let end = source[i + 2..]
                    .find("*/")
                    .map(|off| i + 2 + off + 2)
                    .ok_or_else(|| error_at(source, i, "unterminated block comment"))?;
                (SegmentKind::BlockComment, end)
            }
            b'/' if regex_allowed(&source[code_start..i], &out) => match scan_regex(source, i) {
                Some(end) => (SegmentKind::Regex, end),
                None => {
                    i += 1;
                    continue;
                }
            },
            _ => {
                i += 1;
                continue;
            }
        };

        push_code(&mut out, source, code_start, i);
        out.push(Segment {
            kind,
            text: &source[i..end],
        });
        i = end;
        code_start = end;
    }

    push_code(&mut out, source, code_start, len);
    Ok(out)
}

fn push_code<'a>(out: &mut Vec<Segment<'a>>, source: &'a str, start: usize, end: usize) {
    if end > start {
        out.push(Segment {
            kind: SegmentKind::Code,
            text: &source[start..end],
        });
    }
}

fn error_at(source: &str, pos: usize, message: &str) -> LexError {
    LexError {
        message: message.to_string(),
        line: source[..pos].matches('\n').count() + 1,
    }
}

/// Scan a quoted string starting at `start`; returns the end offset (exclusive).
fn scan_string(source: &str, start: usize) -> Result<usize, LexError> {
    let bytes = source.as_bytes();
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => break,
            b if b == quote => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(error_at(source, start, "unterminated string literal"))
}

/// Scan a template literal (with nested substitutions) starting at `start`.
fn scan_template(source: &str, start: usize) -> Result<usize, LexError> {
    let bytes = source.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => return Ok(i + 1),
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                i = scan_substitution(source, i + 2)?;
            }
            _ => i += 1,
        }
    }
    Err(error_at(source, start, "unterminated template literal"))
}

/// Scan a `${ ... }` body starting after the opening brace; returns the offset after `}`.
fn scan_substitution(source: &str, start: usize) -> Result<usize, LexError> {
    let bytes = source.as_bytes();
    let mut depth = 1usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = scan_string(source, i)?,
            b'`' => i = scan_template(source, i)?,
            b'{' => {
                depth += 1;
                i += 1;
            }
            b'}' => {
                depth -= 1;
                i += 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => i += 1,
        }
    }
    Err(error_at(source, start, "unterminated template substitution"))
}

/// Scan a regex literal; `None` if the slash cannot start one on this line.
fn scan_regex(source: &str, start: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut i = start + 1;
    let mut in_class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return None,
            b'[' => {
                in_class = true;
                i += 1;
            }
            b']' => {
                in_class = false;
                i += 1;
            }
            b'/' if !in_class => {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                return Some(i);
            }
            _ => i += 1,
        }
    }
    None
}

/// Decide whether a `/` may start a regex given the code preceding it.
fn regex_allowed(pending_code: &str, previous: &[Segment<'_>]) -> bool {
    let trimmed = pending_code.trim_end();
    let context = if trimmed.is_empty() {
        // Look back through earlier segments, skipping comments.
        match previous.iter().rev().find(|s| !s.is_comment()) {
            None => return true,
            Some(seg) if seg.kind != SegmentKind::Code => return false,
            Some(seg) => seg.text.trim_end(),
        }
    } else {
        trimmed
    };

    let Some(last) = context.chars().last() else {
        return true;
    };

    if "(,=:[!&|?{};+-*%<>~^".contains(last) {
        return true;
    }

    if is_ident_char(last) {
        let word_start = context
            .char_indices()
            .rev()
            .find(|(_, c)| !is_ident_char(*c))
            .map_or(0, |(idx, c)| idx + c.len_utf8());
        return REGEX_PRECEDING_KEYWORDS.contains(&&context[word_start..]);
    }

    false
}

/// Identifier character (letters, digits, `_`, `$`).
#[must_use]
pub fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

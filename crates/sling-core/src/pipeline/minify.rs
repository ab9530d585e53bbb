//! Whitespace and comment minification.
//!
//! Line breaks in code are kept (one per run of blank lines) so automatic
//! semicolon insertion behaves the same as in the input. Literals are copied
//! verbatim.

use super::lexer::{self, is_ident_char, SegmentKind};
use super::{Transform, TransformContext, TransformError, TransformOutput};
use crate::config::MinifyScope;

const NAME: &str = "minify";

/// The minify stage.
#[derive(Debug, Clone, Copy)]
pub struct Minify {
    scope: MinifyScope,
}

impl Minify {
    #[must_use]
    pub fn new(scope: MinifyScope) -> Self {
        Self { scope }
    }
}

impl Transform for Minify {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(
        &self,
        ctx: &TransformContext<'_>,
        source: &str,
    ) -> Result<TransformOutput, TransformError> {
        if ctx.third_party && self.scope == MinifyScope::Local {
            return Ok(TransformOutput::code(source));
        }

        let segments = lexer::segments(source).map_err(|e| {
            TransformError::new(NAME, ctx.path, format!("{} (line {})", e.message, e.line))
        })?;

        let mut writer = Writer::default();
        for seg in &segments {
            match seg.kind {
                SegmentKind::Code => {
                    for c in seg.text.chars() {
                        writer.code_char(c);
                    }
                }
                SegmentKind::LineComment => {}
                SegmentKind::BlockComment => {
                    writer.whitespace(seg.text.contains('\n'));
                }
                SegmentKind::String | SegmentKind::Template | SegmentKind::Regex => {
                    writer.literal(seg.text);
                }
            }
        }

        Ok(TransformOutput::code(writer.out))
    }
}

#[derive(Default)]
enum Pending {
    #[default]
    None,
    Space,
    Newline,
}

#[derive(Default)]
struct Writer {
    out: String,
    pending: Pending,
}

impl Writer {
    fn whitespace(&mut self, newline: bool) {
        if newline {
            self.pending = Pending::Newline;
        } else if matches!(self.pending, Pending::None) {
            self.pending = Pending::Space;
        }
    }

    fn code_char(&mut self, c: char) {
        if c.is_whitespace() {
            self.whitespace(c == '\n');
        } else {
            self.flush(c);
            self.out.push(c);
        }
    }

    fn literal(&mut self, text: &str) {
        if let Some(first) = text.chars().next() {
            self.flush(first);
        }
        self.out.push_str(text);
    }

    /// Emit pending whitespace before `next`, if it is still needed.
    fn flush(&mut self, next: char) {
        let pending = std::mem::take(&mut self.pending);
        let Some(last) = self.out.chars().last() else {
            return;
        };
        match pending {
            Pending::None => {}
            Pending::Newline => self.out.push('\n'),
            Pending::Space => {
                if needs_space(last, next) {
                    self.out.push(' ');
                }
            }
        }
    }
}

/// Whether dropping the space between `a` and `b` would merge two tokens.
fn needs_space(a: char, b: char) -> bool {
    (is_ident_char(a) && is_ident_char(b)) || (a == b && matches!(a, '+' | '-' | '/'))
}

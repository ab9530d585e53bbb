//! Inline `fs.readFileSync` contents.
//!
//! Static reads relative to `__dirname` are replaced by the file contents:
//!
//! ```text
//! fs.readFileSync(__dirname + '/tpl.html', 'utf8')   -> "<p>...</p>"
//! fs.readFileSync(path.join(__dirname, 'logo.png'))  -> Buffer.from("iVBO...", "base64")
//! ```
//!
//! Every inlined file is reported as an extra input of the module.

use super::{Transform, TransformContext, TransformError, TransformOutput};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex_lite::{Captures, Regex};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const NAME: &str = "inline-files";

fn read_file_sync_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r#"fs\.readFileSync\(\s*(?:__dirname\s*\+\s*['"]([^'"]+)['"]|path\.join\(\s*__dirname\s*,\s*['"]([^'"]+)['"]\s*\))\s*(?:,\s*['"]([A-Za-z0-9-]+)['"]\s*)?\)"#,
            )
            .ok()
        })
        .as_ref()
}

/// The inline-files stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineFiles;

impl Transform for InlineFiles {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(
        &self,
        ctx: &TransformContext<'_>,
        source: &str,
    ) -> Result<TransformOutput, TransformError> {
        let Some(pattern) = read_file_sync_pattern() else {
            return Ok(TransformOutput::code(source));
        };
        if !source.contains("readFileSync") {
            return Ok(TransformOutput::code(source));
        }

        let dir = ctx.path.parent().unwrap_or_else(|| Path::new("/"));
        let mut out = String::with_capacity(source.len());
        let mut dependencies = Vec::new();
        let mut last = 0;

        for caps in pattern.captures_iter(source) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let (file, literal) = inline_call(ctx, dir, &caps)?;
            out.push_str(&source[last..whole.start()]);
            out.push_str(&literal);
            last = whole.end();
            if !dependencies.contains(&file) {
                dependencies.push(file);
            }
        }
        out.push_str(&source[last..]);

        Ok(TransformOutput { code: out, dependencies })
    }
}

/// Read the file a matched call refers to and render its replacement literal.
fn inline_call(
    ctx: &TransformContext<'_>,
    dir: &Path,
    caps: &Captures<'_>,
) -> Result<(PathBuf, String), TransformError> {
    let relative = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let file = dir.join(relative.trim_start_matches('/'));

    let bytes = std::fs::read(&file).map_err(|e| {
        TransformError::new(
            NAME,
            ctx.path,
            format!("cannot inline {}: {e}", file.display()),
        )
    })?;
    let file = dunce::canonicalize(&file).unwrap_or(file);

    let literal = match caps.get(3).map(|m| m.as_str().to_ascii_lowercase()) {
        None => format!("Buffer.from(\"{}\", \"base64\")", STANDARD.encode(&bytes)),
        Some(enc) if enc == "utf8" || enc == "utf-8" => {
            let text = String::from_utf8_lossy(&bytes);
            serde_json::to_string(&text).map_err(|e| {
                TransformError::new(NAME, ctx.path, format!("cannot encode contents: {e}"))
            })?
        }
        Some(enc) if enc == "base64" => format!("\"{}\"", STANDARD.encode(&bytes)),
        Some(enc) => {
            return Err(TransformError::new(
                NAME,
                ctx.path,
                format!("unsupported encoding '{enc}' for {}", file.display()),
            ))
        }
    };

    Ok((file, literal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_inlines_utf8_concat_form() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("tpl.html"), "<p>\"hi\"</p>\n").unwrap();
        let module = dir.path().join("a.js");

        let out = InlineFiles
            .apply(
                &TransformContext::new(&module),
                "var t = fs.readFileSync(__dirname + '/tpl.html', 'utf8');",
            )
            .unwrap();
        assert_eq!(out.code, r#"var t = "<p>\"hi\"</p>\n";"#);
        assert_eq!(out.dependencies.len(), 1);
        assert!(out.dependencies[0].ends_with("tpl.html"));
    }

    #[test]
    fn test_inlines_path_join_without_encoding() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("data.bin"), b"hello").unwrap();
        let module = dir.path().join("a.js");

        let out = InlineFiles
            .apply(
                &TransformContext::new(&module),
                r#"var b = fs.readFileSync(path.join(__dirname, "data.bin"));"#,
            )
            .unwrap();
        assert_eq!(out.code, r#"var b = Buffer.from("aGVsbG8=", "base64");"#);
    }

    #[test]
    fn test_leaves_dynamic_reads_alone() {
        let source = "var t = fs.readFileSync(name, 'utf8');";
        let out = InlineFiles
            .apply(&TransformContext::new(Path::new("/p/a.js")), source)
            .unwrap();
        assert_eq!(out.code, source);
        assert!(out.dependencies.is_empty());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let module = dir.path().join("a.js");
        let err = InlineFiles
            .apply(
                &TransformContext::new(&module),
                "fs.readFileSync(__dirname + '/nope.txt', 'utf8')",
            )
            .unwrap_err();
        assert_eq!(err.stage, "inline-files");
        assert!(err.message.contains("nope.txt"));
    }

    #[test]
    fn test_unsupported_encoding() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("x.txt"), "x").unwrap();
        let module = dir.path().join("a.js");
        let err = InlineFiles
            .apply(
                &TransformContext::new(&module),
                "fs.readFileSync(__dirname + '/x.txt', 'latin1')",
            )
            .unwrap_err();
        assert!(err.message.contains("latin1"));
    }
}

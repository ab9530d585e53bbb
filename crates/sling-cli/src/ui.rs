//! Console status lines.

use owo_colors::{OwoColorize, Stream};

/// Informational notice (cyan).
pub fn notice(message: &str) {
    println!(
        "{}",
        message.if_supports_color(Stream::Stdout, |m| m.cyan())
    );
}

/// Build succeeded (green).
pub fn success(message: &str) {
    println!(
        "{}",
        message.if_supports_color(Stream::Stdout, |m| m.green())
    );
}

/// Build or setup failure (red, stderr).
pub fn failure(message: &str) {
    eprintln!(
        "{}",
        message.if_supports_color(Stream::Stderr, |m| m.red())
    );
}

/// Linter diagnostics under a bold header, all in red.
pub fn lint_errors(diagnostics: &str) {
    println!("{}", lint_block(diagnostics, Stream::Stdout));
}

fn lint_block(diagnostics: &str, stream: Stream) -> String {
    format!(
        "{}\n{}",
        "LINT ERRORS:".if_supports_color(stream, |m| m.red().bold().to_string()),
        diagnostics
            .trim_end()
            .if_supports_color(stream, |m| m.red())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lint_block_is_red() {
        owo_colors::set_override(true);
        let block = lint_block("a.js: line 2, Missing semicolon.\n", Stream::Stdout);
        owo_colors::unset_override();

        let (header, body) = block.split_once('\n').unwrap();
        assert!(header.contains("LINT ERRORS:"));
        assert_eq!(
            body,
            format!("{}", "a.js: line 2, Missing semicolon.".red())
        );
    }
}

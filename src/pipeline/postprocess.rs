//! Post-processing: deterministic cleanup of derived OCR text.
//!
//! ## Why is post-processing necessary?
//!
//! OCR line output is noisy in boring, mechanical ways: Windows line
//! endings on some backends, trailing spaces where a word sat near the
//! page edge, runs of blank lines where a page had whitespace, and
//! invisible Unicode (zero-width spaces, BOMs, soft hyphens) that survives
//! into downstream search indexes and breaks exact-match lookups.
//!
//! This module applies a handful of cheap, deterministic rules that fix
//! those artefacts without touching content. Determinism matters more
//! than cleverness here: the text view must come out identical on every
//! re-run of a convert stage, or resumed pipelines would rewrite blobs
//! that have not changed.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so the line-based rules see `\n`
//! only; the final-newline pass runs last so no later rule can undo it.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to a derived plain-text view.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Trim trailing whitespace per line
/// 3. Collapse 3+ consecutive blank lines down to 2
/// 4. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 5. Ensure the text ends with exactly one newline (empty stays empty)
pub fn clean_text(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }
    let s = normalise_line_endings(input);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Trim trailing whitespace per line ────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 3: Collapse excessive blank lines ───────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 4: Remove invisible Unicode characters ──────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 5: Ensure text ends with single newline ─────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}\n", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_becomes_lf() {
        assert_eq!(clean_text("a\r\nb\rc"), "a\nb\nc\n");
    }

    #[test]
    fn trailing_spaces_are_trimmed() {
        assert_eq!(clean_text("word   \nnext\t"), "word\nnext\n");
    }

    #[test]
    fn blank_line_runs_collapse() {
        assert_eq!(clean_text("a\n\n\n\n\n\nb"), "a\n\n\nb\n");
    }

    #[test]
    fn invisible_chars_are_stripped() {
        assert_eq!(clean_text("a\u{200B}b\u{FEFF}c"), "abc\n");
    }

    #[test]
    fn exactly_one_final_newline() {
        assert_eq!(clean_text("text"), "text\n");
        assert_eq!(clean_text("text\n\n\n"), "text\n");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text("\n\n"), "");
    }

    #[test]
    fn cleanup_is_idempotent() {
        let once = clean_text("a  \r\n\n\n\n\nb\u{00AD}");
        assert_eq!(clean_text(&once), once);
    }
}

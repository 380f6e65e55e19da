//! Deterministic cleanup of remote model output.
//!
//! Vision models sometimes echo the instruction ("Text: ..."), wrap the
//! answer in code fences, or emit Windows line endings and zero-width
//! characters. These rules remove that noise without touching content. In
//! markdown mode two table rules also repair GFM tables.
//!
//! Rule order:
//! 1. Normalise line endings (CRLF → LF)
//! 2. Strip outer code fences
//! 3. Strip a leading `Text:` echo
//! 4. Trim trailing whitespace per line
//! 5. Collapse runs of blank lines to one
//! 6. *(markdown)* insert a missing header separator in tables
//! 7. *(markdown)* drop separator rows inside a table body
//! 8. Strip invisible Unicode
//! 9. Trim leading and trailing blank lines
//!
//! Error markers never pass through here: a failed page's marker is written
//! verbatim so the classifier sees it exactly.

use crate::config::OutputFormat;
use once_cell::sync::Lazy;
use regex::Regex;

/// Clean one page of model output for the given format.
pub fn clean_page_text(input: &str, format: OutputFormat) -> String {
    let s = normalise_line_endings(input);
    let s = strip_outer_fences(&s);
    let s = strip_text_echo(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = match format {
        OutputFormat::Markdown => remove_mid_table_separators(&fix_missing_table_separator(&s)),
        OutputFormat::Plain => s,
    };
    let s = remove_invisible_chars(&s);
    s.trim_matches('\n').to_string()
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md|text|plaintext)?\n(.*)\n```$").unwrap()
});

fn strip_outer_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

static RE_TEXT_ECHO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*text:[ \t]*\n?").unwrap());

fn strip_text_echo(input: &str) -> String {
    RE_TEXT_ECHO.replace(input, "").into_owned()
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// A table whose first row is followed directly by a data row gets a
/// `| --- |` separator after the header.
fn fix_missing_table_separator(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut out = Vec::with_capacity(lines.len() + 4);
    let mut prev_in_table = false;

    for (i, line) in lines.iter().enumerate() {
        out.push(line.to_string());
        let header = is_table_row(line) && !is_separator_row(line) && !prev_in_table;
        if header {
            let next = lines.get(i + 1).copied().unwrap_or("");
            if is_table_row(next) && !is_separator_row(next) {
                let cols = line.trim().matches('|').count().saturating_sub(1).max(1);
                out.push(format!("|{}", " --- |".repeat(cols)));
            }
        }
        prev_in_table = is_table_row(line);
    }
    out.join("\n")
}

/// Only the separator directly after the header survives.
fn remove_mid_table_separators(input: &str) -> String {
    let mut out = Vec::new();
    let mut row = 0usize;
    for line in input.lines() {
        if is_table_row(line) {
            row += 1;
            if is_separator_row(line) && row != 2 {
                continue;
            }
        } else {
            row = 0;
        }
        out.push(line);
    }
    out.join("\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences_and_echo() {
        let input = "```text\nText:\nHello world\n```";
        assert_eq!(clean_page_text(input, OutputFormat::Plain), "Hello world");

        let input = "```markdown\n# Title\nbody\n```";
        assert_eq!(clean_page_text(input, OutputFormat::Markdown), "# Title\nbody");
    }

    #[test]
    fn echo_only_stripped_at_start() {
        let input = "Intro\nText: kept";
        assert_eq!(clean_page_text(input, OutputFormat::Plain), "Intro\nText: kept");
    }

    #[test]
    fn whitespace_hygiene() {
        let input = "\r\n\r\na  \r\n\r\n\r\n\r\nb\u{200B}c\t\n\n";
        assert_eq!(clean_page_text(input, OutputFormat::Plain), "a\n\nbc");
    }

    #[test]
    fn markdown_tables_repaired() {
        let input = "| A | B |\n| 1 | 2 |\n| --- | --- |\n| 3 | 4 |";
        let out = clean_page_text(input, OutputFormat::Markdown);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(is_separator_row(lines[1]));
        assert_eq!(lines[3], "| 3 | 4 |");
    }

    #[test]
    fn plain_mode_leaves_pipes_alone() {
        let input = "| A | B |\n| 1 | 2 |";
        assert_eq!(clean_page_text(input, OutputFormat::Plain), input);
    }

    #[test]
    fn clean_table_unchanged() {
        let input = "| H1 | H2 |\n| --- | --- |\n| a | b |\n| c | d |";
        assert_eq!(clean_page_text(input, OutputFormat::Markdown), input);
    }
}

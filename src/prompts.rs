//! Transcription instructions sent to remote vision models.
//!
//! The output format selects one of two contracts. Markdown mode asks the
//! model to infer structure from the visual hierarchy; plain mode asks for the
//! raw text and nothing else. Both demand verbatim content.

use crate::config::OutputFormat;

/// Instruction for [`OutputFormat::Markdown`].
pub const MARKDOWN_PROMPT: &str = r#"Please extract all the text from this scanned document page and format it as markdown.

Rules:
- Output the content in markdown format
- Preserve the document structure (headings, sections, lists, etc.)
- Infer heading levels from visual cues (font size, weight, indentation):
  # for main headings, ## for subheadings, ### for sub-subheadings
- Use - or * for bullet points and 1. 2. 3. for numbered lists
- Use markdown table syntax for tables
- Use ``` code blocks if code is present and > for blockquotes
- Use **bold** for emphasized text if applicable
- Maintain paragraph breaks with blank lines between paragraphs
- Include all text exactly as it appears; you MUST NOT omit any section
- Do not add any commentary or explanations
- Just output the formatted markdown content"#;

/// Instruction for [`OutputFormat::Plain`].
pub const PLAIN_PROMPT: &str = r#"Please extract all the text from this scanned document page.

Rules:
- Preserve the original formatting as much as possible
- Maintain paragraph breaks and line breaks
- Include all text exactly as it appears
- Do not add any commentary or explanations
- Just output the raw text content"#;

pub fn prompt_for(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Markdown => MARKDOWN_PROMPT,
        OutputFormat::Plain => PLAIN_PROMPT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_selects_contract() {
        assert!(prompt_for(OutputFormat::Markdown).contains("markdown table"));
        assert!(prompt_for(OutputFormat::Plain).contains("raw text"));
        assert!(!prompt_for(OutputFormat::Plain).contains("# for main headings"));
    }
}

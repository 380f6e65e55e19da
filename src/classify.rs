//! Error-signature classification of backend output.
//!
//! Backends never return structured errors: a failed page is an error string
//! in its transcript slot, and a remote service may also answer "successfully"
//! with an error payload. [`looks_like_error`] is the single place that decides
//! whether a piece of text is such a failure. It is used twice: to abort a
//! document mid-extraction, and to decide whether an existing transcript on
//! disk must be redone.
//!
//! Matching is case-insensitive and purely substring-based (no anchors, no
//! word boundaries), so any text containing a match also matches.

use once_cell::sync::Lazy;
use regex::Regex;

/// Known failure signatures.
///
/// Order is irrelevant; the patterns are compiled into one alternation.
const SIGNATURES: &[&str] = &[
    // Markers written by our own backends.
    r"\[error extracting page",
    r"page-\d+ extraction error:",
    // HTTP / service status codes.
    r"error code:\s*[45]\d\d",
    r"status code:?\s*[45]\d\d",
    r"http\s*(?:status\s*)?[45]\d\d",
    // Named remote error classes.
    r"invalid_request_error",
    r"authentication_error",
    r"permission_error",
    r"rate_limit_error",
    r"api_error",
    r"overloaded_error",
    r"credit balance is too low",
    r"insufficient_quota",
    r"insufficient credit",
    r"resource_exhausted",
    r"permission_denied",
];

static RE_ERROR: Lazy<Regex> = Lazy::new(|| {
    let alternation = SIGNATURES.join("|");
    Regex::new(&format!("(?i)(?:{alternation})")).expect("signature table is a valid regex")
});

/// True when `text` carries a known extraction or remote-service error.
///
/// Empty text is never an error; absent output is handled by the caller.
pub fn looks_like_error(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    RE_ERROR.is_match(text)
}

/// The first matching signature, for log lines and failure reports.
pub fn matched_signature(text: &str) -> Option<&str> {
    RE_ERROR.find(text).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_not_error() {
        assert!(!looks_like_error(""));
        assert!(!looks_like_error("   \n\t"));
    }

    #[test]
    fn ordinary_text_is_clean() {
        let page = "=== PAGE 1 ===\nMinutes of the meeting held on 4 March.\n\
                    The committee discussed the API and the error budget.";
        assert!(!looks_like_error(page));
    }

    #[test]
    fn own_markers_match() {
        assert!(looks_like_error("[Error extracting page 3: connection reset]"));
        assert!(looks_like_error("page-7 extraction error: timed out"));
    }

    #[test]
    fn named_classes_match_case_insensitively() {
        for t in [
            "rate_limit_error",
            "Overloaded_Error",
            "{\"type\":\"invalid_request_error\"}",
            "AUTHENTICATION_ERROR",
            "permission_error: no access",
            "type: api_error",
            "Your credit balance is too low to access the Anthropic API",
            "RESOURCE_EXHAUSTED: quota",
        ] {
            assert!(looks_like_error(t), "should match: {t}");
        }
    }

    #[test]
    fn status_codes_match() {
        assert!(looks_like_error("Error code: 529 - overloaded"));
        assert!(looks_like_error("status code 429"));
        assert!(looks_like_error("HTTP 503 Service Unavailable"));
        assert!(!looks_like_error("Error code: 200"));
    }

    #[test]
    fn superstrings_still_match() {
        let t = "rate_limit_error";
        for s in [
            format!("xx{t}"),
            format!("{t}yy"),
            format!("=== PAGE 2 ===\nsome text {t} more text"),
        ] {
            assert!(looks_like_error(&s), "superstring lost match: {s}");
        }
        let t = "Error code: 500";
        assert!(looks_like_error(&format!("prefix{t}0 suffix")));
    }

    #[test]
    fn matched_signature_reports_hit() {
        assert_eq!(
            matched_signature("boom: overloaded_error now"),
            Some("overloaded_error")
        );
        assert_eq!(matched_signature("all good"), None);
    }
}

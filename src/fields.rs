//! Bounding and escaping helpers for outbound payload fields.
//!
//! Bitbucket rejects or mangles status fields longer than its column limits,
//! so every string we send goes through [`abbreviate`].

use std::fmt::Write as _;

/// Maximum length of the `key`, `name` and `description` fields.
pub const MAX_FIELD_LENGTH: usize = 255;

/// Maximum length of the `url` field.
pub const MAX_URL_FIELD_LENGTH: usize = 450;

const ELLIPSIS: &str = "...";

/// Truncates `text` to at most `max_width` characters.
///
/// Text that fits is returned unchanged. Longer text keeps its first
/// `max_width - 3` characters followed by `...`, so the result is exactly
/// `max_width` characters long. Counting is per `char`, so a multi-byte
/// character is never split.
pub fn abbreviate(text: &str, max_width: usize) -> String {
    debug_assert!(
        max_width > ELLIPSIS.len(),
        "minimum abbreviation width is 4"
    );

    if text.chars().count() <= max_width {
        return text.to_string();
    }

    let keep = max_width.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Escapes `text` for embedding in a JavaScript string literal.
///
/// Quotes, backslashes and forward slashes get a backslash; the usual
/// control characters get their short escape; every other control character
/// and every non-ASCII UTF-16 unit becomes `\uXXXX`.
pub fn escape_js(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut units = [0u16; 2];

    for ch in text.chars() {
        match ch {
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            '\u{08}' => out.push_str("\\b"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\u{0C}' => out.push_str("\\f"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 || (c as u32) > 0x7f => {
                for unit in c.encode_utf16(&mut units).iter() {
                    // writing to a String cannot fail
                    let _ = write!(out, "\\u{:04X}", unit);
                }
            }
            c => out.push(c),
        }
    }

    out
}

/// Escapes a build display name.
///
/// Folder-style nested jobs are joined with `»`, which Bitbucket chokes on;
/// it is turned into a plain `/` after escaping.
pub fn escape_display_name(text: &str) -> String {
    escape_js(text).replace("\\u00BB", "\\/")
}

/// Returns true if `value` is absent or only whitespace.
pub fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

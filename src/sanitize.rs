//! Text cleanup applied to message bodies before analysis.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_general_category::{get_general_category, GeneralCategory};

/// Maximum length, in characters, of sanitized text.
pub const MAX_SANITIZED_CHARS: usize = 100_000;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// Unicode "Other" characters: controls, format characters (zero-width and bidi
/// marks), private use, surrogates, and unassigned code points.
fn is_other(c: char) -> bool {
    matches!(
        get_general_category(c),
        GeneralCategory::Control
            | GeneralCategory::Format
            | GeneralCategory::PrivateUse
            | GeneralCategory::Surrogate
            | GeneralCategory::Unassigned
    )
}

/// Strips markup, removes control characters, and bounds the length of `body`.
///
/// 1. Every `<...>` tag becomes a single space so adjacent words stay apart.
///    Entities are left as written.
/// 2. Characters of the Unicode "Other" category (controls, zero-width and bidi
///    format marks, private use, unassigned) are removed. Line breaks and tabs
///    count as whitespace, and whitespace runs collapse to one space with the ends
///    trimmed.
/// 3. The result is cut to [`MAX_SANITIZED_CHARS`] characters on a char boundary.
///
/// The function is idempotent: sanitizing its own output returns it unchanged.
///
/// ```
/// use mail_insight::sanitize::sanitize;
///
/// assert_eq!(sanitize("<p>Hello</p><p>world</p>\u{7}"), "Hello world");
/// ```
#[must_use]
pub fn sanitize(body: &str) -> String {
    let untagged = TAG.replace_all(body, " ");

    let mut out = String::with_capacity(untagged.len());
    let mut pending_space = false;
    for c in untagged.chars() {
        if c.is_whitespace() {
            pending_space = true;
        } else if is_other(c) {
            // Dropped without acting as a word boundary
        } else {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
    }

    if let Some((cut, _)) = out.char_indices().nth(MAX_SANITIZED_CHARS) {
        out.truncate(cut);
        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
    }

    out
}

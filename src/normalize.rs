//! Conversion of raw RFC 822 messages into flat, decoded records.
//!
//! Decoding never fails. Encoded header words are decoded with their declared
//! charsets, and undecodable bytes are replaced rather than rejected.

use crate::mailbox::RawMessage;
use mailparse::{parse_mail, DispositionType, MailHeaderMap, ParsedMail};
use serde::Serialize;
use tracing::{debug, warn};

/// A decoded message: selected headers plus a plain-text body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedMessage {
    /// Server-assigned identifier.
    pub identifier: String,
    /// Decoded `From` header.
    pub from: String,
    /// `Date` header as sent.
    pub date: String,
    /// Decoded `Subject` header.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Decodes `raw` into a [`NormalizedMessage`].
///
/// A multipart body is the newline-joined content of every `text/plain` leaf that is
/// not an attachment, in depth-first order. A single-part body is its decoded payload.
/// Messages with no qualifying part get an empty body.
#[must_use]
pub fn normalize(raw: &RawMessage) -> NormalizedMessage {
    let parsed = match parse_mail(&raw.envelope) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(
                identifier = %raw.identifier,
                error = %e,
                "Unparseable message, keeping raw text as body"
            );
            return NormalizedMessage {
                identifier: raw.identifier.clone(),
                from: String::new(),
                date: String::new(),
                subject: String::new(),
                body: String::from_utf8_lossy(&raw.envelope).into_owned(),
            };
        }
    };

    let header = |name: &str| parsed.headers.get_first_value(name).unwrap_or_default();

    let body = if is_multipart(&parsed) {
        let mut parts = Vec::new();
        collect_plain_text(&parsed, &raw.identifier, &mut parts);
        parts.join("\n")
    } else {
        decoded_body(&parsed, &raw.identifier)
    };

    debug!(
        identifier = %raw.identifier,
        body_len = body.len(),
        "Normalized message"
    );

    NormalizedMessage {
        identifier: raw.identifier.clone(),
        from: header("From"),
        date: header("Date"),
        subject: header("Subject"),
        body,
    }
}

fn is_multipart(part: &ParsedMail<'_>) -> bool {
    !part.subparts.is_empty() || part.ctype.mimetype.starts_with("multipart/")
}

fn collect_plain_text(part: &ParsedMail<'_>, identifier: &str, out: &mut Vec<String>) {
    if !part.subparts.is_empty() {
        for child in &part.subparts {
            collect_plain_text(child, identifier, out);
        }
        return;
    }

    if !part.ctype.mimetype.eq_ignore_ascii_case("text/plain") {
        return;
    }
    if part.get_content_disposition().disposition == DispositionType::Attachment {
        return;
    }

    let mut text = decoded_body(part, identifier);
    // The line break before a boundary delimiter belongs to the delimiter
    if text.ends_with("\r\n") {
        text.truncate(text.len() - 2);
    } else if text.ends_with('\n') {
        text.truncate(text.len() - 1);
    }
    out.push(text);
}

fn decoded_body(part: &ParsedMail<'_>, identifier: &str) -> String {
    match part.get_body() {
        Ok(text) => text,
        Err(e) => {
            debug!(identifier, error = %e, "Falling back to raw body bytes");
            part.get_body_raw()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default()
        }
    }
}

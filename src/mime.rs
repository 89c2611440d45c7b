//! Message parsing and MIME handling
//!
//! Parses RFC822 messages using `mailparse` and turns them into the display
//! fields of a message record. Every function here is total: malformed input
//! degrades to a best-effort value and never becomes an error.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, SecondsFormat};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use quoted_printable::ParseMode;
use tracing::debug;

/// Maximum snippet length in characters
pub const SNIPPET_MAX_CHARS: usize = 240;

/// Header name used to wrap raw values for the RFC 2047 decoder
const DECODE_CARRIER: &str = "X-Decode";

/// Base64 for `B` encoded-words, tolerant of missing padding
const WORD_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Display fields decoded from one raw message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedMessage {
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: Option<String>,
    pub snippet: String,
}

/// Decode a raw RFC822 message into display fields
///
/// A message `mailparse` cannot parse at all yields empty fields rather than
/// an error.
pub fn decode_message(raw: &[u8]) -> DecodedMessage {
    let parsed = match mailparse::parse_mail(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(error = %e, "unparseable message, returning empty fields");
            return DecodedMessage::default();
        }
    };

    let raw_header = |name: &str| {
        parsed
            .headers
            .get_first_header(name)
            .map(|h| String::from_utf8_lossy(h.get_value_raw()).into_owned())
    };

    DecodedMessage {
        subject: decode_header(raw_header("Subject").as_deref()),
        from: decode_header(raw_header("From").as_deref()),
        to: decode_header(raw_header("To").as_deref()),
        date: normalize_date(raw_header("Date").as_deref()),
        snippet: extract_snippet(&parsed),
    }
}

/// Decode RFC 2047 encoded-words in a header value
///
/// Segments are decoded with their declared charset and invalid byte
/// sequences are replaced. A well-formed encoded-word naming an unknown
/// charset is decoded as UTF-8; one with broken syntax is kept verbatim.
/// The pieces are concatenated in order. `None` or empty input yields an
/// empty string.
pub fn decode_header(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };
    if raw.is_empty() {
        return String::new();
    }

    // Folding is whitespace for decoding purposes; a bare line break would
    // otherwise end the carrier header early.
    let unfolded = raw.replace(['\r', '\n'], " ");
    let line = format!("{DECODE_CARRIER}: {unfolded}");
    match mailparse::parse_header(line.as_bytes()) {
        Ok((header, _)) => decode_leftover_words(&header.get_value()),
        Err(e) => {
            debug!(error = %e, "header not decodable, keeping raw value");
            raw.to_owned()
        }
    }
}

/// Decode encoded-words that `mailparse` left in place
///
/// `mailparse` keeps a syntactically valid word verbatim when it cannot map
/// its charset. Those payloads are decoded as UTF-8, replacing invalid
/// sequences.
fn decode_leftover_words(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("=?") {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        match split_encoded_word(candidate) {
            Some((len, bytes)) => {
                out.push_str(&String::from_utf8_lossy(&bytes));
                rest = &candidate[len..];
            }
            None => {
                out.push_str("=?");
                rest = &candidate[2..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parse `=?charset?E?payload?=` at the start of `input`
///
/// Returns the byte length of the word and its transfer-decoded payload.
fn split_encoded_word(input: &str) -> Option<(usize, Vec<u8>)> {
    let body = input.strip_prefix("=?")?;
    let mut parts = body.splitn(3, '?');
    let charset = parts.next()?;
    let encoding = parts.next()?;
    let tail = parts.next()?;
    let end = tail.find("?=")?;
    let payload = &tail[..end];

    if charset.is_empty()
        || charset.contains(char::is_whitespace)
        || payload.contains(|c: char| c.is_whitespace() || c == '?')
    {
        return None;
    }

    let bytes = match encoding {
        "B" | "b" => WORD_BASE64.decode(payload).ok()?,
        "Q" | "q" => quoted_printable::decode(payload.replace('_', " "), ParseMode::Robust).ok()?,
        _ => return None,
    };
    let len = "=?".len() + charset.len() + 1 + encoding.len() + 1 + end + "?=".len();
    Some((len, bytes))
}

/// Normalize an RFC 2822 date header to ISO-8601
///
/// Parsing keeps the original UTC offset (`2025-01-01T09:30:00+01:00`), and
/// a trailing zone comment such as `(UTC)` is ignored. Anything else is
/// returned unchanged, and absent or empty input yields `None`.
pub fn normalize_date(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    if raw.is_empty() {
        return None;
    }

    let trimmed = raw.trim();
    for candidate in [trimmed, strip_trailing_comment(trimmed)] {
        if let Ok(parsed) = DateTime::parse_from_rfc2822(candidate) {
            return Some(parsed.to_rfc3339_opts(SecondsFormat::Secs, false));
        }
    }

    Some(raw.to_owned())
}

/// Drop a trailing `(comment)` such as `(UTC)` or `(PST)`
fn strip_trailing_comment(value: &str) -> &str {
    match value.rfind('(') {
        Some(open) if value.ends_with(')') => value[..open].trim_end(),
        _ => value,
    }
}

/// Extract a bounded plain-text preview
///
/// Walks the part tree depth-first in document order and uses the first
/// `text/plain` part that is not an attachment and has a non-empty body.
/// The body is charset-decoded (lossy), whitespace runs are collapsed to
/// single spaces, and the result is truncated to [`SNIPPET_MAX_CHARS`].
pub fn extract_snippet(message: &ParsedMail<'_>) -> String {
    first_inline_text(message)
        .map(|text| truncate_chars(collapse_whitespace(&text), SNIPPET_MAX_CHARS))
        .unwrap_or_default()
}

fn first_inline_text(part: &ParsedMail<'_>) -> Option<String> {
    if part.ctype.mimetype.eq_ignore_ascii_case("text/plain")
        && part.get_content_disposition().disposition == DispositionType::Inline
    {
        match part.get_body() {
            Ok(body) if !body.is_empty() => return Some(body),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "skipping undecodable text/plain part"),
        }
    }

    part.subparts.iter().find_map(first_inline_text)
}

/// Collapse every whitespace run to a single space and trim the ends
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate string to maximum characters (Unicode-aware)
///
/// Preserves complete characters, never splitting multi-byte sequences.
pub fn truncate_chars(input: String, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::{
        SNIPPET_MAX_CHARS, collapse_whitespace, decode_header, decode_message, extract_snippet,
        normalize_date, truncate_chars,
    };

    #[test]
    fn truncates_unicode_by_character() {
        let input = "a😀b😀c".to_owned();
        let out = truncate_chars(input, 4);
        assert_eq!(out, "a😀b😀");
    }

    #[test]
    fn decodes_base64_and_quoted_printable_words() {
        assert_eq!(
            decode_header(Some("=?UTF-8?B?SGVsbG8gV29ybGQ=?=")),
            "Hello World"
        );
        assert_eq!(
            decode_header(Some("=?ISO-8859-1?Q?Caf=E9_cr=E8me?=")),
            "Café crème"
        );
    }

    #[test]
    fn concatenates_mixed_plain_and_encoded_segments() {
        assert_eq!(
            decode_header(Some("Re: =?utf-8?q?caf=C3=A9?= meeting")),
            "Re: café meeting"
        );
        assert_eq!(
            decode_header(Some("=?utf-8?B?w4VzYQ==?= <asa@example.com>")),
            "Åsa <asa@example.com>"
        );
    }

    #[test]
    fn plain_and_missing_headers() {
        assert_eq!(decode_header(Some("Quarterly report")), "Quarterly report");
        assert_eq!(decode_header(Some("")), "");
        assert_eq!(decode_header(None), "");
    }

    #[test]
    fn unknown_charset_falls_back_to_utf8() {
        assert_eq!(decode_header(Some("=?x-unknown?Q?abc?=")), "abc");
        assert_eq!(
            decode_header(Some("=?x-no-such-charset?Q?caf=C3=A9?=")),
            "café"
        );
        assert_eq!(decode_header(Some("Re: =?x-unknown?B?SGk=?= there")), "Re: Hi there");
        assert_eq!(decode_header(Some("=?x-unknown?B?/w?=")), "\u{fffd}");
    }

    #[test]
    fn broken_encoded_word_syntax_is_returned_verbatim() {
        for raw in ["=?utf-8?Q?unterminated", "=?utf-8?Z?abc?=", "=??B?abc?="] {
            assert_eq!(decode_header(Some(raw)), raw);
        }
    }

    #[test]
    fn normalizes_rfc2822_dates_keeping_offset() {
        assert_eq!(
            normalize_date(Some("Wed, 1 Jan 2025 09:30:00 +0100")).as_deref(),
            Some("2025-01-01T09:30:00+01:00")
        );
        assert_eq!(
            normalize_date(Some("Tue, 14 Oct 2025 16:05:09 +0000 (UTC)")).as_deref(),
            Some("2025-10-14T16:05:09+00:00")
        );
    }

    #[test]
    fn malformed_dates_are_returned_unchanged() {
        for raw in [
            "sometime last week",
            "garbage",
            "12",
            "2025-01-01",
            "not a date",
            "Mon, 99 Foo 2025 25:61:00 +0000",
        ] {
            assert_eq!(normalize_date(Some(raw)).as_deref(), Some(raw), "{raw}");
        }
        assert_eq!(normalize_date(Some("")), None);
        assert_eq!(normalize_date(None), None);
    }

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(collapse_whitespace("  a \t\r\n b\n\nc  "), "a b c");
    }

    #[test]
    fn snippet_from_simple_plain_text_message() {
        let raw = b"Subject: Hi\r\n\r\nHello   there,\r\n\r\n  see you\ttomorrow.\r\n";
        let parsed = mailparse::parse_mail(raw).expect("parse");
        assert_eq!(extract_snippet(&parsed), "Hello there, see you tomorrow.");
    }

    #[test]
    fn snippet_skips_attachments_and_html() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=\"outer\"\r\n",
            "\r\n",
            "--outer\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "Content-Disposition: attachment; filename=\"notes.txt\"\r\n",
            "\r\n",
            "attached notes\r\n",
            "--outer\r\n",
            "Content-Type: multipart/alternative; boundary=\"inner\"\r\n",
            "\r\n",
            "--inner\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<p>html body</p>\r\n",
            "--inner\r\n",
            "Content-Type: text/plain; charset=iso-8859-1\r\n",
            "Content-Transfer-Encoding: quoted-printable\r\n",
            "\r\n",
            "Gr=FC=DFe aus M=FCnchen\r\n",
            "--inner--\r\n",
            "--outer--\r\n",
        );
        let parsed = mailparse::parse_mail(raw.as_bytes()).expect("parse");
        assert_eq!(extract_snippet(&parsed), "Grüße aus München");
    }

    #[test]
    fn snippet_is_empty_without_plain_text() {
        let raw = b"Content-Type: text/html\r\n\r\n<p>only html</p>\r\n";
        let parsed = mailparse::parse_mail(raw).expect("parse");
        assert_eq!(extract_snippet(&parsed), "");
    }

    #[test]
    fn snippet_is_bounded_and_has_no_whitespace_runs() {
        let body = "word \r\n\t ".repeat(200);
        let raw = format!("Content-Type: text/plain\r\n\r\n{body}");
        let parsed = mailparse::parse_mail(raw.as_bytes()).expect("parse");
        let snippet = extract_snippet(&parsed);
        assert_eq!(snippet.chars().count(), SNIPPET_MAX_CHARS);
        assert!(!snippet.contains("  "));
        assert!(!snippet.contains(['\t', '\r', '\n']));
    }

    #[test]
    fn decodes_full_message_fields() {
        let raw = concat!(
            "From: =?utf-8?q?J=C3=B6rg?= <jorg@example.com>\r\n",
            "To: team@example.com\r\n",
            "Subject: =?utf-8?B?U3RhdHVz?= update\r\n",
            "Date: Mon, 6 Jan 2025 08:00:00 -0500\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "All green.\r\n",
        );
        let decoded = decode_message(raw.as_bytes());
        assert_eq!(decoded.subject, "Status update");
        assert_eq!(decoded.from, "Jörg <jorg@example.com>");
        assert_eq!(decoded.to, "team@example.com");
        assert_eq!(decoded.date.as_deref(), Some("2025-01-06T08:00:00-05:00"));
        assert_eq!(decoded.snippet, "All green.");
    }

    #[test]
    fn message_without_headers_decodes_to_empty_fields() {
        let decoded = decode_message(b"\r\njust a body\r\n");
        assert_eq!(decoded.subject, "");
        assert_eq!(decoded.from, "");
        assert_eq!(decoded.date, None);
        assert_eq!(decoded.snippet, "just a body");
    }
}

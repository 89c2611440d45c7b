//! Message fetch pipeline
//!
//! Selects a mailbox, finds its UIDs, retrieves the newest `limit` messages
//! one round trip at a time, and decodes each into a [`MessageRecord`].

use tracing::{debug, warn};

use crate::errors::AppResult;
use crate::imap::{MailSession, RawMessage};
use crate::mime;
use crate::models::MessageRecord;

/// Fetch the newest `limit` messages of `mailbox`, newest first
///
/// UIDs are assumed to grow monotonically within a mailbox, so the highest
/// UIDs are treated as the most recent messages.
///
/// # Errors
///
/// - `Mailbox` if the mailbox cannot be selected
/// - `Protocol` if the UID search fails
///
/// A message that cannot be retrieved is skipped and logged; the remaining
/// messages are still returned.
pub async fn fetch_messages<S: MailSession>(
    session: &mut S,
    mailbox: &str,
    limit: usize,
) -> AppResult<Vec<MessageRecord>> {
    session.select(mailbox).await?;

    let mut uids = session.uid_search_all().await?;
    if uids.is_empty() {
        debug!(mailbox, "mailbox is empty");
        return Ok(Vec::new());
    }
    uids.sort_unstable();
    uids.dedup();

    let window = &uids[uids.len().saturating_sub(limit)..];
    let mut records = Vec::with_capacity(window.len());
    for &uid in window {
        match session.fetch_message(uid).await {
            Ok(raw) => records.push(build_record(&raw)),
            Err(e) => warn!(uid, error = %e, "skipping message that could not be retrieved"),
        }
    }

    records.reverse();
    debug!(mailbox, returned = records.len(), total = uids.len(), "fetch complete");
    Ok(records)
}

/// Decode one retrieved message into its record
fn build_record(raw: &RawMessage) -> MessageRecord {
    let decoded = mime::decode_message(&raw.body);
    MessageRecord {
        id: raw.uid.to_string(),
        subject: decoded.subject,
        from: decoded.from,
        to: decoded.to,
        date: decoded.date,
        snippet: decoded.snippet,
        flags: parse_flags(&raw.metadata),
    }
}

/// Extract the tokens of the `FLAGS (...)` list from FETCH metadata
///
/// Returns an empty list when there is no `FLAGS (` token or it is never
/// closed.
pub fn parse_flags(metadata: &str) -> Vec<String> {
    const MARKER: &str = "FLAGS (";
    let Some(start) = metadata.find(MARKER) else {
        return Vec::new();
    };
    let rest = &metadata[start + MARKER.len()..];
    let Some(end) = rest.find(')') else {
        return Vec::new();
    };
    rest[..end].split_whitespace().map(str::to_owned).collect()
}

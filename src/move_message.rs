//! Move workflow: copy, flag deleted, expunge
//!
//! The copy must succeed before the source is touched. Flagging and expunge
//! failures are reported too, with a message that says the copy already
//! landed in the target folder.

use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::imap::MailSession;
use crate::models::Scalar;

/// Validated move arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    /// UID of the message in the source mailbox
    pub uid: u32,
    /// Destination folder
    pub target_folder: String,
}

impl MoveRequest {
    /// Validate raw `emailId` / `targetFolder` values
    ///
    /// # Errors
    ///
    /// Returns `Validation` if either value is missing or blank, or if the
    /// id is not a positive UID.
    pub fn parse(email_id: Option<&Scalar>, target_folder: Option<&str>) -> AppResult<Self> {
        let email_id = email_id
            .map(Scalar::to_text)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::invalid("emailId is required"))?;
        let target_folder = target_folder
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| AppError::invalid("targetFolder is required"))?;

        let uid = email_id
            .parse::<u32>()
            .ok()
            .filter(|uid| *uid > 0)
            .ok_or_else(|| AppError::invalid(format!("emailId '{email_id}' is not a valid UID")))?;

        Ok(Self {
            uid,
            target_folder: target_folder.to_owned(),
        })
    }
}

/// Move one message from `source` into the request's target folder
///
/// # Errors
///
/// - `Mailbox` if `source` cannot be selected
/// - `Protocol` if the copy fails (nothing else is attempted), or if the
///   copy succeeded but flagging or expunging the original did not
pub async fn move_message<S: MailSession>(
    session: &mut S,
    source: &str,
    request: &MoveRequest,
) -> AppResult<()> {
    let MoveRequest { uid, target_folder } = request;
    session.select(source).await?;

    session.uid_copy(*uid, target_folder).await?;
    info!(uid, source, target = %target_folder, "message copied");

    session.uid_mark_deleted(*uid).await.map_err(|e| {
        AppError::Protocol(format!(
            "message {uid} was copied to '{target_folder}' but the original could not be flagged deleted: {e}"
        ))
    })?;
    session.expunge().await.map_err(|e| {
        AppError::Protocol(format!(
            "message {uid} was copied to '{target_folder}' and flagged deleted, but expunge failed: {e}"
        ))
    })?;

    info!(uid, source, target = %target_folder, "message moved");
    Ok(())
}

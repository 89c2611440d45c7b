//! Command dispatch
//!
//! Maps one [`CommandRequest`] to an operation, runs it inside a scoped IMAP
//! session, and converts every outcome into exactly one [`CommandResponse`].
//! All argument and configuration validation happens before a connection is
//! attempted.

use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::errors::{AppError, AppResult};
use crate::fetch::fetch_messages;
use crate::imap::{Connector, MailSession, with_session};
use crate::models::{
    ActionPayload, CommandRequest, CommandResponse, DEFAULT_FETCH_LIMIT, DEFAULT_MAILBOX,
};
use crate::move_message::{MoveRequest, move_message};

/// Maximum mailbox name length accepted from the payload
const MAX_MAILBOX_CHARS: usize = 256;

/// A fully validated command, ready to run
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Test,
    Fetch { mailbox: String, limit: usize },
    Move { source: String, request: MoveRequest },
}

/// Parse a raw stdin payload and run it
///
/// Empty or whitespace-only input is treated as an empty object.
pub async fn run_payload<C: Connector>(connector: &C, payload: &str) -> CommandResponse {
    let request = if payload.trim().is_empty() {
        CommandRequest::default()
    } else {
        match serde_json::from_str::<CommandRequest>(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(code = "validation", error = %e, "command payload is not valid JSON");
                return CommandResponse::failure(format!("invalid command payload: {e}"));
            }
        }
    };
    dispatch(connector, request).await
}

/// Run one command and package its outcome
///
/// Never fails: every error is converted to the `{ok: false, error}` shape.
pub async fn dispatch<C: Connector>(connector: &C, request: CommandRequest) -> CommandResponse {
    match execute(connector, request).await {
        Ok(payload) => CommandResponse::success(payload),
        Err(e) => failure(&e),
    }
}

fn failure(err: &AppError) -> CommandResponse {
    warn!(code = err.code(), error = %err, "command failed");
    CommandResponse::failure(err.to_string())
}

async fn execute<C: Connector>(connector: &C, request: CommandRequest) -> AppResult<ActionPayload> {
    let action = plan(&request)?;
    let config = ConnectionConfig::from_input(&request.config.unwrap_or_default())?;
    debug!(?action, host = %config.host, "dispatching command");

    let session = connector.connect(&config).await?;
    match action {
        Action::Test => with_session(session, async |s| s.noop().await)
            .await
            .map(|()| ActionPayload::Test { imap: true }),
        Action::Fetch { mailbox, limit } => {
            with_session(session, async |s| fetch_messages(s, &mailbox, limit).await)
                .await
                .map(|messages| ActionPayload::Fetch { messages })
        }
        Action::Move { source, request } => {
            with_session(session, async |s| move_message(s, &source, &request).await)
                .await
                .map(|()| ActionPayload::Move { moved: true })
        }
    }
}

/// Validate the action and its arguments without touching the network
fn plan(request: &CommandRequest) -> AppResult<Action> {
    match request.action.as_deref().map(str::trim) {
        Some("test") => Ok(Action::Test),
        Some("fetch") => Ok(Action::Fetch {
            mailbox: mailbox_or_default(request.folder_name.as_deref())?,
            limit: fetch_limit(request)?,
        }),
        Some("move") => {
            let request_args =
                MoveRequest::parse(request.email_id.as_ref(), request.target_folder.as_deref())?;
            validate_mailbox(&request_args.target_folder)?;
            Ok(Action::Move {
                source: mailbox_or_default(request.folder_name.as_deref())?,
                request: request_args,
            })
        }
        Some(other) if !other.is_empty() => Err(AppError::invalid(format!(
            "unsupported action '{other}'"
        ))),
        _ => Err(AppError::invalid("unsupported action")),
    }
}

/// Resolve `folderName`, defaulting to `INBOX` when absent or blank
fn mailbox_or_default(folder: Option<&str>) -> AppResult<String> {
    match folder.filter(|f| !f.trim().is_empty()) {
        Some(name) => {
            validate_mailbox(name)?;
            Ok(name.to_owned())
        }
        None => Ok(DEFAULT_MAILBOX.to_owned()),
    }
}

/// Resolve `limit`; absent or zero means the default
fn fetch_limit(request: &CommandRequest) -> AppResult<usize> {
    let Some(raw) = &request.limit else {
        return Ok(DEFAULT_FETCH_LIMIT);
    };
    let limit = raw
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| AppError::invalid(format!("limit '{}' is not a valid count", raw.to_text())))?;
    Ok(if limit == 0 { DEFAULT_FETCH_LIMIT } else { limit })
}

/// Validate mailbox name format
fn validate_mailbox(mailbox: &str) -> AppResult<()> {
    if mailbox.is_empty() || mailbox.chars().count() > MAX_MAILBOX_CHARS {
        return Err(AppError::invalid(format!(
            "mailbox must be 1..{MAX_MAILBOX_CHARS} characters"
        )));
    }
    validate_no_controls(mailbox, "mailbox")
}

/// Reject IMAP control characters in user-provided values
fn validate_no_controls(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::invalid(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

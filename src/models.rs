//! Input/output DTOs for the command contract
//!
//! The host application writes one [`CommandRequest`] to stdin and reads one
//! [`CommandResponse`] from stdout. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Default mailbox when `folderName` is absent or empty
pub const DEFAULT_MAILBOX: &str = "INBOX";

/// Default number of messages returned by `fetch`
pub const DEFAULT_FETCH_LIMIT: usize = 20;

/// A JSON scalar that may arrive as a number or as text
///
/// The host application is not consistent about quoting ports, limits and
/// message ids, so both forms are accepted and normalized later.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(u64),
    Text(String),
}

impl Scalar {
    /// Interpret the scalar as an unsigned integer, if possible
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Render the scalar as trimmed text
    pub fn to_text(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_owned(),
        }
    }
}

/// Raw connection parameters as supplied in the payload
///
/// Unvalidated; see [`crate::config::ConnectionConfig::from_input`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInput {
    #[serde(alias = "imapHost")]
    pub host: Option<String>,
    #[serde(alias = "imapPort")]
    pub port: Option<Scalar>,
    #[serde(alias = "user")]
    pub username: Option<String>,
    #[serde(alias = "pass")]
    pub password: Option<String>,
    #[serde(rename = "useImplicitTLS", alias = "useSecureImap")]
    pub use_implicit_tls: Option<bool>,
    #[serde(rename = "useStartTLS", alias = "useStartTls")]
    pub use_start_tls: Option<bool>,
}

/// One command read from stdin
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    /// `test`, `fetch` or `move`
    pub action: Option<String>,
    /// Connection parameters (an absent object is treated as empty)
    #[serde(default)]
    pub config: Option<ConnectionInput>,
    /// Mailbox to read from (`fetch`) or move out of (`move`)
    pub folder_name: Option<String>,
    /// Maximum number of messages for `fetch`
    pub limit: Option<Scalar>,
    /// UID of the message to move
    pub email_id: Option<Scalar>,
    /// Destination folder for `move`
    pub target_folder: Option<String>,
}

/// Normalized message record returned by `fetch`
///
/// Built once per retrieved message and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    /// Server-assigned UID
    pub id: String,
    pub subject: String,
    pub from: String,
    pub to: String,
    /// ISO-8601 when parseable, otherwise the raw header text
    pub date: Option<String>,
    /// Whitespace-collapsed plain-text preview
    pub snippet: String,
    /// IMAP flags in server order (e.g. `\Seen`, `\Flagged`)
    pub flags: Vec<String>,
}

/// Action-specific success payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ActionPayload {
    Test { imap: bool },
    Fetch { messages: Vec<MessageRecord> },
    Move { moved: bool },
}

/// The single document written to stdout
///
/// Serializes to `{"ok": true, ...payload}` or `{"ok": false, "error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub body: ResponseBody,
}

/// Either the payload fields or the error message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Success(ActionPayload),
    Failure { error: String },
}

impl CommandResponse {
    pub fn success(payload: ActionPayload) -> Self {
        Self {
            ok: true,
            body: ResponseBody::Success(payload),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            body: ResponseBody::Failure {
                error: error.into(),
            },
        }
    }
}

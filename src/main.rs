//! mail-imap-bridge: one-shot IMAP command adapter over stdio
//!
//! Reads a single JSON command from stdin, runs it against the IMAP server
//! named in the payload, and writes a single JSON result to stdout. Nothing
//! persists between invocations; diagnostics go to stderr.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and stdio handling
//! - [`config`]: Payload connection validation and env-driven network bounds
//! - [`errors`]: Application error model
//! - [`dispatch`]: Command routing, validation and response packaging
//! - [`imap`]: IMAP transport, session abstraction and scoped logout
//! - [`fetch`]: Newest-first message retrieval
//! - [`move_message`]: Copy, flag and expunge workflow
//! - [`models`]: Input/output DTOs
//! - [`mime`]: Header decoding, date normalization and snippet extraction

mod config;
mod dispatch;
mod errors;
mod fetch;
mod imap;
mod mime;
mod models;
mod move_message;
#[cfg(test)]
mod testing;

use config::RuntimeSettings;
use imap::ImapConnector;
use models::CommandResponse;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Application entry point
///
/// Always exits normally once a response has been attempted; failures are
/// reported in the response document, never through the exit status.
///
/// # Example
///
/// ```sh
/// echo '{"action":"test","config":{"host":"imap.example.com","username":"me","password":"pw"}}' \
///   | RUST_LOG=mail_imap_bridge=debug cargo run
/// ```
#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let response = respond().await;
    let document = serde_json::to_string(&response).unwrap_or_else(|e| {
        error!(error = %e, "failed to serialize response");
        serde_json::json!({ "ok": false, "error": format!("internal error: {e}") }).to_string()
    });

    let mut stdout = tokio::io::stdout();
    if let Err(e) = write_line(&mut stdout, &document).await {
        error!(error = %e, "failed to write response");
    }
}

async fn respond() -> CommandResponse {
    let settings = match RuntimeSettings::load_from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "invalid runtime settings");
            return CommandResponse::failure(e.to_string());
        }
    };

    let mut payload = String::new();
    if let Err(e) = tokio::io::stdin().read_to_string(&mut payload).await {
        error!(error = %e, "failed to read command from stdin");
        return CommandResponse::failure(format!("invalid command payload: {e}"));
    }

    dispatch::run_payload(&ImapConnector::new(settings), &payload).await
}

async fn write_line(stdout: &mut tokio::io::Stdout, document: &str) -> std::io::Result<()> {
    stdout.write_all(document.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

//! Configuration for a single command invocation
//!
//! Connection parameters arrive inside the command payload and are validated
//! into a [`ConnectionConfig`] before any socket is opened. Process-wide
//! network bounds are read from `MAIL_IMAP_*` environment variables into
//! [`RuntimeSettings`].

use std::env;
use std::env::VarError;
use std::time::Duration;

use secrecy::SecretString;

use crate::errors::{AppError, AppResult};
use crate::models::ConnectionInput;

/// Default IMAP port for implicit TLS
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// How the TLS layer is established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS from the first byte (usually port 993)
    Implicit,
    /// Plaintext greeting, then upgrade via `STARTTLS` before LOGIN
    StartTls,
}

/// Validated IMAP connection parameters
///
/// Bound to one command; never cached across invocations. The password is
/// stored using `SecretString` to prevent accidental logging.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// IMAP server hostname
    pub host: String,
    /// IMAP server port
    pub port: u16,
    /// Username for authentication
    pub username: String,
    /// Password stored in a type that prevents accidental logging
    pub password: SecretString,
    /// Transport security choice
    pub tls: TlsMode,
}

impl ConnectionConfig {
    /// Validate raw payload parameters
    ///
    /// # Errors
    ///
    /// Returns `Config` if host or username is missing or blank, if the
    /// password is missing or empty,
    /// if the port is not a valid `u16`, or if neither implicit TLS nor
    /// STARTTLS is enabled.
    pub fn from_input(input: &ConnectionInput) -> AppResult<Self> {
        let host = non_blank(input.host.as_deref());
        let username = non_blank(input.username.as_deref());
        let password = input.password.as_deref().filter(|p| !p.is_empty());

        let (Some(host), Some(username), Some(password)) = (host, username, password) else {
            let mut missing = Vec::new();
            if host.is_none() {
                missing.push("host");
            }
            if username.is_none() {
                missing.push("username");
            }
            if password.is_none() {
                missing.push("password");
            }
            return Err(AppError::config(format!(
                "IMAP configuration incomplete (missing {})",
                missing.join(", ")
            )));
        };

        let port = match &input.port {
            None => DEFAULT_IMAP_PORT,
            Some(raw) => raw
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .filter(|p| *p != 0)
                .ok_or_else(|| {
                    AppError::config(format!("invalid IMAP port '{}'", raw.to_text()))
                })?,
        };

        let tls = match (
            input.use_implicit_tls.unwrap_or(true),
            input.use_start_tls.unwrap_or(false),
        ) {
            (true, _) => TlsMode::Implicit,
            (false, true) => TlsMode::StartTls,
            (false, false) => {
                return Err(AppError::config(
                    "insecure IMAP is not supported; enable useImplicitTLS or useStartTLS",
                ));
            }
        };

        Ok(Self {
            host: host.to_owned(),
            port,
            username: username.to_owned(),
            password: SecretString::new(password.into()),
            tls,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Network bounds applied to every IMAP session
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// TCP connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// TLS handshake, greeting, STARTTLS and LOGIN timeout in milliseconds
    pub greeting_timeout_ms: u64,
    /// Per-command socket I/O timeout in milliseconds
    pub socket_timeout_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            greeting_timeout_ms: 15_000,
            socket_timeout_ms: 300_000,
        }
    }
}

impl RuntimeSettings {
    /// Load network bounds from environment variables
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAIL_IMAP_CONNECT_TIMEOUT_MS=10000
    /// MAIL_IMAP_GREETING_TIMEOUT_MS=10000
    /// MAIL_IMAP_SOCKET_TIMEOUT_MS=60000
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `Config` if a variable is set but is not a valid `u64`.
    pub fn load_from_env() -> AppResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            connect_timeout_ms: parse_u64_env(
                "MAIL_IMAP_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout_ms,
            )?,
            greeting_timeout_ms: parse_u64_env(
                "MAIL_IMAP_GREETING_TIMEOUT_MS",
                defaults.greeting_timeout_ms,
            )?,
            socket_timeout_ms: parse_u64_env(
                "MAIL_IMAP_SOCKET_TIMEOUT_MS",
                defaults.socket_timeout_ms,
            )?,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn greeting_timeout(&self) -> Duration {
        Duration::from_millis(self.greeting_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `Config` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => parse_u64_value(&v)
            .ok_or_else(|| AppError::config(format!("invalid u64 environment variable {key}: '{v}'"))),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::config(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

fn parse_u64_value(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

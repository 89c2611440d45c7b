//! IMAP transport and session operations
//!
//! Provides timeout-bounded wrappers around `async-imap` operations behind the
//! [`MailSession`] trait, the TLS / STARTTLS connection sequence, and the
//! scoped acquisition helper [`with_session`] that guarantees a single LOGOUT
//! on every exit path.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_imap::types::{Fetch, Flag};
use async_imap::{Client, Session};
use futures::{FutureExt, TryStreamExt};
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::config::{ConnectionConfig, RuntimeSettings, TlsMode};
use crate::errors::{AppError, AppResult};

/// Type alias for authenticated IMAP session over TLS
///
/// Both implicit TLS and STARTTLS end up with the same stream type.
pub type TlsImapSession = Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// Tag used for the only command issued before `async-imap` takes over
const STARTTLS_TAG: &str = "a001";

/// One retrieved message: raw RFC822 bytes plus FETCH attribute metadata
///
/// `metadata` carries the non-literal FETCH attributes in wire form, e.g.
/// `UID 42 FLAGS (\Seen \Flagged)`.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    pub body: Vec<u8>,
    pub metadata: String,
}

/// Operations the fetch pipeline and move workflow need from a session
///
/// Implemented by [`ImapConnection`] for real servers. Every method except
/// [`MailSession::logout`] may fail; `logout` absorbs its own failures so it
/// can run unconditionally during teardown.
pub trait MailSession {
    /// `NOOP`, used as a liveness probe
    fn noop(&mut self) -> impl Future<Output = AppResult<()>>;

    /// `SELECT` a mailbox read-write
    ///
    /// Fails with `Mailbox` when the folder is missing or inaccessible.
    fn select(&mut self, mailbox: &str) -> impl Future<Output = AppResult<()>>;

    /// `UID SEARCH ALL` on the selected mailbox, in server order
    fn uid_search_all(&mut self) -> impl Future<Output = AppResult<Vec<u32>>>;

    /// `UID FETCH <uid> (UID RFC822 FLAGS)` in one round trip
    fn fetch_message(&mut self, uid: u32) -> impl Future<Output = AppResult<RawMessage>>;

    /// `UID COPY <uid> <mailbox>`
    fn uid_copy(&mut self, uid: u32, mailbox: &str) -> impl Future<Output = AppResult<()>>;

    /// `UID STORE <uid> +FLAGS.SILENT (\Deleted)`
    fn uid_mark_deleted(&mut self, uid: u32) -> impl Future<Output = AppResult<()>>;

    /// `EXPUNGE` on the selected mailbox
    fn expunge(&mut self) -> impl Future<Output = AppResult<()>>;

    /// `LOGOUT`; never fails outward
    fn logout(self) -> impl Future<Output = ()>;
}

/// Opens authenticated sessions for validated connection configs
///
/// The dispatcher is generic over this so the whole command path can be
/// exercised without a network.
pub trait Connector {
    type Session: MailSession;

    fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> impl Future<Output = AppResult<Self::Session>>;
}

/// Run `op` against `session`, then log out exactly once
///
/// Logout happens whether `op` succeeds, returns an error, or panics. A panic
/// is converted into an `Internal` error after teardown.
pub async fn with_session<S, T>(
    mut session: S,
    op: impl AsyncFnOnce(&mut S) -> AppResult<T>,
) -> AppResult<T>
where
    S: MailSession,
{
    let outcome = AssertUnwindSafe(op(&mut session)).catch_unwind().await;
    session.logout().await;
    match outcome {
        Ok(result) => result,
        Err(panic) => Err(AppError::Internal(format!(
            "operation aborted: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unexpected fault"
    }
}

/// Await `fut` within `limit`, classifying failures
///
/// Elapsed bounds become `Timeout`; errors from the operation itself are
/// mapped through `classify`.
async fn bounded<T, E, F>(
    limit: Duration,
    what: &str,
    fut: F,
    classify: fn(String) -> AppError,
) -> AppResult<T>
where
    E: Display,
    F: Future<Output = Result<T, E>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| AppError::Timeout(format!("{what} timed out")))
        .and_then(|r| r.map_err(|e| classify(format!("{what} failed: {e}"))))
}

/// Production connector over TCP + rustls
#[derive(Debug, Clone)]
pub struct ImapConnector {
    settings: RuntimeSettings,
}

impl ImapConnector {
    pub fn new(settings: RuntimeSettings) -> Self {
        Self { settings }
    }
}

impl Connector for ImapConnector {
    type Session = ImapConnection;

    async fn connect(&self, config: &ConnectionConfig) -> AppResult<ImapConnection> {
        let session = connect_authenticated(&self.settings, config).await?;
        Ok(ImapConnection {
            session,
            socket_timeout: self.settings.socket_timeout(),
        })
    }
}

/// Connect to IMAP server and authenticate
///
/// Performs full connection sequence with timeouts:
/// 1. TCP connect
/// 2. Implicit TLS handshake, or plaintext greeting + `STARTTLS` + handshake
/// 3. Read IMAP greeting (implicit TLS only; STARTTLS already consumed it)
/// 4. LOGIN authentication
///
/// # Timeouts
///
/// - TCP connect: `connect_timeout_ms`
/// - Everything else up to LOGIN: `greeting_timeout_ms`
///
/// # Errors
///
/// - `Config` if the hostname is invalid for TLS SNI
/// - `Timeout` if any connection phase times out
/// - `Auth` if the server rejects the credentials
/// - `Connection` for TCP, TLS, STARTTLS or greeting failures
pub async fn connect_authenticated(
    settings: &RuntimeSettings,
    config: &ConnectionConfig,
) -> AppResult<TlsImapSession> {
    let greeting_duration = settings.greeting_timeout();

    let tcp = bounded(
        settings.connect_timeout(),
        "tcp connect",
        TcpStream::connect((config.host.as_str(), config.port)),
        AppError::Connection,
    )
    .await?;
    debug!(host = %config.host, port = config.port, tls = ?config.tls, "tcp connected");

    let tcp = match config.tls {
        TlsMode::Implicit => tcp,
        TlsMode::StartTls => starttls(tcp, greeting_duration).await?,
    };

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|_| AppError::config("invalid IMAP host for TLS SNI"))?;
    let tls_stream = bounded(
        greeting_duration,
        "TLS handshake",
        connector.connect(server_name, tcp),
        AppError::Connection,
    )
    .await?;

    let mut client = Client::new(tls_stream);
    if config.tls == TlsMode::Implicit {
        let greeting = bounded(
            greeting_duration,
            "IMAP greeting",
            client.read_response(),
            AppError::Connection,
        )
        .await?;
        if greeting.is_none() {
            return Err(AppError::Connection(
                "IMAP server closed connection before greeting".to_owned(),
            ));
        }
    }

    let pass = config.password.expose_secret();
    let session = timeout(
        greeting_duration,
        client.login(config.username.as_str(), pass),
    )
    .await
    .map_err(|_| AppError::Timeout("IMAP login timed out".to_owned()))
    .and_then(|r| r.map_err(|(e, _)| classify_login_error(e)))?;

    debug!(host = %config.host, "authenticated");
    Ok(session)
}

/// Map a LOGIN failure, keeping the server's rejection text for `NO`/`BAD`
fn classify_login_error(err: async_imap::error::Error) -> AppError {
    match err {
        async_imap::error::Error::No(reason) | async_imap::error::Error::Bad(reason) => {
            AppError::Auth(reason)
        }
        other => AppError::Connection(format!("IMAP login failed: {other}")),
    }
}

/// Upgrade a plaintext connection in place
///
/// Reads the greeting, issues `STARTTLS`, and waits for its tagged `OK`.
/// Untagged lines in between (e.g. `* CAPABILITY`) are ignored.
async fn starttls(tcp: TcpStream, limit: Duration) -> AppResult<TcpStream> {
    let mut reader = BufReader::new(tcp);

    let greeting = read_line(&mut reader, limit).await?;
    if !greeting.starts_with("* OK") {
        return Err(AppError::Connection(format!(
            "unexpected IMAP greeting before STARTTLS: {}",
            greeting.trim_end()
        )));
    }

    let command = format!("{STARTTLS_TAG} STARTTLS\r\n");
    bounded(
        limit,
        "STARTTLS",
        async {
            reader.get_mut().write_all(command.as_bytes()).await?;
            reader.get_mut().flush().await
        },
        AppError::Connection,
    )
    .await?;

    let tagged = format!("{STARTTLS_TAG} ");
    loop {
        let line = read_line(&mut reader, limit).await?;
        let Some(status) = line.strip_prefix(&tagged) else {
            continue;
        };
        if status.starts_with("OK") {
            break;
        }
        return Err(AppError::Connection(format!(
            "server refused STARTTLS: {}",
            status.trim_end()
        )));
    }

    Ok(reader.into_inner())
}

async fn read_line(reader: &mut BufReader<TcpStream>, limit: Duration) -> AppResult<String> {
    let mut buf = Vec::new();
    let read = bounded(
        limit,
        "IMAP read",
        reader.read_until(b'\n', &mut buf),
        AppError::Connection,
    )
    .await?;
    if read == 0 {
        return Err(AppError::Connection(
            "IMAP server closed connection during STARTTLS".to_owned(),
        ));
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Authenticated session bound to one command
pub struct ImapConnection {
    session: TlsImapSession,
    socket_timeout: Duration,
}

impl MailSession for ImapConnection {
    async fn noop(&mut self) -> AppResult<()> {
        bounded(
            self.socket_timeout,
            "NOOP",
            self.session.noop(),
            AppError::Protocol,
        )
        .await
    }

    async fn select(&mut self, mailbox: &str) -> AppResult<()> {
        let encoded = encode_mailbox(mailbox);
        let selected = bounded(
            self.socket_timeout,
            &format!("SELECT '{mailbox}'"),
            self.session.select(&encoded),
            AppError::Mailbox,
        )
        .await?;
        debug!(mailbox, exists = selected.exists, "mailbox selected");
        Ok(())
    }

    async fn uid_search_all(&mut self) -> AppResult<Vec<u32>> {
        let set = bounded(
            self.socket_timeout,
            "UID SEARCH",
            self.session.uid_search("ALL"),
            AppError::Protocol,
        )
        .await?;
        Ok(set.into_iter().collect())
    }

    async fn fetch_message(&mut self, uid: u32) -> AppResult<RawMessage> {
        let stream = bounded(
            self.socket_timeout,
            "UID FETCH",
            self.session.uid_fetch(uid.to_string(), "(UID RFC822 FLAGS)"),
            AppError::Protocol,
        )
        .await?;
        let fetches: Vec<Fetch> = bounded(
            self.socket_timeout,
            "UID FETCH stream",
            stream.try_collect(),
            AppError::Protocol,
        )
        .await?;

        let fetch = fetches
            .iter()
            .find(|f| f.uid == Some(uid) && f.body().is_some())
            .or_else(|| fetches.iter().find(|f| f.body().is_some()))
            .ok_or_else(|| AppError::Protocol(format!("message uid {uid} has no RFC822 body")))?;

        let flags = fetch.flags().map(|flag| flag_to_wire(&flag)).collect::<Vec<_>>();
        Ok(RawMessage {
            uid,
            body: fetch.body().map(<[u8]>::to_vec).unwrap_or_default(),
            metadata: format!("UID {uid} FLAGS ({})", flags.join(" ")),
        })
    }

    async fn uid_copy(&mut self, uid: u32, mailbox: &str) -> AppResult<()> {
        let encoded = encode_mailbox(mailbox);
        bounded(
            self.socket_timeout,
            "UID COPY",
            self.session.uid_copy(uid.to_string(), &encoded),
            AppError::Protocol,
        )
        .await
    }

    async fn uid_mark_deleted(&mut self, uid: u32) -> AppResult<()> {
        let stream = bounded(
            self.socket_timeout,
            "UID STORE",
            self.session
                .uid_store(uid.to_string(), "+FLAGS.SILENT (\\Deleted)"),
            AppError::Protocol,
        )
        .await?;
        let _: Vec<Fetch> = bounded(
            self.socket_timeout,
            "UID STORE stream",
            stream.try_collect(),
            AppError::Protocol,
        )
        .await?;
        Ok(())
    }

    async fn expunge(&mut self) -> AppResult<()> {
        let stream = bounded(
            self.socket_timeout,
            "EXPUNGE",
            self.session.expunge(),
            AppError::Protocol,
        )
        .await?;
        let _: Vec<u32> = bounded(
            self.socket_timeout,
            "EXPUNGE stream",
            stream.try_collect(),
            AppError::Protocol,
        )
        .await?;
        Ok(())
    }

    async fn logout(mut self) {
        if let Err(e) = bounded(
            self.socket_timeout,
            "LOGOUT",
            self.session.logout(),
            AppError::Connection,
        )
        .await
        {
            debug!(error = %e, "logout did not complete cleanly");
        }
    }
}

/// Encode a mailbox name as IMAP modified UTF-7
///
/// ASCII-only names are passed through untouched.
pub fn encode_mailbox(mailbox: &str) -> String {
    if mailbox.is_ascii() {
        mailbox.to_owned()
    } else {
        utf7_imap::encode_utf7_imap(mailbox.to_owned())
    }
}

/// Render a flag the way it appears on the wire (`\Seen`, `$Junk`, ...)
pub fn flag_to_wire(flag: &Flag<'_>) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_owned(),
        Flag::Answered => "\\Answered".to_owned(),
        Flag::Flagged => "\\Flagged".to_owned(),
        Flag::Deleted => "\\Deleted".to_owned(),
        Flag::Draft => "\\Draft".to_owned(),
        Flag::Recent => "\\Recent".to_owned(),
        Flag::MayCreate => "\\*".to_owned(),
        Flag::Custom(name) => name.to_string(),
    }
}

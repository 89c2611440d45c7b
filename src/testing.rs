//! In-memory IMAP doubles for unit tests
//!
//! [`ScriptedSession`] behaves like a tiny IMAP server over a shared
//! [`MailState`]; tests keep a handle to the state so they can inspect it
//! after the session has been consumed by LOGOUT.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::config::ConnectionConfig;
use crate::errors::{AppError, AppResult};
use crate::imap::{Connector, MailSession, RawMessage};

/// A stored message: raw RFC822 bytes and its flags
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub raw: Vec<u8>,
    pub flags: Vec<String>,
}

/// Server-side state shared between a test and its sessions
#[derive(Debug, Default)]
pub struct MailState {
    pub mailboxes: BTreeMap<String, BTreeMap<u32, StoredMessage>>,
    pub selected: Option<String>,
    /// Every command issued, in order (`SELECT INBOX`, `UID COPY 4 Archive`, ...)
    pub commands: Vec<String>,
    pub logouts: usize,
    pub connects: usize,
    pub fail_search: bool,
    pub fail_copy: bool,
    pub fail_store: bool,
    pub fail_expunge: bool,
    pub fail_fetch_uids: Vec<u32>,
    pub reject_login: Option<String>,
}

pub type SharedState = Rc<RefCell<MailState>>;

impl MailState {
    pub fn shared() -> SharedState {
        Rc::new(RefCell::new(Self::default()))
    }

    /// Add a message to `mailbox` under an explicit UID
    pub fn add(&mut self, mailbox: &str, uid: u32, raw: &[u8], flags: &[&str]) {
        self.mailboxes.entry(mailbox.to_owned()).or_default().insert(
            uid,
            StoredMessage {
                raw: raw.to_vec(),
                flags: flags.iter().map(|f| (*f).to_owned()).collect(),
            },
        );
    }

    /// Create an empty mailbox
    pub fn create(&mut self, mailbox: &str) {
        self.mailboxes.entry(mailbox.to_owned()).or_default();
    }

    fn selected_mut(&mut self) -> AppResult<&mut BTreeMap<u32, StoredMessage>> {
        let name = self
            .selected
            .clone()
            .ok_or_else(|| AppError::Protocol("no mailbox selected".to_owned()))?;
        self.mailboxes
            .get_mut(&name)
            .ok_or_else(|| AppError::Protocol("selected mailbox vanished".to_owned()))
    }
}

/// Session over a [`MailState`]
#[derive(Debug)]
pub struct ScriptedSession {
    state: SharedState,
}

impl ScriptedSession {
    pub fn new(state: &SharedState) -> Self {
        Self {
            state: Rc::clone(state),
        }
    }

    fn log(&self, command: String) {
        self.state.borrow_mut().commands.push(command);
    }
}

impl MailSession for ScriptedSession {
    async fn noop(&mut self) -> AppResult<()> {
        self.log("NOOP".to_owned());
        Ok(())
    }

    async fn select(&mut self, mailbox: &str) -> AppResult<()> {
        self.log(format!("SELECT {mailbox}"));
        let mut state = self.state.borrow_mut();
        if !state.mailboxes.contains_key(mailbox) {
            return Err(AppError::Mailbox(format!(
                "SELECT '{mailbox}' failed: No Response: Mailbox doesn't exist"
            )));
        }
        state.selected = Some(mailbox.to_owned());
        Ok(())
    }

    async fn uid_search_all(&mut self) -> AppResult<Vec<u32>> {
        self.log("UID SEARCH ALL".to_owned());
        let mut state = self.state.borrow_mut();
        if state.fail_search {
            return Err(AppError::Protocol("UID SEARCH failed: BAD".to_owned()));
        }
        // Reverse order: callers must not rely on the server sorting UIDs.
        Ok(state.selected_mut()?.keys().rev().copied().collect())
    }

    async fn fetch_message(&mut self, uid: u32) -> AppResult<RawMessage> {
        self.log(format!("UID FETCH {uid}"));
        let mut state = self.state.borrow_mut();
        if state.fail_fetch_uids.contains(&uid) {
            return Err(AppError::Protocol(format!("UID FETCH {uid} failed")));
        }
        let message = state
            .selected_mut()?
            .get(&uid)
            .cloned()
            .ok_or_else(|| AppError::Protocol(format!("message uid {uid} not found")))?;
        Ok(RawMessage {
            uid,
            body: message.raw,
            metadata: format!("UID {uid} FLAGS ({})", message.flags.join(" ")),
        })
    }

    async fn uid_copy(&mut self, uid: u32, mailbox: &str) -> AppResult<()> {
        self.log(format!("UID COPY {uid} {mailbox}"));
        let mut state = self.state.borrow_mut();
        if state.fail_copy {
            return Err(AppError::Protocol("UID COPY failed: NO [TRYCREATE]".to_owned()));
        }
        let message = state
            .selected_mut()?
            .get(&uid)
            .cloned()
            .ok_or_else(|| AppError::Protocol(format!("UID COPY failed: no uid {uid}")))?;
        let target = state
            .mailboxes
            .get_mut(mailbox)
            .ok_or_else(|| AppError::Protocol("UID COPY failed: NO [TRYCREATE]".to_owned()))?;
        let next = target.keys().next_back().map_or(1, |last| last + 1);
        target.insert(next, message);
        Ok(())
    }

    async fn uid_mark_deleted(&mut self, uid: u32) -> AppResult<()> {
        self.log(format!("UID STORE {uid} +FLAGS (\\Deleted)"));
        let mut state = self.state.borrow_mut();
        if state.fail_store {
            return Err(AppError::Protocol("UID STORE failed".to_owned()));
        }
        if let Some(message) = state.selected_mut()?.get_mut(&uid) {
            message.flags.push("\\Deleted".to_owned());
        }
        Ok(())
    }

    async fn expunge(&mut self) -> AppResult<()> {
        self.log("EXPUNGE".to_owned());
        let mut state = self.state.borrow_mut();
        if state.fail_expunge {
            return Err(AppError::Protocol("EXPUNGE failed".to_owned()));
        }
        state
            .selected_mut()?
            .retain(|_, m| !m.flags.iter().any(|f| f == "\\Deleted"));
        Ok(())
    }

    async fn logout(self) {
        self.state.borrow_mut().logouts += 1;
    }
}

/// Connector handing out [`ScriptedSession`]s over one shared state
#[derive(Debug)]
pub struct ScriptedConnector {
    pub state: SharedState,
}

impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    async fn connect(&self, _config: &ConnectionConfig) -> AppResult<ScriptedSession> {
        let mut state = self.state.borrow_mut();
        state.connects += 1;
        if let Some(reason) = state.reject_login.clone() {
            return Err(AppError::Auth(reason));
        }
        drop(state);
        Ok(ScriptedSession::new(&self.state))
    }
}

//! Outgoing email abstraction. Delivery itself is left to the deployment; the
//! default mailer only logs the message.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::info;

/// What an outgoing mail is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    /// Email address confirmation.
    Verification,
    /// Password reset link.
    PasswordReset,
}

/// A message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    /// Recipient address.
    pub to: String,
    /// Purpose of the message.
    pub kind: MailKind,
    /// Subject line.
    pub subject: String,
    /// Link carrying the single-use token.
    pub link: String,
}

/// The transport could not deliver a message.
#[derive(Debug, Error)]
#[error("failed to deliver mail to `{to}`: {reason}")]
pub struct MailError {
    /// Recipient address.
    pub to: String,
    /// Transport-specific failure description.
    pub reason: String,
}

/// Transport for account emails.
pub trait Mailer: Send + Sync {
    /// Deliver one message.
    fn send(&self, mail: OutgoingMail) -> BoxFuture<'static, Result<(), MailError>>;
}

/// Mailer writing messages to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, mail: OutgoingMail) -> BoxFuture<'static, Result<(), MailError>> {
        Box::pin(async move {
            info!(to = %mail.to, kind = ?mail.kind, link = %mail.link, "{}", mail.subject);
            Ok(())
        })
    }
}

/// Mailer keeping every message in memory, used by tests to read tokens back.
#[derive(Debug, Default, Clone)]
pub struct OutboxMailer {
    outbox: Arc<Mutex<Vec<OutgoingMail>>>,
}

impl OutboxMailer {
    /// Empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, oldest first.
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent message of `kind` addressed to `to`.
    pub fn last_to(&self, to: &str, kind: MailKind) -> Option<OutgoingMail> {
        self.sent()
            .into_iter()
            .rev()
            .find(|mail| mail.to == to && mail.kind == kind)
    }
}

impl Mailer for OutboxMailer {
    fn send(&self, mail: OutgoingMail) -> BoxFuture<'static, Result<(), MailError>> {
        let outbox = self.outbox.clone();
        Box::pin(async move {
            outbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(mail);
            Ok(())
        })
    }
}

impl OutgoingMail {
    /// Token carried in the `token` query parameter of the link.
    pub fn token(&self) -> Option<&str> {
        self.link
            .split_once("token=")
            .map(|(_, token)| token.split('&').next().unwrap_or(token))
    }
}

//! Turning a rendered body into something an SMTP server will take.
//!
//! Addresses are parsed into [`Mailbox`]es when a message is composed, so a malformed or
//! smuggled address stops that one message instead of ending up on the wire. The RFC 5322 text
//! itself is produced by `lettre`'s message builder.

use std::time::SystemTime;

use chrono::{DateTime, Local};
use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::Mailbox;
use lettre::Message;
use sha2::{Digest, Sha256};

/// Why a message couldn't be put together.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// An address that doesn't parse, or that carries control characters
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress {
        /// The offending address, as given
        address: String,
        /// What's wrong with it
        reason: String,
    },

    /// The subject line contains a line break or another control character
    #[error("subject contains a control character")]
    InvalidSubject,

    /// Nobody to send to
    #[error("no recipients")]
    NoRecipients,

    /// The message builder refused the headers
    #[error("could not build message: {0}")]
    Build(#[from] lettre::error::Error),
}

/// One outgoing message. Lives only as long as the send it was made for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposedMessage {
    /// Subject line, unencoded
    pub subject: String,
    /// The `From` mailbox
    pub sender: Mailbox,
    /// The `To` mailboxes, in the order they were given
    pub recipients: Vec<Mailbox>,
    /// The rendered body
    pub body: String,
}

/// Parses one address, either bare (`a@x.com`) or with a name (`Alice <a@x.com>`).
pub fn parse_mailbox(address: &str) -> Result<Mailbox, ComposeError> {
    let invalid = |reason: String| ComposeError::InvalidAddress {
        address: address.to_owned(),
        reason,
    };
    if address.chars().any(char::is_control) {
        return Err(invalid("contains a control character".to_owned()));
    }
    address.trim().parse().map_err(|err| invalid(format!("{}", err)))
}

/// Builds a message after checking every address and the subject.
pub fn compose(
    subject: impl Into<String>,
    sender: &Mailbox,
    recipients: &[String],
    body: impl Into<String>,
) -> Result<ComposedMessage, ComposeError> {
    let subject = subject.into();
    if subject.chars().any(|c| c.is_control() && c != '\t') {
        return Err(ComposeError::InvalidSubject);
    }
    if recipients.is_empty() {
        return Err(ComposeError::NoRecipients);
    }
    let recipients = recipients
        .iter()
        .map(|addr| parse_mailbox(addr))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ComposedMessage {
        subject,
        sender: sender.clone(),
        recipients,
        body: body.into(),
    })
}

/// Splits a recipient cell like `a@x.com; b@y.com` into addresses, in order. Whitespace around
/// each address is trimmed; empty entries are dropped when `drop_empty` is set.
pub fn split_recipients(value: &str, delimiter: char, drop_empty: bool) -> Vec<String> {
    value
        .split(delimiter)
        .map(str::trim)
        .filter(|addr| !(drop_empty && addr.is_empty()))
        .map(str::to_owned)
        .collect()
}

impl ComposedMessage {
    /// The bare sender address for `MAIL FROM`.
    pub fn envelope_sender(&self) -> String {
        self.sender.email.to_string()
    }

    /// The bare recipient addresses for `RCPT TO`.
    pub fn envelope_recipients(&self) -> Vec<String> {
        self.recipients.iter().map(|r| r.email.to_string()).collect()
    }

    /// Serializes the message with CRLF line endings, ready for DATA.
    pub fn to_rfc5322(&self, date: DateTime<Local>) -> Result<String, ComposeError> {
        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(self.subject.clone())
            .date(SystemTime::from(date))
            .message_id(Some(self.message_id(&date.to_rfc2822())));
        for recipient in self.recipients.iter() {
            builder = builder.to(recipient.clone());
        }

        let message = builder
            .header(ContentType::TEXT_PLAIN)
            .header(ContentTransferEncoding::QuotedPrintable)
            .body(normalize_newlines(&self.body))?;

        let mut out = String::from_utf8_lossy(&message.formatted()).into_owned();
        if !out.ends_with("\r\n") {
            out.push_str("\r\n");
        }
        Ok(out)
    }

    fn message_id(&self, date: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(date.as_bytes());
        hasher.update(self.sender.to_string().as_bytes());
        for recipient in self.recipients.iter() {
            hasher.update(recipient.to_string().as_bytes());
        }
        hasher.update(self.subject.as_bytes());
        hasher.update(self.body.as_bytes());
        let digest = hex::encode(hasher.finalize());

        format!("<{}@{}>", &digest[..32], self.sender.email.domain())
    }
}

fn normalize_newlines(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\n', "\r\n")
}

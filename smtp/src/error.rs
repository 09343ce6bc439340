use std::io;

use crate::response::Reply;

/// A recipient the server refused during `RCPT TO`, together with its reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub recipient: String,
    pub reply: Reply,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("timed out waiting for the server")]
    Timeout,

    #[error("connection closed by the server")]
    Closed,

    #[error("malformed reply: {0:?}")]
    Malformed(String),

    #[error("server doesn't support {0}")]
    Unsupported(String),

    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: Reply },

    #[error("refusing to send {0}: argument contains a line break")]
    LineBreak(&'static str),

    #[error("authentication failed: {0}")]
    AuthFailed(Reply),

    #[error("no usable authentication mechanism (server offers {0:?})")]
    NoAuthMechanism(Vec<String>),

    #[error("sender rejected: {0}")]
    SenderRejected(Reply),

    #[error("all {} recipient(s) rejected", .0.len())]
    RecipientsRejected(Vec<Rejection>),

    #[error("message content rejected: {0}")]
    DataRejected(Reply),

    /// The whole message went out but the server's verdict never came back, so it may or may
    /// not have been queued.
    #[error("message sent but not confirmed: {0}")]
    Unconfirmed(#[source] Box<Error>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

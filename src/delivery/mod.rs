//! Delivery
//!
//! A [`Transport`] takes one composed message and gets it to the relay. The real one is
//! [`SmtpTransport`]; [`DryRun`] prints instead, and [`Retrying`] wraps either with a retry
//! policy.

mod dry_run;
mod smtp;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::message::ComposedMessage;

pub use self::dry_run::DryRun;
pub use self::smtp::SmtpTransport;

/// Login for the relay. The secret never shows up in `Debug` output.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login name, usually the sender address
    pub username: String,

    /// Password or app password
    #[serde(rename = "password")]
    pub secret: String,
}

impl Credentials {
    /// Pairs a login name with its secret.
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Why a message didn't make it to the relay.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The relay turned down the login, or offered no way to log in
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Couldn't reach the relay, or the session broke off before DATA
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// No recipient was accepted
    #[error("every recipient was rejected: {rejected:?}")]
    RejectedRecipient {
        /// The refused addresses
        rejected: Vec<String>,
    },

    /// The sender or the message itself was refused
    #[error("message rejected: {0}")]
    MessageRejected(String),

    /// The whole message was sent but the relay's answer was lost
    #[error("message may or may not have been delivered: {0}")]
    Unconfirmed(String),
}

impl From<panorama_smtp::Error> for DeliveryError {
    fn from(err: panorama_smtp::Error) -> Self {
        use panorama_smtp::Error::*;
        match err {
            AuthFailed(reply) => DeliveryError::AuthFailed(reply.to_string()),
            err @ NoAuthMechanism(_) => DeliveryError::AuthFailed(err.to_string()),
            RecipientsRejected(rejections) => DeliveryError::RejectedRecipient {
                rejected: rejections.into_iter().map(|r| r.recipient).collect(),
            },
            SenderRejected(reply) | DataRejected(reply) => {
                DeliveryError::MessageRejected(reply.to_string())
            }
            err @ LineBreak(_) => DeliveryError::MessageRejected(err.to_string()),
            Unconfirmed(err) => DeliveryError::Unconfirmed(err.to_string()),
            // network and TLS trouble, or a server that broke off the session
            err => DeliveryError::ConnectionFailed(err.to_string()),
        }
    }
}

/// What happened to the recipients of a message that was accepted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients the server took
    pub accepted: Vec<String>,

    /// Recipients the server refused, each with the server's reason
    pub rejected: Vec<(String, String)>,
}

impl DeliveryReport {
    /// Everyone accepted.
    pub fn all(recipients: &[String]) -> Self {
        DeliveryReport {
            accepted: recipients.to_vec(),
            rejected: Vec::new(),
        }
    }

    /// Whether anyone was refused.
    pub fn is_partial(&self) -> bool {
        !self.rejected.is_empty()
    }
}

/// Something that can deliver a composed message.
#[async_trait]
pub trait Transport {
    /// Sends one message to `recipients` on behalf of `sender`, one session per call.
    async fn send(
        &self,
        credentials: &Credentials,
        sender: &str,
        recipients: &[String],
        message: &ComposedMessage,
    ) -> Result<DeliveryReport, DeliveryError>;
}

#[async_trait]
impl<T: Transport + Sync + ?Sized> Transport for &T {
    async fn send(
        &self,
        credentials: &Credentials,
        sender: &str,
        recipients: &[String],
        message: &ComposedMessage,
    ) -> Result<DeliveryReport, DeliveryError> {
        (**self).send(credentials, sender, recipients, message).await
    }
}

/// How often a connection failure is retried before giving up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 means fail on the first error
    pub attempts: u32,
    /// Pause before each retry
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 0,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Retries [`DeliveryError::ConnectionFailed`] according to a [`RetryPolicy`]. Other errors
/// are returned as they are: sending the same thing again won't change the answer, and an
/// [`DeliveryError::Unconfirmed`] message may already be in someone's inbox.
pub struct Retrying<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> Retrying<T> {
    /// Wraps `inner`.
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Retrying { inner, policy }
    }
}

#[async_trait]
impl<T: Transport + Send + Sync> Transport for Retrying<T> {
    async fn send(
        &self,
        credentials: &Credentials,
        sender: &str,
        recipients: &[String],
        message: &ComposedMessage,
    ) -> Result<DeliveryReport, DeliveryError> {
        let mut attempt = 0;
        loop {
            match self
                .inner
                .send(credentials, sender, recipients, message)
                .await
            {
                Err(DeliveryError::ConnectionFailed(reason)) if attempt < self.policy.attempts => {
                    attempt += 1;
                    warn!(
                        "connection failed ({}), retry {}/{} in {:?}",
                        reason, attempt, self.policy.attempts, self.policy.backoff
                    );
                    tokio::time::sleep(self.policy.backoff).await;
                }
                res => return res,
            }
        }
    }
}
